// Copyright 2025 Signalscope (https://github.com/signalscope)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Version constraint evaluation
//!
//! Evaluates `host_version_range` expressions against a concrete semver
//! version. The grammar is a single comparator (`>=`, `<=`, `>`, `<`, `==`,
//! `~=`) followed by a version, or a conjunction of two comparators forming
//! a closed range (`>=1.0.0, <2.0.0`). `~=` is a compatible release: it pins
//! every component of the written version except the last, so `~=1.4` means
//! `>=1.4.0, <1.5.0`.
//!
//! A constraint that fails to parse is an error, never "always compatible".

use crate::error::{PluginError, PluginResult};
use semver::Version;

/// Outcome of a compatibility check, computed on demand and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityCheck {
    /// Whether the version satisfies the constraint.
    pub is_compatible: bool,
    /// Human-readable explanation when incompatible.
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Ge,
    Le,
    Gt,
    Lt,
    Eq,
}

impl Op {
    fn matches(self, candidate: &Version, bound: &Version) -> bool {
        match self {
            Op::Ge => candidate >= bound,
            Op::Le => candidate <= bound,
            Op::Gt => candidate > bound,
            Op::Lt => candidate < bound,
            Op::Eq => candidate == bound,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparator {
    op: Op,
    bound: Version,
}

/// A parsed constraint expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    expression: String,
    comparators: Vec<Comparator>,
}

impl Constraint {
    /// Parses a constraint expression.
    ///
    /// Fails with [`PluginError::ConstraintSyntax`] on an empty expression,
    /// an unknown operator, a malformed version, or more than two
    /// comma-separated terms.
    pub fn parse(expression: &str) -> PluginResult<Self> {
        let syntax = |message: String| PluginError::ConstraintSyntax {
            expression: expression.to_string(),
            message,
        };

        let terms: Vec<&str> = expression.split(',').map(str::trim).collect();
        if terms.iter().any(|t| t.is_empty()) {
            return Err(syntax("empty constraint term".to_string()));
        }
        if terms.len() > 2 {
            return Err(syntax(format!(
                "expected at most two comparators, found {}",
                terms.len()
            )));
        }

        let mut comparators = Vec::new();
        for term in terms {
            parse_term(term, &mut comparators).map_err(syntax)?;
        }

        Ok(Self {
            expression: expression.to_string(),
            comparators,
        })
    }

    /// Whether the candidate version satisfies every comparator.
    pub fn matches(&self, candidate: &Version) -> bool {
        self.comparators
            .iter()
            .all(|c| c.op.matches(candidate, &c.bound))
    }

    /// The original expression text.
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expression)
    }
}

fn parse_term(term: &str, out: &mut Vec<Comparator>) -> Result<(), String> {
    let (op_text, version_text) = split_operator(term)?;
    let version_text = version_text.trim();

    if op_text == "~=" {
        let (lower, upper) = compatible_release_bounds(version_text)?;
        out.push(Comparator {
            op: Op::Ge,
            bound: lower,
        });
        out.push(Comparator {
            op: Op::Lt,
            bound: upper,
        });
        return Ok(());
    }

    let op = match op_text {
        ">=" => Op::Ge,
        "<=" => Op::Le,
        ">" => Op::Gt,
        "<" => Op::Lt,
        "==" => Op::Eq,
        other => return Err(format!("unknown operator '{}'", other)),
    };

    let bound = Version::parse(version_text)
        .map_err(|e| format!("invalid version '{}': {}", version_text, e))?;
    out.push(Comparator { op, bound });
    Ok(())
}

fn split_operator(term: &str) -> Result<(&str, &str), String> {
    for op in [">=", "<=", "==", "~="] {
        if let Some(rest) = term.strip_prefix(op) {
            return Ok((op, rest));
        }
    }
    for op in [">", "<"] {
        if let Some(rest) = term.strip_prefix(op) {
            return Ok((op, rest));
        }
    }
    Err(format!("missing comparison operator in '{}'", term))
}

/// Computes the `>=lower, <upper` bounds of a `~=` term.
///
/// The written version must have two or three numeric components and no
/// pre-release or build metadata; the upper bound bumps the second-to-last
/// written component.
fn compatible_release_bounds(version_text: &str) -> Result<(Version, Version), String> {
    if version_text.contains(['-', '+']) {
        return Err(format!(
            "'~=' does not accept pre-release or build metadata: '{}'",
            version_text
        ));
    }

    let components: Vec<u64> = version_text
        .split('.')
        .map(|part| {
            part.parse::<u64>()
                .map_err(|_| format!("invalid version component '{}' in '{}'", part, version_text))
        })
        .collect::<Result<_, _>>()?;

    match components.as_slice() {
        [major, minor] => Ok((
            Version::new(*major, *minor, 0),
            Version::new(*major, minor + 1, 0),
        )),
        [major, minor, patch] => Ok((
            Version::new(*major, *minor, *patch),
            Version::new(*major, minor + 1, 0),
        )),
        _ => Err(format!(
            "'~=' requires a two- or three-component version, got '{}'",
            version_text
        )),
    }
}

/// Evaluates a constraint expression against a version.
pub fn satisfies(version: &Version, expression: &str) -> PluginResult<bool> {
    Ok(Constraint::parse(expression)?.matches(version))
}

/// Evaluates a constraint expression and explains an incompatibility.
pub fn check(version: &Version, expression: &str) -> PluginResult<CompatibilityCheck> {
    let constraint = Constraint::parse(expression)?;
    if constraint.matches(version) {
        Ok(CompatibilityCheck {
            is_compatible: true,
            reason: None,
        })
    } else {
        Ok(CompatibilityCheck {
            is_compatible: false,
            reason: Some(format!(
                "version {} does not satisfy '{}'",
                version, constraint
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> Version {
        Version::parse(text).unwrap()
    }

    #[test]
    fn test_closed_range() {
        assert!(satisfies(&v("1.4.2"), ">=1.0.0, <2.0.0").unwrap());
        assert!(!satisfies(&v("2.0.0"), ">=1.0.0, <2.0.0").unwrap());
        assert!(!satisfies(&v("0.9.9"), ">=1.0.0, <2.0.0").unwrap());
    }

    #[test]
    fn test_compatible_release_two_components() {
        assert!(satisfies(&v("1.4.2"), "~=1.4").unwrap());
        assert!(satisfies(&v("1.4.0"), "~=1.4").unwrap());
        assert!(!satisfies(&v("1.5.0"), "~=1.4").unwrap());
        assert!(!satisfies(&v("1.3.9"), "~=1.4").unwrap());
    }

    #[test]
    fn test_compatible_release_three_components() {
        assert!(satisfies(&v("1.4.2"), "~=1.4.2").unwrap());
        assert!(satisfies(&v("1.4.9"), "~=1.4.2").unwrap());
        assert!(!satisfies(&v("1.4.1"), "~=1.4.2").unwrap());
        assert!(!satisfies(&v("1.5.0"), "~=1.4.2").unwrap());
    }

    #[test]
    fn test_single_comparators() {
        assert!(satisfies(&v("1.0.0"), "==1.0.0").unwrap());
        assert!(!satisfies(&v("1.0.1"), "==1.0.0").unwrap());
        assert!(satisfies(&v("1.0.0"), "<=1.0.0").unwrap());
        assert!(satisfies(&v("0.5.0"), "<1.0.0").unwrap());
        assert!(satisfies(&v("2.1.0"), ">2.0.0").unwrap());
    }

    #[test]
    fn test_prerelease_sorts_before_release() {
        assert!(satisfies(&v("2.0.0-alpha.1"), "<2.0.0").unwrap());
        assert!(!satisfies(&v("2.0.0-alpha.1"), ">=2.0.0").unwrap());
        assert!(satisfies(&v("1.0.0-rc.1"), ">=1.0.0-alpha").unwrap());
    }

    #[test]
    fn test_malformed_is_an_error_not_permissive() {
        for expr in [
            "",
            "1.0.0",
            "~1.0",
            "=1.0.0",
            "~=1",
            "~=1.4.0-alpha",
            ">=1.0.0, <2.0.0, <3.0.0",
            ">=one.two.three",
            ">=1.0.0,,<2.0.0",
        ] {
            let err = satisfies(&v("1.0.0"), expr).unwrap_err();
            assert!(
                matches!(err, PluginError::ConstraintSyntax { .. }),
                "expected syntax error for '{}', got {:?}",
                expr,
                err
            );
        }
    }

    #[test]
    fn test_check_reports_reason() {
        let ok = check(&v("1.4.2"), ">=1.0.0, <2.0.0").unwrap();
        assert!(ok.is_compatible);
        assert!(ok.reason.is_none());

        let bad = check(&v("2.0.0"), ">=1.0.0, <2.0.0").unwrap();
        assert!(!bad.is_compatible);
        assert!(bad.reason.unwrap().contains("2.0.0"));
    }

    #[test]
    fn test_whitespace_tolerated_around_terms() {
        assert!(satisfies(&v("1.4.2"), " >=1.0.0 , <2.0.0 ").unwrap());
        assert!(satisfies(&v("1.4.2"), ">= 1.0.0").unwrap());
    }
}
