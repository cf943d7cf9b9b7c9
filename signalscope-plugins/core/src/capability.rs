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

//! Plugin capability kinds
//!
//! Every plugin declares exactly one capability in its manifest. The
//! capability fixes the wire method the registry invokes and the method set
//! the plugin must advertise during the load-time conformance handshake.

use serde::{Deserialize, Serialize};

/// Method every plugin must answer regardless of capability.
pub const METADATA_METHOD: &str = "plugin.metadata";

/// Capability enumeration
///
/// Unknown capability strings are rejected at manifest parse time; the
/// registry never coerces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Transforms a series into another series (interpolation, filtering).
    Operation,
    /// Produces a series from an external source.
    Loader,
    /// Writes a series to an external representation.
    Exporter,
    /// Renders a figure description from a series.
    Visualization,
    /// Contributes a UI surface description.
    Ui,
}

impl Capability {
    /// Canonical string form, matching the manifest spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Operation => "operation",
            Capability::Loader => "loader",
            Capability::Exporter => "exporter",
            Capability::Visualization => "visualization",
            Capability::Ui => "ui",
        }
    }

    /// Wire method the registry calls for an execution of this capability.
    pub fn invoke_method(&self) -> &'static str {
        match self {
            Capability::Operation => "series.apply",
            Capability::Loader => "data.load",
            Capability::Exporter => "data.export",
            Capability::Visualization => "figure.render",
            Capability::Ui => "ui.describe",
        }
    }

    /// Methods a plugin of this capability must advertise at load time.
    pub fn required_methods(&self) -> [&'static str; 2] {
        [METADATA_METHOD, self.invoke_method()]
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_spelling() {
        let cap: Capability = serde_json::from_str("\"visualization\"").unwrap();
        assert_eq!(cap, Capability::Visualization);
        assert_eq!(serde_json::to_string(&cap).unwrap(), "\"visualization\"");
    }

    #[test]
    fn test_unknown_capability_rejected() {
        let result: Result<Capability, _> = serde_json::from_str("\"telemetry\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_required_methods_include_invoke() {
        for cap in [
            Capability::Operation,
            Capability::Loader,
            Capability::Exporter,
            Capability::Visualization,
            Capability::Ui,
        ] {
            let required = cap.required_methods();
            assert!(required.contains(&METADATA_METHOD));
            assert!(required.contains(&cap.invoke_method()));
        }
    }
}
