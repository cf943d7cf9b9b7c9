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

//! Plugin manifest schema and parser
//!
//! Defines the structure of `signalscope-plugin.toml` manifest files.

use crate::capability::Capability;
use crate::compat::Constraint;
use crate::error::{PluginError, PluginResult};
use crate::MANIFEST_FILENAME;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Plugin manifest - the declarative description of one plugin directory
///
/// Immutable after creation. Unknown top-level keys are preserved in an
/// opaque map and ignored by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Plugin metadata
    pub plugin: PluginMetadata,

    /// Declared dependencies, order preserved
    #[serde(default)]
    pub dependencies: Vec<DependencyReq>,

    /// Unknown keys, preserved but ignored
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

/// Core plugin metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique plugin identifier within a discovery root
    pub id: String,

    /// Human-readable name
    #[serde(default)]
    pub name: Option<String>,

    /// Plugin version (semver)
    pub version: String,

    /// Declared capability; unknown values are a parse error
    pub capability: Capability,

    /// Constraint expression the host version must satisfy
    pub host_version_range: String,

    /// Command line resolved inside the plugin directory
    pub entry_point: String,

    /// Plugin description
    #[serde(default)]
    pub description: String,
}

/// A declared dependency on another plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyReq {
    /// Dependency plugin id
    pub id: String,
    /// Constraint the dependency's version must satisfy
    pub version_range: String,
}

impl PluginManifest {
    /// Load manifest from a file
    pub fn from_file(path: &Path) -> PluginResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PluginError::ManifestNotFound(format!("{}: {}", path.display(), e)))?;
        Self::from_str(&content)
    }

    /// Load manifest from a plugin directory
    pub fn from_directory(dir: &Path) -> PluginResult<Self> {
        let manifest_path = dir.join(MANIFEST_FILENAME);
        Self::from_file(&manifest_path)
    }

    /// Parse manifest from string
    pub fn from_str(content: &str) -> PluginResult<Self> {
        let manifest: PluginManifest = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validate the manifest
    pub fn validate(&self) -> PluginResult<()> {
        // Validate plugin ID
        if self.plugin.id.is_empty() {
            return Err(PluginError::InvalidManifest(
                "Plugin ID cannot be empty".into(),
            ));
        }

        if !self
            .plugin
            .id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(PluginError::InvalidManifest(
                "Plugin ID can only contain alphanumeric characters, hyphens, and underscores"
                    .into(),
            ));
        }

        // Validate version
        semver::Version::parse(&self.plugin.version)?;

        // Validate host version range
        Constraint::parse(&self.plugin.host_version_range)?;

        // Validate entry point
        let parts: Vec<String> = shlex::Shlex::new(&self.plugin.entry_point).collect();
        if parts.is_empty() {
            return Err(PluginError::InvalidManifest(
                "Entry point cannot be empty".into(),
            ));
        }

        // Validate dependencies
        for dep in &self.dependencies {
            if dep.id.is_empty() {
                return Err(PluginError::InvalidManifest(
                    "Dependency ID cannot be empty".into(),
                ));
            }
            Constraint::parse(&dep.version_range).map_err(|e| {
                PluginError::InvalidManifest(format!(
                    "Invalid dependency version range for '{}': {}",
                    dep.id, e
                ))
            })?;
        }

        Ok(())
    }

    /// Get the plugin ID
    pub fn id(&self) -> &str {
        &self.plugin.id
    }

    /// Get the plugin version
    pub fn version(&self) -> semver::Version {
        semver::Version::parse(&self.plugin.version).unwrap()
    }

    /// Get the declared capability
    pub fn capability(&self) -> Capability {
        self.plugin.capability
    }

    /// Entry point split into program and arguments
    pub fn entry_command(&self) -> PluginResult<(String, Vec<String>)> {
        let mut parts = shlex::Shlex::new(&self.plugin.entry_point).collect::<Vec<String>>();
        if parts.is_empty() {
            return Err(PluginError::InvalidManifest(
                "Entry point cannot be empty".into(),
            ));
        }
        let program = parts.remove(0);
        Ok((program, parts))
    }

    /// Compute content hash for change detection across re-discovery
    pub fn content_hash(&self) -> String {
        let content = serde_json::to_string(self).unwrap_or_default();
        let hash = blake3::hash(content.as_bytes());
        hex::encode(hash.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_MANIFEST: &str = r#"
[plugin]
id = "resample"
name = "Resampler"
version = "1.2.0"
capability = "operation"
host_version_range = ">=0.1.0, <0.2.0"
entry_point = "resample.sh --mode linear"
description = "Resamples a series onto a uniform grid"

[[dependencies]]
id = "base-math"
version_range = ">=1.0.0"

[[dependencies]]
id = "units"
version_range = "~=2.1"
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = PluginManifest::from_str(SAMPLE_MANIFEST).unwrap();
        assert_eq!(manifest.id(), "resample");
        assert_eq!(manifest.plugin.name.as_deref(), Some("Resampler"));
        assert_eq!(manifest.version(), semver::Version::new(1, 2, 0));
        assert_eq!(manifest.capability(), Capability::Operation);
        assert_eq!(manifest.dependencies.len(), 2);
        // Declaration order is preserved
        assert_eq!(manifest.dependencies[0].id, "base-math");
        assert_eq!(manifest.dependencies[1].id, "units");
    }

    #[test]
    fn test_entry_command_split() {
        let manifest = PluginManifest::from_str(SAMPLE_MANIFEST).unwrap();
        let (program, args) = manifest.entry_command().unwrap();
        assert_eq!(program, "resample.sh");
        assert_eq!(args, vec!["--mode".to_string(), "linear".to_string()]);
    }

    #[test]
    fn test_unknown_capability_rejected() {
        let manifest_str = SAMPLE_MANIFEST.replace("\"operation\"", "\"telemetry\"");
        let err = PluginManifest::from_str(&manifest_str).unwrap_err();
        assert!(err.to_string().contains("telemetry"));
    }

    #[test]
    fn test_missing_required_field() {
        let manifest_str = r#"
[plugin]
id = "broken"
version = "1.0.0"
capability = "operation"
entry_point = "run.sh"
"#;
        let result = PluginManifest::from_str(manifest_str);
        assert!(matches!(result, Err(PluginError::ManifestParseError(_))));
    }

    #[test]
    fn test_invalid_id_rejected() {
        let manifest_str = SAMPLE_MANIFEST.replace("\"resample\"", "\"invalid id\"");
        let result = PluginManifest::from_str(&manifest_str);
        assert!(matches!(result, Err(PluginError::InvalidManifest(_))));
    }

    #[test]
    fn test_bad_host_range_is_constraint_error() {
        let manifest_str = SAMPLE_MANIFEST.replace(">=0.1.0, <0.2.0", "approximately 1");
        let result = PluginManifest::from_str(&manifest_str);
        assert!(matches!(
            result,
            Err(PluginError::ConstraintSyntax { .. })
        ));
    }

    #[test]
    fn test_invalid_semver_rejected() {
        let manifest_str = SAMPLE_MANIFEST.replace("\"1.2.0\"", "\"1.2\"");
        let result = PluginManifest::from_str(&manifest_str);
        assert!(matches!(result, Err(PluginError::InvalidManifest(_))));
    }

    #[test]
    fn test_unknown_keys_preserved() {
        let manifest_str = format!("{}\n[publisher]\nname = \"acme\"\n", SAMPLE_MANIFEST);
        let manifest = PluginManifest::from_str(&manifest_str).unwrap();
        assert!(manifest.extra.contains_key("publisher"));
    }

    #[test]
    fn test_content_hash_tracks_changes() {
        let a = PluginManifest::from_str(SAMPLE_MANIFEST).unwrap();
        let b = PluginManifest::from_str(SAMPLE_MANIFEST).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());

        let changed =
            PluginManifest::from_str(&SAMPLE_MANIFEST.replace("\"1.2.0\"", "\"1.2.1\"")).unwrap();
        assert_ne!(a.content_hash(), changed.content_hash());
    }
}
