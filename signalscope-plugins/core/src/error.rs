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

//! Plugin error types

use crate::sandbox::SecurityViolation;
use crate::state::PluginState;
use thiserror::Error;

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors that can occur in the plugin system
#[derive(Debug, Error)]
pub enum PluginError {
    // Manifest errors
    #[error("Manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Manifest parse error: {0}")]
    ManifestParseError(String),

    // Version constraint errors
    #[error("Invalid version constraint '{expression}': {message}")]
    ConstraintSyntax { expression: String, message: String },

    #[error("Host version {host} does not satisfy '{range}'")]
    Incompatible { host: String, range: String },

    // Dependency errors
    #[error("Dependency not found: {0}")]
    DependencyNotFound(String),

    #[error("Version conflict: {0}")]
    VersionConflict(String),

    // State errors
    #[error("Invalid state transition: {from:?} -> {to:?}")]
    State { from: PluginState, to: PluginState },

    #[error("Plugin '{id}' is in state {state:?}, expected one of {expected:?}")]
    WrongState {
        id: String,
        state: PluginState,
        expected: Vec<PluginState>,
    },

    // Load errors
    #[error("Plugin load failed: {0}")]
    LoadFailed(String),

    #[error("Capability conformance failed for '{id}': {message}")]
    Conformance { id: String, message: String },

    // Execution errors
    #[error("Plugin execution error: {0}")]
    Execution(String),

    #[error("Security violation: {0}")]
    Violation(SecurityViolation),

    // Registry errors
    #[error("Plugin not found in registry: {0}")]
    NotFoundInRegistry(String),

    #[error("Plugin already registered: {0}")]
    AlreadyRegistered(String),

    // Sandbox/host errors
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PluginError {
    fn from(e: serde_json::Error) -> Self {
        PluginError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for PluginError {
    fn from(e: toml::de::Error) -> Self {
        PluginError::ManifestParseError(e.to_string())
    }
}

impl From<semver::Error> for PluginError {
    fn from(e: semver::Error) -> Self {
        PluginError::InvalidManifest(format!("Invalid version: {}", e))
    }
}
