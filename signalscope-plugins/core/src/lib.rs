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

//! Signalscope Plugin System
//!
//! A sandboxed, versioned plugin system for extending Signalscope with
//! custom series operations, loaders, exporters, and visualizations.
//!
//! # Architecture
//!
//! Plugins are directories containing a `signalscope-plugin.toml` manifest
//! and an entry-point executable. The [`PluginRegistry`] discovers them,
//! validates manifests, checks semantic-version compatibility against the
//! host, and walks each plugin through an explicit lifecycle
//! (`Discovered -> Loaded -> Active`, with `Failed` and `Disabled` for the
//! unhappy paths).
//!
//! Every plugin call runs in a separate process under kernel-enforced
//! memory and CPU ceilings plus a host-side wall-clock watchdog; a limit
//! breach produces a [`SecurityViolation`] and forces the plugin to
//! `Failed`, while a crash in plugin code can never propagate into the
//! host. Plugins speak JSON-RPC over stdin/stdout and must pass a
//! capability-conformance handshake at load time.
//!
//! # Example
//!
//! ```rust,ignore
//! use signalscope_plugins::{PluginRegistry, RegistryConfig};
//! use signalscope_core::{ExecutionContext, SeriesFrame};
//!
//! let registry = PluginRegistry::new(RegistryConfig::default());
//! registry.discover("./plugins".as_ref())?;
//! registry.load("resample")?;
//! let output = registry.execute("resample", &ExecutionContext::new(series))?;
//! ```

pub mod capability;
pub mod compat;
pub mod error;
pub mod manifest;
pub mod protocol;
pub mod registry;
pub mod sandbox;
pub mod state;

// Re-exports
pub use capability::Capability;
pub use compat::{check, satisfies, CompatibilityCheck, Constraint};
pub use error::{PluginError, PluginResult};
pub use manifest::{DependencyReq, PluginManifest, PluginMetadata};
pub use protocol::{MetadataReply, PluginOutput};
pub use registry::{PluginInfo, PluginRegistry, RegistryConfig};
pub use sandbox::{ResourceLimits, Sandbox, SandboxFailure, SecurityViolation, ViolationKind};
pub use state::PluginState;

/// Plugin manifest filename
pub const MANIFEST_FILENAME: &str = "signalscope-plugin.toml";

/// Default plugins directory name
pub const PLUGINS_DIR_NAME: &str = "plugins";
