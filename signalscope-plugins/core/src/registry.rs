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

//! Plugin registry
//!
//! Orchestrates discovery -> manifest validation -> compatibility check ->
//! load -> sandboxed execution -> state update. The registry is the only
//! component the host application talks to; nothing a plugin does reaches
//! the host as anything but a typed result.

use crate::capability::METADATA_METHOD;
use crate::compat;
use crate::error::{PluginError, PluginResult};
use crate::manifest::PluginManifest;
use crate::protocol::{MetadataReply, PluginOutput};
use crate::sandbox::{ResourceLimits, Sandbox, SandboxFailure};
use crate::state::PluginState;
use crate::MANIFEST_FILENAME;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use semver::Version;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Host application version plugins are checked against.
    pub host_version: Version,
    /// Resource ceilings applied to every sandboxed call.
    pub limits: ResourceLimits,
    /// Consecutive security violations after which disabling is proposed.
    pub failure_threshold: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            // The crate version is the host version unless the host says otherwise.
            host_version: Version::parse(env!("CARGO_PKG_VERSION")).unwrap(),
            limits: ResourceLimits::default(),
            failure_threshold: 3,
        }
    }
}

/// The registry's live record for one plugin
///
/// Mutated only by registry methods in response to lifecycle events.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    /// Plugin id (directory name when the manifest could not be parsed).
    pub id: String,
    /// Parsed manifest; `None` only for malformed-manifest directories.
    pub manifest: Option<PluginManifest>,
    /// Plugin directory.
    pub path: PathBuf,
    /// Current lifecycle state.
    pub state: PluginState,
    /// Most recent failure reason, if any.
    pub last_error: Option<String>,
    /// Successful loads over the registry's lifetime.
    pub load_count: u64,
    /// Violations and load failures; monotonic, never reset.
    pub failure_count: u64,
    /// Violations since the last successful execution.
    pub consecutive_failures: u32,
    /// Set when `consecutive_failures` reaches the configured threshold.
    /// A proposal only; the registry never disables a plugin on its own.
    pub disable_recommended: bool,
    /// When this record was first created.
    pub discovered_at: DateTime<Utc>,
}

impl PluginInfo {
    fn new(id: String, manifest: Option<PluginManifest>, path: PathBuf) -> Self {
        Self {
            id,
            manifest,
            path,
            state: PluginState::Discovered,
            last_error: None,
            load_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            disable_recommended: false,
            discovered_at: Utc::now(),
        }
    }

    /// Moves to `next`, failing loudly on an illegal edge without mutating.
    fn transition(&mut self, next: PluginState) -> PluginResult<()> {
        if !self.state.can_transition(next) {
            return Err(PluginError::State {
                from: self.state,
                to: next,
            });
        }
        debug!(plugin = %self.id, from = %self.state, to = %next, "plugin state transition");
        self.state = next;
        Ok(())
    }
}

struct PluginEntry {
    info: RwLock<PluginInfo>,
    /// Serializes load/execute per plugin id; distinct plugins run freely.
    call_lock: Mutex<()>,
}

/// Plugin registry for one discovery root or more
///
/// Explicitly constructed and owned by the host; there is no global
/// instance. Safe to share across host threads.
pub struct PluginRegistry {
    config: RegistryConfig,
    sandbox: Sandbox,
    plugins: RwLock<HashMap<String, Arc<PluginEntry>>>,
}

impl PluginRegistry {
    /// Creates a registry with the given configuration.
    pub fn new(config: RegistryConfig) -> Self {
        let sandbox = Sandbox::new(config.limits);
        Self {
            config,
            sandbox,
            plugins: RwLock::new(HashMap::new()),
        }
    }

    /// The configured host version.
    pub fn host_version(&self) -> &Version {
        &self.config.host_version
    }

    /// Scans the immediate subdirectories of `root` for plugin manifests.
    ///
    /// Malformed or host-incompatible plugins are recorded in state
    /// `Failed` with a reason rather than omitted, so operators can see why
    /// a plugin did not load. Re-running on an unchanged directory leaves
    /// existing records (and their counters) untouched.
    pub fn discover(&self, root: &Path) -> PluginResult<Vec<PluginInfo>> {
        info!(root = %root.display(), "scanning for plugins");
        let mut seen = Vec::new();

        for entry in WalkDir::new(root)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path
                .file_name()
                .map(|n| n == MANIFEST_FILENAME)
                .unwrap_or(false)
            {
                continue;
            }
            let Some(plugin_dir) = path.parent() else {
                continue;
            };

            let id = match PluginManifest::from_directory(plugin_dir) {
                Ok(manifest) => self.record_discovered(manifest, plugin_dir),
                Err(e) => {
                    warn!(path = %plugin_dir.display(), error = %e, "failed to parse plugin manifest");
                    self.record_malformed(plugin_dir, &e)
                }
            };
            seen.push(id);
        }

        let plugins = self.plugins.read();
        Ok(seen
            .iter()
            .filter_map(|id| plugins.get(id).map(|e| e.info.read().clone()))
            .collect())
    }

    /// Registers or refreshes a successfully parsed manifest.
    fn record_discovered(&self, manifest: PluginManifest, dir: &Path) -> String {
        let id = manifest.id().to_string();
        let hash = manifest.content_hash();

        let mut plugins = self.plugins.write();
        if let Some(entry) = plugins.get(&id) {
            let mut info = entry.info.write();
            let unchanged = info
                .manifest
                .as_ref()
                .map(|m| m.content_hash() == hash && info.path == dir)
                .unwrap_or(false);
            if unchanged {
                return id;
            }
            if info.state == PluginState::Disabled {
                // A disabled plugin stays disabled until an explicit enable,
                // even if its directory changed underneath.
                return id;
            }
            // Changed content re-enters the lifecycle as a fresh discovery;
            // counters survive for the registry's lifetime.
            info.manifest = Some(manifest.clone());
            info.path = dir.to_path_buf();
            info.state = PluginState::Discovered;
            info.last_error = None;
            self.apply_compatibility(&mut info, &manifest);
            return id;
        }

        let mut info = PluginInfo::new(id.clone(), Some(manifest.clone()), dir.to_path_buf());
        self.apply_compatibility(&mut info, &manifest);
        plugins.insert(
            id.clone(),
            Arc::new(PluginEntry {
                info: RwLock::new(info),
                call_lock: Mutex::new(()),
            }),
        );
        info!(plugin = %id, "discovered plugin");
        id
    }

    /// Marks a record `Failed` when the host version misses the range.
    fn apply_compatibility(&self, info: &mut PluginInfo, manifest: &PluginManifest) {
        // The range was syntax-checked during manifest validation, so only
        // genuine incompatibility can surface here.
        match compat::check(
            &self.config.host_version,
            &manifest.plugin.host_version_range,
        ) {
            Ok(check) if check.is_compatible => {}
            Ok(check) => {
                let reason = check
                    .reason
                    .unwrap_or_else(|| "incompatible host version".to_string());
                warn!(plugin = %info.id, %reason, "plugin incompatible with host");
                info.state = PluginState::Failed;
                info.last_error = Some(format!("incompatible with host: {}", reason));
            }
            Err(e) => {
                info.state = PluginState::Failed;
                info.last_error = Some(e.to_string());
            }
        }
    }

    /// Records a directory whose manifest failed to parse.
    fn record_malformed(&self, dir: &Path, error: &PluginError) -> String {
        let id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());

        let mut plugins = self.plugins.write();
        if let Some(entry) = plugins.get(&id) {
            let mut info = entry.info.write();
            if info.state != PluginState::Disabled {
                info.manifest = None;
                info.state = PluginState::Failed;
                info.last_error = Some(error.to_string());
            }
            return id;
        }

        let mut info = PluginInfo::new(id.clone(), None, dir.to_path_buf());
        info.state = PluginState::Failed;
        info.last_error = Some(error.to_string());
        plugins.insert(
            id.clone(),
            Arc::new(PluginEntry {
                info: RwLock::new(info),
                call_lock: Mutex::new(()),
            }),
        );
        id
    }

    /// Resolves a plugin's entry point and runs the conformance handshake.
    ///
    /// Requires state `Discovered`; a plugin whose discovery failed can
    /// never be loaded. On success the plugin moves to `Loaded`.
    pub fn load(&self, plugin_id: &str) -> PluginResult<()> {
        let entry = self.entry(plugin_id)?;
        let _guard = entry.call_lock.lock();

        let (manifest, dir) = {
            let info = entry.info.read();
            if info.state != PluginState::Discovered {
                return Err(PluginError::WrongState {
                    id: plugin_id.to_string(),
                    state: info.state,
                    expected: vec![PluginState::Discovered],
                });
            }
            let manifest = info
                .manifest
                .clone()
                .ok_or_else(|| PluginError::LoadFailed("no valid manifest".to_string()))?;
            (manifest, info.path.clone())
        };

        match self.try_load(plugin_id, &manifest, &dir) {
            Ok(()) => {
                let mut info = entry.info.write();
                info.transition(PluginState::Loaded)?;
                info.load_count += 1;
                info.last_error = None;
                info!(plugin = plugin_id, version = %manifest.plugin.version, "plugin loaded");
                Ok(())
            }
            Err(e) => {
                let mut info = entry.info.write();
                info.transition(PluginState::Failed)?;
                info.failure_count += 1;
                info.last_error = Some(e.to_string());
                warn!(plugin = plugin_id, error = %e, "plugin load failed");
                Err(e)
            }
        }
    }

    fn try_load(&self, plugin_id: &str, manifest: &PluginManifest, dir: &Path) -> PluginResult<()> {
        self.check_dependencies(manifest)?;

        let (program, args) = resolve_entry(manifest, dir)?;

        // Conformance is checked here, never deferred to first call: the
        // plugin must answer `plugin.metadata` and advertise every method
        // its declared capability requires.
        let output = self
            .sandbox
            .run(
                plugin_id,
                &program,
                &args,
                dir,
                METADATA_METHOD,
                serde_json::Value::Null,
            )
            .map_err(|failure| match failure {
                SandboxFailure::Violation(v) => PluginError::Violation(v),
                SandboxFailure::Fault(message) => {
                    PluginError::LoadFailed(format!("metadata handshake failed: {}", message))
                }
                SandboxFailure::Host(message) => PluginError::LoadFailed(message),
            })?;

        let reply: MetadataReply = serde_json::from_value(output.payload).map_err(|e| {
            PluginError::Conformance {
                id: plugin_id.to_string(),
                message: format!("malformed metadata reply: {}", e),
            }
        })?;

        if reply.id != plugin_id {
            return Err(PluginError::Conformance {
                id: plugin_id.to_string(),
                message: format!("plugin reports id '{}'", reply.id),
            });
        }
        for method in manifest.capability().required_methods() {
            if !reply.methods.iter().any(|m| m == method) {
                return Err(PluginError::Conformance {
                    id: plugin_id.to_string(),
                    message: format!(
                        "capability '{}' requires method '{}' which the plugin does not advertise",
                        manifest.capability(),
                        method
                    ),
                });
            }
        }
        Ok(())
    }

    /// Validates declared dependencies against the registered set.
    fn check_dependencies(&self, manifest: &PluginManifest) -> PluginResult<()> {
        for dep in &manifest.dependencies {
            let dep_entry = {
                let plugins = self.plugins.read();
                plugins.get(&dep.id).cloned()
            };
            let dep_entry =
                dep_entry.ok_or_else(|| PluginError::DependencyNotFound(dep.id.clone()))?;
            let dep_version = {
                let info = dep_entry.info.read();
                info.manifest
                    .as_ref()
                    .map(|m| m.version())
                    .ok_or_else(|| PluginError::DependencyNotFound(dep.id.clone()))?
            };
            if !compat::satisfies(&dep_version, &dep.version_range)? {
                return Err(PluginError::VersionConflict(format!(
                    "'{}' requires {} {}, but {} is available",
                    manifest.id(),
                    dep.id,
                    dep.version_range,
                    dep_version
                )));
            }
        }
        Ok(())
    }

    /// Executes the plugin's capability method against `context`.
    ///
    /// Requires state `Loaded` or `Active`. Blocks the calling thread until
    /// the sandbox returns or the watchdog kills the call; calls for the
    /// same plugin id are serialized, distinct plugins run concurrently.
    pub fn execute(
        &self,
        plugin_id: &str,
        context: &signalscope_core::ExecutionContext,
    ) -> PluginResult<PluginOutput> {
        let entry = self.entry(plugin_id)?;
        let _guard = entry.call_lock.lock();

        let (manifest, dir) = {
            let info = entry.info.read();
            if !info.state.is_executable() {
                return Err(PluginError::WrongState {
                    id: plugin_id.to_string(),
                    state: info.state,
                    expected: vec![PluginState::Loaded, PluginState::Active],
                });
            }
            // An executable state implies a valid manifest.
            let manifest = info
                .manifest
                .clone()
                .ok_or_else(|| PluginError::Execution("no valid manifest".to_string()))?;
            (manifest, info.path.clone())
        };

        let (program, args) = resolve_entry(&manifest, &dir)?;
        let method = manifest.capability().invoke_method();
        let params = serde_json::to_value(context)?;

        match self.sandbox.run(plugin_id, &program, &args, &dir, method, params) {
            Ok(output) => {
                let mut info = entry.info.write();
                info.transition(PluginState::Active)?;
                info.consecutive_failures = 0;
                Ok(output)
            }
            Err(SandboxFailure::Violation(violation)) => {
                error!(
                    plugin = plugin_id,
                    kind = %violation.violation_kind,
                    detected_at = %violation.detected_at,
                    detail = %violation.detail,
                    "security violation"
                );
                let mut info = entry.info.write();
                info.failure_count += 1;
                info.consecutive_failures += 1;
                info.last_error = Some(violation.to_string());
                info.transition(PluginState::Failed)?;
                if info.consecutive_failures >= self.config.failure_threshold
                    && !info.disable_recommended
                {
                    info.disable_recommended = true;
                    warn!(
                        plugin = plugin_id,
                        consecutive = info.consecutive_failures,
                        "disable recommended after repeated violations"
                    );
                }
                Err(PluginError::Violation(violation))
            }
            Err(SandboxFailure::Fault(message)) => {
                // The plugin's own failure: surfaced to the caller, no state
                // change, and never a reason to propose disabling.
                let mut info = entry.info.write();
                info.last_error = Some(message.clone());
                Err(PluginError::Execution(message))
            }
            Err(SandboxFailure::Host(message)) => Err(PluginError::Sandbox(message)),
        }
    }

    /// Removes a plugin record. Idempotent.
    pub fn unregister(&self, plugin_id: &str) {
        if self.plugins.write().remove(plugin_id).is_some() {
            info!(plugin = plugin_id, "unregistered plugin");
        }
    }

    /// Host action: takes a `Failed` plugin out of service.
    pub fn disable(&self, plugin_id: &str) -> PluginResult<()> {
        let entry = self.entry(plugin_id)?;
        let mut info = entry.info.write();
        info.transition(PluginState::Disabled)?;
        info!(plugin = plugin_id, "disabled plugin");
        Ok(())
    }

    /// Host action: returns a `Disabled` plugin to `Discovered`.
    ///
    /// Failure counters are never reset for the registry's lifetime.
    pub fn enable(&self, plugin_id: &str) -> PluginResult<()> {
        let entry = self.entry(plugin_id)?;
        let mut info = entry.info.write();
        info.transition(PluginState::Discovered)?;
        info.last_error = None;
        info.disable_recommended = false;
        info.consecutive_failures = 0;
        info!(plugin = plugin_id, "re-enabled plugin");
        Ok(())
    }

    /// Snapshot of every registered plugin.
    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.plugins
            .read()
            .values()
            .map(|e| e.info.read().clone())
            .collect()
    }

    /// Snapshot of one plugin, if registered.
    pub fn get_plugin(&self, plugin_id: &str) -> Option<PluginInfo> {
        self.plugins
            .read()
            .get(plugin_id)
            .map(|e| e.info.read().clone())
    }

    /// Whether a plugin id is registered.
    pub fn contains(&self, plugin_id: &str) -> bool {
        self.plugins.read().contains_key(plugin_id)
    }

    /// Number of registered plugins.
    pub fn count(&self) -> usize {
        self.plugins.read().len()
    }

    fn entry(&self, plugin_id: &str) -> PluginResult<Arc<PluginEntry>> {
        self.plugins
            .read()
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| PluginError::NotFoundInRegistry(plugin_id.to_string()))
    }
}

/// Resolves the manifest entry point inside the plugin directory.
fn resolve_entry(manifest: &PluginManifest, dir: &Path) -> PluginResult<(PathBuf, Vec<String>)> {
    let (program, args) = manifest.entry_command()?;
    let program_path = if Path::new(&program).is_absolute() {
        PathBuf::from(&program)
    } else {
        dir.join(&program)
    };
    if !program_path.exists() {
        return Err(PluginError::LoadFailed(format!(
            "entry point not found: {}",
            program_path.display()
        )));
    }
    Ok((program_path, args))
}
