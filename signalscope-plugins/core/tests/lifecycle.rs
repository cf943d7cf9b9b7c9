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

//! End-to-end lifecycle walk over the public registry API.

#![cfg(unix)]

use semver::Version;
use signalscope_core::{ExecutionContext, SeriesFrame};
use signalscope_plugins::{
    PluginError, PluginRegistry, PluginState, RegistryConfig, ResourceLimits, ViolationKind,
    MANIFEST_FILENAME,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempDir;

fn config() -> RegistryConfig {
    RegistryConfig {
        host_version: Version::new(0, 1, 0),
        limits: ResourceLimits {
            max_memory_bytes: 64 * 1024 * 1024,
            max_cpu_seconds: 5,
            max_wall_clock_seconds: 2,
        },
        failure_threshold: 1,
    }
}

/// A plugin whose behavior is switched through a sibling `mode` file, so the
/// same directory can first hang and later answer without changing its
/// manifest.
fn write_switchable_plugin(root: &Path, id: &str) {
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join(MANIFEST_FILENAME),
        format!(
            r#"
[plugin]
id = "{id}"
name = "Lifecycle probe"
version = "1.0.0"
capability = "operation"
host_version_range = ">=0.1.0, <0.2.0"
entry_point = "run.sh"
"#
        ),
    )
    .unwrap();
    let script = format!(
        r#"#!/bin/sh
read line
case "$line" in
  *plugin.metadata*)
    printf '{{"jsonrpc":"2.0","id":"1","result":{{"id":"{id}","version":"1.0.0","methods":["plugin.metadata","series.apply"]}}}}\n'
    ;;
  *)
    if [ "$(cat mode)" = "hang" ]; then
      sleep 30
    else
      printf '{{"jsonrpc":"2.0","id":"1","result":{{"points":3}}}}\n'
    fi
    ;;
esac
"#
    );
    let script_path = dir.join("run.sh");
    fs::write(&script_path, script).unwrap();
    let mut perms = fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script_path, perms).unwrap();
    fs::write(dir.join("mode"), "hang").unwrap();
}

#[test]
fn full_lifecycle_walk() {
    let tmp = TempDir::new().unwrap();
    write_switchable_plugin(tmp.path(), "probe");
    let registry = PluginRegistry::new(config());
    let context = ExecutionContext::new(SeriesFrame::new("walk"));

    // Discover.
    let discovered = registry.discover(tmp.path()).unwrap();
    assert_eq!(discovered.len(), 1);
    assert_eq!(discovered[0].state, PluginState::Discovered);

    // Load passes the conformance handshake.
    registry.load("probe").unwrap();
    assert_eq!(
        registry.get_plugin("probe").unwrap().state,
        PluginState::Loaded
    );

    // First execution hangs and is killed by the watchdog.
    let err = registry.execute("probe", &context).unwrap_err();
    match err {
        PluginError::Violation(violation) => {
            assert_eq!(violation.violation_kind, ViolationKind::Timeout);
            assert!(!violation.detail.is_empty());
        }
        other => panic!("expected a timeout violation, got {:?}", other),
    }
    let info = registry.get_plugin("probe").unwrap();
    assert_eq!(info.state, PluginState::Failed);
    assert_eq!(info.failure_count, 1);
    assert!(info.disable_recommended);

    // Operator takes it out of service, then re-enables it.
    registry.disable("probe").unwrap();
    assert_eq!(
        registry.get_plugin("probe").unwrap().state,
        PluginState::Disabled
    );
    registry.enable("probe").unwrap();
    let info = registry.get_plugin("probe").unwrap();
    assert_eq!(info.state, PluginState::Discovered);
    assert_eq!(info.failure_count, 1);

    // Fixed plugin: same manifest, different behavior.
    fs::write(tmp.path().join("probe").join("mode"), "answer").unwrap();
    registry.load("probe").unwrap();
    let output = registry.execute("probe", &context).unwrap();
    assert_eq!(output.payload["points"], 3);

    let info = registry.get_plugin("probe").unwrap();
    assert_eq!(info.state, PluginState::Active);
    assert_eq!(info.load_count, 2);
    assert_eq!(info.consecutive_failures, 0);
    // The monotonic counter still remembers the earlier violation.
    assert_eq!(info.failure_count, 1);

    // Unregister and rediscover restores a fresh record.
    registry.unregister("probe");
    assert!(registry.get_plugin("probe").is_none());
    let rediscovered = registry.discover(tmp.path()).unwrap();
    assert_eq!(rediscovered.len(), 1);
    assert_eq!(rediscovered[0].state, PluginState::Discovered);
}
