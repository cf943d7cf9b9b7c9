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

//! Sandboxed plugin execution
//!
//! Runs each plugin call in a fresh child process with kernel-enforced
//! resource ceilings (`RLIMIT_AS`, `RLIMIT_CPU`) and a host-side wall-clock
//! watchdog. A limit breach terminates the process and produces exactly one
//! [`SecurityViolation`]; a failure inside the plugin's own logic is a
//! fault, not a violation. The sandbox never retries.

mod limits;
mod worker;

pub use limits::ResourceLimits;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::protocol::PluginOutput;
use worker::{CallOutcome, ExitObservation};

/// Kind of resource-limit breach detected by the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Peak memory reached the configured ceiling.
    MemoryExceeded,
    /// CPU time reached the configured ceiling.
    CpuExceeded,
    /// The wall-clock watchdog expired.
    Timeout,
    /// The process died abnormally for another reason.
    IllegalOperation,
}

impl ViolationKind {
    /// Canonical string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::MemoryExceeded => "memory_exceeded",
            ViolationKind::CpuExceeded => "cpu_exceeded",
            ViolationKind::Timeout => "timeout",
            ViolationKind::IllegalOperation => "illegal_operation",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record of a detected resource-limit breach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityViolation {
    /// Plugin that breached the limit.
    pub plugin_id: String,
    /// What was breached.
    pub violation_kind: ViolationKind,
    /// When the sandbox detected the breach.
    pub detected_at: DateTime<Utc>,
    /// Human-readable detail for operators.
    pub detail: String,
}

impl SecurityViolation {
    fn new(plugin_id: &str, violation_kind: ViolationKind, detail: String) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            violation_kind,
            detected_at: Utc::now(),
            detail,
        }
    }
}

impl std::fmt::Display for SecurityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} in plugin '{}': {}",
            self.violation_kind, self.plugin_id, self.detail
        )
    }
}

/// Why a sandboxed call did not produce an output.
#[derive(Debug)]
pub enum SandboxFailure {
    /// A resource limit was breached; the process was terminated.
    Violation(SecurityViolation),
    /// The plugin's own logic failed (error response or clean bad exit).
    Fault(String),
    /// The host could not run or observe the process.
    Host(String),
}

/// Process-isolation boundary for plugin calls.
///
/// One `Sandbox` carries one immutable set of [`ResourceLimits`]; the
/// registry owns one for its lifetime.
#[derive(Debug, Clone)]
pub struct Sandbox {
    limits: ResourceLimits,
}

impl Sandbox {
    /// Creates a sandbox enforcing the given limits.
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }

    /// The limits this sandbox enforces.
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Executes one plugin call in an isolated process.
    ///
    /// Blocks until the plugin answers, fails, or is terminated by the
    /// watchdog, whichever comes first.
    pub fn run(
        &self,
        plugin_id: &str,
        program: &Path,
        args: &[String],
        workdir: &Path,
        method: &str,
        params: Value,
    ) -> Result<PluginOutput, SandboxFailure> {
        let outcome =
            worker::run_call(program, args, workdir, &self.limits, plugin_id, method, params)
                .map_err(|e| SandboxFailure::Host(format!("failed to run plugin process: {}", e)))?;

        match outcome {
            CallOutcome::Result(payload) => {
                debug!(plugin = plugin_id, method, "plugin call completed");
                Ok(PluginOutput { payload })
            }
            CallOutcome::PluginError { code, message } => Err(SandboxFailure::Fault(format!(
                "plugin error {}: {}",
                code, message
            ))),
            CallOutcome::Timeout => Err(SandboxFailure::Violation(SecurityViolation::new(
                plugin_id,
                ViolationKind::Timeout,
                format!(
                    "did not return within {} s and was terminated",
                    self.limits.max_wall_clock_seconds
                ),
            ))),
            CallOutcome::Exited(obs) => Err(classify_exit(plugin_id, obs, &self.limits)),
        }
    }
}

/// Maps an unanswered termination onto a violation or a fault.
fn classify_exit(plugin_id: &str, obs: ExitObservation, limits: &ResourceLimits) -> SandboxFailure {
    let rss_breach = obs
        .max_rss_bytes
        .is_some_and(|rss| rss >= limits.max_memory_bytes);

    if let Some(signal) = obs.signal {
        #[cfg(unix)]
        if signal == libc::SIGXCPU {
            return SandboxFailure::Violation(SecurityViolation::new(
                plugin_id,
                ViolationKind::CpuExceeded,
                format!("killed by SIGXCPU after {} s of CPU time", limits.max_cpu_seconds),
            ));
        }
        if rss_breach {
            return SandboxFailure::Violation(SecurityViolation::new(
                plugin_id,
                ViolationKind::MemoryExceeded,
                format!(
                    "terminated by signal {} with peak rss at the {}-byte ceiling",
                    signal, limits.max_memory_bytes
                ),
            ));
        }
        return SandboxFailure::Violation(SecurityViolation::new(
            plugin_id,
            ViolationKind::IllegalOperation,
            format!("terminated abnormally by signal {}", signal),
        ));
    }

    match obs.code {
        Some(0) => SandboxFailure::Fault("exited without producing a response".to_string()),
        Some(code) if rss_breach => SandboxFailure::Violation(SecurityViolation::new(
            plugin_id,
            ViolationKind::MemoryExceeded,
            format!(
                "exited with status {} with peak rss at the {}-byte ceiling",
                code, limits.max_memory_bytes
            ),
        )),
        Some(code) => SandboxFailure::Fault(format!("exited with status {}", code)),
        None => SandboxFailure::Fault("exited with unknown status".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obs(signal: Option<i32>, code: Option<i32>, max_rss_bytes: Option<u64>) -> ExitObservation {
        ExitObservation {
            signal,
            code,
            max_rss_bytes,
        }
    }

    fn test_limits() -> ResourceLimits {
        ResourceLimits {
            max_memory_bytes: 64 * 1024 * 1024,
            max_cpu_seconds: 5,
            max_wall_clock_seconds: 2,
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_sigxcpu() {
        let failure = classify_exit("p", obs(Some(libc::SIGXCPU), None, Some(1024)), &test_limits());
        match failure {
            SandboxFailure::Violation(v) => {
                assert_eq!(v.violation_kind, ViolationKind::CpuExceeded)
            }
            other => panic!("expected cpu violation, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_memory_breach() {
        let limits = test_limits();
        let failure = classify_exit("p", obs(Some(6), None, Some(limits.max_memory_bytes)), &limits);
        match failure {
            SandboxFailure::Violation(v) => {
                assert_eq!(v.violation_kind, ViolationKind::MemoryExceeded)
            }
            other => panic!("expected memory violation, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_crash_below_ceiling() {
        let failure = classify_exit("p", obs(Some(11), None, Some(4096)), &test_limits());
        match failure {
            SandboxFailure::Violation(v) => {
                assert_eq!(v.violation_kind, ViolationKind::IllegalOperation)
            }
            other => panic!("expected illegal-operation violation, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_clean_failures_are_faults() {
        assert!(matches!(
            classify_exit("p", obs(None, Some(0), Some(4096)), &test_limits()),
            SandboxFailure::Fault(_)
        ));
        assert!(matches!(
            classify_exit("p", obs(None, Some(3), Some(4096)), &test_limits()),
            SandboxFailure::Fault(_)
        ));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;
        use tempfile::TempDir;

        fn write_script(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            fs::write(&path, body).unwrap();
            let mut perms = fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms).unwrap();
            path
        }

        const ECHO_SH: &str = r#"#!/bin/sh
read line
printf '{"jsonrpc":"2.0","id":"1","result":{"echoed":true}}\n'
"#;

        const HANG_SH: &str = r#"#!/bin/sh
read line
sleep 30
"#;

        const FAIL_SH: &str = r#"#!/bin/sh
read line
exit 3
"#;

        const ERROR_SH: &str = r#"#!/bin/sh
read line
printf '{"jsonrpc":"2.0","id":"1","error":{"code":-32000,"message":"no such series"}}\n'
"#;

        const CHATTY_SH: &str = r#"#!/bin/sh
read line
printf '{"method":"plugin.log","params":{"level":"debug","message":"starting"}}\n'
printf '{"jsonrpc":"2.0","id":"1","result":{"done":1}}\n'
"#;

        #[test]
        fn test_successful_call() {
            let tmp = TempDir::new().unwrap();
            let script = write_script(tmp.path(), "plugin.sh", ECHO_SH);
            let sandbox = Sandbox::new(test_limits());

            let output = sandbox
                .run("echo", &script, &[], tmp.path(), "series.apply", json!({}))
                .unwrap();
            assert_eq!(output.payload["echoed"], true);
        }

        #[test]
        fn test_hanging_plugin_is_killed_by_watchdog() {
            let tmp = TempDir::new().unwrap();
            let script = write_script(tmp.path(), "plugin.sh", HANG_SH);
            let sandbox = Sandbox::new(test_limits());

            let started = std::time::Instant::now();
            let failure = sandbox
                .run("hang", &script, &[], tmp.path(), "series.apply", json!({}))
                .unwrap_err();
            let elapsed = started.elapsed();

            match failure {
                SandboxFailure::Violation(v) => {
                    assert_eq!(v.violation_kind, ViolationKind::Timeout);
                    assert_eq!(v.plugin_id, "hang");
                }
                other => panic!("expected timeout violation, got {:?}", other),
            }
            // Terminated near the 2 s budget, not the plugin's 30 s sleep.
            assert!(elapsed < std::time::Duration::from_secs(10));
        }

        #[test]
        fn test_clean_exit_is_a_fault() {
            let tmp = TempDir::new().unwrap();
            let script = write_script(tmp.path(), "plugin.sh", FAIL_SH);
            let sandbox = Sandbox::new(test_limits());

            let failure = sandbox
                .run("fail", &script, &[], tmp.path(), "series.apply", json!({}))
                .unwrap_err();
            match failure {
                SandboxFailure::Fault(message) => assert!(message.contains("status 3")),
                other => panic!("expected fault, got {:?}", other),
            }
        }

        #[test]
        fn test_error_response_is_a_fault() {
            let tmp = TempDir::new().unwrap();
            let script = write_script(tmp.path(), "plugin.sh", ERROR_SH);
            let sandbox = Sandbox::new(test_limits());

            let failure = sandbox
                .run("err", &script, &[], tmp.path(), "series.apply", json!({}))
                .unwrap_err();
            match failure {
                SandboxFailure::Fault(message) => assert!(message.contains("no such series")),
                other => panic!("expected fault, got {:?}", other),
            }
        }

        #[test]
        fn test_log_lines_do_not_corrupt_result_parsing() {
            let tmp = TempDir::new().unwrap();
            let script = write_script(tmp.path(), "plugin.sh", CHATTY_SH);
            let sandbox = Sandbox::new(test_limits());

            let output = sandbox
                .run("chatty", &script, &[], tmp.path(), "series.apply", json!({}))
                .unwrap();
            assert_eq!(output.payload["done"], 1);
        }

        #[test]
        fn test_missing_program_is_a_host_error() {
            let tmp = TempDir::new().unwrap();
            let sandbox = Sandbox::new(test_limits());

            let failure = sandbox
                .run(
                    "ghost",
                    &tmp.path().join("missing.sh"),
                    &[],
                    tmp.path(),
                    "series.apply",
                    json!({}),
                )
                .unwrap_err();
            assert!(matches!(failure, SandboxFailure::Host(_)));
        }
    }
}
