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

//! Resource limits applied to a sandboxed plugin process

use serde::{Deserialize, Serialize};
use std::process::Command;

/// Resource ceilings for one sandboxed plugin call.
///
/// Supplied by the host at registry construction time and immutable for the
/// registry's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum address space of the plugin process in bytes.
    pub max_memory_bytes: u64,
    /// Maximum CPU time of the plugin process in seconds.
    pub max_cpu_seconds: u64,
    /// Wall-clock budget enforced by the watchdog, in seconds.
    pub max_wall_clock_seconds: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: 256 * 1024 * 1024, // 256 MiB
            max_cpu_seconds: 10,
            max_wall_clock_seconds: 30,
        }
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
pub(crate) fn apply_limits(cmd: &mut Command, limits: &ResourceLimits) {
    use libc::{rlimit, RLIMIT_AS, RLIMIT_CPU};
    use std::os::unix::process::CommandExt;

    let cpu = limits.max_cpu_seconds;
    let mem = limits.max_memory_bytes;
    // Safety: `pre_exec` runs after `fork` in the child process; within the
    // closure we only call the async-signal-safe `setrlimit` and access the
    // copied limit values, so no memory is shared with the parent and no
    // undefined behavior occurs.
    unsafe {
        cmd.pre_exec(move || {
            // Soft limit delivers SIGXCPU so the breach is attributable; the
            // hard limit one second later is the kernel's backstop.
            let lim = rlimit {
                rlim_cur: cpu,
                rlim_max: cpu + 1,
            };
            if libc::setrlimit(RLIMIT_CPU, &lim) != 0 {
                Err(std::io::Error::last_os_error())?;
            }
            let lim = rlimit {
                rlim_cur: mem,
                rlim_max: mem,
            };
            if libc::setrlimit(RLIMIT_AS, &lim) != 0 {
                Err(std::io::Error::last_os_error())?;
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub(crate) fn apply_limits(_cmd: &mut Command, _limits: &ResourceLimits) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.max_memory_bytes, 256 * 1024 * 1024);
        assert_eq!(limits.max_cpu_seconds, 10);
        assert_eq!(limits.max_wall_clock_seconds, 30);
    }
}
