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

//! Sandboxed call mechanics
//!
//! Spawns one plugin process per call, exchanges a single JSON-RPC request
//! over stdin/stdout, and observes how the process ends. The wall-clock
//! watchdog lives here: the reader thread feeds lines through a channel and
//! the caller waits on it with a deadline, so a plugin that never writes is
//! killed without any cooperation on its part.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, error, info, trace, warn};

use super::limits::{apply_limits, ResourceLimits};
use crate::protocol::{PluginErrorResponse, PluginLogCall, PluginResponse};

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

type LineMessage = std::io::Result<Option<String>>;

/// How the child ended when it terminated instead of answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExitObservation {
    /// Terminating signal, if the child was signaled (Unix only).
    pub signal: Option<i32>,
    /// Exit status code, if the child exited normally.
    pub code: Option<i32>,
    /// High-water resident set size in bytes, if the platform reports it.
    pub max_rss_bytes: Option<u64>,
}

/// Outcome of one sandboxed call.
#[derive(Debug)]
pub(crate) enum CallOutcome {
    /// The plugin answered with a JSON-RPC result.
    Result(Value),
    /// The plugin answered with a JSON-RPC error.
    PluginError { code: i64, message: String },
    /// The watchdog expired and the child was killed.
    Timeout,
    /// The child terminated without answering.
    Exited(ExitObservation),
}

/// Runs a single request against a fresh plugin process.
///
/// Errors are host-side failures (the process could not be spawned or its
/// pipes could not be read); everything the plugin itself does comes back as
/// a [`CallOutcome`].
pub(crate) fn run_call(
    program: &Path,
    args: &[String],
    workdir: &Path,
    limits: &ResourceLimits,
    plugin_id: &str,
    method: &str,
    params: Value,
) -> std::io::Result<CallOutcome> {
    debug!(program = %program.display(), method, "Spawning sandboxed plugin process");
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    // Own process group, so the watchdog can kill the plugin together with
    // anything it forked.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    apply_limits(&mut command, limits);
    let mut child = command.spawn()?;
    debug!(pid = child.id(), program = %program.display(), "Sandboxed process started");

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| std::io::Error::other("plugin stdin unavailable"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("plugin stdout unavailable"))?;

    let request = json!({
        "jsonrpc": "2.0",
        "id": NEXT_ID.fetch_add(1, Ordering::SeqCst).to_string(),
        "method": method,
        "params": params,
    });
    let mut payload = serde_json::to_vec(&request)
        .map_err(|e| std::io::Error::other(format!("encode request: {}", e)))?;
    payload.push(b'\n');
    // A plugin that crashed on startup has already closed the pipe; the exit
    // classification below covers that, so write errors are not fatal here.
    let _ = stdin.write_all(&payload);
    let _ = stdin.flush();
    // Closing stdin tells the plugin no more requests are coming.
    drop(stdin);

    let (tx, rx) = mpsc::channel::<LineMessage>();
    let thread_name = format!("plugin-stdout-{}", plugin_id);
    let reader_handle = thread::Builder::new().name(thread_name).spawn(move || {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            let message = match lines.next() {
                Some(Ok(line)) => Ok(Some(line)),
                Some(Err(err)) => Err(err),
                None => Ok(None),
            };
            let should_break = matches!(&message, Ok(None) | Err(_));
            if tx.send(message).is_err() {
                break;
            }
            if should_break {
                break;
            }
        }
    })?;

    let deadline = Instant::now() + Duration::from_secs(limits.max_wall_clock_seconds);
    let outcome = loop {
        let now = Instant::now();
        if now >= deadline {
            terminate(&mut child);
            break CallOutcome::Timeout;
        }
        let line = match rx.recv_timeout(deadline - now) {
            Ok(Ok(Some(line))) => line,
            // Closed stdout does not mean the process is gone; keep the
            // deadline armed while waiting for it to die.
            Ok(Ok(None)) => break await_exit(&mut child, deadline),
            Ok(Err(err)) => {
                terminate(&mut child);
                return Err(err);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                terminate(&mut child);
                break CallOutcome::Timeout;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                break await_exit(&mut child, deadline);
            }
        };

        if let Ok(log_call) = serde_json::from_str::<PluginLogCall>(&line) {
            if log_call.method == "plugin.log" {
                let level = log_call.params.level.unwrap_or_else(|| "info".to_string());
                match level.as_str() {
                    "trace" => trace!("[{}] {}", plugin_id, log_call.params.message),
                    "debug" => debug!("[{}] {}", plugin_id, log_call.params.message),
                    "warn" => warn!("[{}] {}", plugin_id, log_call.params.message),
                    "error" => error!("[{}] {}", plugin_id, log_call.params.message),
                    _ => info!("[{}] {}", plugin_id, log_call.params.message),
                }
                continue;
            }
        }

        if let Ok(response) = serde_json::from_str::<PluginResponse>(&line) {
            terminate(&mut child);
            break CallOutcome::Result(response.result);
        }
        if let Ok(err) = serde_json::from_str::<PluginErrorResponse>(&line) {
            terminate(&mut child);
            break CallOutcome::PluginError {
                code: err.error.code,
                message: err.error.message,
            };
        }
        warn!(%line, plugin = plugin_id, "unexpected plugin message");
    };

    if let Err(err) = reader_handle.join() {
        warn!("failed to join plugin stdout reader thread: {:?}", err);
    }
    Ok(outcome)
}

/// Kills a still-running child (and anything it forked) and reaps it.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    #[allow(unsafe_code)]
    {
        // Safety: sends a signal to the child's process group; no memory is
        // shared or mutated.
        unsafe {
            libc::kill(-(child.id() as libc::pid_t), libc::SIGKILL);
        }
    }
    if let Err(err) = child.kill() {
        debug!(error = %err, "plugin process already gone before kill");
    }
    let _ = reap(child);
}

/// Waits for a child that stopped talking to die, keeping the wall-clock
/// deadline armed; a child that outlives the deadline is killed.
fn await_exit(child: &mut Child, deadline: Instant) -> CallOutcome {
    loop {
        match try_reap(child) {
            Some(obs) => return CallOutcome::Exited(obs),
            None if Instant::now() >= deadline => {
                terminate(child);
                return CallOutcome::Timeout;
            }
            None => thread::sleep(Duration::from_millis(10)),
        }
    }
}

/// Waits for the child and captures its termination signal, exit code, and
/// peak resident set size.
#[cfg(unix)]
#[allow(unsafe_code)]
fn reap(child: &mut Child) -> ExitObservation {
    wait4_child(child, 0).unwrap_or_else(|| {
        debug!(pid = child.id(), "wait4 failed, falling back to plain wait");
        let code = child.wait().ok().and_then(|s| s.code());
        ExitObservation {
            signal: None,
            code,
            max_rss_bytes: None,
        }
    })
}

/// Non-blocking reap; `None` while the child is still running.
#[cfg(unix)]
fn try_reap(child: &mut Child) -> Option<ExitObservation> {
    wait4_child(child, libc::WNOHANG)
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn wait4_child(child: &mut Child, options: libc::c_int) -> Option<ExitObservation> {
    let pid = child.id() as libc::pid_t;
    let mut status: libc::c_int = 0;
    // Safety: `wait4` only writes into the two locals passed by pointer; the
    // pid belongs to a child this process spawned and has not reaped yet.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::wait4(pid, &mut status, options, &mut usage) };
    if ret != pid {
        return None;
    }
    // ru_maxrss is reported in kilobytes on Linux.
    let max_rss_bytes = u64::try_from(usage.ru_maxrss).ok().map(|kb| kb * 1024);
    Some(ExitObservation {
        signal: if libc::WIFSIGNALED(status) {
            Some(libc::WTERMSIG(status))
        } else {
            None
        },
        code: if libc::WIFEXITED(status) {
            Some(libc::WEXITSTATUS(status))
        } else {
            None
        },
        max_rss_bytes,
    })
}

#[cfg(not(unix))]
fn reap(child: &mut Child) -> ExitObservation {
    let code = child.wait().ok().and_then(|s| s.code());
    ExitObservation {
        signal: None,
        code,
        max_rss_bytes: None,
    }
}

#[cfg(not(unix))]
fn try_reap(child: &mut Child) -> Option<ExitObservation> {
    match child.try_wait() {
        Ok(Some(status)) => Some(ExitObservation {
            signal: None,
            code: status.code(),
            max_rss_bytes: None,
        }),
        _ => None,
    }
}
