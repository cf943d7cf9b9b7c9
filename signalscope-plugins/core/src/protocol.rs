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

//! Plugin wire protocol
//!
//! Plugins speak JSON-RPC 2.0 over stdin/stdout, one request per process
//! invocation: the sandbox writes a single request line, closes stdin, and
//! reads newline-delimited JSON until it sees a response. A plugin may emit
//! any number of `plugin.log` notifications before its response; they are
//! forwarded to the host log.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request sent to the plugin process.
#[derive(Debug, Serialize, Deserialize)]
pub struct PluginRequest {
    /// JSON-RPC version, always "2.0".
    pub jsonrpc: String,
    /// Correlative message identifier.
    pub id: String,
    /// Invoked method (`plugin.metadata` or the capability's invoke method).
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

/// Successful response received from the plugin.
#[derive(Debug, Serialize, Deserialize)]
pub struct PluginResponse {
    /// JSON-RPC version used.
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Correlative message identifier.
    pub id: String,
    /// Opaque result payload.
    pub result: Value,
}

fn jsonrpc_version() -> String {
    "2.0".to_string()
}

/// Error body emitted by the plugin following JSON-RPC.
#[derive(Debug, Serialize, Deserialize)]
pub struct PluginFailure {
    /// Numeric code that identifies the error condition.
    pub code: i64,
    /// Readable message associated with the error.
    pub message: String,
    /// Optional additional data.
    #[serde(default)]
    pub data: Option<Value>,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct PluginErrorResponse {
    /// JSON-RPC version (ignored).
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Correlative message identifier, if the plugin echoed one.
    #[serde(default)]
    pub id: Option<String>,
    /// The failure body.
    pub error: PluginFailure,
}

/// Log message emitted by the plugin to the host.
#[derive(Debug, Serialize, Deserialize)]
pub struct PluginLog {
    /// Optional message level (`trace`, `debug`, `info`, `warn`, `error`).
    #[serde(default)]
    pub level: Option<String>,
    /// Text to log.
    pub message: String,
}

/// `plugin.log` notification sent by the plugin.
#[derive(Debug, Serialize, Deserialize)]
pub struct PluginLogCall {
    /// Protocol version (ignored).
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Method name, must be `plugin.log`.
    pub method: String,
    /// Log parameters.
    pub params: PluginLog,
}

/// Response to `plugin.metadata`, used for the load-time conformance check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataReply {
    /// Plugin id as the plugin itself reports it.
    pub id: String,
    /// Version the plugin reports, if any.
    #[serde(default)]
    pub version: String,
    /// Methods the plugin answers.
    #[serde(default)]
    pub methods: Vec<String>,
}

/// Result of a successful sandboxed plugin call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginOutput {
    /// Opaque payload in the external shape expected for the capability.
    pub payload: Value,
}
