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

//! Plugin lifecycle state machine
//!
//! A plugin moves `Discovered -> Loaded -> Active`; any state can fall to
//! `Failed`; `Failed -> Disabled` happens only through an explicit host
//! action, and `Disabled -> Discovered` only through an explicit re-enable.
//! Illegal transitions are programming errors and fail loudly; they are
//! never silently corrected.

use serde::{Deserialize, Serialize};

/// Plugin lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// Manifest parsed, not yet loaded.
    Discovered,
    /// Entry point resolved and conformance checked.
    Loaded,
    /// Has completed at least one successful execution.
    Active,
    /// Manifest invalid, load error, or execution violation.
    Failed,
    /// Taken out of service by the host; terminal until re-enabled.
    Disabled,
}

impl PluginState {
    /// Whether the edge `self -> next` is a legal lifecycle transition.
    pub fn can_transition(self, next: PluginState) -> bool {
        use PluginState::*;
        match (self, next) {
            // Forward lifecycle
            (Discovered, Loaded) => true,
            (Loaded, Active) => true,
            (Active, Active) => true,
            // Any state may fail
            (_, Failed) => true,
            // Host actions
            (Failed, Disabled) => true,
            (Disabled, Discovered) => true,
            // Re-discovery of a changed plugin directory
            (Discovered, Discovered) => true,
            _ => false,
        }
    }

    /// Whether the plugin may be asked to execute in this state.
    pub fn is_executable(self) -> bool {
        matches!(self, PluginState::Loaded | PluginState::Active)
    }
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            PluginState::Discovered => "discovered",
            PluginState::Loaded => "loaded",
            PluginState::Active => "active",
            PluginState::Failed => "failed",
            PluginState::Disabled => "disabled",
        };
        write!(f, "{}", text)
    }
}
