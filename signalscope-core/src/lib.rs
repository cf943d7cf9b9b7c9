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

//! Signalscope core types
//!
//! Value types shared between the Signalscope host and its plugin subsystem.
//! A [`SeriesFrame`] is the unit of data the host hands to a plugin call;
//! an [`ExecutionContext`] wraps it together with caller-supplied options.

pub mod series;

pub use series::{ExecutionContext, SamplePoint, SeriesFrame};
