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

//! Data series and plugin call context
//!
//! These types define the wire payload a plugin receives. They are plain
//! serde values; plugins run in a separate process and only ever see the
//! serialized form.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single timestamped sample within a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    /// Sample timestamp in microseconds since the Unix epoch.
    pub timestamp_us: i64,
    /// Sample value.
    pub value: f64,
}

/// A named data series as displayed by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesFrame {
    /// Series name as shown in the UI.
    pub name: String,
    /// Unit label, if any (e.g. "V", "ms").
    #[serde(default)]
    pub unit: Option<String>,
    /// Samples in ascending timestamp order.
    pub points: Vec<SamplePoint>,
    /// Free-form series metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SeriesFrame {
    /// Creates an empty series with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: None,
            points: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Number of samples in the series.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the series holds no samples.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Timestamp span covered by the series, in microseconds.
    pub fn span_us(&self) -> Option<i64> {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => Some(last.timestamp_us - first.timestamp_us),
            _ => None,
        }
    }
}

/// The value object the host supplies to a plugin execution.
///
/// Serialized as the `params` of the plugin's invoke method; the plugin must
/// not assume any shared memory with the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// The series under operation.
    pub series: SeriesFrame,
    /// Caller-supplied plugin options, opaque to the registry.
    #[serde(default)]
    pub options: serde_json::Value,
}

impl ExecutionContext {
    /// Wraps a series with no options.
    pub fn new(series: SeriesFrame) -> Self {
        Self {
            series,
            options: serde_json::Value::Null,
        }
    }

    /// Wraps a series with caller options.
    pub fn with_options(series: SeriesFrame, options: serde_json::Value) -> Self {
        Self { series, options }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_series() -> SeriesFrame {
        SeriesFrame {
            name: "voltage".to_string(),
            unit: Some("V".to_string()),
            points: vec![
                SamplePoint {
                    timestamp_us: 1_000,
                    value: 0.5,
                },
                SamplePoint {
                    timestamp_us: 2_000,
                    value: 0.75,
                },
            ],
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_span() {
        let series = sample_series();
        assert_eq!(series.span_us(), Some(1_000));
        assert!(SeriesFrame::new("empty").span_us().is_none());
    }

    #[test]
    fn test_context_roundtrip() {
        let ctx = ExecutionContext::with_options(sample_series(), serde_json::json!({"k": 3}));
        let encoded = serde_json::to_string(&ctx).unwrap();
        let decoded: ExecutionContext = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, ctx);
        assert_eq!(decoded.series.len(), 2);
    }

    #[test]
    fn test_options_default_to_null() {
        let decoded: ExecutionContext =
            serde_json::from_str(r#"{"series":{"name":"x","points":[]}}"#).unwrap();
        assert!(decoded.options.is_null());
        assert!(decoded.series.is_empty());
    }
}
