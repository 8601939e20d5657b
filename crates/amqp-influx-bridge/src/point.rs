// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time-series points and their InfluxDB v2 Line Protocol encoding.
//!
//! Line Protocol format:
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```
//!
//! A telemetry record maps to exactly one point:
//! ```text
//! device_data,id=7 data="23.5C",timestamp=1700000000i 1700000000123456789
//! ```
//!
//! See: <https://docs.influxdata.com/influxdb/v2/reference/syntax/line-protocol/>

use crate::decode::TelemetryRecord;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Measurement name for every point produced by the bridge.
pub const MEASUREMENT: &str = "device_data";

/// A field value. Telemetry points carry only integer and string fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// 64-bit signed integer.
    Integer(i64),
    /// UTF-8 string.
    String(String),
}

impl FieldValue {
    /// Format this value for InfluxDB Line Protocol.
    ///
    /// - Integer: suffixed with `i` (e.g., `42i`)
    /// - String: quoted with double quotes, inner quotes escaped (e.g., `"hello"`)
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Integer(v) => format!("{}i", v),
            FieldValue::String(v) => {
                let escaped = v.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{}\"", escaped)
            }
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line_protocol())
    }
}

/// An immutable time-series point.
///
/// Tags are kept sorted by key (canonical form). Fields keep the order they
/// were given in.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, FieldValue)>,
    timestamp_ns: u64,
}

impl Point {
    /// Create a point.
    ///
    /// # Panics
    /// Panics if `fields` is empty (InfluxDB requires at least one field).
    pub fn new(
        measurement: impl Into<String>,
        mut tags: Vec<(String, String)>,
        fields: Vec<(String, FieldValue)>,
        timestamp_ns: u64,
    ) -> Self {
        assert!(!fields.is_empty(), "InfluxDB requires at least one field");
        tags.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            measurement: measurement.into(),
            tags,
            fields,
            timestamp_ns,
        }
    }

    /// Build the point for a telemetry record observed at `observed_at`.
    ///
    /// The point's time axis is the observation time, not the device
    /// timestamp; the device timestamp is kept as an integer field.
    pub fn from_record(record: &TelemetryRecord, observed_at: SystemTime) -> Self {
        Self::new(
            MEASUREMENT,
            vec![("id".to_string(), record.id.to_string())],
            vec![
                ("data".to_string(), FieldValue::String(record.payload.clone())),
                ("timestamp".to_string(), FieldValue::Integer(record.timestamp)),
            ],
            unix_nanos(observed_at),
        )
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    /// Write time in nanoseconds since the Unix epoch.
    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    /// Look up a tag value by key.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Look up a field value by key.
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Encode this point as a single Line Protocol line (no trailing newline).
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_measurement(&self.measurement);

        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }

        // Space separator before fields
        line.push(' ');

        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&value.to_line_protocol());
        }

        line.push(' ');
        line.push_str(&self.timestamp_ns.to_string());
        line
    }
}

/// Map a telemetry record to a point stamped with the current wall-clock time.
pub fn build_point(record: &TelemetryRecord) -> Point {
    Point::from_record(record, SystemTime::now())
}

/// Encode a batch as a newline-separated Line Protocol body.
pub fn encode_batch(points: &[Point]) -> String {
    points
        .iter()
        .map(Point::to_line_protocol)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Nanoseconds since the Unix epoch; clock values before the epoch map to 0.
fn unix_nanos(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Escape a measurement name for Line Protocol.
/// Spaces and commas must be escaped with backslash.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Escape tag keys, tag values and field keys.
/// Commas, equals signs, and spaces must be escaped.
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
