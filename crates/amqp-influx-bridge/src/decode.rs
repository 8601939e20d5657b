// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry message decoding.
//!
//! Message bodies are flat JSON objects:
//!
//! ```text
//! {"id": 7, "data": "23.5C", "timestamp": 1700000000}
//! ```
//!
//! All three fields are required. Unknown fields are ignored. Top-level
//! arrays are rejected even when their elements line up with the fields.

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};

/// One device reading, as published on the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Device identifier.
    pub id: i64,
    /// Raw device data string, carried through untouched.
    #[serde(rename = "data")]
    pub payload: String,
    /// Device-reported time, in whatever unit the producer uses.
    pub timestamp: i64,
}

/// Decode a raw message body into a [`TelemetryRecord`].
///
/// Fails on anything that is not a JSON object with an integer `id`,
/// a string `data` and an integer `timestamp`.
pub fn decode(body: &[u8]) -> Result<TelemetryRecord, DecodeError> {
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(body)?;
    Ok(serde_json::from_value(serde_json::Value::Object(object))?)
}
