// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the bridge.
//!
//! Errors are split by the stage that produces them so callers can decide
//! what is fatal:
//!
//! - [`ConfigError`], [`BrokerError`] -- startup or connection level, fatal
//! - [`DecodeError`] -- one bad message, logged and skipped
//! - [`SinkError`] -- one failed batch, logged and counted
//! - [`WriterError`] -- the writer task is gone or a flush failed
//! - [`PipelineError`] -- reasons the consumption loop stopped
//! - [`BridgeError`] -- everything [`crate::Bridge::run`] can return

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// YAML parsing failed.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Reading the config file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A required value is absent or empty.
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// A value is present but out of range.
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Broker session errors.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Could not open the connection (unreachable host, bad credentials).
    #[error("failed to connect to broker: {0}")]
    Connect(#[source] lapin::Error),

    /// Could not open a channel on an established connection.
    #[error("failed to open a channel: {0}")]
    Channel(#[source] lapin::Error),

    /// Exchange, queue or binding declaration was rejected.
    #[error("failed to declare {what} '{name}': {source}")]
    Declare {
        what: &'static str,
        name: String,
        #[source]
        source: lapin::Error,
    },

    /// basic.qos was rejected.
    #[error("failed to set prefetch: {0}")]
    Qos(#[source] lapin::Error),

    /// basic.consume was rejected.
    #[error("failed to consume from queue '{queue}': {source}")]
    Consume {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    /// basic.cancel was rejected.
    #[error("failed to cancel consumer '{tag}': {source}")]
    Cancel {
        tag: String,
        #[source]
        source: lapin::Error,
    },

    /// The delivery stream reported an error (channel or connection closed).
    #[error("delivery stream failed: {0}")]
    Delivery(#[source] lapin::Error),
}

/// A message body that is not a well-formed telemetry record.
#[derive(Debug, thiserror::Error)]
#[error("malformed telemetry message: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Errors from the time-series sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The configured sink URL cannot be parsed.
    #[error("invalid sink URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The HTTP request failed before a response was received.
    #[error("sink request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The sink answered with a non-success status.
    #[error("sink rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Errors returned by the batched writer.
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    /// The background task has stopped; no more points are accepted.
    #[error("writer is closed")]
    Closed,

    /// A flush transmitted a batch and the sink rejected it.
    #[error("flush failed: {0}")]
    Sink(#[from] SinkError),
}

/// Reasons the consumption loop stopped abnormally.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The broker delivery stream failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The delivery stream ended without a shutdown request.
    #[error("delivery stream ended unexpectedly")]
    StreamEnded,

    /// The writer can no longer accept points.
    #[error(transparent)]
    Writer(#[from] WriterError),
}

/// Top-level bridge error.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    #[error("sink: {0}")]
    Sink(#[from] SinkError),

    #[error("writer: {0}")]
    Writer(#[from] WriterError),

    #[error("pipeline: {0}")]
    Pipeline(#[from] PipelineError),
}
