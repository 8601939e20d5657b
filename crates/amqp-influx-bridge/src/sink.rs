// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time-series sink abstraction.
//!
//! The batched writer hands each batch to a [`PointSink`]. Implementations:
//!
//! - [`InfluxDbSink`] -- InfluxDB v2 HTTP write API
//! - [`LogSink`] -- logs Line Protocol instead of sending it (dry run)
//! - [`MemorySink`] -- records batches in memory (for testing)

use crate::config::InfluxDbConfig;
use crate::error::SinkError;
use crate::point::{encode_batch, Point};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Boxed future returned by [`PointSink::write`].
pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

/// Destination for batches of points.
pub trait PointSink: Send + Sync {
    /// Transmit one batch as a single request. `batch` is never empty.
    fn write<'a>(&'a self, batch: &'a [Point]) -> SinkFuture<'a>;
}

/// InfluxDB v2 sink.
///
/// Each batch becomes one `POST /api/v2/write` with nanosecond precision.
pub struct InfluxDbSink {
    http: reqwest::Client,
    write_url: Url,
    health_url: Url,
    token: String,
}

impl InfluxDbSink {
    /// Build the HTTP client and endpoint URLs. Does not contact the server.
    pub fn new(config: &InfluxDbConfig) -> Result<Self, SinkError> {
        let base = config.url.trim_end_matches('/');
        let invalid = |reason: String| SinkError::InvalidUrl {
            url: config.url.clone(),
            reason,
        };

        let mut write_url =
            Url::parse(&format!("{base}/api/v2/write")).map_err(|e| invalid(e.to_string()))?;
        if !matches!(write_url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", write_url.scheme())));
        }
        write_url
            .query_pairs_mut()
            .append_pair("org", &config.org)
            .append_pair("bucket", &config.bucket)
            .append_pair("precision", "ns");

        let health_url =
            Url::parse(&format!("{base}/health")).map_err(|e| invalid(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            http,
            write_url,
            health_url,
            token: config.token.clone(),
        })
    }

    /// Full write endpoint, including org/bucket/precision query.
    pub fn write_url(&self) -> &Url {
        &self.write_url
    }

    /// Check that the server is reachable and reports itself healthy.
    pub async fn health(&self) -> Result<(), SinkError> {
        let resp = self.http.get(self.health_url.clone()).send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn send(&self, body: String) -> Result<(), SinkError> {
        let resp = self
            .http
            .post(self.write_url.clone())
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(SinkError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

impl PointSink for InfluxDbSink {
    fn write<'a>(&'a self, batch: &'a [Point]) -> SinkFuture<'a> {
        Box::pin(self.send(encode_batch(batch)))
    }
}

/// Sink that logs each batch at `info` level instead of sending it.
#[derive(Debug, Default)]
pub struct LogSink;

impl PointSink for LogSink {
    fn write<'a>(&'a self, batch: &'a [Point]) -> SinkFuture<'a> {
        Box::pin(async move {
            tracing::info!(points = batch.len(), "dry run batch");
            for point in batch {
                tracing::info!("{}", point.to_line_protocol());
            }
            Ok(())
        })
    }
}

/// In-memory sink recording every batch it receives.
///
/// Can be told to reject writes, to exercise failure paths.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<Vec<Point>>>>,
    fail: Arc<AtomicBool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail (`true`) or succeed (`false`).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// All batches received so far, in transmission order.
    pub fn batches(&self) -> Vec<Vec<Point>> {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of write requests received.
    pub fn write_count(&self) -> usize {
        self.batches.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// All points received so far, flattened.
    pub fn points(&self) -> Vec<Point> {
        self.batches().into_iter().flatten().collect()
    }
}

impl PointSink for MemorySink {
    fn write<'a>(&'a self, batch: &'a [Point]) -> SinkFuture<'a> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SinkError::Rejected {
                    status: 503,
                    body: "memory sink failing".to_string(),
                });
            }
            self.batches
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(batch.to_vec());
            Ok(())
        })
    }
}
