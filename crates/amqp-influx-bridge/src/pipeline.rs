// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Consumption loop.
//!
//! Pulls deliveries one at a time, decodes them, builds a point and hands it
//! to the [`BatchedWriter`]. A malformed body is logged and skipped; a broken
//! delivery stream or a closed writer stops the loop.
//!
//! Deliveries are acknowledged before they reach the loop, so a shutdown
//! must not leave any taken-but-unprocessed message behind. After
//! [`Pipeline::run`] returns on cancellation the caller stops intake and then
//! empties the stream with [`Pipeline::drain`] or [`Pipeline::drain_ready`].

use crate::broker::RawMessage;
use crate::decode::decode;
use crate::error::{BrokerError, PipelineError};
use crate::point::build_point;
use crate::writer::BatchedWriter;
use futures_util::future::FutureExt;
use futures_util::stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// Pipeline statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    /// Deliveries pulled from the stream
    pub messages_received: u64,
    /// Points handed to the writer
    pub points_enqueued: u64,
    /// Bodies that failed to decode
    pub decode_errors: u64,
}

/// Broker to writer pipeline.
pub struct Pipeline<'w> {
    writer: &'w BatchedWriter,
    stats: PipelineStats,
}

impl<'w> Pipeline<'w> {
    pub fn new(writer: &'w BatchedWriter) -> Self {
        Self {
            writer,
            stats: PipelineStats::default(),
        }
    }

    /// Get pipeline statistics
    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Process one delivery.
    ///
    /// Decode failures are counted and logged, and return `Ok(())`. Only a
    /// closed writer is an error.
    pub fn handle_message(&mut self, message: &RawMessage) -> Result<(), PipelineError> {
        self.stats.messages_received += 1;

        let record = match decode(&message.body) {
            Ok(record) => record,
            Err(e) => {
                self.stats.decode_errors += 1;
                tracing::warn!(
                    delivery_tag = message.delivery_tag,
                    redelivered = message.redelivered,
                    bytes = message.body.len(),
                    "Dropping message: {}",
                    e
                );
                return Ok(());
            }
        };

        let point = build_point(&record);
        tracing::trace!(
            delivery_tag = message.delivery_tag,
            id = record.id,
            "Enqueueing point"
        );
        self.writer.write_point(point)?;
        self.stats.points_enqueued += 1;
        Ok(())
    }

    /// Run until `shutdown` is cancelled or the stream fails.
    ///
    /// Returns `Ok(())` only on cancellation, leaving `messages` unread past
    /// that point. Points already enqueued stay in the writer; flushing them
    /// is the caller's job.
    pub async fn run<S>(&mut self, messages: &mut S, shutdown: CancellationToken) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<RawMessage, BrokerError>> + Unpin,
    {
        tracing::info!("Pipeline started");

        loop {
            tokio::select! {
                // Shutdown wins over a ready delivery.
                biased;

                _ = shutdown.cancelled() => {
                    tracing::info!("Pipeline stopping on shutdown request");
                    return Ok(());
                }

                next = messages.next() => match next {
                    Some(item) => self.handle_item(item)?,
                    None => {
                        tracing::error!("Delivery stream ended");
                        return Err(PipelineError::StreamEnded);
                    }
                },
            }
        }
    }

    /// Process every remaining delivery until the stream ends.
    ///
    /// Only meaningful once intake has been stopped (consumer cancelled);
    /// otherwise the stream never ends.
    pub async fn drain<S>(&mut self, messages: &mut S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<RawMessage, BrokerError>> + Unpin,
    {
        let before = self.stats.messages_received;
        while let Some(item) = messages.next().await {
            self.handle_item(item)?;
        }
        tracing::info!(
            messages = self.stats.messages_received - before,
            "Drained delivery stream"
        );
        Ok(())
    }

    /// Process deliveries that are ready right now, without waiting.
    pub fn drain_ready<S>(&mut self, messages: &mut S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<RawMessage, BrokerError>> + Unpin,
    {
        let before = self.stats.messages_received;
        while let Some(Some(item)) = messages.next().now_or_never() {
            self.handle_item(item)?;
        }
        tracing::debug!(
            messages = self.stats.messages_received - before,
            "Drained ready deliveries"
        );
        Ok(())
    }

    fn handle_item(&mut self, item: Result<RawMessage, BrokerError>) -> Result<(), PipelineError> {
        match item {
            Ok(message) => self.handle_message(&message),
            Err(e) => {
                tracing::error!("Delivery stream failed: {}", e);
                Err(e.into())
            }
        }
    }
}
