// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batched writer.
//!
//! Points are handed to a background task over a channel. The task owns the
//! [`BatchBuffer`] and is the only place a batch is built or transmitted, so
//! enqueueing never races with a transmission in flight.
//!
//! A batch goes out when:
//! - the buffer reaches `batch_size` points
//! - [`BatchedWriter::flush`] is called
//! - the flush interval elapses with points buffered (if enabled)
//! - the writer is closed
//!
//! Batches are transmitted one at a time, in enqueue order. A batch the sink
//! rejects is logged and counted; its points are not retried.
//!
//! The command channel is unbounded and [`BatchedWriter::write_point`] never
//! blocks. With auto-ack consumption the broker prefetch does not limit
//! deliveries in flight, so while the sink is slower than the inbound rate
//! queued points accumulate in memory without limit. Size the sink timeout
//! and batch size for the expected message rate.

use crate::buffer::BatchBuffer;
use crate::config::WriterConfig;
use crate::error::{SinkError, WriterError};
use crate::point::Point;
use crate::sink::PointSink;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

enum Command {
    Write(Point),
    Flush(oneshot::Sender<Result<(), SinkError>>),
}

/// Writer statistics snapshot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriterStats {
    /// Points accepted by `write_point`
    pub points_enqueued: u64,
    /// Points in batches the sink accepted
    pub points_written: u64,
    /// Batches the sink accepted
    pub batches_written: u64,
    /// Batches the sink rejected or never received
    pub batches_failed: u64,
    /// Points lost with failed batches
    pub points_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    points_enqueued: AtomicU64,
    points_written: AtomicU64,
    batches_written: AtomicU64,
    batches_failed: AtomicU64,
    points_dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WriterStats {
        WriterStats {
            points_enqueued: self.points_enqueued.load(Ordering::Relaxed),
            points_written: self.points_written.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            points_dropped: self.points_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Handle to the background batching task.
pub struct BatchedWriter {
    tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl BatchedWriter {
    /// Spawn the writer task on the current tokio runtime.
    pub fn spawn(sink: Arc<dyn PointSink>, config: &WriterConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        let task = tokio::spawn(run_writer(
            sink,
            rx,
            BatchBuffer::new(config.batch_size),
            config.flush_interval(),
            Arc::clone(&counters),
        ));

        tracing::debug!(
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval_ms,
            "Batched writer started"
        );

        Self { tx, task, counters }
    }

    /// Enqueue a point. Never waits on the sink.
    pub fn write_point(&self, point: Point) -> Result<(), WriterError> {
        self.tx
            .send(Command::Write(point))
            .map_err(|_| WriterError::Closed)?;
        self.counters.points_enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Transmit whatever is buffered and wait for the result.
    ///
    /// Every point enqueued before this call is either sent by this flush or
    /// already was. An empty buffer means no request and `Ok(())`.
    pub async fn flush(&self) -> Result<(), WriterError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(reply_tx))
            .map_err(|_| WriterError::Closed)?;
        reply_rx.await.map_err(|_| WriterError::Closed)??;
        Ok(())
    }

    /// Current statistics.
    pub fn stats(&self) -> WriterStats {
        self.counters.snapshot()
    }

    /// Final flush, then stop the task. Returns the final statistics.
    ///
    /// A failed final batch is logged and counted like any other.
    pub async fn close(self) -> WriterStats {
        let BatchedWriter { tx, task, counters } = self;

        // Dropping the sender lets the task drain its queue, send the
        // remainder and exit.
        drop(tx);
        if let Err(e) = task.await {
            tracing::error!("Writer task ended abnormally: {}", e);
        }

        let stats = counters.snapshot();
        tracing::debug!(?stats, "Batched writer closed");
        stats
    }
}

async fn run_writer(
    sink: Arc<dyn PointSink>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    mut buffer: BatchBuffer,
    flush_interval: Option<Duration>,
    counters: Arc<Counters>,
) {
    let mut ticker = flush_interval.map(|period| {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Write(point)) => {
                    if let Some(batch) = buffer.add(point) {
                        let _ = transmit(sink.as_ref(), batch, &counters).await;
                    }
                }
                Some(Command::Flush(reply)) => {
                    let result = if buffer.is_empty() {
                        Ok(())
                    } else {
                        transmit(sink.as_ref(), buffer.take(), &counters).await
                    };
                    let _ = reply.send(result);
                }
                None => {
                    if !buffer.is_empty() {
                        let _ = transmit(sink.as_ref(), buffer.take(), &counters).await;
                    }
                    break;
                }
            },

            _ = tick(&mut ticker) => {
                if !buffer.is_empty() {
                    tracing::trace!(points = buffer.len(), "Timed flush");
                    let _ = transmit(sink.as_ref(), buffer.take(), &counters).await;
                }
            }
        }
    }
}

/// Wait for the next timer tick, or forever when timed flushes are off.
async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn transmit(
    sink: &dyn PointSink,
    batch: Vec<Point>,
    counters: &Counters,
) -> Result<(), SinkError> {
    let points = batch.len() as u64;
    match sink.write(&batch).await {
        Ok(()) => {
            counters.batches_written.fetch_add(1, Ordering::Relaxed);
            counters.points_written.fetch_add(points, Ordering::Relaxed);
            tracing::debug!(points, "Batch written");
            Ok(())
        }
        Err(e) => {
            counters.batches_failed.fetch_add(1, Ordering::Relaxed);
            counters.points_dropped.fetch_add(points, Ordering::Relaxed);
            tracing::error!(points, "Batch write failed: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::FieldValue;
    use crate::sink::MemorySink;

    fn point(n: i64) -> Point {
        Point::new(
            "m",
            vec![("id".to_string(), n.to_string())],
            vec![("n".to_string(), FieldValue::Integer(n))],
            n as u64,
        )
    }

    fn config(batch_size: usize, flush_interval_ms: u64) -> WriterConfig {
        WriterConfig {
            batch_size,
            flush_interval_ms,
        }
    }

    fn spawn(sink: &MemorySink, batch_size: usize) -> BatchedWriter {
        BatchedWriter::spawn(Arc::new(sink.clone()), &config(batch_size, 0))
    }

    /// Sink whose writes never complete.
    struct StalledSink;

    impl PointSink for StalledSink {
        fn write<'a>(&'a self, _batch: &'a [Point]) -> crate::sink::SinkFuture<'a> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test]
    async fn test_write_point_does_not_wait_on_stalled_sink() {
        let writer = BatchedWriter::spawn(Arc::new(StalledSink), &config(1, 0));

        for n in 0..100 {
            writer.write_point(point(n)).expect("enqueue while sink is stalled");
        }

        let stats = writer.stats();
        assert_eq!(stats.points_enqueued, 100);
        assert_eq!(stats.points_written, 0);
    }

    #[tokio::test]
    async fn test_threshold_transmits_exactly_once() {
        let sink = MemorySink::new();
        let writer = spawn(&sink, 3);

        for n in 0..3 {
            writer.write_point(point(n)).expect("write");
        }
        // Empty after the size-triggered batch: no second request.
        writer.flush().await.expect("flush");

        assert_eq!(sink.write_count(), 1);
        assert_eq!(sink.batches()[0], vec![point(0), point(1), point(2)]);
    }

    #[tokio::test]
    async fn test_below_threshold_nothing_sent() {
        let sink = MemorySink::new();
        let writer = spawn(&sink, 20);

        for n in 0..5 {
            writer.write_point(point(n)).expect("write");
        }
        tokio::task::yield_now().await;

        assert_eq!(sink.write_count(), 0);
        assert_eq!(writer.stats().points_enqueued, 5);
    }

    #[tokio::test]
    async fn test_flush_empty_is_noop() {
        let sink = MemorySink::new();
        let writer = spawn(&sink, 20);

        writer.flush().await.expect("first flush");
        writer.flush().await.expect("second flush");

        assert_eq!(sink.write_count(), 0);
    }

    #[tokio::test]
    async fn test_flush_sends_partial_batch() {
        let sink = MemorySink::new();
        let writer = spawn(&sink, 20);

        writer.write_point(point(1)).expect("write");
        writer.write_point(point(2)).expect("write");
        writer.flush().await.expect("flush");
        writer.flush().await.expect("flush again");

        assert_eq!(sink.batches(), vec![vec![point(1), point(2)]]);
    }

    #[tokio::test]
    async fn test_close_sends_remainder_once() {
        let sink = MemorySink::new();
        let writer = spawn(&sink, 20);

        for n in 0..7 {
            writer.write_point(point(n)).expect("write");
        }
        let stats = writer.close().await;

        assert_eq!(sink.write_count(), 1);
        assert_eq!(sink.points(), (0..7).map(point).collect::<Vec<_>>());
        assert_eq!(stats.points_written, 7);
        assert_eq!(stats.batches_written, 1);
    }

    #[tokio::test]
    async fn test_close_empty_sends_nothing() {
        let sink = MemorySink::new();
        let writer = spawn(&sink, 20);

        let stats = writer.close().await;

        assert_eq!(sink.write_count(), 0);
        assert_eq!(stats, WriterStats::default());
    }

    #[tokio::test]
    async fn test_batches_keep_enqueue_order() {
        let sink = MemorySink::new();
        let writer = spawn(&sink, 4);

        for n in 0..10 {
            writer.write_point(point(n)).expect("write");
        }
        writer.close().await;

        let sizes: Vec<usize> = sink.batches().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(sink.points(), (0..10).map(point).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failed_batch_is_counted_not_retried() {
        let sink = MemorySink::new();
        let writer = spawn(&sink, 2);

        sink.set_failing(true);
        writer.write_point(point(1)).expect("write");
        writer.write_point(point(2)).expect("write");
        writer.flush().await.expect("nothing buffered");

        sink.set_failing(false);
        writer.write_point(point(3)).expect("write");
        writer.flush().await.expect("flush");

        assert_eq!(sink.points(), vec![point(3)]);
        let stats = writer.stats();
        assert_eq!(stats.batches_failed, 1);
        assert_eq!(stats.points_dropped, 2);
        assert_eq!(stats.batches_written, 1);
        assert_eq!(stats.points_written, 1);
    }

    #[tokio::test]
    async fn test_flush_reports_sink_error() {
        let sink = MemorySink::new();
        let writer = spawn(&sink, 20);

        writer.write_point(point(1)).expect("write");
        sink.set_failing(true);

        let err = writer.flush().await.unwrap_err();
        assert!(matches!(err, WriterError::Sink(SinkError::Rejected { .. })));

        // The failed point is gone; the next flush has nothing to send.
        sink.set_failing(false);
        writer.flush().await.expect("flush");
        assert_eq!(sink.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_flush() {
        let sink = MemorySink::new();
        let writer = BatchedWriter::spawn(Arc::new(sink.clone()), &config(20, 50));

        writer.write_point(point(1)).expect("write");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.write_count(), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(sink.batches(), vec![vec![point(1)]]);

        // Idle ticks send nothing.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.write_count(), 1);
    }

    #[tokio::test]
    async fn test_write_after_task_gone_is_closed() {
        let sink = MemorySink::new();
        let mut writer = spawn(&sink, 20);
        writer.task.abort();
        let _ = (&mut writer.task).await;

        assert!(matches!(
            writer.write_point(point(1)),
            Err(WriterError::Closed)
        ));
        assert!(matches!(writer.flush().await, Err(WriterError::Closed)));
    }
}
