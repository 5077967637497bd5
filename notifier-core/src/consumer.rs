//! Partitioned log consumer.
//!
//! One fetch task pulls records from the `large-transfers` topic and
//! routes them to `W` workers by partition, so every partition — and
//! therefore every user — is owned by exactly one worker and keeps its
//! order. Workers assemble batches and write them to the document sink
//! with bounded retry; offsets are committed only after a batch is
//! resolved, which makes delivery at-least-once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Message, OwnedMessage};
use rdkafka::{Offset, TopicPartitionList};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use wallet_sdk::objects::TransferEvent;

use crate::batch::{high_watermarks, Batch, LogPosition};
use crate::config::{KafkaSourceConfig, ProcessingConfig};
use crate::sink::{BatchSink, LargeTransfer, SinkError, TransferSink};

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

/// Monotonic processing counters shared with the stats reporter.
pub struct ConsumerStats {
    processed: AtomicU64,
    failed: AtomicU64,
    started: Instant,
}

/// Point-in-time view of [`ConsumerStats`].
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub uptime: Duration,
    /// Messages per second since startup.
    pub rate: f64,
}

impl ConsumerStats {
    fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    fn add_processed(&self, count: u64) {
        self.processed.fetch_add(count, Ordering::Relaxed);
    }

    fn add_failed(&self, count: u64) {
        self.failed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let uptime = self.started.elapsed();
        StatsSnapshot {
            processed,
            failed: self.failed.load(Ordering::Relaxed),
            uptime,
            rate: processed as f64 / uptime.as_secs_f64().max(f64::EPSILON),
        }
    }
}

/// Decode a log record into a sink document.
pub fn parse_transfer(payload: &[u8]) -> Result<LargeTransfer, serde_json::Error> {
    let event: TransferEvent = serde_json::from_slice(payload)?;
    Ok(LargeTransfer::from_event(&event))
}

/// Write a batch with bounded, fixed-delay retry.
///
/// Returns the last error only once all `attempts` tries are exhausted.
pub async fn write_with_retry<S: BatchSink + ?Sized>(
    sink: &S,
    transfers: Vec<LargeTransfer>,
    attempts: u32,
    delay: Duration,
) -> Result<usize, SinkError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match sink.save_batch(transfers.clone()).await {
            Ok(inserted) => return Ok(inserted),
            Err(e) if attempt < attempts => {
                warn!(
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    "batch write failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// The consumer process: one fetcher plus a worker pool.
pub struct TransferConsumer {
    consumer: Arc<StreamConsumer>,
    sink: Arc<TransferSink>,
    topic: String,
    processing: ProcessingConfig,
    stats: Arc<ConsumerStats>,
}

impl TransferConsumer {
    pub fn new(
        kafka: &KafkaSourceConfig,
        processing: ProcessingConfig,
        sink: Arc<TransferSink>,
    ) -> Result<Self, ConsumerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &kafka.brokers)
            .set("group.id", &kafka.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("fetch.wait.max.ms", "500")
            .create()?;

        info!(
            topic = %kafka.topic,
            group_id = %kafka.group_id,
            brokers = %kafka.brokers,
            "log consumer initialized"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            sink,
            topic: kafka.topic.clone(),
            processing,
            stats: Arc::new(ConsumerStats::new()),
        })
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Run until `shutdown_rx` flips to `true`; resolves once every worker
    /// has flushed its final batch.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        self.consumer.subscribe(&[&self.topic])?;

        let workers = self.processing.workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let (tx, rx) = mpsc::channel::<OwnedMessage>(self.processing.batch_size.max(1) * 2);
            let worker = Worker {
                id: worker_id,
                consumer: Arc::clone(&self.consumer),
                sink: Arc::clone(&self.sink),
                topic: self.topic.clone(),
                processing: self.processing.clone(),
                stats: Arc::clone(&self.stats),
            };
            handles.push(tokio::spawn(worker.run(rx)));
            senders.push(tx);
        }
        info!(workers, batch_size = self.processing.batch_size, "log consumer started");

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("log consumer received shutdown signal");
                        break;
                    }
                }

                fetched = self.consumer.recv() => match fetched {
                    Ok(message) => {
                        let message = message.detach();
                        // Partition affinity keeps per-user order intact
                        // across the worker pool.
                        let worker = message.partition().rem_euclid(workers as i32) as usize;
                        if senders[worker].send(message).await.is_err() {
                            error!(worker, "worker channel closed, stopping fetch loop");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "failed to fetch message");
                        tokio::time::sleep(self.processing.retry_delay).await;
                    }
                }
            }
        }

        // Closing the channels tells every worker to flush and exit.
        drop(senders);
        for handle in handles {
            let _ = handle.await;
        }
        info!("log consumer stopped");
        Ok(())
    }
}

/// One batch-assembling worker. Owns the partitions routed to it.
struct Worker {
    id: usize,
    consumer: Arc<StreamConsumer>,
    sink: Arc<TransferSink>,
    topic: String,
    processing: ProcessingConfig,
    stats: Arc<ConsumerStats>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<OwnedMessage>) {
        let mut batch = Batch::with_capacity(self.processing.batch_size);
        let mut ticker = tokio::time::interval(self.processing.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(&mut batch).await;
                    }
                }

                received = rx.recv() => match received {
                    Some(message) => {
                        let position = LogPosition {
                            partition: message.partition(),
                            offset: message.offset(),
                        };
                        match parse_transfer(message.payload().unwrap_or_default()) {
                            Ok(transfer) => {
                                batch.push(transfer, position);
                                if batch.is_full(self.processing.batch_size) {
                                    self.flush(&mut batch).await;
                                }
                            }
                            Err(e) => {
                                // Poison message: count it and advance past
                                // it so the partition does not stall.
                                warn!(
                                    worker = self.id,
                                    partition = position.partition,
                                    offset = position.offset,
                                    error = %e,
                                    "dropping unparseable message"
                                );
                                self.stats.add_failed(1);
                                self.commit(&[position]);
                            }
                        }
                    }
                    None => {
                        if !batch.is_empty() {
                            self.flush(&mut batch).await;
                        }
                        break;
                    }
                }
            }
        }
        debug!(worker = self.id, "worker stopped");
    }

    /// Write the accumulated batch with bounded retry, then advance the
    /// covered offsets.
    async fn flush(&self, batch: &mut Batch) {
        let (transfers, positions) = batch.take();
        if transfers.is_empty() {
            return;
        }
        let size = transfers.len();
        let started = Instant::now();

        match write_with_retry(
            self.sink.as_ref(),
            transfers,
            self.processing.retry_attempts,
            self.processing.retry_delay,
        )
        .await
        {
            Ok(inserted) => {
                self.stats.add_processed(size as u64);
                debug!(
                    worker = self.id,
                    size,
                    inserted,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "flushed batch"
                );
            }
            Err(e) => {
                error!(
                    worker = self.id,
                    attempts = self.processing.retry_attempts,
                    size,
                    error = %e,
                    "dropping batch after exhausting retries"
                );
                self.stats.add_failed(size as u64);
            }
        }

        // Offsets advance even when the batch was dropped: delivery is
        // at-least-once with bounded retry, and a poison batch must not
        // block the partition.
        self.commit(&positions);
    }

    fn commit(&self, positions: &[LogPosition]) {
        let mut list = TopicPartitionList::new();
        for (partition, next_offset) in high_watermarks(positions) {
            if let Err(e) = list.add_partition_offset(&self.topic, partition, Offset::Offset(next_offset)) {
                error!(worker = self.id, error = %e, "failed to build commit list");
                return;
            }
        }
        if let Err(e) = self.consumer.commit(&list, CommitMode::Async) {
            error!(worker = self.id, error = %e, "offset commit failed");
        }
    }
}
