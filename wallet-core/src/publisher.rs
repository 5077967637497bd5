//! Threshold-gated publisher for the `large-transfers` log.
//!
//! The publisher is a fire-and-forget collaborator of the engine: events
//! below the configured threshold are dropped, delivery failures are
//! logged and swallowed, and nothing here ever propagates back into a
//! user request.

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rust_decimal::Decimal;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error, warn};
use wallet_sdk::objects::{Currency, TransferEvent, TransferKind};

/// How long an enqueued record may wait for broker acknowledgement before
/// the delivery task gives up and logs.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("kafka producer init failed: {0}")]
    Init(#[from] rdkafka::error::KafkaError),
}

/// Asynchronous producer keyed by user id.
///
/// Keying by `user_<id>` pins all events of one user to one partition, so
/// per-user order on the log matches the order of committed wallet
/// operations.
pub struct EventPublisher {
    producer: FutureProducer,
    topic: String,
    threshold: Decimal,
}

impl EventPublisher {
    pub fn new(
        brokers: &str,
        topic: impl Into<String>,
        threshold: Decimal,
    ) -> Result<Self, PublisherError> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("acks", "1")
            .set("linger.ms", "10")
            .set("compression.type", "snappy")
            .create()?;

        Ok(Self {
            producer,
            topic: topic.into(),
            threshold,
        })
    }

    /// Whether an amount clears the notification threshold.
    ///
    /// The comparison is in the source currency's own units; there is no
    /// cross-currency normalization.
    pub fn exceeds_threshold(&self, amount: Decimal) -> bool {
        amount >= self.threshold
    }

    /// Enqueue a transfer event if it clears the threshold.
    ///
    /// Returns immediately; broker acknowledgement is awaited on a spawned
    /// task and failures are logged, never surfaced.
    pub fn publish(
        &self,
        user_id: i64,
        kind: TransferKind,
        from: Currency,
        to: Currency,
        amount: Decimal,
    ) {
        if !self.exceeds_threshold(amount) {
            debug!(
                user_id,
                amount = %amount,
                threshold = %self.threshold,
                "transfer below threshold, skipping notification"
            );
            return;
        }

        let event = TransferEvent {
            user_id,
            kind,
            from_currency: from,
            to_currency: to,
            amount,
            timestamp: OffsetDateTime::now_utc(),
        };

        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(user_id, error = %e, "failed to encode transfer event");
                return;
            }
        };
        let key = event.key();

        let producer = self.producer.clone();
        let topic = self.topic.clone();
        tokio::spawn(async move {
            let record = FutureRecord::to(&topic).key(&key).payload(&payload);
            match producer.send(record, Timeout::After(DELIVERY_TIMEOUT)).await {
                Ok((partition, offset)) => {
                    debug!(user_id, partition, offset, "published large-transfer event");
                }
                Err((e, _)) => {
                    error!(user_id, error = %e, "failed to publish large-transfer event");
                }
            }
        });
    }

    /// Flush outstanding records; called once during orderly shutdown.
    pub fn close(&self) {
        if let Err(e) = self.producer.flush(Timeout::After(DELIVERY_TIMEOUT)) {
            warn!(error = %e, "event publisher flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher() -> EventPublisher {
        // Producer construction does not touch the network.
        EventPublisher::new("localhost:9092", "large-transfers", Decimal::from(30_000))
            .expect("producer init")
    }

    #[test]
    fn threshold_is_inclusive() {
        let publisher = publisher();
        assert!(publisher.exceeds_threshold(Decimal::from(30_000)));
        assert!(publisher.exceeds_threshold(Decimal::from(100_000)));
        assert!(!publisher.exceeds_threshold(Decimal::new(2_999_999, 2)));
        assert!(!publisher.exceeds_threshold(Decimal::from(50)));
    }
}
