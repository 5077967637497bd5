//! MongoDB sink for archived large transfers.
//!
//! The collection is the audit trail of the platform: every event that
//! cleared the publisher's threshold ends up here, stamped with its
//! processing time. All queries run against the single-field indexes
//! created at startup.

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, DateTime};
use futures::TryStreamExt;
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::{Client, Collection, IndexModel};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use wallet_sdk::objects::{Currency, TransferEvent, TransferKind};

use crate::config::MongoConfig;

pub const STATUS_PROCESSED: &str = "processed";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("document store error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("malformed statistics document: {0}")]
    Decode(#[from] bson::de::Error),

    #[error("document store returned a non-objectid key")]
    UnexpectedId,
}

/// An archived high-value transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LargeTransfer {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: i64,
    #[serde(rename = "type")]
    pub kind: TransferKind,
    pub from_currency: Currency,
    pub to_currency: Currency,
    pub amount: f64,
    /// When the wallet emitted the event.
    pub timestamp: DateTime,
    /// When the consumer persisted the document.
    pub processed_at: DateTime,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl LargeTransfer {
    /// Build a document from a parsed log event. `processed_at` and
    /// `status` are re-stamped by the sink at save time.
    pub fn from_event(event: &TransferEvent) -> Self {
        Self {
            id: None,
            user_id: event.user_id,
            kind: event.kind,
            from_currency: event.from_currency,
            to_currency: event.to_currency,
            amount: event.amount.to_f64().unwrap_or_default(),
            timestamp: DateTime::from_time_0_3(event.timestamp),
            processed_at: DateTime::now(),
            status: STATUS_PROCESSED.to_string(),
            error_message: None,
        }
    }
}

/// Aggregated view over the archive, zeroed when the collection is empty.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransferStatistics {
    #[serde(default)]
    pub total_processed: i64,
    #[serde(default)]
    pub total_failed: i64,
    #[serde(default)]
    pub average_amount: f64,
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default)]
    pub last_processed: Option<DateTime>,
}

/// Destination of a consumer batch.
///
/// The consumer's flush path is written against this seam so its retry
/// and offset-advance policy can be exercised without a running store.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Bulk insert, all-or-nothing from the caller's perspective.
    async fn save_batch(&self, transfers: Vec<LargeTransfer>) -> Result<usize, SinkError>;
}

/// Document store handle of the notification service.
pub struct TransferSink {
    client: Client,
    collection: Collection<LargeTransfer>,
}

#[async_trait]
impl BatchSink for TransferSink {
    async fn save_batch(&self, transfers: Vec<LargeTransfer>) -> Result<usize, SinkError> {
        TransferSink::save_batch(self, transfers).await
    }
}

impl TransferSink {
    pub async fn connect(cfg: &MongoConfig) -> Result<Self, SinkError> {
        let mut options = ClientOptions::parse(&cfg.uri).await?;
        options.max_pool_size = Some(cfg.max_pool_size);
        options.min_pool_size = Some(cfg.min_pool_size);
        options.server_selection_timeout = Some(cfg.timeout);

        let client = Client::with_options(options)?;
        let collection = client.database(&cfg.database).collection(&cfg.collection);
        info!(database = %cfg.database, collection = %cfg.collection, "document store configured");

        Ok(Self { client, collection })
    }

    /// Create the single-field indexes backing the audit queries and the
    /// statistics aggregation. Idempotent; called once at startup.
    pub async fn ensure_indexes(&self) -> Result<(), SinkError> {
        let indexes = [
            doc! { "user_id": 1 },
            doc! { "timestamp": -1 },
            doc! { "processed_at": -1 },
            doc! { "type": 1 },
            doc! { "status": 1 },
            doc! { "amount": -1 },
        ]
        .into_iter()
        .map(|keys| IndexModel::builder().keys(keys).build());

        let created = self.collection.create_indexes(indexes, None).await?;
        info!(count = created.index_names.len(), "document store indexes ensured");
        Ok(())
    }

    /// Insert one transfer, stamping its processing time and status.
    pub async fn save_one(&self, mut transfer: LargeTransfer) -> Result<ObjectId, SinkError> {
        transfer.processed_at = DateTime::now();
        transfer.status = STATUS_PROCESSED.to_string();

        let result = self.collection.insert_one(&transfer, None).await?;
        result
            .inserted_id
            .as_object_id()
            .ok_or(SinkError::UnexpectedId)
    }

    /// Bulk insert. All-or-nothing from the caller's perspective: any
    /// failure means the whole batch is treated as failed and may be
    /// retried, so replays can duplicate documents but never lose them.
    pub async fn save_batch(&self, mut transfers: Vec<LargeTransfer>) -> Result<usize, SinkError> {
        if transfers.is_empty() {
            return Ok(0);
        }

        let now = DateTime::now();
        for transfer in &mut transfers {
            transfer.processed_at = now;
            transfer.status = STATUS_PROCESSED.to_string();
        }

        let result = self.collection.insert_many(&transfers, None).await?;
        debug!(size = transfers.len(), inserted = result.inserted_ids.len(), "saved transfer batch");
        Ok(result.inserted_ids.len())
    }

    /// Transfers of one user, most recent event first.
    pub async fn get_by_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<LargeTransfer>, SinkError> {
        let options = FindOptions::builder()
            .sort(doc! { "timestamp": -1 })
            .limit(limit)
            .build();
        let cursor = self
            .collection
            .find(doc! { "user_id": user_id }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    /// Most recently processed transfers across all users.
    pub async fn get_recent(&self, limit: i64) -> Result<Vec<LargeTransfer>, SinkError> {
        let options = FindOptions::builder()
            .sort(doc! { "processed_at": -1 })
            .limit(limit)
            .build();
        let cursor = self.collection.find(doc! {}, options).await?;
        Ok(cursor.try_collect().await?)
    }

    /// Server-side aggregation over the archive. Completes with zeroed
    /// statistics when the collection is empty.
    pub async fn statistics(&self) -> Result<TransferStatistics, SinkError> {
        let pipeline = vec![doc! {
            "$group": {
                "_id": null,
                "total_processed": {
                    "$sum": { "$cond": [ { "$eq": ["$status", STATUS_PROCESSED] }, 1, 0 ] }
                },
                "total_failed": {
                    "$sum": { "$cond": [ { "$eq": ["$status", STATUS_FAILED] }, 1, 0 ] }
                },
                "average_amount": { "$avg": "$amount" },
                "total_amount": { "$sum": "$amount" },
                "last_processed": { "$max": "$processed_at" },
            }
        }];

        let mut cursor = self.collection.aggregate(pipeline, None).await?;
        match cursor.try_next().await? {
            Some(document) => Ok(bson::from_document(document)?),
            None => Ok(TransferStatistics::default()),
        }
    }

    /// Liveness check against the server.
    pub async fn ping(&self) -> Result<(), SinkError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await?;
        Ok(())
    }

    /// Tear the connection pool down; part of orderly shutdown.
    pub async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use time::macros::datetime;

    #[test]
    fn document_is_built_from_an_event() {
        let event = TransferEvent {
            user_id: 7,
            kind: TransferKind::Deposit,
            from_currency: Currency::USD,
            to_currency: Currency::USD,
            amount: Decimal::from(100_000),
            timestamp: datetime!(2025-03-01 09:00:00 UTC),
        };

        let transfer = LargeTransfer::from_event(&event);
        assert_eq!(transfer.id, None);
        assert_eq!(transfer.user_id, 7);
        assert_eq!(transfer.kind, TransferKind::Deposit);
        assert_eq!(transfer.amount, 100_000.0);
        assert_eq!(transfer.status, STATUS_PROCESSED);
        assert_eq!(
            transfer.timestamp,
            DateTime::from_time_0_3(datetime!(2025-03-01 09:00:00 UTC))
        );
        assert!(transfer.error_message.is_none());
    }

    #[test]
    fn document_serializes_with_wire_field_names() {
        let event = TransferEvent {
            user_id: 7,
            kind: TransferKind::Exchange,
            from_currency: Currency::USD,
            to_currency: Currency::EUR,
            amount: Decimal::from(45_000),
            timestamp: datetime!(2025-03-01 09:00:00 UTC),
        };
        let document = bson::to_document(&LargeTransfer::from_event(&event)).unwrap();

        assert!(!document.contains_key("_id"));
        assert_eq!(document.get_i64("user_id").unwrap(), 7);
        assert_eq!(document.get_str("type").unwrap(), "exchange");
        assert_eq!(document.get_str("from_currency").unwrap(), "USD");
        assert_eq!(document.get_str("to_currency").unwrap(), "EUR");
        assert_eq!(document.get_f64("amount").unwrap(), 45_000.0);
        assert_eq!(document.get_str("status").unwrap(), STATUS_PROCESSED);
        assert!(!document.contains_key("error_message"));
    }

    #[test]
    fn empty_statistics_are_zeroed() {
        let stats = TransferStatistics::default();
        assert_eq!(stats.total_processed, 0);
        assert_eq!(stats.total_failed, 0);
        assert_eq!(stats.average_amount, 0.0);
        assert_eq!(stats.total_amount, 0.0);
        assert!(stats.last_processed.is_none());
    }

    #[test]
    fn statistics_decode_from_an_aggregation_document() {
        let document = doc! {
            "_id": null,
            "total_processed": 12,
            "total_failed": 1,
            "average_amount": 48_000.5,
            "total_amount": 576_006.0,
            "last_processed": DateTime::from_millis(1_740_000_000_000),
        };
        let stats: TransferStatistics = bson::from_document(document).unwrap();
        assert_eq!(stats.total_processed, 12);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.average_amount, 48_000.5);
        assert_eq!(stats.total_amount, 576_006.0);
        assert_eq!(
            stats.last_processed,
            Some(DateTime::from_millis(1_740_000_000_000))
        );
    }
}
