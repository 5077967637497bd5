use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use time::OffsetDateTime;
use wallet_sdk::objects::{Currency, TransferKind};

use crate::framework::{DatabaseAccessor, Processor};

/// Lifecycle state of a transaction row.
///
/// The engine writes only `completed` rows because every money movement is
/// atomic with its store transaction; `pending` and `failed` stay in the
/// schema for future asynchronous flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// Immutable audit record of a money movement.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionRecord {
    pub id: i64,
    pub user_id: i64,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub from_currency: String,
    pub to_currency: String,
    pub from_amount: Decimal,
    pub to_amount: Decimal,
    pub exchange_rate: Decimal,
    pub status: String,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

/// Insert a completed transaction, usually inside the caller's store
/// transaction alongside the balance updates it records.
///
/// For deposits and withdrawals the currencies are equal and the rate is
/// 1; exchanges record the applied rate.
#[derive(Debug, Clone)]
pub struct InsertCompletedTransaction {
    pub user_id: i64,
    pub kind: TransferKind,
    pub from: Currency,
    pub to: Currency,
    pub from_amount: Decimal,
    pub to_amount: Decimal,
    pub rate: Decimal,
}

impl<A: DatabaseAccessor + Send> Processor<InsertCompletedTransaction> for A {
    type Output = i64;
    type Error = sqlx::Error;

    #[tracing::instrument(skip_all, err, name = "SQL:InsertCompletedTransaction")]
    async fn process(&mut self, cmd: InsertCompletedTransaction) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO transactions
                (user_id, type, from_currency, to_currency,
                 from_amount, to_amount, exchange_rate, status, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            RETURNING id
            "#,
        )
        .bind(cmd.user_id)
        .bind(cmd.kind.as_str())
        .bind(cmd.from.as_str())
        .bind(cmd.to.as_str())
        .bind(cmd.from_amount)
        .bind(cmd.to_amount)
        .bind(cmd.rate)
        .bind(TransactionStatus::Completed.as_str())
        .fetch_one(self.acquire())
        .await
    }
}

/// Fetch the most recent transactions of a user.
#[derive(Debug, Clone)]
pub struct GetUserTransactions {
    pub user_id: i64,
    pub limit: i64,
}

impl<A: DatabaseAccessor + Send> Processor<GetUserTransactions> for A {
    type Output = Vec<TransactionRecord>;
    type Error = sqlx::Error;

    #[tracing::instrument(skip_all, err, name = "SQL:GetUserTransactions")]
    async fn process(
        &mut self,
        query: GetUserTransactions,
    ) -> Result<Vec<TransactionRecord>, sqlx::Error> {
        sqlx::query_as::<_, TransactionRecord>(
            r#"
            SELECT id, user_id, type, from_currency, to_currency,
                   from_amount, to_amount, exchange_rate, status,
                   created_at, completed_at
            FROM transactions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(query.user_id)
        .bind(query.limit)
        .fetch_all(self.acquire())
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Completed,
            TransactionStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TransactionStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<TransactionStatus>().is_err());
    }
}
