use rust_decimal::Decimal;
use time::OffsetDateTime;
use wallet_sdk::objects::Currency;

use crate::framework::{DatabaseAccessor, Processor};

/// One (user, currency) balance row. `currency` is stored as the raw
/// three-letter code; [`currency()`](Balance::currency) parses it.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Balance {
    pub id: i64,
    pub user_id: i64,
    pub currency: String,
    pub amount: Decimal,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Balance {
    pub fn currency(&self) -> Result<Currency, wallet_sdk::objects::UnknownCurrency> {
        self.currency.trim_end().parse()
    }
}

/// Read one balance amount under an exclusive row lock.
///
/// Callers locking more than one row must lock in ascending
/// currency-code order to stay deadlock-free against peers.
#[derive(Debug, Clone)]
pub struct LockBalance {
    pub user_id: i64,
    pub currency: Currency,
}

impl<A: DatabaseAccessor + Send> Processor<LockBalance> for A {
    type Output = Option<Decimal>;
    type Error = sqlx::Error;

    #[tracing::instrument(skip_all, err, name = "SQL:LockBalance")]
    async fn process(&mut self, cmd: LockBalance) -> Result<Option<Decimal>, sqlx::Error> {
        sqlx::query_scalar::<_, Decimal>(
            "SELECT amount FROM balances WHERE user_id = $1 AND currency = $2 FOR UPDATE",
        )
        .bind(cmd.user_id)
        .bind(cmd.currency.as_str())
        .fetch_optional(self.acquire())
        .await
    }
}

/// Apply a signed delta to one balance row. Yields the number of rows
/// touched; zero means the row does not exist.
#[derive(Debug, Clone)]
pub struct ApplyBalanceDelta {
    pub user_id: i64,
    pub currency: Currency,
    pub delta: Decimal,
}

impl<A: DatabaseAccessor + Send> Processor<ApplyBalanceDelta> for A {
    type Output = u64;
    type Error = sqlx::Error;

    #[tracing::instrument(skip_all, err, name = "SQL:ApplyBalanceDelta")]
    async fn process(&mut self, cmd: ApplyBalanceDelta) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE balances
            SET amount = amount + $1, updated_at = NOW()
            WHERE user_id = $2 AND currency = $3
            "#,
        )
        .bind(cmd.delta)
        .bind(cmd.user_id)
        .bind(cmd.currency.as_str())
        .execute(self.acquire())
        .await?;
        Ok(result.rows_affected())
    }
}

/// Fetch all balance rows of a user, ordered by currency code.
#[derive(Debug, Clone)]
pub struct GetAllBalances {
    pub user_id: i64,
}

impl<A: DatabaseAccessor + Send> Processor<GetAllBalances> for A {
    type Output = Vec<Balance>;
    type Error = sqlx::Error;

    #[tracing::instrument(skip_all, err, name = "SQL:GetAllBalances")]
    async fn process(&mut self, query: GetAllBalances) -> Result<Vec<Balance>, sqlx::Error> {
        sqlx::query_as::<_, Balance>(
            r#"
            SELECT id, user_id, currency, amount, created_at, updated_at
            FROM balances
            WHERE user_id = $1
            ORDER BY currency
            "#,
        )
        .bind(query.user_id)
        .fetch_all(self.acquire())
        .await
    }
}
