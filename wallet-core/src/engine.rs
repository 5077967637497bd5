//! Transactional wallet engine.
//!
//! The engine is the single writer of user, balance, and transaction rows.
//! Every money movement runs in one store transaction; notification of
//! large transfers happens after commit and is best-effort.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::Rng;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use wallet_sdk::client::RateClient;
use wallet_sdk::objects::{Currency, TransferKind};

use crate::cache::RatesCache;
use crate::entities::balances::{ApplyBalanceDelta, GetAllBalances, LockBalance};
use crate::entities::transactions::{
    GetUserTransactions, InsertCompletedTransaction, TransactionRecord,
};
use crate::entities::users::{CreateUser, GetUserByUsername, User};
use crate::error::{WalletError, MIN_PASSWORD_LEN};
use crate::framework::{DatabaseProcessor, Processor, TransactionProcessor};
use crate::publisher::EventPublisher;

/// Extra attempts after a serialization conflict before surfacing it.
const SERIALIZATION_RETRIES: u32 = 2;

/// Fractional digits of the store's NUMERIC(20, 8) columns.
const AMOUNT_SCALE: u32 = 8;

/// Balances of one user, one entry per supported currency.
pub type UserBalances = BTreeMap<Currency, Decimal>;

pub struct WalletEngine {
    pool: PgPool,
    rates: Arc<RatesCache>,
    rate_client: Arc<RateClient>,
    publisher: Arc<EventPublisher>,
    /// Hash verified against when a username does not exist, so the
    /// authentication path costs the same either way.
    sentinel_hash: String,
}

impl WalletEngine {
    pub fn new(
        pool: PgPool,
        rates: Arc<RatesCache>,
        rate_client: Arc<RateClient>,
        publisher: Arc<EventPublisher>,
    ) -> Result<Self, WalletError> {
        let salt = SaltString::generate(&mut OsRng);
        let sentinel_hash = Argon2::default()
            .hash_password(b"wallet-sentinel", &salt)
            .map_err(|_| WalletError::PasswordHash)?
            .to_string();

        Ok(Self {
            pool,
            rates,
            rate_client,
            publisher,
            sentinel_hash,
        })
    }

    /// A pool-backed processor for one command. The pool handle is
    /// reference-counted, so this is cheap per call.
    fn db(&self) -> DatabaseProcessor {
        DatabaseProcessor {
            pool: self.pool.clone(),
        }
    }

    /// Register a new user with three zero balances.
    ///
    /// Uniqueness of username and email is enforced by the store's UNIQUE
    /// constraints; the resulting violations come back as
    /// [`DuplicateUsername`](WalletError::DuplicateUsername) and
    /// [`DuplicateEmail`](WalletError::DuplicateEmail).
    pub async fn register_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, WalletError> {
        if username.trim().is_empty() {
            return Err(WalletError::EmptyUsername);
        }
        if email.trim().is_empty() {
            return Err(WalletError::EmptyEmail);
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(WalletError::WeakPassword);
        }

        let password_hash = hash_password(password.to_string()).await?;
        let user = self
            .db()
            .process(CreateUser {
                username: username.to_string(),
                email: email.to_string(),
                password_hash,
            })
            .await?;

        info!(user_id = user.id, username = %user.username, "user registered");
        Ok(user)
    }

    /// Authenticate a user by username and password.
    ///
    /// When the username is unknown the password is still verified against
    /// a sentinel hash, so the latency of this call does not reveal
    /// whether the account exists.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User, WalletError> {
        let user = self
            .db()
            .process(GetUserByUsername {
                username: username.to_string(),
            })
            .await?;

        let stored_hash = user
            .as_ref()
            .map(|u| u.password_hash.clone())
            .unwrap_or_else(|| self.sentinel_hash.clone());

        let verified = verify_password(password.to_string(), stored_hash).await?;

        match user {
            Some(user) if verified => {
                debug!(user_id = user.id, "user authenticated");
                Ok(user)
            }
            _ => {
                warn!(username, "failed authentication attempt");
                Err(WalletError::InvalidCredentials)
            }
        }
    }

    /// Current balances of a user, one entry per supported currency.
    ///
    /// A missing row is a contract violation and surfaces as
    /// [`MissingBalance`](WalletError::MissingBalance), never as zero.
    pub async fn get_balances(&self, user_id: i64) -> Result<UserBalances, WalletError> {
        let rows = self.db().process(GetAllBalances { user_id }).await?;
        if rows.is_empty() {
            return Err(WalletError::UserNotFound);
        }

        let mut balances = UserBalances::new();
        for row in rows {
            let currency = row
                .currency()
                .map_err(|e| WalletError::UnsupportedCurrency(e.0))?;
            balances.insert(currency, row.amount);
        }
        for currency in Currency::ALL {
            if !balances.contains_key(&currency) {
                return Err(WalletError::MissingBalance { user_id, currency });
            }
        }
        Ok(balances)
    }

    /// Recent transactions of a user, newest first.
    pub async fn get_transactions(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, WalletError> {
        Ok(self
            .db()
            .process(GetUserTransactions { user_id, limit })
            .await?)
    }

    /// Add funds to one balance.
    pub async fn deposit(
        &self,
        user_id: i64,
        currency: &str,
        amount: Decimal,
    ) -> Result<UserBalances, WalletError> {
        validate_amount(amount)?;
        let currency: Currency = currency.parse()?;

        let mut tp = TransactionProcessor {
            tx: self.pool.begin().await?,
        };
        let touched = tp
            .process(ApplyBalanceDelta {
                user_id,
                currency,
                delta: amount,
            })
            .await?;
        if touched == 0 {
            return Err(WalletError::MissingBalance { user_id, currency });
        }
        tp.process(InsertCompletedTransaction {
            user_id,
            kind: TransferKind::Deposit,
            from: currency,
            to: currency,
            from_amount: amount,
            to_amount: amount,
            rate: Decimal::ONE,
        })
        .await?;
        tp.tx.commit().await?;

        self.publisher
            .publish(user_id, TransferKind::Deposit, currency, currency, amount);
        info!(user_id, amount = %amount, currency = %currency, "deposit completed");

        self.get_balances(user_id).await
    }

    /// Remove funds from one balance, rejecting overdrafts.
    pub async fn withdraw(
        &self,
        user_id: i64,
        currency: &str,
        amount: Decimal,
    ) -> Result<UserBalances, WalletError> {
        validate_amount(amount)?;
        let currency: Currency = currency.parse()?;

        let mut tp = TransactionProcessor {
            tx: self.pool.begin().await?,
        };
        let available = tp
            .process(LockBalance { user_id, currency })
            .await?
            .ok_or(WalletError::MissingBalance { user_id, currency })?;
        if available < amount {
            return Err(WalletError::InsufficientFunds {
                available,
                requested: amount,
            });
        }
        tp.process(ApplyBalanceDelta {
            user_id,
            currency,
            delta: -amount,
        })
        .await?;
        tp.process(InsertCompletedTransaction {
            user_id,
            kind: TransferKind::Withdraw,
            from: currency,
            to: currency,
            from_amount: amount,
            to_amount: amount,
            rate: Decimal::ONE,
        })
        .await?;
        tp.tx.commit().await?;

        self.publisher
            .publish(user_id, TransferKind::Withdraw, currency, currency, amount);
        info!(user_id, amount = %amount, currency = %currency, "withdrawal completed");

        self.get_balances(user_id).await
    }

    /// The full rate table, cache-first.
    pub async fn get_exchange_rates(&self) -> Result<BTreeMap<String, Decimal>, WalletError> {
        let (cached, valid) = self.rates.get_all();
        if valid {
            debug!("returning exchange rates from cache");
            return Ok(cached);
        }

        let rates = self.rate_client.get_all_rates().await?;
        self.rates.set(rates.clone());
        Ok(rates)
    }

    /// Convert funds between two of the user's balances atomically.
    ///
    /// Returns the credited amount and the resulting balances. Store
    /// conflicts at serializable isolation are retried up to
    /// [`SERIALIZATION_RETRIES`] times with a small randomized backoff.
    pub async fn exchange(
        &self,
        user_id: i64,
        from: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<(Decimal, UserBalances), WalletError> {
        validate_amount(amount)?;
        let from: Currency = from.parse()?;
        let to: Currency = to.parse()?;
        if from == to {
            return Err(WalletError::SameCurrency);
        }

        let rate = self.resolve_rate(from, to).await?;
        let to_amount = exchanged_amount(amount, rate);

        let mut attempt = 0;
        loop {
            match self
                .execute_exchange(user_id, from, to, amount, to_amount, rate)
                .await
            {
                Ok(()) => break,
                Err(err) if err.is_retryable_conflict() && attempt < SERIALIZATION_RETRIES => {
                    attempt += 1;
                    let backoff = retry_backoff(attempt);
                    warn!(
                        user_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "serialization conflict, retrying exchange"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }

        self.publisher
            .publish(user_id, TransferKind::Exchange, from, to, amount);
        info!(
            user_id,
            from = %from,
            to = %to,
            amount = %amount,
            to_amount = %to_amount,
            rate = %rate,
            "exchange completed"
        );

        let balances = self.get_balances(user_id).await?;
        Ok((to_amount, balances))
    }

    /// Resolve a rate, cache-first, promoting any miss to a full-table
    /// refresh so subsequent pairs hit the cache.
    async fn resolve_rate(&self, from: Currency, to: Currency) -> Result<Decimal, WalletError> {
        if let Some(rate) = self.rates.get_pair(from, to) {
            debug!(from = %from, to = %to, rate = %rate, "using cached exchange rate");
            return Ok(rate);
        }

        debug!(from = %from, to = %to, "cache miss, refreshing full rate table");
        let rates = self.rate_client.get_all_rates().await?;
        let rate = rates.get(&Currency::pair_key(from, to)).copied();
        self.rates.set(rates);

        rate.ok_or_else(|| wallet_sdk::client::RateError::NotFound { from, to }.into())
    }

    /// One attempt at the atomic exchange transaction.
    async fn execute_exchange(
        &self,
        user_id: i64,
        from: Currency,
        to: Currency,
        from_amount: Decimal,
        to_amount: Decimal,
        rate: Decimal,
    ) -> Result<(), WalletError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        let mut tp = TransactionProcessor { tx };

        // Lock both rows in ascending currency-code order so two opposite
        // exchanges by the same user cannot deadlock.
        let (first, second) = lock_order(from, to);
        let first_amount = tp
            .process(LockBalance {
                user_id,
                currency: first,
            })
            .await?
            .ok_or(WalletError::MissingBalance {
                user_id,
                currency: first,
            })?;
        let second_amount = tp
            .process(LockBalance {
                user_id,
                currency: second,
            })
            .await?
            .ok_or(WalletError::MissingBalance {
                user_id,
                currency: second,
            })?;

        let available = if first == from {
            first_amount
        } else {
            second_amount
        };
        if available < from_amount {
            return Err(WalletError::InsufficientFunds {
                available,
                requested: from_amount,
            });
        }

        tp.process(ApplyBalanceDelta {
            user_id,
            currency: from,
            delta: -from_amount,
        })
        .await?;
        tp.process(ApplyBalanceDelta {
            user_id,
            currency: to,
            delta: to_amount,
        })
        .await?;
        tp.process(InsertCompletedTransaction {
            user_id,
            kind: TransferKind::Exchange,
            from,
            to,
            from_amount,
            to_amount,
            rate,
        })
        .await?;

        tp.tx.commit().await?;
        Ok(())
    }
}

/// Reject non-positive amounts.
fn validate_amount(amount: Decimal) -> Result<(), WalletError> {
    if amount <= Decimal::ZERO {
        return Err(WalletError::InvalidAmount);
    }
    Ok(())
}

/// The canonical row-locking order: ascending currency code.
fn lock_order(a: Currency, b: Currency) -> (Currency, Currency) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Credited amount of an exchange, at the store's scale.
fn exchanged_amount(amount: Decimal, rate: Decimal) -> Decimal {
    (amount * rate).round_dp(AMOUNT_SCALE)
}

/// Randomized backoff before a serialization retry, growing with the
/// attempt number.
fn retry_backoff(attempt: u32) -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(10..50);
    Duration::from_millis(u64::from(attempt) * jitter_ms)
}

async fn hash_password(password: String) -> Result<String, WalletError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|_| WalletError::PasswordHash)
    })
    .await
    .map_err(|_| WalletError::PasswordHash)?
}

async fn verify_password(password: String, hash: String) -> Result<bool, WalletError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash).map_err(|_| WalletError::PasswordHash)?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|_| WalletError::PasswordHash)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_negative_amounts_are_rejected() {
        assert!(matches!(
            validate_amount(Decimal::ZERO),
            Err(WalletError::InvalidAmount)
        ));
        assert!(matches!(
            validate_amount(Decimal::from(-5)),
            Err(WalletError::InvalidAmount)
        ));
        assert!(validate_amount(Decimal::new(1, 8)).is_ok());
    }

    #[test]
    fn lock_order_is_ascending_by_code() {
        assert_eq!(
            lock_order(Currency::USD, Currency::EUR),
            (Currency::EUR, Currency::USD)
        );
        assert_eq!(
            lock_order(Currency::EUR, Currency::USD),
            (Currency::EUR, Currency::USD)
        );
        assert_eq!(
            lock_order(Currency::RUB, Currency::USD),
            (Currency::RUB, Currency::USD)
        );
        assert_eq!(
            lock_order(Currency::EUR, Currency::RUB),
            (Currency::EUR, Currency::RUB)
        );
    }

    #[test]
    fn exchanged_amount_rounds_to_store_scale() {
        // 100 * 0.92 = 92 exactly
        assert_eq!(
            exchanged_amount(Decimal::from(100), Decimal::new(92, 2)),
            Decimal::from(92)
        );
        // 1 / 3 style rates round at 8 fractional digits
        let rate = Decimal::new(333_333_333_333, 12); // 0.333333333333
        let result = exchanged_amount(Decimal::from(1), rate);
        assert_eq!(result, Decimal::new(33_333_333, 8)); // 0.33333333
        assert!(result.scale() <= AMOUNT_SCALE);
    }

    #[test]
    fn retry_backoff_grows_with_attempts_and_stays_small() {
        for attempt in 1..=SERIALIZATION_RETRIES {
            let backoff = retry_backoff(attempt);
            assert!(backoff >= Duration::from_millis(u64::from(attempt) * 10));
            assert!(backoff < Duration::from_millis(u64::from(attempt) * 50));
        }
    }

    #[tokio::test]
    async fn password_hash_round_trip() {
        let hash = hash_password("pw12345".to_string()).await.unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("pw12345".to_string(), hash.clone())
            .await
            .unwrap());
        assert!(!verify_password("wrong".to_string(), hash).await.unwrap());
    }
}
