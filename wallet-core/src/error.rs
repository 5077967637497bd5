//! Error taxonomy of the wallet engine.

use rust_decimal::Decimal;
use thiserror::Error;
use wallet_sdk::client::RateError;
use wallet_sdk::objects::{Currency, UnknownCurrency};

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Everything a wallet engine operation can fail with.
///
/// Validation and business-rule variants map to 400-class responses at the
/// HTTP facade; [`Store`](WalletError::Store) is the 500-class transport
/// bucket. [`SerializationConflict`](WalletError::SerializationConflict) is
/// retried inside the engine and only surfaces once retries are exhausted.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("amount must be positive")]
    InvalidAmount,

    #[error("unsupported currency code: {0}")]
    UnsupportedCurrency(String),

    #[error("from and to currency must differ")]
    SameCurrency,

    #[error("username must not be empty")]
    EmptyUsername,

    #[error("email must not be empty")]
    EmptyEmail,

    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    WeakPassword,

    #[error("username already exists")]
    DuplicateUsername,

    #[error("email already exists")]
    DuplicateEmail,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("user not found")]
    UserNotFound,

    #[error("insufficient funds: have {available}, need {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },

    /// A balance row the schema guarantees is missing. This is a contract
    /// violation, never treated as a zero balance.
    #[error("balance row missing for user {user_id}, currency {currency}")]
    MissingBalance { user_id: i64, currency: Currency },

    #[error("store conflict at serializable isolation")]
    SerializationConflict,

    #[error("store unavailable: {0}")]
    Store(#[source] sqlx::Error),

    #[error(transparent)]
    Rate(#[from] RateError),

    #[error("password hashing failed")]
    PasswordHash,
}

impl WalletError {
    /// Whether the operation as a whole is safe to retry against the store.
    pub fn is_retryable_conflict(&self) -> bool {
        matches!(self, WalletError::SerializationConflict)
    }
}

impl From<UnknownCurrency> for WalletError {
    fn from(err: UnknownCurrency) -> Self {
        WalletError::UnsupportedCurrency(err.0)
    }
}

impl From<sqlx::Error> for WalletError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            // Unique violations carry the constraint that tripped; the
            // engine relies on these instead of a look-before-insert check.
            if db.code().as_deref() == Some("23505") {
                match db.constraint() {
                    Some("users_username_key") => return WalletError::DuplicateUsername,
                    Some("users_email_key") => return WalletError::DuplicateEmail,
                    _ => {}
                }
            }
            // serialization_failure / deadlock_detected
            if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) {
                return WalletError::SerializationConflict;
            }
        }
        WalletError::Store(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_serialization_conflicts_are_retryable() {
        assert!(WalletError::SerializationConflict.is_retryable_conflict());
        assert!(!WalletError::InvalidAmount.is_retryable_conflict());
        assert!(!WalletError::DuplicateUsername.is_retryable_conflict());
        assert!(!WalletError::Store(sqlx::Error::PoolClosed).is_retryable_conflict());
    }

    #[test]
    fn unknown_currency_converts_to_unsupported() {
        let err: WalletError = UnknownCurrency("XAU".to_string()).into();
        assert!(matches!(err, WalletError::UnsupportedCurrency(code) if code == "XAU"));
    }
}
