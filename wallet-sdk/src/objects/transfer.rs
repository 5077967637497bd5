use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::currency::Currency;

/// The kind of money movement a transfer event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Deposit,
    Withdraw,
    Exchange,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Deposit => "deposit",
            TransferKind::Withdraw => "withdraw",
            TransferKind::Exchange => "exchange",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a record on the `large-transfers` log.
///
/// The message key is [`key()`](TransferEvent::key), so all events of one
/// user land on the same partition and keep their order. For deposits and
/// withdrawals `from_currency == to_currency`; `amount` is denominated in
/// `from_currency` units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub user_id: i64,
    #[serde(rename = "type")]
    pub kind: TransferKind,
    pub from_currency: Currency,
    pub to_currency: Currency,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl TransferEvent {
    /// Partitioning key of the event on the log.
    pub fn key(&self) -> String {
        format!("user_{}", self.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample() -> TransferEvent {
        TransferEvent {
            user_id: 42,
            kind: TransferKind::Exchange,
            from_currency: Currency::USD,
            to_currency: Currency::EUR,
            amount: Decimal::new(4250050, 2),
            timestamp: datetime!(2025-03-01 12:30:45 UTC),
        }
    }

    #[test]
    fn key_embeds_user_id() {
        assert_eq!(sample().key(), "user_42");
    }

    #[test]
    fn json_uses_wire_field_names() {
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&sample()).unwrap()).unwrap();

        assert_eq!(value["user_id"], 42);
        assert_eq!(value["type"], "exchange");
        assert_eq!(value["from_currency"], "USD");
        assert_eq!(value["to_currency"], "EUR");
        assert_eq!(value["amount"], 42500.50);
        assert_eq!(value["timestamp"], "2025-03-01T12:30:45Z");
    }

    #[test]
    fn round_trips_through_json() {
        let event = sample();
        let json = serde_json::to_string(&event).unwrap();
        let decoded: TransferEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TransferKind::Withdraw).unwrap(),
            "\"withdraw\""
        );
        assert_eq!(TransferKind::Deposit.as_str(), "deposit");
    }
}
