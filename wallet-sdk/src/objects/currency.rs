use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A currency code outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported currency code: {0}")]
pub struct UnknownCurrency(pub String);

/// One of the three currencies a wallet holds a balance in.
///
/// The set is closed: every user gets exactly one balance row per variant,
/// created at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    USD,
    EUR,
    RUB,
}

impl Currency {
    /// All supported currencies.
    pub const ALL: [Currency; 3] = [Currency::USD, Currency::EUR, Currency::RUB];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::RUB => "RUB",
        }
    }

    /// Composite key of an ordered rate pair, e.g. `"USD_EUR"`.
    pub fn pair_key(from: Currency, to: Currency) -> String {
        format!("{}_{}", from.as_str(), to.as_str())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = UnknownCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "RUB" => Ok(Currency::RUB),
            other => Err(UnknownCurrency(other.to_string())),
        }
    }
}

// Ordered by code so that iteration and row locking follow ascending
// currency-code order everywhere.
impl Ord for Currency {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl PartialOrd for Currency {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format_round_trip() {
        for currency in Currency::ALL {
            assert_eq!(currency.as_str().parse::<Currency>().unwrap(), currency);
        }
    }

    #[test]
    fn rejects_unknown_codes() {
        assert_eq!(
            "GBP".parse::<Currency>(),
            Err(UnknownCurrency("GBP".to_string()))
        );
        assert!("usd".parse::<Currency>().is_err());
        assert!("".parse::<Currency>().is_err());
    }

    #[test]
    fn pair_key_format() {
        assert_eq!(Currency::pair_key(Currency::USD, Currency::EUR), "USD_EUR");
        assert_eq!(Currency::pair_key(Currency::RUB, Currency::USD), "RUB_USD");
    }

    #[test]
    fn ordering_follows_currency_code() {
        let mut codes = Currency::ALL;
        codes.sort();
        assert_eq!(codes, [Currency::EUR, Currency::RUB, Currency::USD]);
    }

    #[test]
    fn serializes_as_bare_code() {
        assert_eq!(serde_json::to_string(&Currency::EUR).unwrap(), "\"EUR\"");
    }
}
