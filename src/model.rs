use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RatesError;

/// Delimiter the exchange uses between the two legs of a pair (`BTC_ETH`).
pub const NATIVE_SEPARATOR: char = '_';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeKind {
    Poloniex,
}

impl ExchangeKind {
    /// Parse a config-format name into an `ExchangeKind`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "poloniex" => Some(Self::Poloniex),
            _ => None,
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poloniex => write!(f, "poloniex"),
        }
    }
}

/// A single live price push for one pair, still in the exchange's native format.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticker {
    pub pair: String,
    pub price: f64,
}

/// What the live feed reports back to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// The pub/sub session was established.
    Opened,
    Ticker(Ticker),
    /// The feed ended, whether or not it was ever opened.
    Closed,
}

/// One entry of the exchange's currency listing.
#[derive(Debug, Clone, Deserialize)]
pub struct CurrencyInfo {
    #[serde(default)]
    pub delisted: Option<i64>,
}

impl CurrencyInfo {
    pub fn is_listed(&self) -> bool {
        self.delisted == Some(0)
    }
}

/// One entry of the exchange's full ticker snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotEntry {
    pub last: String,
}

/// How keys coming from the initial snapshot are written into the rate map.
///
/// Live ticker events always use the caller's separator. The snapshot has
/// historically stored pairs under their native identifier, so a fresh
/// tracker can hold both `BTC_ETH` and `BTC-ETH` for the same pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotKeys {
    #[default]
    Native,
    Separated,
}

/// Result of a rate read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentRates {
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<RatesError>,
    pub rates: Option<HashMap<String, f64>>,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<RatesError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.collect_str(e),
        None => serializer.serialize_bool(false),
    }
}

/// Swap the first native delimiter in `pair` for `separator`.
pub fn rewrite_separator(pair: &str, separator: &str) -> String {
    pair.replacen(NATIVE_SEPARATOR, separator, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_replaces_native_delimiter() {
        assert_eq!(rewrite_separator("BTC_ETH", "-"), "BTC-ETH");
        assert_eq!(rewrite_separator("BTC_ETH", "/"), "BTC/ETH");
        assert_eq!(rewrite_separator("BTC_ETH", ""), "BTCETH");
    }

    #[test]
    fn rewrite_only_touches_first_delimiter() {
        assert_eq!(rewrite_separator("USDT_BTC_OLD", "-"), "USDT-BTC_OLD");
        assert_eq!(rewrite_separator("BTCETH", "-"), "BTCETH");
    }

    #[test]
    fn currency_listed_only_when_delisted_is_zero() {
        let listing: HashMap<String, CurrencyInfo> = serde_json::from_str(
            r#"{"BTC": {"delisted": 0, "name": "Bitcoin"}, "ETH": {"delisted": 1}, "XYZ": {}}"#,
        )
        .unwrap();
        assert!(listing["BTC"].is_listed());
        assert!(!listing["ETH"].is_listed());
        assert!(!listing["XYZ"].is_listed());
    }

    #[test]
    fn current_rates_serializes_error_as_false_when_live() {
        let live = CurrentRates {
            error: None,
            rates: Some(HashMap::from([("BTC_ETH".to_owned(), 0.05)])),
        };
        let json = serde_json::to_value(&live).unwrap();
        assert_eq!(json["error"], serde_json::Value::Bool(false));
        assert_eq!(json["rates"]["BTC_ETH"], 0.05);

        let stale = CurrentRates {
            error: Some(RatesError::NotConnected),
            rates: None,
        };
        let json = serde_json::to_value(&stale).unwrap();
        assert_eq!(json["error"], "connection not yet, or no longer established");
        assert!(json["rates"].is_null());
    }
}
