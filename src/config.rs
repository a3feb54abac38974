use std::collections::HashSet;
use std::path::Path;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::exchange::poloniex::{
    POLONIEX_REALM, POLONIEX_REST_URL, POLONIEX_TICKER_TOPIC, POLONIEX_WS_URL,
};
use crate::model::{ExchangeKind, NATIVE_SEPARATOR, SnapshotKeys};

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_report_interval_secs() -> u64 {
    10
}

fn default_exchange_name() -> String {
    "poloniex".into()
}

fn default_rest_url() -> String {
    POLONIEX_REST_URL.into()
}

fn default_ws_url() -> String {
    POLONIEX_WS_URL.into()
}

fn default_realm() -> String {
    POLONIEX_REALM.into()
}

fn default_topic() -> String {
    POLONIEX_TICKER_TOPIC.into()
}

fn default_separator() -> String {
    NATIVE_SEPARATOR.to_string()
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    pub tracker: TrackerConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_exchange_name")]
    pub name: String,
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_realm")]
    pub realm: String,
    #[serde(default = "default_topic")]
    pub topic: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            name: default_exchange_name(),
            rest_url: default_rest_url(),
            ws_url: default_ws_url(),
            realm: default_realm(),
            topic: default_topic(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TrackerConfig {
    /// Pairs in the exchange's native format, e.g. `"BTC_ETH"`.
    pub currencies: Vec<String>,
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Store snapshot rates under separator-rewritten keys too.
    #[serde(default)]
    pub normalize_snapshot_keys: bool,
}

impl TrackerConfig {
    pub fn snapshot_keys(&self) -> SnapshotKeys {
        if self.normalize_snapshot_keys {
            SnapshotKeys::Separated
        } else {
            SnapshotKeys::Native
        }
    }
}

/// Load and validate an `AppConfig` from a TOML file at `path`.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    validate(&config)?;

    Ok(config)
}

const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_general(config)?;
    validate_exchange(config)?;
    validate_currencies(config)?;
    Ok(())
}

fn validate_general(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if !VALID_LOG_FORMATS.contains(&config.general.log_format.as_str()) {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "general.log_format \"{}\" is not one of {VALID_LOG_FORMATS:?}",
                config.general.log_format
            ),
        }));
    }
    if config.general.report_interval_secs == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "general.report_interval_secs must be greater than zero".into(),
        }));
    }
    Ok(())
}

fn validate_exchange(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let exchange = &config.exchange;
    if ExchangeKind::from_name(&exchange.name).is_none() {
        return Err(Report::new(ConfigError::Validation {
            field: format!("exchange.name \"{}\" is not a known exchange", exchange.name),
        }));
    }
    if !(exchange.ws_url.starts_with("ws://") || exchange.ws_url.starts_with("wss://")) {
        return Err(Report::new(ConfigError::Validation {
            field: format!("exchange.ws_url \"{}\" is not a WebSocket URL", exchange.ws_url),
        }));
    }
    if !(exchange.rest_url.starts_with("http://") || exchange.rest_url.starts_with("https://")) {
        return Err(Report::new(ConfigError::Validation {
            field: format!("exchange.rest_url \"{}\" is not an HTTP URL", exchange.rest_url),
        }));
    }
    if exchange.realm.is_empty() || exchange.topic.is_empty() {
        return Err(Report::new(ConfigError::Validation {
            field: "exchange.realm and exchange.topic must not be empty".into(),
        }));
    }
    Ok(())
}

fn validate_currencies(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let currencies = &config.tracker.currencies;
    if currencies.is_empty() {
        return Err(Report::new(ConfigError::Validation {
            field: "tracker.currencies must list at least one pair".into(),
        }));
    }

    let mut seen = HashSet::new();
    for pair in currencies {
        if pair.is_empty() {
            return Err(Report::new(ConfigError::Validation {
                field: "tracker.currencies: empty pair".into(),
            }));
        }
        if !seen.insert(pair.as_str()) {
            return Err(Report::new(ConfigError::Validation {
                field: format!("tracker.currencies: duplicate pair \"{pair}\""),
            }));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> AppConfig {
        toml::from_str(toml).expect("parse failed")
    }

    #[test]
    fn valid_full_config_parses() {
        let toml = r#"
[general]
log_level = "debug"
log_format = "json"
report_interval_secs = 30

[exchange]
name = "poloniex"
rest_url = "http://127.0.0.1:8080/public"
ws_url = "ws://127.0.0.1:8080/ws"
realm = "realm2"
topic = "ticker"

[tracker]
currencies = ["BTC_ETH", "BTC_XMR"]
separator = "-"
normalize_snapshot_keys = true
"#;
        let config = parse(toml);
        assert!(validate(&config).is_ok());
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.report_interval_secs, 30);
        assert_eq!(config.exchange.realm, "realm2");
        assert_eq!(config.tracker.currencies, vec!["BTC_ETH", "BTC_XMR"]);
        assert_eq!(config.tracker.separator, "-");
        assert_eq!(config.tracker.snapshot_keys(), SnapshotKeys::Separated);
    }

    #[test]
    fn defaults_applied_when_fields_omitted() {
        let toml = r#"
[tracker]
currencies = ["BTC_ETH"]
"#;
        let config = parse(toml);
        assert!(validate(&config).is_ok());
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "text");
        assert_eq!(config.general.report_interval_secs, 10);
        assert_eq!(config.exchange.name, "poloniex");
        assert_eq!(config.exchange.rest_url, "https://poloniex.com/public");
        assert_eq!(config.exchange.ws_url, "wss://api.poloniex.com");
        assert_eq!(config.exchange.realm, "realm1");
        assert_eq!(config.exchange.topic, "ticker");
        assert_eq!(config.tracker.separator, "_");
        assert_eq!(config.tracker.snapshot_keys(), SnapshotKeys::Native);
    }

    #[test]
    fn missing_tracker_section_fails_to_parse() {
        let result = toml::from_str::<AppConfig>("[general]\n");
        assert!(result.is_err());
    }

    #[test]
    fn empty_currencies_rejected() {
        let config = parse("[tracker]\ncurrencies = []\n");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn duplicate_currencies_rejected() {
        let config = parse("[tracker]\ncurrencies = [\"BTC_ETH\", \"BTC_ETH\"]\n");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn unknown_exchange_rejected() {
        let toml = r#"
[exchange]
name = "kraken"

[tracker]
currencies = ["BTC_ETH"]
"#;
        assert!(validate(&parse(toml)).is_err());
    }

    #[test]
    fn non_websocket_feed_url_rejected() {
        let toml = r#"
[exchange]
ws_url = "https://api.poloniex.com"

[tracker]
currencies = ["BTC_ETH"]
"#;
        assert!(validate(&parse(toml)).is_err());
    }

    #[test]
    fn zero_report_interval_rejected() {
        let toml = r#"
[general]
report_interval_secs = 0

[tracker]
currencies = ["BTC_ETH"]
"#;
        assert!(validate(&parse(toml)).is_err());
    }

    #[test]
    fn unknown_log_format_rejected() {
        let toml = r#"
[general]
log_format = "xml"

[tracker]
currencies = ["BTC_ETH"]
"#;
        assert!(validate(&parse(toml)).is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let report = load(Path::new("/nonexistent/rate-tracker.toml")).unwrap_err();
        assert!(matches!(report.current_context(), ConfigError::ReadFile));
    }
}
