use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

#[derive(Debug, Display, Error)]
pub enum ExchangeError {
    #[display("failed to connect to {exchange}")]
    Connection { exchange: String },
    #[display("request to {exchange} failed")]
    Request { exchange: String },
    #[display("failed to parse response from {exchange}")]
    ResponseParse { exchange: String },
    #[display("{exchange} feed protocol violation")]
    Protocol { exchange: String },
}

/// Reason a rate read is not live.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum RatesError {
    #[display("connection not yet, or no longer established")]
    NotConnected,
}

#[derive(Debug, Display, Error)]
pub enum WampError {
    #[display("malformed WAMP message: {reason}")]
    Malformed { reason: String },
    #[display("unsupported WAMP message type {code}")]
    Unsupported { code: u64 },
}
