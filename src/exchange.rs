pub mod poloniex;

use std::collections::{BTreeMap, HashMap};

use error_stack::Report;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ExchangeError;
use crate::model::{CurrencyInfo, ExchangeKind, FeedEvent, SnapshotEntry};

/// Abstraction over a cryptocurrency exchange's public market data.
///
/// Uses `BoxFuture` (from `futures` crate) instead of `async fn` in trait
/// to keep the trait object-safe (`dyn Exchange`).
pub trait Exchange: Send + Sync {
    fn kind(&self) -> ExchangeKind;

    /// Fetch every currency the exchange knows about, keyed by identifier.
    fn fetch_currencies(
        &self,
    ) -> BoxFuture<'_, Result<BTreeMap<String, CurrencyInfo>, Report<ExchangeError>>>;

    /// Fetch the current ticker for every pair, keyed by native pair identifier.
    fn fetch_ticker_snapshot(
        &self,
    ) -> BoxFuture<'_, Result<HashMap<String, SnapshotEntry>, Report<ExchangeError>>>;

    /// Hold the real-time ticker feed open.
    ///
    /// Sends `FeedEvent::Opened` once the session is up, then one
    /// `FeedEvent::Ticker` per price push, until the feed ends or `cancel` is
    /// triggered. Does not reconnect.
    fn subscribe_ticker(
        &self,
        tx: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), Report<ExchangeError>>>;
}
