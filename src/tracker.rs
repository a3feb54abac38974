//! Last-known exchange rates for a fixed set of currency pairs.
//!
//! A [`RateTracker`] is built without touching the network. [`RateTracker::start`]
//! spawns the feed and REST work onto the current tokio runtime and hands back a
//! [`TrackerHandle`]; cancelling or dropping the handle stops every pending and
//! future request. Reads stay available on the tracker after that and keep
//! returning the last-known values.
//!
//! Rates are written from two unordered sources: the one-shot ticker snapshot
//! and the live feed. Whichever lands last wins for a given key, so a slow
//! snapshot can overwrite a fresher live price.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, trace, warn};

use crate::error::RatesError;
use crate::exchange::Exchange;
use crate::model::{
    CurrencyInfo, CurrentRates, FeedEvent, SnapshotEntry, SnapshotKeys, Ticker,
    rewrite_separator,
};

const FEED_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct RateTracker {
    inner: Arc<Inner>,
}

struct Inner {
    currencies: Vec<String>,
    interest: HashSet<String>,
    separator: String,
    snapshot_keys: SnapshotKeys,
    book: RwLock<RateBook>,
}

#[derive(Debug, Default)]
struct RateBook {
    rates: HashMap<String, f64>,
    supported: Vec<String>,
    /// The feed session is up; the snapshot may still be outstanding.
    session_up: bool,
    /// Session up and snapshot applied.
    live: bool,
}

/// Owns the tracker's background work. Dropping it cancels that work.
pub struct TrackerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    _guard: DropGuard,
}

impl TrackerHandle {
    /// Stop the background work without waiting for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel and wait up to `grace` for the background tasks to wind down.
    ///
    /// Returns `false` if they were still running when `grace` ran out.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.cancel();
        tokio::time::timeout(grace, self.task).await.is_ok()
    }
}

impl RateTracker {
    /// Track `currencies` (native pair identifiers such as `BTC_ETH`), publishing
    /// live-feed keys with `separator` in place of the native delimiter.
    pub fn new(currencies: Vec<String>, separator: impl Into<String>) -> Self {
        Self::with_options(currencies, separator, SnapshotKeys::default())
    }

    pub fn with_options(
        currencies: Vec<String>,
        separator: impl Into<String>,
        snapshot_keys: SnapshotKeys,
    ) -> Self {
        let interest = currencies.iter().cloned().collect();
        Self {
            inner: Arc::new(Inner {
                currencies,
                interest,
                separator: separator.into(),
                snapshot_keys,
                book: RwLock::new(RateBook::default()),
            }),
        }
    }

    pub fn currencies(&self) -> &[String] {
        &self.inner.currencies
    }

    pub fn separator(&self) -> &str {
        &self.inner.separator
    }

    /// Spawn the currency listing fetch and the live feed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, exchange: Arc<dyn Exchange>) -> TrackerHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.clone().run(exchange, cancel.clone()));
        TrackerHandle {
            _guard: cancel.clone().drop_guard(),
            cancel,
            task,
        }
    }

    /// Currencies the exchange listed as active, empty until the listing arrives.
    pub fn supported_currencies(&self) -> Vec<String> {
        self.read().supported.clone()
    }

    pub fn current_rates(&self) -> CurrentRates {
        let book = self.read();
        if book.live {
            CurrentRates {
                error: None,
                rates: Some(book.rates.clone()),
            }
        } else {
            CurrentRates {
                error: Some(RatesError::NotConnected),
                rates: (!book.rates.is_empty()).then(|| book.rates.clone()),
            }
        }
    }

    pub fn is_live(&self) -> bool {
        self.read().live
    }

    async fn run(self, exchange: Arc<dyn Exchange>, cancel: CancellationToken) {
        let (tx, mut rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let mut tasks = JoinSet::new();

        tasks.spawn(
            self.clone()
                .populate_supported_currencies(Arc::clone(&exchange), cancel.clone()),
        );

        {
            let exchange = Arc::clone(&exchange);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                if let Err(e) = exchange.subscribe_ticker(tx.clone(), cancel).await {
                    warn!(exchange = %exchange.kind(), error = ?e, "ticker feed failed");
                }
                let _ = tx.send(FeedEvent::Closed).await;
            });
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(exchange = %exchange.kind(), "rate tracker cancelled");
                    break;
                }
                event = rx.recv() => match event {
                    None => break,
                    Some(FeedEvent::Opened) => {
                        self.mark_session_up();
                        tasks.spawn(self.clone().load_snapshot(Arc::clone(&exchange), cancel.clone()));
                    }
                    Some(FeedEvent::Ticker(ticker)) => self.apply_ticker(&ticker),
                    Some(FeedEvent::Closed) => {
                        self.mark_closed();
                        warn!(exchange = %exchange.kind(), "ticker feed closed; rates are now stale");
                    }
                },
            }
        }

        // However the loop ended, the session is gone.
        self.mark_closed();

        // Unblock a feed task stuck on a full channel.
        drop(rx);
        while tasks.join_next().await.is_some() {}
    }

    async fn populate_supported_currencies(
        self,
        exchange: Arc<dyn Exchange>,
        cancel: CancellationToken,
    ) {
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = exchange.fetch_currencies() => result,
        };

        match result {
            Ok(listing) => {
                let count = self.apply_currency_listing(&listing);
                info!(exchange = %exchange.kind(), supported = count, "supported currencies loaded");
            }
            Err(e) => {
                warn!(exchange = %exchange.kind(), error = ?e, "currency listing fetch failed");
            }
        }
    }

    async fn load_snapshot(self, exchange: Arc<dyn Exchange>, cancel: CancellationToken) {
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = exchange.fetch_ticker_snapshot() => result,
        };

        match result {
            Ok(snapshot) => self.apply_snapshot(&snapshot),
            Err(e) => {
                warn!(exchange = %exchange.kind(), error = ?e, "ticker snapshot fetch failed; rates stay offline");
            }
        }
    }

    fn apply_currency_listing(&self, listing: &BTreeMap<String, CurrencyInfo>) -> usize {
        let supported: Vec<String> = listing
            .iter()
            .filter(|(_, info)| info.is_listed())
            .map(|(currency, _)| currency.clone())
            .collect();
        let count = supported.len();
        self.write().supported = supported;
        count
    }

    fn apply_snapshot(&self, snapshot: &HashMap<String, SnapshotEntry>) {
        let mut book = self.write();
        for pair in &self.inner.currencies {
            let Some(entry) = snapshot.get(pair) else {
                warn!(pair = %pair, "pair missing from ticker snapshot");
                continue;
            };
            match entry.last.parse::<f64>() {
                Ok(rate) => {
                    book.rates.insert(self.snapshot_key(pair), rate);
                }
                Err(e) => warn!(pair = %pair, last = %entry.last, error = %e, "unparsable snapshot price"),
            }
        }

        if book.session_up {
            book.live = true;
            info!(pairs = book.rates.len(), "initial snapshot applied, rates are live");
        } else {
            debug!("snapshot arrived after the feed closed");
        }
    }

    fn apply_ticker(&self, ticker: &Ticker) {
        if !self.inner.interest.contains(&ticker.pair) {
            return;
        }
        let key = rewrite_separator(&ticker.pair, &self.inner.separator);
        trace!(pair = %key, price = ticker.price, "rate updated");
        self.write().rates.insert(key, ticker.price);
    }

    fn mark_session_up(&self) {
        self.write().session_up = true;
    }

    fn mark_closed(&self) {
        let mut book = self.write();
        book.session_up = false;
        book.live = false;
    }

    fn snapshot_key(&self, pair: &str) -> String {
        match self.inner.snapshot_keys {
            SnapshotKeys::Native => pair.to_owned(),
            SnapshotKeys::Separated => rewrite_separator(pair, &self.inner.separator),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RateBook> {
        self.inner.book.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RateBook> {
        self.inner.book.write().unwrap_or_else(PoisonError::into_inner)
    }
}
