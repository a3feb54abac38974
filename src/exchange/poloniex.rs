use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ExchangeConfig;
use crate::error::ExchangeError;
use crate::exchange::Exchange;
use crate::model::{CurrencyInfo, ExchangeKind, FeedEvent, SnapshotEntry, Ticker};
use crate::wamp::{self, WampMessage};

pub const POLONIEX_REST_URL: &str = "https://poloniex.com/public";
pub const POLONIEX_WS_URL: &str = "wss://api.poloniex.com";
pub const POLONIEX_REALM: &str = "realm1";
pub const POLONIEX_TICKER_TOPIC: &str = "ticker";

const WS_PING_INTERVAL_SECS: u64 = 60;
/// Only one subscription is ever made per session.
const SUBSCRIBE_REQUEST_ID: u64 = 1;

pub struct PoloniexExchange {
    client: reqwest::Client,
    rest_url: String,
    ws_url: String,
    realm: String,
    topic: String,
}

impl PoloniexExchange {
    pub fn new(config: &ExchangeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            rest_url: config.rest_url.clone(),
            ws_url: config.ws_url.clone(),
            realm: config.realm.clone(),
            topic: config.topic.clone(),
        }
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        command: &str,
    ) -> Result<T, Report<ExchangeError>> {
        let response = self
            .client
            .get(&self.rest_url)
            .query(&[("command", command)])
            .send()
            .await
            .change_context(ExchangeError::Request {
                exchange: "poloniex".into(),
            })
            .attach_with(|| format!("command: {command}"))?;

        if !response.status().is_success() {
            return Err(Report::new(ExchangeError::Request {
                exchange: "poloniex".into(),
            })
            .attach(format!("HTTP status: {}", response.status()))
            .attach(format!("command: {command}")));
        }

        response
            .json()
            .await
            .change_context(ExchangeError::ResponseParse {
                exchange: "poloniex".into(),
            })
            .attach_with(|| format!("command: {command}"))
    }

    async fn run_ticker_ws(
        &self,
        tx: &mpsc::Sender<FeedEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), Report<ExchangeError>> {
        let mut request = self
            .ws_url
            .as_str()
            .into_client_request()
            .change_context(ExchangeError::Connection {
                exchange: "poloniex".into(),
            })
            .attach_with(|| format!("url: {}", self.ws_url))?;
        request.headers_mut().insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(wamp::SUBPROTOCOL),
        );

        let (ws_stream, _) = connect_async(request)
            .await
            .change_context(ExchangeError::Connection {
                exchange: "poloniex".into(),
            })
            .attach_with(|| format!("url: {}", self.ws_url))?;

        let (mut write, mut read) = ws_stream.split();

        let hello = WampMessage::Hello {
            realm: self.realm.clone(),
        };
        write
            .send(Message::Text(hello.encode().into()))
            .await
            .change_context(ExchangeError::Connection {
                exchange: "poloniex".into(),
            })?;

        let mut subscription: Option<u64> = None;
        let mut ping_timer = tokio::time::interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        ping_timer.tick().await; // skip immediate first tick

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("poloniex ticker ws cancelled");
                    let goodbye = WampMessage::Goodbye { reason: wamp::CLOSE_NORMAL.into() };
                    let _ = write.send(Message::Text(goodbye.encode().into())).await;
                    let _ = write.close().await;
                    break;
                }
                _ = ping_timer.tick() => {
                    write.send(Message::Ping(vec![].into())).await
                        .change_context(ExchangeError::Connection { exchange: "poloniex".into() })?;
                }
                msg = read.next() => {
                    let text = match msg {
                        None => break,
                        Some(Err(e)) => return Err(Report::new(e)
                            .change_context(ExchangeError::Connection {
                                exchange: "poloniex".into(),
                            })),
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => {
                            info!(frame = ?frame, "poloniex ticker ws closed by server");
                            break;
                        }
                        Some(Ok(_)) => continue,
                    };

                    let message = match WampMessage::decode(text.as_str()) {
                        Ok(m) => m,
                        Err(e) => {
                            warn!(error = ?e, "poloniex feed message ignored");
                            continue;
                        }
                    };

                    match message {
                        WampMessage::Welcome { session } => {
                            info!(session, realm = %self.realm, "poloniex session established");
                            if tx.send(FeedEvent::Opened).await.is_err() {
                                break;
                            }
                            let subscribe = WampMessage::Subscribe {
                                request: SUBSCRIBE_REQUEST_ID,
                                topic: self.topic.clone(),
                            };
                            write.send(Message::Text(subscribe.encode().into())).await
                                .change_context(ExchangeError::Connection { exchange: "poloniex".into() })?;
                        }
                        WampMessage::Subscribed { request: SUBSCRIBE_REQUEST_ID, subscription: id } => {
                            info!(topic = %self.topic, subscription = id, "poloniex ticker subscribed");
                            subscription = Some(id);
                        }
                        WampMessage::Event { subscription: id, args, .. } if subscription == Some(id) => {
                            if let Some(ticker) = parse_ticker_args(&args) {
                                if tx.send(FeedEvent::Ticker(ticker)).await.is_err() {
                                    break;
                                }
                            }
                        }
                        WampMessage::Abort { reason } => {
                            return Err(Report::new(ExchangeError::Protocol {
                                exchange: "poloniex".into(),
                            })
                            .attach(format!("session aborted: {reason}")));
                        }
                        WampMessage::Error {
                            request_type: wamp::SUBSCRIBE,
                            request: SUBSCRIBE_REQUEST_ID,
                            error,
                        } => {
                            return Err(Report::new(ExchangeError::Protocol {
                                exchange: "poloniex".into(),
                            })
                            .attach(format!("subscribe to {} rejected: {error}", self.topic)));
                        }
                        WampMessage::Goodbye { reason } => {
                            info!(reason = %reason, "poloniex session ended by server");
                            let reply = WampMessage::Goodbye { reason: "wamp.close.goodbye_and_out".into() };
                            let _ = write.send(Message::Text(reply.encode().into())).await;
                            break;
                        }
                        other => debug!(message = ?other, "poloniex feed message skipped"),
                    }
                }
            }
        }

        Ok(())
    }
}

impl Default for PoloniexExchange {
    fn default() -> Self {
        Self::new(&ExchangeConfig::default())
    }
}

impl Exchange for PoloniexExchange {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Poloniex
    }

    fn fetch_currencies(
        &self,
    ) -> BoxFuture<'_, Result<BTreeMap<String, CurrencyInfo>, Report<ExchangeError>>> {
        Box::pin(async move {
            let listing: BTreeMap<String, CurrencyInfo> =
                self.public_get("returnCurrencies").await?;
            info!(count = listing.len(), "poloniex currency listing fetched");
            Ok(listing)
        })
    }

    fn fetch_ticker_snapshot(
        &self,
    ) -> BoxFuture<'_, Result<HashMap<String, SnapshotEntry>, Report<ExchangeError>>> {
        Box::pin(async move {
            let snapshot: HashMap<String, SnapshotEntry> = self.public_get("returnTicker").await?;
            info!(pairs = snapshot.len(), "poloniex ticker snapshot fetched");
            Ok(snapshot)
        })
    }

    fn subscribe_ticker(
        &self,
        tx: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), Report<ExchangeError>>> {
        Box::pin(async move { self.run_ticker_ws(&tx, &cancel).await })
    }
}

/// Ticker event args are positional: `[pair, last, lowestAsk, highestBid, ...]`.
fn parse_ticker_args(args: &[Value]) -> Option<Ticker> {
    let pair = args.first()?.as_str()?;
    let price = match args.get(1)? {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };

    match price {
        Some(price) => Some(Ticker {
            pair: pair.to_owned(),
            price,
        }),
        None => {
            debug!(pair, raw = ?args.get(1), "poloniex ticker price unparsable");
            None
        }
    }
}
