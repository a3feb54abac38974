mod config;
mod error;
mod exchange;
mod model;
mod tracker;
mod wamp;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use exchange::Exchange;
use exchange::poloniex::PoloniexExchange;
use model::ExchangeKind;
use tracker::RateTracker;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("runtime error")]
    Runtime,
}

#[derive(Parser)]
#[command(name = "rate-tracker", about = "Live exchange rate tracker")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    let exchange = build_exchange(&config)?;
    let tracker = RateTracker::with_options(
        config.tracker.currencies.clone(),
        config.tracker.separator.clone(),
        config.tracker.snapshot_keys(),
    );

    info!(
        exchange = %exchange.kind(),
        currencies = ?tracker.currencies(),
        separator = tracker.separator(),
        "starting rate tracker"
    );
    let handle = tracker.start(exchange);

    let mut report_timer =
        tokio::time::interval(Duration::from_secs(config.general.report_interval_secs));
    let mut supported_reported = false;
    let mut ended_reported = false;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.change_context(AppError::Runtime)?;
                break;
            }
            _ = report_timer.tick() => {
                if !supported_reported {
                    supported_reported = report_supported(&tracker);
                }
                report_rates(&tracker);
                if !ended_reported && handle.is_finished() && !tracker.is_live() {
                    warn!("ticker feed has ended and will not reconnect; serving last-known rates");
                    ended_reported = true;
                }
            }
        }
    }

    info!("ctrl+c received, shutting down");
    if !handle.shutdown(SHUTDOWN_GRACE).await {
        warn!("rate tracker did not stop within the grace period");
    }

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

fn build_exchange(config: &AppConfig) -> Result<Arc<dyn Exchange>, Report<AppError>> {
    match ExchangeKind::from_name(&config.exchange.name) {
        Some(ExchangeKind::Poloniex) => Ok(Arc::new(PoloniexExchange::new(&config.exchange))),
        None => Err(Report::new(AppError::Config)
            .attach(format!("unknown exchange: {}", config.exchange.name))),
    }
}

fn report_supported(tracker: &RateTracker) -> bool {
    let supported = tracker.supported_currencies();
    if supported.is_empty() {
        return false;
    }
    info!(count = supported.len(), currencies = ?supported, "exchange supports");
    true
}

fn report_rates(tracker: &RateTracker) {
    let current = tracker.current_rates();
    let rendered = serde_json::to_string(&current).unwrap_or_default();
    match current.error {
        None => info!(rates = %rendered, "current rates"),
        Some(e) => warn!(error = %e, rates = %rendered, "rates not live"),
    }
}
