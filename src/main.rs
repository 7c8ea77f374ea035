//! Watchtower - observability & alerting hub for crypto trading venues.
//!
//! Wires the engine root (store, formula engine, snapshot cache, notifier),
//! spawns the polling fleet and maintenance tasks, and serves the HTTP API
//! until a shutdown signal drains everything.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use watchtower_backend::alerts::{AlertEngine, HeartbeatChecker, Notifier, PushoverNotifier};
use watchtower_backend::api::{self, AppState};
use watchtower_backend::cache::SnapshotCache;
use watchtower_backend::config::Config;
use watchtower_backend::formula::FormulaEngine;
use watchtower_backend::scrapers::{
    alp::AlpHedgeAdapter, aster::AsterAdapter, backpack::BackpackAdapter, binance::BinanceAdapter,
    bybit::BybitAdapter, grvt::GrvtAdapter, hyperliquid::HyperliquidAdapter, jlp::JlpHedgeAdapter,
    jupiter::JupiterAdapter, lighter::LighterAdapter, okx::OkxAdapter, pyth::PythAdapter,
    AccountAdapter, HedgeAdapter, RateAdapter, SpotAdapter,
};
use watchtower_backend::store::Store;
use watchtower_backend::tasks::{
    self, AccountPoller, AlertTick, Downsampler, DownsamplerConfig, FundingPoller, HeartbeatTick,
    HedgePoller, RecomputeSweep, SpotPoller,
};

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_tracing();

    if let Err(e) = run().await {
        error!(error = %e, "Fatal initialization failure");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run() -> Result<()> {
    let config = Config::from_env();
    info!("🚀 Watchtower starting");

    let store = Arc::new(Store::open(&config.database_path)?);
    let formula = Arc::new(FormulaEngine::new(store.clone()));
    let notifier: Arc<dyn Notifier> =
        Arc::new(PushoverNotifier::new(config.pushover_api_token.clone()));
    let alert_engine = Arc::new(AlertEngine::new(
        store.clone(),
        formula.clone(),
        notifier.clone(),
        config.dashboard_url.clone(),
    ));
    let heartbeat_checker = Arc::new(HeartbeatChecker::new(
        store.clone(),
        notifier.clone(),
        config.dashboard_url.clone(),
    ));

    let binance = Arc::new(BinanceAdapter::new());
    let bybit = Arc::new(BybitAdapter::new());
    let lighter = Arc::new(LighterAdapter::new());

    let rate_adapters: Vec<Arc<dyn RateAdapter>> = vec![
        binance.clone(),
        bybit.clone(),
        Arc::new(HyperliquidAdapter::new()),
        lighter.clone(),
        Arc::new(AsterAdapter::new()),
        Arc::new(GrvtAdapter::new()),
        Arc::new(BackpackAdapter::new()),
    ];
    let spot_adapters: Vec<Arc<dyn SpotAdapter>> = vec![
        binance.clone(),
        bybit,
        Arc::new(OkxAdapter::new()),
        Arc::new(JupiterAdapter::new()),
        Arc::new(PythAdapter::new()),
    ];

    let cache = Arc::new(SnapshotCache::new(rate_adapters.clone(), binance));

    let state = AppState {
        store: store.clone(),
        formula: formula.clone(),
        cache,
        webhook_secret: config.webhook_secret.clone(),
    };

    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();

    if config.enable_funding_pollers {
        for adapter in &rate_adapters {
            tasks::spawn(
                &tracker,
                cancel.clone(),
                FundingPoller::new(
                    adapter.clone(),
                    store.clone(),
                    Duration::from_secs(config.funding_interval_s),
                ),
            );
        }
    } else {
        info!("Funding pollers disabled via configuration");
    }

    if config.enable_spot_pollers {
        for adapter in spot_adapters {
            tasks::spawn(
                &tracker,
                cancel.clone(),
                SpotPoller::new(
                    adapter,
                    store.clone(),
                    Duration::from_secs(config.spot_interval_s),
                ),
            );
        }
    } else {
        info!("Spot pollers disabled via configuration");
    }

    if config.enable_account_pollers && !config.lighter_accounts.is_empty() {
        let account_adapter: Arc<dyn AccountAdapter> = lighter;
        tasks::spawn(
            &tracker,
            cancel.clone(),
            AccountPoller::new(
                account_adapter,
                store.clone(),
                config.lighter_accounts.clone(),
                Duration::from_secs(config.account_interval_s),
            ),
        );
    }

    if config.enable_hedge_pollers {
        let hedge_adapters: Vec<(Arc<dyn HedgeAdapter>, f64)> = vec![
            (
                Arc::new(AlpHedgeAdapter::new(&config.solana_rpc_url)),
                config.alp_amount,
            ),
            (
                Arc::new(JlpHedgeAdapter::new(&config.solana_rpc_url)),
                config.jlp_amount,
            ),
        ];
        for (adapter, lp_amount) in hedge_adapters {
            tasks::spawn(
                &tracker,
                cancel.clone(),
                HedgePoller::new(
                    adapter,
                    store.clone(),
                    lp_amount,
                    Duration::from_secs(config.hedge_interval_s),
                ),
            );
        }
    } else {
        info!("Hedge calculators disabled via configuration");
    }

    tasks::spawn(
        &tracker,
        cancel.clone(),
        RecomputeSweep::new(formula, Duration::from_secs(config.recompute_interval_s)),
    );
    tasks::spawn(
        &tracker,
        cancel.clone(),
        AlertTick::new(alert_engine, Duration::from_secs(config.alert_interval_s)),
    );
    tasks::spawn(
        &tracker,
        cancel.clone(),
        HeartbeatTick::new(
            heartbeat_checker,
            Duration::from_secs(config.heartbeat_interval_s),
        ),
    );

    if config.enable_downsampler {
        tasks::spawn(
            &tracker,
            cancel.clone(),
            Downsampler::new(
                store.clone(),
                DownsamplerConfig {
                    interval: Duration::from_secs(config.downsampler_interval_s),
                    ..Default::default()
                },
            ),
        );
    } else {
        info!("Downsampler disabled via configuration");
    }

    let app = api::router(state)
        .layer(cors_layer(&config))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("🎯 API server listening on {}", addr);

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received, draining");
            shutdown_cancel.cancel();
        })
        .await
        .context("Server error")?;

    // Drain: cancel every background task and wait for them to finish their
    // current iteration.
    cancel.cancel();
    tracker.close();
    tracker.wait().await;
    info!("All background tasks drained, exiting");

    Ok(())
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
