//! Environment-derived configuration.
//!
//! Everything is overridable per deployment; defaults match the production
//! cadence (funding every 5 min, spot/accounts every 30 s, downsampler every
//! 2 h). `.env` is loaded by main before this runs.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub cors_origins: Vec<String>,
    /// Shared secret for `POST /webhook/distill?token=…`. Unset means the
    /// webhook is unprotected and the token parameter is ignored.
    pub webhook_secret: Option<String>,
    /// Default Pushover application token, used when a target has none.
    pub pushover_api_token: Option<String>,
    /// Link attached to outgoing notifications.
    pub dashboard_url: Option<String>,

    pub enable_funding_pollers: bool,
    pub enable_spot_pollers: bool,
    pub enable_account_pollers: bool,
    pub enable_hedge_pollers: bool,
    pub enable_downsampler: bool,

    pub funding_interval_s: u64,
    pub spot_interval_s: u64,
    pub account_interval_s: u64,
    pub hedge_interval_s: u64,
    pub recompute_interval_s: u64,
    pub alert_interval_s: u64,
    pub heartbeat_interval_s: u64,
    pub downsampler_interval_s: u64,

    /// On-chain accounts to poll, `label:address` pairs.
    pub lighter_accounts: Vec<AccountRef>,

    /// Solana JSON-RPC endpoint for the hedge calculators.
    pub solana_rpc_url: String,
    /// LP token holdings to hedge; 0 skips the calculation.
    pub alp_amount: f64,
    pub jlp_amount: f64,
}

#[derive(Debug, Clone)]
pub struct AccountRef {
    pub label: String,
    pub address: String,
}

impl Config {
    pub fn from_env() -> Config {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env_parse("PORT", 8000u16);
        let database_path =
            env::var("DATABASE_PATH").unwrap_or_else(|_| "data/watchtower.db".to_string());

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Config {
            host,
            port,
            database_path,
            cors_origins,
            webhook_secret: env_non_empty("WEBHOOK_SECRET"),
            pushover_api_token: env_non_empty("PUSHOVER_API_TOKEN"),
            dashboard_url: env_non_empty("DASHBOARD_URL"),
            // Poller classes run unless explicitly disabled.
            enable_funding_pollers: !env_flag("DISABLE_FUNDING_POLLERS", false),
            enable_spot_pollers: !env_flag("DISABLE_SPOT_POLLERS", false),
            enable_account_pollers: !env_flag("DISABLE_ACCOUNT_POLLERS", false),
            enable_hedge_pollers: !env_flag("DISABLE_HEDGE_POLLERS", false),
            enable_downsampler: !env_flag("DISABLE_DOWNSAMPLER", false),
            funding_interval_s: env_parse("FUNDING_INTERVAL_S", 300),
            spot_interval_s: env_parse("SPOT_INTERVAL_S", 30),
            account_interval_s: env_parse("ACCOUNT_INTERVAL_S", 30),
            hedge_interval_s: env_parse("HEDGE_INTERVAL_S", 60),
            recompute_interval_s: env_parse("RECOMPUTE_INTERVAL_S", 10),
            alert_interval_s: env_parse("ALERT_INTERVAL_S", 30),
            heartbeat_interval_s: env_parse("HEARTBEAT_INTERVAL_S", 30),
            downsampler_interval_s: env_parse("DOWNSAMPLER_INTERVAL_S", 7200),
            lighter_accounts: parse_accounts(&env::var("LIGHTER_ACCOUNTS").unwrap_or_default()),
            solana_rpc_url: env::var("SOLANA_RPC_URL")
                .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".to_string()),
            alp_amount: env_parse("ALP_AMOUNT", 0.0),
            jlp_amount: env_parse("JLP_AMOUNT", 0.0),
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse `label:address,label:address` into account refs. Malformed entries
/// are dropped with a warning rather than aborting startup.
fn parse_accounts(raw: &str) -> Vec<AccountRef> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|entry| match entry.split_once(':') {
            Some((label, address)) if !label.is_empty() && !address.is_empty() => {
                Some(AccountRef {
                    label: label.to_string(),
                    address: address.to_string(),
                })
            }
            _ => {
                tracing::warn!(entry, "Skipping malformed LIGHTER_ACCOUNTS entry");
                None
            }
        })
        .collect()
}
