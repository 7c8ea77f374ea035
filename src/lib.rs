//! Watchtower backend: observability and alerting hub for crypto trading
//! venues. Polls exchange funding/spot/account data into an append-only
//! SQLite time-series, evaluates user-authored formulas over it, and raises
//! tiered push notifications when conditions are sustained.

pub mod alerts;
pub mod api;
pub mod cache;
pub mod config;
pub mod errors;
pub mod formula;
pub mod models;
pub mod scrapers;
pub mod store;
pub mod tasks;
