//! Long-lived background tasks: the adapter polling fleet, the recompute
//! sweep, the alert/heartbeat ticks and the database downsampler. Each runs
//! independently and shares nothing but the store and the snapshot cache.

pub mod downsampler;
pub mod poller;
pub mod pollers;

pub use downsampler::{Downsampler, DownsamplerConfig};
pub use poller::{spawn, PollTask, WARMUP_DELAY};
pub use pollers::{
    filter_top_by_volume, AccountPoller, AlertTick, FundingPoller, HeartbeatTick, HedgePoller,
    RecomputeSweep, SpotPoller, TOP_N_LIMIT,
};
