//! Generic poll loop: warm-up delay, fixed interval, per-iteration error
//! isolation and cooperative cancellation within one sleep-wake.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Startup is staggered so the HTTP surface is up before the fleet starts
/// hammering upstreams.
pub const WARMUP_DELAY: Duration = Duration::from_secs(5);

#[async_trait]
pub trait PollTask: Send + Sync + 'static {
    fn name(&self) -> String;
    fn interval(&self) -> Duration;

    /// One iteration. Errors are logged by the loop and never propagate to
    /// sibling pollers.
    async fn tick(&self) -> Result<()>;
}

/// Spawn a task's poll loop onto the tracker.
pub fn spawn(tracker: &TaskTracker, cancel: CancellationToken, task: impl PollTask) {
    tracker.spawn(run_loop(task, cancel));
}

async fn run_loop(task: impl PollTask, cancel: CancellationToken) {
    let name = task.name();

    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = sleep(WARMUP_DELAY) => {}
    }

    info!(task = %name, interval_s = task.interval().as_secs(), "Poller started");

    loop {
        if let Err(e) = task.tick().await {
            warn!(task = %name, error = %e, "Poll iteration failed, retrying next interval");
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(task.interval()) => {}
        }
    }

    info!(task = %name, "Poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FlakyTask {
        ticks: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PollTask for FlakyTask {
        fn name(&self) -> String {
            "flaky".to_string()
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn tick(&self) -> Result<()> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                bail!("transient upstream failure");
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn errors_do_not_stop_the_loop_and_cancel_exits_promptly() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();

        spawn(&tracker, cancel.clone(), FlakyTask { ticks: ticks.clone() });
        tracker.close();

        // Let the warm-up elapse plus a few intervals.
        tokio::time::sleep(WARMUP_DELAY + Duration::from_millis(55)).await;
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 3, "loop should survive failing ticks, saw {seen}");

        cancel.cancel();
        tracker.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_warmup_skips_first_tick() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();

        spawn(&tracker, cancel.clone(), FlakyTask { ticks: ticks.clone() });
        tracker.close();

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        tracker.wait().await;

        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }
}
