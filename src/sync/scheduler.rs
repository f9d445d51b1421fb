use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::models::Board;

use super::engine::SyncEngine;

/// Repeats poll cycles on a fixed cadence.
///
/// After each round over all boards it sleeps for whatever is left of
/// `interval`; if the round took longer than that, it sleeps `fallback`
/// instead.
pub struct Scheduler {
    interval: Duration,
    fallback: Duration,
}

impl Scheduler {
    pub fn new(interval: Duration, fallback: Duration) -> Self {
        Self { interval, fallback }
    }

    pub fn next_delay(&self, elapsed: Duration) -> Duration {
        if elapsed < self.interval {
            self.interval - elapsed
        } else {
            self.fallback
        }
    }

    /// Runs rounds until `cancel` fires. The current cycle is allowed to
    /// finish its in-flight entity before the loop exits.
    pub async fn run(&self, engine: &SyncEngine, boards: &[Board], cancel: &CancellationToken) {
        loop {
            let started = Instant::now();
            for board in boards {
                if cancel.is_cancelled() {
                    break;
                }
                engine.run_cycle(board, cancel).await.log_summary();
            }
            if cancel.is_cancelled() {
                break;
            }

            let elapsed = started.elapsed();
            let delay = self.next_delay(elapsed);
            if elapsed >= self.interval {
                warn!(
                    "Round took {:?}, longer than the {:?} poll interval",
                    elapsed, self.interval
                );
            }
            info!("Waiting {:?} until the next poll", delay);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => break,
            }
        }
        info!("Scheduler stopped");
    }
}
