//! Directory maintenance task
//!
//! One loop on the fast tick drives lookups and floodfill publication; the
//! slow cycle (save, lease set pruning, rescoring and pool rebuild) runs when
//! its own interval has elapsed. A failing cycle is logged and the loop goes
//! on; only the shutdown signal stops it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::directory::NetworkDirectory;

/// An action due once per interval, checked on every tick
struct PeriodicAction {
    interval: Duration,
    last: Instant,
}

impl PeriodicAction {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    fn due(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}

/// Spawn the maintenance loop
pub(crate) fn spawn(
    directory: Arc<NetworkDirectory>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let config = directory.config().clone();
        info!(
            tick_ms = config.tick_interval.as_millis() as u64,
            save_secs = config.save_interval.as_secs(),
            "Directory maintenance started"
        );

        let mut interval = tokio::time::interval(config.tick_interval);
        let mut floodfill = PeriodicAction::new(config.floodfill_interval);
        let mut slow = PeriodicAction::new(config.save_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Directory maintenance shutting down");
                    break;
                }
                _ = interval.tick() => {
                    directory.dispatch_lookups();

                    if floodfill.due() {
                        directory.run_floodfill().await;
                    }

                    if slow.due() {
                        run_slow_cycle(&directory).await;
                    }
                }
            }
        }

        let dir = directory.clone();
        match tokio::task::spawn_blocking(move || dir.save()).await {
            Ok(Ok(_)) => debug!("Final directory save complete"),
            Ok(Err(e)) => error!(error = %e, "Final directory save failed"),
            Err(e) => error!(error = %e, "Final directory save panicked"),
        }
    })
}

async fn run_slow_cycle(directory: &Arc<NetworkDirectory>) {
    let dir = directory.clone();
    match tokio::task::spawn_blocking(move || dir.run_maintenance()).await {
        Ok(Ok(summary)) => debug!(
            expired = summary.expired,
            peers_written = summary.peers.created + summary.peers.updated,
            reputations_written = summary.reputation.created + summary.reputation.updated,
            "Directory maintenance cycle complete"
        ),
        Ok(Err(e)) => warn!(error = %e, "Directory maintenance cycle failed"),
        Err(e) => warn!(error = %e, "Directory maintenance cycle panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_periodic_action_fires_once_per_interval() {
        let mut action = PeriodicAction::new(Duration::from_secs(5));
        assert!(!action.due());
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!action.due());
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(action.due());
        assert!(!action.due());
    }
}
