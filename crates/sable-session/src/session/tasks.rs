//! Background tasks of a session
//!
//! Both tasks hold only a weak reference, so dropping the last handle to a
//! session stops them as surely as the shutdown signal does.

use std::sync::Weak;

use sable_core::DirectoryEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::DestinationSession;

/// Spawn the idle loop: tunnel and remote cleanup, lease set pushes,
/// flushing, and the periodic status line
pub(super) fn spawn_idle(
    session: Weak<DestinationSession>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (idle_interval, status_interval) = match session.upgrade() {
            Some(session) => {
                let config = session.config.read();
                (config.idle_interval, config.status_interval)
            }
            None => return,
        };
        let mut interval = tokio::time::interval(idle_interval);
        let mut last_status = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = interval.tick() => {
                    let Some(session) = session.upgrade() else {
                        break;
                    };
                    if session.is_terminated() {
                        break;
                    }
                    session.run_idle().await;
                    if last_status.elapsed() >= status_interval {
                        last_status = Instant::now();
                        session.log_status();
                    }
                }
            }
        }
        debug!("Session idle loop stopped");
    })
}

/// Spawn the listener that flushes buffered messages when the directory
/// reports a lease set
pub(super) fn spawn_listener(
    session: Weak<DestinationSession>,
    mut events: broadcast::Receiver<DirectoryEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                event = events.recv() => {
                    let Some(session) = session.upgrade() else {
                        break;
                    };
                    if session.is_terminated() {
                        break;
                    }
                    match event {
                        Ok(event) => session.directory_event(event).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Session fell behind directory events");
                            session.flush_ready().await;
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
        debug!("Session directory listener stopped");
    })
}
