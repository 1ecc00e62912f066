use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::{ConnectionManager, HealOutcome};

/// Background reconnect loop for one `ConnectionManager`.
/// - wakes on a fixed health interval, or early when a publish saw a dead channel
/// - after a failed dial it sleeps for the backoff delay instead
/// - stops on `request_shutdown()` or once the manager is closed
pub struct ReconnectSupervisor {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReconnectSupervisor {
    pub fn spawn(manager: Arc<ConnectionManager>, health_check_interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            supervise(manager, health_check_interval, shutdown_rx).await;
        });
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // receiver is gone if the loop already exited
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            warn!(error = %e, "reconnect supervisor panicked");
        }
    }
}

async fn supervise(
    manager: Arc<ConnectionManager>,
    health_check_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let queue = manager.topology().queue_name().to_string();
    debug!(queue = %queue, "reconnect supervisor started");
    let mut wait = health_check_interval;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = manager.reconnect_requested() => {}
            _ = tokio::time::sleep(wait) => {}
        }

        wait = match manager.heal().await {
            HealOutcome::Closed => break,
            HealOutcome::Healthy => health_check_interval,
            HealOutcome::Reconnected => {
                info!(queue = %queue, "broker connection restored");
                health_check_interval
            }
            HealOutcome::Failed { retry_in } => {
                debug!(queue = %queue, retry_in_ms = retry_in.as_millis() as u64, "reconnect deferred");
                retry_in
            }
        };
    }

    debug!(queue = %queue, "reconnect supervisor stopped");
}
