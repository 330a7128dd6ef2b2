//! Optional background re-resolution of the allow-list.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{AllowListHandle, AllowListSource};

pub const ALLOWLIST_REFRESH_APPLIED: &str = "allowlist_refresh_applied";
pub const ALLOWLIST_REFRESH_FAILED_KEPT_PREVIOUS: &str = "allowlist_refresh_failed_kept_previous";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowListRefreshReport {
    pub members: usize,
    pub reason_code: &'static str,
}

/// Runs one resolution and publishes it. Any failure, timeouts included,
/// keeps the previous snapshot in place.
pub async fn refresh_allowlist_once(
    source: &AllowListSource,
    handle: &AllowListHandle,
) -> AllowListRefreshReport {
    match source.fetch().await {
        Ok(allowlist) => {
            let members = allowlist.len();
            handle.publish(allowlist);
            info!(
                source = source.label(),
                members,
                reason_code = ALLOWLIST_REFRESH_APPLIED,
                "allow-list refreshed"
            );
            AllowListRefreshReport {
                members,
                reason_code: ALLOWLIST_REFRESH_APPLIED,
            }
        }
        Err(error) => {
            let members = handle.len();
            warn!(
                source = source.label(),
                members,
                reason_code = ALLOWLIST_REFRESH_FAILED_KEPT_PREVIOUS,
                error_code = error.reason_code(),
                %error,
                "allow-list refresh failed"
            );
            AllowListRefreshReport {
                members,
                reason_code: ALLOWLIST_REFRESH_FAILED_KEPT_PREVIOUS,
            }
        }
    }
}

#[derive(Debug)]
pub struct AllowListRefreshHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AllowListRefreshHandle {
    pub fn disabled() -> Self {
        Self {
            shutdown_tx: None,
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Starts the refresh loop when `interval` is set. The first refresh fires one
/// full interval after start; startup resolution has already run by then.
pub fn start_allowlist_refresh_runtime(
    source: Arc<AllowListSource>,
    handle: AllowListHandle,
    interval: Option<Duration>,
) -> AllowListRefreshHandle {
    let Some(interval) = interval else {
        return AllowListRefreshHandle::disabled();
    };

    let interval = interval.max(Duration::from_millis(1));
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = refresh_allowlist_once(source.as_ref(), &handle).await;
                }
                _ = &mut shutdown_rx => {
                    break;
                }
            }
        }
    });

    AllowListRefreshHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    }
}
