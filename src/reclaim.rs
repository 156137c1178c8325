//! Periodic expiry sweep.
//!
//! Optional background companion to `POST /api/admin/cleanup`: the same
//! sweep, run on a timer instead of on demand. One sweep runs at spawn
//! so a backlog left by downtime is reclaimed immediately.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::manager::WebshellManager;

/// Spawn the sweep loop. Failures are logged and the loop keeps going.
pub fn spawn_reclaimer(manager: Arc<WebshellManager>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "expiry reclaimer started");
    tokio::spawn(async move {
        loop {
            sweep_once(&manager).await;
            tokio::time::sleep(interval).await;
        }
    });
}

async fn sweep_once(manager: &WebshellManager) {
    match manager.cleanup_expired().await {
        Ok(report) => {
            if report.cleaned.is_empty() && report.errors.is_empty() {
                debug!("expiry sweep found nothing to reclaim");
            } else {
                info!(
                    cleaned = report.cleaned.len(),
                    errors = report.errors.len(),
                    "expiry sweep finished"
                );
            }
        }
        Err(err) => warn!(error = %err, "expiry sweep failed"),
    }
}
