//! Maintenance loop.
//!
//! Prunes snapshot caches and old wind samples, and fails PENDING routes
//! that no job will ever finish.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::broadcast;
use tokio::time::interval;

use crate::state::AppState;

const LOOP_NAME: &str = "maintenance";
const CACHE_MAX_ENTRIES: usize = 256;
const CACHE_MAX_AGE: Duration = Duration::from_secs(6 * 3600);
const STALE_PENDING_REASON: &str = "abandoned while pending";

/// What one maintenance pass cleaned up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub cache_entries: usize,
    pub wind_samples: u64,
    pub stale_routes: u64,
}

pub async fn run_maintenance_loop(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(state.config().maintenance_interval);
    state.mark_loop_heartbeat(LOOP_NAME);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Maintenance loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                state.mark_loop_heartbeat(LOOP_NAME);
                let report = run_maintenance(&state, Utc::now()).await;
                if report != MaintenanceReport::default() {
                    tracing::info!(
                        "Maintenance removed {} cache entries, {} wind samples, {} stale routes",
                        report.cache_entries,
                        report.wind_samples,
                        report.stale_routes
                    );
                }
            }
        }
    }
}

pub async fn run_maintenance(state: &AppState, now: DateTime<Utc>) -> MaintenanceReport {
    let mut report = MaintenanceReport {
        cache_entries: state.snapshots().prune(CACHE_MAX_ENTRIES, CACHE_MAX_AGE),
        ..MaintenanceReport::default()
    };

    let retention = ChronoDuration::hours(state.config().wind_retention_hours.max(0));
    match state.repo().prune_wind(now - retention).await {
        Ok(removed) => {
            report.wind_samples = removed;
            if removed > 0 {
                state.snapshots().invalidate_wind();
            }
        }
        Err(err) => tracing::warn!("Wind prune failed: {:#}", err),
    }

    // Anything PENDING for longer than a job may run was left behind by a crash.
    let cutoff = match ChronoDuration::from_std(state.config().job_timeout) {
        Ok(timeout) => now - timeout,
        Err(err) => {
            tracing::warn!("Invalid job timeout for stale sweep: {}", err);
            return report;
        }
    };
    match state
        .repo()
        .fail_stale_pending(cutoff, STALE_PENDING_REASON)
        .await
    {
        Ok(failed) => report.stale_routes = failed,
        Err(err) => tracing::warn!("Stale PENDING sweep failed: {:#}", err),
    }

    report
}
