//! Service state shared by the loops and the HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use regatta_core::WindSample;

use crate::backoff::{RetryPolicy, RetryState};
use crate::config::Config;
use crate::persistence::Repository;
use crate::scheduler::{JobFailure, JobKey, JobSettings, Scheduler};
use crate::snapshot::{SnapshotCache, WindWindowSettings};

#[derive(Debug, Clone, Serialize)]
pub struct RetryInfo {
    pub key: JobKey,
    pub failures: u32,
    pub due: bool,
    pub last_error: Option<String>,
}

pub struct AppState {
    config: Config,
    repo: Arc<dyn Repository>,
    snapshots: Arc<SnapshotCache>,
    scheduler: Scheduler,
    retry_policy: RetryPolicy,
    retry: DashMap<JobKey, RetryState>,
    loop_heartbeats: DashMap<String, DateTime<Utc>>,
}

impl AppState {
    pub fn new(config: Config, repo: Arc<dyn Repository>) -> Self {
        let snapshots = Arc::new(SnapshotCache::new(
            repo.clone(),
            WindWindowSettings::from(&config),
        ));
        let scheduler = Scheduler::new(repo.clone(), snapshots.clone(), JobSettings::from(&config));
        let retry_policy = RetryPolicy::new(config.retry_base, config.retry_max);
        Self {
            config,
            retry_policy,
            repo,
            snapshots,
            scheduler,
            retry: DashMap::new(),
            loop_heartbeats: DashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repo(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    pub fn snapshots(&self) -> &Arc<SnapshotCache> {
        &self.snapshots
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // ========== Retry backoff ==========

    /// Whether the clock may submit a job for `key` right now.
    pub fn retry_ready(&self, key: &JobKey) -> bool {
        self.retry.get(key).map(|state| state.is_due()).unwrap_or(true)
    }

    /// Record a FAILED outcome for `key` and return the wait before the next attempt.
    pub fn record_job_failure(&self, key: JobKey, failure: &JobFailure) -> Duration {
        let salt = (key.plan_id as u64).rotate_left(8) ^ key.route_type as u64;
        let mut state = self
            .retry
            .entry(key)
            .or_insert_with(|| RetryState::new(salt));
        state.record_failure(&self.retry_policy, failure.to_string())
    }

    pub fn clear_job_failures(&self, key: &JobKey) {
        self.retry.remove(key);
    }

    pub fn job_failures(&self, key: &JobKey) -> u32 {
        self.retry.get(key).map(|state| state.failures()).unwrap_or(0)
    }

    /// Keys currently backing off, ordered by key.
    pub fn retries(&self) -> Vec<RetryInfo> {
        let mut retries: Vec<RetryInfo> = self
            .retry
            .iter()
            .map(|entry| RetryInfo {
                key: *entry.key(),
                failures: entry.failures(),
                due: entry.is_due(),
                last_error: entry.last_error().map(str::to_string),
            })
            .collect();
        retries.sort_by_key(|info| (info.key.plan_id, info.key.route_type.as_str()));
        retries
    }

    // ========== Wind ingestion ==========

    /// Store new samples and drop cached wind so later jobs see them.
    pub async fn ingest_wind(&self, samples: &[WindSample]) -> Result<usize> {
        let written = self.repo.upsert_wind(samples, Utc::now()).await?;
        if written > 0 {
            self.snapshots.invalidate_wind();
        }
        tracing::info!("Ingested {} of {} wind samples", written, samples.len());
        Ok(written)
    }

    // ========== Loop health ==========

    pub fn mark_loop_heartbeat(&self, name: &str) {
        self.loop_heartbeats.insert(name.to_string(), Utc::now());
    }

    pub fn loop_heartbeats(&self) -> Vec<(String, DateTime<Utc>)> {
        let mut beats: Vec<(String, DateTime<Utc>)> = self
            .loop_heartbeats
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        beats.sort();
        beats
    }
}
