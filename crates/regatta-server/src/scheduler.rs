//! Route job scheduler.
//!
//! One in-flight computation per `(plan, route type)`. The in-flight table maps
//! each key to a single shared handle, so a second request for a busy key just
//! clones the handle and awaits the same outcome. Every job moves its route
//! row PENDING -> DONE or PENDING -> FAILED; the scheduler never retries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use thiserror::Error;

use regatta_core::{
    last_rounded, CancelFlag, ConstantSpeed, LegGraph, LegId, LegPricer, Plan, PlanId, RouteId,
    RoutePlan, RouteStatus, RouteType, Router, RoutingError, WindAwarePricer, WindVector,
    Waypoint,
};

use crate::config::Config;
use crate::persistence::{CompletedRoute, NewRoute, Repository, RouteRecord};
use crate::snapshot::SnapshotCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct JobKey {
    pub plan_id: PlanId,
    pub route_type: RouteType,
}

impl JobKey {
    pub fn new(plan_id: PlanId, route_type: RouteType) -> Self {
        Self {
            plan_id,
            route_type,
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "plan {} {}", self.plan_id, self.route_type.as_str())
    }
}

/// Why a job ended FAILED. The display text is stored as the route's
/// failure reason.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobFailure {
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("computation exceeded its {0:?} budget")]
    Timeout(Duration),
    #[error("{0} not found")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("superseded by a newer request")]
    Superseded,
    #[error("job aborted: {0}")]
    Aborted(String),
}

pub type JobOutcome = Result<RouteRecord, JobFailure>;

pub type JobHandle = Shared<BoxFuture<'static, JobOutcome>>;

/// Tunables for route jobs.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub timeout: Duration,
    pub shortest_speed_mps: f64,
    pub min_speed_mps: f64,
    pub fallback_wind: Option<WindVector>,
}

impl From<&Config> for JobSettings {
    fn from(config: &Config) -> Self {
        Self {
            timeout: config.job_timeout,
            shortest_speed_mps: config.shortest_speed_mps(),
            min_speed_mps: config.min_boat_speed_mps(),
            fallback_wind: config.default_wind,
        }
    }
}

struct InFlight {
    job_id: u64,
    started_at: DateTime<Utc>,
    cancel: CancelFlag,
    handle: JobHandle,
}

/// Public view of an in-flight job.
#[derive(Debug, Clone, Serialize)]
pub struct InFlightJob {
    pub key: JobKey,
    pub job_id: u64,
    pub started_at: DateTime<Utc>,
}

struct Inner {
    repo: Arc<dyn Repository>,
    snapshots: Arc<SnapshotCache>,
    settings: JobSettings,
    in_flight: DashMap<JobKey, InFlight>,
    next_job_id: AtomicU64,
    executions: AtomicU64,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// What a job asks the router to do.
enum Work {
    Search,
    Price(Vec<LegId>),
}

struct Computed {
    plan: RoutePlan,
    wind_revision: Option<DateTime<Utc>>,
    polar_fetch: Option<DateTime<Utc>>,
}

impl Scheduler {
    pub fn new(
        repo: Arc<dyn Repository>,
        snapshots: Arc<SnapshotCache>,
        settings: JobSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repo,
                snapshots,
                settings,
                in_flight: DashMap::new(),
                next_job_id: AtomicU64::new(1),
                executions: AtomicU64::new(0),
            }),
        }
    }

    /// Start a job for `key`, or join the one already running.
    ///
    /// Never blocks; the returned handle resolves to the job's outcome.
    pub fn submit(&self, key: JobKey) -> JobHandle {
        match self.inner.in_flight.entry(key) {
            Entry::Occupied(existing) => {
                tracing::debug!(
                    "Coalesced request for {} into job {}",
                    key,
                    existing.get().job_id
                );
                existing.get().handle.clone()
            }
            Entry::Vacant(slot) => {
                let job = Inner::spawn(&self.inner, key);
                let handle = job.handle.clone();
                slot.insert(job);
                handle
            }
        }
    }

    /// Submit and wait for the outcome.
    pub async fn request(&self, key: JobKey) -> JobOutcome {
        self.submit(key).await
    }

    /// Cancel whatever is running for `key` and start a fresh job.
    pub fn supersede(&self, key: JobKey) -> JobHandle {
        // Spawn while holding the entry so the new job cannot finish and
        // deregister before it is registered.
        match self.inner.in_flight.entry(key) {
            Entry::Occupied(mut existing) => {
                let job = Inner::spawn(&self.inner, key);
                let handle = job.handle.clone();
                let previous = existing.insert(job);
                tracing::info!("Superseding job {} for {}", previous.job_id, key);
                previous.cancel.cancel();
                handle
            }
            Entry::Vacant(slot) => {
                let job = Inner::spawn(&self.inner, key);
                let handle = job.handle.clone();
                slot.insert(job);
                handle
            }
        }
    }

    pub fn in_flight(&self, key: JobKey) -> Option<InFlightJob> {
        self.inner.in_flight.get(&key).map(|job| InFlightJob {
            key,
            job_id: job.job_id,
            started_at: job.started_at,
        })
    }

    pub fn in_flight_jobs(&self) -> Vec<InFlightJob> {
        let mut jobs: Vec<InFlightJob> = self
            .inner
            .in_flight
            .iter()
            .map(|entry| InFlightJob {
                key: *entry.key(),
                job_id: entry.job_id,
                started_at: entry.started_at,
            })
            .collect();
        jobs.sort_by_key(|job| job.job_id);
        jobs
    }

    /// Number of router runs started so far.
    pub fn executions(&self) -> u64 {
        self.inner.executions.load(Ordering::SeqCst)
    }

    /// Ask every running job to stop at its next search step.
    pub fn cancel_all(&self) {
        for entry in self.inner.in_flight.iter() {
            entry.cancel.cancel();
        }
    }
}

impl Inner {
    fn spawn(this: &Arc<Inner>, key: JobKey) -> InFlight {
        let job_id = this.next_job_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancelFlag::new();
        let inner = this.clone();
        let job_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let outcome = inner.run(key, job_id, &job_cancel).await;
            inner
                .in_flight
                .remove_if(&key, |_, running| running.job_id == job_id);
            outcome
        });

        let handle = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(err) => Err(JobFailure::Aborted(err.to_string())),
            }
        }
        .boxed()
        .shared();

        InFlight {
            job_id,
            started_at: Utc::now(),
            cancel,
            handle,
        }
    }

    async fn run(&self, key: JobKey, job_id: u64, cancel: &CancelFlag) -> JobOutcome {
        let plan = match self.repo.load_plan(key.plan_id).await {
            Ok(Some(plan)) => plan,
            Ok(None) => return Err(JobFailure::NotFound(format!("plan {}", key.plan_id))),
            Err(err) => return Err(JobFailure::Storage(format!("{:#}", err))),
        };

        let origin = self.origin(key, &plan, Utc::now()).await;
        let route_id = self
            .repo
            .create_pending_route(&NewRoute {
                plan_id: plan.id,
                route_type: key.route_type,
                start_buoy_id: origin.buoy,
                end_buoy_id: plan.end_buoy_id,
                created_at: Utc::now(),
            })
            .await
            .map_err(|err| JobFailure::Storage(format!("{:#}", err)))?;
        tracing::info!("Job {} for {}: route {} PENDING", job_id, key, route_id);

        let budget = self.settings.timeout;
        let result = match tokio::time::timeout(budget, self.compute(key, &plan, origin, cancel))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                Err(JobFailure::Timeout(budget))
            }
        };

        match result {
            Ok(computed) => {
                let completed = CompletedRoute {
                    plan: computed.plan,
                    wind_revision: computed.wind_revision,
                    polar_fetch: computed.polar_fetch,
                    completed_at: Utc::now(),
                };
                match self.repo.complete_route(route_id, &completed).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(
                            "Job {} for {}: route {} was no longer PENDING, result dropped",
                            job_id,
                            key,
                            route_id
                        );
                        return Err(JobFailure::Timeout(budget));
                    }
                    Err(err) => {
                        let failure = JobFailure::Storage(format!("{:#}", err));
                        self.record_failure(key, job_id, route_id, &failure).await;
                        return Err(failure);
                    }
                }
                tracing::info!(
                    "Job {} for {}: route {} DONE ({} legs, {:.0}s)",
                    job_id,
                    key,
                    route_id,
                    completed.plan.legs.len(),
                    completed.plan.total_seconds
                );
                match self
                    .repo
                    .latest_route(key.plan_id, key.route_type, Some(RouteStatus::Done))
                    .await
                {
                    Ok(Some(record)) if record.id == route_id => Ok(record),
                    Ok(_) => Ok(completed_record(route_id, key, &plan, completed)),
                    Err(err) => {
                        tracing::warn!("Job {} for {}: reload failed: {:#}", job_id, key, err);
                        Ok(completed_record(route_id, key, &plan, completed))
                    }
                }
            }
            Err(failure) => {
                self.record_failure(key, job_id, route_id, &failure).await;
                Err(failure)
            }
        }
    }

    async fn record_failure(
        &self,
        key: JobKey,
        job_id: u64,
        route_id: RouteId,
        failure: &JobFailure,
    ) {
        tracing::warn!(
            "Job {} for {}: route {} FAILED: {}",
            job_id,
            key,
            route_id,
            failure
        );
        if let Err(err) = self
            .repo
            .fail_route(route_id, &failure.to_string(), Utc::now())
            .await
        {
            tracing::error!(
                "Job {} for {}: could not mark route {} FAILED: {:#}",
                job_id,
                key,
                route_id,
                err
            );
        }
    }

    /// Where the computation departs from.
    ///
    /// Every route starts at the plan's start buoy at its start time, except
    /// a GENERATED recompute during the race: that one continues from the
    /// last buoy the boat has rounded on the current DONE route, so the time
    /// already raced is kept.
    async fn origin(&self, key: JobKey, plan: &Plan, now: DateTime<Utc>) -> Waypoint {
        let start = Waypoint {
            buoy: plan.start_buoy_id,
            at: plan.start_time,
        };
        if key.route_type != RouteType::Generated || plan.start_time > now {
            return start;
        }

        let current = match self
            .repo
            .latest_route(plan.id, RouteType::Generated, Some(RouteStatus::Done))
            .await
        {
            Ok(Some(route)) if route.end_buoy_id == plan.end_buoy_id => route,
            Ok(_) => return start,
            Err(err) => {
                tracing::warn!("Plan {}: could not load current route: {:#}", plan.id, err);
                return start;
            }
        };
        let Some((departure, _)) = current.timing() else {
            return start;
        };
        let graph = match self.snapshots.graph(plan.map_id).await {
            Ok((_, graph)) => graph,
            Err(err) => {
                tracing::warn!("Plan {}: no graph to resume from: {}", plan.id, err);
                return start;
            }
        };

        let reached = last_rounded(&graph, current.start_buoy_id, departure, &current.legs, now);
        if reached.buoy != plan.start_buoy_id {
            tracing::debug!(
                "Plan {}: resuming {} from buoy {} rounded at {}",
                plan.id,
                key,
                reached.buoy,
                reached.at
            );
        }
        reached
    }

    async fn compute(
        &self,
        key: JobKey,
        plan: &Plan,
        origin: Waypoint,
        cancel: &CancelFlag,
    ) -> Result<Computed, JobFailure> {
        let departure = origin.at;
        let (map, graph) = self.snapshots.graph(plan.map_id).await?;

        let work = match key.route_type {
            RouteType::Generated | RouteType::Shortest => Work::Search,
            RouteType::User => {
                let user_route = self
                    .repo
                    .latest_route(plan.id, RouteType::User, Some(RouteStatus::Done))
                    .await
                    .map_err(|err| JobFailure::Storage(format!("{:#}", err)))?
                    .ok_or_else(|| JobFailure::NotFound(format!("user route for plan {}", plan.id)))?;
                Work::Price(user_route.leg_ids())
            }
        };

        if key.route_type == RouteType::Shortest {
            let pricer = ConstantSpeed {
                speed_mps: self.settings.shortest_speed_mps,
            };
            let routed = self
                .execute(graph, pricer, plan, origin, work, cancel)
                .await?;
            return Ok(Computed {
                plan: routed,
                wind_revision: None,
                polar_fetch: None,
            });
        }

        let polar = self.snapshots.polar(plan.ship_id).await?;
        let wind = self.snapshots.wind(&map, departure).await?;
        let pricer = WindAwarePricer {
            wind: wind.field,
            polar: polar.model,
            fallback_wind: self.settings.fallback_wind,
            min_speed_mps: self.settings.min_speed_mps,
        };
        let routed = self
            .execute(graph, pricer, plan, origin, work, cancel)
            .await?;
        Ok(Computed {
            plan: routed,
            wind_revision: wind.revision,
            polar_fetch: polar.fetched,
        })
    }

    /// Run the router on the blocking pool against owned snapshots.
    async fn execute<P>(
        &self,
        graph: Arc<LegGraph>,
        pricer: P,
        plan: &Plan,
        origin: Waypoint,
        work: Work,
        cancel: &CancelFlag,
    ) -> Result<RoutePlan, JobFailure>
    where
        P: LegPricer + 'static,
    {
        if cancel.is_cancelled() {
            return Err(JobFailure::Superseded);
        }
        self.executions.fetch_add(1, Ordering::SeqCst);

        let (start, end, departure) = (origin.buoy, plan.end_buoy_id, origin.at);
        let cancel = cancel.clone();
        let routed = tokio::task::spawn_blocking(move || {
            let router = Router::new(graph.as_ref(), &pricer);
            match work {
                Work::Search => router.route(start, end, departure, &cancel),
                Work::Price(legs) => router.price_path(start, end, departure, &legs),
            }
        })
        .await
        .map_err(|err| JobFailure::Aborted(err.to_string()))?;

        routed.map_err(|err| match err {
            RoutingError::Cancelled => JobFailure::Superseded,
            other => JobFailure::Routing(other),
        })
    }
}

fn completed_record(
    route_id: RouteId,
    key: JobKey,
    plan: &Plan,
    completed: CompletedRoute,
) -> RouteRecord {
    RouteRecord {
        id: route_id,
        plan_id: plan.id,
        route_type: key.route_type,
        status: RouteStatus::Done,
        start_buoy_id: completed.plan.start_buoy_id,
        end_buoy_id: plan.end_buoy_id,
        departure: Some(completed.plan.departure),
        total_seconds: Some(completed.plan.total_seconds),
        wind_revision: completed.wind_revision,
        polar_fetch: completed.polar_fetch,
        failure_reason: None,
        created_at: completed.completed_at,
        completed_at: Some(completed.completed_at),
        legs: completed.plan.legs,
    }
}
