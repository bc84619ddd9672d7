//! Race clock loop.
//!
//! Counts down every active plan from its selected DONE route and asks the
//! scheduler for fresh routes when the current one is missing or stale. The
//! loop never awaits a route computation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};

use regatta_core::{
    advance, staleness, Plan, PlanStatus, RouteStatus, RouteType, Staleness,
};

use crate::persistence::RouteRecord;
use crate::scheduler::{JobFailure, JobKey};
use crate::state::AppState;

const LOOP_NAME: &str = "race-clock";

pub async fn run_race_clock_loop(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(state.config().clock_tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    state.mark_loop_heartbeat(LOOP_NAME);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Race clock loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                state.mark_loop_heartbeat(LOOP_NAME);
                tick_plans(&state, Utc::now()).await;
            }
        }
    }
}

/// Run one clock tick over every active plan.
pub async fn tick_plans(state: &Arc<AppState>, now: DateTime<Utc>) {
    let plans = match state.repo().list_active_plans().await {
        Ok(plans) => plans,
        Err(err) => {
            tracing::warn!("Race clock failed to list plans: {:#}", err);
            return;
        }
    };

    for plan in plans {
        if let Err(err) = tick_plan(state, &plan, now).await {
            tracing::warn!("Race clock tick for plan {} failed: {:#}", plan.id, err);
        }
    }
}

async fn tick_plan(state: &Arc<AppState>, plan: &Plan, now: DateTime<Utc>) -> anyhow::Result<()> {
    let repo = state.repo();
    let generated = repo
        .latest_route(plan.id, RouteType::Generated, Some(RouteStatus::Done))
        .await?;
    let user = repo
        .latest_route(plan.id, RouteType::User, Some(RouteStatus::Done))
        .await?;

    let selected = generated
        .iter()
        .chain(user.iter())
        .find(|route| route.timing().is_some());

    let Some(route) = selected else {
        // A drawn but never priced user route gets priced alongside the search.
        if user.is_some() {
            request(state, JobKey::new(plan.id, RouteType::User), false);
        }
        request(state, JobKey::new(plan.id, RouteType::Generated), false);
        return Ok(());
    };
    let Some((departure, total_seconds)) = route.timing() else {
        return Ok(());
    };

    let elapsed = (now - departure).num_milliseconds() as f64 / 1000.0;
    let tick = advance(plan.race_seconds_remaining, total_seconds, elapsed);
    let status = if tick.arrived {
        PlanStatus::Arrived
    } else {
        PlanStatus::Active
    };
    if plan.race_seconds_remaining != Some(tick.remaining_secs) || status != plan.status {
        repo.tick_plan(plan.id, tick.remaining_secs, status).await?;
    }
    if tick.arrived {
        tracing::info!("Plan {} arrived (route {})", plan.id, route.id);
        return Ok(());
    }

    check_staleness(state, plan, route).await
}

async fn check_staleness(
    state: &Arc<AppState>,
    plan: &Plan,
    route: &RouteRecord,
) -> anyhow::Result<()> {
    let Some(departure) = route.departure else {
        return Ok(());
    };
    let Some(map) = state.repo().load_map(plan.map_id).await? else {
        return Ok(());
    };
    let Some(ship) = state.repo().load_ship(plan.ship_id).await? else {
        return Ok(());
    };
    let current_wind = state
        .snapshots()
        .current_wind_revision(&map, departure)
        .await?;

    let verdict = staleness(
        route.wind_revision,
        current_wind,
        route.polar_fetch,
        ship.last_fetch_of_polar_data,
    );
    if !verdict.is_stale() {
        return Ok(());
    }

    let key = JobKey::new(plan.id, RouteType::Generated);
    match state.scheduler().in_flight(key) {
        Some(job) => {
            let outdated = verdict == Staleness::Wind
                && current_wind.map(|rev| rev > job.started_at).unwrap_or(false);
            if outdated {
                tracing::info!(
                    "Wind changed under job {} for {}, superseding",
                    job.job_id,
                    key
                );
                request(state, key, true);
            }
        }
        None => {
            tracing::info!("Route {} for plan {} is stale ({:?})", route.id, plan.id, verdict);
            request(state, key, false);
        }
    }
    Ok(())
}

/// Submit a job unless one is already running or the key is backing off.
///
/// A watcher task feeds the outcome back into the key's backoff.
fn request(state: &Arc<AppState>, key: JobKey, supersede: bool) {
    let scheduler = state.scheduler();
    if !supersede && scheduler.in_flight(key).is_some() {
        return;
    }
    if !state.retry_ready(&key) {
        return;
    }

    tracing::info!("Race clock requesting route for {}", key);
    let handle = if supersede {
        scheduler.supersede(key)
    } else {
        scheduler.submit(key)
    };

    let state = state.clone();
    tokio::spawn(async move {
        match handle.await {
            Ok(record) => {
                tracing::debug!("Route {} ready for {}", record.id, key);
                state.clear_job_failures(&key);
            }
            Err(JobFailure::Superseded) => {}
            Err(err) => {
                let delay = state.record_job_failure(key, &err);
                tracing::warn!("Route job for {} failed ({}), next try in {:?}", key, err, delay);
            }
        }
    });
}
