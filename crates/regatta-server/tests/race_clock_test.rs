mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use regatta_core::{PlanStatus, RouteStatus, RouteType};
use regatta_server::config::{Config, StorageMode};
use regatta_server::loops::maintenance_loop::run_maintenance;
use regatta_server::loops::race_clock_loop::tick_plans;
use regatta_server::persistence::{MemoryRepository, NewRoute, Repository, RouteRecord};
use regatta_server::scheduler::JobKey;
use regatta_server::state::AppState;

use common::*;

fn config() -> Config {
    Config {
        storage: StorageMode::Memory,
        job_timeout: Duration::from_secs(3600),
        ..Config::default()
    }
}

async fn setup() -> (Arc<MemoryRepository>, Arc<AppState>, DateTime<Utc>) {
    let start = race_start();
    let repo = course(start).await;
    let state = Arc::new(AppState::new(config(), repo.clone()));
    (repo, state, start)
}

/// Wait for whatever the clock submitted for `key` and return the latest
/// route for it if that route is DONE.
async fn finish_clock_job(state: &Arc<AppState>, key: JobKey) -> Option<RouteRecord> {
    if state.scheduler().in_flight(key).is_some() {
        let _ = state.scheduler().submit(key).await;
    }
    // Let the clock's watcher observe the outcome too.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    state
        .repo()
        .latest_route(key.plan_id, key.route_type, None)
        .await
        .unwrap()
        .filter(|route| route.status == RouteStatus::Done)
}

async fn remaining(repo: &MemoryRepository) -> (Option<i64>, PlanStatus) {
    let plan = repo.load_plan(PLAN).await.unwrap().unwrap();
    (plan.race_seconds_remaining, plan.status)
}

#[tokio::test]
async fn countdown_is_monotonic_and_arrives() {
    let (repo, state, start) = setup().await;
    let key = JobKey::new(PLAN, RouteType::Generated);

    // No route yet: the clock asks for one and leaves the countdown alone.
    tick_plans(&state, start).await;
    assert_eq!(remaining(&repo).await.0, None);
    let route = finish_clock_job(&state, key).await.expect("route");
    let (departure, total) = route.timing().unwrap();
    assert_eq!(departure, start);

    tick_plans(&state, start + ChronoDuration::seconds(100)).await;
    let expected = (total - 100.0).ceil() as i64;
    assert_eq!(remaining(&repo).await, (Some(expected), PlanStatus::Active));

    // A tick that reads an earlier clock never raises the countdown.
    tick_plans(&state, start + ChronoDuration::seconds(40)).await;
    assert_eq!(remaining(&repo).await.0, Some(expected));

    tick_plans(&state, start + ChronoDuration::seconds(total.ceil() as i64 + 1)).await;
    assert_eq!(remaining(&repo).await, (Some(0), PlanStatus::Arrived));

    // Arrived plans are no longer ticked and the fresh route was never recomputed.
    tick_plans(&state, start + ChronoDuration::seconds(total.ceil() as i64 + 60)).await;
    assert_eq!(remaining(&repo).await, (Some(0), PlanStatus::Arrived));
    assert_eq!(state.scheduler().executions(), 1);
    assert!(state.scheduler().in_flight_jobs().is_empty());
}

#[tokio::test]
async fn failed_recompute_keeps_last_done_countdown() {
    let (repo, state, start) = setup().await;
    let key = JobKey::new(PLAN, RouteType::Generated);

    tick_plans(&state, start).await;
    let done = finish_clock_job(&state, key).await.expect("route");
    let (_, total) = done.timing().unwrap();
    tick_plans(&state, start + ChronoDuration::seconds(10)).await;

    // A polar refresh with corrupt data makes the route stale and the recompute fail.
    repo.put_ship(ship("not a polar", Utc::now()));
    tick_plans(&state, start + ChronoDuration::seconds(20)).await;
    assert!(finish_clock_job(&state, key).await.is_none());
    assert_eq!(state.job_failures(&key), 1);

    let latest = repo.latest_route(PLAN, RouteType::Generated, None).await.unwrap().unwrap();
    assert_eq!(latest.status, RouteStatus::Failed);
    assert!(latest.failure_reason.unwrap().contains("invalid polar data"));

    // The countdown continues from the DONE route; the retry waits for its backoff.
    tick_plans(&state, start + ChronoDuration::seconds(30)).await;
    assert_eq!(
        remaining(&repo).await,
        (Some((total - 30.0).ceil() as i64), PlanStatus::Active)
    );
    assert!(state.scheduler().in_flight(key).is_none());
}

#[tokio::test]
async fn new_wind_triggers_recompute() {
    let (repo, state, start) = setup().await;
    let key = JobKey::new(PLAN, RouteType::Generated);

    tick_plans(&state, start).await;
    let first = finish_clock_job(&state, key).await.expect("route");

    tokio::time::sleep(Duration::from_millis(5)).await;
    state.ingest_wind(&easterly(start, 4.0)).await.unwrap();
    tick_plans(&state, start + ChronoDuration::seconds(5)).await;

    let second = finish_clock_job(&state, key).await.expect("recomputed route");
    assert!(second.id > first.id);
    assert!(second.wind_revision > first.wind_revision);

    // The new route is fresh, so the next tick does not ask again.
    tick_plans(&state, start + ChronoDuration::seconds(6)).await;
    assert!(state.scheduler().in_flight(key).is_none());
    assert_eq!(
        repo.latest_route(PLAN, RouteType::Generated, Some(RouteStatus::Done))
            .await
            .unwrap()
            .unwrap()
            .id,
        second.id
    );
}

#[tokio::test]
async fn recompute_mid_race_keeps_counting_down() {
    // The course takes well over an hour; the boat should be past B by now.
    let start = started_race(ChronoDuration::seconds(3000));
    let repo = course(start).await;
    let state = Arc::new(AppState::new(config(), repo.clone()));
    let key = JobKey::new(PLAN, RouteType::Generated);

    tick_plans(&state, start + ChronoDuration::seconds(3000)).await;
    let first = finish_clock_job(&state, key).await.expect("route");
    assert_eq!(first.start_buoy_id, A);
    assert_eq!(first.leg_ids(), vec![AB, BC]);
    let (departure, total) = first.timing().unwrap();
    assert_eq!(departure, start);
    assert!(total > 3600.0, "course too short: {total}");

    // Routed after the gun: the time already raced is not on the clock.
    tick_plans(&state, start + ChronoDuration::seconds(3000)).await;
    let before = remaining(&repo).await.0.unwrap();
    assert_eq!(before, (total - 3000.0).ceil() as i64);

    tokio::time::sleep(Duration::from_millis(5)).await;
    state.ingest_wind(&easterly(start, 10.0)).await.unwrap();
    tick_plans(&state, start + ChronoDuration::seconds(3000)).await;
    let second = finish_clock_job(&state, key).await.expect("recomputed route");
    assert!(second.id > first.id);

    // The recompute continues from B, rounded when the first route said.
    let rounded_b = start
        + ChronoDuration::milliseconds((first.legs[0].duration_s * 1000.0).round() as i64);
    assert_eq!(second.start_buoy_id, B);
    assert_eq!(second.leg_ids(), vec![BC]);
    assert_eq!(second.departure, Some(rounded_b));

    let mut previous = before;
    for secs in [3300, 3600, 3900] {
        tick_plans(&state, start + ChronoDuration::seconds(secs)).await;
        let (now_remaining, status) = remaining(&repo).await;
        let now_remaining = now_remaining.unwrap();
        assert_eq!(status, PlanStatus::Active);
        assert!(
            now_remaining < previous && previous - now_remaining >= 299,
            "countdown stalled at {now_remaining} after {previous}"
        );
        previous = now_remaining;
    }
}

#[tokio::test]
async fn drawn_user_route_is_priced_when_nothing_else_exists() {
    let (repo, state, start) = setup().await;
    repo.insert_user_route(PLAN, A, C, &[AB, BC], Utc::now());

    tick_plans(&state, start).await;
    let priced = finish_clock_job(&state, JobKey::new(PLAN, RouteType::User))
        .await
        .expect("priced user route");
    assert!(priced.timing().is_some());
    finish_clock_job(&state, JobKey::new(PLAN, RouteType::Generated))
        .await
        .expect("generated route");
}

#[tokio::test]
async fn maintenance_fails_abandoned_pending_routes() {
    let (repo, state, _) = setup().await;
    let abandoned = repo
        .create_pending_route(&NewRoute {
            plan_id: PLAN,
            route_type: RouteType::Generated,
            start_buoy_id: A,
            end_buoy_id: C,
            created_at: Utc::now() - ChronoDuration::hours(2),
        })
        .await
        .unwrap();

    let report = run_maintenance(&state, Utc::now()).await;
    assert_eq!(report.stale_routes, 1);

    let latest = repo.latest_route(PLAN, RouteType::Generated, None).await.unwrap().unwrap();
    assert_eq!(latest.id, abandoned);
    assert_eq!(latest.status, RouteStatus::Failed);
}
