//! Shared fixture: a three-buoy course with a steady easterly.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};

use regatta_core::{
    BoundingBox, Buoy, Leg, LegId, MapId, MapTopology, Plan, PlanId, PlanStatus, RaceMap, RouteId,
    RouteStatus, RouteType, Ship, ShipId, WindSample,
};
use regatta_server::persistence::{
    CompletedRoute, MemoryRepository, NewRoute, Repository, RouteRecord,
};

pub const A: i64 = 1;
pub const B: i64 = 2;
pub const C: i64 = 3;
pub const AB: LegId = 10;
pub const BC: LegId = 11;
pub const AC: LegId = 12;

pub const PLAN: PlanId = 100;
pub const REVERSE_PLAN: PlanId = 101;
pub const SHIP: ShipId = 7;

/// Nearly dead in the water head to wind, fast on a reach.
pub const POLAR: &str = "twa/tws;0;10;20\n0;0.1;0.1;0.1\n40;4;5;6\n90;5;6;7\n180;4;5;6";

/// Race start, one hour out so the departure instant is deterministic.
pub fn race_start() -> DateTime<Utc> {
    (Utc::now() + ChronoDuration::hours(1))
        .duration_trunc(ChronoDuration::seconds(1))
        .unwrap_or_else(|_| Utc::now() + ChronoDuration::hours(1))
}

/// Race start `ago` in the past, so routing happens mid-race.
pub fn started_race(ago: ChronoDuration) -> DateTime<Utc> {
    let now = Utc::now();
    now.duration_trunc(ChronoDuration::seconds(1)).unwrap_or(now) - ago
}

pub fn plan(id: PlanId, start: i64, end: i64, start_time: DateTime<Utc>) -> Plan {
    Plan {
        id,
        name: format!("plan {}", id),
        owner_id: 1,
        map_id: 1,
        ship_id: SHIP,
        start_buoy_id: start,
        end_buoy_id: end,
        start_time,
        race_seconds_remaining: None,
        status: PlanStatus::Active,
    }
}

pub fn ship(polar: &str, fetched: DateTime<Utc>) -> Ship {
    Ship {
        id: SHIP,
        name: "Wave".to_string(),
        polar: polar.to_string(),
        last_fetch_of_polar_data: Some(fetched),
    }
}

/// Uniform easterly, blowing straight down the A->C leg.
pub fn easterly(at: DateTime<Utc>, speed: f64) -> Vec<WindSample> {
    let mut samples = Vec::new();
    for lat in [-1.0, 1.0] {
        for lng in [-1.0, 1.0] {
            samples.push(WindSample {
                timestamp: at,
                lat,
                lng,
                u: -speed,
                v: 0.0,
            });
        }
    }
    samples
}

/// A at the origin, C due east, B north-east between them. All legs one-way.
pub async fn course(start_time: DateTime<Utc>) -> Arc<MemoryRepository> {
    let repo = Arc::new(MemoryRepository::new());
    repo.put_map(RaceMap {
        id: 1,
        name: "Bay".to_string(),
        lat1: -1.0,
        lng1: -1.0,
        lat2: 1.0,
        lng2: 1.0,
        is_locked: true,
        updated_at: start_time - ChronoDuration::days(1),
    });
    for (id, lat, lng) in [(A, 0.0, 0.0), (B, 0.05, 0.05), (C, 0.0, 0.1)] {
        repo.put_buoy(Buoy {
            id,
            map_id: 1,
            name: format!("buoy {}", id),
            lat,
            lng,
        });
    }
    for (id, start, end) in [(AB, A, B), (BC, B, C), (AC, A, C)] {
        repo.put_leg(Leg {
            id,
            map_id: 1,
            start_buoy_id: start,
            end_buoy_id: end,
        });
    }
    repo.put_ship(ship(POLAR, start_time - ChronoDuration::days(1)));
    repo.put_plan(plan(PLAN, A, C, start_time));
    // Not live, so the race clock leaves it alone.
    repo.put_plan(Plan {
        status: PlanStatus::Draft,
        ..plan(REVERSE_PLAN, C, A, start_time)
    });
    repo.upsert_wind(&easterly(start_time, 10.0), Utc::now())
        .await
        .expect("seed wind");
    repo
}

/// Delegating repository whose wind revision lookups can be slowed down.
pub struct SlowRepository {
    pub inner: Arc<MemoryRepository>,
    delay_ms: AtomicU64,
}

impl SlowRepository {
    pub fn new(inner: Arc<MemoryRepository>) -> Self {
        Self {
            inner,
            delay_ms: AtomicU64::new(0),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn pause(&self) {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

#[async_trait]
impl Repository for SlowRepository {
    async fn health_check(&self) -> Result<bool> {
        self.inner.health_check().await
    }

    async fn load_map(&self, map_id: MapId) -> Result<Option<RaceMap>> {
        self.inner.load_map(map_id).await
    }

    async fn load_map_topology(&self, map_id: MapId) -> Result<Option<MapTopology>> {
        self.inner.load_map_topology(map_id).await
    }

    async fn load_ship(&self, ship_id: ShipId) -> Result<Option<Ship>> {
        self.inner.load_ship(ship_id).await
    }

    async fn load_plan(&self, plan_id: PlanId) -> Result<Option<Plan>> {
        self.inner.load_plan(plan_id).await
    }

    async fn list_active_plans(&self) -> Result<Vec<Plan>> {
        self.inner.list_active_plans().await
    }

    async fn tick_plan(
        &self,
        plan_id: PlanId,
        remaining_secs: i64,
        status: PlanStatus,
    ) -> Result<()> {
        self.inner.tick_plan(plan_id, remaining_secs, status).await
    }

    async fn load_wind_window(
        &self,
        bounds: &BoundingBox,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<WindSample>> {
        self.inner.load_wind_window(bounds, from, to).await
    }

    async fn wind_revision(
        &self,
        bounds: &BoundingBox,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        self.pause().await;
        self.inner.wind_revision(bounds, from, to).await
    }

    async fn upsert_wind(
        &self,
        samples: &[WindSample],
        ingested_at: DateTime<Utc>,
    ) -> Result<usize> {
        self.inner.upsert_wind(samples, ingested_at).await
    }

    async fn prune_wind(&self, older_than: DateTime<Utc>) -> Result<u64> {
        self.inner.prune_wind(older_than).await
    }

    async fn create_pending_route(&self, route: &NewRoute) -> Result<RouteId> {
        self.inner.create_pending_route(route).await
    }

    async fn complete_route(&self, route_id: RouteId, result: &CompletedRoute) -> Result<bool> {
        self.inner.complete_route(route_id, result).await
    }

    async fn fail_route(
        &self,
        route_id: RouteId,
        reason: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner.fail_route(route_id, reason, failed_at).await
    }

    async fn fail_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<u64> {
        self.inner.fail_stale_pending(created_before, reason).await
    }

    async fn latest_route(
        &self,
        plan_id: PlanId,
        route_type: RouteType,
        status: Option<RouteStatus>,
    ) -> Result<Option<RouteRecord>> {
        self.inner.latest_route(plan_id, route_type, status).await
    }
}
