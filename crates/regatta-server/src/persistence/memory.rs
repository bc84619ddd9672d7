//! In-memory repository.
//!
//! Same contract as the SQLite backend, backed by `DashMap`s. A route's legs
//! live inside its record, so replacing the record is the atomic DONE write.

use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use regatta_core::{
    BoundingBox, Buoy, BuoyId, Leg, LegId, MapId, MapTopology, Plan, PlanId, PlanStatus,
    PlannedLeg, RaceMap, RouteId, RouteStatus, RouteType, Ship, ShipId, WindSample,
};

use super::{CompletedRoute, NewRoute, Repository, RouteRecord, Seed};

/// Coordinates are keyed at micro-degree resolution.
type WindKey = (DateTime<Utc>, i64, i64);

fn wind_key(sample: &WindSample) -> WindKey {
    (
        sample.timestamp,
        (sample.lat * 1_000_000.0).round() as i64,
        (sample.lng * 1_000_000.0).round() as i64,
    )
}

#[derive(Debug, Clone)]
struct StoredWind {
    sample: WindSample,
    ingested_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryRepository {
    maps: DashMap<MapId, RaceMap>,
    buoys: DashMap<BuoyId, Buoy>,
    legs: DashMap<LegId, Leg>,
    ships: DashMap<ShipId, Ship>,
    plans: DashMap<PlanId, Plan>,
    routes: DashMap<RouteId, RouteRecord>,
    wind: DashMap<WindKey, StoredWind>,
    next_route_id: AtomicI64,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: &Seed, now: DateTime<Utc>) -> Result<Self> {
        let repo = Self::new();
        for map in &seed.maps {
            repo.put_map(map.clone());
        }
        for buoy in &seed.buoys {
            repo.put_buoy(buoy.clone());
        }
        for leg in &seed.legs {
            repo.put_leg(leg.clone());
        }
        for ship in &seed.ships {
            repo.put_ship(ship.clone());
        }
        for plan in &seed.plans {
            repo.put_plan(plan.clone());
        }
        repo.put_wind(&seed.wind, now);
        for user_route in &seed.user_routes {
            let Some(plan) = seed.plans.iter().find(|p| p.id == user_route.plan_id) else {
                anyhow::bail!("user route references unknown plan {}", user_route.plan_id);
            };
            repo.insert_user_route(
                plan.id,
                plan.start_buoy_id,
                plan.end_buoy_id,
                &user_route.legs,
                now,
            );
        }
        Ok(repo)
    }

    pub fn put_map(&self, map: RaceMap) {
        self.maps.insert(map.id, map);
    }

    pub fn put_buoy(&self, buoy: Buoy) {
        self.buoys.insert(buoy.id, buoy);
    }

    pub fn put_leg(&self, leg: Leg) {
        self.legs.insert(leg.id, leg);
    }

    pub fn put_ship(&self, ship: Ship) {
        self.ships.insert(ship.id, ship);
    }

    pub fn put_plan(&self, plan: Plan) {
        self.plans.insert(plan.id, plan);
    }

    fn put_wind(&self, samples: &[WindSample], ingested_at: DateTime<Utc>) -> usize {
        let mut written = 0;
        for sample in samples {
            if !(sample.u.is_finite() && sample.v.is_finite()) {
                continue;
            }
            self.wind.insert(
                wind_key(sample),
                StoredWind {
                    sample: sample.clone(),
                    ingested_at,
                },
            );
            written += 1;
        }
        written
    }

    fn next_id(&self) -> RouteId {
        self.next_route_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn insert_user_route(
        &self,
        plan_id: PlanId,
        start_buoy_id: BuoyId,
        end_buoy_id: BuoyId,
        legs: &[LegId],
        created_at: DateTime<Utc>,
    ) -> RouteId {
        let id = self.next_id();
        let legs = legs
            .iter()
            .enumerate()
            .map(|(index, leg_id)| PlannedLeg {
                leg_id: *leg_id,
                index,
                entered_after_s: 0.0,
                duration_s: 0.0,
            })
            .collect();
        self.routes.insert(
            id,
            RouteRecord {
                id,
                plan_id,
                route_type: RouteType::User,
                status: RouteStatus::Done,
                start_buoy_id,
                end_buoy_id,
                departure: None,
                total_seconds: None,
                wind_revision: None,
                polar_fetch: None,
                failure_reason: None,
                created_at,
                completed_at: Some(created_at),
                legs,
            },
        );
        id
    }

    /// All routes of a plan, oldest first.
    pub fn routes_for_plan(&self, plan_id: PlanId) -> Vec<RouteRecord> {
        let mut routes: Vec<RouteRecord> = self
            .routes
            .iter()
            .filter(|entry| entry.plan_id == plan_id)
            .map(|entry| entry.value().clone())
            .collect();
        routes.sort_by_key(|route| route.id);
        routes
    }

    fn in_window(
        stored: &StoredWind,
        bounds: &BoundingBox,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> bool {
        let sample = &stored.sample;
        sample.timestamp >= from
            && sample.timestamp <= to
            && bounds.contains(sample.lat, sample.lng)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn load_map(&self, map_id: MapId) -> Result<Option<RaceMap>> {
        Ok(self.maps.get(&map_id).map(|map| map.clone()))
    }

    async fn load_map_topology(&self, map_id: MapId) -> Result<Option<MapTopology>> {
        let Some(map) = self.maps.get(&map_id).map(|map| map.clone()) else {
            return Ok(None);
        };
        let mut buoys: Vec<Buoy> = self
            .buoys
            .iter()
            .filter(|b| b.map_id == map_id)
            .map(|b| b.value().clone())
            .collect();
        buoys.sort_by_key(|b| b.id);
        let mut legs: Vec<Leg> = self
            .legs
            .iter()
            .filter(|l| l.map_id == map_id)
            .map(|l| l.value().clone())
            .collect();
        legs.sort_by_key(|l| l.id);
        Ok(Some(MapTopology { map, buoys, legs }))
    }

    async fn load_ship(&self, ship_id: ShipId) -> Result<Option<Ship>> {
        Ok(self.ships.get(&ship_id).map(|ship| ship.clone()))
    }

    async fn load_plan(&self, plan_id: PlanId) -> Result<Option<Plan>> {
        Ok(self.plans.get(&plan_id).map(|plan| plan.clone()))
    }

    async fn list_active_plans(&self) -> Result<Vec<Plan>> {
        let mut plans: Vec<Plan> = self
            .plans
            .iter()
            .filter(|p| p.status == PlanStatus::Active)
            .map(|p| p.value().clone())
            .collect();
        plans.sort_by_key(|p| p.id);
        Ok(plans)
    }

    async fn tick_plan(
        &self,
        plan_id: PlanId,
        remaining_secs: i64,
        status: PlanStatus,
    ) -> Result<()> {
        if let Some(mut plan) = self.plans.get_mut(&plan_id) {
            plan.race_seconds_remaining = Some(remaining_secs);
            plan.status = status;
        }
        Ok(())
    }

    async fn load_wind_window(
        &self,
        bounds: &BoundingBox,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<WindSample>> {
        let mut samples: Vec<WindSample> = self
            .wind
            .iter()
            .filter(|entry| Self::in_window(entry.value(), bounds, from, to))
            .map(|entry| entry.sample.clone())
            .collect();
        samples.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.lat.total_cmp(&b.lat))
                .then(a.lng.total_cmp(&b.lng))
        });
        Ok(samples)
    }

    async fn wind_revision(
        &self,
        bounds: &BoundingBox,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .wind
            .iter()
            .filter(|entry| Self::in_window(entry.value(), bounds, from, to))
            .map(|entry| entry.ingested_at)
            .max())
    }

    async fn upsert_wind(
        &self,
        samples: &[WindSample],
        ingested_at: DateTime<Utc>,
    ) -> Result<usize> {
        Ok(self.put_wind(samples, ingested_at))
    }

    async fn prune_wind(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let before = self.wind.len();
        self.wind.retain(|_, stored| stored.sample.timestamp >= older_than);
        Ok(before.saturating_sub(self.wind.len()) as u64)
    }

    async fn create_pending_route(&self, route: &NewRoute) -> Result<RouteId> {
        let id = self.next_id();
        self.routes.insert(
            id,
            RouteRecord {
                id,
                plan_id: route.plan_id,
                route_type: route.route_type,
                status: RouteStatus::Pending,
                start_buoy_id: route.start_buoy_id,
                end_buoy_id: route.end_buoy_id,
                departure: None,
                total_seconds: None,
                wind_revision: None,
                polar_fetch: None,
                failure_reason: None,
                created_at: route.created_at,
                completed_at: None,
                legs: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn complete_route(&self, route_id: RouteId, result: &CompletedRoute) -> Result<bool> {
        let Some(mut route) = self.routes.get_mut(&route_id) else {
            return Ok(false);
        };
        if route.status != RouteStatus::Pending {
            return Ok(false);
        }
        route.status = RouteStatus::Done;
        route.departure = Some(result.plan.departure);
        route.total_seconds = Some(result.plan.total_seconds);
        route.wind_revision = result.wind_revision;
        route.polar_fetch = result.polar_fetch;
        route.completed_at = Some(result.completed_at);
        route.legs = result.plan.legs.clone();
        Ok(true)
    }

    async fn fail_route(
        &self,
        route_id: RouteId,
        reason: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(mut route) = self.routes.get_mut(&route_id) else {
            return Ok(false);
        };
        if route.status != RouteStatus::Pending {
            return Ok(false);
        }
        route.status = RouteStatus::Failed;
        route.failure_reason = Some(reason.to_string());
        route.completed_at = Some(failed_at);
        Ok(true)
    }

    async fn fail_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<u64> {
        let mut failed = 0;
        for mut route in self.routes.iter_mut() {
            if route.status == RouteStatus::Pending && route.created_at < created_before {
                route.status = RouteStatus::Failed;
                route.failure_reason = Some(reason.to_string());
                failed += 1;
            }
        }
        Ok(failed)
    }

    async fn latest_route(
        &self,
        plan_id: PlanId,
        route_type: RouteType,
        status: Option<RouteStatus>,
    ) -> Result<Option<RouteRecord>> {
        Ok(self
            .routes
            .iter()
            .filter(|route| {
                route.plan_id == plan_id
                    && route.route_type == route_type
                    && status.map_or(true, |s| route.status == s)
            })
            .max_by_key(|route| route.id)
            .map(|route| route.value().clone()))
    }
}
