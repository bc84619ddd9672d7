//! SQLite-backed repository.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use regatta_core::{
    BoundingBox, BuoyId, LegId, MapId, MapTopology, Plan, PlanId, PlanStatus, RaceMap, RouteId,
    RouteStatus, RouteType, Ship, ShipId, WindSample,
};

use super::{
    plans, routes, ships, topology, wind, CompletedRoute, Database, NewRoute, Repository,
    RouteRecord, Seed,
};

#[derive(Clone)]
pub struct SqliteRepository {
    db: Database,
}

impl SqliteRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn insert_user_route(
        &self,
        plan_id: PlanId,
        start_buoy_id: BuoyId,
        end_buoy_id: BuoyId,
        legs: &[LegId],
        created_at: DateTime<Utc>,
    ) -> Result<RouteId> {
        routes::insert_user_route(
            self.db.pool(),
            plan_id,
            start_buoy_id,
            end_buoy_id,
            legs,
            created_at,
        )
        .await
    }

    /// Write seed rows in dependency order.
    pub async fn apply_seed(&self, seed: &Seed, now: DateTime<Utc>) -> Result<()> {
        let pool = self.db.pool();
        for map in &seed.maps {
            topology::upsert_map(pool, map).await?;
        }
        for buoy in &seed.buoys {
            topology::upsert_buoy(pool, buoy).await?;
        }
        for leg in &seed.legs {
            topology::upsert_leg(pool, leg).await?;
        }
        for ship in &seed.ships {
            ships::upsert_ship(pool, ship).await?;
        }
        for plan in &seed.plans {
            plans::upsert_plan(pool, plan).await?;
        }
        wind::upsert_wind(pool, &seed.wind, now).await?;
        for user_route in &seed.user_routes {
            let Some(plan) = seed.plans.iter().find(|p| p.id == user_route.plan_id) else {
                anyhow::bail!("user route references unknown plan {}", user_route.plan_id);
            };
            self.insert_user_route(
                plan.id,
                plan.start_buoy_id,
                plan.end_buoy_id,
                &user_route.legs,
                now,
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn health_check(&self) -> Result<bool> {
        let (one,): (i64,) = sqlx::query_as("SELECT 1").fetch_one(self.db.pool()).await?;
        Ok(one == 1)
    }

    async fn load_map(&self, map_id: MapId) -> Result<Option<RaceMap>> {
        topology::load_map(self.db.pool(), map_id).await
    }

    async fn load_map_topology(&self, map_id: MapId) -> Result<Option<MapTopology>> {
        topology::load_map_topology(self.db.pool(), map_id).await
    }

    async fn load_ship(&self, ship_id: ShipId) -> Result<Option<Ship>> {
        ships::load_ship(self.db.pool(), ship_id).await
    }

    async fn load_plan(&self, plan_id: PlanId) -> Result<Option<Plan>> {
        plans::load_plan(self.db.pool(), plan_id).await
    }

    async fn list_active_plans(&self) -> Result<Vec<Plan>> {
        plans::list_active_plans(self.db.pool()).await
    }

    async fn tick_plan(
        &self,
        plan_id: PlanId,
        remaining_secs: i64,
        status: PlanStatus,
    ) -> Result<()> {
        plans::tick_plan(self.db.pool(), plan_id, remaining_secs, status).await
    }

    async fn load_wind_window(
        &self,
        bounds: &BoundingBox,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<WindSample>> {
        wind::load_wind_window(self.db.pool(), bounds, from, to).await
    }

    async fn wind_revision(
        &self,
        bounds: &BoundingBox,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        wind::wind_revision(self.db.pool(), bounds, from, to).await
    }

    async fn upsert_wind(
        &self,
        samples: &[WindSample],
        ingested_at: DateTime<Utc>,
    ) -> Result<usize> {
        wind::upsert_wind(self.db.pool(), samples, ingested_at).await
    }

    async fn prune_wind(&self, older_than: DateTime<Utc>) -> Result<u64> {
        wind::prune_wind(self.db.pool(), older_than).await
    }

    async fn create_pending_route(&self, route: &NewRoute) -> Result<RouteId> {
        routes::create_pending_route(self.db.pool(), route).await
    }

    async fn complete_route(&self, route_id: RouteId, result: &CompletedRoute) -> Result<bool> {
        routes::complete_route(self.db.pool(), route_id, result).await
    }

    async fn fail_route(
        &self,
        route_id: RouteId,
        reason: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<bool> {
        routes::fail_route(self.db.pool(), route_id, reason, failed_at).await
    }

    async fn fail_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<u64> {
        routes::fail_stale_pending(self.db.pool(), created_before, reason).await
    }

    async fn latest_route(
        &self,
        plan_id: PlanId,
        route_type: RouteType,
        status: Option<RouteStatus>,
    ) -> Result<Option<RouteRecord>> {
        routes::latest_route(self.db.pool(), plan_id, route_type, status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;
    use crate::persistence::seed::UserRouteSeed;
    use chrono::{Duration, TimeZone};
    use regatta_core::{Buoy, Leg, PlannedLeg, RoutePlan};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn seed() -> Seed {
        Seed {
            maps: vec![RaceMap {
                id: 1,
                name: "Bay".to_string(),
                lat1: 0.0,
                lng1: 0.0,
                lat2: 1.0,
                lng2: 1.0,
                is_locked: false,
                updated_at: t0(),
            }],
            buoys: vec![
                Buoy { id: 1, map_id: 1, name: "A".into(), lat: 0.1, lng: 0.1 },
                Buoy { id: 2, map_id: 1, name: "B".into(), lat: 0.2, lng: 0.1 },
            ],
            legs: vec![Leg { id: 10, map_id: 1, start_buoy_id: 1, end_buoy_id: 2 }],
            ships: vec![Ship {
                id: 5,
                name: "Wave".into(),
                polar: "twa/tws;0;30\n0;5;5\n180;5;5".into(),
                last_fetch_of_polar_data: Some(t0()),
            }],
            plans: vec![Plan {
                id: 3,
                name: "Race".into(),
                owner_id: 9,
                map_id: 1,
                ship_id: 5,
                start_buoy_id: 1,
                end_buoy_id: 2,
                start_time: t0(),
                race_seconds_remaining: None,
                status: PlanStatus::Active,
            }],
            wind: vec![WindSample { timestamp: t0(), lat: 0.5, lng: 0.5, u: 1.0, v: 2.0 }],
            user_routes: vec![UserRouteSeed { plan_id: 3, legs: vec![10] }],
        }
    }

    async fn repo() -> SqliteRepository {
        let db = init_database(":memory:", 1).await.unwrap();
        let repo = SqliteRepository::new(db);
        repo.apply_seed(&seed(), t0()).await.unwrap();
        repo
    }

    fn completed(legs: Vec<PlannedLeg>) -> CompletedRoute {
        CompletedRoute {
            plan: RoutePlan {
                start_buoy_id: 1,
                end_buoy_id: 2,
                departure: t0(),
                total_seconds: 42.5,
                nodes_visited: 2,
                legs,
            },
            wind_revision: Some(t0()),
            polar_fetch: Some(t0()),
            completed_at: t0() + Duration::seconds(1),
        }
    }

    #[tokio::test]
    async fn topology_and_plans_round_trip() {
        let repo = repo().await;
        assert!(repo.health_check().await.unwrap());

        let topology = repo.load_map_topology(1).await.unwrap().unwrap();
        assert_eq!(topology.buoys.len(), 2);
        assert_eq!(topology.legs[0].id, 10);
        assert_eq!(topology.map.updated_at, t0());
        assert!(repo.load_map_topology(2).await.unwrap().is_none());

        let plans = repo.list_active_plans().await.unwrap();
        assert_eq!(plans.len(), 1);
        repo.tick_plan(3, 0, PlanStatus::Arrived).await.unwrap();
        assert!(repo.list_active_plans().await.unwrap().is_empty());
        let plan = repo.load_plan(3).await.unwrap().unwrap();
        assert_eq!(plan.race_seconds_remaining, Some(0));
        assert_eq!(plan.status, PlanStatus::Arrived);

        let ship = repo.load_ship(5).await.unwrap().unwrap();
        assert_eq!(ship.last_fetch_of_polar_data, Some(t0()));
    }

    #[tokio::test]
    async fn completing_writes_legs_only_while_pending() {
        let repo = repo().await;
        let new_route = NewRoute {
            plan_id: 3,
            route_type: RouteType::Generated,
            start_buoy_id: 1,
            end_buoy_id: 2,
            created_at: t0(),
        };
        let legs = vec![PlannedLeg { leg_id: 10, index: 0, entered_after_s: 0.0, duration_s: 42.5 }];

        let done_id = repo.create_pending_route(&new_route).await.unwrap();
        assert!(repo.complete_route(done_id, &completed(legs.clone())).await.unwrap());
        // second completion is a no-op
        assert!(!repo.complete_route(done_id, &completed(legs.clone())).await.unwrap());

        let failed_id = repo.create_pending_route(&new_route).await.unwrap();
        assert!(repo.fail_route(failed_id, "unreachable", t0()).await.unwrap());
        assert!(!repo.complete_route(failed_id, &completed(legs.clone())).await.unwrap());

        let latest = repo
            .latest_route(3, RouteType::Generated, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, failed_id);
        assert_eq!(latest.status, RouteStatus::Failed);
        assert!(latest.legs.is_empty());
        assert_eq!(latest.failure_reason.as_deref(), Some("unreachable"));

        let done = repo
            .latest_route(3, RouteType::Generated, Some(RouteStatus::Done))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.id, done_id);
        assert_eq!(done.leg_ids(), vec![10]);
        assert_eq!(done.timing(), Some((t0(), 42.5)));

        let user = repo
            .latest_route(3, RouteType::User, Some(RouteStatus::Done))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.leg_ids(), vec![10]);
        assert!(user.timing().is_none());
    }

    #[tokio::test]
    async fn stale_pending_rows_are_failed() {
        let repo = repo().await;
        let route_id = repo
            .create_pending_route(&NewRoute {
                plan_id: 3,
                route_type: RouteType::Shortest,
                start_buoy_id: 1,
                end_buoy_id: 2,
                created_at: t0(),
            })
            .await
            .unwrap();
        assert_eq!(repo.fail_stale_pending(t0(), "stale").await.unwrap(), 0);
        assert_eq!(
            repo.fail_stale_pending(t0() + Duration::minutes(5), "stale")
                .await
                .unwrap(),
            1
        );
        let latest = repo
            .latest_route(3, RouteType::Shortest, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, route_id);
        assert_eq!(latest.status, RouteStatus::Failed);
    }

    #[tokio::test]
    async fn wind_upserts_and_revisions() {
        let repo = repo().await;
        let bounds = BoundingBox { min_lat: 0.0, min_lng: 0.0, max_lat: 1.0, max_lng: 1.0 };
        let from = t0() - Duration::hours(1);
        let to = t0() + Duration::hours(1);

        assert_eq!(repo.wind_revision(&bounds, from, to).await.unwrap(), Some(t0()));

        let later = t0() + Duration::minutes(15);
        let replacement = WindSample { timestamp: t0(), lat: 0.5, lng: 0.5, u: -3.0, v: 0.0 };
        assert_eq!(repo.upsert_wind(&[replacement], later).await.unwrap(), 1);

        let samples = repo.load_wind_window(&bounds, from, to).await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].u, -3.0);
        assert_eq!(repo.wind_revision(&bounds, from, to).await.unwrap(), Some(later));

        let elsewhere = BoundingBox { min_lat: 5.0, min_lng: 5.0, max_lat: 6.0, max_lng: 6.0 };
        assert_eq!(repo.wind_revision(&elsewhere, from, to).await.unwrap(), None);

        assert_eq!(repo.prune_wind(t0()).await.unwrap(), 0);
        assert_eq!(repo.prune_wind(t0() + Duration::seconds(1)).await.unwrap(), 1);
        assert!(repo.load_wind_window(&bounds, from, to).await.unwrap().is_empty());
    }
}
