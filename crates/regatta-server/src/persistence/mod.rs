//! Persistence layer for the route engine.
//!
//! The engine only ever talks to storage through [`Repository`]. SQLite is the
//! durable backend; the memory backend serves local runs and tests.

pub mod db;
pub mod memory;
pub mod plans;
pub mod routes;
pub mod seed;
pub mod ships;
pub mod sqlite;
pub mod topology;
pub mod wind;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use regatta_core::{
    BoundingBox, BuoyId, LegId, MapId, MapTopology, Plan, PlanId, PlanStatus, PlannedLeg, RaceMap,
    RouteId, RoutePlan, RouteStatus, RouteType, Ship, ShipId, WindSample,
};

pub use db::{init_database, Database};
pub use memory::MemoryRepository;
pub use seed::Seed;
pub use sqlite::SqliteRepository;

/// A route row about to be created in PENDING state.
#[derive(Debug, Clone)]
pub struct NewRoute {
    pub plan_id: PlanId,
    pub route_type: RouteType,
    pub start_buoy_id: BuoyId,
    pub end_buoy_id: BuoyId,
    pub created_at: DateTime<Utc>,
}

/// Everything written by the atomic PENDING -> DONE transition.
#[derive(Debug, Clone)]
pub struct CompletedRoute {
    pub plan: RoutePlan,
    /// Latest wind ingestion the computation saw
    pub wind_revision: Option<DateTime<Utc>>,
    /// Ship polar version the computation used
    pub polar_fetch: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
}

/// A stored route with its ordered legs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteRecord {
    pub id: RouteId,
    pub plan_id: PlanId,
    pub route_type: RouteType,
    pub status: RouteStatus,
    pub start_buoy_id: BuoyId,
    pub end_buoy_id: BuoyId,
    pub departure: Option<DateTime<Utc>>,
    pub total_seconds: Option<f64>,
    pub wind_revision: Option<DateTime<Utc>>,
    pub polar_fetch: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub legs: Vec<PlannedLeg>,
}

impl RouteRecord {
    pub fn leg_ids(&self) -> Vec<LegId> {
        self.legs.iter().map(|leg| leg.leg_id).collect()
    }

    /// Departure and predicted duration, when the route has been priced.
    pub fn timing(&self) -> Option<(DateTime<Utc>, f64)> {
        Some((self.departure?, self.total_seconds?))
    }
}

/// Storage contract of the route engine.
///
/// Implementations must be `Send + Sync`; the scheduler and the loops share
/// one `Arc<dyn Repository>`.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn health_check(&self) -> Result<bool>;

    // ==================== Topology ====================

    async fn load_map(&self, map_id: MapId) -> Result<Option<RaceMap>>;

    /// The map with all of its buoys and legs.
    async fn load_map_topology(&self, map_id: MapId) -> Result<Option<MapTopology>>;

    // ==================== Ships & plans ====================

    async fn load_ship(&self, ship_id: ShipId) -> Result<Option<Ship>>;

    async fn load_plan(&self, plan_id: PlanId) -> Result<Option<Plan>>;

    async fn list_active_plans(&self) -> Result<Vec<Plan>>;

    /// Store the race clock's new countdown and plan status.
    async fn tick_plan(&self, plan_id: PlanId, remaining_secs: i64, status: PlanStatus)
        -> Result<()>;

    // ==================== Wind ====================

    /// Samples inside `bounds` with timestamps in `[from, to]`.
    async fn load_wind_window(
        &self,
        bounds: &BoundingBox,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<WindSample>>;

    /// Latest ingestion instant among the samples of the window.
    async fn wind_revision(
        &self,
        bounds: &BoundingBox,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Insert or replace samples keyed by `(timestamp, lat, lng)`.
    async fn upsert_wind(&self, samples: &[WindSample], ingested_at: DateTime<Utc>)
        -> Result<usize>;

    /// Delete samples with timestamps before `older_than`.
    async fn prune_wind(&self, older_than: DateTime<Utc>) -> Result<u64>;

    // ==================== Routes ====================

    async fn create_pending_route(&self, route: &NewRoute) -> Result<RouteId>;

    /// Flip a PENDING route to DONE and write its legs in one step.
    ///
    /// Returns `false` without writing anything when the route is no longer
    /// PENDING.
    async fn complete_route(&self, route_id: RouteId, result: &CompletedRoute) -> Result<bool>;

    /// Flip a PENDING route to FAILED with a reason.
    async fn fail_route(
        &self,
        route_id: RouteId,
        reason: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Fail every PENDING route created before `created_before`.
    async fn fail_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<u64>;

    /// Most recent route for the pair, optionally restricted to one status.
    async fn latest_route(
        &self,
        plan_id: PlanId,
        route_type: RouteType,
        status: Option<RouteStatus>,
    ) -> Result<Option<RouteRecord>>;
}
