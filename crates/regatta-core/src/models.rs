//! Core data models for the route engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type MapId = i64;
pub type BuoyId = i64;
pub type LegId = i64;
pub type RouteId = i64;
pub type PlanId = i64;
pub type ShipId = i64;
pub type OwnerId = i64;

/// A bounded race area. Buoys and legs always belong to exactly one map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceMap {
    pub id: MapId,
    pub name: String,
    /// South-west corner
    pub lat1: f64,
    pub lng1: f64,
    /// North-east corner
    pub lat2: f64,
    pub lng2: f64,
    /// Locked maps have frozen topology (races in progress)
    #[serde(default)]
    pub is_locked: bool,
    /// Bumped on every topology change; used as the leg graph cache key
    pub updated_at: DateTime<Utc>,
}

impl RaceMap {
    /// Bounding box of the map, normalized so that min <= max on both axes.
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox {
            min_lat: self.lat1.min(self.lat2),
            min_lng: self.lng1.min(self.lng2),
            max_lat: self.lat1.max(self.lat2),
            max_lng: self.lng1.max(self.lng2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    /// Grow the box by `margin_deg` on every side.
    pub fn expand(&self, margin_deg: f64) -> Self {
        let margin = margin_deg.max(0.0);
        Self {
            min_lat: (self.min_lat - margin).max(-90.0),
            min_lng: self.min_lng - margin,
            max_lat: (self.max_lat + margin).min(90.0),
            max_lng: self.max_lng + margin,
        }
    }

    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }
}

/// A navigable waypoint on a map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Buoy {
    pub id: BuoyId,
    pub map_id: MapId,
    #[serde(default)]
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

/// A directed, traversable edge between two buoys of the same map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leg {
    pub id: LegId,
    pub map_id: MapId,
    pub start_buoy_id: BuoyId,
    pub end_buoy_id: BuoyId,
}

/// Everything the router needs to know about a map's structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapTopology {
    pub map: RaceMap,
    pub buoys: Vec<Buoy>,
    pub legs: Vec<Leg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteType {
    /// Manually authored
    User,
    /// Graph distance only, wind independent
    Shortest,
    /// Wind-aware optimum
    Generated,
}

impl RouteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteType::User => "USER",
            RouteType::Shortest => "SHORTEST",
            RouteType::Generated => "GENERATED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "USER" => Some(RouteType::User),
            "SHORTEST" => Some(RouteType::Shortest),
            "GENERATED" => Some(RouteType::Generated),
            _ => None,
        }
    }
}

/// Lifecycle of one route computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteStatus {
    Pending,
    Failed,
    Done,
}

impl RouteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteStatus::Pending => "PENDING",
            RouteStatus::Failed => "FAILED",
            RouteStatus::Done => "DONE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(RouteStatus::Pending),
            "FAILED" => Some(RouteStatus::Failed),
            "DONE" => Some(RouteStatus::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    /// Created, race not yet being tracked
    Draft,
    /// Countdown is live
    #[default]
    Active,
    /// Countdown reached zero
    Arrived,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Draft => "DRAFT",
            PlanStatus::Active => "ACTIVE",
            PlanStatus::Arrived => "ARRIVED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DRAFT" => Some(PlanStatus::Draft),
            "ACTIVE" => Some(PlanStatus::Active),
            "ARRIVED" => Some(PlanStatus::Arrived),
            _ => None,
        }
    }
}

/// A live race instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    #[serde(default)]
    pub name: String,
    pub owner_id: OwnerId,
    pub map_id: MapId,
    pub ship_id: ShipId,
    pub start_buoy_id: BuoyId,
    pub end_buoy_id: BuoyId,
    pub start_time: DateTime<Utc>,
    /// Countdown mutated by the race clock; None until a first ETA exists
    #[serde(default)]
    pub race_seconds_remaining: Option<i64>,
    #[serde(default)]
    pub status: PlanStatus,
}

/// A vessel and its raw polar performance encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ship {
    pub id: ShipId,
    #[serde(default)]
    pub name: String,
    pub polar: String,
    #[serde(default)]
    pub last_fetch_of_polar_data: Option<DateTime<Utc>>,
}

/// A single wind grid sample. `u` points east, `v` points north, both m/s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindSample {
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lng: f64,
    pub u: f64,
    pub v: f64,
}

/// One leg of a computed route with its predicted timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedLeg {
    pub leg_id: LegId,
    /// 0-based, contiguous traversal order
    pub index: usize,
    /// Seconds after departure at which the leg is entered
    pub entered_after_s: f64,
    pub duration_s: f64,
}

/// The materialized result of one router run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub start_buoy_id: BuoyId,
    pub end_buoy_id: BuoyId,
    pub departure: DateTime<Utc>,
    pub legs: Vec<PlannedLeg>,
    pub total_seconds: f64,
    pub nodes_visited: usize,
}

impl RoutePlan {
    pub fn leg_ids(&self) -> Vec<LegId> {
        self.legs.iter().map(|leg| leg.leg_id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }
}
