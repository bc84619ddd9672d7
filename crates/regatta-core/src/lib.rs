pub mod error;
pub mod graph;
pub mod models;
pub mod polar;
pub mod race;
pub mod router;
pub mod spatial;
pub mod wind;

pub use error::{PathError, PolarError, RoutingError, WindError};
pub use graph::{Edge, LegGraph, RejectReason, RejectedLeg};
pub use models::{
    BoundingBox, Buoy, BuoyId, Leg, LegId, MapId, MapTopology, OwnerId, Plan, PlanId, PlanStatus,
    PlannedLeg, RaceMap, RouteId, RoutePlan, RouteStatus, RouteType, Ship, ShipId, WindSample,
};
pub use polar::{Optimum, PolarModel};
pub use race::{advance, last_rounded, staleness, RaceTick, Staleness, Waypoint};
pub use router::{CancelFlag, ConstantSpeed, LegPricer, Router, WindAwarePricer};
pub use spatial::{haversine_distance, knots_to_mps, mps_to_knots, WindVector};
pub use wind::WindField;
