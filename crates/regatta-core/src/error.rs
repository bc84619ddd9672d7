//! Error taxonomy for the route engine.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{BuoyId, LegId};

/// Wind field lookup failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WindError {
    /// Not enough neighbouring samples to interpolate at this point.
    #[error("insufficient wind data at ({lat:.5}, {lng:.5}) {at}: {found} of {required} neighbouring samples")]
    InsufficientData {
        lat: f64,
        lng: f64,
        at: DateTime<Utc>,
        found: usize,
        required: usize,
    },
}

/// Stored polar encoding could not be turned into a usable speed table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolarError {
    #[error("invalid polar data: {0}")]
    InvalidPolarData(String),
}

/// A leg sequence that violates the route invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("leg {0} is not part of this map")]
    UnknownLeg(LegId),
    #[error("leg {0} appears more than once")]
    RepeatedLeg(LegId),
    #[error("route starts at buoy {found}, expected {expected}")]
    WrongStart { expected: BuoyId, found: BuoyId },
    #[error("route ends at buoy {found}, expected {expected}")]
    WrongEnd { expected: BuoyId, found: BuoyId },
    #[error("leg {next} does not start where leg {previous} ends")]
    Disconnected { previous: LegId, next: LegId },
    #[error("empty route between distinct buoys {start} and {end}")]
    Empty { start: BuoyId, end: BuoyId },
}

/// Router failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoutingError {
    #[error("buoy {0} is not part of this map")]
    UnknownBuoy(BuoyId),
    #[error("no path from buoy {start} to buoy {end}")]
    Unreachable { start: BuoyId, end: BuoyId },
    #[error(transparent)]
    InsufficientData(#[from] WindError),
    #[error(transparent)]
    InvalidPolarData(#[from] PolarError),
    #[error(transparent)]
    BrokenPath(#[from] PathError),
    #[error("leg {0} cannot be sailed in the current conditions")]
    Impassable(LegId),
    #[error("route computation cancelled")]
    Cancelled,
}
