//! Race clock arithmetic.
//!
//! The server drives the tick; this module only decides what a tick means.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::LegGraph;
use crate::models::{BuoyId, PlannedLeg};
use crate::router::offset;

/// Outcome of one clock tick for one plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceTick {
    pub remaining_secs: i64,
    pub arrived: bool,
}

/// Advance a plan's countdown.
///
/// # Arguments
/// * `previous` - Last stored remaining seconds, if any
/// * `total_seconds` - Predicted duration of the selected route
/// * `elapsed_seconds` - Time since the route's departure instant
///
/// # Returns
/// The new countdown, never above `previous`.
pub fn advance(previous: Option<i64>, total_seconds: f64, elapsed_seconds: f64) -> RaceTick {
    let raw = if total_seconds.is_finite() && elapsed_seconds.is_finite() {
        (total_seconds - elapsed_seconds.max(0.0)).max(0.0).ceil() as i64
    } else {
        previous.unwrap_or(0)
    };
    let remaining_secs = match previous {
        Some(prev) => raw.min(prev.max(0)),
        None => raw,
    };
    RaceTick {
        remaining_secs,
        arrived: remaining_secs == 0,
    }
}

/// A buoy on the course and the instant the boat is at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waypoint {
    pub buoy: BuoyId,
    pub at: DateTime<Utc>,
}

/// Last buoy a boat sailing `legs` from `start` has rounded by `now`.
///
/// Legs unknown to `graph` end the walk. Before the first rounding the
/// boat is still at `start`, departing at `departure`.
pub fn last_rounded(
    graph: &LegGraph,
    start: BuoyId,
    departure: DateTime<Utc>,
    legs: &[PlannedLeg],
    now: DateTime<Utc>,
) -> Waypoint {
    let mut reached = Waypoint {
        buoy: start,
        at: departure,
    };
    for leg in legs {
        let Some(edge) = graph.edge(leg.leg_id) else {
            break;
        };
        let rounded = offset(departure, leg.entered_after_s + leg.duration_s);
        if rounded > now {
            break;
        }
        reached = Waypoint {
            buoy: edge.end_buoy_id,
            at: rounded,
        };
    }
    reached
}

/// Why a route no longer reflects current inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    /// Wind samples newer than the ones the route was computed from
    Wind,
    /// Vessel polar refreshed since the route was computed
    Polar,
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        !matches!(self, Staleness::Fresh)
    }
}

/// Compare the inputs a route was computed from with the current ones.
pub fn staleness(
    route_wind_revision: Option<DateTime<Utc>>,
    current_wind_revision: Option<DateTime<Utc>>,
    route_polar_fetch: Option<DateTime<Utc>>,
    current_polar_fetch: Option<DateTime<Utc>>,
) -> Staleness {
    match (route_wind_revision, current_wind_revision) {
        (Some(seen), Some(now)) if now > seen => return Staleness::Wind,
        (None, Some(_)) => return Staleness::Wind,
        _ => {}
    }
    if route_polar_fetch != current_polar_fetch {
        return Staleness::Polar;
    }
    Staleness::Fresh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Buoy, Leg};
    use chrono::{Duration, TimeZone};

    fn line() -> LegGraph {
        let buoys: Vec<Buoy> = (1..=3)
            .map(|id| Buoy {
                id,
                map_id: 1,
                name: format!("b{}", id),
                lat: 0.0,
                lng: id as f64 * 0.01,
            })
            .collect();
        let legs = vec![
            Leg { id: 10, map_id: 1, start_buoy_id: 1, end_buoy_id: 2 },
            Leg { id: 11, map_id: 1, start_buoy_id: 2, end_buoy_id: 3 },
        ];
        LegGraph::build(1, &buoys, &legs)
    }

    fn planned(leg_id: i64, index: usize, entered_after_s: f64, duration_s: f64) -> PlannedLeg {
        PlannedLeg {
            leg_id,
            index,
            entered_after_s,
            duration_s,
        }
    }

    #[test]
    fn counts_down_and_arrives() {
        let tick = advance(None, 100.0, 30.2);
        assert_eq!(tick, RaceTick { remaining_secs: 70, arrived: false });

        let tick = advance(Some(70), 100.0, 100.0);
        assert_eq!(tick, RaceTick { remaining_secs: 0, arrived: true });

        let tick = advance(Some(0), 100.0, 250.0);
        assert!(tick.arrived);
    }

    #[test]
    fn never_increases() {
        // A recomputed, slower route must not push the countdown up.
        let tick = advance(Some(40), 500.0, 10.0);
        assert_eq!(tick.remaining_secs, 40);

        let mut previous = None;
        for elapsed in [0.0, 1.0, 0.5, 2.0, 2.0, 90.0] {
            let tick = advance(previous, 60.0, elapsed);
            if let Some(prev) = previous {
                assert!(tick.remaining_secs <= prev);
            }
            previous = Some(tick.remaining_secs);
        }
        assert_eq!(previous, Some(0));
    }

    #[test]
    fn departure_in_future_holds_full_duration() {
        let tick = advance(None, 120.0, -300.0);
        assert_eq!(tick.remaining_secs, 120);
    }

    #[test]
    fn last_rounded_buoy_follows_leg_timing() {
        let graph = line();
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let legs = [planned(10, 0, 0.0, 600.0), planned(11, 1, 600.0, 900.0)];

        let at_start = last_rounded(&graph, 1, t, &legs, t + Duration::seconds(599));
        assert_eq!(at_start, Waypoint { buoy: 1, at: t });

        let mid = last_rounded(&graph, 1, t, &legs, t + Duration::seconds(601));
        assert_eq!(mid, Waypoint { buoy: 2, at: t + Duration::seconds(600) });

        let done = last_rounded(&graph, 1, t, &legs, t + Duration::hours(2));
        assert_eq!(done, Waypoint { buoy: 3, at: t + Duration::seconds(1500) });

        let early = last_rounded(&graph, 1, t, &legs, t - Duration::hours(1));
        assert_eq!(early.buoy, 1);
    }

    #[test]
    fn staleness_detection() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let later = t + Duration::minutes(15);

        assert_eq!(staleness(Some(t), Some(t), None, None), Staleness::Fresh);
        assert_eq!(staleness(Some(t), Some(later), None, None), Staleness::Wind);
        assert_eq!(staleness(None, Some(t), None, None), Staleness::Wind);
        assert_eq!(staleness(Some(t), None, None, None), Staleness::Fresh);
        assert_eq!(staleness(Some(t), Some(t), Some(t), Some(later)), Staleness::Polar);
        assert!(!staleness(None, None, Some(t), Some(t)).is_stale());
    }
}
