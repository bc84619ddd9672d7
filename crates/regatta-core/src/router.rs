//! Time-dependent router.
//!
//! Label-setting search over the leg graph where a leg's cost is the time it
//! takes to sail it *when it is entered*. A buoy's earliest arrival is only
//! final once its label is popped, and outgoing legs are priced at that
//! finalized instant.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::RoutingError;
use crate::graph::{Edge, LegGraph};
use crate::models::{BuoyId, LegId, PlannedLeg, RoutePlan};
use crate::polar::PolarModel;
use crate::spatial::WindVector;
use crate::wind::WindField;

/// Cooperative cancellation shared between a job and its search.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

/// Prices one leg entered at a given instant.
///
/// `Ok(None)` means the leg cannot be sailed at that time and is skipped.
pub trait LegPricer: Send + Sync {
    fn leg_seconds(&self, edge: &Edge, entered_at: DateTime<Utc>)
        -> Result<Option<f64>, RoutingError>;
}

/// Wind-independent pricing used for SHORTEST routes.
#[derive(Debug, Clone, Copy)]
pub struct ConstantSpeed {
    pub speed_mps: f64,
}

impl LegPricer for ConstantSpeed {
    fn leg_seconds(&self, edge: &Edge, _entered_at: DateTime<Utc>) -> Result<Option<f64>, RoutingError> {
        if !(self.speed_mps > 0.0) {
            return Ok(None);
        }
        Ok(Some(edge.length_m / self.speed_mps))
    }
}

/// Prices legs from a wind snapshot and a vessel polar.
#[derive(Debug, Clone)]
pub struct WindAwarePricer {
    pub wind: Arc<WindField>,
    pub polar: Arc<PolarModel>,
    /// Used where the field has no data; `None` propagates `InsufficientData`.
    pub fallback_wind: Option<WindVector>,
    /// Speeds at or below this make a leg impassable.
    pub min_speed_mps: f64,
}

impl WindAwarePricer {
    fn wind_at(&self, edge: &Edge, entered_at: DateTime<Utc>) -> Result<WindVector, RoutingError> {
        match self.wind.sample(edge.mid_lat, edge.mid_lng, entered_at) {
            Ok(wind) => Ok(wind),
            Err(err) => self.fallback_wind.ok_or(RoutingError::InsufficientData(err)),
        }
    }
}

impl LegPricer for WindAwarePricer {
    fn leg_seconds(&self, edge: &Edge, entered_at: DateTime<Utc>) -> Result<Option<f64>, RoutingError> {
        let wind = self.wind_at(edge, entered_at)?;
        let speed = self.polar.boat_speed_mps(wind, edge.bearing_deg);
        if !(speed > self.min_speed_mps) {
            return Ok(None);
        }
        Ok(Some(edge.length_m / speed))
    }
}

#[derive(Debug, Clone, Copy)]
struct FloatOrd(f64);

impl PartialEq for FloatOrd {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatOrd {}

impl PartialOrd for FloatOrd {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatOrd {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// One settled-or-pending step in the search arena.
#[derive(Debug, Clone, Copy)]
struct Step {
    leg_id: LegId,
    entered_s: f64,
    duration_s: f64,
    parent: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Label {
    arrival_s: FloatOrd,
    hops: usize,
    path: Vec<LegId>,
    buoy: BuoyId,
    step: Option<usize>,
}

impl Label {
    fn beats(&self, other: &Label) -> bool {
        self.rank(other) == Ordering::Less
    }

    fn rank(&self, other: &Label) -> Ordering {
        self.arrival_s
            .cmp(&other.arrival_s)
            .then_with(|| self.hops.cmp(&other.hops))
            .then_with(|| self.path.cmp(&other.path))
    }
}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank(other)
            .then_with(|| self.buoy.cmp(&other.buoy))
            .then_with(|| self.step.cmp(&other.step))
    }
}

pub(crate) fn offset(departure: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    departure + Duration::milliseconds((seconds * 1000.0).round() as i64)
}

pub struct Router<'a, P: LegPricer + ?Sized> {
    graph: &'a LegGraph,
    pricer: &'a P,
}

impl<'a, P: LegPricer + ?Sized> Router<'a, P> {
    pub fn new(graph: &'a LegGraph, pricer: &'a P) -> Self {
        Self { graph, pricer }
    }

    fn check_buoys(&self, start: BuoyId, end: BuoyId) -> Result<(), RoutingError> {
        for id in [start, end] {
            if self.graph.buoy(id).is_none() {
                return Err(RoutingError::UnknownBuoy(id));
            }
        }
        Ok(())
    }

    /// Minimal-time leg sequence from `start` to `end` departing at `departure`.
    ///
    /// Equal arrivals are broken by fewer legs, then by the lexicographically
    /// smaller leg id sequence. `cancel` is checked before every pop.
    pub fn route(
        &self,
        start: BuoyId,
        end: BuoyId,
        departure: DateTime<Utc>,
        cancel: &CancelFlag,
    ) -> Result<RoutePlan, RoutingError> {
        self.check_buoys(start, end)?;
        if start == end {
            return Ok(RoutePlan {
                start_buoy_id: start,
                end_buoy_id: end,
                departure,
                legs: Vec::new(),
                total_seconds: 0.0,
                nodes_visited: 0,
            });
        }

        let mut steps: Vec<Step> = Vec::new();
        let mut best: HashMap<BuoyId, Label> = HashMap::new();
        let mut settled: HashSet<BuoyId> = HashSet::new();
        let mut open: BinaryHeap<Reverse<Label>> = BinaryHeap::new();

        let origin = Label {
            arrival_s: FloatOrd(0.0),
            hops: 0,
            path: Vec::new(),
            buoy: start,
            step: None,
        };
        best.insert(start, origin.clone());
        open.push(Reverse(origin));

        loop {
            if cancel.is_cancelled() {
                return Err(RoutingError::Cancelled);
            }
            let Some(Reverse(current)) = open.pop() else {
                return Err(RoutingError::Unreachable { start, end });
            };
            // lazy deletion of superseded labels
            if !settled.insert(current.buoy) {
                continue;
            }

            if current.buoy == end {
                let legs = Self::unwind(&steps, current.step);
                return Ok(RoutePlan {
                    start_buoy_id: start,
                    end_buoy_id: end,
                    departure,
                    legs,
                    total_seconds: current.arrival_s.0,
                    nodes_visited: settled.len(),
                });
            }

            let entered_at = offset(departure, current.arrival_s.0);
            for edge in self.graph.neighbors(current.buoy) {
                if settled.contains(&edge.end_buoy_id) {
                    continue;
                }
                let Some(duration) = self.pricer.leg_seconds(edge, entered_at)? else {
                    continue;
                };
                if !(duration.is_finite() && duration >= 0.0) {
                    continue;
                }

                let mut path = current.path.clone();
                path.push(edge.leg_id);
                let candidate = Label {
                    arrival_s: FloatOrd(current.arrival_s.0 + duration),
                    hops: current.hops + 1,
                    path,
                    buoy: edge.end_buoy_id,
                    step: Some(steps.len()),
                };
                let improves = best
                    .get(&edge.end_buoy_id)
                    .map_or(true, |known| candidate.beats(known));
                if !improves {
                    continue;
                }

                steps.push(Step {
                    leg_id: edge.leg_id,
                    entered_s: current.arrival_s.0,
                    duration_s: duration,
                    parent: current.step,
                });
                best.insert(edge.end_buoy_id, candidate.clone());
                open.push(Reverse(candidate));
            }
        }
    }

    /// Price a fixed leg sequence with the same costing as `route`.
    ///
    /// The sequence must satisfy the route invariants; a leg that cannot be
    /// sailed when it is reached fails with `Impassable`.
    pub fn price_path(
        &self,
        start: BuoyId,
        end: BuoyId,
        departure: DateTime<Utc>,
        legs: &[LegId],
    ) -> Result<RoutePlan, RoutingError> {
        self.check_buoys(start, end)?;
        let chain = self.graph.validate_path(start, end, legs)?;

        let mut elapsed = 0.0;
        let mut planned = Vec::with_capacity(chain.len());
        for (index, edge) in chain.into_iter().enumerate() {
            let duration = self
                .pricer
                .leg_seconds(edge, offset(departure, elapsed))?
                .filter(|d| d.is_finite() && *d >= 0.0)
                .ok_or(RoutingError::Impassable(edge.leg_id))?;
            planned.push(PlannedLeg {
                leg_id: edge.leg_id,
                index,
                entered_after_s: elapsed,
                duration_s: duration,
            });
            elapsed += duration;
        }

        Ok(RoutePlan {
            start_buoy_id: start,
            end_buoy_id: end,
            departure,
            nodes_visited: planned.len(),
            legs: planned,
            total_seconds: elapsed,
        })
    }

    fn unwind(steps: &[Step], mut cursor: Option<usize>) -> Vec<PlannedLeg> {
        let mut reversed = Vec::new();
        while let Some(idx) = cursor {
            let step = steps[idx];
            reversed.push(step);
            cursor = step.parent;
        }
        reversed
            .into_iter()
            .rev()
            .enumerate()
            .map(|(index, step)| PlannedLeg {
                leg_id: step.leg_id,
                index,
                entered_after_s: step.entered_s,
                duration_s: step.duration_s,
            })
            .collect()
    }
}
