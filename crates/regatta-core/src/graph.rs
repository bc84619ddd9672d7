//! Directed leg graph for one map.
//!
//! Built once from a map's buoys and legs and never patched: any topology
//! change produces a new graph.

use std::collections::{HashMap, HashSet};

use crate::error::PathError;
use crate::models::{Buoy, BuoyId, Leg, LegId, MapId};
use crate::spatial::{bearing_deg, haversine_distance, midpoint};

/// A traversable leg with its static geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub leg_id: LegId,
    pub start_buoy_id: BuoyId,
    pub end_buoy_id: BuoyId,
    pub length_m: f64,
    pub bearing_deg: f64,
    pub mid_lat: f64,
    pub mid_lng: f64,
}

/// Why a leg was left out of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Leg row belongs to another map
    ForeignLeg,
    /// An endpoint buoy is unknown or belongs to another map
    ForeignBuoy,
    /// Same leg id seen twice
    DuplicateLeg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectedLeg {
    pub leg_id: LegId,
    pub reason: RejectReason,
}

#[derive(Debug, Clone)]
pub struct LegGraph {
    buoys: HashMap<BuoyId, Buoy>,
    edges: HashMap<LegId, Edge>,
    adjacency: HashMap<BuoyId, Vec<Edge>>,
    rejected: Vec<RejectedLeg>,
}

impl LegGraph {
    /// Build the adjacency structure keyed by start buoy.
    ///
    /// Buoys and legs of other maps are dropped so that `neighbors` can only
    /// ever yield legs of `map_id`. Outgoing legs are ordered by leg id.
    pub fn build(map_id: MapId, buoys: &[Buoy], legs: &[Leg]) -> Self {
        let buoys: HashMap<BuoyId, Buoy> = buoys
            .iter()
            .filter(|buoy| buoy.map_id == map_id)
            .map(|buoy| (buoy.id, buoy.clone()))
            .collect();

        let mut edges = HashMap::new();
        let mut adjacency: HashMap<BuoyId, Vec<Edge>> = HashMap::new();
        let mut rejected = Vec::new();

        for leg in legs {
            if leg.map_id != map_id {
                rejected.push(RejectedLeg {
                    leg_id: leg.id,
                    reason: RejectReason::ForeignLeg,
                });
                continue;
            }
            let (Some(start), Some(end)) =
                (buoys.get(&leg.start_buoy_id), buoys.get(&leg.end_buoy_id))
            else {
                rejected.push(RejectedLeg {
                    leg_id: leg.id,
                    reason: RejectReason::ForeignBuoy,
                });
                continue;
            };
            if edges.contains_key(&leg.id) {
                rejected.push(RejectedLeg {
                    leg_id: leg.id,
                    reason: RejectReason::DuplicateLeg,
                });
                continue;
            }

            let (mid_lat, mid_lng) = midpoint(start.lat, start.lng, end.lat, end.lng);
            let edge = Edge {
                leg_id: leg.id,
                start_buoy_id: start.id,
                end_buoy_id: end.id,
                length_m: haversine_distance(start.lat, start.lng, end.lat, end.lng),
                bearing_deg: bearing_deg(start.lat, start.lng, end.lat, end.lng),
                mid_lat,
                mid_lng,
            };
            adjacency
                .entry(edge.start_buoy_id)
                .or_default()
                .push(edge.clone());
            edges.insert(edge.leg_id, edge);
        }

        for outgoing in adjacency.values_mut() {
            outgoing.sort_by_key(|edge| edge.leg_id);
        }

        Self {
            buoys,
            edges,
            adjacency,
            rejected,
        }
    }

    /// Outgoing legs of `buoy`, each carrying its end buoy.
    pub fn neighbors(&self, buoy: BuoyId) -> &[Edge] {
        self.adjacency
            .get(&buoy)
            .map(|edges| edges.as_slice())
            .unwrap_or(&[])
    }

    pub fn buoy(&self, id: BuoyId) -> Option<&Buoy> {
        self.buoys.get(&id)
    }

    pub fn edge(&self, leg_id: LegId) -> Option<&Edge> {
        self.edges.get(&leg_id)
    }

    pub fn buoy_count(&self) -> usize {
        self.buoys.len()
    }

    pub fn leg_count(&self) -> usize {
        self.edges.len()
    }

    /// Legs that were not admitted into the graph.
    pub fn rejected(&self) -> &[RejectedLeg] {
        &self.rejected
    }

    /// Check a leg sequence against the route invariants: every leg on this
    /// map, a connected chain, anchored at `start` and `end`, no repeats.
    pub fn validate_path(
        &self,
        start: BuoyId,
        end: BuoyId,
        legs: &[LegId],
    ) -> Result<Vec<&Edge>, PathError> {
        if legs.is_empty() {
            if start == end {
                return Ok(Vec::new());
            }
            return Err(PathError::Empty { start, end });
        }

        let mut seen = HashSet::new();
        let mut chain: Vec<&Edge> = Vec::with_capacity(legs.len());
        for leg_id in legs {
            let edge = self.edge(*leg_id).ok_or(PathError::UnknownLeg(*leg_id))?;
            if !seen.insert(*leg_id) {
                return Err(PathError::RepeatedLeg(*leg_id));
            }
            if let Some(previous) = chain.last() {
                if previous.end_buoy_id != edge.start_buoy_id {
                    return Err(PathError::Disconnected {
                        previous: previous.leg_id,
                        next: edge.leg_id,
                    });
                }
            }
            chain.push(edge);
        }

        // chain is non-empty here
        let first = chain[0];
        let last = chain[chain.len() - 1];
        if first.start_buoy_id != start {
            return Err(PathError::WrongStart {
                expected: start,
                found: first.start_buoy_id,
            });
        }
        if last.end_buoy_id != end {
            return Err(PathError::WrongEnd {
                expected: end,
                found: last.end_buoy_id,
            });
        }
        Ok(chain)
    }
}
