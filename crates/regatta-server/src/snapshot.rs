//! Immutable per-computation snapshots of graph, polar and wind data.
//!
//! Each cache entry is keyed by the revision of the data it was built from.
//! A job takes `Arc`s out of the cache before the search starts, so later
//! invalidation only affects future jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use regatta_core::{
    BoundingBox, LegGraph, MapId, PolarModel, RaceMap, RoutingError, ShipId, WindField,
};

use crate::cache::{prune_cache, CacheEntry};
use crate::config::Config;
use crate::persistence::Repository;
use crate::scheduler::JobFailure;

/// Spatial and temporal extent of the wind loaded for one computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindWindow {
    pub bounds: BoundingBox,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct WindWindowSettings {
    pub lookback_hours: i64,
    pub horizon_hours: i64,
    pub margin_deg: f64,
}

impl From<&Config> for WindWindowSettings {
    fn from(config: &Config) -> Self {
        Self {
            lookback_hours: config.wind_lookback_hours.max(0),
            horizon_hours: config.wind_horizon_hours.max(0),
            margin_deg: config.wind_margin_deg,
        }
    }
}

fn floor_hour(value: DateTime<Utc>) -> DateTime<Utc> {
    let secs = value.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(3600), 0).unwrap_or(value)
}

impl WindWindowSettings {
    /// Window around `departure`, aligned to whole hours so that jobs
    /// departing within the same hour share a cached field.
    pub fn window(&self, map: &RaceMap, departure: DateTime<Utc>) -> WindWindow {
        let from = floor_hour(departure - ChronoDuration::hours(self.lookback_hours));
        let to = floor_hour(departure + ChronoDuration::hours(self.horizon_hours))
            + ChronoDuration::hours(1);
        WindWindow {
            bounds: map.bounds().expand(self.margin_deg),
            from,
            to,
        }
    }
}

struct GraphEntry {
    revision: DateTime<Utc>,
    graph: Arc<LegGraph>,
    fetched_at: Instant,
}

impl CacheEntry for GraphEntry {
    fn fetched_at(&self) -> Instant {
        self.fetched_at
    }
}

struct PolarEntry {
    revision: Option<DateTime<Utc>>,
    model: Arc<PolarModel>,
    fetched_at: Instant,
}

impl CacheEntry for PolarEntry {
    fn fetched_at(&self) -> Instant {
        self.fetched_at
    }
}

struct WindEntry {
    window: WindWindow,
    revision: Option<DateTime<Utc>>,
    field: Arc<WindField>,
    fetched_at: Instant,
}

impl CacheEntry for WindEntry {
    fn fetched_at(&self) -> Instant {
        self.fetched_at
    }
}

#[derive(Clone)]
pub struct PolarSnapshot {
    pub model: Arc<PolarModel>,
    pub fetched: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct WindSnapshot {
    pub field: Arc<WindField>,
    pub revision: Option<DateTime<Utc>>,
    pub window: WindWindow,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheSizes {
    pub graphs: usize,
    pub polars: usize,
    pub winds: usize,
}

fn storage(err: anyhow::Error) -> JobFailure {
    JobFailure::Storage(format!("{:#}", err))
}

pub struct SnapshotCache {
    repo: Arc<dyn Repository>,
    window: WindWindowSettings,
    graphs: DashMap<MapId, GraphEntry>,
    polars: DashMap<ShipId, PolarEntry>,
    winds: DashMap<MapId, WindEntry>,
}

impl SnapshotCache {
    pub fn new(repo: Arc<dyn Repository>, window: WindWindowSettings) -> Self {
        Self {
            repo,
            window,
            graphs: DashMap::new(),
            polars: DashMap::new(),
            winds: DashMap::new(),
        }
    }

    /// The map and its leg graph, rebuilt whenever the map's revision moves.
    pub async fn graph(&self, map_id: MapId) -> Result<(RaceMap, Arc<LegGraph>), JobFailure> {
        let map = self
            .repo
            .load_map(map_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| JobFailure::NotFound(format!("map {}", map_id)))?;

        if let Some(entry) = self.graphs.get(&map_id) {
            if entry.revision == map.updated_at {
                return Ok((map, entry.graph.clone()));
            }
        }

        let topology = self
            .repo
            .load_map_topology(map_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| JobFailure::NotFound(format!("map {}", map_id)))?;
        let graph = Arc::new(LegGraph::build(map_id, &topology.buoys, &topology.legs));
        for rejected in graph.rejected() {
            tracing::warn!(
                "Map {}: leg {} left out of graph ({:?})",
                map_id,
                rejected.leg_id,
                rejected.reason
            );
        }
        tracing::debug!(
            "Built leg graph for map {}: {} buoys, {} legs",
            map_id,
            graph.buoy_count(),
            graph.leg_count()
        );

        // Cache under the revision the topology was read at.
        self.graphs.insert(
            map_id,
            GraphEntry {
                revision: topology.map.updated_at,
                graph: graph.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok((topology.map, graph))
    }

    /// Parsed polar for a ship. Parse failures are reported, never cached.
    pub async fn polar(&self, ship_id: ShipId) -> Result<PolarSnapshot, JobFailure> {
        let ship = self
            .repo
            .load_ship(ship_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| JobFailure::NotFound(format!("ship {}", ship_id)))?;

        if let Some(entry) = self.polars.get(&ship_id) {
            if entry.revision == ship.last_fetch_of_polar_data {
                return Ok(PolarSnapshot {
                    model: entry.model.clone(),
                    fetched: entry.revision,
                });
            }
        }

        let model = Arc::new(
            PolarModel::parse(&ship.polar).map_err(|err| JobFailure::Routing(RoutingError::from(err)))?,
        );
        self.polars.insert(
            ship_id,
            PolarEntry {
                revision: ship.last_fetch_of_polar_data,
                model: model.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(PolarSnapshot {
            model,
            fetched: ship.last_fetch_of_polar_data,
        })
    }

    /// Wind field for the window around `departure`.
    pub async fn wind(
        &self,
        map: &RaceMap,
        departure: DateTime<Utc>,
    ) -> Result<WindSnapshot, JobFailure> {
        let window = self.window.window(map, departure);
        let revision = self
            .repo
            .wind_revision(&window.bounds, window.from, window.to)
            .await
            .map_err(storage)?;

        if let Some(entry) = self.winds.get(&map.id) {
            if entry.window == window && entry.revision == revision {
                return Ok(WindSnapshot {
                    field: entry.field.clone(),
                    revision,
                    window,
                });
            }
        }

        let samples = self
            .repo
            .load_wind_window(&window.bounds, window.from, window.to)
            .await
            .map_err(storage)?;
        let field = Arc::new(WindField::from_samples(&samples));
        tracing::debug!(
            "Loaded wind for map {}: {} samples in {} frames",
            map.id,
            samples.len(),
            field.frame_count()
        );
        self.winds.insert(
            map.id,
            WindEntry {
                window,
                revision,
                field: field.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(WindSnapshot {
            field,
            revision,
            window,
        })
    }

    /// Current wind revision for the window a route departing at `departure` used.
    pub async fn current_wind_revision(
        &self,
        map: &RaceMap,
        departure: DateTime<Utc>,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let window = self.window.window(map, departure);
        self.repo
            .wind_revision(&window.bounds, window.from, window.to)
            .await
    }

    /// Forget cached wind after ingestion.
    pub fn invalidate_wind(&self) {
        self.winds.clear();
    }

    pub fn prune(&self, max_entries: usize, max_age: Duration) -> usize {
        prune_cache(&self.graphs, max_entries, max_age)
            + prune_cache(&self.polars, max_entries, max_age)
            + prune_cache(&self.winds, max_entries, max_age)
    }

    pub fn sizes(&self) -> CacheSizes {
        CacheSizes {
            graphs: self.graphs.len(),
            polars: self.polars.len(),
            winds: self.winds.len(),
        }
    }
}
