//! Map, buoy and leg persistence.

use anyhow::Result;
use sqlx::SqlitePool;

use regatta_core::{Buoy, Leg, MapId, MapTopology, RaceMap};

use super::db::{format_ts, parse_ts};

pub async fn upsert_map(pool: &SqlitePool, map: &RaceMap) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO maps (id, name, lat1, lng1, lat2, lng2, is_locked, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(id) DO UPDATE SET
            name = ?2, lat1 = ?3, lng1 = ?4, lat2 = ?5, lng2 = ?6,
            is_locked = ?7, updated_at = ?8
        "#,
    )
    .bind(map.id)
    .bind(&map.name)
    .bind(map.lat1)
    .bind(map.lng1)
    .bind(map.lat2)
    .bind(map.lng2)
    .bind(map.is_locked)
    .bind(format_ts(map.updated_at))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn upsert_buoy(pool: &SqlitePool, buoy: &Buoy) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO buoys (id, map_id, name, lat, lng)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(id) DO UPDATE SET map_id = ?2, name = ?3, lat = ?4, lng = ?5
        "#,
    )
    .bind(buoy.id)
    .bind(buoy.map_id)
    .bind(&buoy.name)
    .bind(buoy.lat)
    .bind(buoy.lng)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn upsert_leg(pool: &SqlitePool, leg: &Leg) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO legs (id, map_id, start_buoy_id, end_buoy_id)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(id) DO UPDATE SET map_id = ?2, start_buoy_id = ?3, end_buoy_id = ?4
        "#,
    )
    .bind(leg.id)
    .bind(leg.map_id)
    .bind(leg.start_buoy_id)
    .bind(leg.end_buoy_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_map(pool: &SqlitePool, map_id: MapId) -> Result<Option<RaceMap>> {
    let row = sqlx::query_as::<_, MapRow>(
        "SELECT id, name, lat1, lng1, lat2, lng2, is_locked, updated_at FROM maps WHERE id = ?1",
    )
    .bind(map_id)
    .fetch_optional(pool)
    .await?;

    row.map(RaceMap::try_from).transpose()
}

/// Load a map with its buoys and legs, ordered by id.
pub async fn load_map_topology(pool: &SqlitePool, map_id: MapId) -> Result<Option<MapTopology>> {
    let Some(map) = load_map(pool, map_id).await? else {
        return Ok(None);
    };

    let buoys = sqlx::query_as::<_, BuoyRow>(
        "SELECT id, map_id, name, lat, lng FROM buoys WHERE map_id = ?1 ORDER BY id",
    )
    .bind(map_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(Buoy::from)
    .collect();

    let legs = sqlx::query_as::<_, LegRow>(
        "SELECT id, map_id, start_buoy_id, end_buoy_id FROM legs WHERE map_id = ?1 ORDER BY id",
    )
    .bind(map_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(Leg::from)
    .collect();

    Ok(Some(MapTopology { map, buoys, legs }))
}

// Internal row types for SQLx
#[derive(sqlx::FromRow)]
struct MapRow {
    id: i64,
    name: String,
    lat1: f64,
    lng1: f64,
    lat2: f64,
    lng2: f64,
    is_locked: bool,
    updated_at: String,
}

impl TryFrom<MapRow> for RaceMap {
    type Error = anyhow::Error;

    fn try_from(row: MapRow) -> Result<Self> {
        Ok(RaceMap {
            id: row.id,
            name: row.name,
            lat1: row.lat1,
            lng1: row.lng1,
            lat2: row.lat2,
            lng2: row.lng2,
            is_locked: row.is_locked,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BuoyRow {
    id: i64,
    map_id: i64,
    name: String,
    lat: f64,
    lng: f64,
}

impl From<BuoyRow> for Buoy {
    fn from(row: BuoyRow) -> Self {
        Buoy {
            id: row.id,
            map_id: row.map_id,
            name: row.name,
            lat: row.lat,
            lng: row.lng,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LegRow {
    id: i64,
    map_id: i64,
    start_buoy_id: i64,
    end_buoy_id: i64,
}

impl From<LegRow> for Leg {
    fn from(row: LegRow) -> Self {
        Leg {
            id: row.id,
            map_id: row.map_id,
            start_buoy_id: row.start_buoy_id,
            end_buoy_id: row.end_buoy_id,
        }
    }
}
