//! Wind sample persistence.
//!
//! Samples are unique per `(timestamp, lat, lng)`; re-ingesting a forecast
//! replaces the vector and bumps `ingested_at`, which is what wind revisions
//! are derived from.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use regatta_core::{BoundingBox, WindSample};

use super::db::{format_ts, parse_opt_ts, parse_ts};

pub async fn upsert_wind(
    pool: &SqlitePool,
    samples: &[WindSample],
    ingested_at: DateTime<Utc>,
) -> Result<usize> {
    let ingested = format_ts(ingested_at);
    let mut tx = pool.begin().await?;
    let mut written = 0usize;
    for sample in samples {
        if !(sample.u.is_finite() && sample.v.is_finite()) {
            continue;
        }
        sqlx::query(
            r#"
            INSERT INTO wind (timestamp, lat, lng, u, v, ingested_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(timestamp, lat, lng) DO UPDATE SET u = ?4, v = ?5, ingested_at = ?6
            "#,
        )
        .bind(format_ts(sample.timestamp))
        .bind(sample.lat)
        .bind(sample.lng)
        .bind(sample.u)
        .bind(sample.v)
        .bind(&ingested)
        .execute(&mut *tx)
        .await?;
        written += 1;
    }
    tx.commit().await?;
    Ok(written)
}

pub async fn load_wind_window(
    pool: &SqlitePool,
    bounds: &BoundingBox,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<WindSample>> {
    let rows = sqlx::query_as::<_, WindRow>(
        r#"
        SELECT timestamp, lat, lng, u, v FROM wind
        WHERE timestamp >= ?1 AND timestamp <= ?2
          AND lat >= ?3 AND lat <= ?4 AND lng >= ?5 AND lng <= ?6
        ORDER BY timestamp, lat, lng
        "#,
    )
    .bind(format_ts(from))
    .bind(format_ts(to))
    .bind(bounds.min_lat)
    .bind(bounds.max_lat)
    .bind(bounds.min_lng)
    .bind(bounds.max_lng)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(WindSample::try_from).collect()
}

pub async fn wind_revision(
    pool: &SqlitePool,
    bounds: &BoundingBox,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let (latest,): (Option<String>,) = sqlx::query_as(
        r#"
        SELECT MAX(ingested_at) FROM wind
        WHERE timestamp >= ?1 AND timestamp <= ?2
          AND lat >= ?3 AND lat <= ?4 AND lng >= ?5 AND lng <= ?6
        "#,
    )
    .bind(format_ts(from))
    .bind(format_ts(to))
    .bind(bounds.min_lat)
    .bind(bounds.max_lat)
    .bind(bounds.min_lng)
    .bind(bounds.max_lng)
    .fetch_one(pool)
    .await?;

    parse_opt_ts(latest.as_deref())
}

pub async fn prune_wind(pool: &SqlitePool, older_than: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM wind WHERE timestamp < ?1")
        .bind(format_ts(older_than))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[derive(sqlx::FromRow)]
struct WindRow {
    timestamp: String,
    lat: f64,
    lng: f64,
    u: f64,
    v: f64,
}

impl TryFrom<WindRow> for WindSample {
    type Error = anyhow::Error;

    fn try_from(row: WindRow) -> Result<Self> {
        Ok(WindSample {
            timestamp: parse_ts(&row.timestamp)?,
            lat: row.lat,
            lng: row.lng,
            u: row.u,
            v: row.v,
        })
    }
}
