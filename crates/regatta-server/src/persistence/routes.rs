//! Route and LegsOnRoute persistence.
//!
//! Legs are only ever written inside the transaction that flips a route to
//! DONE, so readers never observe a partial sequence.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};

use regatta_core::{
    BuoyId, LegId, PlanId, PlannedLeg, RouteId, RouteStatus, RouteType,
};

use super::db::{format_ts, parse_opt_ts, parse_ts};
use super::{CompletedRoute, NewRoute, RouteRecord};

pub async fn create_pending_route(pool: &SqlitePool, route: &NewRoute) -> Result<RouteId> {
    let result = sqlx::query(
        r#"
        INSERT INTO routes (plan_id, route_type, status, start_buoy_id, end_buoy_id, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(route.plan_id)
    .bind(route.route_type.as_str())
    .bind(RouteStatus::Pending.as_str())
    .bind(route.start_buoy_id)
    .bind(route.end_buoy_id)
    .bind(format_ts(route.created_at))
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

async fn insert_legs(
    tx: &mut Transaction<'_, Sqlite>,
    route_id: RouteId,
    legs: &[PlannedLeg],
) -> Result<()> {
    for leg in legs {
        sqlx::query(
            r#"
            INSERT INTO legs_on_route (route_id, leg_id, idx, entered_after_s, duration_s)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(route_id)
        .bind(leg.leg_id)
        .bind(leg.index as i64)
        .bind(leg.entered_after_s)
        .bind(leg.duration_s)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

pub async fn complete_route(
    pool: &SqlitePool,
    route_id: RouteId,
    result: &CompletedRoute,
) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let updated = sqlx::query(
        r#"
        UPDATE routes SET
            status = ?1, departure = ?2, total_seconds = ?3,
            wind_revision = ?4, polar_fetch = ?5, completed_at = ?6
        WHERE id = ?7 AND status = ?8
        "#,
    )
    .bind(RouteStatus::Done.as_str())
    .bind(format_ts(result.plan.departure))
    .bind(result.plan.total_seconds)
    .bind(result.wind_revision.map(format_ts))
    .bind(result.polar_fetch.map(format_ts))
    .bind(format_ts(result.completed_at))
    .bind(route_id)
    .bind(RouteStatus::Pending.as_str())
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    insert_legs(&mut tx, route_id, &result.plan.legs).await?;
    tx.commit().await?;
    Ok(true)
}

pub async fn fail_route(
    pool: &SqlitePool,
    route_id: RouteId,
    reason: &str,
    failed_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE routes SET status = ?1, failure_reason = ?2, completed_at = ?3 WHERE id = ?4 AND status = ?5",
    )
    .bind(RouteStatus::Failed.as_str())
    .bind(reason)
    .bind(format_ts(failed_at))
    .bind(route_id)
    .bind(RouteStatus::Pending.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn fail_stale_pending(
    pool: &SqlitePool,
    created_before: DateTime<Utc>,
    reason: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE routes SET status = ?1, failure_reason = ?2 WHERE status = ?3 AND created_at < ?4",
    )
    .bind(RouteStatus::Failed.as_str())
    .bind(reason)
    .bind(RouteStatus::Pending.as_str())
    .bind(format_ts(created_before))
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Store a manually authored route as DONE, unpriced.
pub async fn insert_user_route(
    pool: &SqlitePool,
    plan_id: PlanId,
    start_buoy_id: BuoyId,
    end_buoy_id: BuoyId,
    legs: &[LegId],
    created_at: DateTime<Utc>,
) -> Result<RouteId> {
    let mut tx = pool.begin().await?;
    let result = sqlx::query(
        r#"
        INSERT INTO routes (plan_id, route_type, status, start_buoy_id, end_buoy_id, created_at, completed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
        "#,
    )
    .bind(plan_id)
    .bind(RouteType::User.as_str())
    .bind(RouteStatus::Done.as_str())
    .bind(start_buoy_id)
    .bind(end_buoy_id)
    .bind(format_ts(created_at))
    .execute(&mut *tx)
    .await?;
    let route_id = result.last_insert_rowid();

    let planned: Vec<PlannedLeg> = legs
        .iter()
        .enumerate()
        .map(|(index, leg_id)| PlannedLeg {
            leg_id: *leg_id,
            index,
            entered_after_s: 0.0,
            duration_s: 0.0,
        })
        .collect();
    insert_legs(&mut tx, route_id, &planned).await?;
    tx.commit().await?;
    Ok(route_id)
}

pub async fn latest_route(
    pool: &SqlitePool,
    plan_id: PlanId,
    route_type: RouteType,
    status: Option<RouteStatus>,
) -> Result<Option<RouteRecord>> {
    let row = sqlx::query_as::<_, RouteRow>(
        r#"
        SELECT id, plan_id, route_type, status, start_buoy_id, end_buoy_id, departure,
               total_seconds, wind_revision, polar_fetch, failure_reason, created_at, completed_at
        FROM routes
        WHERE plan_id = ?1 AND route_type = ?2 AND (?3 IS NULL OR status = ?3)
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(plan_id)
    .bind(route_type.as_str())
    .bind(status.map(|s| s.as_str()))
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let legs = sqlx::query_as::<_, LegOnRouteRow>(
        "SELECT leg_id, idx, entered_after_s, duration_s FROM legs_on_route WHERE route_id = ?1 ORDER BY idx",
    )
    .bind(row.id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(PlannedLeg::from)
    .collect();

    let mut record = RouteRecord::try_from(row)?;
    record.legs = legs;
    Ok(Some(record))
}

#[derive(sqlx::FromRow)]
struct RouteRow {
    id: i64,
    plan_id: i64,
    route_type: String,
    status: String,
    start_buoy_id: i64,
    end_buoy_id: i64,
    departure: Option<String>,
    total_seconds: Option<f64>,
    wind_revision: Option<String>,
    polar_fetch: Option<String>,
    failure_reason: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl TryFrom<RouteRow> for RouteRecord {
    type Error = anyhow::Error;

    fn try_from(row: RouteRow) -> Result<Self> {
        let route_type = RouteType::parse(&row.route_type)
            .ok_or_else(|| anyhow::anyhow!("unknown route type {:?}", row.route_type))?;
        let status = RouteStatus::parse(&row.status)
            .ok_or_else(|| anyhow::anyhow!("unknown route status {:?}", row.status))?;
        Ok(RouteRecord {
            id: row.id,
            plan_id: row.plan_id,
            route_type,
            status,
            start_buoy_id: row.start_buoy_id,
            end_buoy_id: row.end_buoy_id,
            departure: parse_opt_ts(row.departure.as_deref())?,
            total_seconds: row.total_seconds,
            wind_revision: parse_opt_ts(row.wind_revision.as_deref())?,
            polar_fetch: parse_opt_ts(row.polar_fetch.as_deref())?,
            failure_reason: row.failure_reason,
            created_at: parse_ts(&row.created_at)?,
            completed_at: parse_opt_ts(row.completed_at.as_deref())?,
            legs: Vec::new(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct LegOnRouteRow {
    leg_id: i64,
    idx: i64,
    entered_after_s: f64,
    duration_s: f64,
}

impl From<LegOnRouteRow> for PlannedLeg {
    fn from(row: LegOnRouteRow) -> Self {
        PlannedLeg {
            leg_id: row.leg_id,
            index: row.idx.max(0) as usize,
            entered_after_s: row.entered_after_s,
            duration_s: row.duration_s,
        }
    }
}
