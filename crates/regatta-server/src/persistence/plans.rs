//! Plan persistence operations.

use anyhow::Result;
use sqlx::SqlitePool;

use regatta_core::{Plan, PlanId, PlanStatus};

use super::db::{format_ts, parse_ts};

const PLAN_COLUMNS: &str = "id, name, owner_id, map_id, ship_id, start_buoy_id, end_buoy_id, \
     start_time, race_seconds_remaining, status";

pub async fn upsert_plan(pool: &SqlitePool, plan: &Plan) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO plans (
            id, name, owner_id, map_id, ship_id,
            start_buoy_id, end_buoy_id, start_time,
            race_seconds_remaining, status
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(id) DO UPDATE SET
            name = ?2, owner_id = ?3, map_id = ?4, ship_id = ?5,
            start_buoy_id = ?6, end_buoy_id = ?7, start_time = ?8,
            race_seconds_remaining = ?9, status = ?10
        "#,
    )
    .bind(plan.id)
    .bind(&plan.name)
    .bind(plan.owner_id)
    .bind(plan.map_id)
    .bind(plan.ship_id)
    .bind(plan.start_buoy_id)
    .bind(plan.end_buoy_id)
    .bind(format_ts(plan.start_time))
    .bind(plan.race_seconds_remaining)
    .bind(plan.status.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_plan(pool: &SqlitePool, plan_id: PlanId) -> Result<Option<Plan>> {
    let row = sqlx::query_as::<_, PlanRow>(&format!(
        "SELECT {} FROM plans WHERE id = ?1",
        PLAN_COLUMNS
    ))
    .bind(plan_id)
    .fetch_optional(pool)
    .await?;

    row.map(Plan::try_from).transpose()
}

pub async fn list_active_plans(pool: &SqlitePool) -> Result<Vec<Plan>> {
    let rows = sqlx::query_as::<_, PlanRow>(&format!(
        "SELECT {} FROM plans WHERE status = ?1 ORDER BY id",
        PLAN_COLUMNS
    ))
    .bind(PlanStatus::Active.as_str())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Plan::try_from).collect()
}

pub async fn tick_plan(
    pool: &SqlitePool,
    plan_id: PlanId,
    remaining_secs: i64,
    status: PlanStatus,
) -> Result<()> {
    sqlx::query("UPDATE plans SET race_seconds_remaining = ?1, status = ?2 WHERE id = ?3")
        .bind(remaining_secs)
        .bind(status.as_str())
        .bind(plan_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: i64,
    name: String,
    owner_id: i64,
    map_id: i64,
    ship_id: i64,
    start_buoy_id: i64,
    end_buoy_id: i64,
    start_time: String,
    race_seconds_remaining: Option<i64>,
    status: String,
}

impl TryFrom<PlanRow> for Plan {
    type Error = anyhow::Error;

    fn try_from(row: PlanRow) -> Result<Self> {
        let status = PlanStatus::parse(&row.status)
            .ok_or_else(|| anyhow::anyhow!("unknown plan status {:?}", row.status))?;
        Ok(Plan {
            id: row.id,
            name: row.name,
            owner_id: row.owner_id,
            map_id: row.map_id,
            ship_id: row.ship_id,
            start_buoy_id: row.start_buoy_id,
            end_buoy_id: row.end_buoy_id,
            start_time: parse_ts(&row.start_time)?,
            race_seconds_remaining: row.race_seconds_remaining,
            status,
        })
    }
}
