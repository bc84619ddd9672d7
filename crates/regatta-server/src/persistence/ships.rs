//! Ship persistence operations.

use anyhow::Result;
use sqlx::SqlitePool;

use regatta_core::{Ship, ShipId};

use super::db::{format_ts, parse_opt_ts};

pub async fn upsert_ship(pool: &SqlitePool, ship: &Ship) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ships (id, name, polar, last_fetch_of_polar_data)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(id) DO UPDATE SET name = ?2, polar = ?3, last_fetch_of_polar_data = ?4
        "#,
    )
    .bind(ship.id)
    .bind(&ship.name)
    .bind(&ship.polar)
    .bind(ship.last_fetch_of_polar_data.map(format_ts))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_ship(pool: &SqlitePool, ship_id: ShipId) -> Result<Option<Ship>> {
    let row = sqlx::query_as::<_, ShipRow>(
        "SELECT id, name, polar, last_fetch_of_polar_data FROM ships WHERE id = ?1",
    )
    .bind(ship_id)
    .fetch_optional(pool)
    .await?;

    row.map(Ship::try_from).transpose()
}

#[derive(sqlx::FromRow)]
struct ShipRow {
    id: i64,
    name: String,
    polar: String,
    last_fetch_of_polar_data: Option<String>,
}

impl TryFrom<ShipRow> for Ship {
    type Error = anyhow::Error;

    fn try_from(row: ShipRow) -> Result<Self> {
        Ok(Ship {
            id: row.id,
            name: row.name,
            polar: row.polar,
            last_fetch_of_polar_data: parse_opt_ts(row.last_fetch_of_polar_data.as_deref())?,
        })
    }
}
