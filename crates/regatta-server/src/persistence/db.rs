//! SQLite pool setup, schema migrations and timestamp encoding.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Embedded migrations, applied in order and recorded in `schema_migrations`.
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../migrations/001_init.sql"))];

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Timestamps are stored as fixed-width RFC 3339 text so that string order
/// matches time order.
pub(crate) fn format_ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("invalid timestamp {:?}", value))?;
    Ok(parsed.with_timezone(&Utc))
}

pub(crate) fn parse_opt_ts(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value.map(parse_ts).transpose()
}

/// Open (creating if needed) the database at `db_path` and bring its schema
/// up to date. `":memory:"` opens a private in-memory database; give it a
/// single connection, each connection sees its own copy.
pub async fn init_database(db_path: &str, max_connections: u32) -> Result<Database> {
    let options = if db_path == ":memory:" {
        SqliteConnectOptions::from_str("sqlite::memory:")?
    } else {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory for {}", db_path))?;
        }
        SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
    };
    let options = options.foreign_keys(true);

    tracing::info!("Connecting to database: {}", db_path);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await
        .with_context(|| format!("opening database {}", db_path))?;

    run_migrations(&pool).await?;
    Ok(Database { pool })
}

/// Split a migration script into statements, dropping `--` comment lines.
fn statements(script: &str) -> impl Iterator<Item = String> + '_ {
    script
        .split(';')
        .map(|chunk| {
            chunk
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|statement| !statement.is_empty())
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    for (version, script) in MIGRATIONS {
        let applied: Option<(i64,)> =
            sqlx::query_as("SELECT version FROM schema_migrations WHERE version = ?1")
                .bind(version)
                .fetch_optional(pool)
                .await?;
        if applied.is_some() {
            continue;
        }

        tracing::info!("Applying migration {}", version);
        let mut tx = pool.begin().await?;
        for statement in statements(script) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("migration {} failed on: {}", version, statement))?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)")
            .bind(version)
            .bind(format_ts(Utc::now()))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(())
}
