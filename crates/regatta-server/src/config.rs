//! Server configuration from environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use regatta_core::{knots_to_mps, WindVector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    Sqlite,
    Memory,
}

impl FromStr for StorageMode {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StorageMode::Sqlite),
            "memory" => Ok(StorageMode::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub storage: StorageMode,
    pub db_path: String,
    pub db_max_connections: u32,
    pub seed_path: Option<String>,
    pub job_timeout: Duration,
    pub clock_tick: Duration,
    pub maintenance_interval: Duration,
    pub default_wind: Option<WindVector>,
    pub shortest_speed_knots: f64,
    pub min_boat_speed_knots: f64,
    pub wind_lookback_hours: i64,
    pub wind_horizon_hours: i64,
    pub wind_margin_deg: f64,
    pub wind_retention_hours: i64,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

fn parsed<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let default_wind = match (
            parsed::<f64>("REGATTA_DEFAULT_WIND_U"),
            parsed::<f64>("REGATTA_DEFAULT_WIND_V"),
        ) {
            (Some(u), Some(v)) if u.is_finite() && v.is_finite() => Some(WindVector::new(u, v)),
            _ => None,
        };

        Self {
            server_port: parsed("REGATTA_PORT").unwrap_or(3000),
            storage: parsed("REGATTA_STORAGE").unwrap_or(StorageMode::Sqlite),
            db_path: env::var("REGATTA_DB_PATH").unwrap_or_else(|_| "data/regatta.db".to_string()),
            db_max_connections: parsed("REGATTA_DB_MAX_CONNECTIONS").unwrap_or(5),
            seed_path: env::var("REGATTA_SEED_PATH").ok().filter(|s| !s.trim().is_empty()),
            job_timeout: Duration::from_secs(parsed("REGATTA_JOB_TIMEOUT_SECS").unwrap_or(30)),
            clock_tick: Duration::from_secs(parsed::<u64>("REGATTA_CLOCK_TICK_SECS").unwrap_or(1).max(1)),
            maintenance_interval: Duration::from_secs(
                parsed::<u64>("REGATTA_MAINTENANCE_SECS").unwrap_or(300).max(1),
            ),
            default_wind,
            shortest_speed_knots: parsed("REGATTA_SHORTEST_SPEED_KNOTS").unwrap_or(5.0),
            min_boat_speed_knots: parsed("REGATTA_MIN_BOAT_SPEED_KNOTS").unwrap_or(0.05),
            wind_lookback_hours: parsed("REGATTA_WIND_LOOKBACK_HOURS").unwrap_or(6),
            wind_horizon_hours: parsed("REGATTA_WIND_HORIZON_HOURS").unwrap_or(48),
            wind_margin_deg: parsed("REGATTA_WIND_MARGIN_DEG").unwrap_or(0.25),
            wind_retention_hours: parsed("REGATTA_WIND_RETENTION_HOURS").unwrap_or(24),
            retry_base: Duration::from_secs(parsed("REGATTA_RETRY_BASE_SECS").unwrap_or(5)),
            retry_max: Duration::from_secs(parsed("REGATTA_RETRY_MAX_SECS").unwrap_or(300)),
        }
    }

    pub fn shortest_speed_mps(&self) -> f64 {
        knots_to_mps(self.shortest_speed_knots)
    }

    pub fn min_boat_speed_mps(&self) -> f64 {
        knots_to_mps(self.min_boat_speed_knots)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            storage: StorageMode::Sqlite,
            db_path: "data/regatta.db".to_string(),
            db_max_connections: 5,
            seed_path: None,
            job_timeout: Duration::from_secs(30),
            clock_tick: Duration::from_secs(1),
            maintenance_interval: Duration::from_secs(300),
            default_wind: None,
            shortest_speed_knots: 5.0,
            min_boat_speed_knots: 0.05,
            wind_lookback_hours: 6,
            wind_horizon_hours: 48,
            wind_margin_deg: 0.25,
            wind_retention_hours: 24,
            retry_base: Duration::from_secs(5),
            retry_max: Duration::from_secs(300),
        }
    }
}
