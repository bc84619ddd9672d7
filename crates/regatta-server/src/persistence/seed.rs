//! JSON seed data for local runs.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use regatta_core::{Buoy, Leg, LegId, Plan, PlanId, RaceMap, Ship, WindSample};

/// A manually authored route for a plan, as an ordered leg list.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRouteSeed {
    pub plan_id: PlanId,
    pub legs: Vec<LegId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub maps: Vec<RaceMap>,
    pub buoys: Vec<Buoy>,
    pub legs: Vec<Leg>,
    pub ships: Vec<Ship>,
    pub plans: Vec<Plan>,
    pub wind: Vec<WindSample>,
    pub user_routes: Vec<UserRouteSeed>,
}

impl Seed {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading seed file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing seed file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_seed() {
        let seed: Seed = serde_json::from_str(
            r#"{
                "maps": [{"id": 1, "name": "Bay", "lat1": 0, "lng1": 0, "lat2": 1, "lng2": 1,
                          "updated_at": "2024-06-01T00:00:00Z"}],
                "user_routes": [{"plan_id": 3, "legs": [10, 20]}]
            }"#,
        )
        .unwrap();
        assert_eq!(seed.maps.len(), 1);
        assert!(!seed.maps[0].is_locked);
        assert!(seed.buoys.is_empty());
        assert_eq!(seed.user_routes[0].legs, vec![10, 20]);
    }
}
