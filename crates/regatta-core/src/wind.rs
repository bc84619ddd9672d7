//! Wind field sampler.
//!
//! Turns sparse, timestamped grid samples into a continuous field query:
//! bilinear in space across the bracketing grid cell, linear in time between
//! the two bracketing frames. Queries before the first or after the last frame
//! are clamped to that frame; there is no extrapolation in time.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::error::WindError;
use crate::models::WindSample;
use crate::spatial::WindVector;

/// Coordinates are keyed at micro-degree resolution (~0.1 m).
const COORD_SCALE: f64 = 1_000_000.0;

fn coord_key(value: f64) -> i64 {
    (value * COORD_SCALE).round() as i64
}

/// All samples sharing one timestamp.
#[derive(Debug, Clone)]
struct WindFrame {
    timestamp: DateTime<Utc>,
    lats: Vec<i64>,
    lngs: Vec<i64>,
    samples: HashMap<(i64, i64), WindVector>,
}

/// Position of a coordinate between two axis nodes.
#[derive(Debug, Clone, Copy)]
struct Bracket {
    lo: usize,
    hi: usize,
    t: f64,
}

fn bracket(axis: &[i64], value: f64) -> Option<Bracket> {
    let key = coord_key(value);
    if key < *axis.first()? || key > *axis.last()? {
        return None;
    }
    match axis.binary_search(&key) {
        Ok(idx) => Some(Bracket { lo: idx, hi: idx, t: 0.0 }),
        Err(idx) => {
            // key is strictly inside the axis range, so 0 < idx < len
            let lo = idx - 1;
            let hi = idx;
            let lo_v = axis[lo] as f64 / COORD_SCALE;
            let hi_v = axis[hi] as f64 / COORD_SCALE;
            let t = ((value - lo_v) / (hi_v - lo_v)).clamp(0.0, 1.0);
            Some(Bracket { lo, hi, t })
        }
    }
}

impl WindFrame {
    fn sample(&self, lat: f64, lng: f64) -> Result<WindVector, (usize, usize)> {
        let (Some(lat_b), Some(lng_b)) = (bracket(&self.lats, lat), bracket(&self.lngs, lng))
        else {
            return Err((0, 4));
        };

        let lat_rows = [self.lats[lat_b.lo], self.lats[lat_b.hi]];
        let lng_cols = [self.lngs[lng_b.lo], self.lngs[lng_b.hi]];
        let mut corners = [[WindVector::CALM; 2]; 2];
        let mut found = 0usize;
        let mut required = 0usize;
        for (i, lat_key) in lat_rows.iter().enumerate() {
            for (j, lng_key) in lng_cols.iter().enumerate() {
                // degenerate brackets reuse the same node
                if (i == 1 && lat_b.lo == lat_b.hi) || (j == 1 && lng_b.lo == lng_b.hi) {
                    continue;
                }
                required += 1;
                if let Some(vector) = self.samples.get(&(*lat_key, *lng_key)) {
                    corners[i][j] = *vector;
                    found += 1;
                }
            }
        }
        if found < required {
            return Err((found, required));
        }
        if lat_b.lo == lat_b.hi {
            corners[1] = corners[0];
        }
        if lng_b.lo == lng_b.hi {
            corners[0][1] = corners[0][0];
            corners[1][1] = corners[1][0];
        }

        let south = WindVector::lerp(corners[0][0], corners[0][1], lng_b.t);
        let north = WindVector::lerp(corners[1][0], corners[1][1], lng_b.t);
        Ok(WindVector::lerp(south, north, lat_b.t))
    }
}

/// Immutable wind snapshot for one computation.
#[derive(Debug, Clone, Default)]
pub struct WindField {
    frames: Vec<WindFrame>,
}

impl WindField {
    /// Build a field from samples. Later duplicates of the same
    /// `(timestamp, lat, lng)` replace earlier ones.
    pub fn from_samples<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'a WindSample>,
    {
        let mut grouped: BTreeMap<DateTime<Utc>, HashMap<(i64, i64), WindVector>> =
            BTreeMap::new();
        for sample in samples {
            if !(sample.u.is_finite() && sample.v.is_finite()) {
                continue;
            }
            grouped.entry(sample.timestamp).or_default().insert(
                (coord_key(sample.lat), coord_key(sample.lng)),
                WindVector::new(sample.u, sample.v),
            );
        }

        let frames = grouped
            .into_iter()
            .map(|(timestamp, samples)| {
                let mut lats: Vec<i64> = samples.keys().map(|(lat, _)| *lat).collect();
                let mut lngs: Vec<i64> = samples.keys().map(|(_, lng)| *lng).collect();
                lats.sort_unstable();
                lats.dedup();
                lngs.sort_unstable();
                lngs.dedup();
                WindFrame {
                    timestamp,
                    lats,
                    lngs,
                    samples,
                }
            })
            .collect();

        Self { frames }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Wind vector at `(lat, lng)` and instant `at`.
    pub fn sample(&self, lat: f64, lng: f64, at: DateTime<Utc>) -> Result<WindVector, WindError> {
        let insufficient = |found: usize, required: usize| WindError::InsufficientData {
            lat,
            lng,
            at,
            found,
            required,
        };

        let (Some(first), Some(last)) = (self.frames.first(), self.frames.last()) else {
            return Err(insufficient(0, 4));
        };

        if at <= first.timestamp {
            return first.sample(lat, lng).map_err(|(f, r)| insufficient(f, r));
        }
        if at >= last.timestamp {
            return last.sample(lat, lng).map_err(|(f, r)| insufficient(f, r));
        }

        let idx = self.frames.partition_point(|frame| frame.timestamp <= at);
        let before = &self.frames[idx - 1];
        let after = &self.frames[idx];

        let a = before.sample(lat, lng).map_err(|(f, r)| insufficient(f, r))?;
        if before.timestamp == at {
            return Ok(a);
        }
        let b = after.sample(lat, lng).map_err(|(f, r)| insufficient(f, r))?;

        let span = (after.timestamp - before.timestamp).num_milliseconds() as f64;
        let offset = (at - before.timestamp).num_milliseconds() as f64;
        let t = if span > 0.0 { (offset / span).clamp(0.0, 1.0) } else { 0.0 };
        Ok(WindVector::lerp(a, b, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn grid(at: DateTime<Utc>, u: impl Fn(f64, f64) -> f64) -> Vec<WindSample> {
        let mut samples = Vec::new();
        for lat in [52.0, 53.0] {
            for lng in [4.0, 5.0] {
                samples.push(WindSample {
                    timestamp: at,
                    lat,
                    lng,
                    u: u(lat, lng),
                    v: 0.0,
                });
            }
        }
        samples
    }

    #[test]
    fn bilinear_in_space() {
        let samples = grid(t0(), |lat, lng| (lat - 52.0) * 10.0 + (lng - 4.0) * 2.0);
        let field = WindField::from_samples(&samples);

        let center = field.sample(52.5, 4.5, t0()).unwrap();
        assert!((center.u - 6.0).abs() < 1e-9, "got {}", center.u);

        let corner = field.sample(53.0, 5.0, t0()).unwrap();
        assert!((corner.u - 12.0).abs() < 1e-9);

        let edge = field.sample(52.0, 4.25, t0()).unwrap();
        assert!((edge.u - 0.5).abs() < 1e-9);
    }

    #[test]
    fn linear_in_time() {
        let mut samples = grid(t0(), |_, _| 2.0);
        samples.extend(grid(t0() + Duration::hours(1), |_, _| 4.0));
        let field = WindField::from_samples(&samples);

        let mid = field
            .sample(52.5, 4.5, t0() + Duration::minutes(15))
            .unwrap();
        assert!((mid.u - 2.5).abs() < 1e-9);
    }

    #[test]
    fn clamps_beyond_last_timestamp() {
        let mut samples = grid(t0(), |_, _| 2.0);
        samples.extend(grid(t0() + Duration::hours(1), |_, _| 7.0));
        let field = WindField::from_samples(&samples);

        let later = field
            .sample(52.5, 4.5, t0() + Duration::hours(30))
            .unwrap();
        assert_eq!(later, WindVector::new(7.0, 0.0));

        let earlier = field
            .sample(52.5, 4.5, t0() - Duration::hours(30))
            .unwrap();
        assert_eq!(earlier, WindVector::new(2.0, 0.0));
    }

    #[test]
    fn outside_grid_is_insufficient() {
        let field = WindField::from_samples(&grid(t0(), |_, _| 1.0));
        let err = field.sample(54.0, 4.5, t0()).unwrap_err();
        assert!(matches!(err, WindError::InsufficientData { found: 0, .. }));
    }

    #[test]
    fn missing_corner_is_insufficient() {
        let mut samples = grid(t0(), |_, _| 1.0);
        samples.retain(|s| !(s.lat == 53.0 && s.lng == 5.0));
        let field = WindField::from_samples(&samples);

        let err = field.sample(52.5, 4.5, t0()).unwrap_err();
        assert!(matches!(
            err,
            WindError::InsufficientData {
                found: 3,
                required: 4,
                ..
            }
        ));
        // On the complete south edge only two corners are needed.
        assert!(field.sample(52.0, 4.5, t0()).is_ok());
    }

    #[test]
    fn empty_field_is_insufficient() {
        let field = WindField::default();
        assert!(field.sample(0.0, 0.0, t0()).is_err());
    }

    #[test]
    fn single_sample_answers_exact_point() {
        let samples = vec![WindSample {
            timestamp: t0(),
            lat: 10.0,
            lng: 10.0,
            u: 3.0,
            v: -1.0,
        }];
        let field = WindField::from_samples(&samples);
        assert_eq!(
            field.sample(10.0, 10.0, t0()).unwrap(),
            WindVector::new(3.0, -1.0)
        );
        assert!(field.sample(10.1, 10.0, t0()).is_err());
    }
}
