//! Polar performance model.
//!
//! Stored encoding is semicolon separated text:
//!
//! ```text
//! twa/tws;6;8;10;12
//! 42.5;0;0;4.9;0          <- optimum row: best beat angle/VMG for the 10 kn column
//! 52;5.1;5.9;6.4;6.7
//! 60;5.4;6.2;6.7;6.9
//! 90;5.9;6.8;7.3;7.5
//! 150;4.2;5.3;6.1;6.8
//! 165;0;0;0;6.3           <- optimum row: best run angle/VMG for the 12 kn column
//! ```
//!
//! The header holds true wind speeds in knots, every other row a true wind
//! angle in degrees followed by boat speeds in knots.

use serde::{Deserialize, Serialize};

use crate::error::PolarError;
use crate::spatial::{fold_deg, knots_to_mps, WindVector};

const SEPARATOR: char = ';';
const BEAT_ROW_MAX_DEG: f64 = 60.0;
const RUN_ROW_MIN_DEG: f64 = 100.0;

/// Optimal angle and velocity made good for one wind speed column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Optimum {
    pub angle_deg: f64,
    pub vmg_knots: f64,
}

/// Boat speed as a function of true wind angle and true wind speed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolarModel {
    tws_knots: Vec<f64>,
    twa_deg: Vec<f64>,
    /// `speeds[angle_row][speed_col]`, knots
    speeds: Vec<Vec<f64>>,
    beat: Vec<Option<Optimum>>,
    run: Vec<Option<Optimum>>,
}

fn invalid(message: impl Into<String>) -> PolarError {
    PolarError::InvalidPolarData(message.into())
}

fn parse_number(cell: &str, line_no: usize) -> Result<f64, PolarError> {
    let value: f64 = cell
        .trim()
        .parse()
        .map_err(|_| invalid(format!("line {line_no}: '{}' is not a number", cell.trim())))?;
    if !value.is_finite() {
        return Err(invalid(format!("line {line_no}: non-finite value")));
    }
    Ok(value)
}

/// Clamped bracket on a strictly increasing axis.
fn axis_bracket(axis: &[f64], value: f64) -> (usize, usize, f64) {
    let last = axis.len() - 1;
    if value <= axis[0] {
        return (0, 0, 0.0);
    }
    if value >= axis[last] {
        return (last, last, 0.0);
    }
    let hi = axis.partition_point(|node| *node <= value);
    let lo = hi - 1;
    let t = (value - axis[lo]) / (axis[hi] - axis[lo]);
    (lo, hi, t)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

impl PolarModel {
    /// Parse the stored encoding, rejecting anything that is not a
    /// monotonic, non-negative speed table.
    pub fn parse(encoded: &str) -> Result<Self, PolarError> {
        let mut lines = encoded
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        let Some((header_no, header)) = lines.next() else {
            return Err(invalid("empty polar"));
        };
        let mut header_cells = header.split(SEPARATOR);
        header_cells.next();
        let tws_knots = header_cells
            .map(|cell| parse_number(cell, header_no))
            .collect::<Result<Vec<_>, _>>()?;
        if tws_knots.is_empty() {
            return Err(invalid("header has no wind speed columns"));
        }
        if tws_knots.iter().any(|tws| *tws < 0.0) {
            return Err(invalid("negative wind speed in header"));
        }
        if tws_knots.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(invalid("wind speeds are not strictly increasing"));
        }

        let columns = tws_knots.len();
        let mut rows: Vec<(f64, Vec<f64>)> = Vec::new();
        let mut beat = vec![None; columns];
        let mut run = vec![None; columns];

        for (line_no, line) in lines {
            let cells: Vec<&str> = line.split(SEPARATOR).collect();
            if cells.len() != columns + 1 {
                return Err(invalid(format!(
                    "line {line_no}: expected {} values, found {}",
                    columns + 1,
                    cells.len()
                )));
            }
            let angle = parse_number(cells[0], line_no)?;
            if !(0.0..=180.0).contains(&angle) {
                return Err(invalid(format!("line {line_no}: angle {angle} outside [0, 180]")));
            }
            let speeds = cells[1..]
                .iter()
                .map(|cell| parse_number(cell, line_no))
                .collect::<Result<Vec<_>, _>>()?;
            if speeds.iter().any(|speed| *speed < 0.0) {
                return Err(invalid(format!("line {line_no}: negative boat speed")));
            }

            let non_zero: Vec<usize> = speeds
                .iter()
                .enumerate()
                .filter(|(_, speed)| **speed > 0.0)
                .map(|(idx, _)| idx)
                .collect();
            let is_optimum_row = columns > 1
                && non_zero.len() == 1
                && (angle < BEAT_ROW_MAX_DEG || angle > RUN_ROW_MIN_DEG);
            if is_optimum_row {
                let col = non_zero[0];
                let optimum = Some(Optimum {
                    angle_deg: angle,
                    vmg_knots: speeds[col],
                });
                if angle < BEAT_ROW_MAX_DEG {
                    beat[col] = optimum;
                } else {
                    run[col] = optimum;
                }
                continue;
            }
            rows.push((angle, speeds));
        }

        if rows.is_empty() {
            return Err(invalid("no speed rows"));
        }
        rows.sort_by(|a, b| a.0.total_cmp(&b.0));
        if rows.windows(2).any(|pair| pair[1].0 <= pair[0].0) {
            return Err(invalid("duplicate true wind angle"));
        }

        let (twa_deg, speeds) = rows.into_iter().unzip();
        Ok(Self {
            tws_knots,
            twa_deg,
            speeds,
            beat,
            run,
        })
    }

    pub fn tws_knots(&self) -> &[f64] {
        &self.tws_knots
    }

    pub fn twa_deg(&self) -> &[f64] {
        &self.twa_deg
    }

    /// Optimal beat for a wind speed, interpolated across the columns that define one.
    pub fn beat_optimum(&self, tws_knots: f64) -> Option<Optimum> {
        self.optimum(&self.beat, tws_knots)
    }

    /// Optimal run for a wind speed, interpolated across the columns that define one.
    pub fn run_optimum(&self, tws_knots: f64) -> Option<Optimum> {
        self.optimum(&self.run, tws_knots)
    }

    fn optimum(&self, column: &[Option<Optimum>], tws_knots: f64) -> Option<Optimum> {
        let defined: Vec<(f64, Optimum)> = self
            .tws_knots
            .iter()
            .zip(column)
            .filter_map(|(tws, optimum)| optimum.map(|o| (*tws, o)))
            .collect();
        if defined.is_empty() {
            return None;
        }
        let axis: Vec<f64> = defined.iter().map(|(tws, _)| *tws).collect();
        let (lo, hi, t) = axis_bracket(&axis, tws_knots);
        let (a, b) = (defined[lo].1, defined[hi].1);
        Some(Optimum {
            angle_deg: lerp(a.angle_deg, b.angle_deg, t),
            vmg_knots: lerp(a.vmg_knots, b.vmg_knots, t),
        })
    }

    /// Achievable speed along the course in knots.
    ///
    /// The angle is folded into [0, 180]; both axes are clamped to the table.
    /// Courses tighter than the optimal beat (or deeper than the optimal run)
    /// are sailed by tacking (gybing), giving `vmg / cos(angle to the wind axis)`.
    pub fn speed_knots(&self, twa_deg: f64, tws_knots: f64) -> f64 {
        let twa = if twa_deg.is_finite() { fold_deg(twa_deg) } else { 0.0 };
        let tws = if tws_knots.is_finite() { tws_knots.max(0.0) } else { 0.0 };

        if let Some(beat) = self.beat_optimum(tws) {
            if twa < beat.angle_deg {
                return (beat.vmg_knots / twa.to_radians().cos()).max(0.0);
            }
        }
        if let Some(run) = self.run_optimum(tws) {
            if twa > run.angle_deg {
                return (run.vmg_knots / (180.0 - twa).to_radians().cos()).max(0.0);
            }
        }

        let (r0, r1, rt) = axis_bracket(&self.twa_deg, twa);
        let (c0, c1, ct) = axis_bracket(&self.tws_knots, tws);
        let low = lerp(self.speeds[r0][c0], self.speeds[r0][c1], ct);
        let high = lerp(self.speeds[r1][c0], self.speeds[r1][c1], ct);
        lerp(low, high, rt).max(0.0)
    }

    /// Boat speed in m/s on `heading_deg` in the given wind.
    pub fn boat_speed_mps(&self, wind: WindVector, heading_deg: f64) -> f64 {
        let twa = wind.true_wind_angle(heading_deg);
        knots_to_mps(self.speed_knots(twa, wind.speed_knots()))
    }
}
