use crate::error::{InsightsError, Result};
use crate::table::Table;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const DEFAULT_BIN_SIZE_M: f64 = 50.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinnedTelemetry {
    pub driver_code: String,
    pub lap_number: f64,
    pub bin_index: i64,
    pub speed_kph: Option<f64>,
    pub throttle_pct: Option<f64>,
    pub brake_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverComparison {
    pub lap_number: f64,
    pub bin_index: i64,
    pub driver_code_a: String,
    pub speed_a: Option<f64>,
    pub throttle_a: Option<f64>,
    pub brake_a: Option<f64>,
    pub driver_code_b: String,
    pub speed_b: Option<f64>,
    pub throttle_b: Option<f64>,
    pub brake_b: Option<f64>,
    pub speed_delta_kph: Option<f64>,
}

#[derive(Default)]
struct Mean {
    sum: f64,
    n: usize,
}

impl Mean {
    fn push(&mut self, v: Option<f64>) {
        if let Some(v) = v {
            self.sum += v;
            self.n += 1;
        }
    }

    fn get(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }
}

pub fn bin_index(distance_m: f64, bin_size_m: f64) -> Option<i64> {
    let idx = (distance_m / bin_size_m).floor();
    idx.is_finite().then_some(idx as i64)
}

// Lap numbers group as floats, so a lap 1.5 row gets its own group rather
// than merging into lap 1 or 2.
#[derive(Debug, Clone, Copy)]
struct LapKey(f64);

impl LapKey {
    fn new(lap: f64) -> Self {
        // folds -0.0 into 0.0
        LapKey(lap + 0.0)
    }
}

impl PartialEq for LapKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LapKey {}

impl PartialOrd for LapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Mean speed, throttle and brake per (driver_code, lap_number, bin_index).
///
/// Rows missing any of the three keys are left out. Output is ordered by
/// driver, lap, then bin.
pub fn telemetry_bin_average(table: &Table, bin_size_m: f64) -> Result<Vec<BinnedTelemetry>> {
    if !(bin_size_m > 0.0) || !bin_size_m.is_finite() {
        return Err(InsightsError::InvalidParameter {
            name: "bin_size_m",
            reason: format!("must be a positive number, got {bin_size_m}"),
        });
    }

    let mut groups: BTreeMap<(String, LapKey, i64), [Mean; 3]> = BTreeMap::new();
    let mut skipped = 0usize;

    for row in table.rows() {
        let driver = row.text("driver_code");
        let lap = row.f64("lap_number").filter(|l| l.is_finite()).map(LapKey::new);
        let bin = row.f64("lap_distance_m").and_then(|d| bin_index(d, bin_size_m));
        let (Some(driver), Some(lap), Some(bin)) = (driver, lap, bin) else {
            skipped += 1;
            continue;
        };
        let acc = groups.entry((driver, lap, bin)).or_default();
        acc[0].push(row.f64("speed_kph"));
        acc[1].push(row.f64("throttle_pct"));
        acc[2].push(row.f64("brake_pct"));
    }

    if skipped > 0 {
        tracing::debug!(skipped, "rows without driver/lap/bin keys left out of binning");
    }

    Ok(groups
        .into_iter()
        .map(|((driver_code, LapKey(lap_number), bin_index), [speed, throttle, brake])| BinnedTelemetry {
            driver_code,
            lap_number,
            bin_index,
            speed_kph: speed.get(),
            throttle_pct: throttle.get(),
            brake_pct: brake.get(),
        })
        .collect())
}

// inner join on (lap_number, bin_index); bins only one driver covered are dropped
pub fn compare_two_drivers(table: &Table, driver_a: &str, driver_b: &str) -> Result<Vec<DriverComparison>> {
    compare_two_drivers_binned(table, driver_a, driver_b, DEFAULT_BIN_SIZE_M)
}

pub fn compare_two_drivers_binned(
    table: &Table,
    driver_a: &str,
    driver_b: &str,
    bin_size_m: f64,
) -> Result<Vec<DriverComparison>> {
    let binned = telemetry_bin_average(table, bin_size_m)?;

    let b_side: BTreeMap<(LapKey, i64), &BinnedTelemetry> = binned
        .iter()
        .filter(|r| r.driver_code == driver_b)
        .map(|r| ((LapKey(r.lap_number), r.bin_index), r))
        .collect();

    let merged: Vec<DriverComparison> = binned
        .iter()
        .filter(|r| r.driver_code == driver_a)
        .filter_map(|a| {
            let b = b_side.get(&(LapKey(a.lap_number), a.bin_index))?;
            Some(DriverComparison {
                lap_number: a.lap_number,
                bin_index: a.bin_index,
                driver_code_a: a.driver_code.clone(),
                speed_a: a.speed_kph,
                throttle_a: a.throttle_pct,
                brake_a: a.brake_pct,
                driver_code_b: b.driver_code.clone(),
                speed_b: b.speed_kph,
                throttle_b: b.throttle_pct,
                brake_b: b.brake_pct,
                speed_delta_kph: a.speed_kph.zip(b.speed_kph).map(|(sa, sb)| sa - sb),
            })
        })
        .collect();

    tracing::info!(driver_a, driver_b, bins = merged.len(), "compared drivers");
    Ok(merged)
}

// first-seen order
pub fn distinct_driver_codes(table: &Table) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for code in table.rows().filter_map(|r| r.text("driver_code")) {
        if !code.is_empty() && !seen.contains(&code) {
            seen.push(code);
        }
    }
    seen
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DistanceSample {
    pub distance_m: Option<f64>,
    pub cumulative_s: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LapDeltaPoint {
    pub distance_m: f64,
    pub delta_s: f64,
}

/// Time gap of `reference` over `comparison` at each reference sample.
///
/// The comparison cursor only moves forward, so both traces must be
/// ordered by distance. Missing values read as zero. Positive deltas mean
/// the reference lap is behind.
pub fn lap_delta(reference: &[DistanceSample], comparison: &[DistanceSample]) -> Vec<LapDeltaPoint> {
    if comparison.is_empty() {
        return Vec::new();
    }
    let mut j = 0usize;
    reference
        .iter()
        .map(|r| {
            let d = r.distance_m.unwrap_or(0.0);
            while j + 1 < comparison.len() && comparison[j + 1].distance_m.unwrap_or(0.0) < d {
                j += 1;
            }
            LapDeltaPoint {
                distance_m: d,
                delta_s: r.cumulative_s.unwrap_or(0.0) - comparison[j].cumulative_s.unwrap_or(0.0),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::USER_SCHEMA_COLUMNS;
    use crate::table::Value;

    fn telemetry(rows: &[(&str, f64, f64, f64)]) -> Table {
        let mut t = Table::new(USER_SCHEMA_COLUMNS);
        for (driver, lap, dist, speed) in rows {
            t.push_row(vec![
                "user_upload".into(),
                "s".into(),
                (*driver).into(),
                Value::Float(*lap),
                Value::Float(*dist),
                Value::Float(*speed),
                Value::Float(50.0),
                Value::Float(0.0),
            ]);
        }
        t
    }

    #[test]
    fn separate_bins_for_10_and_60_metres() {
        let t = telemetry(&[("VER", 1.0, 10.0, 200.0), ("VER", 1.0, 60.0, 210.0)]);
        let binned = telemetry_bin_average(&t, 50.0).unwrap();
        assert_eq!(binned.len(), 2);
        assert_eq!(binned[0].bin_index, 0);
        assert_eq!(binned[1].bin_index, 1);
        assert_eq!(binned[1].speed_kph, Some(210.0));
    }

    #[test]
    fn bins_average_and_drop_null_keys() {
        let mut t = telemetry(&[("VER", 1.0, 5.0, 200.0), ("VER", 1.0, 45.0, 220.0)]);
        t.push_row(vec!["user_upload".into(), "s".into(), Value::Null, Value::Float(1.0), Value::Float(5.0)]);
        t.push_row(vec!["user_upload".into(), "s".into(), "VER".into(), Value::Float(1.0), Value::Null]);
        let binned = telemetry_bin_average(&t, 50.0).unwrap();
        assert_eq!(binned.len(), 1);
        assert_eq!(binned[0].speed_kph, Some(210.0));
        assert_eq!(binned[0].throttle_pct, Some(50.0));
    }

    #[test]
    fn fractional_lap_is_its_own_group() {
        let t = telemetry(&[
            ("VER", 1.0, 10.0, 200.0),
            ("VER", 1.5, 10.0, 260.0),
            ("VER", 2.0, 10.0, 220.0),
        ]);
        let binned = telemetry_bin_average(&t, 50.0).unwrap();
        let laps: Vec<f64> = binned.iter().map(|b| b.lap_number).collect();
        assert_eq!(laps, vec![1.0, 1.5, 2.0]);
        assert_eq!(binned[1].speed_kph, Some(260.0));

        let mut both = t.clone();
        both.push_row(vec!["user_upload".into(), "s".into(), "HAM".into(), Value::Float(1.5), Value::Float(30.0), Value::Float(250.0)]);
        let cmp = compare_two_drivers(&both, "VER", "HAM").unwrap();
        assert_eq!(cmp.len(), 1);
        assert_eq!(cmp[0].lap_number, 1.5);
        assert_eq!(cmp[0].speed_delta_kph, Some(10.0));
    }

    #[test]
    fn rejects_non_positive_bin_size() {
        let t = telemetry(&[("VER", 1.0, 5.0, 200.0)]);
        assert!(telemetry_bin_average(&t, 0.0).is_err());
        assert!(telemetry_bin_average(&t, f64::NAN).is_err());
    }

    #[test]
    fn comparison_is_an_inner_join() {
        let t = telemetry(&[
            ("VER", 1.0, 10.0, 300.0),
            ("VER", 1.0, 60.0, 280.0),
            ("VER", 1.0, 110.0, 250.0),
            ("HAM", 1.0, 20.0, 295.0),
            ("HAM", 1.0, 70.0, 282.0),
            ("HAM", 2.0, 20.0, 290.0),
        ]);
        let cmp = compare_two_drivers(&t, "VER", "HAM").unwrap();
        let keys: Vec<(f64, i64)> = cmp.iter().map(|c| (c.lap_number, c.bin_index)).collect();
        assert_eq!(keys, vec![(1.0, 0), (1.0, 1)]);
        assert_eq!(cmp[0].speed_delta_kph, Some(5.0));
        assert_eq!(cmp[1].speed_delta_kph, Some(-2.0));
        assert_eq!(cmp[0].driver_code_b, "HAM");
    }

    #[test]
    fn unknown_driver_gives_empty_result() {
        let t = telemetry(&[("VER", 1.0, 10.0, 300.0)]);
        assert!(compare_two_drivers(&t, "VER", "LEC").unwrap().is_empty());
    }

    #[test]
    fn distinct_codes_in_first_seen_order() {
        let t = telemetry(&[("HAM", 1.0, 1.0, 1.0), ("VER", 1.0, 1.0, 1.0), ("HAM", 2.0, 1.0, 1.0), ("", 1.0, 1.0, 1.0)]);
        assert_eq!(distinct_driver_codes(&t), vec!["HAM".to_string(), "VER".to_string()]);
    }

    #[test]
    fn lap_delta_tracks_comparison_cursor() {
        let s = |d: f64, t: f64| DistanceSample {
            distance_m: Some(d),
            cumulative_s: Some(t),
        };
        let reference = [s(0.0, 0.0), s(100.0, 2.0), s(200.0, 4.5)];
        let comparison = [s(0.0, 0.0), s(90.0, 1.8), s(180.0, 3.9), s(260.0, 5.0)];
        let out = lap_delta(&reference, &comparison);
        let deltas: Vec<f64> = out.iter().map(|p| p.delta_s).collect();
        assert_eq!(out.len(), 3);
        assert!((deltas[0] - 0.0).abs() < 1e-9);
        assert!((deltas[1] - 0.2).abs() < 1e-9);
        assert!((deltas[2] - 0.6).abs() < 1e-9);
        assert!(lap_delta(&reference, &[]).is_empty());
    }
}
