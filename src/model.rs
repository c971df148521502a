use crate::error::{InsightsError, Result};
use crate::table::{Table, Value};
use linfa::prelude::*;
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2};
use serde::Serialize;
use std::collections::BTreeMap;
pub type FittedLinearRegression = linfa_linear::FittedLinearRegression<f64>;

pub const DEFAULT_START_FUEL_KG: f64 = 100.0;
pub const DEFAULT_FUEL_PENALTY_S_PER_KG: f64 = 0.03;
pub const DEFAULT_TREND_WINDOW: usize = 5;
pub const DEFAULT_TREND_MIN_PERIODS: usize = 2;
pub const DEFAULT_LAP_TIME_COLUMN: &str = "lap_duration_s";
// fewer laps than this and a per-driver slope is mostly noise
const MIN_FIT_LAPS: usize = 5;

// The starting mass and per-kg penalty carry no calibration; they are knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuelModel {
    pub start_fuel_kg: f64,
    pub penalty_s_per_kg: f64,
    pub trend_window: usize,
    pub trend_min_periods: usize,
}

impl Default for FuelModel {
    fn default() -> Self {
        Self {
            start_fuel_kg: DEFAULT_START_FUEL_KG,
            penalty_s_per_kg: DEFAULT_FUEL_PENALTY_S_PER_KG,
            trend_window: DEFAULT_TREND_WINDOW,
            trend_min_periods: DEFAULT_TREND_MIN_PERIODS,
        }
    }
}

impl FuelModel {
    // burns linearly to empty at `total_laps`, never negative
    pub fn estimate_fuel_mass(&self, lap_number: &Array1<f64>, total_laps: i64) -> Array1<f64> {
        let burned_per_lap = self.start_fuel_kg / total_laps.max(1) as f64;
        lap_number.mapv(|lap| (self.start_fuel_kg - burned_per_lap * lap).max(0.0))
    }

    /// Copy of `laps` with `fuel_mass_kg`, `fuel_effect_s`,
    /// `fuel_corrected_lap_s` and `degradation_trend_s` added. Every input
    /// column is kept as is.
    ///
    /// Total laps is the largest lap number seen, so a single bogus lap
    /// number skews the fuel curve for the whole table. Null lap numbers
    /// read as lap 1.
    pub fn fuel_corrected_pace(&self, laps: &Table, lap_time_col: &str) -> Result<Table> {
        if !laps.has_column(lap_time_col) {
            return Err(InsightsError::MissingColumn(lap_time_col.to_string()));
        }

        let lap_numbers: Vec<Option<f64>> = laps.rows().map(|r| r.f64("lap_number")).collect();
        let total_laps = lap_numbers
            .iter()
            .flatten()
            .copied()
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
            .map_or(laps.len() as i64, |max| max as i64);

        let filled: Array1<f64> = lap_numbers.iter().map(|l| l.unwrap_or(1.0)).collect();
        let fuel_mass = self.estimate_fuel_mass(&filled, total_laps);
        let fuel_effect = &fuel_mass * self.penalty_s_per_kg;

        let corrected: Vec<Option<f64>> = laps
            .rows()
            .zip(fuel_effect.iter())
            .map(|(row, fx)| row.f64(lap_time_col).map(|t| t - fx))
            .collect();
        let trend = rolling_mean(&corrected, self.trend_window, self.trend_min_periods);

        let mut out = laps.clone();
        out.push_column("fuel_mass_kg", fuel_mass.iter().map(|m| Value::Float(*m)).collect());
        out.push_column("fuel_effect_s", fuel_effect.iter().map(|fx| Value::Float(*fx)).collect());
        out.push_column("fuel_corrected_lap_s", corrected.into_iter().map(Value::from).collect());
        out.push_column("degradation_trend_s", trend.into_iter().map(Value::from).collect());

        tracing::info!(laps = out.len(), total_laps, "computed fuel-corrected pace");
        Ok(out)
    }
}

pub fn estimate_fuel_mass(lap_number: &Array1<f64>, total_laps: i64) -> Array1<f64> {
    FuelModel::default().estimate_fuel_mass(lap_number, total_laps)
}

pub fn fuel_corrected_pace(laps: &Table, lap_time_col: &str) -> Result<Table> {
    FuelModel::default().fuel_corrected_pace(laps, lap_time_col)
}

// trailing mean over present values; fewer than `min_periods` of them is None
pub fn rolling_mean(values: &[Option<f64>], window: usize, min_periods: usize) -> Vec<Option<f64>> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let (sum, n) = values[start..=i]
                .iter()
                .flatten()
                .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            (n >= min_periods.max(1)).then(|| sum / n as f64)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradationFit {
    pub driver: String,
    pub slope_s_per_lap: f64,
    pub intercept_s: f64,
    pub laps_used: usize,
}

// Per-driver fit of fuel-corrected lap time against lap number. The slope is
// the pace lost per lap once fuel burn is taken out.
pub struct DegradationModel {
    models: BTreeMap<String, FittedLinearRegression>,
    pub fits: Vec<DegradationFit>,
}

impl DegradationModel {
    // reads the output of `fuel_corrected_pace`
    pub fn new(paced: &Table) -> Self {
        let mut by_driver: BTreeMap<String, Vec<(f64, f64)>> = BTreeMap::new();
        for row in paced.rows() {
            let driver = row.text("driver_number").or_else(|| row.text("driver_code"));
            if let (Some(driver), Some(n), Some(t)) = (driver, row.f64("lap_number"), row.f64("fuel_corrected_lap_s")) {
                if t.is_finite() {
                    by_driver.entry(driver).or_default().push((n, t));
                }
            }
        }

        let mut models = BTreeMap::new();
        let mut fits = Vec::new();
        for (driver, points) in by_driver {
            let Some(model) = Self::build_model(&points) else {
                tracing::debug!(%driver, laps = points.len(), "not enough laps for a degradation fit");
                continue;
            };
            fits.push(DegradationFit {
                driver: driver.clone(),
                slope_s_per_lap: model.params()[0],
                intercept_s: model.intercept(),
                laps_used: points.len(),
            });
            models.insert(driver, model);
        }
        Self { models, fits }
    }

    fn build_model(points: &[(f64, f64)]) -> Option<FittedLinearRegression> {
        if points.len() < MIN_FIT_LAPS {
            return None;
        }
        let first = points[0].0;
        if points.iter().all(|(n, _)| *n == first) {
            return None;
        }

        let x = Array2::from_shape_vec((points.len(), 1), points.iter().map(|(n, _)| *n).collect()).ok()?;
        let y: Array1<f64> = points.iter().map(|(_, t)| *t).collect();
        let ds = Dataset::new(x, y);

        LinearRegression::new().fit(&ds).ok()
    }

    pub fn predict_lap_time(&self, driver: &str, lap: f64) -> Option<f64> {
        let model = self.models.get(driver)?;
        let feats = Array2::from_shape_vec((1, 1), vec![lap]).ok()?;
        Some(model.predict(&feats)[0])
    }

    // median slope across drivers
    pub fn field_rate(&self) -> Option<f64> {
        let mut slopes: Vec<f64> = self.fits.iter().map(|f| f.slope_s_per_lap).collect();
        if slopes.is_empty() {
            return None;
        }
        slopes.sort_by(|a, b| a.total_cmp(b));
        let mid = slopes.len() / 2;
        Some(if slopes.len() % 2 == 0 {
            (slopes[mid - 1] + slopes[mid]) / 2.0
        } else {
            slopes[mid]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_open_historical;
    use crate::schema::OPEN_SCHEMA_COLUMNS;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn laps(rows: &[(f64, f64, Option<f64>)]) -> Table {
        let mut t = Table::new(OPEN_SCHEMA_COLUMNS);
        for (driver, lap, time) in rows {
            t.push_row(vec![
                "open_historical".into(),
                Value::Float(9158.0),
                Value::Float(*driver),
                Value::Float(*lap),
                Value::from(*time),
            ]);
        }
        t
    }

    fn col(t: &Table, name: &str) -> Vec<Option<f64>> {
        t.rows().map(|r| r.f64(name)).collect()
    }

    #[test]
    fn fuel_burns_linearly_to_zero() {
        let mass = estimate_fuel_mass(&array![0.0, 1.0, 25.0, 50.0, 60.0], 50);
        assert_eq!(mass, array![100.0, 98.0, 50.0, 0.0, 0.0]);
        // zero total laps behaves like one
        assert_eq!(estimate_fuel_mass(&array![1.0], 0), array![0.0]);
    }

    #[test]
    fn missing_lap_time_column_is_an_error() {
        let mut t = Table::new(["lap_number"]);
        t.push_row(vec![Value::Int(1)]);
        let err = fuel_corrected_pace(&t, DEFAULT_LAP_TIME_COLUMN).unwrap_err();
        assert!(matches!(err, InsightsError::MissingColumn(ref c) if c == "lap_duration_s"));
    }

    #[test]
    fn corrected_pace_and_trend() {
        let t = laps(&[
            (1.0, 1.0, Some(92.0)),
            (1.0, 2.0, Some(91.5)),
            (1.0, 3.0, None),
            (1.0, 4.0, Some(91.0)),
        ]);
        let out = fuel_corrected_pace(&t, DEFAULT_LAP_TIME_COLUMN).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(&out.columns()[..OPEN_SCHEMA_COLUMNS.len()], &OPEN_SCHEMA_COLUMNS);

        let corrected = col(&out, "fuel_corrected_lap_s");
        let trend = col(&out, "degradation_trend_s");
        assert_relative_eq!(col(&out, "fuel_mass_kg")[0].unwrap(), 75.0);
        assert_relative_eq!(col(&out, "fuel_effect_s")[0].unwrap(), 2.25);
        assert_relative_eq!(corrected[0].unwrap(), 89.75);
        assert_relative_eq!(corrected[1].unwrap(), 90.0);
        assert_eq!(corrected[2], None);
        assert_relative_eq!(corrected[3].unwrap(), 91.0);
        assert_eq!(trend[0], None);
        assert_relative_eq!(trend[1].unwrap(), 89.875);
        assert_relative_eq!(trend[2].unwrap(), 89.875);
        assert_relative_eq!(trend[3].unwrap(), (89.75 + 90.0 + 91.0) / 3.0);
    }

    #[test]
    fn pace_keeps_compound_and_sectors() {
        let raw: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_str(
            r#"[
                {"session_key": 9158, "driver_number": 1, "lap": 1, "lap_duration": 92.0,
                 "sector_1": 30.1, "sector_2": 31.2, "sector_3": 30.7,
                 "compound": "SOFT"},
                {"session_key": 9158, "driver_number": 1, "lap": 2, "lap_duration": 91.4,
                 "compound": "SOFT"}
            ]"#,
        )
        .unwrap();
        let normalized = normalize_open_historical(&Table::from_json_records(raw));
        let out = fuel_corrected_pace(&normalized, DEFAULT_LAP_TIME_COLUMN).unwrap();

        let first = out.row(0).unwrap();
        assert_eq!(first.text("compound").as_deref(), Some("SOFT"));
        assert_eq!(first.f64("session_key"), Some(9158.0));
        assert_eq!(first.f64("sector_1_s"), Some(30.1));
        assert_eq!(first.f64("sector_3_s"), Some(30.7));
        assert_eq!(first.text("source_type").as_deref(), Some("open_historical"));
        assert_eq!(out.row(1).unwrap().f64("sector_2_s"), None);
        assert!(out.has_column("fuel_corrected_lap_s"));
    }

    #[test]
    fn rolling_window_slides() {
        let vals: Vec<Option<f64>> = (1..=7).map(|v| Some(v as f64)).collect();
        let trend = rolling_mean(&vals, 5, 2);
        assert_eq!(trend[0], None);
        assert_eq!(trend[1], Some(1.5));
        assert_eq!(trend[4], Some(3.0));
        assert_eq!(trend[6], Some(5.0));
    }

    #[test]
    fn degradation_fit_recovers_slope() {
        let mut paced = Table::new(["driver_number", "lap_number", "fuel_corrected_lap_s"]);
        for lap in 1..=10 {
            paced.push_row(vec![Value::Int(44), Value::Int(lap), Value::Float(88.0 + 0.08 * lap as f64)]);
        }
        for lap in 1..=3 {
            paced.push_row(vec![Value::Int(1), Value::Int(lap), Value::Float(90.0)]);
        }

        let model = DegradationModel::new(&paced);
        assert_eq!(model.fits.len(), 1);
        assert_eq!(model.fits[0].driver, "44");
        assert_relative_eq!(model.fits[0].slope_s_per_lap, 0.08, epsilon = 1e-6);
        assert_relative_eq!(model.predict_lap_time("44", 20.0).unwrap(), 89.6, epsilon = 1e-6);
        assert_eq!(model.predict_lap_time("1", 20.0), None);
        assert_relative_eq!(model.field_rate().unwrap(), 0.08, epsilon = 1e-6);
    }
}
