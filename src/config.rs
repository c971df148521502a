use crate::error::{InsightsError, Result};
use crate::model::FuelModel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_BASE_URL: &str = "https://api.openf1.org/v1";

// every field has a default, a config file only lists what it overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightsConfig {
    pub bin_size_m: f64,
    pub start_fuel_kg: f64,
    pub fuel_penalty_s_per_kg: f64,
    pub trend_window: usize,
    pub trend_min_periods: usize,
    pub simulation_seed: u64,
    pub noise_std_s: f64,
    pub historical_base_url: String,
    pub http_timeout_s: u64,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            bin_size_m: crate::compare::DEFAULT_BIN_SIZE_M,
            start_fuel_kg: crate::model::DEFAULT_START_FUEL_KG,
            fuel_penalty_s_per_kg: crate::model::DEFAULT_FUEL_PENALTY_S_PER_KG,
            trend_window: crate::model::DEFAULT_TREND_WINDOW,
            trend_min_periods: crate::model::DEFAULT_TREND_MIN_PERIODS,
            simulation_seed: crate::strategy::DEFAULT_SEED,
            noise_std_s: crate::strategy::DEFAULT_NOISE_STD_S,
            historical_base_url: DEFAULT_BASE_URL.to_string(),
            http_timeout_s: 30,
        }
    }
}

impl InsightsConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&data)?;
        cfg.check()?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    fn check(&self) -> Result<()> {
        if !(self.bin_size_m > 0.0) {
            return Err(InsightsError::Config(format!(
                "bin_size_m must be positive, got {}",
                self.bin_size_m
            )));
        }
        if self.trend_window == 0 || self.trend_min_periods == 0 {
            return Err(InsightsError::Config(
                "trend_window and trend_min_periods must be at least 1".into(),
            ));
        }
        if self.trend_min_periods > self.trend_window {
            return Err(InsightsError::Config(format!(
                "trend_min_periods ({}) exceeds trend_window ({})",
                self.trend_min_periods, self.trend_window
            )));
        }
        Ok(())
    }

    pub fn fuel_model(&self) -> FuelModel {
        FuelModel {
            start_fuel_kg: self.start_fuel_kg,
            penalty_s_per_kg: self.fuel_penalty_s_per_kg,
            trend_window: self.trend_window,
            trend_min_periods: self.trend_min_periods,
        }
    }
}
