use crate::error::{InsightsError, Result};
use rand::distributions::Distribution;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_NOISE_STD_S: f64 = 0.35;

// A pit_lap outside 1..=laps means the car never stops; callers that want a
// guaranteed stop clamp it first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    pub n_runs: usize,
    pub base_lap_s: f64,
    pub laps: u32,
    pub pit_lap: i64,
    pub pit_loss_s: f64,
    pub deg_per_lap_s: f64,
    pub noise_std_s: f64,
    pub seed: u64,
}

impl StrategyParams {
    pub fn new(n_runs: usize, base_lap_s: f64, laps: u32, pit_lap: i64, pit_loss_s: f64, deg_per_lap_s: f64) -> Self {
        Self {
            n_runs,
            base_lap_s,
            laps,
            pit_lap,
            pit_loss_s,
            deg_per_lap_s,
            noise_std_s: DEFAULT_NOISE_STD_S,
            seed: DEFAULT_SEED,
        }
    }

    pub fn with_noise(mut self, noise_std_s: f64) -> Self {
        self.noise_std_s = noise_std_s;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.n_runs == 0 {
            return Err(invalid("n_runs", "must be at least 1".into()));
        }
        if self.laps == 0 {
            return Err(invalid("laps", "must be at least 1".into()));
        }
        for (name, v) in [
            ("base_lap_s", self.base_lap_s),
            ("pit_loss_s", self.pit_loss_s),
            ("deg_per_lap_s", self.deg_per_lap_s),
        ] {
            if !v.is_finite() {
                return Err(invalid(name, format!("must be finite, got {v}")));
            }
        }
        if !self.noise_std_s.is_finite() || self.noise_std_s < 0.0 {
            return Err(invalid(
                "noise_std_s",
                format!("must be a finite non-negative number, got {}", self.noise_std_s),
            ));
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: String) -> InsightsError {
    InsightsError::InvalidParameter { name, reason }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimulationRun {
    pub run_id: usize,
    pub race_time_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategySummary {
    pub mean_s: f64,
    pub p10_s: f64,
    pub p50_s: f64,
    pub p90_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PitWindowResult {
    pub pit_lap: i64,
    pub summary: StrategySummary,
}

pub struct StrategySimulator;

impl StrategySimulator {
    // pit loss and the tire reset land before the pit lap is run, so the
    // out-lap is on new tires
    pub fn simulate_race<R: rand::Rng>(params: &StrategyParams, noise: &Normal, rng: &mut R) -> f64 {
        let mut total = 0.0;
        let mut tire_age: u32 = 0;
        for lap in 1..=params.laps {
            if i64::from(lap) == params.pit_lap {
                total += params.pit_loss_s;
                tire_age = 0;
            }
            let z = noise.sample(rng);
            total += params.base_lap_s + params.deg_per_lap_s * f64::from(tire_age) + params.noise_std_s * z;
            tire_age += 1;
        }
        total
    }

    /// Every run gets its own ChaCha stream (seed, run_id), so the output
    /// depends only on the parameters and not on how rayon schedules runs.
    pub fn run_monte_carlo(params: &StrategyParams) -> Result<Vec<SimulationRun>> {
        params.validate()?;
        let noise = Normal::new(0.0, 1.0).map_err(|e| invalid("noise_std_s", e.to_string()))?;

        let runs: Vec<SimulationRun> = (0..params.n_runs)
            .into_par_iter()
            .map(|run_id| {
                let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
                rng.set_stream(run_id as u64);
                let total = Self::simulate_race(params, &noise, &mut rng);
                SimulationRun {
                    run_id,
                    race_time_s: round3(total),
                }
            })
            .collect();

        tracing::info!(
            n_runs = params.n_runs,
            laps = params.laps,
            pit_lap = params.pit_lap,
            "monte carlo strategy simulation finished"
        );
        Ok(runs)
    }

    pub fn pit_window(params: &StrategyParams, pit_laps: impl IntoIterator<Item = i64>) -> Result<Vec<PitWindowResult>> {
        pit_laps
            .into_iter()
            .map(|pit_lap| -> Result<PitWindowResult> {
                let candidate = StrategyParams { pit_lap, ..*params };
                let runs = Self::run_monte_carlo(&candidate)?;
                Ok(PitWindowResult {
                    pit_lap,
                    summary: summarize_strategy(&runs)?,
                })
            })
            .collect()
    }
}

pub fn run_monte_carlo_strategy(params: &StrategyParams) -> Result<Vec<SimulationRun>> {
    StrategySimulator::run_monte_carlo(params)
}

pub fn summarize_strategy(runs: &[SimulationRun]) -> Result<StrategySummary> {
    if runs.is_empty() {
        return Err(InsightsError::EmptyInput("simulation run table"));
    }
    let mut times: Vec<f64> = runs.iter().map(|r| r.race_time_s).collect();
    times.sort_by(|a, b| a.total_cmp(b));
    let mean_s = times.iter().sum::<f64>() / times.len() as f64;
    Ok(StrategySummary {
        mean_s,
        p10_s: quantile_sorted(&times, 0.10),
        p50_s: quantile_sorted(&times, 0.50),
        p90_s: quantile_sorted(&times, 0.90),
    })
}

// linear interpolation around (n - 1) * q; callers pass a non-empty ascending slice
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example() -> StrategyParams {
        StrategyParams::new(1000, 90.0, 57, 22, 21.5, 0.06)
    }

    #[test]
    fn quantiles_interpolate() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile_sorted(&sorted, 0.5), 3.0);
        assert!((quantile_sorted(&sorted, 0.1) - 1.4).abs() < 1e-12);
        assert!((quantile_sorted(&sorted, 0.9) - 4.6).abs() < 1e-12);
        assert_eq!(quantile_sorted(&[7.0], 0.9), 7.0);
    }

    #[test]
    fn noiseless_race_is_exact() {
        // 3 laps on fresh tires then a stop on lap 4: ages 0,1,2 | 0,1
        let params = StrategyParams::new(3, 100.0, 5, 4, 20.0, 0.5).with_noise(0.0);
        let runs = run_monte_carlo_strategy(&params).unwrap();
        assert_eq!(runs.len(), 3);
        for (i, r) in runs.iter().enumerate() {
            assert_eq!(r.run_id, i);
            assert_eq!(r.race_time_s, 500.0 + 20.0 + 0.5 * 4.0);
        }
    }

    #[test]
    fn pit_lap_beyond_race_never_stops() {
        let params = StrategyParams::new(1, 100.0, 3, 10, 20.0, 1.0).with_noise(0.0);
        let runs = run_monte_carlo_strategy(&params).unwrap();
        assert_eq!(runs[0].race_time_s, 300.0 + 3.0);
    }

    #[test]
    fn identical_arguments_reproduce() {
        let a = run_monte_carlo_strategy(&example()).unwrap();
        let b = run_monte_carlo_strategy(&example()).unwrap();
        assert_eq!(a, b);
        let c = run_monte_carlo_strategy(&example().with_seed(7)).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn runs_are_distinct_draws() {
        let runs = run_monte_carlo_strategy(&example()).unwrap();
        assert_ne!(runs[0].race_time_s, runs[1].race_time_s);
    }

    #[test]
    fn rejects_degenerate_inputs() {
        assert!(run_monte_carlo_strategy(&StrategyParams::new(0, 90.0, 10, 5, 20.0, 0.1)).is_err());
        assert!(run_monte_carlo_strategy(&StrategyParams::new(1, 90.0, 0, 5, 20.0, 0.1)).is_err());
        assert!(run_monte_carlo_strategy(&example().with_noise(-0.1)).is_err());
        assert!(summarize_strategy(&[]).is_err());
    }

    #[test]
    fn pit_window_sweeps_candidates() {
        let params = StrategyParams::new(50, 90.0, 20, 0, 20.0, 0.2).with_noise(0.0);
        let sweep = StrategySimulator::pit_window(&params, [5, 10, 15]).unwrap();
        assert_eq!(sweep.iter().map(|r| r.pit_lap).collect::<Vec<_>>(), vec![5, 10, 15]);
        // an even split minimises the summed tire age
        let best = sweep
            .iter()
            .min_by(|a, b| a.summary.mean_s.total_cmp(&b.summary.mean_s))
            .unwrap();
        assert_eq!(best.pit_lap, 10);
    }
}
