use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use raceinsights::compare::{compare_two_drivers_binned, distinct_driver_codes};
use raceinsights::data::{load_upload_file, parse_upload, HistoricalClient, UploadFormat};
use raceinsights::model::{DegradationModel, DEFAULT_LAP_TIME_COLUMN};
use raceinsights::{
    normalize_open_historical, summarize_strategy, validate_open_historical, InsightsConfig,
    SchemaValidationResult, StrategyParams, StrategySimulator, Table,
};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "raceinsights", about = "Post-race telemetry analytics and strategy simulation")]
struct Cli {
    /// JSON file overriding the default tunables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize, validate and compare a user telemetry export (CSV, Parquet or JSON)
    Upload {
        file: PathBuf,
        #[arg(long, default_value = "user-session-001")]
        session_id: String,
        #[arg(long)]
        driver_a: Option<String>,
        #[arg(long)]
        driver_b: Option<String>,
    },
    /// Fetch a session's laps from the historical API and model pace
    Historical { session_key: u32 },
    /// Model pace from a local historical lap export (CSV, Parquet or JSON)
    Pace { file: PathBuf },
    /// Monte Carlo race-time simulation for a one-stop strategy
    Simulate {
        #[arg(long, default_value_t = 2000)]
        runs: usize,
        #[arg(long, default_value_t = 90.0)]
        base_lap: f64,
        #[arg(long, default_value_t = 57)]
        laps: u32,
        #[arg(long, default_value_t = 22)]
        pit_lap: i64,
        #[arg(long, default_value_t = 21.5)]
        pit_loss: f64,
        #[arg(long, default_value_t = 0.06)]
        deg: f64,
        #[arg(long)]
        noise: Option<f64>,
        /// Also sweep every pit lap from 2 to laps-1
        #[arg(long)]
        window: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => InsightsConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => InsightsConfig::default(),
    };

    match cli.command {
        Command::Upload {
            file,
            session_id,
            driver_a,
            driver_b,
        } => upload(&cfg, file, &session_id, driver_a, driver_b),
        Command::Historical { session_key } => {
            let client = HistoricalClient::new(&cfg)?;
            let (laps, validation) = client
                .load_open_historical_laps(session_key)
                .with_context(|| format!("fetching laps for session {session_key}"))?;
            pace(&cfg, &laps, validation)
        }
        Command::Pace { file } => {
            let name = file.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            let bytes = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let raw = parse_upload(UploadFormat::from_file_name(name)?, &bytes)?;
            let laps = normalize_open_historical(&raw);
            let validation = validate_open_historical(&laps);
            pace(&cfg, &laps, validation)
        }
        Command::Simulate {
            runs,
            base_lap,
            laps,
            pit_lap,
            pit_loss,
            deg,
            noise,
            window,
        } => {
            let params = StrategyParams::new(runs, base_lap, laps, pit_lap, pit_loss, deg)
                .with_noise(noise.unwrap_or(cfg.noise_std_s))
                .with_seed(cfg.simulation_seed);
            let results = StrategySimulator::run_monte_carlo(&params)?;
            let summary = summarize_strategy(&results)?;
            let sweep = if window && laps > 2 {
                Some(StrategySimulator::pit_window(&params, 2..i64::from(laps))?)
            } else {
                None
            };
            emit(&json!({ "params": params, "summary": summary, "pit_window": sweep }))
        }
    }
}

fn upload(
    cfg: &InsightsConfig,
    file: PathBuf,
    session_id: &str,
    driver_a: Option<String>,
    driver_b: Option<String>,
) -> anyhow::Result<()> {
    let (table, validation) =
        load_upload_file(&file, session_id).with_context(|| format!("loading upload {}", file.display()))?;
    report_validation(&validation);

    let drivers = distinct_driver_codes(&table);
    if drivers.len() < 2 {
        tracing::info!("need at least two distinct driver codes for comparison");
        return emit(&json!({ "rows": table.len(), "validation": validation }));
    }

    let a = driver_a.unwrap_or_else(|| drivers[0].clone());
    let b = driver_b.unwrap_or_else(|| drivers[1].clone());
    if a == b {
        bail!("driver A and driver B must differ, both are {a}");
    }
    let compared = compare_two_drivers_binned(&table, &a, &b, cfg.bin_size_m)?;
    emit(&json!({
        "rows": table.len(),
        "validation": validation,
        "drivers": drivers,
        "comparison": compared,
    }))
}

fn pace(cfg: &InsightsConfig, laps: &Table, validation: SchemaValidationResult) -> anyhow::Result<()> {
    report_validation(&validation);
    let has_times = laps
        .column(DEFAULT_LAP_TIME_COLUMN)
        .is_some_and(|col| col.iter().any(|v| !v.is_null()));
    if !has_times {
        tracing::info!("no lap duration values in this session");
        return emit(&json!({ "rows": laps.len(), "validation": validation }));
    }

    let paced = cfg.fuel_model().fuel_corrected_pace(laps, DEFAULT_LAP_TIME_COLUMN)?;
    let degradation = DegradationModel::new(&paced);

    // fitted corrected lap time on the last lap of the session
    let final_lap = paced.rows().filter_map(|r| r.f64("lap_number")).fold(f64::NAN, f64::max);
    let projections: Vec<_> = degradation
        .fits
        .iter()
        .map(|fit| {
            json!({
                "driver": fit.driver,
                "lap_number": final_lap,
                "predicted_corrected_lap_s": degradation.predict_lap_time(&fit.driver, final_lap),
            })
        })
        .collect();

    emit(&json!({
        "rows": laps.len(),
        "validation": validation,
        "pace": paced,
        "degradation": degradation.fits,
        "final_lap_projection": projections,
        "field_degradation_s_per_lap": degradation.field_rate(),
    }))
}

fn report_validation(v: &SchemaValidationResult) {
    if v.is_clean() {
        return;
    }
    tracing::warn!("validation warnings (showing {} of {})", v.errors.len().min(10), v.invalid_rows);
    for err in v.errors.iter().take(10) {
        tracing::warn!("- {err}");
    }
}

fn emit<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
