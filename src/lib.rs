pub mod compare;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod normalize;
pub mod schema;
pub mod strategy;
pub mod table;

pub use compare::{compare_two_drivers, telemetry_bin_average, BinnedTelemetry, DriverComparison};
pub use config::InsightsConfig;
pub use error::{InsightsError, Result};
pub use model::{estimate_fuel_mass, fuel_corrected_pace, DegradationModel, FuelModel};
pub use normalize::{normalize_open_historical, normalize_user_telemetry};
pub use schema::{
    validate_open_historical, validate_user_telemetry, HistoricalLapRecord, SchemaValidationResult,
    SourceType, TelemetryRecord,
};
pub use strategy::{
    run_monte_carlo_strategy, summarize_strategy, SimulationRun, StrategyParams, StrategySimulator,
    StrategySummary,
};
pub use table::{Table, Value};
