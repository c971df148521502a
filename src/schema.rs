use crate::table::{RowRef, Table, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const MAX_REPORTED_ERRORS: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    UserUpload,
    OpenHistorical,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::UserUpload => "user_upload",
            SourceType::OpenHistorical => "open_historical",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_upload" => Ok(SourceType::UserUpload),
            "open_historical" => Ok(SourceType::OpenHistorical),
            other => Err(other.to_string()),
        }
    }
}

pub const USER_SCHEMA_COLUMNS: [&str; 11] = [
    "source_type",
    "session_id",
    "driver_code",
    "lap_number",
    "lap_distance_m",
    "speed_kph",
    "throttle_pct",
    "brake_pct",
    "gear",
    "rpm",
    "timestamp_utc",
];

pub const OPEN_SCHEMA_COLUMNS: [&str; 9] = [
    "source_type",
    "session_key",
    "driver_number",
    "lap_number",
    "lap_duration_s",
    "sector_1_s",
    "sector_2_s",
    "sector_3_s",
    "compound",
];

// one sample for one driver at one point along a lap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub source_type: SourceType,
    pub session_id: String,
    pub driver_code: String,
    pub lap_number: u32,
    pub lap_distance_m: f64,
    pub speed_kph: f64,
    pub throttle_pct: f64,
    pub brake_pct: f64,
    pub gear: Option<i64>,
    pub rpm: Option<f64>,
    pub timestamp_utc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalLapRecord {
    pub source_type: SourceType,
    pub session_key: u32,
    pub driver_number: u32,
    pub lap_number: u32,
    pub lap_duration_s: Option<f64>,
    pub sector_1_s: Option<f64>,
    pub sector_2_s: Option<f64>,
    pub sector_3_s: Option<f64>,
    pub compound: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("field '{0}' is required")]
    Missing(&'static str),

    #[error("field '{field}' should be {expected}, got {found}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("field '{field}' should be a whole number, got {value}")]
    NotWhole { field: &'static str, value: f64 },

    #[error("field '{field}' should be {bound}, got {value}")]
    OutOfRange {
        field: &'static str,
        bound: &'static str,
        value: f64,
    },

    #[error("field '{0}' should not be empty")]
    Empty(&'static str),

    #[error("field '{field}' should be one of {expected}, got '{found}'")]
    UnknownVariant {
        field: &'static str,
        expected: &'static str,
        found: String,
    },
}

// COLUMNS is the canonical column order normalization selects into
pub trait Record: Sized {
    const COLUMNS: &'static [&'static str];

    fn from_row(row: RowRef<'_>) -> Result<Self, FieldError>;
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaValidationResult {
    pub valid_rows: usize,
    pub invalid_rows: usize,
    pub errors: Vec<String>,
}

impl SchemaValidationResult {
    pub fn is_clean(&self) -> bool {
        self.invalid_rows == 0
    }
}

/// Validates every row independently. Only the first violation of a row is
/// reported and at most [`MAX_REPORTED_ERRORS`] messages are kept.
pub fn validate_rows<'a, R, I>(rows: I) -> SchemaValidationResult
where
    R: Record,
    I: IntoIterator<Item = RowRef<'a>>,
{
    let mut result = SchemaValidationResult::default();

    for (idx, row) in rows.into_iter().enumerate() {
        match R::from_row(row) {
            Ok(_) => result.valid_rows += 1,
            Err(err) => {
                result.invalid_rows += 1;
                tracing::debug!(row = idx, %err, "schema violation");
                if result.errors.len() < MAX_REPORTED_ERRORS {
                    result.errors.push(format!("row={idx}: {err}"));
                }
            }
        }
    }

    if result.invalid_rows > 0 {
        tracing::warn!(
            valid = result.valid_rows,
            invalid = result.invalid_rows,
            "schema validation found invalid rows"
        );
    } else {
        tracing::info!(valid = result.valid_rows, "schema validation passed");
    }
    result
}

pub fn validate_user_telemetry(table: &Table) -> SchemaValidationResult {
    validate_rows::<TelemetryRecord, _>(table.rows())
}

pub fn validate_open_historical(table: &Table) -> SchemaValidationResult {
    validate_rows::<HistoricalLapRecord, _>(table.rows())
}

impl Record for TelemetryRecord {
    const COLUMNS: &'static [&'static str] = &USER_SCHEMA_COLUMNS;

    fn from_row(row: RowRef<'_>) -> Result<Self, FieldError> {
        Ok(Self {
            source_type: source_type(&row, SourceType::UserUpload, false)?,
            session_id: req_str(&row, "session_id")?,
            driver_code: req_str(&row, "driver_code")?,
            lap_number: req_positive_int(&row, "lap_number")?,
            lap_distance_m: req_non_negative(&row, "lap_distance_m")?,
            speed_kph: req_non_negative(&row, "speed_kph")?,
            throttle_pct: req_float(&row, "throttle_pct")?,
            brake_pct: req_float(&row, "brake_pct")?,
            gear: opt_int(&row, "gear")?,
            rpm: opt_float(&row, "rpm")?,
            timestamp_utc: opt_str(&row, "timestamp_utc"),
        })
    }
}

impl Record for HistoricalLapRecord {
    const COLUMNS: &'static [&'static str] = &OPEN_SCHEMA_COLUMNS;

    fn from_row(row: RowRef<'_>) -> Result<Self, FieldError> {
        Ok(Self {
            source_type: source_type(&row, SourceType::OpenHistorical, true)?,
            session_key: req_positive_int(&row, "session_key")?,
            driver_number: req_positive_int(&row, "driver_number")?,
            lap_number: req_positive_int(&row, "lap_number")?,
            lap_duration_s: opt_float(&row, "lap_duration_s")?,
            sector_1_s: opt_float(&row, "sector_1_s")?,
            sector_2_s: opt_float(&row, "sector_2_s")?,
            sector_3_s: opt_float(&row, "sector_3_s")?,
            compound: opt_str(&row, "compound"),
        })
    }
}

fn cell<'a>(row: &RowRef<'a>, field: &'static str) -> Option<&'a Value> {
    row.get(field).filter(|v| !v.is_null())
}

fn source_type(
    row: &RowRef<'_>,
    default: SourceType,
    fixed: bool,
) -> Result<SourceType, FieldError> {
    const FIELD: &str = "source_type";
    let Some(v) = cell(row, FIELD) else {
        return Ok(default);
    };
    let text = v.as_str().ok_or_else(|| FieldError::WrongType {
        field: FIELD,
        expected: "a string",
        found: v.type_name().to_string(),
    })?;
    let expected = if fixed {
        "'open_historical'"
    } else {
        "'user_upload', 'open_historical'"
    };
    let parsed = text.parse::<SourceType>().map_err(|found| FieldError::UnknownVariant {
        field: FIELD,
        expected,
        found,
    })?;
    if fixed && parsed != default {
        return Err(FieldError::UnknownVariant {
            field: FIELD,
            expected,
            found: text.to_string(),
        });
    }
    Ok(parsed)
}

fn req_str(row: &RowRef<'_>, field: &'static str) -> Result<String, FieldError> {
    let text = cell(row, field)
        .and_then(Value::to_text)
        .ok_or(FieldError::Missing(field))?;
    if text.trim().is_empty() {
        return Err(FieldError::Empty(field));
    }
    Ok(text)
}

fn opt_str(row: &RowRef<'_>, field: &'static str) -> Option<String> {
    cell(row, field).and_then(Value::to_text)
}

fn number(v: &Value, field: &'static str) -> Result<f64, FieldError> {
    v.as_f64_lossy().ok_or_else(|| FieldError::WrongType {
        field,
        expected: "a number",
        found: v.to_text().unwrap_or_else(|| v.type_name().to_string()),
    })
}

fn whole(v: &Value, field: &'static str) -> Result<i64, FieldError> {
    let n = number(v, field)?;
    if n.fract() != 0.0 || !n.is_finite() || n.abs() > i64::MAX as f64 {
        return Err(FieldError::NotWhole { field, value: n });
    }
    Ok(n as i64)
}

fn req_float(row: &RowRef<'_>, field: &'static str) -> Result<f64, FieldError> {
    let v = cell(row, field).ok_or(FieldError::Missing(field))?;
    number(v, field)
}

fn req_non_negative(row: &RowRef<'_>, field: &'static str) -> Result<f64, FieldError> {
    let n = req_float(row, field)?;
    if n < 0.0 {
        return Err(FieldError::OutOfRange {
            field,
            bound: ">= 0",
            value: n,
        });
    }
    Ok(n)
}

fn req_positive_int(row: &RowRef<'_>, field: &'static str) -> Result<u32, FieldError> {
    let v = cell(row, field).ok_or(FieldError::Missing(field))?;
    let n = whole(v, field)?;
    if n < 1 || n > u32::MAX as i64 {
        return Err(FieldError::OutOfRange {
            field,
            bound: "a positive integer",
            value: n as f64,
        });
    }
    Ok(n as u32)
}

fn opt_float(row: &RowRef<'_>, field: &'static str) -> Result<Option<f64>, FieldError> {
    cell(row, field).map(|v| number(v, field)).transpose()
}

fn opt_int(row: &RowRef<'_>, field: &'static str) -> Result<Option<i64>, FieldError> {
    cell(row, field).map(|v| whole(v, field)).transpose()
}
