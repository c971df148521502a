use crate::config::InsightsConfig;
use crate::error::{InsightsError, Result};
use crate::normalize::{normalize_open_historical, normalize_user_telemetry};
use crate::schema::{validate_open_historical, validate_user_telemetry, SchemaValidationResult};
use crate::table::Table;
use bytes::Bytes;
use std::fs;
use std::path::Path;
use std::time::Duration;

type JsonRecords = Vec<serde_json::Map<String, serde_json::Value>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFormat {
    Csv,
    Parquet,
    Json,
}

impl UploadFormat {
    // extension match is case-insensitive
    pub fn from_file_name(name: &str) -> Result<Self> {
        let suffix = name.rsplit('.').next().unwrap_or_default().to_lowercase();
        match suffix.as_str() {
            "csv" => Ok(UploadFormat::Csv),
            "parquet" | "pq" => Ok(UploadFormat::Parquet),
            "json" => Ok(UploadFormat::Json),
            _ => Err(InsightsError::UnsupportedFormat(suffix)),
        }
    }
}

pub fn parse_upload(format: UploadFormat, bytes: &[u8]) -> Result<Table> {
    match format {
        UploadFormat::Csv => Table::from_csv_reader(bytes),
        UploadFormat::Parquet => Table::from_parquet_bytes(Bytes::copy_from_slice(bytes)),
        UploadFormat::Json => {
            let records: JsonRecords = serde_json::from_slice(bytes)?;
            Ok(Table::from_json_records(records))
        }
    }
}

/// Parses an uploaded export, normalizes it to the user telemetry schema
/// and validates it. Validation problems are returned, not raised.
pub fn load_uploaded_table(
    file_name: &str,
    bytes: &[u8],
    session_id: &str,
) -> Result<(Table, SchemaValidationResult)> {
    let format = UploadFormat::from_file_name(file_name)?;
    let raw = parse_upload(format, bytes)?;
    tracing::info!(file_name, rows = raw.len(), columns = raw.columns().len(), "parsed upload");

    let normalized = normalize_user_telemetry(&raw, session_id);
    let result = validate_user_telemetry(&normalized);
    Ok((normalized, result))
}

pub fn load_upload_file<P: AsRef<Path>>(path: P, session_id: &str) -> Result<(Table, SchemaValidationResult)> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    load_uploaded_table(name, &bytes, session_id)
}

// blocking client for the open historical REST API
pub struct HistoricalClient {
    base_url: String,
    http: reqwest::blocking::Client,
}

impl HistoricalClient {
    pub fn new(cfg: &InsightsConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_s))
            .build()?;
        Ok(Self {
            base_url: cfg.historical_base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_matches('/'))
    }

    // any non-2xx status is an error
    pub fn fetch(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Table> {
        let url = self.endpoint_url(endpoint);
        tracing::debug!(%url, ?params, "fetching historical data");
        let records: JsonRecords = self
            .http
            .get(&url)
            .query(params)
            .send()?
            .error_for_status()?
            .json()?;
        tracing::info!(%url, rows = records.len(), "fetched historical data");
        Ok(Table::from_json_records(records))
    }

    pub fn load_open_historical_laps(&self, session_key: u32) -> Result<(Table, SchemaValidationResult)> {
        let raw = self.fetch("laps", &[("session_key", session_key.to_string())])?;
        let normalized = normalize_open_historical(&raw);
        let result = validate_open_historical(&normalized);
        Ok((normalized, result))
    }
}
