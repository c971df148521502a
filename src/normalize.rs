use crate::schema::{HistoricalLapRecord, Record, SourceType, TelemetryRecord};
use crate::table::{Table, Value};

// raw (trimmed, lowercased) column name to canonical column name
pub type SynonymTable = &'static [(&'static str, &'static str)];

pub const USER_SYNONYMS: SynonymTable = &[
    ("distance", "lap_distance_m"),
    ("lap_distance", "lap_distance_m"),
    ("speed", "speed_kph"),
    ("throttle", "throttle_pct"),
    ("brake", "brake_pct"),
    ("driver", "driver_code"),
    ("lap", "lap_number"),
];

pub const OPEN_SYNONYMS: SynonymTable = &[
    ("driver", "driver_number"),
    ("lap", "lap_number"),
    ("lap_duration", "lap_duration_s"),
    ("sector_1", "sector_1_s"),
    ("sector_2", "sector_2_s"),
    ("sector_3", "sector_3_s"),
];

const USER_NUMERIC: [&str; 7] = [
    "lap_number",
    "lap_distance_m",
    "speed_kph",
    "throttle_pct",
    "brake_pct",
    "gear",
    "rpm",
];

const OPEN_NUMERIC: [&str; 7] = [
    "session_key",
    "driver_number",
    "lap_number",
    "lap_duration_s",
    "sector_1_s",
    "sector_2_s",
    "sector_3_s",
];

// Several raw columns may land on the same canonical name (`Lap` next to an
// existing `lap_number`). All of them are renamed; the rightmost one wins.
pub fn rename_with_synonyms(table: &mut Table, synonyms: SynonymTable) {
    table.rename_columns(|col| {
        let key = col.trim().to_lowercase();
        synonyms
            .iter()
            .find(|(raw, _)| *raw == key)
            .map(|(_, canonical)| canonical.to_string())
    });
}

fn coerce_numeric(table: &mut Table, columns: &[&str]) {
    for col in columns {
        table.map_column(col, |v| v.as_f64_lossy().map_or(Value::Null, Value::Float));
    }
}

pub fn normalize_user_telemetry(raw: &Table, session_id: &str) -> Table {
    let mut df = raw.clone();
    rename_with_synonyms(&mut df, USER_SYNONYMS);
    df.fill_column("source_type", SourceType::UserUpload.as_str().into());
    df.fill_column("session_id", session_id.into());

    let mut out = df.select(TelemetryRecord::COLUMNS);
    coerce_numeric(&mut out, &USER_NUMERIC);
    tracing::info!(
        rows = out.len(),
        dropped_columns = orphan_count(raw, USER_SYNONYMS, TelemetryRecord::COLUMNS),
        "normalized user telemetry"
    );
    out
}

pub fn normalize_open_historical(raw: &Table) -> Table {
    let mut df = raw.clone();
    rename_with_synonyms(&mut df, OPEN_SYNONYMS);
    df.fill_column("source_type", SourceType::OpenHistorical.as_str().into());

    let mut out = df.select(HistoricalLapRecord::COLUMNS);
    coerce_numeric(&mut out, &OPEN_NUMERIC);
    tracing::info!(
        rows = out.len(),
        dropped_columns = orphan_count(raw, OPEN_SYNONYMS, HistoricalLapRecord::COLUMNS),
        "normalized open historical laps"
    );
    out
}

fn orphan_count(raw: &Table, synonyms: SynonymTable, canonical: &[&str]) -> usize {
    raw.columns()
        .iter()
        .filter(|c| {
            let key = c.trim().to_lowercase();
            !synonyms.iter().any(|(s, _)| *s == key) && !canonical.contains(&c.as_str())
        })
        .count()
}
