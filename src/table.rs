use crate::error::Result;
use bytes::Bytes;
use csv::ReaderBuilder;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use serde::{Deserialize, Serialize};
use std::io::Read;

// Uploads and API payloads arrive with arbitrary column names and mixed cell
// types, so ingestion works on this table and normalization makes it canonical.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    // empty is null, then integer, float, string
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return Value::Float(f);
        }
        Value::Str(raw.to_string())
    }

    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn as_f64_lossy(&self) -> Option<f64> {
        let v = match self {
            Value::Null => return None,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            Value::Str(s) => s.trim().parse::<f64>().ok()?,
        };
        if v.is_nan() {
            None
        } else {
            Some(v)
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) if f.is_nan() => None,
            Value::Float(f) => Some(f.to_string()),
            Value::Str(s) => Some(s.clone()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Str(s),
            other => Value::Str(other.to_string()),
        }
    }
}

impl From<&Field> for Value {
    fn from(field: &Field) -> Self {
        match field {
            Field::Null => Value::Null,
            Field::Bool(b) => Value::Bool(*b),
            Field::Byte(i) => Value::Int(i64::from(*i)),
            Field::Short(i) => Value::Int(i64::from(*i)),
            Field::Int(i) => Value::Int(i64::from(*i)),
            Field::Long(i) => Value::Int(*i),
            Field::UByte(u) => Value::Int(i64::from(*u)),
            Field::UShort(u) => Value::Int(i64::from(*u)),
            Field::UInt(u) => Value::Int(i64::from(*u)),
            Field::ULong(u) => i64::try_from(*u).map_or(Value::Float(*u as f64), Value::Int),
            Field::Float(f) => Value::Float(f64::from(*f)),
            Field::Double(f) => Value::Float(*f),
            Field::Str(s) => Value::Str(s.clone()),
            // dates, timestamps, decimals and nested values keep their text form
            other => Value::Str(other.to_string()),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    // pads with nulls or truncates to the column count
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    // duplicated names resolve to the rightmost column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().rposition(|c| c == name)
    }

    pub fn rows(&self) -> impl Iterator<Item = RowRef<'_>> + '_ {
        self.rows.iter().map(move |cells| RowRef { table: self, cells })
    }

    pub fn row(&self, idx: usize) -> Option<RowRef<'_>> {
        self.rows.get(idx).map(|cells| RowRef { table: self, cells })
    }

    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    pub fn rename_columns<F>(&mut self, mut f: F)
    where
        F: FnMut(&str) -> Option<String>,
    {
        for col in self.columns.iter_mut() {
            if let Some(renamed) = f(col) {
                *col = renamed;
            }
        }
    }

    fn ensure_column(&mut self, name: &str) -> usize {
        match self.column_index(name) {
            Some(i) => i,
            None => {
                self.columns.push(name.to_string());
                for row in self.rows.iter_mut() {
                    row.push(Value::Null);
                }
                self.columns.len() - 1
            }
        }
    }

    pub fn fill_column(&mut self, name: &str, value: Value) {
        let idx = self.ensure_column(name);
        for row in self.rows.iter_mut() {
            row[idx] = value.clone();
        }
    }

    // one value per row, overwriting an existing column of the same name;
    // rows beyond `values` get null
    pub fn push_column(&mut self, name: &str, values: Vec<Value>) {
        let idx = self.ensure_column(name);
        let mut values = values.into_iter();
        for row in self.rows.iter_mut() {
            row[idx] = values.next().unwrap_or_default();
        }
    }

    pub fn map_column<F>(&mut self, name: &str, mut f: F)
    where
        F: FnMut(&Value) -> Value,
    {
        if let Some(idx) = self.column_index(name) {
            for row in self.rows.iter_mut() {
                row[idx] = f(&row[idx]);
            }
        }
    }

    // exactly `names`, in that order; absent columns come back null
    pub fn select(&self, names: &[&str]) -> Table {
        let picks: Vec<Option<usize>> = names.iter().map(|n| self.column_index(n)).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                picks
                    .iter()
                    .map(|p| p.map_or(Value::Null, |i| row[i].clone()))
                    .collect()
            })
            .collect();
        Table {
            columns: names.iter().map(|n| n.to_string()).collect(),
            rows,
        }
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let mut table = Table::new(headers);
        for rec in rdr.records() {
            let rec = rec?;
            table.push_row(rec.iter().map(Value::infer).collect());
        }
        Ok(table)
    }

    // columns are the union of keys in first-seen order
    pub fn from_json_records(records: Vec<serde_json::Map<String, serde_json::Value>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for rec in &records {
            for key in rec.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        let mut table = Table::new(columns.clone());
        for mut rec in records {
            let row = columns
                .iter()
                .map(|c| rec.remove(c).map_or(Value::Null, Value::from))
                .collect();
            table.push_row(row);
        }
        table
    }

    // flat files only: one column per top-level schema field
    pub fn from_parquet_bytes(data: Bytes) -> Result<Self> {
        let reader = SerializedFileReader::new(data)?;
        let columns: Vec<String> = reader
            .metadata()
            .file_metadata()
            .schema_descr()
            .root_schema()
            .get_fields()
            .iter()
            .map(|f| f.name().to_string())
            .collect();

        let mut table = Table::new(columns.clone());
        for row in reader.get_row_iter(None)? {
            let row = row?;
            let mut cells = vec![Value::Null; columns.len()];
            for (name, field) in row.get_column_iter() {
                if let Some(i) = columns.iter().position(|c| c == name) {
                    cells[i] = Value::from(field);
                }
            }
            table.push_row(cells);
        }
        Ok(table)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    table: &'a Table,
    cells: &'a [Value],
}

impl<'a> RowRef<'a> {
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.table.column_index(name).map(|i| &self.cells[i])
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64_lossy)
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.get(name).and_then(Value::to_text)
    }
}
