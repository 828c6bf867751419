use crate::utils::error::{AppError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Timestamp layout used for the index column of every stored CSV.
pub const CSV_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single CSV cell with the loose typing of the upstream records.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Cell::Empty,
            serde_json::Value::Number(n) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Empty),
            serde_json::Value::String(s) => Cell::Text(s.clone()),
            serde_json::Value::Bool(b) => Cell::Text(if *b { "True" } else { "False" }.to_string()),
            other => Cell::Text(other.to_string()),
        }
    }

    /// Parses a raw CSV field; empty fields and `NaN` are missing values.
    pub fn parse(field: &str) -> Self {
        let field = field.trim();
        if field.is_empty() || field.eq_ignore_ascii_case("nan") {
            return Cell::Empty;
        }
        match field.parse::<f64>() {
            Ok(n) if n.is_finite() => Cell::Number(n),
            _ => Cell::Text(field.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    pub fn to_csv_field(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Number(n) => format_float(*n),
            Cell::Text(s) => s.clone(),
        }
    }
}

/// Floats keep a fractional part (`12.0`, not `12`) so stored files read back as floats.
pub fn format_float(value: f64) -> String {
    format!("{:?}", value)
}

/// A timestamp-indexed table with mixed cells, as stored in the buckets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<(NaiveDateTime, Vec<Cell>)>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Adds a column, returning its index. Existing rows get empty cells.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.columns.push(name.to_string());
        for (_, cells) in &mut self.rows {
            cells.push(Cell::Empty);
        }
        self.columns.len() - 1
    }

    pub fn drop_column(&mut self, name: &str) {
        if let Some(idx) = self.column_index(name) {
            self.columns.remove(idx);
            for (_, cells) in &mut self.rows {
                cells.remove(idx);
            }
        }
    }

    /// Appends the rows of `other`, aligning columns by name.
    pub fn append(&mut self, other: Table) {
        let mapping: Vec<usize> = other
            .columns
            .iter()
            .map(|name| self.ensure_column(name))
            .collect();
        let width = self.columns.len();
        for (ts, cells) in other.rows {
            let mut row = vec![Cell::Empty; width];
            for (cell, &target) in cells.into_iter().zip(&mapping) {
                row[target] = cell;
            }
            self.rows.push((ts, row));
        }
    }

    /// Writes the table with an unnamed timestamp index as the first column.
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut header = vec![String::new()];
        header.extend(self.columns.iter().cloned());
        writer.write_record(&header)?;

        for (ts, cells) in &self.rows {
            let mut record = vec![ts.format(CSV_TIMESTAMP_FORMAT).to_string()];
            record.extend(cells.iter().map(Cell::to_csv_field));
            writer.write_record(&record)?;
        }

        writer
            .into_inner()
            .map_err(|e| AppError::processing(format!("Failed to flush CSV writer: {}", e)))
    }

    /// Reads a CSV whose first column is the timestamp index.
    pub fn from_csv(data: &[u8]) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(data);

        let headers = reader.headers()?.clone();
        let columns: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();
        let mut table = Table::new(columns);

        for record in reader.records() {
            let record = record?;
            let Some(raw_ts) = record.get(0) else {
                continue;
            };
            let ts = parse_index_timestamp(raw_ts)?;
            let mut cells: Vec<Cell> = record.iter().skip(1).map(Cell::parse).collect();
            cells.resize(table.columns.len(), Cell::Empty);
            table.rows.push((ts, cells));
        }

        Ok(table)
    }
}

fn parse_index_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    for format in [CSV_TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(ts);
        }
    }
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| AppError::processing(format!("Unparseable timestamp in index: '{}'", raw)))
}

/// One row of the stored-predictions query response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionRecord {
    pub date: String,
    #[serde(rename = "PM10")]
    pub pm10: Option<f64>,
    #[serde(rename = "Pm2.5")]
    pub pm25: Option<f64>,
    #[serde(rename = "Prediccion_Pm2.5")]
    pub predicted_pm25: Option<f64>,
    pub qhawax_id: Option<String>,
    /// Absent when no reference data exists for the whole range.
    #[serde(
        rename = "Teledyne_pm2.5",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub teledyne_pm25: Option<Option<f64>>,
}
