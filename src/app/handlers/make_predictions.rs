use super::daily_key;
use crate::adapters::qhawax::{QhawaxClient, RawRecord, STATION_NUMBERS};
use crate::config::LambdaConfig;
use crate::core::calibration::{FeatureRow, ModelStore, MODEL_FEATURES};
use crate::domain::model::{Cell, Table};
use crate::domain::ports::Storage;
use crate::runtime::{Handler, InvocationContext};
use crate::utils::error::{AppError, Result};
use crate::utils::validation::validate_required_field;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DATE_COLUMN: &str = "timestamp_zone";
pub const PREDICTION_COLUMN: &str = "Prediccion_Pm2.5";
pub const STATION_COLUMN: &str = "qhawax_id";
const UPSTREAM_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";
const WINDOW_FORMAT: &str = "%d-%m-%Y %H:%M:%S";
const LOCAL_OFFSET_HOURS: i64 = 5;

/// Upstream field name → model feature name.
pub const COLUMN_MAPPING: [(&str, &str); 4] = [
    ("PM25", "Pm2.5"),
    ("temperature", "Temp"),
    ("humidity", "Humedad"),
    ("pressure", "Presion"),
];

pub fn station_id(number: u32) -> String {
    format!("qH{:03}", number)
}

/// Yesterday in GMT-5, `[00:00:00, 23:59:59]`, expressed in UTC.
pub fn previous_day_window(now: DateTime<Utc>) -> (NaiveDateTime, NaiveDateTime) {
    let offset = Duration::hours(LOCAL_OFFSET_HOURS);
    let local_now = now.naive_utc() - offset;
    let today_start = local_now.date().and_time(NaiveTime::default());

    let start = today_start - Duration::days(1);
    let end = today_start - Duration::seconds(1);
    (start + offset, end + offset)
}

/// Daily job: fetch yesterday's sensor averages, calibrate them and store one CSV.
pub struct MakePredictionsHandler<S: Storage> {
    qhawax: QhawaxClient,
    email: String,
    password: String,
    models: Arc<ModelStore>,
    output: S,
}

impl<S: Storage> MakePredictionsHandler<S> {
    pub fn new(
        qhawax: QhawaxClient,
        email: impl Into<String>,
        password: impl Into<String>,
        models: Arc<ModelStore>,
        output: S,
    ) -> Self {
        Self {
            qhawax,
            email: email.into(),
            password: password.into(),
            models,
            output,
        }
    }

    pub fn from_config(config: &LambdaConfig, models: Arc<ModelStore>, output: S) -> Result<Self> {
        let email = validate_required_field("EMAIL", &config.email)?;
        let password = validate_required_field("PASSWORD", &config.password)?;
        Ok(Self::new(
            QhawaxClient::new(config.qhawax_api_url.clone()),
            email,
            password,
            models,
            output,
        ))
    }

    /// Runs the job as if the clock read `now`. Returns the stored key, if any.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        let (start, end) = previous_day_window(now);
        let start_formatted = start.format(WINDOW_FORMAT).to_string();
        let end_formatted = end.format(WINDOW_FORMAT).to_string();
        tracing::info!("Start of the day in UTC: {}", start_formatted);
        tracing::info!("End of the day in UTC: {}", end_formatted);

        let token = match self.qhawax.login(&self.email, &self.password).await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!("Failed to get login token, aborting: {}", e);
                return Ok(None);
            }
        };

        let stations = match self
            .qhawax
            .fetch_five_minute_averages(&token, &start_formatted, &end_formatted, &STATION_NUMBERS)
            .await
        {
            Ok(stations) => stations,
            Err(e) => {
                tracing::error!("Failed to get sensors data, aborting: {}", e);
                return Ok(None);
            }
        };

        let wanted: Vec<String> = STATION_NUMBERS.iter().copied().map(station_id).collect();
        let mut combined: Option<Table> = None;

        for (station, blocks) in stations {
            if !wanted.contains(&station) {
                continue;
            }
            let Some(records) = blocks.first().and_then(|b| b.data.as_ref()) else {
                continue;
            };
            if records.is_empty() {
                continue;
            }

            tracing::info!("Processing qHAWAX {}", station);
            let table = self.predict_station(&station, records)?;
            match combined.as_mut() {
                Some(all) => all.append(table),
                None => combined = Some(table),
            }
        }

        let Some(mut combined) = combined else {
            tracing::warn!("No station returned data for the window; nothing to store");
            return Ok(None);
        };
        combined.drop_column("id");

        let key = daily_key(start.date());
        self.output.write_file(&key, &combined.to_csv()?).await?;
        tracing::info!(
            "Data with predictions ({} rows) saved to {}/{}",
            combined.len(),
            self.output.location(),
            key
        );
        Ok(Some(key))
    }

    fn predict_station(&self, station: &str, records: &[RawRecord]) -> Result<Table> {
        let mut table = process_records(records)?;
        let model = self.models.load(station)?;

        let feature_idx: Vec<usize> = MODEL_FEATURES
            .iter()
            .map(|f| {
                table
                    .column_index(f)
                    .ok_or_else(|| AppError::processing(format!("Missing feature column {}", f)))
            })
            .collect::<Result<_>>()?;
        let features: Vec<FeatureRow> = table
            .rows
            .iter()
            .map(|(_, cells)| {
                let mut row = [0.0; 4];
                for (slot, &i) in row.iter_mut().zip(&feature_idx) {
                    *slot = cells[i].as_f64().unwrap_or(f64::NAN);
                }
                row
            })
            .collect();
        let predictions = model.predict(&features);

        let prediction_idx = table.ensure_column(PREDICTION_COLUMN);
        for ((_, cells), value) in table.rows.iter_mut().zip(predictions) {
            cells[prediction_idx] = Cell::Number(value);
        }

        let mut table = reindex_five_minutes(dedupe_index(table));
        let station_idx = table.ensure_column(STATION_COLUMN);
        for (_, cells) in &mut table.rows {
            cells[station_idx] = Cell::Text(station.to_string());
        }
        Ok(table)
    }
}

#[async_trait]
impl<S: Storage + 'static> Handler for MakePredictionsHandler<S> {
    async fn call(&self, _event: Value, ctx: InvocationContext) -> Result<Value> {
        tracing::info!("Scheduled prediction run {}", ctx.request_id);
        let key = self.run_at(Utc::now()).await?;
        Ok(json!({ "stored": key }))
    }
}

/// Turns upstream records into a GMT-5 indexed table holding only rows with
/// every model feature present, ordered by time.
pub fn process_records(records: &[RawRecord]) -> Result<Table> {
    let rename: BTreeMap<&str, &str> = COLUMN_MAPPING.iter().copied().collect();

    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for key in record.keys() {
            if key == DATE_COLUMN {
                continue;
            }
            let name = rename.get(key.as_str()).copied().unwrap_or(key).to_string();
            if !columns.contains(&name) {
                columns.push(name);
            }
        }
    }

    let mut table = Table::new(columns);
    for record in records {
        let raw_ts = record
            .get(DATE_COLUMN)
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::processing(format!("Record without {}", DATE_COLUMN)))?;
        let ts = NaiveDateTime::parse_from_str(raw_ts, UPSTREAM_DATE_FORMAT).map_err(|e| {
            AppError::processing(format!("Invalid {} '{}': {}", DATE_COLUMN, raw_ts, e))
        })?;

        let mut cells = vec![Cell::Empty; table.columns.len()];
        for (key, value) in record {
            if key == DATE_COLUMN {
                continue;
            }
            let name = rename.get(key.as_str()).copied().unwrap_or(key);
            if let Some(idx) = table.column_index(name) {
                cells[idx] = Cell::from_json(value);
            }
        }
        table.rows.push((ts - Duration::hours(LOCAL_OFFSET_HOURS), cells));
    }

    table.rows.sort_by_key(|(ts, _)| *ts);

    let feature_idx: Vec<Option<usize>> = MODEL_FEATURES
        .iter()
        .map(|f| table.column_index(f))
        .collect();
    table.rows.retain(|(_, cells)| {
        feature_idx
            .iter()
            .all(|idx| idx.map(|i| cells[i].as_f64().is_some()).unwrap_or(false))
    });

    Ok(table)
}

fn dedupe_index(mut table: Table) -> Table {
    let mut seen = std::collections::HashSet::new();
    table.rows.retain(|(ts, _)| seen.insert(*ts));
    table
}

/// Complete 5-minute grid from the first to the last timestamp. Rows off the
/// grid are dropped; grid slots without a row are empty.
pub fn reindex_five_minutes(table: Table) -> Table {
    let step = Duration::minutes(5);
    let (Some(start), Some(end)) = (
        table.rows.iter().map(|(ts, _)| *ts).min(),
        table.rows.iter().map(|(ts, _)| *ts).max(),
    ) else {
        return table;
    };

    let width = table.columns.len();
    let mut by_ts: BTreeMap<NaiveDateTime, Vec<Cell>> = BTreeMap::new();
    for (ts, cells) in table.rows {
        by_ts.entry(ts).or_insert(cells);
    }

    let mut out = Table::new(table.columns);
    let mut cursor = start;
    while cursor <= end {
        let cells = by_ts
            .remove(&cursor)
            .unwrap_or_else(|| vec![Cell::Empty; width]);
        out.rows.push((cursor, cells));
        cursor += step;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(value: Value) -> RawRecord {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_previous_day_window_in_utc() {
        // 2025-03-02 03:00 UTC is still 2025-03-01 in GMT-5
        let now = Utc.with_ymd_and_hms(2025, 3, 2, 3, 0, 0).unwrap();
        let (start, end) = previous_day_window(now);
        assert_eq!(start.to_string(), "2025-02-28 05:00:00");
        assert_eq!(end.to_string(), "2025-03-01 04:59:59");

        let later = Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap();
        let (start, end) = previous_day_window(later);
        assert_eq!(start.to_string(), "2025-03-01 05:00:00");
        assert_eq!(end.to_string(), "2025-03-02 04:59:59");
    }

    #[test]
    fn test_station_ids() {
        assert_eq!(station_id(13), "qH013");
    }

    #[test]
    fn test_process_records_renames_sorts_and_filters() {
        let records = vec![
            record(json!({"id": 2, "PM25": 12.0, "temperature": 20.0, "humidity": 80.0, "pressure": 1010.0,
                          "timestamp_zone": "Sat, 01 Mar 2025 10:05:00 GMT"})),
            record(json!({"id": 1, "PM25": 10.0, "temperature": 21.0, "humidity": 79.0, "pressure": 1011.0,
                          "timestamp_zone": "Sat, 01 Mar 2025 10:00:00 GMT"})),
            record(json!({"id": 3, "PM25": null, "temperature": 21.0, "humidity": 79.0, "pressure": 1011.0,
                          "timestamp_zone": "Sat, 01 Mar 2025 10:10:00 GMT"})),
        ];

        let table = process_records(&records).unwrap();
        assert_eq!(table.columns, vec!["id", "Pm2.5", "Temp", "Humedad", "Presion"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0].0.to_string(), "2025-03-01 05:00:00");
        assert_eq!(table.rows[1].1[1], Cell::Number(12.0));
    }

    #[test]
    fn test_reindex_fills_gaps() {
        let mut table = Table::new(vec!["Pm2.5".to_string()]);
        let t0 = NaiveDateTime::parse_from_str("2025-03-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        table.rows.push((t0, vec![Cell::Number(1.0)]));
        table.rows.push((t0 + Duration::minutes(15), vec![Cell::Number(2.0)]));

        let grid = reindex_five_minutes(table);
        assert_eq!(grid.len(), 4);
        assert!(grid.rows[1].1[0].is_empty());
        assert_eq!(grid.rows[3].1[0], Cell::Number(2.0));
    }
}
