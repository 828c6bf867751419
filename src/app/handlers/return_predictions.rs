use super::{daily_key, key_date};
use crate::app::http::{
    authorize, request_body, ApiGatewayResponse, STATUS_BAD_REQUEST,
    STATUS_INTERNAL_SERVER_ERROR, STATUS_OK,
};
use crate::config::LambdaConfig;
use crate::core::auth::TokenService;
use crate::domain::model::{format_float, Cell, PredictionRecord, Table};
use crate::domain::ports::Storage;
use crate::runtime::{Handler, InvocationContext};
use crate::utils::error::{AppError, Result};
use crate::utils::validation::validate_required_field;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

pub const PREDICTION_COLUMNS: [&str; 4] = ["PM10", "Pm2.5", "Prediccion_Pm2.5", "qhawax_id"];
pub const TELEDYNE_COLUMN: &str = "PM2.5 Conc";
const RESPONSE_DATE_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// A row read back from a bucket: formatted timestamp plus the selected cells.
type DatedRow = (String, Vec<Cell>);

/// Stored predictions for a date range, joined with the reference monitor.
pub struct ReturnPredictionsHandler<S: Storage> {
    predictions: S,
    teledyne: S,
    tokens: TokenService,
}

impl<S: Storage> ReturnPredictionsHandler<S> {
    pub fn new(predictions: S, teledyne: S, tokens: TokenService) -> Self {
        Self {
            predictions,
            teledyne,
            tokens,
        }
    }

    pub fn from_config(config: &LambdaConfig, predictions: S, teledyne: S) -> Result<Self> {
        let secret = validate_required_field("JWT_SECRET", &config.jwt_secret)?;
        Ok(Self::new(predictions, teledyne, TokenService::new(secret)))
    }

    pub async fn handle(&self, event: &Value) -> ApiGatewayResponse {
        match self.try_handle(event).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Failed to return predictions: {}", e);
                ApiGatewayResponse::error(STATUS_INTERNAL_SERVER_ERROR, &e.to_string())
            }
        }
    }

    async fn try_handle(&self, event: &Value) -> Result<ApiGatewayResponse> {
        if let Err(rejection) = authorize(event, &self.tokens) {
            return Ok(rejection);
        }

        let Ok(body) = request_body(event) else {
            return Ok(ApiGatewayResponse::message(
                STATUS_BAD_REQUEST,
                "Invalid JSON format in request body",
            ));
        };

        let (start_date, end_date) = match parse_range(&body) {
            Ok(range) => range,
            Err(message) => return Ok(ApiGatewayResponse::message(STATUS_BAD_REQUEST, message)),
        };

        let records = self.query(start_date, end_date).await?;
        tracing::info!(
            "Returning {} prediction rows for {} to {}",
            records.len(),
            start_date,
            end_date
        );
        Ok(ApiGatewayResponse::json(
            STATUS_OK,
            &serde_json::to_value(&records)?,
        ))
    }

    pub async fn query(&self, start_date: NaiveDate, end_date: NaiveDate) -> Result<Vec<PredictionRecord>> {
        // 從前一天的檔名之後開始列出
        let start_after = start_after_key(start_date);

        let predictions = read_range(
            &self.predictions,
            &start_after,
            start_date,
            end_date,
            &PREDICTION_COLUMNS,
        )
        .await?;
        if predictions.is_empty() {
            return Ok(Vec::new());
        }

        let teledyne = read_range(
            &self.teledyne,
            &start_after,
            start_date,
            end_date,
            &[TELEDYNE_COLUMN],
        )
        .await?;

        let reference: Option<HashMap<String, Option<f64>>> = if teledyne.is_empty() {
            None
        } else {
            let mut by_date = HashMap::new();
            for (date, cells) in teledyne {
                by_date.entry(date).or_insert_with(|| cells[0].as_f64());
            }
            Some(by_date)
        };

        Ok(predictions
            .into_iter()
            .map(|(date, cells)| PredictionRecord {
                teledyne_pm25: reference
                    .as_ref()
                    .map(|by_date| by_date.get(&date).copied().flatten()),
                pm10: cells[0].as_f64(),
                pm25: cells[1].as_f64(),
                predicted_pm25: cells[2].as_f64(),
                qhawax_id: match &cells[3] {
                    Cell::Empty => None,
                    Cell::Text(s) => Some(s.clone()),
                    Cell::Number(n) => Some(format_float(*n)),
                },
                date,
            })
            .collect())
    }
}

#[async_trait]
impl<S: Storage + 'static> Handler for ReturnPredictionsHandler<S> {
    async fn call(&self, event: Value, _ctx: InvocationContext) -> Result<Value> {
        Ok(self.handle(&event).await.into_value())
    }
}

fn parse_range(body: &Value) -> std::result::Result<(NaiveDate, NaiveDate), &'static str> {
    let start = body.get("start_date").filter(|v| !v.is_null());
    let end = body.get("end_date").filter(|v| !v.is_null());
    let (Some(start), Some(end)) = (start, end) else {
        return Err("The parameters start_date and end_date cannot be None");
    };

    let parse = |v: &Value| {
        v.as_str()
            .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
    };
    let (Some(start), Some(end)) = (parse(start), parse(end)) else {
        return Err("Invalid date format. Please use YYYY-MM-DD.");
    };

    if end < start {
        return Err("The end_date must be greater than or equal to start_date.");
    }
    Ok((start, end))
}

/// Key of the day before `start_date`; listing strictly after it begins at `start_date`.
pub fn start_after_key(start_date: NaiveDate) -> String {
    let adjusted = start_date.and_time(chrono::NaiveTime::default()) - Duration::hours(1);
    daily_key(adjusted.date())
}

async fn read_range<S: Storage>(
    storage: &S,
    start_after: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
    columns: &[&str],
) -> Result<Vec<DatedRow>> {
    let keys = storage.list_after(start_after).await?;
    let mut rows = Vec::new();
    let mut seen = HashSet::new();

    for key in keys {
        let Some(file_date) = key_date(&key) else {
            continue;
        };
        if file_date < start_date || file_date > end_date {
            continue;
        }

        let data = storage.read_file(&key).await?;
        let table = Table::from_csv(&data)?;
        let indices = columns
            .iter()
            .map(|name| {
                table.column_index(name).ok_or_else(|| {
                    AppError::processing(format!(
                        "Column '{}' not found in {}/{}",
                        name,
                        storage.location(),
                        key
                    ))
                })
            })
            .collect::<Result<Vec<usize>>>()?;

        for (ts, cells) in table.rows {
            let date = ts.format(RESPONSE_DATE_FORMAT).to_string();
            let selected: Vec<Cell> = indices.iter().map(|&i| cells[i].clone()).collect();

            let fingerprint = std::iter::once(date.clone())
                .chain(selected.iter().map(Cell::to_csv_field))
                .collect::<Vec<_>>()
                .join("\u{1f}");
            if seen.insert(fingerprint) {
                rows.push((date, selected));
            }
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_range_messages() {
        assert_eq!(
            parse_range(&json!({"start_date": "2025-03-01"})),
            Err("The parameters start_date and end_date cannot be None")
        );
        assert_eq!(
            parse_range(&json!({"start_date": "01/03/2025", "end_date": "2025-03-02"})),
            Err("Invalid date format. Please use YYYY-MM-DD.")
        );
        assert_eq!(
            parse_range(&json!({"start_date": "2025-03-02", "end_date": "2025-03-01"})),
            Err("The end_date must be greater than or equal to start_date.")
        );
        assert!(parse_range(&json!({"start_date": "2025-03-01", "end_date": "2025-03-01"})).is_ok());
    }

    #[test]
    fn test_start_after_key_is_previous_day() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert_eq!(start_after_key(start), "2025_02_28_5min_prediction.csv");
    }
}
