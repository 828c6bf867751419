use crate::app::http::{
    authorize, request_body, ApiGatewayResponse, STATUS_BAD_REQUEST,
    STATUS_INTERNAL_SERVER_ERROR, STATUS_OK,
};
use crate::config::LambdaConfig;
use crate::core::auth::TokenService;
use crate::core::calibration::{FeatureRow, ModelStore};
use crate::runtime::{Handler, InvocationContext};
use crate::utils::error::{AppError, Result};
use crate::utils::validation::validate_required_field;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Raw sensor fields, in model feature order.
pub const RAW_FEATURES: [&str; 4] = ["PM25", "temperature", "humidity", "pressure"];

/// Runs a station's calibration model on rows posted by the caller.
pub struct OnDemandPredictionHandler {
    models: Arc<ModelStore>,
    tokens: TokenService,
}

impl OnDemandPredictionHandler {
    pub fn new(models: Arc<ModelStore>, tokens: TokenService) -> Self {
        Self { models, tokens }
    }

    pub fn from_config(config: &LambdaConfig, models: Arc<ModelStore>) -> Result<Self> {
        let secret = validate_required_field("JWT_SECRET", &config.jwt_secret)?;
        Ok(Self::new(models, TokenService::new(secret)))
    }

    pub fn handle(&self, event: &Value) -> ApiGatewayResponse {
        if let Err(rejection) = authorize(event, &self.tokens) {
            return rejection;
        }

        let Ok(body) = request_body(event) else {
            return ApiGatewayResponse::message(
                STATUS_BAD_REQUEST,
                "Invalid JSON format in request body",
            );
        };

        let (Some(station), Some(data)) = (body.get("qhawax_id"), body.get("data")) else {
            return ApiGatewayResponse::message(
                STATUS_BAD_REQUEST,
                "Missing required fields: qhawax_id and data",
            );
        };

        let Some(rows) = data
            .as_array()
            .filter(|rows| rows.iter().all(Value::is_object))
        else {
            return ApiGatewayResponse::message(
                STATUS_BAD_REQUEST,
                "Data must be a list of dictionaries",
            );
        };

        let station = match station {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        match self.predict(&station, rows) {
            Ok(predictions) => {
                ApiGatewayResponse::json(STATUS_OK, &json!({ "predictions": predictions }))
            }
            Err(AppError::ValidationError { message }) => {
                ApiGatewayResponse::message(STATUS_BAD_REQUEST, &message)
            }
            Err(e @ AppError::ModelNotFound { .. }) => {
                ApiGatewayResponse::message(STATUS_BAD_REQUEST, &e.to_string())
            }
            Err(e @ AppError::ArtifactMissing { .. }) => {
                tracing::error!("{}", e);
                ApiGatewayResponse::message(STATUS_INTERNAL_SERVER_ERROR, &e.to_string())
            }
            Err(e) => {
                tracing::error!("On-demand prediction failed: {}", e);
                ApiGatewayResponse::error(STATUS_INTERNAL_SERVER_ERROR, &e.to_string())
            }
        }
    }

    fn predict(&self, station: &str, rows: &[Value]) -> Result<Vec<f64>> {
        let model = self.models.load(station)?;
        let missing_features =
            || AppError::validation("The input data is missing one or more required features.");
        // 空的資料列沒有任何欄位
        if rows.is_empty() {
            return Err(missing_features());
        }
        let features = rows
            .iter()
            .map(feature_row)
            .collect::<Option<Vec<FeatureRow>>>()
            .ok_or_else(missing_features)?;

        Ok(model.predict(&features))
    }
}

fn feature_row(row: &Value) -> Option<FeatureRow> {
    let mut out = [0.0; 4];
    for (slot, name) in out.iter_mut().zip(RAW_FEATURES) {
        *slot = row.get(name)?.as_f64()?;
    }
    Some(out)
}

#[async_trait]
impl Handler for OnDemandPredictionHandler {
    async fn call(&self, event: Value, _ctx: InvocationContext) -> Result<Value> {
        Ok(self.handle(&event).into_value())
    }
}
