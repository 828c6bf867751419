use crate::app::http::{
    request_body, ApiGatewayResponse, STATUS_INTERNAL_SERVER_ERROR, STATUS_OK, STATUS_UNAUTHORIZED,
};
use crate::config::LambdaConfig;
use crate::core::auth::TokenService;
use crate::runtime::{Handler, InvocationContext};
use crate::utils::error::Result;
use crate::utils::validation::validate_required_field;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Exchanges the shared dashboard credentials for a short-lived token.
#[derive(Debug)]
pub struct LoginHandler {
    email: String,
    password: String,
    tokens: TokenService,
}

impl LoginHandler {
    pub fn new(email: impl Into<String>, password: impl Into<String>, tokens: TokenService) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            tokens,
        }
    }

    pub fn from_config(config: &LambdaConfig) -> Result<Self> {
        let email = validate_required_field("EMAIL", &config.email)?;
        let password = validate_required_field("PASSWORD", &config.password)?;
        let secret = validate_required_field("JWT_SECRET", &config.jwt_secret)?;
        Ok(Self::new(email, password, TokenService::new(secret)))
    }

    pub fn handle(&self, event: &Value) -> ApiGatewayResponse {
        let body = match request_body(event) {
            Ok(body) => body,
            Err(e) => return ApiGatewayResponse::error(STATUS_INTERNAL_SERVER_ERROR, &e.to_string()),
        };

        let email = body.get("email").and_then(Value::as_str);
        let password = body.get("password").and_then(Value::as_str);

        if email != Some(self.email.as_str()) || password != Some(self.password.as_str()) {
            tracing::info!("Rejected login attempt");
            return ApiGatewayResponse::message(STATUS_UNAUTHORIZED, "Invalid credentials");
        }

        match self.tokens.issue(&self.email) {
            Ok(token) => ApiGatewayResponse::json(STATUS_OK, &json!({ "token": token })),
            Err(e) => ApiGatewayResponse::error(STATUS_INTERNAL_SERVER_ERROR, &e.to_string()),
        }
    }
}

#[async_trait]
impl Handler for LoginHandler {
    async fn call(&self, event: Value, _ctx: InvocationContext) -> Result<Value> {
        Ok(self.handle(&event).into_value())
    }
}
