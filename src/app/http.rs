//! API Gateway proxy envelope helpers.

use crate::core::auth::{Claims, TokenService};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_INTERNAL_SERVER_ERROR: u16 = 500;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiGatewayResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub headers: Value,
    pub body: String,
}

impl ApiGatewayResponse {
    pub fn json(status_code: u16, body: &Value) -> Self {
        Self {
            status_code,
            headers: json!({ "Content-Type": "application/json" }),
            body: body.to_string(),
        }
    }

    pub fn message(status_code: u16, message: &str) -> Self {
        Self::json(status_code, &json!({ "message": message }))
    }

    pub fn error(status_code: u16, error: &str) -> Self {
        Self::json(status_code, &json!({ "error": error }))
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            json!({
                "statusCode": STATUS_INTERNAL_SERVER_ERROR,
                "body": json!({ "error": e.to_string() }).to_string(),
            })
        })
    }

    /// Parsed JSON body; mostly for tests and local invocations.
    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Request body as JSON. A missing or null body reads as `{}`; a body that is
/// already a JSON object (direct invocation) is taken as-is.
pub fn request_body(event: &Value) -> Result<Value, serde_json::Error> {
    match event.get("body") {
        None | Some(Value::Null) => Ok(json!({})),
        Some(Value::String(raw)) => serde_json::from_str(raw),
        Some(other) => Ok(other.clone()),
    }
}

/// Header lookup trying the lower-case name first, then the canonical one.
pub fn header<'a>(event: &'a Value, lower: &str, canonical: &str) -> Option<&'a str> {
    let headers = event.get("headers")?;
    headers
        .get(lower)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .or_else(|| headers.get(canonical).and_then(Value::as_str))
}

/// Checks the bearer token of an API request.
pub fn authorize(event: &Value, tokens: &TokenService) -> Result<Claims, ApiGatewayResponse> {
    const PREFIX: &str = "Bearer ";

    let auth_header = header(event, "authorization", "Authorization")
        .filter(|h| h.starts_with(PREFIX))
        .ok_or_else(|| {
            ApiGatewayResponse::message(
                STATUS_UNAUTHORIZED,
                "Missing or invalid Authorization header",
            )
        })?;

    let token = auth_header[PREFIX.len()..].trim();
    if token.is_empty() {
        return Err(ApiGatewayResponse::message(
            STATUS_UNAUTHORIZED,
            "Missing token in Authorization header",
        ));
    }

    tokens
        .verify(token)
        .map_err(|rejection| ApiGatewayResponse::error(STATUS_UNAUTHORIZED, rejection.message()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_variants() {
        assert_eq!(request_body(&json!({})).unwrap(), json!({}));
        assert_eq!(request_body(&json!({"body": null})).unwrap(), json!({}));
        assert_eq!(
            request_body(&json!({"body": "{\"a\": 1}"})).unwrap(),
            json!({"a": 1})
        );
        assert_eq!(request_body(&json!({"body": {"a": 1}})).unwrap(), json!({"a": 1}));
        assert!(request_body(&json!({"body": "{not json"})).is_err());
    }

    #[test]
    fn test_authorize_rejections() {
        let tokens = TokenService::new("secret");

        let missing = authorize(&json!({"headers": {}}), &tokens).unwrap_err();
        assert_eq!(missing.status_code, 401);
        assert_eq!(
            missing.body_json().unwrap(),
            json!({"message": "Missing or invalid Authorization header"})
        );

        let empty = authorize(&json!({"headers": {"Authorization": "Bearer "}}), &tokens).unwrap_err();
        assert_eq!(
            empty.body_json().unwrap(),
            json!({"message": "Missing token in Authorization header"})
        );

        let invalid =
            authorize(&json!({"headers": {"authorization": "Bearer abc"}}), &tokens).unwrap_err();
        assert_eq!(invalid.body_json().unwrap(), json!({"error": "Invalid token"}));
    }

    #[test]
    fn test_authorize_accepts_either_header_case() {
        let tokens = TokenService::new("secret");
        let token = tokens.issue("a@b.pe").unwrap();

        let lower = json!({"headers": {"authorization": format!("Bearer {}", token)}});
        let upper = json!({"headers": {"Authorization": format!("Bearer {}", token)}});
        assert_eq!(authorize(&lower, &tokens).unwrap().email, "a@b.pe");
        assert_eq!(authorize(&upper, &tokens).unwrap().email, "a@b.pe");
    }
}
