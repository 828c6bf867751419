use crate::utils::error::Result;
use crate::utils::validation::{
    validate_aws_region, validate_non_empty_string, validate_path, validate_s3_bucket_name,
    validate_url, Validate,
};
use std::env;

pub const DEFAULT_PREDICTIONS_BUCKET: &str = "air-quality-predictions";
pub const DEFAULT_TELEDYNE_BUCKET: &str = "air-quality-teledyne";
pub const DEFAULT_QHAWAX_API_URL: &str = "https://qhapi.qairadrones.com";
pub const DEFAULT_MODELS_CONFIG: &str = "models/models.toml";

/// Environment of the Lambda functions. Secrets are optional here; each
/// handler factory requires the ones its handler needs.
#[derive(Clone, Default)]
pub struct LambdaConfig {
    pub email: Option<String>,
    pub password: Option<String>,
    pub jwt_secret: Option<String>,
    pub google_credentials: Option<String>,
    pub folder_id: Option<String>,
    pub predictions_bucket: String,
    pub teledyne_bucket: String,
    pub qhawax_api_url: String,
    pub models_config: String,
    pub region: String,
    /// Function the `lambda_function` module stands for in this image.
    pub function: Option<String>,
}

impl std::fmt::Debug for LambdaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |v: &Option<String>| v.as_ref().map(|_| "[hidden]");
        f.debug_struct("LambdaConfig")
            .field("email", &self.email)
            .field("password", &redacted(&self.password))
            .field("jwt_secret", &redacted(&self.jwt_secret))
            .field("google_credentials", &self.google_credentials)
            .field("folder_id", &self.folder_id)
            .field("predictions_bucket", &self.predictions_bucket)
            .field("teledyne_bucket", &self.teledyne_bucket)
            .field("qhawax_api_url", &self.qhawax_api_url)
            .field("models_config", &self.models_config)
            .field("region", &self.region)
            .field("function", &self.function)
            .finish()
    }
}

impl LambdaConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let with_default =
            |key: &str, default: &str| optional(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            email: optional("EMAIL"),
            password: optional("PASSWORD"),
            jwt_secret: optional("JWT_SECRET"),
            google_credentials: optional("GOOGLE_APPLICATION_CREDENTIALS"),
            folder_id: optional("FOLDER_ID"),
            predictions_bucket: with_default("PREDICTIONS_BUCKET", DEFAULT_PREDICTIONS_BUCKET),
            teledyne_bucket: with_default("TELEDYNE_BUCKET", DEFAULT_TELEDYNE_BUCKET),
            qhawax_api_url: with_default("QHAWAX_API_URL", DEFAULT_QHAWAX_API_URL)
                .trim_end_matches('/')
                .to_string(),
            models_config: with_default("MODELS_CONFIG", DEFAULT_MODELS_CONFIG),
            region: optional("AWS_REGION")
                .or_else(|| optional("AWS_DEFAULT_REGION"))
                .unwrap_or_else(|| "us-east-1".to_string()),
            function: optional("AQ_FUNCTION"),
        })
    }
}

impl Validate for LambdaConfig {
    fn validate(&self) -> Result<()> {
        validate_url("QHAWAX_API_URL", &self.qhawax_api_url)?;
        validate_s3_bucket_name("PREDICTIONS_BUCKET", &self.predictions_bucket)?;
        validate_s3_bucket_name("TELEDYNE_BUCKET", &self.teledyne_bucket)?;
        validate_aws_region("AWS_REGION", &self.region)?;
        validate_path("MODELS_CONFIG", &self.models_config)?;

        if let Some(path) = &self.google_credentials {
            validate_path("GOOGLE_APPLICATION_CREDENTIALS", path)?;
        }
        if let Some(function) = &self.function {
            validate_non_empty_string("AQ_FUNCTION", function)?;
        }

        tracing::debug!("Lambda configuration validation passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = LambdaConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.predictions_bucket, "air-quality-predictions");
        assert_eq!(config.teledyne_bucket, "air-quality-teledyne");
        assert_eq!(config.qhawax_api_url, "https://qhapi.qairadrones.com");
        assert_eq!(config.models_config, "models/models.toml");
        assert!(config.jwt_secret.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let config = LambdaConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "  "),
            ("QHAWAX_API_URL", "http://localhost:8080/"),
            ("AQ_FUNCTION", "login"),
        ]))
        .unwrap();
        assert!(config.jwt_secret.is_none());
        assert_eq!(config.qhawax_api_url, "http://localhost:8080");
        assert_eq!(config.function.as_deref(), Some("login"));
    }

    #[test]
    fn test_invalid_bucket_fails_validation() {
        let config =
            LambdaConfig::from_lookup(lookup(&[("PREDICTIONS_BUCKET", "Bad_Bucket")])).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = LambdaConfig::from_lookup(lookup(&[("PASSWORD", "hunter2")])).unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
