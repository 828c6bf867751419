use crate::utils::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Station id → artifact path table, stored as `models/models.toml`.
///
/// ```toml
/// [models]
/// qH013 = "models/qH013.json"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelsConfig {
    #[serde(default)]
    pub models: BTreeMap<String, String>,
}

impl ModelsConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| AppError::ConfigError {
            message: format!(
                "Failed to read models configuration {}: {}",
                path.as_ref().display(),
                e
            ),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ModelsConfig = toml::from_str(content)?;
        for (station, file) in &config.models {
            crate::utils::validation::validate_path(&format!("models.{}", station), file)?;
        }
        Ok(config)
    }
}
