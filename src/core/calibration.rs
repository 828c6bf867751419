//! Per-station calibration regressors loaded from the model artifact directory.
//!
//! Artifacts are JSON documents exported from the training notebooks. Two
//! shapes are understood: a linear model and an averaged ensemble of
//! regression trees (the estimator a random-forest grid search settles on).

use crate::config::models::ModelsConfig;
use crate::utils::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Feature order every artifact is trained on.
pub const MODEL_FEATURES: [&str; 4] = ["Pm2.5", "Temp", "Humedad", "Presion"];

pub type FeatureRow = [f64; 4];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalibrationModel {
    Linear {
        features: Vec<String>,
        intercept: f64,
        coefficients: Vec<f64>,
    },
    Forest {
        features: Vec<String>,
        trees: Vec<RegressionTree>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    /// Rows with `x[feature] <= threshold` go left.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

impl RegressionTree {
    fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(model_error("regression tree has no nodes"));
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= MODEL_FEATURES.len() {
                    return Err(model_error(format!("node {} splits on unknown feature {}", idx, feature)));
                }
                // 子節點必須在後面，保證走訪會結束
                if *left <= idx || *right <= idx || *left >= self.nodes.len() || *right >= self.nodes.len() {
                    return Err(model_error(format!("node {} has invalid children", idx)));
                }
            }
        }
        Ok(())
    }

    fn predict_row(&self, row: &FeatureRow) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

fn model_error(message: impl Into<String>) -> AppError {
    AppError::ModelError {
        message: message.into(),
    }
}

impl CalibrationModel {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let model: CalibrationModel = serde_json::from_slice(data)?;
        model.validate()?;
        Ok(model)
    }

    pub fn features(&self) -> &[String] {
        match self {
            CalibrationModel::Linear { features, .. } | CalibrationModel::Forest { features, .. } => {
                features
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.features() != MODEL_FEATURES {
            return Err(model_error(format!(
                "artifact features {:?} do not match expected {:?}",
                self.features(),
                MODEL_FEATURES
            )));
        }
        match self {
            CalibrationModel::Linear { coefficients, .. } => {
                if coefficients.len() != MODEL_FEATURES.len() {
                    return Err(model_error(format!(
                        "expected {} coefficients, found {}",
                        MODEL_FEATURES.len(),
                        coefficients.len()
                    )));
                }
            }
            CalibrationModel::Forest { trees, .. } => {
                if trees.is_empty() {
                    return Err(model_error("forest has no trees"));
                }
                for tree in trees {
                    tree.validate()?;
                }
            }
        }
        Ok(())
    }

    pub fn predict(&self, rows: &[FeatureRow]) -> Vec<f64> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }

    fn predict_row(&self, row: &FeatureRow) -> f64 {
        match self {
            CalibrationModel::Linear {
                intercept,
                coefficients,
                ..
            } => intercept + coefficients.iter().zip(row).map(|(c, x)| c * x).sum::<f64>(),
            CalibrationModel::Forest { trees, .. } => {
                trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / trees.len() as f64
            }
        }
    }
}

/// Resolves station ids to artifacts and keeps loaded models for the life of
/// the execution environment.
#[derive(Debug)]
pub struct ModelStore {
    base_dir: PathBuf,
    paths: BTreeMap<String, String>,
    cache: Mutex<HashMap<String, Arc<CalibrationModel>>>,
}

impl ModelStore {
    /// `paths` are relative to `base_dir` (the process working directory in the image).
    pub fn new(base_dir: impl Into<PathBuf>, paths: BTreeMap<String, String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            paths,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(base_dir: impl Into<PathBuf>, config: ModelsConfig) -> Self {
        Self::new(base_dir, config.models)
    }

    pub fn load(&self, station: &str) -> Result<Arc<CalibrationModel>> {
        if let Some(model) = self.cache.lock().ok().and_then(|c| c.get(station).cloned()) {
            return Ok(model);
        }

        let file = self.paths.get(station).ok_or_else(|| AppError::ModelNotFound {
            station: station.to_string(),
        })?;
        let artifact_path = self.base_dir.join(file);
        if !artifact_path.is_file() {
            return Err(AppError::ArtifactMissing {
                station: station.to_string(),
                file: file.clone(),
                path: artifact_path.display().to_string(),
            });
        }

        let model = Arc::new(read_artifact(&artifact_path)?);
        tracing::info!("Loaded model for {} from {}", station, artifact_path.display());
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(station.to_string(), model.clone());
        }
        Ok(model)
    }
}

fn read_artifact(path: &Path) -> Result<CalibrationModel> {
    let data = std::fs::read(path)?;
    CalibrationModel::from_json(&data).map_err(|e| {
        model_error(format!("failed to load artifact {}: {}", path.display(), e))
    })
}
