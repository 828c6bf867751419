//! The functions this project deploys, by handler identifier.

use super::handlers::{
    LoginHandler, MakePredictionsHandler, OnDemandPredictionHandler, ReturnPredictionsHandler,
    SaveTeledyneHandler,
};
use crate::config::models::ModelsConfig;
use crate::config::LambdaConfig;
use crate::core::calibration::ModelStore;
use crate::domain::ports::Storage;
use crate::runtime::{Handler, HandlerId, HandlerRegistry, DEFAULT_HANDLER};
use crate::utils::error::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Module names of the deployed functions; each exposes `lambda_handler`.
pub const FUNCTIONS: [&str; 5] = [
    "make_predictions",
    "save_teledyne_data",
    "login",
    "return_predictions",
    "return_predictions_on_demand",
];

pub const ENTRY_POINT: &str = "lambda_handler";

/// The two buckets the functions read and write.
#[derive(Debug, Clone)]
pub struct Buckets<S> {
    pub predictions: S,
    pub teledyne: S,
}

fn load_models(base_dir: &Path, config: &LambdaConfig) -> Result<Arc<ModelStore>> {
    let models = ModelsConfig::from_file(base_dir.join(&config.models_config))?;
    Ok(Arc::new(ModelStore::from_config(base_dir, models)))
}

/// Registry of every function of the project. `base_dir` is where
/// `models/` lives (the image working directory).
///
/// When `AQ_FUNCTION` is set, the image's default command
/// `lambda_function.lambda_handler` resolves to that function.
pub fn standard_registry<S>(
    config: &LambdaConfig,
    buckets: Buckets<S>,
    base_dir: impl Into<PathBuf>,
) -> Result<HandlerRegistry>
where
    S: Storage + Clone + 'static,
{
    let base_dir: PathBuf = base_dir.into();
    let mut registry = HandlerRegistry::new();
    let entry = |module: &str| HandlerId::new(module, ENTRY_POINT);

    {
        let (config, base_dir, output) = (config.clone(), base_dir.clone(), buckets.predictions.clone());
        registry.register(entry("make_predictions")?, move || {
            let models = load_models(&base_dir, &config)?;
            let handler = MakePredictionsHandler::from_config(&config, models, output.clone())?;
            Ok(Arc::new(handler) as Arc<dyn Handler>)
        });
    }

    {
        let (config, reference) = (config.clone(), buckets.teledyne.clone());
        registry.register(entry("save_teledyne_data")?, move || {
            let handler = SaveTeledyneHandler::from_config(&config, reference.clone())?;
            Ok(Arc::new(handler) as Arc<dyn Handler>)
        });
    }

    {
        let config = config.clone();
        registry.register(entry("login")?, move || {
            Ok(Arc::new(LoginHandler::from_config(&config)?) as Arc<dyn Handler>)
        });
    }

    {
        let (config, buckets) = (config.clone(), buckets.clone());
        registry.register(entry("return_predictions")?, move || {
            let handler = ReturnPredictionsHandler::from_config(
                &config,
                buckets.predictions.clone(),
                buckets.teledyne.clone(),
            )?;
            Ok(Arc::new(handler) as Arc<dyn Handler>)
        });
    }

    {
        let (config, base_dir) = (config.clone(), base_dir.clone());
        registry.register(entry("return_predictions_on_demand")?, move || {
            let models = load_models(&base_dir, &config)?;
            let handler = OnDemandPredictionHandler::from_config(&config, models)?;
            Ok(Arc::new(handler) as Arc<dyn Handler>)
        });
    }

    if let Some(function) = &config.function {
        let target = entry(function)?;
        registry.alias(DEFAULT_HANDLER.parse()?, target);
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::LocalStorage;
    use crate::utils::error::AppError;

    fn buckets() -> Buckets<LocalStorage> {
        Buckets {
            predictions: LocalStorage::new("/tmp/predictions"),
            teledyne: LocalStorage::new("/tmp/teledyne"),
        }
    }

    #[test]
    fn test_every_function_is_registered() {
        let registry = standard_registry(&LambdaConfig::default(), buckets(), ".").unwrap();
        for function in FUNCTIONS {
            let id = HandlerId::new(function, ENTRY_POINT).unwrap();
            assert!(registry.contains(&id), "{} missing", id);
        }
        assert!(!registry.contains(&DEFAULT_HANDLER.parse().unwrap()));
    }

    #[test]
    fn test_default_handler_follows_function_env() {
        let config = LambdaConfig {
            function: Some("login".to_string()),
            ..Default::default()
        };
        let registry = standard_registry(&config, buckets(), ".").unwrap();
        assert!(registry.contains(&DEFAULT_HANDLER.parse().unwrap()));
    }

    #[test]
    fn test_factory_reports_missing_secrets() {
        let registry = standard_registry(&LambdaConfig::default(), buckets(), ".").unwrap();
        let result = registry.resolve(&"login.lambda_handler".parse().unwrap());
        assert!(matches!(result, Err(AppError::MissingConfigError { .. })));
    }
}
