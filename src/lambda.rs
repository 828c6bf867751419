use air_quality_lambdas::runtime::{self, resolve_handler_id};
use air_quality_lambdas::utils::{logger, validation::Validate};
use air_quality_lambdas::{standard_registry, Buckets, LambdaConfig, S3Storage};
use lambda_runtime::Error;

/// Bootstrap of every function image. The handler identifier comes from the
/// image command (`lambda_function.lambda_handler` by default) or `_HANDLER`.
#[tokio::main]
async fn main() -> Result<(), Error> {
    logger::init_lambda_logger();

    let handler_id = resolve_handler_id(std::env::args().skip(1), std::env::var("_HANDLER").ok())?;

    let config = LambdaConfig::from_env()?;
    config.validate()?;
    tracing::info!("Starting {} with {:?}", handler_id, config);

    // 創建 S3 客戶端
    let client = S3Storage::client_for_region(&config.region).await;
    let buckets = Buckets {
        predictions: S3Storage::new(client.clone(), config.predictions_bucket.clone()),
        teledyne: S3Storage::new(client, config.teledyne_bucket.clone()),
    };

    let base_dir = std::env::current_dir()?;
    let registry = standard_registry(&config, buckets, base_dir)?;

    // 找不到 handler 時在接收第一個事件前就失敗
    let handler = registry.resolve(&handler_id).map_err(|e| {
        tracing::error!("Cannot start {}: {}", handler_id, e);
        e
    })?;

    runtime::run(handler).await
}
