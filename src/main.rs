use air_quality_lambdas::config::cli::Command;
use air_quality_lambdas::image::{check_descriptor, first_stale_layer, fingerprint_layers, LayerDigest};
use air_quality_lambdas::runtime::InvocationContext;
use air_quality_lambdas::utils::{logger, validation::Validate};
use air_quality_lambdas::{
    standard_registry, Buckets, CliConfig, HandlerId, HandlerRegistry, ImageSpec,
    LambdaConfig, LocalStorage,
};
use anyhow::Context;
use clap::Parser;
use std::path::Path;

fn local_registry(
    storage_dir: &Path,
    base_dir: &Path,
) -> anyhow::Result<HandlerRegistry> {
    let config = LambdaConfig::from_env()?;
    config.validate()?;
    tracing::debug!("Lambda config: {:?}", config);

    let buckets = Buckets {
        predictions: LocalStorage::new(storage_dir.join(&config.predictions_bucket)),
        teledyne: LocalStorage::new(storage_dir.join(&config.teledyne_bucket)),
    };
    Ok(standard_registry(&config, buckets, base_dir)?)
}

async fn invoke(
    handler: &str,
    event: Option<&Path>,
    storage_dir: &Path,
    base_dir: &Path,
) -> anyhow::Result<()> {
    let registry = local_registry(storage_dir, base_dir)?;
    let id: HandlerId = handler.parse()?;
    let handler = registry.resolve(&id)?;

    let event = match event {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading event file {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => serde_json::json!({}),
    };

    let ctx = InvocationContext {
        request_id: format!("local-{}", chrono::Utc::now().timestamp_millis()),
        ..Default::default()
    };
    tracing::info!("Invoking {} ({})", id, ctx.request_id);

    let result = handler.call(event, ctx).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn plan(previous: &Path, context: &Path, save: bool) -> anyhow::Result<()> {
    let spec = ImageSpec::default();
    let current = fingerprint_layers(context, &spec)?;

    let old: Vec<LayerDigest> = if previous.is_file() {
        let raw = std::fs::read_to_string(previous)?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing fingerprints {}", previous.display()))?
    } else {
        tracing::info!("No previous fingerprints at {}", previous.display());
        Vec::new()
    };

    match first_stale_layer(&old, &current) {
        Some(layer) => println!("Rebuild from the {} layer", layer),
        None => println!("All layers are up to date"),
    }

    if save {
        std::fs::write(previous, serde_json::to_string_pretty(&current)?)?;
        tracing::info!("Fingerprints saved to {}", previous.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();

    // 初始化日誌
    logger::init_cli_logger(config.verbose);

    match &config.command {
        Command::Handlers => {
            let registry = local_registry(Path::new("./buckets"), Path::new("."))?;
            for id in registry.handler_ids() {
                println!("{}", id);
            }
        }
        Command::Invoke {
            handler,
            event,
            storage_dir,
            base_dir,
        } => invoke(handler, event.as_deref(), storage_dir, base_dir).await?,
        Command::Dockerfile => print!("{}", ImageSpec::default().render_dockerfile()?),
        Command::CheckDockerfile { path } => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let report = check_descriptor(&text)?;
            let layers: Vec<String> = report.layers.iter().map(ToString::to_string).collect();
            println!("✅ {} layers in order: {}", path.display(), layers.join(" → "));
            println!("   entrypoint {:?}, handler {}", report.entrypoint, report.handler);
            if let Some(function) = &report.default_function {
                println!("   default function {}", function);
            }
        }
        Command::Plan {
            previous,
            context,
            save,
        } => plan(previous, context, *save)?,
    }

    Ok(())
}
