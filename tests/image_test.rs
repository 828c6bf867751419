use air_quality_lambdas::image::{check_descriptor, first_stale_layer, fingerprint_layers, LayerKind};
use air_quality_lambdas::runtime::{resolve_handler_id, DEFAULT_HANDLER};
use air_quality_lambdas::{standard_registry, Buckets, ImageSpec, LambdaConfig, LocalStorage};
use std::path::Path;
use tempfile::TempDir;

fn repo_root() -> &'static Path {
    Path::new(env!("CARGO_MANIFEST_DIR"))
}

#[test]
fn test_checked_in_dockerfile_matches_rendered() {
    let on_disk = std::fs::read_to_string(repo_root().join("Dockerfile")).unwrap();
    assert_eq!(on_disk, ImageSpec::default().render_dockerfile().unwrap());

    let report = check_descriptor(&on_disk).unwrap();
    assert_eq!(report.handler.module(), "lambda_function");
    assert_eq!(report.handler.function(), "lambda_handler");
}

#[test]
fn test_image_built_without_arguments_serves_default_command() {
    let rendered = ImageSpec::default().render_dockerfile().unwrap();
    let report = check_descriptor(&rendered).unwrap();
    let function = report.default_function.expect("FUNCTION has a default");

    // the environment a plain `docker build .` bakes in
    let config = LambdaConfig::from_lookup(|key| match key {
        "AQ_FUNCTION" => Some(function.clone()),
        "EMAIL" => Some("ops@qaira.pe".to_string()),
        "PASSWORD" => Some("pw".to_string()),
        _ => None,
    })
    .unwrap();
    assert_eq!(config.function.as_deref(), Some(function.as_str()));

    let dir = TempDir::new().unwrap();
    let buckets = Buckets {
        predictions: LocalStorage::new(dir.path().join("predictions")),
        teledyne: LocalStorage::new(dir.path().join("teledyne")),
    };
    let registry = standard_registry(&config, buckets, repo_root()).unwrap();

    let id = resolve_handler_id(vec![report.handler.to_string()], None).unwrap();
    assert_eq!(id.to_string(), DEFAULT_HANDLER);
    assert!(registry.resolve(&id).is_ok());
}

#[test]
fn test_repository_fingerprints_are_reproducible() {
    let spec = ImageSpec::default();
    let first = fingerprint_layers(repo_root(), &spec).unwrap();
    let second = fingerprint_layers(repo_root(), &spec).unwrap();
    assert_eq!(first_stale_layer(&first, &second), None);
    assert_eq!(
        first.iter().map(|d| d.layer).collect::<Vec<_>>(),
        vec![
            LayerKind::Manifest,
            LayerKind::Dependencies,
            LayerKind::Source,
            LayerKind::Models
        ]
    );
}

#[test]
fn test_shipped_models_load() {
    let config = air_quality_lambdas::config::ModelsConfig::from_file(repo_root().join("models/models.toml")).unwrap();
    let store = air_quality_lambdas::core::calibration::ModelStore::from_config(repo_root(), config);
    for station in ["qH013", "qH014", "qH015", "qH017", "qH018"] {
        let model = store.load(station).unwrap();
        assert_eq!(model.predict(&[[12.5, 20.0, 80.0, 1010.0]]), vec![12.5]);
    }
}
