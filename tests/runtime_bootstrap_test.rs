use air_quality_lambdas::app::registry::{ENTRY_POINT, FUNCTIONS};
use air_quality_lambdas::runtime::{handler_fn, resolve_handler_id, InvocationContext, DEFAULT_HANDLER};
use air_quality_lambdas::{
    standard_registry, AppError, Buckets, HandlerId, HandlerRegistry, LambdaConfig,
    LocalStorage,
};
use serde_json::{json, Value};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn buckets(root: &TempDir) -> Buckets<LocalStorage> {
    Buckets {
        predictions: LocalStorage::new(root.path().join("predictions")),
        teledyne: LocalStorage::new(root.path().join("teledyne")),
    }
}

fn full_config() -> LambdaConfig {
    LambdaConfig {
        email: Some("analyst@pucp.edu.pe".to_string()),
        password: Some("s3cret".to_string()),
        jwt_secret: Some("jwt-secret".to_string()),
        ..LambdaConfig::from_lookup(|_| None).unwrap()
    }
}

fn write_models(dir: &TempDir) {
    fs::create_dir_all(dir.path().join("models")).unwrap();
    fs::write(
        dir.path().join("models/models.toml"),
        "[models]\nqH013 = \"models/qH013.json\"\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("models/qH013.json"),
        r#"{"kind": "linear", "features": ["Pm2.5", "Temp", "Humedad", "Presion"],
            "intercept": 0.0, "coefficients": [1.0, 0.0, 0.0, 0.0]}"#,
    )
    .unwrap();
}

#[test]
fn test_registered_handlers_resolve_at_start() {
    let dir = TempDir::new().unwrap();
    write_models(&dir);
    let registry = standard_registry(&full_config(), buckets(&dir), dir.path()).unwrap();

    for id in ["login.lambda_handler", "return_predictions.lambda_handler"] {
        assert!(registry.resolve(&id.parse().unwrap()).is_ok(), "{} failed", id);
    }
    assert!(registry
        .resolve(&"return_predictions_on_demand.lambda_handler".parse().unwrap())
        .is_ok());

    let listed: Vec<String> = registry.handler_ids().iter().map(HandlerId::to_string).collect();
    for function in FUNCTIONS {
        assert!(listed.contains(&format!("{}.{}", function, ENTRY_POINT)));
    }
}

#[test]
fn test_unregistered_handler_fails_before_first_event() {
    let dir = TempDir::new().unwrap();
    let registry = standard_registry(&full_config(), buckets(&dir), dir.path()).unwrap();

    // without AQ_FUNCTION the image's default command has no target
    let err = match registry.resolve(&DEFAULT_HANDLER.parse().unwrap()) {
        Err(e) => e,
        Ok(_) => panic!("default handler should not resolve"),
    };
    match err {
        AppError::HandlerNotFound { handler, registered } => {
            assert_eq!(handler, DEFAULT_HANDLER);
            assert!(registered.contains("login.lambda_handler"));
        }
        other => panic!("unexpected error {}", other),
    }
}

#[test]
fn test_default_command_serves_selected_function() {
    let dir = TempDir::new().unwrap();
    let config = LambdaConfig {
        function: Some("login".to_string()),
        ..full_config()
    };
    let registry = standard_registry(&config, buckets(&dir), dir.path()).unwrap();

    let id = resolve_handler_id(vec![DEFAULT_HANDLER.to_string()], None).unwrap();
    assert!(registry.resolve(&id).is_ok());
}

#[test]
fn test_missing_models_config_surfaces_on_resolve() {
    let dir = TempDir::new().unwrap();
    let registry = standard_registry(&full_config(), buckets(&dir), dir.path()).unwrap();
    let result = registry.resolve(&"return_predictions_on_demand.lambda_handler".parse().unwrap());
    assert!(matches!(result, Err(AppError::ConfigError { .. })));
}

#[tokio::test]
async fn test_one_event_one_call() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut registry = HandlerRegistry::new();
    registry.register_handler(
        "counter.lambda_handler".parse().unwrap(),
        handler_fn(move |event: Value, ctx: InvocationContext| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "request": ctx.request_id, "echo": event }))
            }
        }),
    );

    let handler = registry.resolve(&"counter.lambda_handler".parse().unwrap()).unwrap();
    for n in 0..3 {
        let ctx = InvocationContext {
            request_id: format!("req-{}", n),
            ..Default::default()
        };
        let out = handler.call(json!({ "n": n }), ctx).await.unwrap();
        assert_eq!(out["echo"]["n"], n);
        assert_eq!(calls.load(Ordering::SeqCst), n + 1);
    }
}
