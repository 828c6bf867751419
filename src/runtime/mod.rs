//! Runtime bootstrap: resolves the handler identifier the container was
//! started with and feeds it one platform event at a time.

pub mod handler_id;
pub mod registry;

pub use handler_id::HandlerId;
pub use registry::HandlerRegistry;

use crate::utils::error::{AppError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Identifier the image's default command passes to the bootstrap.
pub const DEFAULT_HANDLER: &str = "lambda_function.lambda_handler";

/// Per-invocation metadata handed to handlers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationContext {
    pub request_id: String,
    /// Deadline in milliseconds since the Unix epoch.
    pub deadline_ms: u64,
    pub invoked_function_arn: String,
}

#[cfg(feature = "lambda")]
impl From<&lambda_runtime::Context> for InvocationContext {
    fn from(ctx: &lambda_runtime::Context) -> Self {
        Self {
            request_id: ctx.request_id.clone(),
            deadline_ms: ctx.deadline,
            invoked_function_arn: ctx.invoked_function_arn.clone(),
        }
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, event: Value, ctx: InvocationContext) -> Result<Value>;
}

pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value, InvocationContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn call(&self, event: Value, ctx: InvocationContext) -> Result<Value> {
        (self.0)(event, ctx).await
    }
}

/// Wraps a closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Value, InvocationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// The first process argument, falling back to `_HANDLER` as set by the platform.
pub fn resolve_handler_id<I>(args: I, env_handler: Option<String>) -> Result<HandlerId>
where
    I: IntoIterator<Item = String>,
{
    let raw = args
        .into_iter()
        .find(|a| !a.trim().is_empty())
        .or(env_handler.filter(|h| !h.trim().is_empty()))
        .ok_or_else(|| AppError::MissingConfigError {
            field: "_HANDLER".to_string(),
        })?;
    raw.parse()
}

/// Serves invocations until the platform shuts the environment down.
/// Handler errors are reported back through the runtime API.
#[cfg(feature = "lambda")]
pub async fn run(handler: Arc<dyn Handler>) -> std::result::Result<(), lambda_runtime::Error> {
    use lambda_runtime::{service_fn, LambdaEvent};

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let handler = handler.clone();
        async move {
            let ctx = InvocationContext::from(&event.context);
            tracing::debug!("Invocation {} received", ctx.request_id);
            handler
                .call(event.payload, ctx)
                .await
                .map_err(lambda_runtime::Error::from)
        }
    }))
    .await
}
