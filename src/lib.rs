pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod image;
pub mod runtime;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

#[cfg(feature = "lambda")]
pub use adapters::S3Storage;

pub use adapters::LocalStorage;
pub use app::{standard_registry, Buckets};
pub use config::LambdaConfig;
pub use image::ImageSpec;
pub use runtime::{Handler, HandlerId, HandlerRegistry};
pub use utils::error::{AppError, Result};
