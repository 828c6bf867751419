#[cfg(feature = "cli")]
pub mod cli;
pub mod lambda;
pub mod models;

#[cfg(feature = "cli")]
pub use cli::CliConfig;
pub use lambda::LambdaConfig;
pub use models::ModelsConfig;
