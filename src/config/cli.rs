use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "air-quality")]
#[command(about = "Local tooling for the air-quality Lambda functions")]
pub struct CliConfig {
    #[arg(long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List the registered handler identifiers
    Handlers,

    /// Run one invocation locally against filesystem-backed buckets
    Invoke {
        /// Handler identifier, e.g. login.lambda_handler
        handler: String,

        /// JSON event file; `{}` when omitted
        #[arg(long)]
        event: Option<PathBuf>,

        /// Directory holding one sub-directory per bucket
        #[arg(long, default_value = "./buckets")]
        storage_dir: PathBuf,

        /// Directory holding models/ (the image working directory)
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,
    },

    /// Print the rendered Dockerfile
    Dockerfile,

    /// Check the layer order and entrypoint of a Dockerfile
    CheckDockerfile {
        #[arg(default_value = "Dockerfile")]
        path: PathBuf,
    },

    /// Report the first image layer a rebuild has to start from
    Plan {
        /// Fingerprints of the previous build (JSON)
        #[arg(long)]
        previous: PathBuf,

        /// Build context root
        #[arg(long, default_value = ".")]
        context: PathBuf,

        /// Overwrite the fingerprint file with the current digests
        #[arg(long)]
        save: bool,
    },
}
