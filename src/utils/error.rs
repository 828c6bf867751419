use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Token error: {0}")]
    TokenError(#[from] jsonwebtoken::errors::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value for {field} ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Handler '{handler}' not found; registered handlers: {registered}")]
    HandlerNotFound { handler: String, registered: String },

    #[error("Invalid handler identifier '{value}': {reason}")]
    InvalidHandlerId { value: String, reason: String },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Object not found: {key}")]
    ObjectNotFound { key: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Model error: {message}")]
    ModelError { message: String },

    #[error("qhawax_id {station} not found in the models configuration file.")]
    ModelNotFound { station: String },

    #[error("Model file {file} for qhawax_id {station} not found at {path}")]
    ArtifactMissing {
        station: String,
        file: String,
        path: String,
    },

    #[error("Upstream request failed with status {status}: {url}")]
    UpstreamStatus { status: u16, url: String },
}

impl AppError {
    pub fn processing(message: impl Into<String>) -> Self {
        AppError::ProcessingError {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppError::ValidationError {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        AppError::StorageError {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
