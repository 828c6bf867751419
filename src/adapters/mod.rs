// Adapters layer: concrete implementations for external systems (storage, http, drive).

pub mod drive;
pub mod qhawax;
pub mod s3;
pub mod storage;

pub use drive::GoogleDrive;
pub use qhawax::QhawaxClient;
#[cfg(feature = "lambda")]
pub use s3::S3Storage;
pub use storage::LocalStorage;
