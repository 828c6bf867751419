use crate::utils::error::Result;
use serde::Deserialize;

/// Object storage scoped to a single bucket (or directory).
pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn exists(&self, path: &str) -> impl std::future::Future<Output = Result<bool>> + Send;
    /// Keys strictly greater than `start_after`, in lexicographic order.
    fn list_after(
        &self,
        start_after: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;
    /// Bucket name or root directory, for log messages.
    fn location(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DriveItem {
    pub id: String,
    pub name: String,
}

/// Read access to the shared folder holding the reference-monitor exports.
pub trait DriveSource: Send + Sync {
    fn list_subfolders(
        &self,
        parent_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<DriveItem>>> + Send;
    /// Most recently created plain-text file whose name contains `name_contains`.
    fn latest_file(
        &self,
        folder_id: &str,
        name_contains: &str,
    ) -> impl std::future::Future<Output = Result<Option<DriveItem>>> + Send;
    fn download(&self, file_id: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
}
