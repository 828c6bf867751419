//! Google Drive v3 access with service-account credentials.

use crate::domain::ports::{DriveItem, DriveSource};
use crate::utils::error::{AppError, Result};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com";
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveItem>,
}

enum Credentials {
    Static(String),
    ServiceAccount {
        key: ServiceAccountKey,
        signing_key: EncodingKey,
    },
}

pub struct GoogleDrive {
    client: Client,
    api_base: String,
    credentials: Credentials,
    cached_token: Mutex<Option<(String, Instant)>>,
}

impl std::fmt::Debug for GoogleDrive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleDrive")
            .field("api_base", &self.api_base)
            .field("credentials", &"[hidden]")
            .finish()
    }
}

impl GoogleDrive {
    pub fn from_service_account_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| AppError::ConfigError {
            message: format!(
                "Failed to read Google credentials {}: {}",
                path.as_ref().display(),
                e
            ),
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&content)?;
        Self::from_service_account(key)
    }

    pub fn from_service_account(key: ServiceAccountKey) -> Result<Self> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
        Ok(Self {
            client: Client::new(),
            api_base: DRIVE_API_BASE.to_string(),
            credentials: Credentials::ServiceAccount { key, signing_key },
            cached_token: Mutex::new(None),
        })
    }

    /// Uses a fixed bearer token; for local runs and tests.
    pub fn with_static_token(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            credentials: Credentials::Static(token.into()),
            cached_token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String> {
        let (key, signing_key) = match &self.credentials {
            Credentials::Static(token) => return Ok(token.clone()),
            Credentials::ServiceAccount { key, signing_key } => (key, signing_key),
        };

        let mut cached = self.cached_token.lock().await;
        if let Some((token, expires_at)) = cached.as_ref() {
            if Instant::now() < *expires_at {
                return Ok(token.clone());
            }
        }

        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &key.client_email,
            scope: DRIVE_SCOPE,
            aud: &key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, signing_key)?;

        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", JWT_BEARER_GRANT)
            .append_pair("assertion", &assertion)
            .finish();

        let response = self
            .client
            .post(&key.token_uri)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::UpstreamStatus {
                status: response.status().as_u16(),
                url: key.token_uri.clone(),
            });
        }
        let token: TokenResponse = response.json().await?;

        // 提前一分鐘過期，避免邊界情況
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600).saturating_sub(60));
        *cached = Some((token.access_token.clone(), Instant::now() + lifetime));
        Ok(token.access_token)
    }

    async fn list_files(&self, query: &str, extra: &[(&str, &str)]) -> Result<Vec<DriveItem>> {
        let token = self.access_token().await?;
        let url = format!("{}/drive/v3/files", self.api_base);
        let mut params: Vec<(&str, &str)> = vec![("q", query), ("fields", "files(id, name)")];
        params.extend_from_slice(extra);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&params)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::UpstreamStatus {
                status: response.status().as_u16(),
                url,
            });
        }
        let list: FileList = response.json().await?;
        Ok(list.files)
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

impl DriveSource for GoogleDrive {
    async fn list_subfolders(&self, parent_id: &str) -> Result<Vec<DriveItem>> {
        let query = format!(
            "'{}' in parents and mimeType='{}'",
            quote(parent_id),
            FOLDER_MIME_TYPE
        );
        self.list_files(&query, &[]).await
    }

    async fn latest_file(&self, folder_id: &str, name_contains: &str) -> Result<Option<DriveItem>> {
        let query = format!(
            "'{}' in parents and mimeType='text/plain' and name contains '{}'",
            quote(folder_id),
            quote(name_contains)
        );
        let files = self
            .list_files(&query, &[("orderBy", "createdTime desc"), ("pageSize", "1")])
            .await?;
        Ok(files.into_iter().next())
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let token = self.access_token().await?;
        let url = format!("{}/drive/v3/files/{}", self.api_base, file_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[("alt", "media")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::UpstreamStatus {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_list_subfolders_queries_parent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/drive/v3/files")
                .query_param(
                    "q",
                    "'root-folder' in parents and mimeType='application/vnd.google-apps.folder'",
                )
                .header("Authorization", "Bearer test-token");
            then.status(200).json_body(serde_json::json!({
                "files": [{"id": "f1", "name": "PUCP_030125_120000"}]
            }));
        });

        let drive = GoogleDrive::with_static_token(server.base_url(), "test-token");
        let folders = drive.list_subfolders("root-folder").await.unwrap();

        mock.assert();
        assert_eq!(folders[0].name, "PUCP_030125_120000");
    }

    #[tokio::test]
    async fn test_latest_file_takes_first_result() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/drive/v3/files")
                .query_param("orderBy", "createdTime desc")
                .query_param("pageSize", "1");
            then.status(200).json_body(serde_json::json!({
                "files": [{"id": "file-1", "name": "PUCP_export.txt"}]
            }));
        });

        let drive = GoogleDrive::with_static_token(server.base_url(), "t");
        let file = drive.latest_file("sub", "PUCP").await.unwrap();
        assert_eq!(file.unwrap().id, "file-1");
    }

    #[tokio::test]
    async fn test_download_reports_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/drive/v3/files/file-1");
            then.status(503);
        });

        let drive = GoogleDrive::with_static_token(server.base_url(), "t");
        assert!(matches!(
            drive.download("file-1").await,
            Err(AppError::UpstreamStatus { status: 503, .. })
        ));
    }
}
