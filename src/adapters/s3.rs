#[cfg(feature = "lambda")]
use crate::domain::ports::Storage;
#[cfg(feature = "lambda")]
use crate::utils::error::{AppError, Result};
#[cfg(feature = "lambda")]
use aws_sdk_s3::operation::get_object::GetObjectError;
#[cfg(feature = "lambda")]
use aws_sdk_s3::operation::head_object::HeadObjectError;
#[cfg(feature = "lambda")]
use aws_sdk_s3::Client as S3Client;

#[cfg(feature = "lambda")]
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

#[cfg(feature = "lambda")]
impl S3Storage {
    pub fn new(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Client built from the default AWS credential chain for `region`.
    pub async fn client_for_region(region: &str) -> S3Client {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let config = aws_sdk_s3::config::Builder::from(&config)
            .region(aws_sdk_s3::config::Region::new(region.to_string()))
            .build();
        S3Client::from_conf(config)
    }
}

#[cfg(feature = "lambda")]
impl Storage for S3Storage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                return Err(match err.into_service_error() {
                    GetObjectError::NoSuchKey(_) => AppError::ObjectNotFound {
                        key: path.to_string(),
                    },
                    other => AppError::storage(format!(
                        "Failed to read s3://{}/{}: {}",
                        self.bucket, path, other
                    )),
                });
            }
        };

        let data = resp.body.collect().await.map_err(|e| {
            AppError::storage(format!(
                "Failed to collect s3://{}/{}: {}",
                self.bucket, path, e
            ))
        })?;

        Ok(data.into_bytes().to_vec())
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(data.to_vec().into())
            .send()
            .await
            .map_err(|e| {
                AppError::storage(format!(
                    "Failed to write s3://{}/{}: {}",
                    self.bucket,
                    path,
                    e.into_service_error()
                ))
            })?;

        tracing::info!(
            "File {} successfully uploaded to S3 bucket {}",
            path,
            self.bucket
        );
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => match err.into_service_error() {
                HeadObjectError::NotFound(_) => Ok(false),
                other => Err(AppError::storage(format!(
                    "Failed to check s3://{}/{}: {}",
                    self.bucket, path, other
                ))),
            },
        }
    }

    async fn list_after(&self, start_after: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .start_after(start_after);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }

            let resp = request.send().await.map_err(|e| {
                AppError::storage(format!(
                    "Failed to list s3://{}: {}",
                    self.bucket,
                    e.into_service_error()
                ))
            })?;

            keys.extend(
                resp.contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string)),
            );

            match (resp.is_truncated(), resp.next_continuation_token()) {
                (Some(true), Some(token)) => continuation = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(keys)
    }

    fn location(&self) -> &str {
        &self.bucket
    }
}
