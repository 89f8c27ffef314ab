//! Durable archive of answer videos in S3 / MinIO.

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object {0} not found")]
    NotFound(String),

    #[error("S3 error: {0}")]
    S3(String),
}

pub struct StoredVideo {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Clone)]
pub struct VideoArchive {
    client: S3Client,
    bucket: String,
}

/// `answers/<job>/<candidate>/<index>-<uuid>.<ext>`
pub fn answer_key(job_id: Uuid, candidate_id: Uuid, question_index: usize, extension: &str) -> String {
    format!(
        "answers/{job_id}/{candidate_id}/{question_index}-{}.{extension}",
        Uuid::new_v4()
    )
}

/// Content type for an answer video by file extension.
pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        _ => "video/mp4",
    }
}

impl VideoArchive {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::S3(format!("upload of {key} failed: {e}")))?;
        info!("Archived answer video to s3://{}/{}", self.bucket, key);
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<StoredVideo, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::S3(format!("download of {key} failed: {e}"))
                }
            })?;

        let content_type = output
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "video/mp4".to_string());
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(format!("reading {key} failed: {e}")))?
            .into_bytes();

        Ok(StoredVideo {
            bytes,
            content_type,
        })
    }

    /// Best effort; failures are logged, not returned.
    pub async fn delete(&self, key: &str) {
        if let Err(e) = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            warn!("Failed to delete s3://{}/{}: {e}", self.bucket, key);
        }
    }
}
