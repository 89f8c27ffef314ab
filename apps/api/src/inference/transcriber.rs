//! Speech-to-text client.
//!
//! Talks to an OpenAI-compatible `/v1/audio/transcriptions` endpoint serving a
//! Whisper model. Transport errors, 429 and 5xx responses are retried with
//! exponential backoff; anything else fails immediately.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transcription API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("could not read answer audio: {0}")]
    Io(#[from] std::io::Error),

    #[error("transcription failed after {retries} retries")]
    Exhausted { retries: u32 },
}

/// Produces the transcript of an answer video. An empty transcript is a valid
/// result (silence, noise), not an error.
#[async_trait]
pub trait SpeechTranscriber: Send + Sync {
    async fn transcribe(&self, path: &Path) -> Result<String, TranscriptionError>;
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

#[derive(Clone)]
pub struct WhisperHttpTranscriber {
    client: Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl WhisperHttpTranscriber {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, TranscriptionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            api_key,
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn form(&self, file_name: &str, bytes: Vec<u8>) -> Form {
        Form::new()
            .text("model", self.model.clone())
            .text("response_format", "json")
            .part("file", Part::bytes(bytes).file_name(file_name.to_string()))
    }
}

/// 1s, 2s, 4s, ...
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(1000 * (1 << (attempt.saturating_sub(1))))
}

#[async_trait]
impl SpeechTranscriber for WhisperHttpTranscriber {
    async fn transcribe(&self, path: &Path) -> Result<String, TranscriptionError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "answer.mp4".to_string());

        let mut last_error: Option<TranscriptionError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                warn!(
                    "transcription attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(&self.url)
                .multipart(self.form(&file_name, bytes.clone()));
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(TranscriptionError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("transcription API returned {}: {}", status, body);
                last_error = Some(TranscriptionError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TranscriptionError::Api {
                    status: status.as_u16(),
                    message: body,
                });
            }

            let parsed: TranscriptionResponse = response.json().await?;
            let text = parsed.text.trim().to_string();
            debug!(
                "transcribed {} ({} chars, model {})",
                path.display(),
                text.len(),
                self.model
            );
            return Ok(text);
        }

        Err(last_error.unwrap_or(TranscriptionError::Exhausted {
            retries: MAX_RETRIES,
        }))
    }
}
