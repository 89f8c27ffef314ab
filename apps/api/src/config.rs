use std::path::PathBuf;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup aborts if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub scorer_model_path: PathBuf,
    pub embedding_model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub transcription_url: String,
    pub transcription_api_key: Option<String>,
    pub transcription_model: String,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub upload_dir: PathBuf,
    pub frame_samples: usize,
    pub max_concurrent_scoring: usize,
    /// Keep archived videos of failed answer sets for debugging.
    pub retain_failed_uploads: bool,
    /// Request body cap for the video upload routes.
    pub max_upload_bytes: usize,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &str| {
            lookup(key).with_context(|| format!("Required environment variable '{key}' is not set"))
        };
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let frame_samples = or_default("FRAME_SAMPLES", "6")
            .parse::<usize>()
            .context("FRAME_SAMPLES must be a positive integer")?;
        if frame_samples < 2 {
            anyhow::bail!("FRAME_SAMPLES must be at least 2, got {frame_samples}");
        }

        let max_concurrent_scoring = or_default("MAX_CONCURRENT_SCORING", "2")
            .parse::<usize>()
            .context("MAX_CONCURRENT_SCORING must be a positive integer")?;
        if max_concurrent_scoring == 0 {
            anyhow::bail!("MAX_CONCURRENT_SCORING must be at least 1");
        }

        let max_upload_bytes = or_default("MAX_UPLOAD_BYTES", "524288000")
            .parse::<usize>()
            .context("MAX_UPLOAD_BYTES must be a positive integer")?;
        if max_upload_bytes == 0 {
            anyhow::bail!("MAX_UPLOAD_BYTES must be at least 1");
        }

        Ok(Config {
            database_url: require("DATABASE_URL")?,
            s3_bucket: require("S3_BUCKET")?,
            s3_endpoint: require("S3_ENDPOINT")?,
            aws_access_key_id: require("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require("AWS_SECRET_ACCESS_KEY")?,
            scorer_model_path: require("SCORER_MODEL_PATH")?.into(),
            embedding_model_path: require("EMBEDDING_MODEL_PATH")?.into(),
            tokenizer_path: require("TOKENIZER_PATH")?.into(),
            transcription_url: require("TRANSCRIPTION_URL")?,
            transcription_api_key: lookup("TRANSCRIPTION_API_KEY").filter(|k| !k.is_empty()),
            transcription_model: or_default("TRANSCRIPTION_MODEL", "base.en"),
            ffmpeg_path: or_default("FFMPEG_PATH", "ffmpeg").into(),
            ffprobe_path: or_default("FFPROBE_PATH", "ffprobe").into(),
            upload_dir: or_default("UPLOAD_DIR", "uploads").into(),
            frame_samples,
            max_concurrent_scoring,
            retain_failed_uploads: matches!(
                or_default("RETAIN_FAILED_UPLOADS", "false").to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            ),
            max_upload_bytes,
            port: or_default("PORT", "8080")
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: or_default("RUST_LOG", "info"),
        })
    }
}
