//! Process-wide inference context.
//!
//! Models are loaded exactly once at startup and shared read-only by every
//! pipeline run through `Arc<InferenceContext>`. Tests build the context from
//! mocks via `InferenceContext::new`.

pub mod embedder;
pub mod scorer;
pub mod transcriber;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use ort::session::Session;
use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::features::audio::AudioFeatureExtractor;
use crate::features::frames::FrameSampler;
use crate::features::image::ImageNormalizer;
use crate::media::ffmpeg::FfmpegDecoder;
use crate::media::MediaDecoder;

use self::embedder::{BertOnnxEmbedder, TextEmbedder};
use self::scorer::{OnnxTraitModel, TraitScorer};
use self::transcriber::{SpeechTranscriber, WhisperHttpTranscriber};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model load failed: {0}")]
    Load(String),

    #[error("invalid model input: {0}")]
    Input(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("unexpected model output: {0}")]
    Output(String),
}

/// Opens an ONNX Runtime session with one intra-op thread; parallelism comes
/// from running several answers at once, not from wide sessions.
pub(crate) fn onnx_session(path: &Path) -> Result<Session, ModelError> {
    if !path.exists() {
        return Err(ModelError::Load(format!("model not found: {}", path.display())));
    }
    Session::builder()
        .and_then(|b| b.with_intra_threads(1))
        .and_then(|b| b.commit_from_file(path))
        .map_err(|e| ModelError::Load(format!("{}: {e}", path.display())))
}

pub struct InferenceContext {
    pub decoder: Arc<dyn MediaDecoder>,
    pub transcriber: Arc<dyn SpeechTranscriber>,
    pub embedder: TextEmbedder,
    pub scorer: TraitScorer,
    pub audio: AudioFeatureExtractor,
    pub sampler: FrameSampler,
    pub normalizer: ImageNormalizer,
}

impl InferenceContext {
    pub fn new(
        decoder: Arc<dyn MediaDecoder>,
        transcriber: Arc<dyn SpeechTranscriber>,
        embedder: TextEmbedder,
        scorer: TraitScorer,
        sampler: FrameSampler,
    ) -> Self {
        Self {
            decoder,
            transcriber,
            embedder,
            scorer,
            audio: AudioFeatureExtractor::new(),
            sampler,
            normalizer: ImageNormalizer,
        }
    }

    /// Loads every model named in the configuration.
    pub fn load(config: &Config) -> Result<Self> {
        let sampler = FrameSampler::new(config.frame_samples)
            .context("FRAME_SAMPLES must be at least 2")?;

        let decoder = Arc::new(FfmpegDecoder::new(&config.ffmpeg_path, &config.ffprobe_path));

        let transcriber = WhisperHttpTranscriber::new(
            config.transcription_url.clone(),
            config.transcription_api_key.clone(),
            config.transcription_model.clone(),
        )
        .context("Failed to build transcription client")?;
        info!(
            "Transcriber configured ({} via {})",
            transcriber.model(),
            config.transcription_url
        );

        let bert = BertOnnxEmbedder::load(&config.embedding_model_path, &config.tokenizer_path)
            .context("Failed to load text embedding model")?;
        info!("Text embedder loaded from {}", config.embedding_model_path.display());

        let trait_model = OnnxTraitModel::load(&config.scorer_model_path)
            .context("Failed to load trait model")?;
        info!("Trait model loaded from {}", config.scorer_model_path.display());

        Ok(Self::new(
            decoder,
            Arc::new(transcriber),
            TextEmbedder::new(Arc::new(bert)),
            TraitScorer::new(Arc::new(trait_model), sampler.samples()),
            sampler,
        ))
    }
}
