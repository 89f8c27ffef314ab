//! Answer scoring pipeline: one answer video in, one trait vector out.
//!
//! Stages run strictly in order, `Received → Validating → Extracting → Scoring
//! → Scored`, and the first failure aborts the run. There is no retry here;
//! the frame sampler's neighbour search and the transcriber's transport retry
//! are the only retries below this layer.
//!
//! Decoding and inference block, so they run on tokio's blocking pool. The
//! number of answers scored at once is bounded by a semaphore shared by every
//! caller of the pipeline.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::inference::transcriber::TranscriptionError;
use crate::inference::{InferenceContext, ModelError};
use crate::media::{validator, MediaError, VideoLocator};
use crate::personality::TraitVector;

// ────────────────────────────────────────────────────────────────────────────
// Types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStage {
    Received,
    Validating,
    Extracting,
    Scoring,
    Scored,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("transcription failed: {0}")]
    Transcription(#[from] TranscriptionError),

    #[error("text embedding failed: {0}")]
    Embedding(#[source] ModelError),

    #[error("trait scoring failed: {0}")]
    Scoring(#[source] ModelError),

    #[error("pipeline worker failed: {0}")]
    Worker(String),
}

/// A failed pipeline run, tagged with the question it belongs to and the stage
/// that failed.
#[derive(Debug, Error)]
#[error("answer {question_index} failed while {stage:?}: {error}")]
pub struct AnswerFailure {
    pub question_index: usize,
    pub stage: AnswerStage,
    #[source]
    pub error: PipelineError,
}

impl AnswerFailure {
    /// True when the candidate should re-upload; false for system faults.
    pub fn is_media_fault(&self) -> bool {
        matches!(self.error, PipelineError::Media(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredAnswer {
    pub question_index: usize,
    pub video: VideoLocator,
    pub traits: TraitVector,
}

// ────────────────────────────────────────────────────────────────────────────
// Pipeline
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AnswerScoringPipeline {
    ctx: Arc<InferenceContext>,
    permits: Arc<Semaphore>,
}

impl AnswerScoringPipeline {
    pub fn new(ctx: Arc<InferenceContext>, max_concurrent: usize) -> Self {
        Self {
            ctx,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Scores one answer video. The video file is never touched after
    /// scoring; cleanup is the caller's decision.
    pub async fn score_answer(
        &self,
        question_index: usize,
        video: &VideoLocator,
    ) -> Result<ScoredAnswer, AnswerFailure> {
        let fail = |stage: AnswerStage, error: PipelineError| {
            warn!("answer {question_index}: failed while {stage:?}: {error}");
            AnswerFailure {
                question_index,
                stage,
                error,
            }
        };

        let advance = |from: AnswerStage, to: AnswerStage| {
            debug!("answer {question_index}: {from:?} -> {to:?}");
        };

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| fail(AnswerStage::Received, PipelineError::Worker(e.to_string())))?;
        debug!("answer {question_index}: Received {}", video.path.display());

        // ── Validating ──────────────────────────────────────────────────────
        advance(AnswerStage::Received, AnswerStage::Validating);
        let ctx = self.ctx.clone();
        let path = video.path.clone();
        let (mut stream, meta) = tokio::task::spawn_blocking(move || {
            validator::validate(ctx.decoder.as_ref(), &path)
        })
        .await
        .map_err(|e| fail(AnswerStage::Validating, PipelineError::Worker(e.to_string())))?
        .map_err(|e| fail(AnswerStage::Validating, e.into()))?;

        // ── Extracting ──────────────────────────────────────────────────────
        // Transcription runs concurrently with audio and frame extraction. The
        // first failure on either side ends the stage without waiting for the
        // other.
        advance(AnswerStage::Validating, AnswerStage::Extracting);
        let ctx = self.ctx.clone();
        let media_task = tokio::task::spawn_blocking(move || {
            let audio = ctx.audio.extract(stream.as_mut())?;
            let frames = ctx.sampler.sample(stream.as_mut(), &meta)?;
            Ok::<_, MediaError>((audio, ctx.normalizer.stack(&frames)))
        });
        let media_features = async {
            media_task
                .await
                .map_err(|e| fail(AnswerStage::Extracting, PipelineError::Worker(e.to_string())))?
                .map_err(|e| fail(AnswerStage::Extracting, e.into()))
        };
        let transcript = async {
            self.ctx
                .transcriber
                .transcribe(&video.path)
                .await
                .map_err(|e| fail(AnswerStage::Extracting, e.into()))
        };
        let ((audio, frames), transcript) = tokio::try_join!(media_features, transcript)?;
        debug!(
            "answer {question_index}: transcript has {} chars",
            transcript.len()
        );

        let ctx = self.ctx.clone();
        let text = tokio::task::spawn_blocking(move || ctx.embedder.embed(&transcript))
            .await
            .map_err(|e| fail(AnswerStage::Extracting, PipelineError::Worker(e.to_string())))?
            .map_err(|e| fail(AnswerStage::Extracting, PipelineError::Embedding(e)))?;

        // ── Scoring ─────────────────────────────────────────────────────────
        advance(AnswerStage::Extracting, AnswerStage::Scoring);
        let ctx = self.ctx.clone();
        let traits = tokio::task::spawn_blocking(move || ctx.scorer.score(&audio, &frames, &text))
            .await
            .map_err(|e| fail(AnswerStage::Scoring, PipelineError::Worker(e.to_string())))?
            .map_err(|e| fail(AnswerStage::Scoring, PipelineError::Scoring(e)))?;

        advance(AnswerStage::Scoring, AnswerStage::Scored);
        info!("answer {question_index}: Scored {:?}", traits);
        Ok(ScoredAnswer {
            question_index,
            video: video.clone(),
            traits,
        })
    }

    /// Scores a whole answer set concurrently. Results come back ordered by
    /// question index; on failure the lowest failing question index is
    /// reported.
    pub async fn score_answers(
        &self,
        answers: &[(usize, VideoLocator)],
    ) -> Result<Vec<ScoredAnswer>, AnswerFailure> {
        let runs = answers
            .iter()
            .map(|(index, video)| self.score_answer(*index, video));
        let results = join_all(runs).await;

        let mut scored = Vec::with_capacity(results.len());
        let mut first_failure: Option<AnswerFailure> = None;
        for result in results {
            match result {
                Ok(answer) => scored.push(answer),
                Err(failure) => {
                    let lower = first_failure
                        .as_ref()
                        .map_or(true, |f| failure.question_index < f.question_index);
                    if lower {
                        first_failure = Some(failure);
                    }
                }
            }
        }
        if let Some(failure) = first_failure {
            return Err(failure);
        }

        scored.sort_by_key(|a| a.question_index);
        Ok(scored)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::features::frames::FrameSampler;
    use crate::inference::embedder::tests::CountingEmbeddingModel;
    use crate::inference::embedder::TextEmbedder;
    use crate::inference::scorer::tests::FixedTraitModel;
    use crate::inference::scorer::TraitScorer;
    use crate::inference::transcriber::tests::ScriptedTranscriber;
    use crate::media::synthetic::{DecoderCalls, SyntheticDecoder, SyntheticVideo};
    use std::time::{Duration, Instant};
    use crate::personality::Trait;
    use std::io::Write;
    use std::sync::atomic::Ordering;

    pub(crate) struct Harness {
        pub pipeline: AnswerScoringPipeline,
        pub decoder_calls: Arc<DecoderCalls>,
        pub transcriber: Arc<ScriptedTranscriber>,
        pub embedding: Arc<CountingEmbeddingModel>,
        pub model: Arc<FixedTraitModel>,
    }

    pub(crate) fn harness(video: SyntheticVideo, transcript: Option<&str>, outputs: Vec<f32>) -> Harness {
        harness_with(video, ScriptedTranscriber::new(transcript), outputs)
    }

    pub(crate) fn harness_with(
        video: SyntheticVideo,
        transcriber: ScriptedTranscriber,
        outputs: Vec<f32>,
    ) -> Harness {
        let decoder = SyntheticDecoder::new(video);
        let decoder_calls = decoder.calls.clone();
        let transcriber = Arc::new(transcriber);
        let embedding = Arc::new(CountingEmbeddingModel::new(0.25));
        let model = Arc::new(FixedTraitModel::new(outputs));
        let ctx = InferenceContext::new(
            Arc::new(decoder),
            transcriber.clone(),
            TextEmbedder::new(embedding.clone()),
            TraitScorer::new(model.clone(), 6),
            FrameSampler::default(),
        );
        Harness {
            pipeline: AnswerScoringPipeline::new(Arc::new(ctx), 2),
            decoder_calls,
            transcriber,
            embedding,
            model,
        }
    }

    pub(crate) fn answer_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
        f.write_all(b"synthetic answer video").unwrap();
        f
    }

    #[tokio::test]
    async fn test_scores_valid_answer() {
        let h = harness(
            SyntheticVideo::new(150, 30.0),
            Some("I like working with people."),
            vec![0.1, 0.2, 0.3, 0.4, 0.5],
        );
        let file = answer_file();
        let locator = VideoLocator::new(file.path(), "answers/j/c/0.mp4");

        let scored = h.pipeline.score_answer(0, &locator).await.unwrap();
        assert_eq!(scored.question_index, 0);
        assert_eq!(scored.video, locator);
        assert!((scored.traits.get(Trait::Openness) - 0.5).abs() < 1e-6);
        assert_eq!(h.embedding.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 1);
        assert!(file.path().exists());
    }

    #[tokio::test]
    async fn test_empty_transcript_skips_embedding_model() {
        let h = harness(SyntheticVideo::new(150, 30.0), Some(""), vec![0.0; 5]);
        let file = answer_file();
        let locator = VideoLocator::new(file.path(), "k");
        h.pipeline.score_answer(0, &locator).await.unwrap();
        assert_eq!(h.embedding.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_file_fails_validation_before_extraction() {
        let h = harness(SyntheticVideo::new(150, 30.0), Some("hello"), vec![0.0; 5]);
        let locator = VideoLocator::new("/nonexistent/answer.mp4", "k");
        let failure = h.pipeline.score_answer(3, &locator).await.unwrap_err();
        assert_eq!(failure.question_index, 3);
        assert_eq!(failure.stage, AnswerStage::Validating);
        assert!(failure.is_media_fault());
        assert!(matches!(
            failure.error,
            PipelineError::Media(MediaError::InvalidMedia(_))
        ));
        assert_eq!(h.transcriber.calls(), 0);
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_short_video_is_insufficient_frames() {
        let h = harness(SyntheticVideo::new(5, 25.0), Some("hello"), vec![0.0; 5]);
        let file = answer_file();
        let failure = h
            .pipeline
            .score_answer(1, &VideoLocator::new(file.path(), "k"))
            .await
            .unwrap_err();
        assert_eq!(failure.stage, AnswerStage::Extracting);
        assert!(failure.is_media_fault());
        assert!(matches!(
            failure.error,
            PipelineError::Media(MediaError::InsufficientFrames { required: 6, available: 5 })
        ));
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_media_failure_does_not_wait_for_transcription() {
        let h = harness_with(
            SyntheticVideo::new(5, 25.0),
            ScriptedTranscriber::new(Some("hello")).with_delay(Duration::from_secs(30)),
            vec![0.0; 5],
        );
        let file = answer_file();
        let started = Instant::now();
        let failure = h
            .pipeline
            .score_answer(0, &VideoLocator::new(file.path(), "k"))
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(failure.stage, AnswerStage::Extracting);
        assert!(matches!(
            failure.error,
            PipelineError::Media(MediaError::InsufficientFrames { .. })
        ));
    }

    #[tokio::test]
    async fn test_minute_long_answer_reads_audio_once() {
        let h = harness(
            SyntheticVideo::new(150, 30.0).with_audio_secs(60.0),
            Some("A longer story about a product launch."),
            vec![0.2; 5],
        );
        let file = answer_file();
        let scored = h
            .pipeline
            .score_answer(0, &VideoLocator::new(file.path(), "k"))
            .await
            .unwrap();
        assert!((scored.traits.get(Trait::Extraversion) - 0.2).abs() < 1e-6);
        assert_eq!(h.decoder_calls.pcm_reads(), 1);
        assert_eq!(h.decoder_calls.frame_reads(), 6);
    }

    #[tokio::test]
    async fn test_transcription_failure_is_system_fault() {
        let h = harness(SyntheticVideo::new(150, 30.0), None, vec![0.0; 5]);
        let file = answer_file();
        let failure = h
            .pipeline
            .score_answer(0, &VideoLocator::new(file.path(), "k"))
            .await
            .unwrap_err();
        assert_eq!(failure.stage, AnswerStage::Extracting);
        assert!(!failure.is_media_fault());
        assert!(matches!(failure.error, PipelineError::Transcription(_)));
    }

    #[tokio::test]
    async fn test_bad_model_output_fails_scoring() {
        let h = harness(SyntheticVideo::new(150, 30.0), Some("hi"), vec![0.0; 3]);
        let file = answer_file();
        let failure = h
            .pipeline
            .score_answer(0, &VideoLocator::new(file.path(), "k"))
            .await
            .unwrap_err();
        assert_eq!(failure.stage, AnswerStage::Scoring);
        assert!(matches!(failure.error, PipelineError::Scoring(ModelError::Output(_))));
    }

    #[tokio::test]
    async fn test_score_answers_orders_by_question_index() {
        let h = harness(SyntheticVideo::new(150, 30.0), Some("hi"), vec![0.0; 5]);
        let (a, b, c) = (answer_file(), answer_file(), answer_file());
        let answers = vec![
            (2, VideoLocator::new(a.path(), "a")),
            (0, VideoLocator::new(b.path(), "b")),
            (1, VideoLocator::new(c.path(), "c")),
        ];
        let scored = h.pipeline.score_answers(&answers).await.unwrap();
        let order: Vec<usize> = scored.iter().map(|s| s.question_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(scored[0].video.archive_key, "b");
    }

    #[tokio::test]
    async fn test_score_answers_reports_lowest_failing_index() {
        let h = harness(SyntheticVideo::new(150, 30.0), Some("hi"), vec![0.0; 5]);
        let ok = answer_file();
        let answers = vec![
            (0, VideoLocator::new(ok.path(), "ok")),
            (2, VideoLocator::new("/nonexistent/2.mp4", "x")),
            (1, VideoLocator::new("/nonexistent/1.mp4", "y")),
        ];
        let failure = h.pipeline.score_answers(&answers).await.unwrap_err();
        assert_eq!(failure.question_index, 1);
    }
}
