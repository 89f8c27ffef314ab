use crate::applications::service::ApplicationService;
use crate::config::Config;
use crate::pipeline::AnswerScoringPipeline;
use crate::storage::VideoArchive;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Answer scoring. Holds the loaded models and the concurrency limit.
    pub pipeline: AnswerScoringPipeline,
    pub applications: ApplicationService,
    pub archive: VideoArchive,
}
