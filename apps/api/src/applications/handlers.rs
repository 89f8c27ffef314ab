//! Axum route handlers for answer scoring and the Applications API.

use std::path::Path as FsPath;

use anyhow::Context;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{info, warn};
use uuid::Uuid;

use crate::applications::lifecycle::{Decision, RevaluationOutcome};
use crate::applications::store::ApplicationFilter;
use crate::errors::AppError;
use crate::media::VideoLocator;
use crate::models::application::Application;
use crate::models::principal::{Principal, Role};
use crate::personality::TraitVector;
use crate::state::AppState;
use crate::storage::{answer_key, content_type_for};

const DISPLAY_DECIMALS: i32 = 2;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ApplicationResponse {
    #[serde(flatten)]
    pub application: Application,
    pub average_scores_display: TraitVector,
}

impl From<Application> for ApplicationResponse {
    fn from(application: Application) -> Self {
        Self {
            average_scores_display: application.average_scores.rounded(DISPLAY_DECIMALS),
            application,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ScoreResponse {
    pub video_key: String,
    pub traits: TraitVector,
    pub traits_display: TraitVector,
}

#[derive(Debug, Serialize)]
pub struct AggregateResponse {
    pub application_id: Uuid,
    pub average_scores: TraitVector,
    pub average_scores_display: TraitVector,
}

#[derive(Debug, Deserialize)]
pub struct DecideRequest {
    pub status: Decision,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRevaluationRequest {
    pub decision: RevaluationOutcome,
}

// ────────────────────────────────────────────────────────────────────────────
// Upload staging
// ────────────────────────────────────────────────────────────────────────────

/// An uploaded answer: a scratch copy for the decoder, removed on drop, and
/// the archived original.
struct StagedVideo {
    locator: VideoLocator,
    _scratch: NamedTempFile,
}

/// Lower-case alphanumeric extension of an uploaded file name, `mp4` if absent.
fn extension_of(file_name: Option<&str>) -> String {
    file_name
        .and_then(|n| FsPath::new(n).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "mp4".to_string())
}

/// `video_<n>` → n
fn question_index_of(field_name: &str) -> Option<Result<usize, AppError>> {
    let raw = field_name.strip_prefix("video_")?;
    Some(raw.parse::<usize>().map_err(|_| {
        AppError::Validation(format!("'{field_name}' is not a valid answer field"))
    }))
}

async fn stage_video(
    state: &AppState,
    bytes: Bytes,
    key: String,
    extension: &str,
) -> Result<StagedVideo, AppError> {
    tokio::fs::create_dir_all(&state.config.upload_dir)
        .await
        .context("Failed to create upload directory")?;
    let scratch = tempfile::Builder::new()
        .prefix("answer-")
        .suffix(&format!(".{extension}"))
        .tempfile_in(&state.config.upload_dir)
        .context("Failed to create scratch file")?;
    tokio::fs::write(scratch.path(), &bytes)
        .await
        .context("Failed to write scratch file")?;

    state
        .archive
        .put(&key, bytes, content_type_for(extension))
        .await?;

    Ok(StagedVideo {
        locator: VideoLocator::new(scratch.path(), key),
        _scratch: scratch,
    })
}

async fn discard_archived(state: &AppState, staged: &[(usize, StagedVideo)]) {
    if state.config.retain_failed_uploads {
        info!("Retaining {} archived answer videos of a failed request", staged.len());
        return;
    }
    for (_, video) in staged {
        state.archive.delete(&video.locator.archive_key).await;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/answers/score
///
/// Scores a single answer video (multipart field `video`) and returns its
/// trait vector. Nothing is persisted besides the archived video.
pub async fn handle_score_answer(
    State(state): State<AppState>,
    principal: Principal,
    mut multipart: Multipart,
) -> Result<Json<ScoreResponse>, AppError> {
    let mut staged = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("video") {
            continue;
        }
        let extension = extension_of(field.file_name());
        let bytes = field.bytes().await?;
        let key = format!("answers/adhoc/{}/{}.{extension}", principal.id, Uuid::new_v4());
        staged = Some(stage_video(&state, bytes, key, &extension).await?);
        break;
    }
    let staged = staged.ok_or_else(|| AppError::Validation("missing 'video' field".to_string()))?;

    match state.pipeline.score_answer(0, &staged.locator).await {
        Ok(scored) => Ok(Json(ScoreResponse {
            video_key: scored.video.archive_key,
            traits_display: scored.traits.rounded(DISPLAY_DECIMALS),
            traits: scored.traits,
        })),
        Err(failure) => {
            discard_archived(&state, &[(0, staged)]).await;
            Err(failure.into())
        }
    }
}

/// POST /api/v1/jobs/:job_id/applications
///
/// Multipart body with one `video_<index>` field per job question. Every
/// answer is archived and scored; the application is created only when all of
/// them score.
pub async fn handle_submit_application(
    State(state): State<AppState>,
    principal: Principal,
    Path(job_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApplicationResponse>), AppError> {
    if principal.role != Role::Candidate {
        return Err(AppError::Forbidden("only a candidate may apply".to_string()));
    }

    let mut parts: Vec<(usize, String, Bytes)> = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let Some(index) = field.name().and_then(question_index_of) else {
            continue;
        };
        let index = index?;
        let extension = extension_of(field.file_name());
        parts.push((index, extension, field.bytes().await?));
    }

    // Reject a malformed answer set before any upload or inference.
    let indices: Vec<usize> = parts.iter().map(|(i, _, _)| *i).collect();
    state
        .applications
        .check_submission(job_id, &principal, &indices)
        .await?;

    let mut staged: Vec<(usize, StagedVideo)> = Vec::with_capacity(parts.len());
    for (index, extension, bytes) in parts {
        let key = answer_key(job_id, principal.id, index, &extension);
        match stage_video(&state, bytes, key, &extension).await {
            Ok(video) => staged.push((index, video)),
            Err(e) => {
                discard_archived(&state, &staged).await;
                return Err(e);
            }
        }
    }

    let answers: Vec<(usize, VideoLocator)> = staged
        .iter()
        .map(|(index, video)| (*index, video.locator.clone()))
        .collect();

    let outcome = match state.pipeline.score_answers(&answers).await {
        Ok(scored) => state
            .applications
            .submit_application(job_id, &principal, scored)
            .await
            .map_err(AppError::from),
        Err(failure) => Err(failure.into()),
    };

    match outcome {
        Ok(application) => Ok((StatusCode::CREATED, Json(application.into()))),
        Err(e) => {
            warn!("Submission for job {job_id} by {} failed: {e}", principal.id);
            discard_archived(&state, &staged).await;
            Err(e)
        }
    }
}

/// GET /api/v1/jobs/:job_id/applications?status=&revaluation_status=
pub async fn handle_list_job_applications(
    State(state): State<AppState>,
    principal: Principal,
    Path(job_id): Path<Uuid>,
    Query(filter): Query<ApplicationFilter>,
) -> Result<Json<Vec<ApplicationResponse>>, AppError> {
    let applications = state
        .applications
        .list_job_applications(job_id, &principal, &filter)
        .await?;
    Ok(Json(applications.into_iter().map(Into::into).collect()))
}

/// GET /api/v1/candidate/applications
pub async fn handle_list_candidate_applications(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<ApplicationResponse>>, AppError> {
    let applications = state
        .applications
        .list_candidate_applications(&principal)
        .await?;
    Ok(Json(applications.into_iter().map(Into::into).collect()))
}

/// GET /api/v1/applications/:id
pub async fn handle_get_application(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<ApplicationResponse>, AppError> {
    let application = state.applications.get_application(id, &principal).await?;
    Ok(Json(application.into()))
}

/// GET /api/v1/applications/:id/aggregate
pub async fn handle_aggregate(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<AggregateResponse>, AppError> {
    let average = state.applications.aggregate(id, &principal).await?;
    Ok(Json(AggregateResponse {
        application_id: id,
        average_scores: average,
        average_scores_display: average.rounded(DISPLAY_DECIMALS),
    }))
}

/// PUT /api/v1/applications/:id/status
pub async fn handle_decide(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(request): Json<DecideRequest>,
) -> Result<Json<ApplicationResponse>, AppError> {
    let application = state
        .applications
        .decide_application(id, request.status, &principal)
        .await?;
    Ok(Json(application.into()))
}

/// POST /api/v1/applications/:id/revaluation
pub async fn handle_request_revaluation(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<ApplicationResponse>, AppError> {
    let application = state.applications.request_revaluation(id, &principal).await?;
    Ok(Json(application.into()))
}

/// PUT /api/v1/applications/:id/revaluation
pub async fn handle_resolve_revaluation(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveRevaluationRequest>,
) -> Result<Json<ApplicationResponse>, AppError> {
    let application = state
        .applications
        .resolve_revaluation(id, request.decision, &principal)
        .await?;
    Ok(Json(application.into()))
}

/// GET /api/v1/videos/*key
///
/// Streams an archived answer video back to an authenticated caller.
pub async fn handle_get_video(
    State(state): State<AppState>,
    _principal: Principal,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let video = state.archive.get(key.trim_start_matches('/')).await?;
    Ok(([(header::CONTENT_TYPE, video.content_type)], video.bytes))
}
