use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::applications::lifecycle::{ApplicationStatus, Lifecycle, RevaluationStatus};
use crate::personality::TraitVector;

/// One scored answer. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerRecord {
    pub question_index: usize,
    /// Archive key of the answer video.
    pub video_key: String,
    pub scores: TraitVector,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Application {
    pub id: Uuid,
    pub job_id: Uuid,
    pub candidate_id: Uuid,
    /// Ordered by question index.
    pub answers: Vec<AnswerRecord>,
    pub average_scores: TraitVector,
    pub status: ApplicationStatus,
    pub revaluation_requested: bool,
    pub revaluation_status: RevaluationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle {
            status: self.status,
            revaluation: self.revaluation_status,
        }
    }

    /// Applies a lifecycle that has already been validated by the state machine.
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle, at: DateTime<Utc>) -> Self {
        self.status = lifecycle.status;
        self.revaluation_status = lifecycle.revaluation;
        self.revaluation_requested = lifecycle.revaluation_requested();
        self.updated_at = at;
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Rows
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct ApplicationRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub candidate_id: Uuid,
    pub average_scores: Json<TraitVector>,
    pub status: String,
    pub revaluation_requested: bool,
    pub revaluation_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AnswerRow {
    pub application_id: Uuid,
    pub question_index: i32,
    pub video_key: String,
    pub scores: Json<TraitVector>,
    pub created_at: DateTime<Utc>,
}

impl From<AnswerRow> for AnswerRecord {
    fn from(row: AnswerRow) -> Self {
        Self {
            question_index: row.question_index.max(0) as usize,
            video_key: row.video_key,
            scores: row.scores.0,
            created_at: row.created_at,
        }
    }
}

impl ApplicationRow {
    /// Fails when a stored status string is not a known state.
    pub fn into_application(self, answers: Vec<AnswerRecord>) -> Result<Application, String> {
        let status = self.status.parse::<ApplicationStatus>().map_err(|e| e.to_string())?;
        let revaluation_status = self
            .revaluation_status
            .parse::<RevaluationStatus>()
            .map_err(|e| e.to_string())?;
        Ok(Application {
            id: self.id,
            job_id: self.job_id,
            candidate_id: self.candidate_id,
            answers,
            average_scores: self.average_scores.0,
            status,
            revaluation_requested: self.revaluation_requested,
            revaluation_status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
