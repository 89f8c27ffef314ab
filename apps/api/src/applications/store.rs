//! Persistence seams for applications and the jobs they belong to.
//!
//! `PgApplicationStore` is the production implementation. Writes that touch
//! more than one table run in a single transaction; lifecycle updates are
//! conditional on the state the caller read, so concurrent writers cannot
//! both win.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::types::Json;
use sqlx::PgPool;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::applications::lifecycle::{ApplicationStatus, Lifecycle, RevaluationStatus};
use crate::models::application::{AnswerRecord, AnswerRow, Application, ApplicationRow};
use crate::models::job::{JobPosting, JobRow};
use crate::personality::TraitVector;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record already exists")]
    Duplicate,

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate,
            _ => StoreError::Database(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewApplication {
    pub job_id: Uuid,
    pub candidate_id: Uuid,
    pub answers: Vec<AnswerRecord>,
    pub average_scores: TraitVector,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ApplicationFilter {
    pub status: Option<ApplicationStatus>,
    pub revaluation_status: Option<RevaluationStatus>,
}

impl ApplicationFilter {
    pub fn matches(&self, application: &Application) -> bool {
        self.status.map_or(true, |s| s == application.status)
            && self
                .revaluation_status
                .map_or(true, |r| r == application.revaluation_status)
    }
}

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    /// Fails with `StoreError::Duplicate` when the candidate already applied.
    async fn insert(&self, new: NewApplication) -> Result<Application, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Application>, StoreError>;

    /// Writes `next` only if the stored lifecycle still equals `expected`.
    /// Returns `None` when it no longer does.
    async fn update_lifecycle(
        &self,
        id: Uuid,
        expected: Lifecycle,
        next: Lifecycle,
    ) -> Result<Option<Application>, StoreError>;

    async fn list_for_job(
        &self,
        job_id: Uuid,
        filter: &ApplicationFilter,
    ) -> Result<Vec<Application>, StoreError>;

    async fn list_for_candidate(&self, candidate_id: Uuid) -> Result<Vec<Application>, StoreError>;

    async fn has_applied(&self, job_id: Uuid, candidate_id: Uuid) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait JobCatalog: Send + Sync {
    async fn find_job(&self, id: Uuid) -> Result<Option<JobPosting>, StoreError>;
}

// ────────────────────────────────────────────────────────────────────────────
// PostgreSQL
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PgApplicationStore {
    pool: PgPool,
}

impl PgApplicationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_answers(
        &self,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<AnswerRecord>>, StoreError> {
        let rows = sqlx::query_as::<_, AnswerRow>(
            r#"
            SELECT application_id, question_index, video_key, scores, created_at
            FROM application_answers
            WHERE application_id = ANY($1)
            ORDER BY application_id, question_index
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<AnswerRecord>> = HashMap::new();
        for row in rows {
            grouped.entry(row.application_id).or_default().push(row.into());
        }
        Ok(grouped)
    }

    async fn hydrate(&self, rows: Vec<ApplicationRow>) -> Result<Vec<Application>, StoreError> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut answers = self.load_answers(&ids).await?;
        rows.into_iter()
            .map(|row| {
                let own = answers.remove(&row.id).unwrap_or_default();
                row.into_application(own).map_err(StoreError::Corrupt)
            })
            .collect()
    }
}

const APPLICATION_COLUMNS: &str = "id, job_id, candidate_id, average_scores, status, \
     revaluation_requested, revaluation_status, created_at, updated_at";

#[async_trait]
impl ApplicationStore for PgApplicationStore {
    async fn insert(&self, new: NewApplication) -> Result<Application, StoreError> {
        let mut tx = self.pool.begin().await?;
        let lifecycle = Lifecycle::initial();

        let row = sqlx::query_as::<_, ApplicationRow>(&format!(
            r#"
            INSERT INTO applications
                (job_id, candidate_id, average_scores, status, revaluation_requested, revaluation_status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {APPLICATION_COLUMNS}
            "#
        ))
        .bind(new.job_id)
        .bind(new.candidate_id)
        .bind(Json(new.average_scores))
        .bind(lifecycle.status.as_str())
        .bind(lifecycle.revaluation_requested())
        .bind(lifecycle.revaluation.as_str())
        .fetch_one(&mut *tx)
        .await?;

        for answer in &new.answers {
            sqlx::query(
                r#"
                INSERT INTO application_answers
                    (application_id, question_index, video_key, scores, created_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(row.id)
            .bind(answer.question_index as i32)
            .bind(&answer.video_key)
            .bind(Json(answer.scores))
            .bind(answer.created_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE jobs SET total_applications = total_applications + 1 WHERE id = $1")
            .bind(new.job_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(
            "stored application {} ({} answers) for job {}",
            row.id,
            new.answers.len(),
            new.job_id
        );

        row.into_application(new.answers).map_err(StoreError::Corrupt)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Application>, StoreError> {
        let row = sqlx::query_as::<_, ApplicationRow>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn update_lifecycle(
        &self,
        id: Uuid,
        expected: Lifecycle,
        next: Lifecycle,
    ) -> Result<Option<Application>, StoreError> {
        let now: DateTime<Utc> = Utc::now();
        let row = sqlx::query_as::<_, ApplicationRow>(&format!(
            r#"
            UPDATE applications
            SET status = $1, revaluation_status = $2, revaluation_requested = $3, updated_at = $4
            WHERE id = $5 AND status = $6 AND revaluation_status = $7
            RETURNING {APPLICATION_COLUMNS}
            "#
        ))
        .bind(next.status.as_str())
        .bind(next.revaluation.as_str())
        .bind(next.revaluation_requested())
        .bind(now)
        .bind(id)
        .bind(expected.status.as_str())
        .bind(expected.revaluation.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_for_job(
        &self,
        job_id: Uuid,
        filter: &ApplicationFilter,
    ) -> Result<Vec<Application>, StoreError> {
        let rows = sqlx::query_as::<_, ApplicationRow>(&format!(
            r#"
            SELECT {APPLICATION_COLUMNS} FROM applications
            WHERE job_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR revaluation_status = $3)
            ORDER BY created_at
            "#
        ))
        .bind(job_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.revaluation_status.map(|r| r.as_str()))
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn list_for_candidate(&self, candidate_id: Uuid) -> Result<Vec<Application>, StoreError> {
        let rows = sqlx::query_as::<_, ApplicationRow>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE candidate_id = $1 ORDER BY created_at DESC"
        ))
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn has_applied(&self, job_id: Uuid, candidate_id: Uuid) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM applications WHERE job_id = $1 AND candidate_id = $2)",
        )
        .bind(job_id)
        .bind(candidate_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

#[async_trait]
impl JobCatalog for PgApplicationStore {
    async fn find_job(&self, id: Uuid) -> Result<Option<JobPosting>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT id, recruiter_id, title, questions FROM jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(JobPosting::from))
    }
}
