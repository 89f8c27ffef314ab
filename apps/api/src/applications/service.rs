//! Application operations: submission, review, revaluation and reads.
//!
//! Every mutating operation checks the caller first, then the state machine,
//! then writes conditionally on the state it read.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::aggregator::{aggregate, EmptyAnswerSet};
use super::lifecycle::{Decision, Lifecycle, RevaluationOutcome, TransitionError};
use super::store::{ApplicationFilter, ApplicationStore, JobCatalog, NewApplication, StoreError};
use crate::models::application::{AnswerRecord, Application};
use crate::models::job::JobPosting;
use crate::models::principal::{Principal, Role};
use crate::personality::TraitVector;
use crate::pipeline::ScoredAnswer;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error(transparent)]
    EmptyAnswerSet(#[from] EmptyAnswerSet),

    #[error("expected {expected} answers, got {actual}")]
    AnswerCountMismatch { expected: usize, actual: usize },

    #[error("invalid answer set: {0}")]
    InvalidAnswers(String),

    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<TransitionError> for ApplicationError {
    fn from(e: TransitionError) -> Self {
        ApplicationError::IllegalTransition(e.to_string())
    }
}

impl From<StoreError> for ApplicationError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate => ApplicationError::IllegalTransition(
                "an application for this job already exists".to_string(),
            ),
            other => ApplicationError::Store(other),
        }
    }
}

#[derive(Clone)]
pub struct ApplicationService {
    store: Arc<dyn ApplicationStore>,
    jobs: Arc<dyn JobCatalog>,
}

fn require_role(principal: &Principal, role: Role, action: &str) -> Result<(), ApplicationError> {
    if principal.role != role {
        return Err(ApplicationError::Unauthorized(format!(
            "only a {} may {action}",
            role.as_str()
        )));
    }
    Ok(())
}

fn check_answer_indices(job: &JobPosting, indices: &[usize]) -> Result<(), ApplicationError> {
    if indices.is_empty() {
        return Err(EmptyAnswerSet.into());
    }
    if indices.len() != job.questions.len() {
        return Err(ApplicationError::AnswerCountMismatch {
            expected: job.questions.len(),
            actual: indices.len(),
        });
    }
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    if sorted.iter().enumerate().any(|(i, q)| i != *q) {
        return Err(ApplicationError::InvalidAnswers(format!(
            "question indices must be 0..{} without duplicates, got {sorted:?}",
            job.questions.len()
        )));
    }
    Ok(())
}

impl ApplicationService {
    pub fn new(store: Arc<dyn ApplicationStore>, jobs: Arc<dyn JobCatalog>) -> Self {
        Self { store, jobs }
    }

    async fn job(&self, job_id: Uuid) -> Result<JobPosting, ApplicationError> {
        self.jobs
            .find_job(job_id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(format!("job {job_id}")))
    }

    async fn application(&self, id: Uuid) -> Result<Application, ApplicationError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(format!("application {id}")))
    }

    /// Loads an application and its job, checking the caller is the recruiter
    /// who owns the job.
    async fn owned_by_recruiter(
        &self,
        id: Uuid,
        principal: &Principal,
        action: &str,
    ) -> Result<Application, ApplicationError> {
        require_role(principal, Role::Recruiter, action)?;
        let application = self.application(id).await?;
        let job = self.job(application.job_id).await?;
        if job.recruiter_id != principal.id {
            return Err(ApplicationError::Unauthorized(format!(
                "job {} belongs to another recruiter",
                job.id
            )));
        }
        Ok(application)
    }

    async fn transition(
        &self,
        application: &Application,
        next: Lifecycle,
    ) -> Result<Application, ApplicationError> {
        self.store
            .update_lifecycle(application.id, application.lifecycle(), next)
            .await?
            .ok_or_else(|| {
                ApplicationError::IllegalTransition(format!(
                    "application {} was modified concurrently",
                    application.id
                ))
            })
    }

    /// Cheap checks run before any answer is scored: caller role, job
    /// existence, the shape of the answer set and whether the candidate has
    /// already applied.
    pub async fn check_submission(
        &self,
        job_id: Uuid,
        principal: &Principal,
        question_indices: &[usize],
    ) -> Result<JobPosting, ApplicationError> {
        require_role(principal, Role::Candidate, "submit an application")?;
        let job = self.job(job_id).await?;
        check_answer_indices(&job, question_indices)?;
        if self.store.has_applied(job_id, principal.id).await? {
            return Err(ApplicationError::IllegalTransition(format!(
                "candidate {} already applied to job {job_id}",
                principal.id
            )));
        }
        Ok(job)
    }

    pub async fn submit_application(
        &self,
        job_id: Uuid,
        principal: &Principal,
        mut answers: Vec<ScoredAnswer>,
    ) -> Result<Application, ApplicationError> {
        let indices: Vec<usize> = answers.iter().map(|a| a.question_index).collect();
        self.check_submission(job_id, principal, &indices).await?;

        answers.sort_by_key(|a| a.question_index);
        let vectors: Vec<TraitVector> = answers.iter().map(|a| a.traits).collect();
        let average_scores = aggregate(&vectors)?;

        let now = Utc::now();
        let records = answers
            .into_iter()
            .map(|a| AnswerRecord {
                question_index: a.question_index,
                video_key: a.video.archive_key,
                scores: a.traits,
                created_at: now,
            })
            .collect();

        let application = self
            .store
            .insert(NewApplication {
                job_id,
                candidate_id: principal.id,
                answers: records,
                average_scores,
            })
            .await?;

        info!(
            "Application {} submitted for job {} by candidate {}",
            application.id, job_id, principal.id
        );
        Ok(application)
    }

    /// Full-precision average recomputed from the stored answers.
    pub async fn aggregate(
        &self,
        application_id: Uuid,
        principal: &Principal,
    ) -> Result<TraitVector, ApplicationError> {
        let application = self.get_application(application_id, principal).await?;
        let job = self.job(application.job_id).await?;
        if application.answers.len() != job.questions.len() {
            return Err(ApplicationError::AnswerCountMismatch {
                expected: job.questions.len(),
                actual: application.answers.len(),
            });
        }
        let vectors: Vec<TraitVector> = application.answers.iter().map(|a| a.scores).collect();
        Ok(aggregate(&vectors)?)
    }

    pub async fn decide_application(
        &self,
        id: Uuid,
        decision: Decision,
        principal: &Principal,
    ) -> Result<Application, ApplicationError> {
        let application = self
            .owned_by_recruiter(id, principal, "decide an application")
            .await?;
        let next = application.lifecycle().decide(decision)?;
        let updated = self.transition(&application, next).await?;
        info!("Application {id} marked {}", updated.status);
        Ok(updated)
    }

    pub async fn request_revaluation(
        &self,
        id: Uuid,
        principal: &Principal,
    ) -> Result<Application, ApplicationError> {
        require_role(principal, Role::Candidate, "request a revaluation")?;
        let application = self.application(id).await?;
        if application.candidate_id != principal.id {
            return Err(ApplicationError::Unauthorized(format!(
                "application {id} belongs to another candidate"
            )));
        }
        let next = application.lifecycle().request_revaluation()?;
        let updated = self.transition(&application, next).await?;
        info!("Revaluation requested for application {id}");
        Ok(updated)
    }

    pub async fn resolve_revaluation(
        &self,
        id: Uuid,
        outcome: RevaluationOutcome,
        principal: &Principal,
    ) -> Result<Application, ApplicationError> {
        let application = self
            .owned_by_recruiter(id, principal, "resolve a revaluation")
            .await?;
        let next = application.lifecycle().resolve_revaluation(outcome)?;
        let updated = self.transition(&application, next).await?;
        info!("Revaluation for application {id} {}", updated.revaluation_status);
        Ok(updated)
    }

    /// Visible to the candidate who applied and the recruiter who owns the job.
    pub async fn get_application(
        &self,
        id: Uuid,
        principal: &Principal,
    ) -> Result<Application, ApplicationError> {
        let application = self.application(id).await?;
        let allowed = match principal.role {
            Role::Candidate => application.candidate_id == principal.id,
            Role::Recruiter => self.job(application.job_id).await?.recruiter_id == principal.id,
        };
        if !allowed {
            return Err(ApplicationError::Unauthorized(format!(
                "application {id} is not visible to this principal"
            )));
        }
        Ok(application)
    }

    pub async fn list_job_applications(
        &self,
        job_id: Uuid,
        principal: &Principal,
        filter: &ApplicationFilter,
    ) -> Result<Vec<Application>, ApplicationError> {
        require_role(principal, Role::Recruiter, "list job applications")?;
        let job = self.job(job_id).await?;
        if job.recruiter_id != principal.id {
            return Err(ApplicationError::Unauthorized(format!(
                "job {job_id} belongs to another recruiter"
            )));
        }
        Ok(self.store.list_for_job(job_id, filter).await?)
    }

    pub async fn list_candidate_applications(
        &self,
        principal: &Principal,
    ) -> Result<Vec<Application>, ApplicationError> {
        require_role(principal, Role::Candidate, "list own applications")?;
        Ok(self.store.list_for_candidate(principal.id).await?)
    }
}
