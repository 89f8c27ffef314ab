use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobQuestion {
    pub question_text: String,
    /// Seconds.
    pub time_limit: u32,
}

/// The slice of a job posting this service reads. Jobs are created and edited
/// elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPosting {
    pub id: Uuid,
    pub recruiter_id: Uuid,
    pub title: String,
    pub questions: Vec<JobQuestion>,
}

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub recruiter_id: Uuid,
    pub title: String,
    pub questions: Json<Vec<JobQuestion>>,
}

impl From<JobRow> for JobPosting {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.id,
            recruiter_id: row.recruiter_id,
            title: row.title,
            questions: row.questions.0,
        }
    }
}
