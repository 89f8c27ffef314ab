//! In-memory `ApplicationStore` + `JobCatalog` used by service and router tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::lifecycle::Lifecycle;
use super::store::{ApplicationFilter, ApplicationStore, JobCatalog, NewApplication, StoreError};
use crate::models::application::Application;
use crate::models::job::JobPosting;

#[derive(Default)]
pub struct MemoryStore {
    applications: Mutex<HashMap<Uuid, Application>>,
    jobs: Mutex<HashMap<Uuid, JobPosting>>,
    totals: Mutex<HashMap<Uuid, u32>>,
}

impl MemoryStore {
    pub fn with_job(job: JobPosting) -> Self {
        let store = Self::default();
        store.add_job(job);
        store
    }

    pub fn add_job(&self, job: JobPosting) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.insert(job.id, job);
        }
    }

    pub fn total_applications(&self, job_id: Uuid) -> u32 {
        self.totals
            .lock()
            .map(|t| t.get(&job_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn poisoned() -> StoreError {
        StoreError::Corrupt("memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn insert(&self, new: NewApplication) -> Result<Application, StoreError> {
        let mut apps = self.applications.lock().map_err(|_| Self::poisoned())?;
        if apps
            .values()
            .any(|a| a.job_id == new.job_id && a.candidate_id == new.candidate_id)
        {
            return Err(StoreError::Duplicate);
        }
        let lifecycle = Lifecycle::initial();
        let now = Utc::now();
        let application = Application {
            id: Uuid::new_v4(),
            job_id: new.job_id,
            candidate_id: new.candidate_id,
            answers: new.answers,
            average_scores: new.average_scores,
            status: lifecycle.status,
            revaluation_requested: lifecycle.revaluation_requested(),
            revaluation_status: lifecycle.revaluation,
            created_at: now,
            updated_at: now,
        };
        apps.insert(application.id, application.clone());
        *self
            .totals
            .lock()
            .map_err(|_| Self::poisoned())?
            .entry(new.job_id)
            .or_default() += 1;
        Ok(application)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Application>, StoreError> {
        let apps = self.applications.lock().map_err(|_| Self::poisoned())?;
        Ok(apps.get(&id).cloned())
    }

    async fn update_lifecycle(
        &self,
        id: Uuid,
        expected: Lifecycle,
        next: Lifecycle,
    ) -> Result<Option<Application>, StoreError> {
        let mut apps = self.applications.lock().map_err(|_| Self::poisoned())?;
        let Some(current) = apps.get(&id) else {
            return Ok(None);
        };
        if current.lifecycle() != expected {
            return Ok(None);
        }
        let updated = current.clone().with_lifecycle(next, Utc::now());
        apps.insert(id, updated.clone());
        Ok(Some(updated))
    }

    async fn list_for_job(
        &self,
        job_id: Uuid,
        filter: &ApplicationFilter,
    ) -> Result<Vec<Application>, StoreError> {
        let apps = self.applications.lock().map_err(|_| Self::poisoned())?;
        let mut found: Vec<Application> = apps
            .values()
            .filter(|a| a.job_id == job_id && filter.matches(a))
            .cloned()
            .collect();
        found.sort_by_key(|a| a.created_at);
        Ok(found)
    }

    async fn list_for_candidate(&self, candidate_id: Uuid) -> Result<Vec<Application>, StoreError> {
        let apps = self.applications.lock().map_err(|_| Self::poisoned())?;
        let mut found: Vec<Application> = apps
            .values()
            .filter(|a| a.candidate_id == candidate_id)
            .cloned()
            .collect();
        found.sort_by_key(|a| std::cmp::Reverse(a.created_at));
        Ok(found)
    }

    async fn has_applied(&self, job_id: Uuid, candidate_id: Uuid) -> Result<bool, StoreError> {
        let apps = self.applications.lock().map_err(|_| Self::poisoned())?;
        Ok(apps
            .values()
            .any(|a| a.job_id == job_id && a.candidate_id == candidate_id))
    }
}

#[async_trait]
impl JobCatalog for MemoryStore {
    async fn find_job(&self, id: Uuid) -> Result<Option<JobPosting>, StoreError> {
        let jobs = self.jobs.lock().map_err(|_| Self::poisoned())?;
        Ok(jobs.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applications::lifecycle::{ApplicationStatus, Decision};
    use crate::personality::TraitVector;

    async fn stored(store: &MemoryStore) -> Application {
        store
            .insert(NewApplication {
                job_id: Uuid::new_v4(),
                candidate_id: Uuid::new_v4(),
                answers: vec![],
                average_scores: TraitVector::from_array([0.5; 5]),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_update_with_mismatched_expected_is_none() {
        let store = MemoryStore::default();
        let app = stored(&store).await;
        let shortlisted = Lifecycle::initial().decide(Decision::Shortlisted).unwrap();
        let rejected = Lifecycle::initial().decide(Decision::Rejected).unwrap();

        assert!(store
            .update_lifecycle(app.id, Lifecycle::initial(), shortlisted)
            .await
            .unwrap()
            .is_some());
        // The stored state is no longer the initial one.
        assert!(store
            .update_lifecycle(app.id, Lifecycle::initial(), rejected)
            .await
            .unwrap()
            .is_none());

        let current = store.find_by_id(app.id).await.unwrap().unwrap();
        assert_eq!(current.status, ApplicationStatus::Shortlisted);
    }

    #[tokio::test]
    async fn test_has_applied() {
        let store = MemoryStore::default();
        let app = stored(&store).await;
        assert!(store.has_applied(app.job_id, app.candidate_id).await.unwrap());
        assert!(!store.has_applied(app.job_id, Uuid::new_v4()).await.unwrap());
    }
}
