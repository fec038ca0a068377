/*!
 * In-memory job registry.
 *
 * A `JobStore` is constructed once and handed to whoever needs it. Finished
 * jobs stay queryable for the retention window. Eviction only happens
 * through `purge_expired`, whose caller owns whatever else is keyed by the
 * evicted ids.
 */

use chrono::Utc;
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::models::{JobResult, JobState, StartJobRequest};
use crate::errors::JobError;

/// One job as tracked by the store
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: String,
    pub project_id: i64,
    pub request: StartJobRequest,
    pub state: JobState,
    /// Shared with the runner, which checks it at batch boundaries
    pub cancel_flag: Arc<AtomicBool>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    /// Insertion order, used to find the latest job of a project
    ordinal: u64,
    finished: Option<Instant>,
}

impl JobRecord {
    pub fn cancel_requested(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Registry {
    jobs: HashMap<String, JobRecord>,
    next_ordinal: u64,
}

/// Registry of running and recently finished jobs
#[derive(Debug)]
pub struct JobStore {
    registry: RwLock<Registry>,
    retention: Duration,
}

impl JobStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            retention,
        }
    }

    /// Register a pending job and return its record
    pub fn insert(&self, request: StartJobRequest) -> JobRecord {
        let mut registry = self.registry.write();
        registry.next_ordinal += 1;
        let record = JobRecord {
            job_id: Uuid::new_v4().simple().to_string(),
            project_id: request.project_id,
            request,
            state: JobState::Pending,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            created_at: Utc::now().to_rfc3339(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            ordinal: registry.next_ordinal,
            finished: None,
        };
        registry.jobs.insert(record.job_id.clone(), record.clone());
        record
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.registry.read().jobs.get(job_id).cloned()
    }

    fn transition(&self, job_id: &str, next: JobState) -> Result<(), JobError> {
        let mut registry = self.registry.write();
        let record = registry
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

        if !record.state.can_transition_to(next) {
            return Err(JobError::InvalidRequest(format!(
                "Job {} cannot move from {} to {}",
                job_id, record.state, next
            )));
        }

        debug!("Job {}: {} -> {}", job_id, record.state, next);
        record.state = next;
        let now = Utc::now().to_rfc3339();
        if next == JobState::Running {
            record.started_at = Some(now);
        } else {
            record.finished_at = Some(now);
            record.finished = Some(Instant::now());
        }
        Ok(())
    }

    pub fn mark_running(&self, job_id: &str) -> Result<(), JobError> {
        self.transition(job_id, JobState::Running)
    }

    /// Move a running job to a terminal state with its outcome
    pub fn finish(
        &self,
        job_id: &str,
        state: JobState,
        result: JobResult,
        error: Option<String>,
    ) -> Result<(), JobError> {
        if !state.is_terminal() {
            return Err(JobError::InvalidRequest(format!("{} is not a terminal state", state)));
        }
        self.transition(job_id, state)?;

        let mut registry = self.registry.write();
        if let Some(record) = registry.jobs.get_mut(job_id) {
            record.result = Some(result);
            record.error = error;
        }
        Ok(())
    }

    /// Raise the cancel flag. False when the job is unknown or already finished.
    pub fn request_cancel(&self, job_id: &str) -> bool {
        let registry = self.registry.read();
        match registry.jobs.get(job_id) {
            Some(record) if !record.state.is_terminal() => {
                record.cancel_flag.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    /// Edit the stored result of a job
    pub fn update_result<F>(&self, job_id: &str, update: F) -> Result<(), JobError>
    where
        F: FnOnce(&mut JobResult),
    {
        let mut registry = self.registry.write();
        let record = registry
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        let result = record
            .result
            .as_mut()
            .ok_or_else(|| JobError::InvalidRequest(format!("Job {} has no result yet", job_id)))?;
        update(result);
        Ok(())
    }

    /// Most recently created job of a project
    pub fn latest_for_project(&self, project_id: i64) -> Option<String> {
        self.latest_matching(project_id, |_| true)
    }

    /// Most recently created job of a project that has not finished
    pub fn latest_active_for_project(&self, project_id: i64) -> Option<String> {
        self.latest_matching(project_id, |record| !record.state.is_terminal())
    }

    fn latest_matching<F>(&self, project_id: i64, filter: F) -> Option<String>
    where
        F: Fn(&JobRecord) -> bool,
    {
        self.registry
            .read()
            .jobs
            .values()
            .filter(|record| record.project_id == project_id && filter(record))
            .max_by_key(|record| record.ordinal)
            .map(|record| record.job_id.clone())
    }

    pub fn remove(&self, job_id: &str) -> bool {
        self.registry.write().jobs.remove(job_id).is_some()
    }

    /// Drop finished jobs older than the retention window. Returns their ids.
    pub fn purge_expired(&self) -> Vec<String> {
        let mut registry = self.registry.write();
        let expired: Vec<String> = registry
            .jobs
            .values()
            .filter(|record| {
                record
                    .finished
                    .is_some_and(|finished| finished.elapsed() >= self.retention)
            })
            .map(|record| record.job_id.clone())
            .collect();

        for job_id in &expired {
            registry.jobs.remove(job_id);
            debug!("Evicted job {}", job_id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.registry.read().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
