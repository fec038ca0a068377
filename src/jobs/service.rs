/*!
 * Job-control surface: start, poll, resume and cancel translation jobs.
 *
 * `start_job` validates the request, snapshots the project, the provider
 * settings and the configuration, then spawns the runner and returns the job
 * id right away. Edits made while a job runs do not affect it.
 */

use log::{error, info};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::models::{JobResult, JobState, StartJobRequest};
use super::progress::{ProgressEvent, ProgressStore};
use super::runner::{JobPlan, JobRunner, RunnerSettings};
use super::store::JobStore;
use crate::app_config::{self, Config};
use crate::database::store::ProjectStore;
use crate::errors::JobError;
use crate::language_utils;
use crate::providers::ProviderFactory;
use crate::translation::Strategy;

/// What `get_progress` returns
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub project_id: i64,
    pub state: JobState,
    pub progress: Option<ProgressEvent>,
    pub progress_history: Vec<ProgressEvent>,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

/// Starts jobs and answers progress queries
pub struct JobService {
    store: Arc<dyn ProjectStore>,
    config: RwLock<Config>,
    providers: Arc<dyn ProviderFactory>,
    jobs: Arc<JobStore>,
    progress: Arc<ProgressStore>,
}

impl JobService {
    pub fn new(store: Arc<dyn ProjectStore>, config: Config, providers: Arc<dyn ProviderFactory>) -> Self {
        let jobs = Arc::new(JobStore::new(Duration::from_secs(config.jobs.retention_secs)));
        Self::with_stores(store, config, providers, jobs, Arc::new(ProgressStore::new()))
    }

    /// Service over existing job and progress stores
    pub fn with_stores(
        store: Arc<dyn ProjectStore>,
        config: Config,
        providers: Arc<dyn ProviderFactory>,
        jobs: Arc<JobStore>,
        progress: Arc<ProgressStore>,
    ) -> Self {
        Self {
            store,
            config: RwLock::new(config),
            providers,
            jobs,
            progress,
        }
    }

    pub fn jobs(&self) -> Arc<JobStore> {
        self.jobs.clone()
    }

    /// Replace the configuration used by jobs started from now on
    pub fn update_config(&self, config: Config) {
        *self.config.write() = config;
    }

    fn purge_expired(&self) {
        for job_id in self.jobs.purge_expired() {
            self.progress.remove(&job_id);
        }
    }

    /// Validate a request and spawn its job
    pub async fn start_job(&self, request: StartJobRequest) -> Result<String, JobError> {
        self.purge_expired();
        let config = self.config.read().clone();

        let strategy = Strategy::from_mode(&request.strategy, request.include_locked)
            .map_err(|e| JobError::InvalidRequest(e.to_string()))?;
        if let Some(size) = request.chunk_size_words {
            app_config::validate_chunk_size(size).map_err(|e| JobError::InvalidRequest(e.to_string()))?;
        }
        for code in &request.languages {
            language_utils::validate_language_code(code)
                .map_err(|e| JobError::InvalidRequest(e.to_string()))?;
        }

        let project = self
            .store
            .get_project(request.project_id)
            .await?
            .ok_or(JobError::ProjectNotFound(request.project_id))?;

        let word_budget = request
            .chunk_size_words
            .or(project.chunk_size_words)
            .unwrap_or(config.translation.chunk_size_words);

        let mut settings = RunnerSettings {
            variable_patterns: config.translation.active_variable_patterns(),
            ..RunnerSettings::default()
        };
        let mut model = String::new();
        let mut provider = None;
        if strategy.calls_provider() {
            let provider_ref = request
                .provider
                .as_deref()
                .or(project.translation_provider.as_deref());
            let resolved = config.resolve_provider(provider_ref)?;
            provider = Some(self.providers.create(&resolved, &config.translation)?);
            settings = RunnerSettings::from_config(&resolved.config, &config.translation);
            model = resolved.model;
        }

        let record = self.jobs.insert(request.clone());
        let job_id = record.job_id.clone();
        let plan = JobPlan {
            job_id: job_id.clone(),
            project,
            languages: request.languages,
            strategy,
            word_budget,
            model,
            generate_files: request.generate_files,
        };

        let mut runner = JobRunner::new(self.store.clone(), self.progress.clone(), settings, record.cancel_flag);
        if let Some(provider) = provider {
            runner = runner.with_provider(provider);
        }

        info!(
            "Starting job {} ({}) for project {}",
            job_id, plan.strategy, plan.project.id
        );
        let jobs = self.jobs.clone();
        tokio::spawn(async move {
            if let Err(e) = jobs.mark_running(&plan.job_id) {
                error!("Job {} could not start: {}", plan.job_id, e);
                return;
            }
            let outcome = runner.run(&plan).await;
            if let Err(e) = jobs.finish(&plan.job_id, outcome.state, outcome.result, outcome.error) {
                error!("Job {} could not be finalized: {}", plan.job_id, e);
            }
        });

        Ok(job_id)
    }

    /// Current state, latest event, full history and result of a job
    pub fn get_progress(&self, job_id: &str) -> Option<JobSnapshot> {
        self.purge_expired();
        let record = self.jobs.get(job_id)?;
        let view = self.progress.read(job_id).unwrap_or_default();

        Some(JobSnapshot {
            job_id: record.job_id,
            project_id: record.project_id,
            state: record.state,
            progress: view.progress,
            progress_history: view.progress_history,
            result: record.result,
            error: record.error,
            created_at: record.created_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
        })
    }

    /// Events recorded after `after`, for incremental polling
    pub fn progress_since(&self, job_id: &str, after: u64) -> Vec<ProgressEvent> {
        self.progress.history_since(job_id, after)
    }

    /// Most recent job of a project, for clients that reconnect
    pub fn get_latest_job(&self, project_id: i64) -> Option<String> {
        self.purge_expired();
        self.jobs.latest_for_project(project_id)
    }

    /// Request cooperative cancellation
    pub fn cancel_job(&self, job_id: &str) -> bool {
        let accepted = self.jobs.request_cancel(job_id);
        if accepted {
            info!("Cancellation requested for job {}", job_id);
        }
        accepted
    }

    /// Drop remediated `(key_path, language_code)` entries from a job's result
    pub fn remove_failed_items(&self, job_id: &str, items: &[(String, String)]) -> Result<usize, JobError> {
        let mut removed = 0;
        self.jobs
            .update_result(job_id, |result| removed = result.remove_failed_items(items))?;
        Ok(removed)
    }

    /// Poll until the job reaches a terminal state or disappears
    pub async fn wait_for(&self, job_id: &str, poll_interval: Duration) -> Option<JobSnapshot> {
        loop {
            let snapshot = self.get_progress(job_id)?;
            if snapshot.state.is_terminal() {
                return Some(snapshot);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}
