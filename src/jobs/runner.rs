/*!
 * Job runner: the per-job state machine.
 *
 * Languages are processed one after another. For each language the runner
 * emits `checking`, `checked`, then either `no_work` or `tasks_found` and
 * `starting`, one `batch_done` per batch, an optional `retrying` pass and
 * finally `completed` (followed by `file_generated` when exporting).
 *
 * Batches of a language run strictly in order and each batch is persisted in
 * one transaction before the next one starts. Cancellation is cooperative and
 * observed between batches and between languages.
 */

use log::{debug, error, info, warn};
use rand::Rng;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::models::{FailedItem, JobResult, JobState};
use super::progress::{ProgressEvent, ProgressPhase, ProgressStore};
use crate::app_config::{ProviderConfig, TranslationSettings};
use crate::database::models::{PendingKey, ProjectRecord, ProtectedTerm, TranslationStatus, TranslationUpsert};
use crate::database::store::ProjectStore;
use crate::errors::ProviderError;
use crate::file_utils::FileManager;
use crate::language_utils;
use crate::protection::applicable_terms;
use crate::providers::{BatchItem, BatchRequest, BatchResponse, TokenUsage, TranslationProvider};
use crate::source_file;
use crate::translation::{Batch, BatchPlanner, Strategy, Validation, Validator};

/// Failure reason for keys the provider skipped
pub const NO_TRANSLATION_RETURNED: &str = "no translation returned";

/// Retry and validation knobs of a run
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Retries after the first attempt of a batch
    pub max_retries: u32,
    /// Bound on every provider call
    pub call_timeout: Duration,
    pub retry_backoff: Duration,
    pub rate_limit_backoff: Duration,
    pub max_backoff: Duration,
    pub variable_patterns: Vec<String>,
}

impl RunnerSettings {
    pub fn from_config(provider: &ProviderConfig, settings: &TranslationSettings) -> Self {
        Self {
            max_retries: provider.max_retries,
            call_timeout: provider.timeout(),
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
            rate_limit_backoff: Duration::from_millis(settings.rate_limit_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            variable_patterns: settings.active_variable_patterns(),
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(
            &ProviderConfig::custom("default", "http://localhost", "", vec![]),
            &TranslationSettings::default(),
        )
    }
}

/// Everything a run needs, captured when the job starts
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub job_id: String,
    pub project: ProjectRecord,
    /// Requested languages; empty means every language the project knows
    pub languages: Vec<String>,
    pub strategy: Strategy,
    pub word_budget: usize,
    pub model: String,
    pub generate_files: bool,
}

/// Terminal state of a run with its result
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: JobState,
    pub result: JobResult,
    pub error: Option<String>,
}

/// Why a run stopped early
#[derive(Debug)]
enum Abort {
    Provider(ProviderError),
    Store(anyhow::Error),
}

enum LanguageOutcome {
    Finished,
    Cancelled,
}

/// Counters for one language
#[derive(Default)]
struct LanguageTally {
    success_count: usize,
    failures: Vec<(PendingKey, String)>,
    usage: TokenUsage,
}

impl LanguageTally {
    fn failed_items(&self, language_code: &str) -> Vec<FailedItem> {
        self.failures
            .iter()
            .map(|(key, error)| FailedItem {
                key_path: key.key_path.clone(),
                language_code: language_code.to_string(),
                source_text: key.source_text.clone(),
                error: error.clone(),
            })
            .collect()
    }

    fn merge_into(&self, result: &mut JobResult, language_code: &str) {
        result.total_translated += self.success_count;
        result.token_usage.add(self.usage);
        result.failed_items.extend(self.failed_items(language_code));
    }
}

/// De-duplicated target languages, without blanks and the source language
pub fn requested_languages(requested: &[String], source_language: &str) -> Vec<String> {
    let mut languages: Vec<String> = Vec::new();
    for code in requested {
        let code = code.trim();
        if code.is_empty() || language_utils::language_codes_match(code, source_language) {
            continue;
        }
        if !languages.iter().any(|known| language_utils::language_codes_match(known, code)) {
            languages.push(code.to_string());
        }
    }
    languages
}

/// Drives one job from its first language to a terminal state
pub struct JobRunner {
    store: Arc<dyn ProjectStore>,
    provider: Option<Arc<dyn TranslationProvider>>,
    progress: Arc<ProgressStore>,
    settings: RunnerSettings,
    validator: Validator,
    cancel_flag: Arc<AtomicBool>,
}

impl JobRunner {
    /// Runner without a provider; enough for `validate_only` jobs
    pub fn new(
        store: Arc<dyn ProjectStore>,
        progress: Arc<ProgressStore>,
        settings: RunnerSettings,
        cancel_flag: Arc<AtomicBool>,
    ) -> Self {
        let validator = Validator::new(&settings.variable_patterns);
        Self {
            store,
            provider: None,
            progress,
            settings,
            validator,
            cancel_flag,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn TranslationProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }

    fn emit(&self, plan: &JobPlan, language_code: &str, phase: ProgressPhase) {
        let name = language_utils::display_name(language_code);
        debug!("Job {} [{}] {}", plan.job_id, language_code, phase.name());
        self.progress
            .record(&plan.job_id, ProgressEvent::new(language_code, &name, phase));
    }

    /// Run the job to completion
    pub async fn run(&self, plan: &JobPlan) -> RunOutcome {
        let started = Instant::now();
        let mut result = JobResult::default();

        let (state, error) = match self.run_languages(plan, &mut result).await {
            Ok(LanguageOutcome::Finished) => (JobState::Completed, None),
            Ok(LanguageOutcome::Cancelled) => (JobState::Cancelled, None),
            Err(Abort::Provider(e)) => (JobState::Failed, Some(e.to_string())),
            Err(Abort::Store(e)) => (JobState::Failed, Some(format!("Persistence failure: {:#}", e))),
        };

        result.total_failed = result.failed_items.len();
        result.elapsed_secs = started.elapsed().as_secs_f64();

        match &error {
            Some(reason) => error!("Job {} failed: {}", plan.job_id, reason),
            None => info!(
                "Job {} {}: {} translated, {} failed, {} tokens",
                plan.job_id,
                state,
                result.total_translated,
                result.total_failed,
                result.token_usage.total()
            ),
        }

        RunOutcome { state, result, error }
    }

    async fn run_languages(&self, plan: &JobPlan, result: &mut JobResult) -> Result<LanguageOutcome, Abort> {
        let terms = self
            .store
            .get_protected_terms(plan.project.id)
            .await
            .map_err(Abort::Store)?;
        let languages = self.resolve_languages(plan).await.map_err(Abort::Store)?;
        info!(
            "Job {}: {} for {} language(s) of project {}",
            plan.job_id,
            plan.strategy,
            languages.len(),
            plan.project.name
        );

        for language_code in &languages {
            if self.cancelled() {
                info!("Job {} cancelled before {}", plan.job_id, language_code);
                return Ok(LanguageOutcome::Cancelled);
            }

            let outcome = if plan.strategy.calls_provider() {
                self.translate_language(plan, language_code, &terms, result).await?
            } else {
                self.validate_language(plan, language_code, &terms, result).await?
            };

            if let LanguageOutcome::Cancelled = outcome {
                return Ok(outcome);
            }
        }

        Ok(LanguageOutcome::Finished)
    }

    /// Requested languages, or every language with translations or a locale file
    async fn resolve_languages(&self, plan: &JobPlan) -> anyhow::Result<Vec<String>> {
        if !plan.languages.is_empty() {
            return Ok(requested_languages(&plan.languages, &plan.project.source_language));
        }

        let mut known = self.store.known_languages(plan.project.id).await?;
        if let Some(dir) = plan.project.locales_path.as_deref().filter(|d| Path::new(d).is_dir()) {
            known.extend(FileManager::find_locale_files(dir)?.into_iter().map(|(code, _)| code));
        }
        Ok(requested_languages(&known, &plan.project.source_language))
    }

    async fn check_coverage(&self, plan: &JobPlan, language_code: &str) -> Result<(), Abort> {
        self.emit(plan, language_code, ProgressPhase::Checking);
        let counts = self
            .store
            .status_counts(plan.project.id, language_code)
            .await
            .map_err(Abort::Store)?;
        self.emit(
            plan,
            language_code,
            ProgressPhase::Checked {
                total_keys: counts.total_keys,
                translated_keys: counts.translated(),
                missing_keys: counts.missing,
            },
        );
        Ok(())
    }

    fn tasks_found(plan: &JobPlan, keys: &[PendingKey]) -> ProgressPhase {
        let count = |status: TranslationStatus| keys.iter().filter(|k| k.status == status).count();
        ProgressPhase::TasksFound {
            missing_count: count(TranslationStatus::Missing),
            ai_count: count(TranslationStatus::AiTranslated),
            locked_count: count(TranslationStatus::Locked),
            needs_review_count: count(TranslationStatus::NeedsReview),
            total_tasks: keys.len(),
            strategy: plan.strategy.to_string(),
        }
    }

    fn finish_language(
        &self,
        plan: &JobPlan,
        language_code: &str,
        tally: &LanguageTally,
        result: &mut JobResult,
    ) {
        self.emit(
            plan,
            language_code,
            ProgressPhase::Completed {
                success_count: tally.success_count,
                failure_count: tally.failures.len(),
                token_usage: tally.usage,
                failed_items: tally.failed_items(language_code),
            },
        );
        tally.merge_into(result, language_code);
    }

    async fn translate_language(
        &self,
        plan: &JobPlan,
        language_code: &str,
        terms: &[ProtectedTerm],
        result: &mut JobResult,
    ) -> Result<LanguageOutcome, Abort> {
        self.check_coverage(plan, language_code).await?;

        let pending = self
            .store
            .get_pending_keys(plan.project.id, language_code, &plan.strategy.eligible_statuses())
            .await
            .map_err(Abort::Store)?;
        let selected = BatchPlanner::select(&pending, &plan.strategy);

        let mut tally = LanguageTally::default();
        if selected.is_empty() {
            self.emit(
                plan,
                language_code,
                ProgressPhase::NoWork {
                    strategy: plan.strategy.to_string(),
                },
            );
            self.finish_language(plan, language_code, &tally, result);
            self.generate_file(plan, language_code, result).await;
            return Ok(LanguageOutcome::Finished);
        }

        self.emit(plan, language_code, Self::tasks_found(plan, &selected));
        let batches = BatchPlanner::chunk(selected, plan.word_budget);
        let total_batches = batches.len();
        self.emit(
            plan,
            language_code,
            ProgressPhase::Starting {
                total_batches,
                total_keys: batches.iter().map(|b| b.items.len()).sum(),
            },
        );

        for batch in &batches {
            if self.cancelled() {
                info!(
                    "Job {} cancelled at batch {}/{} of {}",
                    plan.job_id, batch.number, total_batches, language_code
                );
                self.finish_language(plan, language_code, &tally, result);
                return Ok(LanguageOutcome::Cancelled);
            }

            let request = self.batch_request(plan, language_code, &batch.items, terms);
            let before = (tally.success_count, tally.failures.len(), tally.usage);

            match self.translate_with_retry(&request).await {
                Ok(response) => {
                    if let Err(e) = self
                        .apply_response(plan, language_code, &batch.items, response, terms, &mut tally)
                        .await
                    {
                        tally.merge_into(result, language_code);
                        return Err(e);
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!("Fatal provider error on {} batch {}: {}", language_code, batch.number, e);
                    Self::fail_all(&mut tally, &batch.items, &e.to_string());
                    tally.merge_into(result, language_code);
                    return Err(Abort::Provider(e));
                }
                Err(e) => {
                    warn!(
                        "Batch {}/{} of {} failed after {} retries: {}",
                        batch.number, total_batches, language_code, self.settings.max_retries, e
                    );
                    Self::fail_all(&mut tally, &batch.items, &e.to_string());
                }
            }

            self.emit(
                plan,
                language_code,
                Self::batch_done(batch, total_batches, &tally, before),
            );
        }

        if !tally.failures.is_empty() {
            if let Err(e) = self.retry_failures(plan, language_code, terms, &mut tally).await {
                tally.merge_into(result, language_code);
                return Err(e);
            }
        }

        self.finish_language(plan, language_code, &tally, result);
        if self.cancelled() {
            return Ok(LanguageOutcome::Cancelled);
        }
        self.generate_file(plan, language_code, result).await;
        Ok(LanguageOutcome::Finished)
    }

    fn batch_done(
        batch: &Batch,
        total_batches: usize,
        tally: &LanguageTally,
        before: (usize, usize, TokenUsage),
    ) -> ProgressPhase {
        ProgressPhase::BatchDone {
            batch_number: batch.number,
            total_batches,
            batch_keys: batch.items.len(),
            success_count: tally.success_count - before.0,
            failure_count: tally.failures.len() - before.1,
            token_usage: TokenUsage {
                prompt_tokens: tally.usage.prompt_tokens - before.2.prompt_tokens,
                completion_tokens: tally.usage.completion_tokens - before.2.completion_tokens,
            },
        }
    }

    /// One consolidated attempt over the language's failed keys.
    ///
    /// Each re-planned batch gets a single provider call; keys that fail again
    /// keep the newest reason.
    async fn retry_failures(
        &self,
        plan: &JobPlan,
        language_code: &str,
        terms: &[ProtectedTerm],
        tally: &mut LanguageTally,
    ) -> Result<(), Abort> {
        let failures = std::mem::take(&mut tally.failures);
        self.emit(
            plan,
            language_code,
            ProgressPhase::Retrying {
                retry_keys_count: failures.len(),
            },
        );
        info!("Retrying {} failed key(s) for {}", failures.len(), language_code);

        let mut previous: HashMap<String, String> = failures
            .iter()
            .map(|(key, error)| (key.key_path.clone(), error.clone()))
            .collect();
        let keys: Vec<PendingKey> = failures.into_iter().map(|(key, _)| key).collect();
        let batches = BatchPlanner::chunk(keys, plan.word_budget);

        for (index, batch) in batches.iter().enumerate() {
            if self.cancelled() {
                Self::keep_previous_failures(tally, &batches[index..], &mut previous);
                return Ok(());
            }

            let request = self.batch_request(plan, language_code, &batch.items, terms);
            let outcome = match self.call_provider(&request).await {
                Ok(response) => {
                    self.apply_response(plan, language_code, &batch.items, response, terms, tally)
                        .await
                }
                Err(e) if e.is_fatal() => {
                    Self::fail_all(tally, &batch.items, &e.to_string());
                    Err(Abort::Provider(e))
                }
                Err(e) => {
                    Self::fail_all(tally, &batch.items, &e.to_string());
                    Ok(())
                }
            };
            if outcome.is_err() {
                Self::keep_previous_failures(tally, &batches[index + 1..], &mut previous);
                return outcome;
            }
        }
        Ok(())
    }

    /// Re-record keys the retry pass never reached with their earlier reason
    fn keep_previous_failures(tally: &mut LanguageTally, batches: &[Batch], previous: &mut HashMap<String, String>) {
        for key in batches.iter().flat_map(|b| &b.items) {
            let error = previous.remove(&key.key_path).unwrap_or_default();
            tally.failures.push((key.clone(), error));
        }
    }

    fn fail_all(tally: &mut LanguageTally, items: &[PendingKey], error: &str) {
        tally
            .failures
            .extend(items.iter().map(|key| (key.clone(), error.to_string())));
    }

    fn batch_request(
        &self,
        plan: &JobPlan,
        language_code: &str,
        items: &[PendingKey],
        terms: &[ProtectedTerm],
    ) -> BatchRequest {
        let protected_terms = terms
            .iter()
            .filter(|term| items.iter().any(|item| term.applies_to(&item.key_path)))
            .cloned()
            .collect();

        BatchRequest {
            items: items
                .iter()
                .map(|key| BatchItem {
                    key_path: key.key_path.clone(),
                    source_text: key.source_text.clone(),
                })
                .collect(),
            protected_terms,
            context: plan.project.translation_context.clone(),
            source_language: plan.project.source_language.clone(),
            target_language: language_code.to_string(),
            model: plan.model.clone(),
        }
    }

    /// Provider call bounded by the configured timeout
    async fn call_provider(&self, request: &BatchRequest) -> Result<BatchResponse, ProviderError> {
        let Some(provider) = &self.provider else {
            return Err(ProviderError::InvalidConfig("No translation provider configured".to_string()));
        };
        match tokio::time::timeout(self.settings.call_timeout, provider.translate_batch(request)).await {
            Ok(response) => response,
            Err(_) => Err(ProviderError::Timeout(self.settings.call_timeout.as_secs())),
        }
    }

    /// Provider call with bounded retries on retryable errors
    async fn translate_with_retry(&self, request: &BatchRequest) -> Result<BatchResponse, ProviderError> {
        let mut attempt: u32 = 0;
        loop {
            match self.call_provider(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.settings.max_retries => {
                    let delay = self.backoff(&e, attempt);
                    warn!(
                        "Provider call failed ({}), retry {}/{} in {:?}",
                        e,
                        attempt + 1,
                        self.settings.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Exponential backoff plus up to 10% random jitter
    fn backoff(&self, error: &ProviderError, attempt: u32) -> Duration {
        let delay = error.backoff_delay(
            attempt,
            self.settings.retry_backoff,
            self.settings.rate_limit_backoff,
            self.settings.max_backoff,
        );
        let jitter_cap = (delay.as_millis() as u64) / 10;
        let jitter = if jitter_cap > 0 {
            rand::rng().random_range(0..=jitter_cap)
        } else {
            0
        };
        delay + Duration::from_millis(jitter)
    }

    /// Validate a response and persist the valid part in one transaction
    async fn apply_response(
        &self,
        plan: &JobPlan,
        language_code: &str,
        items: &[PendingKey],
        response: BatchResponse,
        terms: &[ProtectedTerm],
        tally: &mut LanguageTally,
    ) -> Result<(), Abort> {
        tally.usage.add(response.usage);
        let translated: HashMap<String, String> = response
            .translations
            .into_iter()
            .map(|t| (t.key_path, t.translated_text))
            .collect();

        let mut accepted = Vec::new();
        let mut accepted_keys = Vec::new();
        for key in items {
            let Some(text) = translated.get(&key.key_path) else {
                tally.failures.push((key.clone(), NO_TRANSLATION_RETURNED.to_string()));
                continue;
            };
            let applicable = applicable_terms(terms, &key.key_path);
            match self.validator.validate(&key.source_text, text, &applicable) {
                Validation::Valid => {
                    accepted.push(TranslationUpsert {
                        key_path: key.key_path.clone(),
                        text: text.clone(),
                        status: TranslationStatus::AiTranslated,
                    });
                    accepted_keys.push(key.clone());
                }
                Validation::Invalid { reason } => {
                    debug!("Rejected {} [{}]: {}", key.key_path, language_code, reason);
                    tally.failures.push((key.clone(), reason));
                }
            }
        }

        if accepted.is_empty() {
            return Ok(());
        }
        let written = accepted.len();
        if let Err(e) = self
            .store
            .upsert_translations(plan.project.id, language_code, accepted)
            .await
        {
            // Nothing of the batch was written, so every accepted key failed too
            Self::fail_all(tally, &accepted_keys, &format!("Persistence failure: {:#}", e));
            return Err(Abort::Store(e));
        }
        tally.success_count += written;
        Ok(())
    }

    /// Re-check existing rows without a provider; invalid AI rows are cleared
    async fn validate_language(
        &self,
        plan: &JobPlan,
        language_code: &str,
        terms: &[ProtectedTerm],
        result: &mut JobResult,
    ) -> Result<LanguageOutcome, Abort> {
        self.check_coverage(plan, language_code).await?;

        let rows: Vec<PendingKey> = self
            .store
            .get_pending_keys(plan.project.id, language_code, &plan.strategy.eligible_statuses())
            .await
            .map_err(Abort::Store)?
            .into_iter()
            .filter(|key| key.translated_text.is_some())
            .collect();

        let mut tally = LanguageTally::default();
        if rows.is_empty() {
            self.emit(
                plan,
                language_code,
                ProgressPhase::NoWork {
                    strategy: plan.strategy.to_string(),
                },
            );
            self.finish_language(plan, language_code, &tally, result);
            return Ok(LanguageOutcome::Finished);
        }

        self.emit(plan, language_code, Self::tasks_found(plan, &rows));
        self.emit(
            plan,
            language_code,
            ProgressPhase::Starting {
                total_batches: 1,
                total_keys: rows.len(),
            },
        );

        let mut to_clear = Vec::new();
        for key in &rows {
            let text = key.translated_text.as_deref().unwrap_or_default();
            let applicable = applicable_terms(terms, &key.key_path);
            match self.validator.validate(&key.source_text, text, &applicable) {
                Validation::Valid => tally.success_count += 1,
                Validation::Invalid { reason } => {
                    if key.status == TranslationStatus::AiTranslated {
                        to_clear.push(key.key_path.clone());
                    }
                    tally.failures.push((key.clone(), reason));
                }
            }
        }

        let cleared = if to_clear.is_empty() {
            0
        } else {
            match self
                .store
                .delete_translations(plan.project.id, language_code, to_clear)
                .await
            {
                Ok(cleared) => cleared,
                Err(e) => {
                    tally.success_count = 0;
                    tally.merge_into(result, language_code);
                    return Err(Abort::Store(e));
                }
            }
        };

        self.emit(
            plan,
            language_code,
            ProgressPhase::BatchDone {
                batch_number: 1,
                total_batches: 1,
                batch_keys: rows.len(),
                success_count: tally.success_count,
                failure_count: tally.failures.len(),
                token_usage: TokenUsage::default(),
            },
        );

        result.total_validated += rows.len();
        result.total_cleared += cleared;
        // validation passes are not translations
        let valid = std::mem::take(&mut tally.success_count);
        self.emit(
            plan,
            language_code,
            ProgressPhase::Completed {
                success_count: valid,
                failure_count: tally.failures.len(),
                token_usage: TokenUsage::default(),
                failed_items: tally.failed_items(language_code),
            },
        );
        tally.merge_into(result, language_code);
        if cleared > 0 {
            self.generate_file(plan, language_code, result).await;
        }
        Ok(LanguageOutcome::Finished)
    }

    /// Write `<locales_path>/<code>.json` when exporting
    async fn generate_file(&self, plan: &JobPlan, language_code: &str, result: &mut JobResult) {
        if !plan.generate_files {
            return;
        }
        let Some(dir) = plan.project.locales_path.as_deref() else {
            debug!("Project {} has no locales path, skipping export", plan.project.id);
            return;
        };

        match self.write_locale(plan, dir, language_code).await {
            Ok(path) => {
                let path = path.display().to_string();
                info!("Generated {}", path);
                self.emit(plan, language_code, ProgressPhase::FileGenerated { path: path.clone() });
                result.generated_files.push(path);
            }
            Err(e) => error!("Failed to generate {} file: {:#}", language_code, e),
        }
    }

    async fn write_locale(
        &self,
        plan: &JobPlan,
        dir: &str,
        language_code: &str,
    ) -> anyhow::Result<std::path::PathBuf> {
        let (source, _) = source_file::load_source_file(&plan.project.source_file_path)?;
        let translations = self
            .store
            .language_translations(plan.project.id, language_code)
            .await?;
        source_file::write_locale_file(dir, language_code, &source, &translations)
    }
}
