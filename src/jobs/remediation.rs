/*!
 * Remediation of failed job items.
 *
 * A failed key is resolved by exactly one action:
 * - protect a term, so a later run keeps it verbatim
 * - accept a text as correct, stored as `locked`
 * - route it to the manual worklist as `needs_review`
 *
 * Applying an action removes the item from the job's `failed_items`.
 */

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::models::FailedItem;
use super::store::JobStore;
use crate::database::Repository;
use crate::database::models::{ProtectedTerm, TermCategory, TranslationRecord, TranslationStatus};
use crate::errors::JobError;

/// The three ways to resolve a failed item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RemediationAction {
    ProtectTerm {
        term: String,
        category: TermCategory,
        /// Restrict the term to the failed key instead of the whole project
        #[serde(default)]
        scope_to_key: bool,
    },
    AcceptAsCorrect {
        text: String,
    },
    RouteToManual {
        /// Draft shown to the reviewer; the source text when absent
        #[serde(default)]
        draft: Option<String>,
    },
}

/// Remediation actions and the manual translation worklist
#[derive(Debug, Clone)]
pub struct Remediation {
    repository: Repository,
    jobs: Arc<JobStore>,
}

impl Remediation {
    pub fn new(repository: Repository, jobs: Arc<JobStore>) -> Self {
        Self { repository, jobs }
    }

    /// Add a protected term for a later re-run
    pub async fn protect_term(
        &self,
        project_id: i64,
        term: &str,
        category: TermCategory,
        key_scope: Option<&str>,
    ) -> Result<ProtectedTerm> {
        let scopes = key_scope.map(|k| vec![k.to_string()]).unwrap_or_default();
        self.repository
            .add_protected_term(project_id, term, category, false, scopes)
            .await
    }

    /// Store a text as a confirmed translation
    pub async fn accept_as_correct(
        &self,
        project_id: i64,
        key_path: &str,
        language_code: &str,
        text: &str,
    ) -> Result<()> {
        self.repository
            .set_manual_translation(project_id, key_path, language_code, text, TranslationStatus::Locked)
            .await
    }

    /// Put a key on the manual worklist
    pub async fn route_to_manual(
        &self,
        project_id: i64,
        key_path: &str,
        language_code: &str,
        text: &str,
    ) -> Result<()> {
        self.repository
            .set_manual_translation(project_id, key_path, language_code, text, TranslationStatus::NeedsReview)
            .await
    }

    async fn apply(&self, project_id: i64, item: &FailedItem, action: &RemediationAction) -> Result<()> {
        match action {
            RemediationAction::ProtectTerm {
                term,
                category,
                scope_to_key,
            } => {
                let scope = scope_to_key.then_some(item.key_path.as_str());
                self.protect_term(project_id, term, *category, scope).await?;
            }
            RemediationAction::AcceptAsCorrect { text } => {
                self.accept_as_correct(project_id, &item.key_path, &item.language_code, text)
                    .await?;
            }
            RemediationAction::RouteToManual { draft } => {
                let text = draft.as_deref().unwrap_or(&item.source_text);
                self.route_to_manual(project_id, &item.key_path, &item.language_code, text)
                    .await?;
            }
        }
        Ok(())
    }

    /// Resolve one failed item of a finished job
    pub async fn remediate(
        &self,
        job_id: &str,
        key_path: &str,
        language_code: &str,
        action: RemediationAction,
    ) -> Result<(), JobError> {
        let record = self
            .jobs
            .get(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        let item = record
            .result
            .as_ref()
            .and_then(|r| {
                r.failed_items
                    .iter()
                    .find(|i| i.key_path == key_path && i.language_code == language_code)
            })
            .cloned()
            .ok_or_else(|| {
                JobError::InvalidRequest(format!(
                    "Job {} has no failed item {} [{}]",
                    job_id, key_path, language_code
                ))
            })?;

        self.apply(record.project_id, &item, &action)
            .await
            .with_context(|| format!("Failed to remediate {} [{}]", key_path, language_code))?;

        self.jobs.update_result(job_id, |result| {
            result.remove_failed_items(&[(item.key_path.clone(), item.language_code.clone())]);
        })?;
        info!("Remediated {} [{}] of job {}", key_path, language_code, job_id);
        Ok(())
    }

    /// Manual edit; `locked` unless another status is given
    pub async fn set_manual_translation(
        &self,
        project_id: i64,
        key_path: &str,
        language_code: &str,
        text: &str,
        status: Option<TranslationStatus>,
    ) -> Result<()> {
        self.repository
            .set_manual_translation(
                project_id,
                key_path,
                language_code,
                text,
                status.unwrap_or(TranslationStatus::Locked),
            )
            .await
    }

    pub async fn list_locked(&self, project_id: i64, language_code: &str) -> Result<Vec<TranslationRecord>> {
        self.repository
            .list_translations(project_id, language_code, &[TranslationStatus::Locked])
            .await
    }

    /// The manual worklist of a language
    pub async fn list_needs_review(&self, project_id: i64, language_code: &str) -> Result<Vec<TranslationRecord>> {
        self.repository
            .list_translations(project_id, language_code, &[TranslationStatus::NeedsReview])
            .await
    }

    pub async fn delete_translation(&self, project_id: i64, key_path: &str, language_code: &str) -> Result<bool> {
        let removed = self
            .repository
            .delete_translations(project_id, language_code, vec![key_path.to_string()])
            .await?;
        Ok(removed > 0)
    }
}
