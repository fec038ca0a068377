/*!
 * Persistence seam consumed by the translation pipeline.
 *
 * The job runner only talks to a `ProjectStore`, so it can run against the
 * SQLite repository in production and against wrappers in tests.
 */

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use super::models::{PendingKey, ProjectRecord, ProtectedTerm, StatusCounts, TranslationStatus, TranslationUpsert};
use super::repository::Repository;

/// Store operations needed by a translation job
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_project(&self, project_id: i64) -> Result<Option<ProjectRecord>>;

    /// Translatable keys of a language whose status is in `statuses`, in source order
    async fn get_pending_keys(
        &self,
        project_id: i64,
        language_code: &str,
        statuses: &[TranslationStatus],
    ) -> Result<Vec<PendingKey>>;

    /// Write all entries in one transaction
    async fn upsert_translations(
        &self,
        project_id: i64,
        language_code: &str,
        entries: Vec<TranslationUpsert>,
    ) -> Result<()>;

    async fn get_protected_terms(&self, project_id: i64) -> Result<Vec<ProtectedTerm>>;

    async fn status_counts(&self, project_id: i64, language_code: &str) -> Result<StatusCounts>;

    /// Languages that already have translations
    async fn known_languages(&self, project_id: i64) -> Result<Vec<String>>;

    async fn delete_translations(
        &self,
        project_id: i64,
        language_code: &str,
        key_paths: Vec<String>,
    ) -> Result<usize>;

    /// Translated texts by key path, used for file generation
    async fn language_translations(
        &self,
        project_id: i64,
        language_code: &str,
    ) -> Result<HashMap<String, String>>;
}

#[async_trait]
impl ProjectStore for Repository {
    async fn get_project(&self, project_id: i64) -> Result<Option<ProjectRecord>> {
        Repository::get_project(self, project_id).await
    }

    async fn get_pending_keys(
        &self,
        project_id: i64,
        language_code: &str,
        statuses: &[TranslationStatus],
    ) -> Result<Vec<PendingKey>> {
        Repository::get_pending_keys(self, project_id, language_code, statuses).await
    }

    async fn upsert_translations(
        &self,
        project_id: i64,
        language_code: &str,
        entries: Vec<TranslationUpsert>,
    ) -> Result<()> {
        Repository::upsert_translations(self, project_id, language_code, entries).await
    }

    async fn get_protected_terms(&self, project_id: i64) -> Result<Vec<ProtectedTerm>> {
        self.list_protected_terms(project_id).await
    }

    async fn status_counts(&self, project_id: i64, language_code: &str) -> Result<StatusCounts> {
        Repository::status_counts(self, project_id, language_code).await
    }

    async fn known_languages(&self, project_id: i64) -> Result<Vec<String>> {
        Repository::known_languages(self, project_id).await
    }

    async fn delete_translations(
        &self,
        project_id: i64,
        language_code: &str,
        key_paths: Vec<String>,
    ) -> Result<usize> {
        Repository::delete_translations(self, project_id, language_code, key_paths).await
    }

    async fn language_translations(
        &self,
        project_id: i64,
        language_code: &str,
    ) -> Result<HashMap<String, String>> {
        Repository::language_translations(self, project_id, language_code).await
    }
}
