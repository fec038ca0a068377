/*!
 * Synchronises a project's stored keys with its source language pack.
 */

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::path::Path;

use super::differ::KeyDiffer;
use crate::database::Repository;
use crate::database::models::{ImportMode, TranslationStatus, TranslationUpsert};
use crate::file_utils::FileManager;
use crate::language_utils;
use crate::source_file;

/// Counts of a finished sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

/// Outcome of importing one existing locale file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub language_code: String,
    /// Keys taken over from the file as locked translations
    pub imported: usize,
    /// Translatable keys the file has no text for
    pub missing: usize,
    pub total: usize,
}

impl ImportReport {
    /// Share of translatable keys covered by the file, in percent
    pub fn completeness(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.imported as f64 / self.total as f64 * 100.0
    }
}

/// Applies source changes to the store
#[derive(Clone, Debug)]
pub struct SyncService {
    repository: Repository,
}

impl SyncService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Re-read the project's source file and persist the differences
    pub async fn sync_project(&self, project_id: i64) -> Result<SyncReport> {
        let project = self
            .repository
            .get_project(project_id)
            .await?
            .ok_or_else(|| anyhow!("Project not found: {}", project_id))?;

        let (_, source) = source_file::load_source_file(Path::new(&project.source_file_path))?;
        let existing = self.repository.stored_sources(project_id).await?;
        let diff = KeyDiffer::diff(&existing, &source);

        let report = SyncReport {
            added: diff.added.len(),
            updated: diff.updated.len(),
            deleted: diff.deleted.len(),
            unchanged: diff.unchanged.len(),
        };

        self.repository
            .apply_sync(project_id, source, diff)
            .await?;

        info!(
            "Synced project '{}': {} added, {} updated, {} deleted, {} unchanged",
            project.name, report.added, report.updated, report.deleted, report.unchanged
        );
        Ok(report)
    }

    /// Take over the translations already present in the locales directory.
    ///
    /// Only `Merge` projects import. Every `<code>.json` next to the source
    /// other than the source language is flattened, and each translatable key
    /// it holds a non-empty string for is stored as `locked`. Unreadable
    /// files are skipped with a warning.
    pub async fn import_existing_translations(&self, project_id: i64) -> Result<Vec<ImportReport>> {
        let project = self
            .repository
            .get_project(project_id)
            .await?
            .ok_or_else(|| anyhow!("Project not found: {}", project_id))?;

        let Some(locales_path) = project.locales_path.as_deref() else {
            return Ok(Vec::new());
        };
        let files = FileManager::find_locale_files(locales_path)?;
        if project.import_mode != ImportMode::Merge {
            if !files.is_empty() {
                info!(
                    "Project '{}' retranslates, ignoring {} existing locale files",
                    project.name,
                    files.len()
                );
            }
            return Ok(Vec::new());
        }

        let keys: Vec<_> = self
            .repository
            .list_keys(project_id)
            .await?
            .into_iter()
            .filter(|k| k.should_translate)
            .collect();

        let mut reports = Vec::new();
        for (code, path) in files {
            if language_utils::language_codes_match(&code, &project.source_language) {
                continue;
            }
            let Ok(language_code) = language_utils::validate_language_code(&code) else {
                debug!("Skipping {:?}: not a language file", path);
                continue;
            };
            let existing = match source_file::load_source_file(&path) {
                Ok((_, map)) => map,
                Err(e) => {
                    warn!("Skipping {:?}: {:#}", path, e);
                    continue;
                }
            };

            let rows: Vec<TranslationUpsert> = keys
                .iter()
                .filter_map(|key| {
                    let entry = existing.get(&key.key_path)?;
                    entry.should_translate.then(|| TranslationUpsert {
                        key_path: key.key_path.clone(),
                        text: entry.text.clone(),
                        status: TranslationStatus::Locked,
                    })
                })
                .collect();

            let report = ImportReport {
                language_code: language_code.clone(),
                imported: rows.len(),
                missing: keys.len() - rows.len(),
                total: keys.len(),
            };
            self.repository
                .upsert_translations(project_id, &language_code, rows)
                .await?;

            info!(
                "Imported {} ({}/{} keys, {:.1}% complete)",
                language_code,
                report.imported,
                report.total,
                report.completeness()
            );
            reports.push(report);
        }
        Ok(reports)
    }
}
