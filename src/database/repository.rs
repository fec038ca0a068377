/*!
 * Repository layer for database operations.
 *
 * This module provides a high-level API for all database operations,
 * abstracting away the SQL details and providing type-safe access.
 */

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

use super::connection::DatabaseConnection;
use super::models::{
    ImportMode, KeyRecord, NewProject, PendingKey, ProjectRecord, ProtectedTerm, StatusCounts,
    TermCategory, TranslationRecord, TranslationStatus, TranslationUpsert, ValueType,
};
use crate::source_file::SourceMap;
use crate::sync::differ::DiffResult;

const PROJECT_COLUMNS: &str = "id, name, source_language, source_file_path, locales_path, translation_context, \
     import_mode, translation_provider, chunk_size_words, created_at, updated_at, last_synced_at";

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Repository for database operations
#[derive(Clone, Debug)]
pub struct Repository {
    /// Database connection
    db: DatabaseConnection,
}

impl Repository {
    /// Create a new repository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a repository with the default database location
    pub fn new_default() -> Result<Self> {
        let db = DatabaseConnection::new_default()?;
        Ok(Self::new(db))
    }

    /// Create a repository with an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let db = DatabaseConnection::new_in_memory()?;
        Ok(Self::new(db))
    }

    /// Underlying connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    // =========================================================================
    // Project Operations
    // =========================================================================

    fn map_project(row: &Row) -> rusqlite::Result<ProjectRecord> {
        Ok(ProjectRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            source_language: row.get(2)?,
            source_file_path: row.get(3)?,
            locales_path: row.get(4)?,
            translation_context: row.get(5)?,
            import_mode: row
                .get::<_, String>(6)?
                .parse()
                .unwrap_or(ImportMode::Retranslate),
            translation_provider: row.get(7)?,
            chunk_size_words: row.get::<_, Option<i64>>(8)?.map(|n| n.max(0) as usize),
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            last_synced_at: row.get(11)?,
        })
    }

    /// Create a new project
    pub async fn create_project(&self, project: &NewProject) -> Result<ProjectRecord> {
        let project = project.clone();

        self.db
            .execute_async(move |conn| {
                let now = now();
                conn.execute(
                    r#"
                    INSERT INTO projects (
                        name, source_language, source_file_path, locales_path, translation_context,
                        import_mode, translation_provider, chunk_size_words, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                    "#,
                    params![
                        project.name,
                        project.source_language,
                        project.source_file_path,
                        project.locales_path,
                        project.translation_context,
                        project.import_mode.to_string(),
                        project.translation_provider,
                        project.chunk_size_words.map(|n| n as i64),
                        now,
                    ],
                )
                .with_context(|| format!("Failed to create project '{}'", project.name))?;

                let id = conn.last_insert_rowid();
                Self::get_project_sync(conn, id)?
                    .ok_or_else(|| anyhow!("Project {} vanished after insert", id))
            })
            .await
    }

    /// Get a project by ID (synchronous version for use within transactions)
    fn get_project_sync(conn: &Connection, project_id: i64) -> Result<Option<ProjectRecord>> {
        let sql = format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS);
        Ok(conn
            .query_row(&sql, [project_id], Self::map_project)
            .optional()?)
    }

    /// Get a project by ID
    pub async fn get_project(&self, project_id: i64) -> Result<Option<ProjectRecord>> {
        self.db
            .execute_async(move |conn| Self::get_project_sync(conn, project_id))
            .await
    }

    /// Get a project by its unique name
    pub async fn find_project_by_name(&self, name: &str) -> Result<Option<ProjectRecord>> {
        let name = name.to_string();

        self.db
            .execute_async(move |conn| {
                let sql = format!("SELECT {} FROM projects WHERE name = ?1", PROJECT_COLUMNS);
                Ok(conn.query_row(&sql, [name], Self::map_project).optional()?)
            })
            .await
    }

    /// List all projects ordered by name
    pub async fn list_projects(&self) -> Result<Vec<ProjectRecord>> {
        self.db
            .execute_async(|conn| {
                let sql = format!("SELECT {} FROM projects ORDER BY name", PROJECT_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], Self::map_project)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
    }

    /// Delete a project with its keys, translations and protected terms
    pub async fn delete_project(&self, project_id: i64) -> Result<bool> {
        self.db
            .execute_async(move |conn| {
                let deleted = conn.execute("DELETE FROM projects WHERE id = ?1", [project_id])?;
                Ok(deleted > 0)
            })
            .await
    }

    // =========================================================================
    // Key Operations
    // =========================================================================

    /// Stored source texts by key path
    pub async fn stored_sources(&self, project_id: i64) -> Result<HashMap<String, String>> {
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT key_path, source_text FROM translation_keys WHERE project_id = ?1",
                )?;
                let rows = stmt.query_map([project_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
                Ok(rows.collect::<rusqlite::Result<HashMap<_, _>>>()?)
            })
            .await
    }

    /// All keys of a project in source order
    pub async fn list_keys(&self, project_id: i64) -> Result<Vec<KeyRecord>> {
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, project_id, key_path, source_text, source_hash, page,
                           value_type, should_translate, sort_order
                    FROM translation_keys WHERE project_id = ?1
                    ORDER BY sort_order, id
                    "#,
                )?;
                let rows = stmt.query_map([project_id], |row| {
                    Ok(KeyRecord {
                        id: row.get(0)?,
                        project_id: row.get(1)?,
                        key_path: row.get(2)?,
                        source_text: row.get(3)?,
                        source_hash: row.get(4)?,
                        page: row.get(5)?,
                        value_type: row
                            .get::<_, String>(6)?
                            .parse()
                            .unwrap_or(ValueType::String),
                        should_translate: row.get(7)?,
                        sort_order: row.get(8)?,
                    })
                })?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
    }

    fn key_id(conn: &Connection, project_id: i64, key_path: &str) -> Result<Option<i64>> {
        Ok(conn
            .query_row(
                "SELECT id FROM translation_keys WHERE project_id = ?1 AND key_path = ?2",
                params![project_id, key_path],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Persist a sync outcome in one transaction.
    ///
    /// Deleted keys lose their translations first. For updated keys, locked
    /// translations become `needs_review` and AI translations are dropped so
    /// the next job picks them up again.
    pub async fn apply_sync(&self, project_id: i64, source: SourceMap, diff: DiffResult) -> Result<()> {
        self.db
            .transaction_async(move |tx| {
                let now = now();

                for key_path in &diff.deleted {
                    if let Some(key_id) = Self::key_id(tx, project_id, key_path)? {
                        tx.execute("DELETE FROM translations WHERE key_id = ?1", [key_id])?;
                        tx.execute("DELETE FROM translation_keys WHERE id = ?1", [key_id])?;
                    }
                }

                for key_path in &diff.added {
                    let Some(entry) = source.get(key_path) else {
                        continue;
                    };
                    tx.execute(
                        r#"
                        INSERT INTO translation_keys (
                            project_id, key_path, source_text, source_hash, page,
                            value_type, should_translate, sort_order
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                        "#,
                        params![
                            project_id,
                            entry.key_path,
                            entry.text,
                            entry.source_hash(),
                            entry.page(),
                            entry.value_type.to_string(),
                            entry.should_translate,
                            entry.sort_order,
                        ],
                    )?;
                }

                for key_path in &diff.updated {
                    let Some(entry) = source.get(key_path) else {
                        continue;
                    };
                    let key_id = Self::key_id(tx, project_id, key_path)?
                        .ok_or_else(|| anyhow!("Updated key not found: {}", key_path))?;

                    tx.execute(
                        r#"
                        UPDATE translation_keys
                        SET source_text = ?2, source_hash = ?3, value_type = ?4, should_translate = ?5
                        WHERE id = ?1
                        "#,
                        params![
                            key_id,
                            entry.text,
                            entry.source_hash(),
                            entry.value_type.to_string(),
                            entry.should_translate,
                        ],
                    )?;

                    tx.execute(
                        "UPDATE translations SET status = 'needs_review', updated_at = ?2 WHERE key_id = ?1 AND status = 'locked'",
                        params![key_id, now],
                    )?;

                    tx.execute(
                        "DELETE FROM translations WHERE key_id = ?1 AND status = 'ai_translated'",
                        [key_id],
                    )?;
                }

                // Order follows the latest source file
                for entry in source.entries() {
                    tx.execute(
                        "UPDATE translation_keys SET sort_order = ?3 WHERE project_id = ?1 AND key_path = ?2",
                        params![project_id, entry.key_path, entry.sort_order],
                    )?;
                }

                tx.execute(
                    "UPDATE projects SET last_synced_at = ?2, updated_at = ?2 WHERE id = ?1",
                    params![project_id, now],
                )?;

                debug!(
                    "Applied sync for project {}: {} added, {} updated, {} deleted",
                    project_id,
                    diff.added.len(),
                    diff.updated.len(),
                    diff.deleted.len()
                );
                Ok(())
            })
            .await
    }

    // =========================================================================
    // Translation Operations
    // =========================================================================

    /// Translatable keys whose status for `language_code` is one of `statuses`
    pub async fn get_pending_keys(
        &self,
        project_id: i64,
        language_code: &str,
        statuses: &[TranslationStatus],
    ) -> Result<Vec<PendingKey>> {
        let language_code = language_code.to_string();
        let statuses = statuses.to_vec();

        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT k.key_path, k.source_text, t.status, t.translated_text
                    FROM translation_keys k
                    LEFT JOIN translations t ON t.key_id = k.id AND t.language_code = ?2
                    WHERE k.project_id = ?1 AND k.should_translate = 1
                    ORDER BY k.sort_order, k.id
                    "#,
                )?;
                let rows = stmt.query_map(params![project_id, language_code], |row| {
                    let status: Option<String> = row.get(2)?;
                    Ok(PendingKey {
                        key_path: row.get(0)?,
                        source_text: row.get(1)?,
                        status: status
                            .and_then(|s| s.parse().ok())
                            .unwrap_or(TranslationStatus::Missing),
                        translated_text: row.get(3)?,
                    })
                })?;

                let mut pending = Vec::new();
                for row in rows {
                    let key = row?;
                    if statuses.contains(&key.status) {
                        pending.push(key);
                    }
                }
                Ok(pending)
            })
            .await
    }

    fn upsert_sync(
        conn: &Connection,
        project_id: i64,
        language_code: &str,
        entry: &TranslationUpsert,
        now: &str,
    ) -> Result<()> {
        let key_id = Self::key_id(conn, project_id, &entry.key_path)?
            .ok_or_else(|| anyhow!("Unknown key: {}", entry.key_path))?;

        if entry.status == TranslationStatus::Missing {
            conn.execute(
                "DELETE FROM translations WHERE key_id = ?1 AND language_code = ?2",
                params![key_id, language_code],
            )?;
            return Ok(());
        }

        conn.execute(
            r#"
            INSERT INTO translations (key_id, language_code, translated_text, status, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(key_id, language_code) DO UPDATE SET
                translated_text = excluded.translated_text,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
            params![key_id, language_code, entry.text, entry.status.to_string(), now],
        )?;
        Ok(())
    }

    /// Write a group of translations atomically
    pub async fn upsert_translations(
        &self,
        project_id: i64,
        language_code: &str,
        entries: Vec<TranslationUpsert>,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let language_code = language_code.to_string();

        self.db
            .transaction_async(move |tx| {
                let now = now();
                for entry in &entries {
                    Self::upsert_sync(tx, project_id, &language_code, entry, &now)?;
                }
                debug!(
                    "Upserted {} translations for project {} ({})",
                    entries.len(),
                    project_id,
                    language_code
                );
                Ok(())
            })
            .await
    }

    /// Delete translations of the given keys, returns the number of rows removed
    pub async fn delete_translations(
        &self,
        project_id: i64,
        language_code: &str,
        key_paths: Vec<String>,
    ) -> Result<usize> {
        let language_code = language_code.to_string();

        self.db
            .transaction_async(move |tx| {
                let mut removed = 0;
                for key_path in &key_paths {
                    removed += tx.execute(
                        r#"
                        DELETE FROM translations
                        WHERE language_code = ?2
                          AND key_id = (SELECT id FROM translation_keys WHERE project_id = ?1 AND key_path = ?3)
                        "#,
                        params![project_id, language_code, key_path],
                    )?;
                }
                Ok(removed)
            })
            .await
    }

    /// Translations of one language, optionally restricted to some statuses
    pub async fn list_translations(
        &self,
        project_id: i64,
        language_code: &str,
        statuses: &[TranslationStatus],
    ) -> Result<Vec<TranslationRecord>> {
        let language_code = language_code.to_string();
        let statuses = statuses.to_vec();

        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT k.key_path, t.language_code, t.translated_text, t.status, t.updated_at
                    FROM translations t
                    JOIN translation_keys k ON k.id = t.key_id
                    WHERE k.project_id = ?1 AND t.language_code = ?2
                    ORDER BY k.sort_order, k.id
                    "#,
                )?;
                let rows = stmt.query_map(params![project_id, language_code], |row| {
                    Ok(TranslationRecord {
                        key_path: row.get(0)?,
                        language_code: row.get(1)?,
                        translated_text: row.get(2)?,
                        status: row
                            .get::<_, String>(3)?
                            .parse()
                            .unwrap_or(TranslationStatus::AiTranslated),
                        updated_at: row.get(4)?,
                    })
                })?;

                let mut records = Vec::new();
                for row in rows {
                    let record = row?;
                    if statuses.is_empty() || statuses.contains(&record.status) {
                        records.push(record);
                    }
                }
                Ok(records)
            })
            .await
    }

    /// Translated texts of one language by key path
    pub async fn language_translations(
        &self,
        project_id: i64,
        language_code: &str,
    ) -> Result<HashMap<String, String>> {
        let records = self.list_translations(project_id, language_code, &[]).await?;
        Ok(records
            .into_iter()
            .map(|r| (r.key_path, r.translated_text))
            .collect())
    }

    /// Coverage of one language
    pub async fn status_counts(&self, project_id: i64, language_code: &str) -> Result<StatusCounts> {
        let language_code = language_code.to_string();

        self.db
            .execute_async(move |conn| {
                let total: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM translation_keys WHERE project_id = ?1 AND should_translate = 1",
                    [project_id],
                    |row| row.get(0),
                )?;

                let mut counts = StatusCounts {
                    total_keys: total as usize,
                    ..Default::default()
                };

                let mut stmt = conn.prepare(
                    r#"
                    SELECT t.status, COUNT(*)
                    FROM translations t
                    JOIN translation_keys k ON k.id = t.key_id
                    WHERE k.project_id = ?1 AND k.should_translate = 1 AND t.language_code = ?2
                    GROUP BY t.status
                    "#,
                )?;
                let rows = stmt.query_map(params![project_id, language_code], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                for row in rows {
                    let (status, count) = row?;
                    match status.parse::<TranslationStatus>() {
                        Ok(TranslationStatus::AiTranslated) => counts.ai_translated = count as usize,
                        Ok(TranslationStatus::Locked) => counts.locked = count as usize,
                        Ok(TranslationStatus::NeedsReview) => counts.needs_review = count as usize,
                        _ => {}
                    }
                }
                counts.missing = counts.total_keys.saturating_sub(counts.translated());
                Ok(counts)
            })
            .await
    }

    /// Languages that have at least one translation row
    pub async fn known_languages(&self, project_id: i64) -> Result<Vec<String>> {
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT DISTINCT t.language_code
                    FROM translations t
                    JOIN translation_keys k ON k.id = t.key_id
                    WHERE k.project_id = ?1
                    ORDER BY t.language_code
                    "#,
                )?;
                let rows = stmt.query_map([project_id], |row| row.get(0))?;
                Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
            })
            .await
    }

    /// Write one translation on behalf of a human.
    ///
    /// This is the only path besides a `full` job with `include_locked` that
    /// may replace a locked row.
    pub async fn set_manual_translation(
        &self,
        project_id: i64,
        key_path: &str,
        language_code: &str,
        text: &str,
        status: TranslationStatus,
    ) -> Result<()> {
        let project = self
            .get_project(project_id)
            .await?
            .ok_or_else(|| anyhow!("Project not found: {}", project_id))?;
        if crate::language_utils::language_codes_match(&project.source_language, language_code) {
            bail!("Cannot store a translation in the source language ({})", language_code);
        }
        if status == TranslationStatus::Missing {
            bail!("Use delete_translation to clear a translation");
        }

        let language_code = language_code.to_string();
        let entry = TranslationUpsert {
            key_path: key_path.to_string(),
            text: text.to_string(),
            status,
        };

        self.db
            .transaction_async(move |tx| Self::upsert_sync(tx, project_id, &language_code, &entry, &now()))
            .await
    }

    // =========================================================================
    // Protected Term Operations
    // =========================================================================

    fn map_term(row: &Row) -> rusqlite::Result<ProtectedTerm> {
        let scopes: String = row.get(5)?;
        Ok(ProtectedTerm {
            id: row.get(0)?,
            project_id: row.get(1)?,
            term: row.get(2)?,
            category: row
                .get::<_, String>(3)?
                .parse()
                .unwrap_or(TermCategory::Brand),
            is_regex: row.get(4)?,
            key_scopes: serde_json::from_str(&scopes).unwrap_or_default(),
        })
    }

    fn get_terms_sync(conn: &Connection, project_id: i64) -> Result<Vec<ProtectedTerm>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, project_id, term, category, is_regex, key_scopes
            FROM protected_terms WHERE project_id = ?1
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([project_id], Self::map_term)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// All protected terms of a project
    pub async fn list_protected_terms(&self, project_id: i64) -> Result<Vec<ProtectedTerm>> {
        self.db
            .execute_async(move |conn| Self::get_terms_sync(conn, project_id))
            .await
    }

    /// Add a protected term, or widen the scopes of an existing one.
    ///
    /// Scopes merge by union; a term that is global on either side stays global.
    pub async fn add_protected_term(
        &self,
        project_id: i64,
        term: &str,
        category: TermCategory,
        is_regex: bool,
        key_scopes: Vec<String>,
    ) -> Result<ProtectedTerm> {
        let term = term.trim().to_string();
        if term.is_empty() {
            bail!("Protected term must not be empty");
        }
        if is_regex {
            regex::Regex::new(&term).with_context(|| format!("Invalid term pattern: {}", term))?;
        }

        self.db
            .transaction_async(move |tx| {
                let existing: Option<(i64, String)> = tx
                    .query_row(
                        "SELECT id, key_scopes FROM protected_terms WHERE project_id = ?1 AND term = ?2",
                        params![project_id, term],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;

                let id = match existing {
                    Some((id, stored)) => {
                        let stored: Vec<String> = serde_json::from_str(&stored).unwrap_or_default();
                        let merged = if stored.is_empty() || key_scopes.is_empty() {
                            Vec::new()
                        } else {
                            let mut merged = stored;
                            for scope in key_scopes {
                                if !merged.contains(&scope) {
                                    merged.push(scope);
                                }
                            }
                            merged
                        };
                        tx.execute(
                            "UPDATE protected_terms SET category = ?2, is_regex = ?3, key_scopes = ?4 WHERE id = ?1",
                            params![id, category.to_string(), is_regex, serde_json::to_string(&merged)?],
                        )?;
                        id
                    }
                    None => {
                        tx.execute(
                            r#"
                            INSERT INTO protected_terms (project_id, term, category, is_regex, key_scopes, created_at)
                            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                            "#,
                            params![
                                project_id,
                                term,
                                category.to_string(),
                                is_regex,
                                serde_json::to_string(&key_scopes)?,
                                now(),
                            ],
                        )?;
                        tx.last_insert_rowid()
                    }
                };

                Ok(tx.query_row(
                    "SELECT id, project_id, term, category, is_regex, key_scopes FROM protected_terms WHERE id = ?1",
                    [id],
                    Self::map_term,
                )?)
            })
            .await
    }

    /// Remove a protected term
    pub async fn remove_protected_term(&self, project_id: i64, term_id: i64) -> Result<bool> {
        self.db
            .execute_async(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM protected_terms WHERE project_id = ?1 AND id = ?2",
                    params![project_id, term_id],
                )?;
                Ok(removed > 0)
            })
            .await
    }
}
