/*!
 * Database entity models and DTOs.
 *
 * These structures map directly to database tables and provide
 * type-safe access to persisted data.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a sync treats AI translations whose source text changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Stale AI translations are dropped so they become missing again
    #[default]
    Retranslate,
    /// Stale AI translations are kept and stay eligible under `missing_and_ai`
    Merge,
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportMode::Retranslate => write!(f, "retranslate"),
            ImportMode::Merge => write!(f, "merge"),
        }
    }
}

impl std::str::FromStr for ImportMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "retranslate" => Ok(ImportMode::Retranslate),
            "merge" => Ok(ImportMode::Merge),
            _ => Err(anyhow::anyhow!("Invalid import mode: {}", s)),
        }
    }
}

/// Status of one (key, language) translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationStatus {
    /// No translation row exists
    Missing,
    /// Written by a translation job
    AiTranslated,
    /// Confirmed by a human, never overwritten implicitly
    Locked,
    /// Source changed under a locked row, or routed to the manual worklist
    NeedsReview,
}

impl fmt::Display for TranslationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslationStatus::Missing => write!(f, "missing"),
            TranslationStatus::AiTranslated => write!(f, "ai_translated"),
            TranslationStatus::Locked => write!(f, "locked"),
            TranslationStatus::NeedsReview => write!(f, "needs_review"),
        }
    }
}

impl std::str::FromStr for TranslationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "missing" => Ok(TranslationStatus::Missing),
            "ai_translated" => Ok(TranslationStatus::AiTranslated),
            "locked" => Ok(TranslationStatus::Locked),
            "needs_review" => Ok(TranslationStatus::NeedsReview),
            _ => Err(anyhow::anyhow!("Invalid translation status: {}", s)),
        }
    }
}

/// Protected term category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TermCategory {
    #[default]
    Brand,
    Technical,
    Url,
    Code,
}

impl fmt::Display for TermCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermCategory::Brand => write!(f, "brand"),
            TermCategory::Technical => write!(f, "technical"),
            TermCategory::Url => write!(f, "url"),
            TermCategory::Code => write!(f, "code"),
        }
    }
}

impl std::str::FromStr for TermCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "brand" => Ok(TermCategory::Brand),
            "technical" => Ok(TermCategory::Technical),
            "url" => Ok(TermCategory::Url),
            "code" => Ok(TermCategory::Code),
            _ => Err(anyhow::anyhow!("Invalid term category: {}", s)),
        }
    }
}

/// JSON type of a source value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Null,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::String => write!(f, "string"),
            ValueType::Number => write!(f, "number"),
            ValueType::Boolean => write!(f, "boolean"),
            ValueType::Null => write!(f, "null"),
        }
    }
}

impl std::str::FromStr for ValueType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(ValueType::String),
            "number" => Ok(ValueType::Number),
            "boolean" => Ok(ValueType::Boolean),
            "null" => Ok(ValueType::Null),
            _ => Err(anyhow::anyhow!("Invalid value type: {}", s)),
        }
    }
}

/// Project record from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: i64,
    pub name: String,
    pub source_language: String,
    /// Source language pack (JSON)
    pub source_file_path: String,
    /// Directory receiving generated `<code>.json` files
    pub locales_path: Option<String>,
    /// Free text added to every prompt
    pub translation_context: Option<String>,
    pub import_mode: ImportMode,
    /// Project default provider reference (`provider` or `provider:model`)
    pub translation_provider: Option<String>,
    /// Project default word budget
    pub chunk_size_words: Option<usize>,
    pub created_at: String,
    pub updated_at: String,
    pub last_synced_at: Option<String>,
}

/// Data required to create a project
#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub name: String,
    pub source_language: String,
    pub source_file_path: String,
    pub locales_path: Option<String>,
    pub translation_context: Option<String>,
    pub import_mode: ImportMode,
    pub translation_provider: Option<String>,
    pub chunk_size_words: Option<usize>,
}

/// Translation key record from database
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRecord {
    pub id: i64,
    pub project_id: i64,
    pub key_path: String,
    pub source_text: String,
    /// SHA-256 of `source_text`, hex encoded
    pub source_hash: String,
    /// First path segment
    pub page: String,
    pub value_type: ValueType,
    pub should_translate: bool,
    pub sort_order: i64,
}

/// Translation row joined with its key path
#[derive(Debug, Clone, Serialize)]
pub struct TranslationRecord {
    pub key_path: String,
    pub language_code: String,
    pub translated_text: String,
    pub status: TranslationStatus,
    pub updated_at: String,
}

/// Protected term as stored and consumed by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedTerm {
    pub id: i64,
    pub project_id: i64,
    pub term: String,
    pub category: TermCategory,
    pub is_regex: bool,
    /// Key paths this term applies to, empty means every key
    pub key_scopes: Vec<String>,
}

impl ProtectedTerm {
    /// Whether the term applies to a key
    pub fn applies_to(&self, key_path: &str) -> bool {
        self.key_scopes.is_empty() || self.key_scopes.iter().any(|scope| scope == key_path)
    }
}

/// A translatable key as seen by the batch planner
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingKey {
    pub key_path: String,
    pub source_text: String,
    pub status: TranslationStatus,
    pub translated_text: Option<String>,
}

/// One row written by `upsert_translations`
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationUpsert {
    pub key_path: String,
    pub text: String,
    pub status: TranslationStatus,
}

/// Per-language coverage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total_keys: usize,
    pub missing: usize,
    pub ai_translated: usize,
    pub locked: usize,
    pub needs_review: usize,
}

impl StatusCounts {
    pub fn translated(&self) -> usize {
        self.ai_translated + self.locked + self.needs_review
    }
}
