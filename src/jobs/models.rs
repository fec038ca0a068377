/*!
 * Job data types shared by the runner, the stores and the control surface.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::providers::TokenUsage;

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Terminal states admit no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match self {
            JobState::Pending => next == JobState::Running,
            JobState::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A key that could not be translated, with the reason shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub key_path: String,
    pub language_code: String,
    pub source_text: String,
    pub error: String,
}

/// Aggregate outcome of a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub total_translated: usize,
    pub total_failed: usize,
    pub token_usage: TokenUsage,
    pub failed_items: Vec<FailedItem>,
    /// Paths of generated locale files
    pub generated_files: Vec<String>,
    pub elapsed_secs: f64,
    /// Rows checked by a `validate_only` job
    pub total_validated: usize,
    /// Invalid AI rows removed by a `validate_only` job
    pub total_cleared: usize,
}

impl JobResult {
    /// Drop remediated `(key_path, language_code)` entries from `failed_items`.
    ///
    /// Returns how many entries were removed.
    pub fn remove_failed_items(&mut self, items: &[(String, String)]) -> usize {
        let before = self.failed_items.len();
        self.failed_items.retain(|failed| {
            !items
                .iter()
                .any(|(key, lang)| *key == failed.key_path && *lang == failed.language_code)
        });
        self.total_failed = self.failed_items.len();
        before - self.failed_items.len()
    }
}

/// Parameters of `start_job`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartJobRequest {
    pub project_id: i64,
    /// Target languages; empty means every language the project knows
    #[serde(default)]
    pub languages: Vec<String>,
    /// `missing_only`, `missing_and_ai`, `full` or `validate_only`
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Only meaningful with `full`, where it defaults to true
    #[serde(default)]
    pub include_locked: Option<bool>,
    #[serde(default)]
    pub generate_files: bool,
    /// `provider` or `provider:model`; falls back to the project, then the config
    #[serde(default)]
    pub provider: Option<String>,
    /// Word budget; falls back to the project, then the config
    #[serde(default)]
    pub chunk_size_words: Option<usize>,
}

fn default_strategy() -> String {
    "missing_only".to_string()
}

impl StartJobRequest {
    /// `missing_only` request for the given languages
    pub fn new(project_id: i64, languages: Vec<String>) -> Self {
        Self {
            project_id,
            languages,
            strategy: default_strategy(),
            include_locked: None,
            generate_files: false,
            provider: None,
            chunk_size_words: None,
        }
    }

    pub fn with_strategy(mut self, strategy: &str) -> Self {
        self.strategy = strategy.to_string();
        self
    }
}
