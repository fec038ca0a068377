/*!
 * Progress events and the per-job event log.
 *
 * Every phase transition of a job is an explicit event appended to an ordered
 * log. Pollers may re-read the whole history and deduplicate by
 * `EventIdentity`; the only event that is ever revised is a language's
 * `completed` event, which keeps its position and gets a fresh sequence
 * number so that incremental readers (`history_since`) pick up the revision.
 */

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::models::FailedItem;
use crate::providers::TokenUsage;

/// Phase-specific payload of a progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ProgressPhase {
    Checking,
    Checked {
        total_keys: usize,
        translated_keys: usize,
        missing_keys: usize,
    },
    TasksFound {
        missing_count: usize,
        ai_count: usize,
        locked_count: usize,
        needs_review_count: usize,
        total_tasks: usize,
        strategy: String,
    },
    NoWork {
        strategy: String,
    },
    Starting {
        total_batches: usize,
        total_keys: usize,
    },
    BatchDone {
        batch_number: usize,
        total_batches: usize,
        batch_keys: usize,
        success_count: usize,
        failure_count: usize,
        token_usage: TokenUsage,
    },
    Retrying {
        retry_keys_count: usize,
    },
    Completed {
        success_count: usize,
        failure_count: usize,
        token_usage: TokenUsage,
        failed_items: Vec<FailedItem>,
    },
    FileGenerated {
        path: String,
    },
}

impl ProgressPhase {
    /// Wire name of the phase
    pub fn name(&self) -> &'static str {
        match self {
            ProgressPhase::Checking => "checking",
            ProgressPhase::Checked { .. } => "checked",
            ProgressPhase::TasksFound { .. } => "tasks_found",
            ProgressPhase::NoWork { .. } => "no_work",
            ProgressPhase::Starting { .. } => "starting",
            ProgressPhase::BatchDone { .. } => "batch_done",
            ProgressPhase::Retrying { .. } => "retrying",
            ProgressPhase::Completed { .. } => "completed",
            ProgressPhase::FileGenerated { .. } => "file_generated",
        }
    }
}

/// Stable identity used to deduplicate re-read events
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventIdentity {
    pub language_code: String,
    pub phase: &'static str,
    /// Only set for `batch_done`, which recurs per batch
    pub batch_number: Option<usize>,
}

/// One entry of a job's progress log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Position assigned by the store, strictly increasing per job
    pub sequence: u64,
    pub language_code: String,
    pub language_name: String,
    #[serde(flatten)]
    pub phase: ProgressPhase,
    pub timestamp: String,
}

impl ProgressEvent {
    /// Event for a language; the sequence is assigned when recorded
    pub fn new(language_code: &str, language_name: &str, phase: ProgressPhase) -> Self {
        Self {
            sequence: 0,
            language_code: language_code.to_string(),
            language_name: language_name.to_string(),
            phase,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn identity(&self) -> EventIdentity {
        let batch_number = match &self.phase {
            ProgressPhase::BatchDone { batch_number, .. } => Some(*batch_number),
            _ => None,
        };
        EventIdentity {
            language_code: self.language_code.clone(),
            phase: self.phase.name(),
            batch_number,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.phase, ProgressPhase::Completed { .. })
    }
}

/// What a poller sees
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressView {
    /// Most recently recorded event
    pub progress: Option<ProgressEvent>,
    pub progress_history: Vec<ProgressEvent>,
}

#[derive(Debug, Default)]
struct JobLog {
    events: Vec<ProgressEvent>,
    latest: Option<ProgressEvent>,
    next_sequence: u64,
}

/// In-memory event logs keyed by job id, safe for concurrent writers
#[derive(Debug, Default)]
pub struct ProgressStore {
    logs: RwLock<HashMap<String, JobLog>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, or revise the matching `completed` event in place.
    ///
    /// Returns the event as stored, with its sequence number.
    pub fn record(&self, job_id: &str, mut event: ProgressEvent) -> ProgressEvent {
        let mut logs = self.logs.write();
        let log = logs.entry(job_id.to_string()).or_default();

        log.next_sequence += 1;
        event.sequence = log.next_sequence;

        let existing = if event.is_completed() {
            let identity = event.identity();
            log.events.iter().position(|e| e.identity() == identity)
        } else {
            None
        };

        match existing {
            Some(index) => log.events[index] = event.clone(),
            None => log.events.push(event.clone()),
        }
        log.latest = Some(event.clone());
        event
    }

    /// Snapshot and full history of a job
    pub fn read(&self, job_id: &str) -> Option<ProgressView> {
        let logs = self.logs.read();
        logs.get(job_id).map(|log| ProgressView {
            progress: log.latest.clone(),
            progress_history: log.events.clone(),
        })
    }

    /// Events with a sequence number above `after`, in log order
    pub fn history_since(&self, job_id: &str, after: u64) -> Vec<ProgressEvent> {
        let logs = self.logs.read();
        logs.get(job_id)
            .map(|log| {
                log.events
                    .iter()
                    .filter(|e| e.sequence > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn remove(&self, job_id: &str) -> bool {
        self.logs.write().remove(job_id).is_some()
    }
}
