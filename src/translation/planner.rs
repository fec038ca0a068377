/*!
 * Batch planning.
 *
 * A strategy selects which keys are eligible, then eligible keys are grouped
 * into batches whose source word count stays within a budget. Planning is
 * deterministic: the same input always yields the same batches.
 */

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::fmt;

use crate::database::models::{PendingKey, TranslationStatus};

/// Selection policy for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Strategy {
    /// Only keys without a translation
    MissingOnly,
    /// Missing keys plus earlier AI output
    MissingAndAi,
    /// Everything except locked rows, unless `include_locked`
    Full { include_locked: bool },
    /// Re-check existing translations without calling a provider
    ValidateOnly,
}

impl Strategy {
    /// Build from a mode name.
    ///
    /// `full` includes locked rows unless the caller says otherwise; the
    /// other modes ignore `include_locked`.
    pub fn from_mode(mode: &str, include_locked: Option<bool>) -> Result<Self> {
        match mode.trim().to_lowercase().as_str() {
            "missing_only" => Ok(Strategy::MissingOnly),
            "missing_and_ai" => Ok(Strategy::MissingAndAi),
            "full" => Ok(Strategy::Full {
                include_locked: include_locked.unwrap_or(true),
            }),
            "validate_only" => Ok(Strategy::ValidateOnly),
            other => Err(anyhow!(
                "Invalid mode '{}': expected missing_only, missing_and_ai, full or validate_only",
                other
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::MissingOnly => "missing_only",
            Strategy::MissingAndAi => "missing_and_ai",
            Strategy::Full { .. } => "full",
            Strategy::ValidateOnly => "validate_only",
        }
    }

    /// Statuses this strategy may select
    pub fn eligible_statuses(&self) -> Vec<TranslationStatus> {
        match self {
            Strategy::MissingOnly => vec![TranslationStatus::Missing],
            Strategy::MissingAndAi => vec![TranslationStatus::Missing, TranslationStatus::AiTranslated],
            Strategy::Full { include_locked } => {
                let mut statuses = vec![
                    TranslationStatus::Missing,
                    TranslationStatus::AiTranslated,
                    TranslationStatus::NeedsReview,
                ];
                if *include_locked {
                    statuses.push(TranslationStatus::Locked);
                }
                statuses
            }
            Strategy::ValidateOnly => vec![TranslationStatus::AiTranslated, TranslationStatus::Locked],
        }
    }

    pub fn is_eligible(&self, status: TranslationStatus) -> bool {
        self.eligible_statuses().contains(&status)
    }

    pub fn calls_provider(&self) -> bool {
        !matches!(self, Strategy::ValidateOnly)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Ordered group of keys sent in one provider request
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// 1-based position in the plan
    pub number: usize,
    pub items: Vec<PendingKey>,
    /// Sum of the items' source word counts
    pub word_count: usize,
}

/// Words in a text.
///
/// Texts containing CJK characters count characters instead, since those
/// scripts do not separate words with spaces.
pub fn count_words(text: &str) -> usize {
    if text.chars().any(is_cjk) {
        text.chars().filter(|c| !c.is_whitespace()).count()
    } else {
        text.split_whitespace().count()
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3040}'..='\u{309F}'
        | '\u{30A0}'..='\u{30FF}'
        | '\u{AC00}'..='\u{D7A3}')
}

/// Partitions pending keys into word-bounded batches
pub struct BatchPlanner;

impl BatchPlanner {
    /// Keys the strategy selects, in input order
    pub fn select(keys: &[PendingKey], strategy: &Strategy) -> Vec<PendingKey> {
        let statuses = strategy.eligible_statuses();
        keys.iter()
            .filter(|k| statuses.contains(&k.status))
            .cloned()
            .collect()
    }

    /// Plan provider batches. `validate_only` never produces any.
    pub fn plan(keys: &[PendingKey], word_budget: usize, strategy: &Strategy) -> Vec<Batch> {
        if !strategy.calls_provider() {
            return Vec::new();
        }
        Self::chunk(Self::select(keys, strategy), word_budget)
    }

    /// Greedy grouping: a key joins the current batch unless that would push
    /// it past the budget. A key larger than the budget gets a batch alone.
    pub fn chunk(keys: Vec<PendingKey>, word_budget: usize) -> Vec<Batch> {
        let budget = word_budget.max(1);
        let mut batches: Vec<Batch> = Vec::new();
        let mut items: Vec<PendingKey> = Vec::new();
        let mut words = 0usize;

        for key in keys {
            let key_words = count_words(&key.source_text);
            if !items.is_empty() && words + key_words > budget {
                batches.push(Batch {
                    number: batches.len() + 1,
                    items: std::mem::take(&mut items),
                    word_count: words,
                });
                words = 0;
            }
            words += key_words;
            items.push(key);
        }

        if !items.is_empty() {
            batches.push(Batch {
                number: batches.len() + 1,
                items,
                word_count: words,
            });
        }

        batches
    }
}
