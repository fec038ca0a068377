/*!
 * Protected term suggestions from a chat model.
 *
 * Source texts are trimmed, stripped of placeholders and sent in chunks; the
 * model answers with one list per term category. Chunk answers are merged
 * and de-duplicated. Nothing is stored here, callers decide which
 * suggestions become protected terms.
 */

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use rand::seq::IndexedRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::database::models::TermCategory;
use crate::errors::ProviderError;
use crate::providers::TokenUsage;
use crate::providers::openai::{ChatCompletionProvider, ChatRequest};

/// Characters kept of each source text
const MAX_TEXT_CHARS: usize = 500;
/// Texts analysed at most, sampled when the project has more
const MAX_SAMPLE: usize = 300;
/// Texts per request
const TEXTS_PER_REQUEST: usize = 100;

const ANALYZER_SYSTEM_MESSAGE: &str =
    "You are a conservative term analyzer. Only identify terms with high confidence.";

static PLACEHOLDER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{[^}]+\}\}|\$\{[^}]+\}|\{[^}]+\}|__[A-Z0-9_]+__|%\([^)]+\)[sd]|%[sd]")
        .expect("Invalid placeholder regex")
});

static CODE_FENCE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[a-zA-Z]*\s*(.*?)\s*```").expect("Invalid code fence regex"));

/// Suggested terms per category, sorted and unique
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermAnalysis {
    pub brand: Vec<String>,
    pub technical: Vec<String>,
    pub url: Vec<String>,
    pub code: Vec<String>,
}

impl TermAnalysis {
    fn category_mut(&mut self, category: TermCategory) -> &mut Vec<String> {
        match category {
            TermCategory::Brand => &mut self.brand,
            TermCategory::Technical => &mut self.technical,
            TermCategory::Url => &mut self.url,
            TermCategory::Code => &mut self.code,
        }
    }

    /// Every suggestion with its category
    pub fn terms(&self) -> Vec<(TermCategory, &str)> {
        [
            (TermCategory::Brand, &self.brand),
            (TermCategory::Technical, &self.technical),
            (TermCategory::Url, &self.url),
            (TermCategory::Code, &self.code),
        ]
        .into_iter()
        .flat_map(|(category, terms)| terms.iter().map(move |t| (category, t.as_str())))
        .collect()
    }

    pub fn len(&self) -> usize {
        self.brand.len() + self.technical.len() + self.url.len() + self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add another result, keeping each category unique and sorted
    pub fn merge(&mut self, other: TermAnalysis) {
        let TermAnalysis {
            brand,
            technical,
            url,
            code,
        } = other;
        for (category, incoming) in [
            (TermCategory::Brand, brand),
            (TermCategory::Technical, technical),
            (TermCategory::Url, url),
            (TermCategory::Code, code),
        ] {
            let ours = self.category_mut(category);
            let unique: BTreeSet<String> = ours.drain(..).chain(incoming).collect();
            ours.extend(unique);
        }
    }
}

/// Outcome of `analyze_terms`
#[derive(Debug, Clone, Default)]
pub struct AnalysisReport {
    pub analysis: TermAnalysis,
    pub usage: TokenUsage,
    /// Texts actually sent after filtering and sampling
    pub analysed_texts: usize,
    pub failed_requests: usize,
}

/// Remove placeholders and cap the length of a source text
pub fn prepare_text(text: &str) -> Option<String> {
    let capped: String = text.chars().take(MAX_TEXT_CHARS).collect();
    let stripped = PLACEHOLDER_REGEX.replace_all(&capped, "");
    let stripped = stripped.trim();
    (!stripped.is_empty()).then(|| stripped.to_string())
}

/// User prompt for one chunk of texts
pub fn build_analysis_prompt(texts: &[String]) -> String {
    let texts_json = serde_json::to_string_pretty(texts).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"You are a professional localization expert.
Read the source text below and identify terms that must NOT be translated and have to stay exactly as they are.

### CATEGORIES
1. **brand**: Product names and company names.
2. **technical**: Technical terms, acronyms and file extensions.
3. **url**: Web addresses, domains and emails.
4. **code**: Variable names, function names and code syntax.

### RULES
1. Only list terms exactly as they appear in the text.
2. If a category has no matches, return an empty list.

### SOURCE TEXT
{}

### OUTPUT FORMAT
Return ONLY a valid JSON object:
{{"brand": [], "technical": [], "url": [], "code": []}}"#,
        texts_json
    )
}

/// Parse a categorized term object, tolerating code fences and prose around it
pub fn parse_analysis_response(content: &str) -> Result<TermAnalysis, ProviderError> {
    let trimmed = content.trim();
    let object = serde_json::from_str::<Value>(trimmed)
        .ok()
        .filter(Value::is_object)
        .or_else(|| {
            CODE_FENCE_REGEX
                .captures(trimmed)
                .and_then(|caps| caps.get(1))
                .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok())
                .filter(Value::is_object)
        })
        .or_else(|| {
            let start = trimmed.find('{')?;
            let end = trimmed.rfind('}')?;
            (start < end)
                .then(|| serde_json::from_str::<Value>(&trimmed[start..=end]).ok())
                .flatten()
                .filter(Value::is_object)
        })
        .ok_or_else(|| {
            let preview: String = trimmed.chars().take(200).collect();
            ProviderError::ParseError(format!("No JSON object found in analysis response: {}", preview))
        })?;

    let mut analysis = TermAnalysis::default();
    for category in [
        TermCategory::Brand,
        TermCategory::Technical,
        TermCategory::Url,
        TermCategory::Code,
    ] {
        // Anything but an array of strings counts as no terms
        let terms: BTreeSet<String> = object
            .get(category.to_string())
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        analysis.category_mut(category).extend(terms);
    }
    Ok(analysis)
}

/// Ask the model which terms of `source_texts` should stay untranslated.
///
/// Requests that fail with a retryable error are skipped; a fatal error
/// aborts. When no request succeeds the last error is returned.
pub async fn analyze_terms(
    provider: &ChatCompletionProvider,
    model: &str,
    source_texts: &[String],
) -> Result<AnalysisReport, ProviderError> {
    let mut texts: Vec<String> = source_texts.iter().filter_map(|t| prepare_text(t)).collect();
    if texts.len() > MAX_SAMPLE {
        texts = texts
            .choose_multiple(&mut rand::rng(), MAX_SAMPLE)
            .cloned()
            .collect();
        debug!("Sampled {} texts for term analysis", MAX_SAMPLE);
    }

    let mut report = AnalysisReport {
        analysed_texts: texts.len(),
        ..Default::default()
    };
    if texts.is_empty() {
        warn!("No source texts left to analyse");
        return Ok(report);
    }

    let chunks: Vec<&[String]> = texts.chunks(TEXTS_PER_REQUEST).collect();
    let mut last_error = None;
    for (index, chunk) in chunks.iter().enumerate() {
        let request = ChatRequest::new(model)
            .add_message("system", ANALYZER_SYSTEM_MESSAGE)
            .add_message("user", build_analysis_prompt(chunk));

        let outcome = match provider.complete(&request).await {
            Ok((content, usage)) => {
                report.usage.add(usage);
                parse_analysis_response(&content)
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(analysis) => {
                debug!("Analysis request {}/{}: {} terms", index + 1, chunks.len(), analysis.len());
                report.analysis.merge(analysis);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Analysis request {}/{} failed: {}", index + 1, chunks.len(), e);
                report.failed_requests += 1;
                last_error = Some(e);
            }
        }
    }

    if report.failed_requests == chunks.len() {
        if let Some(e) = last_error {
            return Err(e);
        }
    }

    info!(
        "Term analysis found {} terms in {} texts",
        report.analysis.len(),
        report.analysed_texts
    );
    Ok(report)
}
