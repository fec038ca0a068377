/*!
 * Structural validation of translated strings.
 *
 * Checks run in a fixed order and stop at the first failure:
 * 1. the translation is not empty (unless the source is),
 * 2. every placeholder of the source appears the same number of times,
 * 3. every applicable protected term found in the source is preserved.
 */

use log::warn;
use regex::Regex;
use std::collections::HashMap;

use crate::database::models::ProtectedTerm;
use crate::protection::term_regex;

/// Outcome of a validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid { reason: String },
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Validation::Valid => None,
            Validation::Invalid { reason } => Some(reason),
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        Validation::Invalid {
            reason: reason.into(),
        }
    }
}

/// Placeholder and protected-term checker
#[derive(Debug, Clone)]
pub struct Validator {
    patterns: Vec<Regex>,
}

impl Validator {
    /// Compile placeholder patterns; invalid ones are skipped with a warning
    pub fn new<S: AsRef<str>>(variable_patterns: &[S]) -> Self {
        let patterns = variable_patterns
            .iter()
            .filter_map(|p| match Regex::new(p.as_ref()) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Ignoring invalid variable pattern '{}': {}", p.as_ref(), e);
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// Placeholder tokens of a text in order of appearance.
    ///
    /// When patterns overlap (`{{name}}` also contains `{name}`), the match
    /// that starts first wins and, at equal start, the longest one.
    pub fn placeholders(&self, text: &str) -> Vec<String> {
        let mut spans: Vec<(usize, usize)> = self
            .patterns
            .iter()
            .flat_map(|re| re.find_iter(text).map(|m| (m.start(), m.end())))
            .filter(|(start, end)| end > start)
            .collect();
        spans.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

        let mut tokens = Vec::new();
        let mut covered_until = 0;
        for (start, end) in spans {
            if start < covered_until {
                continue;
            }
            tokens.push(text[start..end].to_string());
            covered_until = end;
        }
        tokens
    }

    fn count_tokens(tokens: &[String]) -> HashMap<&str, usize> {
        let mut counts = HashMap::new();
        for token in tokens {
            *counts.entry(token.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Validate one translation against its source
    pub fn validate(&self, source: &str, translated: &str, terms: &[&ProtectedTerm]) -> Validation {
        if translated.trim().is_empty() {
            if source.trim().is_empty() {
                return Validation::Valid;
            }
            return Validation::invalid("empty translation");
        }

        let source_tokens = self.placeholders(source);
        if !source_tokens.is_empty() {
            let translated_tokens = self.placeholders(translated);
            let expected = Self::count_tokens(&source_tokens);
            let found = Self::count_tokens(&translated_tokens);

            let mut seen = Vec::new();
            for token in &source_tokens {
                if seen.contains(&token) {
                    continue;
                }
                seen.push(token);

                let want = expected.get(token.as_str()).copied().unwrap_or(0);
                let have = found.get(token.as_str()).copied().unwrap_or(0);
                if have == 0 {
                    return Validation::invalid(format!("missing placeholder {}", token));
                }
                if have != want {
                    return Validation::invalid(format!(
                        "placeholder {} expected {} time(s), found {}",
                        token, want, have
                    ));
                }
            }
        }

        for term in terms {
            let Some(re) = term_regex(term) else {
                continue;
            };
            if !re.is_match(source) {
                continue;
            }
            let preserved = if term.is_regex {
                re.is_match(translated)
            } else {
                translated.contains(&term.term)
            };
            if !preserved {
                return Validation::invalid(format!("protected term '{}' not preserved", term.term));
            }
        }

        Validation::Valid
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(&crate::app_config::TranslationSettings::default().variable_patterns)
    }
}
