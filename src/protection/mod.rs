/*!
 * Protected term handling.
 *
 * Before a text goes to a provider, every occurrence of an applicable
 * protected term is swapped for an opaque `__PROT_n__` placeholder. The
 * provider is asked to keep placeholders untouched and the original terms are
 * put back afterwards. The validator then checks the terms survived.
 *
 * `analyzer` asks a chat model for term suggestions.
 */

use log::warn;
use regex::Regex;

use crate::database::models::ProtectedTerm;

pub mod analyzer;

pub use analyzer::{AnalysisReport, TermAnalysis, analyze_terms};

/// Terms that apply to a key: global ones and the ones scoped to it
pub fn applicable_terms<'a>(terms: &'a [ProtectedTerm], key_path: &str) -> Vec<&'a ProtectedTerm> {
    terms.iter().filter(|t| t.applies_to(key_path)).collect()
}

/// Matcher for a term.
///
/// Literal terms match on word boundaries when their edges are word
/// characters, so `API` does not match inside `RAPID`.
pub fn term_regex(term: &ProtectedTerm) -> Option<Regex> {
    let pattern = if term.is_regex {
        term.term.clone()
    } else {
        let escaped = regex::escape(&term.term);
        let starts_word = term.term.chars().next().is_some_and(is_word_char);
        let ends_word = term.term.chars().last().is_some_and(is_word_char);
        format!(
            "{}{}{}",
            if starts_word { r"\b" } else { "" },
            escaped,
            if ends_word { r"\b" } else { "" }
        )
    };

    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("Skipping protected term '{}': {}", term.term, e);
            None
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whether a term occurs in a text
pub fn term_occurs_in(term: &ProtectedTerm, text: &str) -> bool {
    term_regex(term).is_some_and(|re| re.is_match(text))
}

/// Text with protected terms swapped for placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectedText {
    pub text: String,
    /// `(placeholder, original)` pairs
    pub replacements: Vec<(String, String)>,
}

/// Replace protected terms with placeholders, longest literal terms first
pub fn apply_protection(text: &str, terms: &[&ProtectedTerm]) -> ProtectedText {
    let mut ordered: Vec<&ProtectedTerm> = terms.to_vec();
    ordered.sort_by(|a, b| {
        a.is_regex
            .cmp(&b.is_regex)
            .then_with(|| b.term.chars().count().cmp(&a.term.chars().count()))
    });

    let mut current = text.to_string();
    let mut replacements = Vec::new();

    for term in ordered {
        let Some(re) = term_regex(term) else {
            continue;
        };
        let mut next = String::with_capacity(current.len());
        let mut last = 0;
        for m in re.find_iter(&current) {
            if m.as_str().is_empty() {
                continue;
            }
            let placeholder = format!("__PROT_{}__", replacements.len());
            next.push_str(&current[last..m.start()]);
            next.push_str(&placeholder);
            replacements.push((placeholder, m.as_str().to_string()));
            last = m.end();
        }
        next.push_str(&current[last..]);
        current = next;
    }

    ProtectedText {
        text: current,
        replacements,
    }
}

/// Put protected terms back in place of their placeholders
pub fn restore_protection(text: &str, replacements: &[(String, String)]) -> String {
    let mut restored = text.to_string();
    for (placeholder, original) in replacements {
        restored = restored.replace(placeholder, original);
    }
    restored
}
