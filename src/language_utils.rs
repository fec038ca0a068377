use anyhow::{anyhow, Result};
use isolang::Language;

/// Language utilities for locale code handling
///
/// Locale codes are an ISO 639-1 or 639-3 base optionally followed by a region
/// (`pt-BR`, `zh_CN`). This module normalizes them, checks them and resolves
/// human-readable names used in prompts and progress events.

/// Canonical form: lowercase base, `-` separator, uppercase region
pub fn normalize_code(code: &str) -> String {
    let code = code.trim().replace('_', "-");
    let mut parts = code.splitn(2, '-');
    let base = parts.next().unwrap_or_default().to_lowercase();
    match parts.next() {
        Some(region) if !region.is_empty() => format!("{}-{}", base, region.to_uppercase()),
        _ => base,
    }
}

/// The language part of a locale code
pub fn base_language(code: &str) -> String {
    let normalized = normalize_code(code);
    normalized
        .split('-')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn lookup(base: &str) -> Option<Language> {
    match base.len() {
        2 => Language::from_639_1(base),
        3 => Language::from_639_3(base),
        _ => None,
    }
}

/// Validate that the base of a locale code is a known ISO language
pub fn validate_language_code(code: &str) -> Result<String> {
    let normalized = normalize_code(code);
    if lookup(&base_language(&normalized)).is_some() {
        Ok(normalized)
    } else {
        Err(anyhow!("Invalid language code: {}", code))
    }
}

/// Check if two locale codes denote the same locale
pub fn language_codes_match(code1: &str, code2: &str) -> bool {
    normalize_code(code1) == normalize_code(code2)
}

/// Get the English language name from a code, keeping the region as a suffix
pub fn get_language_name(code: &str) -> Result<String> {
    let normalized = normalize_code(code);
    let lang = lookup(&base_language(&normalized))
        .ok_or_else(|| anyhow!("Failed to get language from code: {}", code))?;

    match normalized.split_once('-') {
        Some((_, region)) => Ok(format!("{} ({})", lang.to_name(), region)),
        None => Ok(lang.to_name().to_string()),
    }
}

/// Language name, or the code itself when it is not an ISO language
pub fn display_name(code: &str) -> String {
    get_language_name(code).unwrap_or_else(|_| code.to_string())
}
