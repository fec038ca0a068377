/*!
 * Prompt construction and response parsing for array translation.
 *
 * Texts are sent as a JSON array and the model must answer with an array of
 * the same length. Models do not always comply, so parsing falls back through
 * several shapes before giving up.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::errors::ProviderError;
use crate::language_utils;

static CODE_FENCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("Invalid code fence regex")
});

/// User prompt for one batch
pub fn build_array_prompt(
    texts: &[String],
    source_language: &str,
    target_language: &str,
    context: Option<&str>,
    protected_placeholders: bool,
) -> String {
    let source_name = language_utils::display_name(source_language);
    let target_name = language_utils::display_name(target_language);
    let texts_json = serde_json::to_string(texts).unwrap_or_else(|_| "[]".to_string());

    let mut prompt = format!(
        "Translate the following {count} texts from {source_name} ({source_code}) to {target_name} ({target_code}).\n",
        count = texts.len(),
        source_name = source_name,
        source_code = source_language,
        target_name = target_name,
        target_code = target_language,
    );

    if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str(&format!("\nProject context: {}\n", context));
    }

    prompt.push_str(
        "\nRules:\n\
         - Keep placeholders such as {name}, {{name}}, ${name} and %s exactly as they are.\n\
         - Keep HTML tags and line breaks.\n",
    );
    if protected_placeholders {
        prompt.push_str("- Tokens like __PROT_0__ are protected terms: copy them unchanged.\n");
    }

    prompt.push_str(&format!(
        "\nInput (JSON array of {count} strings):\n{texts}\n\n\
         Return a JSON array with exactly {count} translated strings in the same order. \
         Do not include explanations, markdown code blocks, or any text outside the JSON array. \
         Return ONLY the JSON array.",
        count = texts.len(),
        texts = texts_json,
    ));

    prompt
}

fn strings_from_array(items: &[Value]) -> Vec<Option<String>> {
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .collect()
}

fn array_from_value(value: &Value) -> Option<Vec<Option<String>>> {
    match value {
        Value::Array(items) => Some(strings_from_array(items)),
        Value::Object(map) => map
            .get("translations")
            .and_then(Value::as_array)
            .map(|items| strings_from_array(items)),
        _ => None,
    }
}

fn try_parse(candidate: &str) -> Option<Vec<Option<String>>> {
    serde_json::from_str::<Value>(candidate)
        .ok()
        .and_then(|v| array_from_value(&v))
}

/// Outermost `[...]` span, skipping brackets inside string literals
fn bracket_span(content: &str) -> Option<&str> {
    let start = content.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in content[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a model reply into exactly `expected` slots.
///
/// Tries, in order: the raw reply, the content of a fenced code block, the
/// first balanced JSON array, each of which may also be an object with a
/// `translations` array. Extra entries are dropped; missing ones are `None`.
pub fn parse_translation_array(content: &str, expected: usize) -> Result<Vec<Option<String>>, ProviderError> {
    let trimmed = content.trim();

    let parsed = try_parse(trimmed)
        .or_else(|| {
            CODE_FENCE_REGEX
                .captures(trimmed)
                .and_then(|caps| caps.get(1))
                .and_then(|m| try_parse(m.as_str()))
        })
        .or_else(|| bracket_span(trimmed).and_then(try_parse));

    let mut values = parsed.ok_or_else(|| {
        let preview: String = trimmed.chars().take(200).collect();
        ProviderError::ParseError(format!("No JSON array found in response: {}", preview))
    })?;

    if values.len() != expected {
        log::warn!(
            "Provider returned {} translations, expected {}",
            values.len(),
            expected
        );
    }
    values.resize(expected, None);
    Ok(values)
}
