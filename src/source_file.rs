/*!
 * Source language pack handling.
 *
 * A language pack is a nested JSON object. Leaves are addressed by dotted key
 * paths (`home.title`, arrays use their index: `faq.items.0`). Only non-empty
 * strings are translatable; other leaves are tracked so that generated files
 * keep the exact source structure.
 */

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

use crate::database::models::ValueType;
use crate::file_utils::FileManager;

/// One leaf of the source document
#[derive(Debug, Clone, PartialEq)]
pub struct SourceEntry {
    pub key_path: String,
    /// Text form of the value (numbers and booleans are stringified, null is empty)
    pub text: String,
    pub value_type: ValueType,
    pub should_translate: bool,
    /// Position in the source document
    pub sort_order: i64,
}

impl SourceEntry {
    /// First path segment
    pub fn page(&self) -> &str {
        page_of(&self.key_path)
    }

    pub fn source_hash(&self) -> String {
        hash_text(&self.text)
    }
}

/// Flattened source document in document order
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    entries: Vec<SourceEntry>,
    index: HashMap<String, usize>,
}

impl SourceMap {
    /// Build from `(key_path, text)` pairs, all treated as translatable strings
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = SourceMap::default();
        for (key, text) in pairs {
            let text = text.into();
            map.push(SourceEntry {
                key_path: key.into(),
                should_translate: !text.is_empty(),
                text,
                value_type: ValueType::String,
                sort_order: 0,
            });
        }
        map
    }

    fn push(&mut self, mut entry: SourceEntry) {
        entry.sort_order = self.entries.len() as i64;
        self.index.insert(entry.key_path.clone(), self.entries.len());
        self.entries.push(entry);
    }

    pub fn get(&self, key_path: &str) -> Option<&SourceEntry> {
        self.index.get(key_path).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, key_path: &str) -> bool {
        self.index.contains_key(key_path)
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// SHA-256 of a text, hex encoded
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// First segment of a dotted key path
pub fn page_of(key_path: &str) -> &str {
    key_path.split('.').next().unwrap_or(key_path)
}

/// Flatten a parsed language pack
pub fn flatten(document: &Value) -> Result<SourceMap> {
    let object = document
        .as_object()
        .ok_or_else(|| anyhow!("Language pack root must be a JSON object"))?;

    let mut map = SourceMap::default();
    for (key, value) in object {
        flatten_value(key.clone(), value, &mut map);
    }
    Ok(map)
}

fn flatten_value(path: String, value: &Value, map: &mut SourceMap) {
    let (text, value_type) = match value {
        Value::Object(children) => {
            for (key, child) in children {
                flatten_value(format!("{}.{}", path, key), child, map);
            }
            return;
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_value(format!("{}.{}", path, i), item, map);
            }
            return;
        }
        Value::String(s) => (s.clone(), ValueType::String),
        Value::Number(n) => (n.to_string(), ValueType::Number),
        Value::Bool(b) => (b.to_string(), ValueType::Boolean),
        Value::Null => (String::new(), ValueType::Null),
    };

    let should_translate = value_type == ValueType::String && !text.trim().is_empty();
    map.push(SourceEntry {
        key_path: path,
        text,
        value_type,
        should_translate,
        sort_order: 0,
    });
}

/// Read and flatten a language pack file
pub fn load_source_file<P: AsRef<Path>>(path: P) -> Result<(Value, SourceMap)> {
    let path = path.as_ref();
    let content = FileManager::read_to_string(path)?;
    let document: Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in language pack: {:?}", path))?;
    let map = flatten(&document)?;
    Ok((document, map))
}

/// Rebuild a nested document using the source as template.
///
/// String leaves take the translation for their key path when one exists and
/// fall back to the source text otherwise. Everything else is copied.
pub fn rebuild_json(source: &Value, translations: &HashMap<String, String>) -> Value {
    match source {
        Value::Object(object) => {
            let mut out = Map::with_capacity(object.len());
            for (key, value) in object {
                out.insert(key.clone(), rebuild_value(key.clone(), value, translations));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn rebuild_value(path: String, value: &Value, translations: &HashMap<String, String>) -> Value {
    match value {
        Value::Object(children) => {
            let mut out = Map::with_capacity(children.len());
            for (key, child) in children {
                out.insert(
                    key.clone(),
                    rebuild_value(format!("{}.{}", path, key), child, translations),
                );
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| rebuild_value(format!("{}.{}", path, i), item, translations))
                .collect(),
        ),
        Value::String(s) => Value::String(translations.get(&path).cloned().unwrap_or_else(|| s.clone())),
        other => other.clone(),
    }
}

/// Write a generated locale file next to the others
pub fn write_locale_file<P: AsRef<Path>>(
    locales_dir: P,
    language_code: &str,
    source: &Value,
    translations: &HashMap<String, String>,
) -> Result<std::path::PathBuf> {
    let path = FileManager::locale_file_path(&locales_dir, language_code);
    let document = rebuild_json(source, translations);
    let mut json = serde_json::to_string_pretty(&document).context("Failed to serialize locale file")?;
    json.push('\n');
    FileManager::write_atomic(&path, &json)?;
    Ok(path)
}
