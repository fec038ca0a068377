/*!
 * Key-set diffing between a parsed source file and the stored keys.
 *
 * The differ is pure: it only classifies keys. Persisting the outcome is the
 * caller's job (see `SyncService`).
 */

use serde::Serialize;
use std::collections::HashMap;

use crate::source_file::SourceMap;

/// Classification of every key involved in a sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    /// In the source only, in source order
    pub added: Vec<String>,
    /// In both, with a different source text, in source order
    pub updated: Vec<String>,
    /// Stored but gone from the source, sorted by key path
    pub deleted: Vec<String>,
    /// In both with identical text, in source order
    pub unchanged: Vec<String>,
}

impl DiffResult {
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty())
    }
}

/// Computes added/updated/deleted key sets.
///
/// Keys are compared by full path; a key moved under another page prefix is a
/// deletion plus an addition.
pub struct KeyDiffer;

impl KeyDiffer {
    /// `existing` maps stored key paths to their stored source text
    pub fn diff(existing: &HashMap<String, String>, parsed: &SourceMap) -> DiffResult {
        let mut result = DiffResult::default();

        for entry in parsed.entries() {
            match existing.get(&entry.key_path) {
                None => result.added.push(entry.key_path.clone()),
                Some(stored) if *stored != entry.text => result.updated.push(entry.key_path.clone()),
                Some(_) => result.unchanged.push(entry.key_path.clone()),
            }
        }

        result.deleted = existing
            .keys()
            .filter(|key| !parsed.contains(key))
            .cloned()
            .collect();
        result.deleted.sort();

        result
    }
}
