//! Partition index groups into duplicates, conflicts and unique keys.

use crate::index::{CrossModuleIndex, Occurrence};
use crate::parse::{ResourceKey, ResourceType};
use serde::Serialize;
use std::collections::BTreeMap;

/// A key declared more than once, always with the same value.
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub key: ResourceKey,
    pub value: String,
    pub occurrences: Vec<Occurrence>,
}

/// A key declared with more than one distinct value. Never mutated.
#[derive(Debug, Clone)]
pub struct ConflictGroup {
    pub key: ResourceKey,
    pub occurrences: Vec<Occurrence>,
}

impl ConflictGroup {
    /// Distinct values in sorted order.
    pub fn values(&self) -> Vec<&str> {
        let mut values: Vec<&str> = self.occurrences.iter().map(|o| o.value.as_str()).collect();
        values.sort_unstable();
        values.dedup();
        values
    }
}

/// Different names of one type sharing the same value. Review only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossNameCandidate {
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub value: String,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub duplicates: Vec<DuplicateGroup>,
    pub conflicts: Vec<ConflictGroup>,
    pub unique: Vec<ResourceKey>,
}

impl Classification {
    pub fn is_conflicting(&self, key: &ResourceKey) -> bool {
        self.conflicts.iter().any(|c| &c.key == key)
    }
}

/// Classify every key of the index. Output follows key order.
pub fn classify(index: &CrossModuleIndex) -> Classification {
    let mut out = Classification::default();
    for (key, occurrences) in index.iter() {
        let first = occurrences.first().map(|o| o.value.as_str());
        let uniform = occurrences.iter().all(|o| Some(o.value.as_str()) == first);
        match (occurrences.len(), uniform) {
            (0 | 1, _) => out.unique.push(key.clone()),
            (_, true) => out.duplicates.push(DuplicateGroup {
                key: key.clone(),
                value: occurrences[0].value.clone(),
                occurrences: occurrences.to_vec(),
            }),
            (_, false) => out.conflicts.push(ConflictGroup {
                key: key.clone(),
                occurrences: occurrences.to_vec(),
            }),
        }
    }
    out
}

/// Names of one type that share a non-empty value.
pub fn cross_name_candidates(index: &CrossModuleIndex) -> Vec<CrossNameCandidate> {
    let mut by_value: BTreeMap<(ResourceType, &str), Vec<String>> = BTreeMap::new();
    for (key, occurrences) in index.iter() {
        let mut values: Vec<&str> = occurrences.iter().map(|o| o.value.as_str()).collect();
        values.sort_unstable();
        values.dedup();
        for value in values.into_iter().filter(|v| !v.is_empty()) {
            by_value.entry((key.kind, value)).or_default().push(key.name.clone());
        }
    }
    by_value
        .into_iter()
        .filter(|(_, names)| names.len() > 1)
        .map(|((kind, value), names)| CrossNameCandidate {
            kind,
            value: value.to_string(),
            names,
        })
        .collect()
}
