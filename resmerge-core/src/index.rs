//! Cross-module index: every declaration of every key.
//!
//! Built with a Rayon `fold`/`reduce`. The merge step keeps each key's
//! occurrences sorted by (file, ordinal) and deduplicated, so it is
//! commutative and associative and the final index never depends on the
//! order in which files were processed.

use crate::document::ElementNode;
use crate::parse::{ResourceFile, ResourceKey, ResourceType};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One declaration of a key.
#[derive(Debug, Clone)]
pub struct Occurrence {
    pub module: String,
    pub file: PathBuf,
    /// Normalized value
    pub value: String,
    pub ordinal: usize,
    pub node: ElementNode,
}

impl Occurrence {
    fn sort_key(&self) -> (&PathBuf, usize) {
        (&self.file, self.ordinal)
    }
}

/// key → occurrences, sorted by (file, ordinal).
#[derive(Debug, Clone, Default)]
pub struct CrossModuleIndex {
    groups: BTreeMap<ResourceKey, Vec<Occurrence>>,
}

impl CrossModuleIndex {
    /// Index every entry of an enabled type across `files`.
    pub fn build(files: &[ResourceFile], types: &[ResourceType]) -> Self {
        files
            .par_iter()
            .fold(Self::default, |mut acc, file| {
                acc.add_file(file, types);
                acc
            })
            .reduce(Self::default, Self::merge)
    }

    fn add_file(&mut self, file: &ResourceFile, types: &[ResourceType]) {
        for entry in &file.entries {
            if !types.contains(&entry.key.kind) {
                continue;
            }
            self.insert(
                entry.key.clone(),
                Occurrence {
                    module: file.module.clone(),
                    file: file.path.clone(),
                    value: entry.value.clone(),
                    ordinal: entry.ordinal,
                    node: entry.node.clone(),
                },
            );
        }
    }

    fn insert(&mut self, key: ResourceKey, occurrence: Occurrence) {
        let list = self.groups.entry(key).or_default();
        let at = list.partition_point(|o| o.sort_key() < occurrence.sort_key());
        if list.get(at).is_some_and(|o| o.sort_key() == occurrence.sort_key()) {
            return;
        }
        list.insert(at, occurrence);
    }

    /// Union of two partial indexes.
    pub fn merge(mut self, other: Self) -> Self {
        for (key, occurrences) in other.groups {
            match self.groups.get_mut(&key) {
                Some(list) => {
                    list.extend(occurrences);
                    list.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
                    list.dedup_by(|a, b| a.sort_key() == b.sort_key());
                }
                None => {
                    self.groups.insert(key, occurrences);
                }
            }
        }
        self
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&[Occurrence]> {
        self.groups.get(key).map(Vec::as_slice)
    }

    /// Keys in sorted order with their occurrences.
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceKey, &[Occurrence])> {
        self.groups.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
