//! Locale coverage: base string keys missing from `values-<locale>` dirs.

use crate::parse::{path_to_normalized_string, ResourceFile, ResourceType};
use crate::scan::locale_qualifier;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingTranslation {
    pub module: String,
    pub locale: String,
    /// `res` directory, relative to the project root
    pub res_dir: String,
    pub keys: Vec<String>,
}

fn res_dir_of(path: &Path) -> Option<PathBuf> {
    Some(path.parent()?.parent()?.to_path_buf())
}

fn string_names(file: &ResourceFile, translatable_only: bool) -> impl Iterator<Item = &str> {
    file.entries
        .iter()
        .filter(move |e| e.key.kind == ResourceType::String && (!translatable_only || e.node.translatable))
        .map(|e| e.key.name.as_str())
}

/// Compare every base strings set with each locale present next to it.
/// `translatable="false"` strings are not expected in locales.
pub fn check_locales(root: &Path, base: &[ResourceFile], localized: &[ResourceFile]) -> Vec<MissingTranslation> {
    let mut expected: BTreeMap<PathBuf, (String, BTreeSet<&str>)> = BTreeMap::new();
    for file in base {
        let Some(res_dir) = res_dir_of(&file.path) else { continue };
        expected
            .entry(res_dir)
            .or_insert_with(|| (file.module.clone(), BTreeSet::new()))
            .1
            .extend(string_names(file, true));
    }

    let mut present: BTreeMap<(PathBuf, String), BTreeSet<&str>> = BTreeMap::new();
    for file in localized {
        let Some(res_dir) = res_dir_of(&file.path) else { continue };
        let Some(locale) = file
            .path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .and_then(locale_qualifier)
        else {
            continue;
        };
        present
            .entry((res_dir, locale))
            .or_default()
            .extend(string_names(file, false));
    }

    let mut missing = Vec::new();
    for ((res_dir, locale), names) in &present {
        let Some((module, keys)) = expected.get(res_dir) else { continue };
        let absent: Vec<String> = keys
            .iter()
            .filter(|k| !names.contains(*k))
            .map(|k| k.to_string())
            .collect();
        if absent.is_empty() {
            continue;
        }
        missing.push(MissingTranslation {
            module: module.clone(),
            locale: locale.clone(),
            res_dir: path_to_normalized_string(res_dir.strip_prefix(root).unwrap_or(res_dir)),
            keys: absent,
        });
    }
    if !missing.is_empty() {
        tracing::info!(locales = missing.len(), "locales with missing translations");
    }
    missing
}
