//! Parallel, safe, deterministic discovery of resource and source files.
//!
//! Performance optimizations:
//! - Early directory pruning via `WalkDir::filter_entry` (O(1) subtree skip)
//! - Parallel file processing via Rayon's `par_bridge`
//!
//! A resource file qualifies when it is an `.xml` file sitting directly in a
//! `res/values` (or, for locale checks, `res/values-<locale>`) directory
//! somewhere under a module's `src` tree and its name matches the pattern of
//! an enabled resource type.

use crate::config::Settings;
use crate::parse::ResourceType;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Directories pruned by default (Gradle/IDE build output and VCS metadata).
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    "build",
    ".gradle",
    ".git",
    ".idea",
    "out",
    "build-cache",
    "node_modules",
];

const VALUES_DIR: &str = "values";

/// A resource file found by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub module: String,
    pub kind: ResourceType,
    /// Locale qualifier for `values-<locale>` strings files
    pub locale: Option<String>,
}

/// Checks if a directory entry should be pruned (excluded from traversal).
#[inline]
fn is_excluded_dir(entry: &walkdir::DirEntry, excludes: &HashSet<&str>, backup_prefix: &str) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| excludes.contains(name) || name.starts_with(backup_prefix))
}

/// Module owning `path`: the components before the first `src`, joined with
/// `/`. A root-level `src` belongs to module `.`; no `src` means no module.
pub fn module_of(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                if name == "src" {
                    return Some(if parts.is_empty() {
                        ".".to_string()
                    } else {
                        parts.join("/")
                    });
                }
                parts.push(name.into_owned());
            }
            _ => continue,
        }
    }
    None
}

/// Directory of a module's sources.
pub fn module_src_dir(root: &Path, module: &str) -> PathBuf {
    if module == "." {
        root.join("src")
    } else {
        root.join(module).join("src")
    }
}

/// Locale qualifier of a `values-*` directory name (`values-zh-rCN` → `zh-rCN`).
///
/// Only language qualifiers count; `values-night`, `values-v21` and friends
/// are configuration qualifiers and yield `None`.
pub fn locale_qualifier(dir_name: &str) -> Option<String> {
    let qualifier = dir_name.strip_prefix("values-")?;
    let first = qualifier.split('-').next()?;
    let is_language = first.starts_with("b+")
        || ((2..=3).contains(&first.len()) && first.chars().all(|c| c.is_ascii_lowercase()));
    is_language.then(|| qualifier.to_string())
}

/// Classify one file path. `None` when it is not a candidate.
fn classify_path(root: &Path, path: &Path, settings: &Settings, include_locales: bool) -> Option<ScannedFile> {
    if !path.extension().is_some_and(|ext| ext == "xml") {
        return None;
    }
    let values_dir = path.parent()?;
    let res_dir = values_dir.parent()?;
    if res_dir.file_name()? != "res" {
        return None;
    }
    let dir_name = values_dir.file_name()?.to_str()?;
    let locale = if dir_name == VALUES_DIR {
        None
    } else if include_locales {
        Some(locale_qualifier(dir_name)?)
    } else {
        return None;
    };

    let kind = settings.type_for_file(path.file_name()?.to_str()?)?;
    if locale.is_some() && kind != ResourceType::String {
        return None;
    }
    let module = module_of(root, path)?;
    Some(ScannedFile {
        path: path.to_path_buf(),
        module,
        kind,
        locale,
    })
}

/// Gathers every candidate resource file under `root` in parallel.
///
/// Base `values` files are always returned; locale strings files only when
/// `include_locales` is set. The output is sorted and deduplicated so it is
/// stable across runs.
pub fn gather_resource_files(root: &Path, settings: &Settings, include_locales: bool) -> Result<Vec<ScannedFile>> {
    let excludes: HashSet<&str> = settings.exclude_dirs.iter().map(String::as_str).collect();
    let backup_prefix = settings.backup_prefix.as_str();

    let mut files = WalkDir::new(root)
        .into_iter()
        // CRITICAL: filter_entry prunes entire subtrees before iteration
        .filter_entry(|e| !is_excluded_dir(e, &excludes, backup_prefix))
        .par_bridge()
        .filter_map(|entry| match entry {
            Ok(e) => {
                if !e.file_type().is_file() {
                    return None;
                }
                classify_path(root, e.path(), settings, include_locales).map(Ok)
            }
            Err(e) => Some(Err(e.into())),
        })
        .collect::<Result<Vec<_>>>()
        .context(format!("Failed to gather resource files from {}", root.display()))?;

    files.sort();
    files.dedup_by(|a, b| a.path == b.path);
    Ok(files)
}

/// Gathers source files (by extension) under one directory, pruning the
/// same directories as the resource scan.
pub fn gather_source_files(dir: &Path, settings: &Settings) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let excludes: HashSet<&str> = settings.exclude_dirs.iter().map(String::as_str).collect();
    let backup_prefix = settings.backup_prefix.as_str();

    let mut files = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| !is_excluded_dir(e, &excludes, backup_prefix))
        .par_bridge()
        .filter_map(|entry| match entry {
            Ok(e) => {
                let path = e.path();
                let wanted = e.file_type().is_file()
                    && path.extension().and_then(|x| x.to_str()).is_some_and(|ext| {
                        settings.source_extensions.iter().any(|s| s == ext)
                    });
                wanted.then(|| Ok(path.to_path_buf()))
            }
            Err(e) => Some(Err(e.into())),
        })
        .collect::<Result<Vec<_>>>()
        .context(format!("Failed to gather source files from {}", dir.display()))?;

    files.sort();
    Ok(files)
}
