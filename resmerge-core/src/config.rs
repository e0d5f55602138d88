//! Configuration loading from resmerge.toml.

use crate::error::{ResmergeError, ResmergeResult};
use crate::parse::ResourceType;
use crate::scan::DEFAULT_EXCLUDED_DIRS;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::{fs, path::Path};

pub const CONFIG_FILE_NAME: &str = "resmerge.toml";

/// Default prefix of backup snapshot directories under the project root.
pub const DEFAULT_BACKUP_PREFIX: &str = ".resmerge-backup-";

const DEFAULT_SHARED_MODULE: &str = "ui";
const DEFAULT_PRIORITY: &[&str] = &["ui", "common-ui", "core", "app"];
const DEFAULT_SOURCE_EXTENSIONS: &[&str] = &["kt", "java", "kts", "xml"];

/// Main configuration structure for resmerge.toml.
#[derive(Debug, Deserialize, Default)]
pub struct ResmergeConfig {
    /// Module that receives every merged entry. An empty string disables it.
    pub shared_module: Option<String>,
    /// Module names tried in order when no shared module is set.
    pub module_priority: Option<Vec<String>>,
    /// Resource types to process.
    pub types: Option<Vec<String>>,
    /// Extra directory names pruned during scanning.
    pub exclude_dirs: Option<Vec<String>>,
    pub backup_prefix: Option<String>,
    /// Extensions of source files searched for references.
    pub source_extensions: Option<Vec<String>>,
    /// Never modify a file that holds a conflicting declaration.
    pub freeze_conflict_files: Option<bool>,
    /// File-name regex per resource type.
    pub patterns: Option<PatternConfig>,
}

/// `[patterns]` table.
#[derive(Debug, Deserialize, Default)]
pub struct PatternConfig {
    pub string: Option<String>,
    pub color: Option<String>,
    pub dimen: Option<String>,
    pub integer: Option<String>,
    pub style: Option<String>,
    pub array: Option<String>,
}

impl PatternConfig {
    fn get(&self, kind: ResourceType) -> Option<&str> {
        match kind {
            ResourceType::String => self.string.as_deref(),
            ResourceType::Color => self.color.as_deref(),
            ResourceType::Dimen => self.dimen.as_deref(),
            ResourceType::Integer => self.integer.as_deref(),
            ResourceType::Style => self.style.as_deref(),
            ResourceType::Array => self.array.as_deref(),
        }
    }
}

/// Resolved settings every stage reads from.
#[derive(Debug, Clone)]
pub struct Settings {
    pub shared_module: Option<String>,
    pub module_priority: Vec<String>,
    /// Enabled types, sorted
    pub types: Vec<ResourceType>,
    /// Pruned directory names (defaults plus user excludes)
    pub exclude_dirs: Vec<String>,
    pub backup_prefix: String,
    pub source_extensions: Vec<String>,
    pub freeze_conflict_files: bool,
    /// Compiled file-name pattern per enabled type, in type order
    pub patterns: Vec<(ResourceType, Regex)>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shared_module: Some(DEFAULT_SHARED_MODULE.to_string()),
            module_priority: DEFAULT_PRIORITY.iter().map(|s| s.to_string()).collect(),
            types: ResourceType::ALL.to_vec(),
            exclude_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
            backup_prefix: DEFAULT_BACKUP_PREFIX.to_string(),
            source_extensions: DEFAULT_SOURCE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            freeze_conflict_files: true,
            patterns: ResourceType::ALL
                .into_iter()
                .filter_map(|t| Regex::new(t.default_pattern()).ok().map(|re| (t, re)))
                .collect(),
        }
    }
}

impl Settings {
    /// Overlay a loaded config file onto the defaults.
    pub fn from_config(cfg: &ResmergeConfig) -> ResmergeResult<Self> {
        let mut settings = Self::default();

        if let Some(shared) = &cfg.shared_module {
            let shared = shared.trim();
            settings.shared_module = (!shared.is_empty()).then(|| shared.to_string());
        }
        if let Some(priority) = &cfg.module_priority {
            settings.module_priority = priority.clone();
        }
        if let Some(types) = &cfg.types {
            settings.set_types(
                &types
                    .iter()
                    .map(|t| t.parse::<ResourceType>())
                    .collect::<ResmergeResult<Vec<_>>>()?,
            );
        }
        if let Some(excludes) = &cfg.exclude_dirs {
            for dir in excludes {
                if !settings.exclude_dirs.contains(dir) {
                    settings.exclude_dirs.push(dir.clone());
                }
            }
        }
        if let Some(prefix) = &cfg.backup_prefix {
            if prefix.trim().is_empty() {
                return Err(ResmergeError::config(
                    CONFIG_FILE_NAME,
                    "backup_prefix must not be empty",
                ));
            }
            settings.backup_prefix = prefix.clone();
        }
        if let Some(exts) = &cfg.source_extensions {
            settings.source_extensions = exts
                .iter()
                .map(|e| e.trim_start_matches('.').to_string())
                .collect();
        }
        if let Some(freeze) = cfg.freeze_conflict_files {
            settings.freeze_conflict_files = freeze;
        }
        if let Some(patterns) = &cfg.patterns {
            for kind in ResourceType::ALL {
                if let Some(pattern) = patterns.get(kind) {
                    settings.set_pattern(kind, pattern)?;
                }
            }
        }
        Ok(settings)
    }

    /// Restrict processing to `types`.
    pub fn set_types(&mut self, types: &[ResourceType]) {
        let mut types = types.to_vec();
        types.sort();
        types.dedup();
        self.types = types;
    }

    /// Replace the file-name pattern for one type.
    pub fn set_pattern(&mut self, kind: ResourceType, pattern: &str) -> ResmergeResult<()> {
        let re = Regex::new(pattern).map_err(|e| {
            ResmergeError::config(
                CONFIG_FILE_NAME,
                format!("invalid pattern for {kind}: {e}"),
            )
        })?;
        match self.patterns.iter_mut().find(|(k, _)| *k == kind) {
            Some(slot) => slot.1 = re,
            None => {
                self.patterns.push((kind, re));
                self.patterns.sort_by_key(|(k, _)| *k);
            }
        }
        Ok(())
    }

    pub fn is_enabled(&self, kind: ResourceType) -> bool {
        self.types.contains(&kind)
    }

    /// The enabled type whose pattern matches `file_name`, if any.
    pub fn type_for_file(&self, file_name: &str) -> Option<ResourceType> {
        self.patterns
            .iter()
            .find(|(kind, re)| self.is_enabled(*kind) && re.is_match(file_name))
            .map(|(kind, _)| *kind)
    }
}

/// Loads configuration from resmerge.toml if it exists.
pub fn load_config(root: &Path) -> Result<Option<ResmergeConfig>> {
    let path = root.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let cfg = toml::from_str(&content).context("Invalid resmerge.toml")?;
    Ok(Some(cfg))
}
