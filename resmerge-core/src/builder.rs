//! Builder pattern API for a consolidation run.
//!
//! ```rust,ignore
//! use resmerge_core::prelude::*;
//!
//! let result = Resmerge::new("/path/to/project")
//!     .mode(RunMode::DryRun)
//!     .check_locales(true)
//!     .run()?;
//!
//! print_plain(&result.report);
//! ```
//!
//! A run walks `SCAN → PARSE/INDEX → CLASSIFY → PLAN → [BACKUP → APPLY] →
//! REPORT`. Report and dry-run modes stop after planning.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::classify::{classify, cross_name_candidates, Classification};
use crate::config::{load_config, Settings};
use crate::index::CrossModuleIndex;
use crate::locales::check_locales;
use crate::parse::{parse_resource_files, ResourceFile};
use crate::plan::{ConsolidationPlan, Planner};
use crate::report::{ConsolidationReport, ReportInput};
use crate::scan::gather_resource_files;
use crate::usage::{LazyUsageScanner, UsageIndex, UsageOracle};

/// What a run is allowed to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Classify and report; never writes
    #[default]
    Report,
    /// Full plan, no writes
    DryRun,
    /// Back up, then rewrite files
    Apply,
}

/// Builder for configuring a consolidation run.
#[derive(Debug, Clone)]
pub struct Resmerge {
    /// Project root; every path is resolved against it
    root: PathBuf,

    /// Explicit settings; `resmerge.toml` is read when absent
    settings: Option<Settings>,

    /// Overrides applied on top of the resolved settings
    shared_module: Option<Option<String>>,
    module_priority: Option<Vec<String>>,
    freeze_conflict_files: Option<bool>,

    mode: RunMode,

    /// Also remove keys nothing references
    unsafe_remove_unused: bool,

    /// Compare base strings with `values-<locale>` directories
    check_locales: bool,

    /// Scan module sources on demand instead of all up front
    lazy_usage: bool,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub report: ConsolidationReport,
    pub plan: ConsolidationPlan,
    pub classification: Classification,
}

impl Resmerge {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            settings: None,
            shared_module: None,
            module_priority: None,
            freeze_conflict_files: None,
            mode: RunMode::default(),
            unsafe_remove_unused: false,
            check_locales: false,
            lazy_usage: false,
        }
    }

    /// Use these settings instead of loading `resmerge.toml`.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Module receiving merged entries; `None` falls back to the priority list.
    pub fn shared_module(mut self, module: Option<String>) -> Self {
        self.shared_module = Some(module);
        self
    }

    pub fn module_priority(mut self, modules: Vec<String>) -> Self {
        self.module_priority = Some(modules);
        self
    }

    pub fn freeze_conflict_files(mut self, enabled: bool) -> Self {
        self.freeze_conflict_files = Some(enabled);
        self
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn unsafe_remove_unused(mut self, enabled: bool) -> Self {
        self.unsafe_remove_unused = enabled;
        self
    }

    pub fn check_locales(mut self, enabled: bool) -> Self {
        self.check_locales = enabled;
        self
    }

    pub fn lazy_usage(mut self, enabled: bool) -> Self {
        self.lazy_usage = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_settings(&self) -> Result<Settings> {
        let mut settings = match &self.settings {
            Some(settings) => settings.clone(),
            None => match load_config(&self.root)? {
                Some(cfg) => Settings::from_config(&cfg).context("Invalid resmerge.toml")?,
                None => Settings::default(),
            },
        };
        if let Some(shared) = &self.shared_module {
            settings.shared_module = shared.clone().filter(|m| !m.trim().is_empty());
        }
        if let Some(priority) = &self.module_priority {
            settings.module_priority = priority.clone();
        }
        if let Some(freeze) = self.freeze_conflict_files {
            settings.freeze_conflict_files = freeze;
        }
        Ok(settings)
    }

    /// Run the pipeline.
    pub fn run(&self) -> Result<RunResult> {
        if !self.root.is_dir() {
            anyhow::bail!("Project root {} is not a directory", self.root.display());
        }
        if self.mode == RunMode::Apply && !cfg!(feature = "apply") {
            anyhow::bail!("Apply mode requires the `apply` feature");
        }

        let settings = self.resolve_settings()?;
        tracing::info!(root = %self.root.display(), mode = ?self.mode, "consolidation started");

        // 1. Scan
        let scanned = gather_resource_files(&self.root, &settings, self.check_locales)
            .context("Failed to gather resource files")?;
        let (base, localized): (Vec<_>, Vec<_>) =
            scanned.into_iter().partition(|f| f.locale.is_none());

        // 2. Parse and index
        let (files, parse_errors) = parse_resource_files(&base);
        let index = CrossModuleIndex::build(&files, &settings.types);
        tracing::info!(
            files = files.len(),
            keys = index.len(),
            malformed = parse_errors.len(),
            "resource index built"
        );

        // 3. Classify
        let classification = classify(&index);
        tracing::info!(
            duplicates = classification.duplicates.len(),
            conflicts = classification.conflicts.len(),
            "keys classified"
        );

        // 4. Plan
        let plan = {
            let oracle: Box<dyn UsageOracle> = if self.lazy_usage {
                Box::new(LazyUsageScanner::new(self.root.clone(), settings.clone()))
            } else {
                Box::new(
                    UsageIndex::build(&self.root, &settings)
                        .context("Failed to scan source files for references")?,
                )
            };
            Planner::new(&self.root, &settings, &files, oracle.as_ref())
                .unsafe_remove_unused(self.unsafe_remove_unused)
                .plan(&index, &classification)
        };
        tracing::info!(
            groups = plan.groups.len(),
            collisions = plan.collisions.len(),
            files = plan.touched_files().len(),
            "plan ready"
        );

        let missing_translations = if self.check_locales {
            let (localized, _) = parse_resource_files(&localized);
            check_locales(&self.root, &files, &localized)
        } else {
            Vec::new()
        };

        let mut report = ConsolidationReport::from_plan(ReportInput {
            mode: self.mode,
            root: &self.root,
            files_scanned: base.len(),
            index: &index,
            classification: &classification,
            plan: &plan,
            parse_errors: &parse_errors,
            cross_name_candidates: cross_name_candidates(&index),
            missing_translations,
        });

        // 5. Backup and apply
        if self.mode == RunMode::Apply {
            self.execute(&settings, &files, &plan, &mut report)?;
        }

        tracing::info!(
            merged = report.summary.merged,
            conflicts = report.summary.conflicts,
            "consolidation finished"
        );
        Ok(RunResult {
            report,
            plan,
            classification,
        })
    }

    #[cfg(feature = "apply")]
    fn execute(
        &self,
        settings: &Settings,
        files: &[ResourceFile],
        plan: &ConsolidationPlan,
        report: &mut ConsolidationReport,
    ) -> Result<()> {
        let touched = plan.touched_files();
        if touched.is_empty() {
            tracing::info!("nothing to apply");
            return Ok(());
        }

        let backup = crate::backup::create_backup(&self.root, &settings.backup_prefix, &touched)
            .context("Backup failed; no file was modified")?;
        let outcome = crate::apply::Executor::new(files).apply(plan);
        report.apply_outcome(&self.root, plan, &outcome, Some(&backup.dir));
        Ok(())
    }

    #[cfg(not(feature = "apply"))]
    fn execute(
        &self,
        _settings: &Settings,
        _files: &[ResourceFile],
        _plan: &ConsolidationPlan,
        _report: &mut ConsolidationReport,
    ) -> Result<()> {
        anyhow::bail!("Apply mode requires the `apply` feature")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_mode_serializes_kebab_case() {
        assert_eq!(serde_json::to_string(&RunMode::DryRun).unwrap(), "\"dry-run\"");
        assert_eq!(RunMode::default(), RunMode::Report);
    }

    #[test]
    fn test_overrides_apply_on_top_of_settings() {
        let engine = Resmerge::new("/nowhere")
            .settings(Settings::default())
            .shared_module(Some("  ".into()))
            .module_priority(vec!["core".into()])
            .freeze_conflict_files(false);
        let settings = engine.resolve_settings().unwrap();
        assert_eq!(settings.shared_module, None);
        assert_eq!(settings.module_priority, vec!["core".to_string()]);
        assert!(!settings.freeze_conflict_files);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let err = Resmerge::new("/definitely/not/a/project").run().unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }
}
