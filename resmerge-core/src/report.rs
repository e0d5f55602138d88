//! Output formatting - plaintext and JSON.
//!
//! The report is built from the plan right after planning (report and
//! dry-run modes stop there) and updated with the executor's outcome in
//! apply mode.

use crate::builder::RunMode;
use crate::classify::{Classification, CrossNameCandidate};
use crate::index::{CrossModuleIndex, Occurrence};
use crate::locales::MissingTranslation;
use crate::parse::{path_to_normalized_string, ParseFailure, ResourceKey, ResourceType};
use crate::plan::{ConsolidationPlan, SkippedRemoval};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub files_scanned: usize,
    pub keys_indexed: usize,
    pub duplicate_groups: usize,
    pub conflicts: usize,
    pub merged: usize,
    pub skipped_removals: usize,
    pub unused_candidates: usize,
    pub removed_unused: usize,
    pub parse_errors: usize,
    pub write_failures: usize,
    pub files_changed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergedEntry {
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub name: String,
    pub value: String,
    pub target: String,
    pub target_module: String,
    pub added: bool,
    pub removed_from: Vec<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictValue {
    pub file: String,
    pub module: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictEntry {
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub name: String,
    /// `source` (declarations disagree) or `target` (target disagrees)
    pub conflict: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub values: Vec<ConflictValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedEntry {
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub name: String,
    pub file: String,
    pub module: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnusedEntry {
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub name: String,
    pub removed_from: Vec<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteFailure {
    pub file: String,
    pub reason: String,
}

/// Structured record of one run.
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationReport {
    pub mode: RunMode,
    pub root: String,
    pub summary: Summary,
    pub merged: Vec<MergedEntry>,
    pub conflicts: Vec<ConflictEntry>,
    pub skipped: Vec<SkippedEntry>,
    pub unused_candidates: Vec<ResourceKey>,
    pub removed_unused: Vec<UnusedEntry>,
    pub parse_errors: Vec<ParseFailure>,
    pub write_failures: Vec<WriteFailure>,
    pub backup: Option<String>,
    pub cross_name_candidates: Vec<CrossNameCandidate>,
    pub missing_translations: Vec<MissingTranslation>,
}

fn rel(root: &Path, path: &Path) -> String {
    path_to_normalized_string(path.strip_prefix(root).unwrap_or(path))
}

fn conflict_values(root: &Path, occurrences: &[Occurrence]) -> Vec<ConflictValue> {
    occurrences
        .iter()
        .map(|o| ConflictValue {
            file: rel(root, &o.file),
            module: o.module.clone(),
            value: o.value.clone(),
        })
        .collect()
}

fn skipped_entry(root: &Path, s: &SkippedRemoval) -> SkippedEntry {
    SkippedEntry {
        kind: s.key.kind,
        name: s.key.name.clone(),
        file: rel(root, &s.file),
        module: s.module.clone(),
        reason: s.reason.to_string(),
    }
}

/// Everything the report is built from, up to planning.
pub struct ReportInput<'a> {
    pub mode: RunMode,
    pub root: &'a Path,
    pub files_scanned: usize,
    pub index: &'a CrossModuleIndex,
    pub classification: &'a Classification,
    pub plan: &'a ConsolidationPlan,
    pub parse_errors: &'a [ParseFailure],
    pub cross_name_candidates: Vec<CrossNameCandidate>,
    pub missing_translations: Vec<MissingTranslation>,
}

impl ConsolidationReport {
    /// Report of what the plan would do. Nothing has been written yet.
    pub fn from_plan(input: ReportInput<'_>) -> Self {
        let root = input.root;
        let plan = input.plan;

        let merged = plan
            .groups
            .iter()
            .map(|g| MergedEntry {
                kind: g.key.kind,
                name: g.key.name.clone(),
                value: g.value.clone(),
                target: rel(root, &g.target_file),
                target_module: g.target_module.clone(),
                added: g.add.is_some(),
                removed_from: g.removals.iter().map(|r| rel(root, &r.file)).collect(),
                status: if g.is_skipped() {
                    "skipped"
                } else if g.is_noop() {
                    "unchanged"
                } else {
                    "planned"
                }
                .to_string(),
            })
            .collect();

        let mut conflicts: Vec<ConflictEntry> = input
            .classification
            .conflicts
            .iter()
            .map(|c| ConflictEntry {
                kind: c.key.kind,
                name: c.key.name.clone(),
                conflict: "source",
                reason: None,
                values: conflict_values(root, &c.occurrences),
            })
            .collect();
        conflicts.extend(plan.collisions.iter().map(|c| {
            let mut values = conflict_values(root, &c.occurrences);
            if let Some(target_value) = &c.target_value {
                values.push(ConflictValue {
                    file: rel(root, &c.target_file),
                    module: c.target_module.clone(),
                    value: target_value.clone(),
                });
            }
            ConflictEntry {
                kind: c.key.kind,
                name: c.key.name.clone(),
                conflict: "target",
                reason: Some(c.reason.to_string()),
                values,
            }
        }));

        let skipped = plan.skipped().map(|s| skipped_entry(root, s)).collect();

        let removed_unused = plan
            .unused_removals
            .iter()
            .map(|u| UnusedEntry {
                kind: u.key.kind,
                name: u.key.name.clone(),
                removed_from: u.removals.iter().map(|r| rel(root, &r.file)).collect(),
                status: "planned".to_string(),
            })
            .collect();

        let mut report = Self {
            mode: input.mode,
            root: path_to_normalized_string(root),
            summary: Summary {
                files_scanned: input.files_scanned,
                keys_indexed: input.index.len(),
                duplicate_groups: input.classification.duplicates.len(),
                ..Summary::default()
            },
            merged,
            conflicts,
            skipped,
            unused_candidates: plan.unused_candidates.clone(),
            removed_unused,
            parse_errors: input.parse_errors.to_vec(),
            write_failures: Vec::new(),
            backup: None,
            cross_name_candidates: input.cross_name_candidates,
            missing_translations: input.missing_translations,
        };
        report.summary.files_changed = plan.touched_files().len();
        report.refresh_summary();
        report
    }

    /// Record the executor's outcome.
    #[cfg(feature = "apply")]
    pub fn apply_outcome(
        &mut self,
        root: &Path,
        plan: &ConsolidationPlan,
        outcome: &crate::apply::ApplyOutcome,
        backup_dir: Option<&Path>,
    ) {
        for (entry, group) in self.merged.iter_mut().zip(&outcome.groups) {
            entry.status = group.status.as_str().to_string();
            entry.added = group.added;
            entry.removed_from = group.removed_from.iter().map(|p| rel(root, p)).collect();
            self.skipped
                .extend(group.dropped.iter().map(|s| skipped_entry(root, s)));
        }
        for ((entry, unused), removed) in self
            .removed_unused
            .iter_mut()
            .zip(&plan.unused_removals)
            .zip(&outcome.unused_removed_from)
        {
            entry.status = if removed.len() == unused.removals.len() {
                "removed"
            } else {
                "partial"
            }
            .to_string();
            entry.removed_from = removed.iter().map(|p| rel(root, p)).collect();
        }
        self.write_failures = outcome
            .failures()
            .map(|(path, reason)| WriteFailure {
                file: rel(root, path),
                reason: reason.to_string(),
            })
            .collect();
        self.backup = backup_dir.map(path_to_normalized_string);
        self.summary.files_changed = outcome.written_count();
        self.refresh_summary();
    }

    fn refresh_summary(&mut self) {
        let s = &mut self.summary;
        s.conflicts = self.conflicts.len();
        s.merged = self
            .merged
            .iter()
            .filter(|m| !matches!(m.status.as_str(), "unchanged" | "skipped" | "target_failed"))
            .count();
        s.skipped_removals = self.skipped.len();
        s.unused_candidates = self.unused_candidates.len();
        s.removed_unused = self.removed_unused.len();
        s.parse_errors = self.parse_errors.len();
        s.write_failures = self.write_failures.len();
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Prints the report in plain text format.
pub fn print_plain(report: &ConsolidationReport) {
    let s = &report.summary;
    println!("resmerge ({:?}) {}", report.mode, report.root);
    println!(
        "scanned {} files, {} keys: {} duplicate groups, {} conflicts",
        s.files_scanned, s.keys_indexed, s.duplicate_groups, s.conflicts
    );

    if !report.merged.is_empty() {
        println!("\nMERGED ({}):", report.merged.len());
        for m in &report.merged {
            println!(
                "- {}/{} -> {} [{}] removed from {} file(s)",
                m.kind,
                m.name,
                m.target,
                m.status,
                m.removed_from.len()
            );
        }
    }
    if !report.conflicts.is_empty() {
        println!("\nCONFLICTS ({}):", report.conflicts.len());
        for c in &report.conflicts {
            println!("- {}/{} ({})", c.kind, c.name, c.conflict);
            for v in &c.values {
                println!("    {} [{}]: {}", v.file, v.module, v.value);
            }
        }
    }
    if !report.skipped.is_empty() {
        println!("\nSKIPPED ({}):", report.skipped.len());
        for sk in &report.skipped {
            println!("- {}/{} in {}: {}", sk.kind, sk.name, sk.file, sk.reason);
        }
    }
    if !report.unused_candidates.is_empty() {
        println!("\nUNUSED CANDIDATES ({}):", report.unused_candidates.len());
        for key in &report.unused_candidates {
            println!("- {}", key);
        }
    }
    if !report.removed_unused.is_empty() {
        println!("\nREMOVED UNUSED ({}):", report.removed_unused.len());
        for u in &report.removed_unused {
            println!("- {}/{} [{}]", u.kind, u.name, u.status);
        }
    }
    if !report.cross_name_candidates.is_empty() {
        println!("\nSAME VALUE, DIFFERENT NAMES ({}):", report.cross_name_candidates.len());
        for c in &report.cross_name_candidates {
            println!("- {} {:?}: {}", c.kind, c.value, c.names.join(", "));
        }
    }
    if !report.missing_translations.is_empty() {
        println!("\nMISSING TRANSLATIONS:");
        for m in &report.missing_translations {
            println!("- {} ({}): {}", m.res_dir, m.locale, m.keys.join(", "));
        }
    }
    for e in &report.parse_errors {
        println!("[PARSE ERROR] {}: {}", e.path.display(), e.message);
    }
    for f in &report.write_failures {
        println!("[WRITE FAILED] {}: {}", f.file, f.reason);
    }
    if let Some(backup) = &report.backup {
        println!("\nBackup: {}", backup);
    }
}

/// Prints the report in JSON format.
pub fn print_json(report: &ConsolidationReport) {
    match report.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("[WARN] JSON serialization failed: {}", e);
            println!("{{\"mode\": {:?}, \"conflicts\": {}}}", report.mode, report.conflicts.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::config::Settings;
    use crate::document::ResourceDocument;
    use crate::parse::{entries_of, ResourceFile};
    use crate::plan::Planner;
    use crate::usage::UsageOracle;
    use std::path::PathBuf;

    struct NothingUsed;

    impl UsageOracle for NothingUsed {
        fn is_locally_referenced(&self, _: &ResourceKey, _: &str) -> bool {
            false
        }
        fn is_referenced_anywhere(&self, _: &ResourceKey) -> bool {
            true
        }
    }

    fn file(module: &str, src: &str) -> ResourceFile {
        let document = ResourceDocument::parse(src).unwrap();
        let entries = entries_of(&document);
        ResourceFile {
            path: PathBuf::from(format!("/p/{module}/src/main/res/values/strings.xml")),
            module: module.to_string(),
            kind: ResourceType::String,
            hash: String::new(),
            document,
            entries,
        }
    }

    fn report() -> ConsolidationReport {
        let files = vec![
            file("a", r#"<resources><string name="save">Save</string><string name="t">A</string></resources>"#),
            file("b", r#"<resources><string name="save">Save</string><string name="t">B</string></resources>"#),
        ];
        let index = CrossModuleIndex::build(&files, &ResourceType::ALL);
        let classification = classify(&index);
        let settings = Settings::default();
        let plan = Planner::new(Path::new("/p"), &settings, &files, &NothingUsed).plan(&index, &classification);
        ConsolidationReport::from_plan(ReportInput {
            mode: RunMode::DryRun,
            root: Path::new("/p"),
            files_scanned: files.len(),
            index: &index,
            classification: &classification,
            plan: &plan,
            parse_errors: &[],
            cross_name_candidates: Vec::new(),
            missing_translations: Vec::new(),
        })
    }

    #[test]
    fn test_report_from_plan() {
        let r = report();
        assert_eq!(r.summary.keys_indexed, 2);
        assert_eq!(r.summary.duplicate_groups, 1);
        assert_eq!(r.summary.conflicts, 1);
        assert!(r.has_conflicts());
        assert_eq!(r.conflicts[0].conflict, "source");
        assert_eq!(r.conflicts[0].values.len(), 2);
        // Both source files hold the conflicting key, so they are frozen.
        assert_eq!(r.merged[0].target, "ui/src/main/res/values/strings.xml");
        assert_eq!(r.skipped.len(), 2);
        assert!(r.skipped.iter().all(|s| s.reason == "file holds a conflicting declaration"));
    }

    #[test]
    fn test_report_json_shape() {
        let json: serde_json::Value = serde_json::from_str(&report().to_json().unwrap()).unwrap();
        assert_eq!(json["mode"], "dry-run");
        assert_eq!(json["merged"][0]["type"], "string");
        assert_eq!(json["merged"][0]["name"], "save");
        assert_eq!(json["conflicts"][0]["values"][0]["file"], "a/src/main/res/values/strings.xml");
        assert!(json["backup"].is_null());
        assert!(json["summary"]["files_scanned"].is_number());
    }
}
