//! Consolidation planning.
//!
//! For every duplicate group the planner picks one canonical target file,
//! decides whether the target needs the entry added, and gates every removal
//! on two checks: the occurrence's module must not reference the key
//! locally, and the file must not be frozen. Files holding a conflicting
//! declaration are frozen when `freeze_conflict_files` is on.
//!
//! Planning reads the filesystem only to inspect target files that were not
//! part of the scan. It never writes.

use crate::classify::Classification;
use crate::config::Settings;
use crate::document::ElementNode;
use crate::index::{CrossModuleIndex, Occurrence};
use crate::parse::{entries_of, read_document, ResourceFile, ResourceKey};
use crate::scan::module_src_dir;
use crate::usage::UsageOracle;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

/// Why a removal was not planned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The module's own sources still use the key
    LocallyReferenced { module: String },
    /// The file holds a conflicting declaration
    FrozenFile,
    /// The group's target could not be written
    TargetFailed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocallyReferenced { module } => write!(f, "locally referenced in {module}"),
            Self::FrozenFile => f.write_str("file holds a conflicting declaration"),
            Self::TargetFailed => f.write_str("target write failed"),
        }
    }
}

/// Remove a key's declaration(s) from one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub file: PathBuf,
    pub module: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRemoval {
    pub key: ResourceKey,
    pub file: PathBuf,
    pub module: String,
    pub reason: SkipReason,
}

/// Plan for one duplicate group.
#[derive(Debug, Clone)]
pub struct GroupPlan {
    pub key: ResourceKey,
    pub value: String,
    pub target_module: String,
    pub target_file: PathBuf,
    /// Hash of the target's bytes at plan time; `None` when it does not exist
    pub target_hash: Option<String>,
    /// Element to append to the target, when it lacks the key
    pub add: Option<ElementNode>,
    pub removals: Vec<Removal>,
    pub skipped: Vec<SkippedRemoval>,
}

impl GroupPlan {
    pub fn is_noop(&self) -> bool {
        self.add.is_none() && self.removals.is_empty()
    }

    /// Every copy outside the target stays because of usage or freezing.
    pub fn is_skipped(&self) -> bool {
        self.removals.is_empty() && !self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionReason {
    /// Target already declares the key with another value
    DifferentValue,
    /// Target exists but cannot be parsed
    Unreadable,
    /// Target needs the entry but is frozen
    Frozen,
}

impl fmt::Display for CollisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DifferentValue => "target declares a different value",
            Self::Unreadable => "target file cannot be parsed",
            Self::Frozen => "target file holds a conflicting declaration",
        })
    }
}

/// A duplicate group that cannot be merged into its target. Reported as a
/// conflict; no file is touched for the key.
#[derive(Debug, Clone)]
pub struct TargetCollision {
    pub key: ResourceKey,
    pub target_module: String,
    pub target_file: PathBuf,
    /// The target's own value when it declares the key
    pub target_value: Option<String>,
    pub reason: CollisionReason,
    pub occurrences: Vec<Occurrence>,
}

/// Removal of a key nothing references (unsafe mode only).
#[derive(Debug, Clone)]
pub struct UnusedRemoval {
    pub key: ResourceKey,
    pub removals: Vec<Removal>,
    pub skipped: Vec<SkippedRemoval>,
}

#[derive(Debug, Clone, Default)]
pub struct ConsolidationPlan {
    pub groups: Vec<GroupPlan>,
    pub collisions: Vec<TargetCollision>,
    /// Keys no source file references (not in conflict)
    pub unused_candidates: Vec<ResourceKey>,
    pub unused_removals: Vec<UnusedRemoval>,
    pub frozen_files: BTreeSet<PathBuf>,
}

impl ConsolidationPlan {
    /// Every file the plan would modify or create.
    pub fn touched_files(&self) -> BTreeSet<PathBuf> {
        let mut files = BTreeSet::new();
        for group in &self.groups {
            if group.add.is_some() {
                files.insert(group.target_file.clone());
            }
            files.extend(group.removals.iter().map(|r| r.file.clone()));
        }
        for unused in &self.unused_removals {
            files.extend(unused.removals.iter().map(|r| r.file.clone()));
        }
        files
    }

    pub fn is_empty(&self) -> bool {
        self.touched_files().is_empty()
    }

    /// Every skipped removal, group ones first.
    pub fn skipped(&self) -> impl Iterator<Item = &SkippedRemoval> {
        self.groups
            .iter()
            .flat_map(|g| g.skipped.iter())
            .chain(self.unused_removals.iter().flat_map(|u| u.skipped.iter()))
    }
}

/// Snapshot of a target file as the planner sees it.
#[derive(Debug, Clone)]
enum TargetState {
    Missing,
    Present {
        hash: String,
        /// key → normalized values declared in the file
        values: HashMap<ResourceKey, Vec<String>>,
    },
    Unreadable,
}

/// Target chosen for a group before removals are gated.
struct Resolved<'g> {
    key: &'g ResourceKey,
    value: &'g str,
    occurrences: &'g [Occurrence],
    module: String,
    file: PathBuf,
    hash: Option<String>,
    add: Option<ElementNode>,
}

/// Builds a [`ConsolidationPlan`] from a classification.
pub struct Planner<'a> {
    root: &'a Path,
    settings: &'a Settings,
    files: &'a [ResourceFile],
    oracle: &'a dyn UsageOracle,
    unsafe_remove_unused: bool,
}

impl<'a> Planner<'a> {
    pub fn new(
        root: &'a Path,
        settings: &'a Settings,
        files: &'a [ResourceFile],
        oracle: &'a dyn UsageOracle,
    ) -> Self {
        Self {
            root,
            settings,
            files,
            oracle,
            unsafe_remove_unused: false,
        }
    }

    /// Also remove keys nothing references.
    pub fn unsafe_remove_unused(mut self, enabled: bool) -> Self {
        self.unsafe_remove_unused = enabled;
        self
    }

    pub fn plan(&self, index: &CrossModuleIndex, classification: &Classification) -> ConsolidationPlan {
        let conflicting: BTreeSet<&ResourceKey> =
            classification.conflicts.iter().map(|c| &c.key).collect();

        // Unsafe mode needs the unused keys before planning groups; otherwise
        // they are computed last, after the local usage queries.
        let early_candidates = self
            .unsafe_remove_unused
            .then(|| self.unused_candidates(index, &conflicting));
        let dropped: BTreeSet<&ResourceKey> = early_candidates.iter().flatten().collect();

        let mut frozen: BTreeSet<PathBuf> = BTreeSet::new();
        if self.settings.freeze_conflict_files {
            for conflict in &classification.conflicts {
                frozen.extend(conflict.occurrences.iter().map(|o| o.file.clone()));
            }
        }

        let mut targets: HashMap<PathBuf, TargetState> = HashMap::new();
        let groups: Vec<_> = classification
            .duplicates
            .iter()
            .filter(|g| !dropped.contains(&g.key))
            .collect();

        // Collisions freeze more files, which can turn more adds into
        // collisions. The frozen set only grows, so this terminates.
        let (resolved, collisions) = loop {
            let mut resolved = Vec::new();
            let mut collisions = Vec::new();
            for group in &groups {
                match self.resolve(&group.key, &group.value, &group.occurrences, &frozen, &mut targets) {
                    Ok(r) => resolved.push(r),
                    Err(c) => collisions.push(c),
                }
            }
            if !self.settings.freeze_conflict_files {
                break (resolved, collisions);
            }
            let mut next = frozen.clone();
            for c in &collisions {
                next.insert(c.target_file.clone());
                next.extend(c.occurrences.iter().map(|o| o.file.clone()));
            }
            if next == frozen {
                break (resolved, collisions);
            }
            frozen = next;
        };

        let groups = resolved
            .into_iter()
            .map(|r| {
                let (removals, skipped) =
                    self.gate_removals(r.key, r.occurrences, Some(&r.file), &frozen);
                GroupPlan {
                    key: r.key.clone(),
                    value: r.value.to_string(),
                    target_module: r.module,
                    target_file: r.file,
                    target_hash: r.hash,
                    add: r.add,
                    removals,
                    skipped,
                }
            })
            .collect();

        let unused_removals = dropped
            .iter()
            .filter_map(|key| {
                let occurrences = index.get(key)?;
                let (removals, skipped) = self.gate_removals(key, occurrences, None, &frozen);
                Some(UnusedRemoval {
                    key: (*key).clone(),
                    removals,
                    skipped,
                })
            })
            .collect();

        let unused_candidates =
            early_candidates.unwrap_or_else(|| self.unused_candidates(index, &conflicting));

        ConsolidationPlan {
            groups,
            collisions,
            unused_candidates,
            unused_removals,
            frozen_files: frozen,
        }
    }

    /// Non-conflicting keys no source file references.
    fn unused_candidates(
        &self,
        index: &CrossModuleIndex,
        conflicting: &BTreeSet<&ResourceKey>,
    ) -> Vec<ResourceKey> {
        index
            .iter()
            .map(|(key, _)| key)
            .filter(|key| !conflicting.contains(key) && !self.oracle.is_referenced_anywhere(key))
            .cloned()
            .collect()
    }

    /// Pick the target and decide the add step.
    fn resolve<'g>(
        &self,
        key: &'g ResourceKey,
        value: &'g str,
        occurrences: &'g [Occurrence],
        frozen: &BTreeSet<PathBuf>,
        targets: &mut HashMap<PathBuf, TargetState>,
    ) -> Result<Resolved<'g>, TargetCollision> {
        let module = self.target_module(occurrences);
        let file = self.target_file(&module, key, occurrences);
        let state = targets
            .entry(file.clone())
            .or_insert_with(|| self.inspect_target(&file))
            .clone();

        let collision = |reason, target_value| TargetCollision {
            key: key.clone(),
            target_module: module.clone(),
            target_file: file.clone(),
            target_value,
            reason,
            occurrences: occurrences.to_vec(),
        };

        let (hash, declared) = match &state {
            TargetState::Missing => (None, None),
            TargetState::Unreadable => return Err(collision(CollisionReason::Unreadable, None)),
            TargetState::Present { hash, values } => (Some(hash.clone()), values.get(key)),
        };

        let add = match declared {
            Some(values) => {
                if let Some(other) = values.iter().find(|v| v.as_str() != value) {
                    return Err(collision(CollisionReason::DifferentValue, Some(other.clone())));
                }
                None
            }
            None => {
                if frozen.contains(&file) {
                    return Err(collision(CollisionReason::Frozen, None));
                }
                occurrences.first().map(|o| o.node.clone())
            }
        };

        Ok(Resolved {
            key,
            value,
            occurrences,
            module,
            file,
            hash,
            add,
        })
    }

    fn target_module(&self, occurrences: &[Occurrence]) -> String {
        if let Some(shared) = &self.settings.shared_module {
            return shared.clone();
        }
        let owners: BTreeSet<&str> = occurrences.iter().map(|o| o.module.as_str()).collect();
        let priority = &self.settings.module_priority;
        priority
            .iter()
            .find(|m| owners.contains(m.as_str()))
            .or_else(|| priority.iter().find(|m| module_src_dir(self.root, m).is_dir()))
            .cloned()
            .or_else(|| owners.iter().next().map(|m| m.to_string()))
            .unwrap_or_default()
    }

    fn target_file(&self, module: &str, key: &ResourceKey, occurrences: &[Occurrence]) -> PathBuf {
        if let Some(occurrence) = occurrences.iter().find(|o| o.module == module) {
            return occurrence.file.clone();
        }
        let default = module_src_dir(self.root, module)
            .join("main")
            .join("res")
            .join("values")
            .join(key.kind.default_file_name());
        if default.exists() {
            return default;
        }
        self.files
            .iter()
            .find(|f| f.module == module && f.kind == key.kind)
            .map(|f| f.path.clone())
            .unwrap_or(default)
    }

    fn inspect_target(&self, path: &Path) -> TargetState {
        let summarize = |hash: &str, entries: &[crate::parse::ResourceEntry]| {
            let mut values: HashMap<ResourceKey, Vec<String>> = HashMap::new();
            for entry in entries {
                values.entry(entry.key.clone()).or_default().push(entry.value.clone());
            }
            TargetState::Present {
                hash: hash.to_string(),
                values,
            }
        };

        if let Some(file) = self.files.iter().find(|f| f.path == path) {
            return summarize(&file.hash, &file.entries);
        }
        if !path.exists() {
            return TargetState::Missing;
        }
        match read_document(path) {
            Ok((document, hash)) => summarize(&hash, &entries_of(&document)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "target file cannot be parsed");
                TargetState::Unreadable
            }
        }
    }

    /// Split a key's occurrences into removals and skipped removals. The
    /// target file, when given, is never a removal.
    fn gate_removals(
        &self,
        key: &ResourceKey,
        occurrences: &[Occurrence],
        target: Option<&PathBuf>,
        frozen: &BTreeSet<PathBuf>,
    ) -> (Vec<Removal>, Vec<SkippedRemoval>) {
        let mut removals: Vec<Removal> = Vec::new();
        let mut skipped: Vec<SkippedRemoval> = Vec::new();
        for occ in occurrences {
            if Some(&occ.file) == target
                || removals.iter().any(|r| r.file == occ.file)
                || skipped.iter().any(|s| s.file == occ.file)
            {
                continue;
            }
            let reason = if self.oracle.is_locally_referenced(key, &occ.module) {
                Some(SkipReason::LocallyReferenced {
                    module: occ.module.clone(),
                })
            } else if frozen.contains(&occ.file) {
                Some(SkipReason::FrozenFile)
            } else {
                None
            };
            match reason {
                Some(reason) => skipped.push(SkippedRemoval {
                    key: key.clone(),
                    file: occ.file.clone(),
                    module: occ.module.clone(),
                    reason,
                }),
                None => removals.push(Removal {
                    file: occ.file.clone(),
                    module: occ.module.clone(),
                }),
            }
        }
        (removals, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::document::ResourceDocument;
    use crate::parse::ResourceType;
    use std::collections::HashSet;

    /// Oracle backed by a fixed set of (key name, module) references.
    struct FixedUsage(HashSet<(String, String)>);

    impl FixedUsage {
        fn new(refs: &[(&str, &str)]) -> Self {
            Self(refs.iter().map(|(k, m)| (k.to_string(), m.to_string())).collect())
        }
    }

    impl UsageOracle for FixedUsage {
        fn is_locally_referenced(&self, key: &ResourceKey, module: &str) -> bool {
            self.0.contains(&(key.name.clone(), module.to_string()))
        }

        fn is_referenced_anywhere(&self, key: &ResourceKey) -> bool {
            self.0.iter().any(|(k, _)| *k == key.name)
        }
    }

    fn file(module: &str, src: &str) -> ResourceFile {
        let document = ResourceDocument::parse(src).unwrap();
        let entries = entries_of(&document);
        ResourceFile {
            path: PathBuf::from(format!("/virtual/{module}/src/main/res/values/strings.xml")),
            module: module.to_string(),
            kind: ResourceType::String,
            hash: format!("hash-{module}"),
            document,
            entries,
        }
    }

    fn strings(body: &str) -> String {
        format!("<resources>{body}</resources>")
    }

    fn run(files: &[ResourceFile], usage: &FixedUsage, settings: &Settings, unsafe_mode: bool) -> ConsolidationPlan {
        let index = CrossModuleIndex::build(files, &ResourceType::ALL);
        let classification = classify(&index);
        Planner::new(Path::new("/virtual"), settings, files, usage)
            .unsafe_remove_unused(unsafe_mode)
            .plan(&index, &classification)
    }

    #[test]
    fn test_merge_into_shared_module() {
        let files = vec![
            file("a", &strings(r#"<string name="save">Save</string>"#)),
            file("b", &strings(r#"<string name="save">Save</string>"#)),
        ];
        let usage = FixedUsage::new(&[("save", "ui")]);
        let plan = run(&files, &usage, &Settings::default(), false);

        assert_eq!(plan.groups.len(), 1);
        let g = &plan.groups[0];
        assert_eq!(g.target_module, "ui");
        assert_eq!(
            g.target_file,
            PathBuf::from("/virtual/ui/src/main/res/values/strings.xml")
        );
        assert!(g.add.is_some());
        assert_eq!(g.target_hash, None);
        assert_eq!(g.removals.len(), 2);
        assert!(g.skipped.is_empty());
        assert_eq!(plan.touched_files().len(), 3);
    }

    #[test]
    fn test_locally_referenced_removal_is_skipped() {
        let files = vec![
            file("a", &strings(r#"<string name="save">Save</string>"#)),
            file("b", &strings(r#"<string name="save">Save</string>"#)),
        ];
        let usage = FixedUsage::new(&[("save", "b")]);
        let plan = run(&files, &usage, &Settings::default(), false);

        let g = &plan.groups[0];
        assert_eq!(g.removals, vec![Removal {
            file: files[0].path.clone(),
            module: "a".into()
        }]);
        assert_eq!(g.skipped.len(), 1);
        assert_eq!(g.skipped[0].reason.to_string(), "locally referenced in b");
    }

    #[test]
    fn test_priority_module_owning_occurrence_is_target() {
        let files = vec![
            file("app", &strings(r#"<string name="save">Save</string>"#)),
            file("core", &strings(r#"<string name="save">Save</string>"#)),
        ];
        let mut settings = Settings::default();
        settings.shared_module = None;
        let plan = run(&files, &FixedUsage::new(&[("save", "x")]), &settings, false);

        let g = &plan.groups[0];
        assert_eq!(g.target_module, "core");
        assert_eq!(g.target_file, files[1].path);
        assert!(g.add.is_none(), "target already declares the key");
        assert_eq!(g.target_hash.as_deref(), Some("hash-core"));
        assert_eq!(g.removals.len(), 1);
        assert_eq!(g.removals[0].module, "app");
    }

    #[test]
    fn test_smallest_module_when_no_priority_matches() {
        let files = vec![
            file("zeta", &strings(r#"<string name="save">Save</string>"#)),
            file("alpha", &strings(r#"<string name="save">Save</string>"#)),
        ];
        let mut settings = Settings::default();
        settings.shared_module = None;
        settings.module_priority = vec!["nowhere".into()];
        let plan = run(&files, &FixedUsage::new(&[("save", "x")]), &settings, false);
        assert_eq!(plan.groups[0].target_module, "alpha");
    }

    #[test]
    fn test_target_with_different_value_is_a_collision() {
        let files = vec![
            file("ui", &strings(r#"<string name="save">Store</string><string name="ok">OK</string>"#)),
            file("a", &strings(r#"<string name="save">Save</string><string name="ok">OK</string>"#)),
            file("b", &strings(r#"<string name="save">Save</string>"#)),
        ];
        // ui/save differs, so "save" is a source conflict, not a duplicate.
        let plan = run(&files, &FixedUsage::new(&[("save", "x"), ("ok", "x")]), &Settings::default(), false);
        assert!(plan.collisions.is_empty());
        assert!(plan.frozen_files.contains(&files[0].path));
        assert!(plan.frozen_files.contains(&files[1].path));

        let ok = &plan.groups[0];
        assert_eq!(ok.key.name, "ok");
        assert!(ok.add.is_none());
        assert!(ok.removals.is_empty());
        assert_eq!(ok.skipped[0].reason, SkipReason::FrozenFile);
    }

    #[test]
    fn test_frozen_target_needing_add_collides() {
        let files = vec![
            file("ui", &strings(r#"<string name="title">A</string>"#)),
            file("core", &strings(r#"<string name="title">B</string>"#)),
            file("a", &strings(r#"<string name="save">Save</string>"#)),
            file("b", &strings(r#"<string name="save">Save</string>"#)),
        ];
        let usage = FixedUsage::new(&[("title", "x"), ("save", "x")]);
        let plan = run(&files, &usage, &Settings::default(), false);

        assert!(plan.groups.is_empty());
        assert_eq!(plan.collisions.len(), 1);
        assert_eq!(plan.collisions[0].reason, CollisionReason::Frozen);
        assert!(plan.touched_files().is_empty());

        let mut relaxed = Settings::default();
        relaxed.freeze_conflict_files = false;
        let plan = run(&files, &usage, &relaxed, false);
        assert!(plan.collisions.is_empty());
        assert_eq!(plan.groups[0].removals.len(), 2);
    }

    #[test]
    fn test_unused_keys() {
        let files = vec![
            file("a", &strings(r#"<string name="save">Save</string><string name="gone">x</string>"#)),
            file("b", &strings(r#"<string name="save">Save</string><string name="gone">x</string>"#)),
        ];
        let usage = FixedUsage::new(&[("save", "c")]);

        let plan = run(&files, &usage, &Settings::default(), false);
        assert_eq!(plan.unused_candidates, vec![ResourceKey::new(ResourceType::String, "gone")]);
        assert!(plan.unused_removals.is_empty());
        assert_eq!(plan.groups.len(), 2);

        let plan = run(&files, &usage, &Settings::default(), true);
        assert_eq!(plan.groups.len(), 1, "unused keys are removed, not merged");
        assert_eq!(plan.unused_removals.len(), 1);
        assert_eq!(plan.unused_removals[0].removals.len(), 2);
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(
            SkipReason::LocallyReferenced { module: "feature/home".into() }.to_string(),
            "locally referenced in feature/home"
        );
        assert_eq!(SkipReason::TargetFailed.to_string(), "target write failed");
    }
}
