//! Plan execution with per-file batching and staged, atomic rewrites.
//!
//! Every edit of a wave is grouped by file so each file is rewritten at most
//! once per wave by exactly one Rayon worker. A worker verifies the file's
//! on-disk SHA-256 against the scan-time (or previously committed) hash,
//! applies its edits to the lossless document and stages the result to a
//! temp file next to the original. Renames happen only after the whole wave
//! is staged.
//!
//! - Wave 1: adds to target files plus removals that do not depend on an add
//!   (groups whose target already declares the key, unused removals).
//! - Wave 2: removals of groups whose target committed in wave 1. Removals
//!   of a group whose target failed are dropped and reported.

use crate::document::{ElementNode, ResourceDocument};
use crate::error::{ResmergeError, ResmergeResult};
use crate::parse::{hash_bytes, parse_document, ResourceFile, ResourceKey, ResourceType};
use crate::plan::{ConsolidationPlan, SkipReason, SkippedRemoval};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Written,
    Created,
    /// Rendering produced identical bytes; nothing written
    Unchanged,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub status: FileStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    /// Target holds the entry and every planned removal was written
    Merged,
    /// Nothing to do for this group
    Unchanged,
    /// Every removal was skipped (local usage or frozen file)
    Skipped,
    /// Some removal files failed
    Partial,
    /// Target could not be written; no removal was attempted
    TargetFailed,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merged => "merged",
            Self::Unchanged => "unchanged",
            Self::Skipped => "skipped",
            Self::Partial => "partial",
            Self::TargetFailed => "target_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub key: ResourceKey,
    pub status: GroupStatus,
    pub added: bool,
    pub removed_from: Vec<PathBuf>,
    /// Removals dropped because the target failed
    pub dropped: Vec<SkippedRemoval>,
}

#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    /// One entry per touched file, sorted by path
    pub files: Vec<FileOutcome>,
    /// Parallel to `plan.groups`
    pub groups: Vec<GroupOutcome>,
    /// Parallel to `plan.unused_removals`: files the key was removed from
    pub unused_removed_from: Vec<Vec<PathBuf>>,
}

impl ApplyOutcome {
    pub fn failures(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.files.iter().filter_map(|f| match &f.status {
            FileStatus::Failed(reason) => Some((f.path.as_path(), reason.as_str())),
            _ => None,
        })
    }

    pub fn written_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Written | FileStatus::Created))
            .count()
    }
}

/// Accumulated edits for one file in one wave.
#[derive(Debug, Default)]
struct FileEdit {
    adds: Vec<(ResourceKey, ElementNode)>,
    removes: Vec<ResourceKey>,
    /// Plan-time hash for targets outside the scan (`None`: file absent)
    planned_hash: Option<Option<String>>,
}

enum Staged {
    Unchanged,
    Ready {
        temp: PathBuf,
        hash: String,
        document: ResourceDocument,
        created: bool,
    },
}

/// Applies a [`ConsolidationPlan`].
pub struct Executor<'a> {
    scanned: HashMap<&'a Path, &'a ResourceFile>,
    /// Files already rewritten in this run: current hash and document
    committed: HashMap<PathBuf, (String, ResourceDocument)>,
    statuses: BTreeMap<PathBuf, FileStatus>,
}

impl<'a> Executor<'a> {
    pub fn new(files: &'a [ResourceFile]) -> Self {
        Self {
            scanned: files.iter().map(|f| (f.path.as_path(), f)).collect(),
            committed: HashMap::new(),
            statuses: BTreeMap::new(),
        }
    }

    pub fn apply(mut self, plan: &ConsolidationPlan) -> ApplyOutcome {
        // Wave 1
        let mut wave: BTreeMap<PathBuf, FileEdit> = BTreeMap::new();
        for group in &plan.groups {
            match &group.add {
                Some(node) => {
                    let edit = wave.entry(group.target_file.clone()).or_default();
                    edit.adds.push((group.key.clone(), node.clone()));
                    edit.planned_hash = Some(group.target_hash.clone());
                }
                None => {
                    for removal in &group.removals {
                        wave.entry(removal.file.clone())
                            .or_default()
                            .removes
                            .push(group.key.clone());
                    }
                }
            }
        }
        for unused in &plan.unused_removals {
            for removal in &unused.removals {
                wave.entry(removal.file.clone())
                    .or_default()
                    .removes
                    .push(unused.key.clone());
            }
        }
        self.run_wave(wave);

        // Wave 2
        let mut wave: BTreeMap<PathBuf, FileEdit> = BTreeMap::new();
        for group in plan.groups.iter().filter(|g| g.add.is_some()) {
            if self.is_failed(&group.target_file) {
                continue;
            }
            for removal in &group.removals {
                wave.entry(removal.file.clone())
                    .or_default()
                    .removes
                    .push(group.key.clone());
            }
        }
        self.run_wave(wave);

        let groups = plan
            .groups
            .iter()
            .map(|group| {
                let target_failed = group.add.is_some() && self.is_failed(&group.target_file);
                if target_failed {
                    return GroupOutcome {
                        key: group.key.clone(),
                        status: GroupStatus::TargetFailed,
                        added: false,
                        removed_from: Vec::new(),
                        dropped: group
                            .removals
                            .iter()
                            .map(|r| SkippedRemoval {
                                key: group.key.clone(),
                                file: r.file.clone(),
                                module: r.module.clone(),
                                reason: SkipReason::TargetFailed,
                            })
                            .collect(),
                    };
                }
                let removed_from: Vec<PathBuf> = group
                    .removals
                    .iter()
                    .filter(|r| !self.is_failed(&r.file))
                    .map(|r| r.file.clone())
                    .collect();
                let status = if removed_from.len() < group.removals.len() {
                    GroupStatus::Partial
                } else if group.is_skipped() {
                    GroupStatus::Skipped
                } else if group.is_noop() {
                    GroupStatus::Unchanged
                } else {
                    GroupStatus::Merged
                };
                GroupOutcome {
                    key: group.key.clone(),
                    status,
                    added: group.add.is_some(),
                    removed_from,
                    dropped: Vec::new(),
                }
            })
            .collect();

        let unused_removed_from = plan
            .unused_removals
            .iter()
            .map(|u| {
                u.removals
                    .iter()
                    .filter(|r| !self.is_failed(&r.file))
                    .map(|r| r.file.clone())
                    .collect()
            })
            .collect();

        ApplyOutcome {
            files: self
                .statuses
                .into_iter()
                .map(|(path, status)| FileOutcome { path, status })
                .collect(),
            groups,
            unused_removed_from,
        }
    }

    fn is_failed(&self, path: &Path) -> bool {
        matches!(self.statuses.get(path), Some(FileStatus::Failed(_)))
    }

    /// A failure sticks; `Created` is not downgraded by a later rewrite.
    fn record(&mut self, path: PathBuf, status: FileStatus) {
        let next = match (self.statuses.remove(&path), status) {
            (Some(FileStatus::Failed(prev)), _) => FileStatus::Failed(prev),
            (_, FileStatus::Failed(reason)) => FileStatus::Failed(reason),
            (Some(FileStatus::Created), _) => FileStatus::Created,
            (Some(prev), FileStatus::Unchanged) => prev,
            (_, status) => status,
        };
        self.statuses.insert(path, next);
    }

    fn run_wave(&mut self, wave: BTreeMap<PathBuf, FileEdit>) {
        let edits: Vec<(PathBuf, FileEdit)> = wave
            .into_iter()
            .filter(|(path, _)| !self.is_failed(path))
            .collect();
        if edits.is_empty() {
            return;
        }

        let this = &*self;
        let staged: Vec<(PathBuf, ResmergeResult<Staged>)> = edits
            .par_iter()
            .map(|(path, edit)| (path.clone(), this.stage(path, edit)))
            .collect();

        for (path, result) in staged {
            match result {
                Ok(Staged::Unchanged) => self.record(path, FileStatus::Unchanged),
                Ok(Staged::Ready {
                    temp,
                    hash,
                    document,
                    created,
                }) => match fs::rename(&temp, &path) {
                    Ok(()) => {
                        tracing::debug!(path = %path.display(), created, "file committed");
                        self.committed.insert(path.clone(), (hash, document));
                        let status = if created {
                            FileStatus::Created
                        } else {
                            FileStatus::Written
                        };
                        self.record(path, status);
                    }
                    Err(e) => {
                        let _ = fs::remove_file(&temp);
                        let err = ResmergeError::apply(&path, format!("rename failed: {e}"));
                        tracing::error!(path = %path.display(), error = %err, "file rewrite aborted");
                        self.record(path, FileStatus::Failed(err.to_string()));
                    }
                },
                Err(err) => {
                    tracing::error!(path = %path.display(), error = %err, "file rewrite aborted");
                    self.record(path, FileStatus::Failed(err.to_string()));
                }
            }
        }
    }

    /// Hash the file is expected to have on disk right now; `None` when it
    /// is expected to be absent.
    fn expected_hash(&self, path: &Path, edit: &FileEdit) -> ResmergeResult<Option<String>> {
        if let Some((hash, _)) = self.committed.get(path) {
            return Ok(Some(hash.clone()));
        }
        if let Some(file) = self.scanned.get(path) {
            return Ok(Some(file.hash.clone()));
        }
        edit.planned_hash
            .clone()
            .ok_or_else(|| ResmergeError::apply(path, "file was not part of the scan"))
    }

    /// Verify, edit, render and stage one file. Writes only the temp file.
    fn stage(&self, path: &Path, edit: &FileEdit) -> ResmergeResult<Staged> {
        let expected = self.expected_hash(path, edit)?;
        let on_disk = match fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(ResmergeError::apply(path, format!("read failed: {e}"))),
        };

        let (mut document, original, created) = match (expected, on_disk) {
            (Some(expected), Some(bytes)) => {
                if hash_bytes(&bytes) != expected {
                    return Err(ResmergeError::apply(path, "file changed on disk since scan"));
                }
                let document = match self.committed.get(path) {
                    Some((_, doc)) => doc.clone(),
                    None => match self.scanned.get(path) {
                        Some(file) => file.document.clone(),
                        None => {
                            let text = String::from_utf8_lossy(&bytes);
                            parse_document(path, &text)
                                .map_err(|e| ResmergeError::apply(path, e.to_string()))?
                        }
                    },
                };
                (document, Some(bytes), false)
            }
            (None, None) => (ResourceDocument::empty(), None, true),
            (Some(_), None) => {
                return Err(ResmergeError::apply(path, "file disappeared since scan"));
            }
            (None, Some(_)) => {
                return Err(ResmergeError::apply(path, "file appeared on disk since planning"));
            }
        };

        for key in &edit.removes {
            document.remove_where(|el| declares(el, key));
        }
        for (key, node) in &edit.adds {
            if !document.elements().any(|el| declares(el, key)) {
                document.append(node.clone());
            }
        }

        let rendered = document.to_xml_string();
        if original.as_deref() == Some(rendered.as_bytes()) {
            return Ok(Staged::Unchanged);
        }

        let parent = path
            .parent()
            .ok_or_else(|| ResmergeError::apply(path, "file has no parent directory"))?;
        if created {
            fs::create_dir_all(parent)
                .map_err(|e| ResmergeError::apply(path, format!("cannot create directory: {e}")))?;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = parent.join(format!(".{file_name}.resmerge-{}.tmp", std::process::id()));
        fs::write(&temp, rendered.as_bytes()).map_err(|e| {
            let _ = fs::remove_file(&temp);
            ResmergeError::apply(path, format!("staging failed: {e}"))
        })?;

        Ok(Staged::Ready {
            temp,
            hash: hash_bytes(rendered.as_bytes()),
            document,
            created,
        })
    }
}

fn declares(el: &ElementNode, key: &ResourceKey) -> bool {
    el.name.as_deref() == Some(key.name.as_str()) && ResourceType::from_tag(&el.tag) == Some(key.kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::entries_of;
    use crate::plan::{GroupPlan, Removal};
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_project() -> PathBuf {
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!("resmerge_apply_test_{}_{}", std::process::id(), id));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn scanned(root: &Path, module: &str, content: &str) -> ResourceFile {
        let path = root.join(module).join("src/main/res/values/strings.xml");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        let document = ResourceDocument::parse(content).unwrap();
        let entries = entries_of(&document);
        ResourceFile {
            path,
            module: module.to_string(),
            kind: ResourceType::String,
            hash: hash_bytes(content.as_bytes()),
            document,
            entries,
        }
    }

    const SAVE: &str = "<resources>\n    <string name=\"save\">Save</string>\n    <string name=\"keep\">Keep</string>\n</resources>\n";

    fn merge_plan(root: &Path, files: &[ResourceFile]) -> ConsolidationPlan {
        let key = ResourceKey::new(ResourceType::String, "save");
        ConsolidationPlan {
            groups: vec![GroupPlan {
                key: key.clone(),
                value: "Save".into(),
                target_module: "ui".into(),
                target_file: root.join("ui/src/main/res/values/strings.xml"),
                target_hash: None,
                add: Some(files[0].entries[0].node.clone()),
                removals: files
                    .iter()
                    .map(|f| Removal {
                        file: f.path.clone(),
                        module: f.module.clone(),
                    })
                    .collect(),
                skipped: Vec::new(),
            }],
            ..ConsolidationPlan::default()
        }
    }

    #[test]
    fn test_apply_creates_target_and_removes_sources() {
        let root = temp_project();
        let files = vec![scanned(&root, "a", SAVE), scanned(&root, "b", SAVE)];
        let plan = merge_plan(&root, &files);

        let outcome = Executor::new(&files).apply(&plan);
        assert_eq!(outcome.failures().count(), 0);
        assert_eq!(outcome.groups[0].status, GroupStatus::Merged);
        assert_eq!(outcome.groups[0].removed_from.len(), 2);

        let target = fs::read_to_string(root.join("ui/src/main/res/values/strings.xml")).unwrap();
        assert_eq!(
            target,
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<resources>\n    <string name=\"save\">Save</string>\n</resources>\n"
        );
        let a = fs::read_to_string(&files[0].path).unwrap();
        assert_eq!(a, "<resources>\n    <string name=\"keep\">Keep</string>\n</resources>\n");
        let created = outcome
            .files
            .iter()
            .find(|f| f.path.ends_with("ui/src/main/res/values/strings.xml"))
            .unwrap();
        assert_eq!(created.status, FileStatus::Created);

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_drift_aborts_file_and_drops_group_removals() {
        let root = temp_project();
        let files = vec![scanned(&root, "a", SAVE), scanned(&root, "b", SAVE)];
        let mut plan = merge_plan(&root, &files);
        // The target exists and was hashed at plan time, then changes.
        let target = root.join("ui/src/main/res/values/strings.xml");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, "<resources>\n</resources>\n").unwrap();
        plan.groups[0].target_hash = Some(hash_bytes(b"<resources/>"));

        let outcome = Executor::new(&files).apply(&plan);
        assert_eq!(outcome.groups[0].status, GroupStatus::TargetFailed);
        assert_eq!(outcome.groups[0].dropped.len(), 2);
        assert_eq!(outcome.failures().count(), 1);
        assert_eq!(fs::read_to_string(&files[0].path).unwrap(), SAVE);
        assert_eq!(fs::read_to_string(&target).unwrap(), "<resources>\n</resources>\n");

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_source_drift_only_fails_that_file() {
        let root = temp_project();
        let files = vec![scanned(&root, "a", SAVE), scanned(&root, "b", SAVE)];
        let plan = merge_plan(&root, &files);
        fs::write(&files[1].path, "<resources>\n</resources>\n").unwrap();

        let outcome = Executor::new(&files).apply(&plan);
        assert_eq!(outcome.groups[0].status, GroupStatus::Partial);
        assert_eq!(outcome.groups[0].removed_from, vec![files[0].path.clone()]);
        assert_eq!(
            fs::read_to_string(&files[1].path).unwrap(),
            "<resources>\n</resources>\n"
        );

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let root = temp_project();
        let files = vec![scanned(&root, "a", SAVE), scanned(&root, "b", SAVE)];
        Executor::new(&files).apply(&merge_plan(&root, &files));

        let leftovers = walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_empty_plan_touches_nothing() {
        let root = temp_project();
        let files = vec![scanned(&root, "a", SAVE)];
        let outcome = Executor::new(&files).apply(&ConsolidationPlan::default());
        assert!(outcome.files.is_empty());
        assert_eq!(outcome.written_count(), 0);

        fs::remove_dir_all(&root).ok();
    }
}
