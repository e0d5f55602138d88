//! Backup snapshots taken before any project file is modified.
//!
//! Layout: `<root>/<prefix><YYYYmmdd_HHMMSS>[_N]/` mirrors the relative path
//! of every touched file and holds a `manifest.json` listing each file's
//! original location, backup location, SHA-256 and whether it existed. The
//! manifest is written with a temp-file + rename, and the whole snapshot is
//! complete before the executor's first write.

use crate::error::{ResmergeError, ResmergeResult};
use crate::parse::{hash_bytes, path_to_normalized_string};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Upper bound on `_N` suffixes tried for one timestamp.
const MAX_DIR_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the project root
    pub original: String,
    /// Path relative to the backup directory; absent for files that did not exist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub existed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub created_at: String,
    pub root: PathBuf,
    pub entries: Vec<ManifestEntry>,
}

/// A completed snapshot.
#[derive(Debug, Clone)]
pub struct Backup {
    pub dir: PathBuf,
    pub manifest: BackupManifest,
}

/// Claim a fresh snapshot directory. `create_dir` fails on an existing
/// directory, so two runs in the same second get distinct suffixes.
fn claim_backup_dir(root: &Path, prefix: &str, stamp: &str) -> ResmergeResult<PathBuf> {
    for attempt in 0..MAX_DIR_ATTEMPTS {
        let name = if attempt == 0 {
            format!("{prefix}{stamp}")
        } else {
            format!("{prefix}{stamp}_{attempt}")
        };
        let dir = root.join(name);
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(ResmergeError::backup(&dir, e.to_string())),
        }
    }
    Err(ResmergeError::backup(
        root,
        format!("no free backup directory name for {prefix}{stamp}"),
    ))
}

fn write_manifest(dir: &Path, manifest: &BackupManifest) -> ResmergeResult<()> {
    let path = dir.join(MANIFEST_FILE_NAME);
    let json = serde_json::to_string_pretty(manifest)
        .map_err(|e| ResmergeError::backup(&path, e.to_string()))?;

    let temp_path = dir.join(format!("{MANIFEST_FILE_NAME}.{}.tmp", std::process::id()));
    fs::write(&temp_path, json).map_err(|e| ResmergeError::backup(&temp_path, e.to_string()))?;
    fs::rename(&temp_path, &path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        ResmergeError::backup(&path, e.to_string())
    })
}

/// Snapshot `files` (absolute paths under `root`) into a new backup directory.
///
/// Any failure aborts: the caller must not write project files without a
/// complete snapshot.
pub fn create_backup(root: &Path, prefix: &str, files: &BTreeSet<PathBuf>) -> ResmergeResult<Backup> {
    let now = chrono::Local::now();
    let dir = claim_backup_dir(root, prefix, &now.format("%Y%m%d_%H%M%S").to_string())?;

    let mut entries = Vec::with_capacity(files.len());
    for file in files {
        let relative = file.strip_prefix(root).map_err(|_| {
            ResmergeError::backup(file, "file lies outside the project root")
        })?;
        let original = path_to_normalized_string(relative);

        let bytes = match fs::read(file) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                entries.push(ManifestEntry {
                    original,
                    backup: None,
                    sha256: None,
                    existed: false,
                });
                continue;
            }
            Err(e) => return Err(ResmergeError::backup(file, e.to_string())),
        };

        let copy = dir.join(relative);
        if let Some(parent) = copy.parent() {
            fs::create_dir_all(parent).map_err(|e| ResmergeError::backup(parent, e.to_string()))?;
        }
        fs::write(&copy, &bytes).map_err(|e| ResmergeError::backup(&copy, e.to_string()))?;

        entries.push(ManifestEntry {
            backup: Some(original.clone()),
            original,
            sha256: Some(hash_bytes(&bytes)),
            existed: true,
        });
    }

    let manifest = BackupManifest {
        created_at: now.to_rfc3339(),
        root: root.to_path_buf(),
        entries,
    };
    write_manifest(&dir, &manifest)?;

    tracing::info!(
        dir = %dir.display(),
        files = manifest.entries.len(),
        "backup snapshot written"
    );
    Ok(Backup { dir, manifest })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_project() -> PathBuf {
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!("resmerge_backup_test_{}_{}", std::process::id(), id));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn create_file(root: &Path, rel: &str, content: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_backup_copies_files_and_writes_manifest() {
        let root = temp_project();
        let a = create_file(&root, "a/src/main/res/values/strings.xml", "<resources/>");
        let missing = root.join("ui/src/main/res/values/strings.xml");
        let files: BTreeSet<PathBuf> = [a.clone(), missing].into_iter().collect();

        let backup = create_backup(&root, ".resmerge-backup-", &files).unwrap();
        assert!(backup
            .dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(".resmerge-backup-"));

        let copy = backup.dir.join("a/src/main/res/values/strings.xml");
        assert_eq!(fs::read_to_string(copy).unwrap(), "<resources/>");

        let manifest: BackupManifest =
            serde_json::from_str(&fs::read_to_string(backup.dir.join(MANIFEST_FILE_NAME)).unwrap())
                .unwrap();
        assert_eq!(manifest.entries.len(), 2);
        let existing = manifest.entries.iter().find(|e| e.existed).unwrap();
        assert_eq!(existing.original, "a/src/main/res/values/strings.xml");
        assert_eq!(existing.sha256.as_deref(), Some(hash_bytes(b"<resources/>").as_str()));
        let created = manifest.entries.iter().find(|e| !e.existed).unwrap();
        assert_eq!(created.backup, None);

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_backup_dirs_never_collide() {
        let root = temp_project();
        let files = BTreeSet::new();
        let first = create_backup(&root, "bk-", &files).unwrap();
        let second = create_backup(&root, "bk-", &files).unwrap();
        assert_ne!(first.dir, second.dir);
        assert!(second.dir.join(MANIFEST_FILE_NAME).exists());

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_backup_rejects_files_outside_root() {
        let root = temp_project();
        let files: BTreeSet<PathBuf> = [PathBuf::from("/elsewhere/strings.xml")].into_iter().collect();
        let err = create_backup(&root, "bk-", &files).unwrap_err();
        assert!(matches!(err, ResmergeError::Backup { .. }));
        assert!(!err.is_recoverable());

        fs::remove_dir_all(&root).ok();
    }
}
