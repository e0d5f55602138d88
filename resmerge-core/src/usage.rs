//! Reference scanning: which modules still use a resource key.
//!
//! A reference is either a generated accessor in code (`R.string.save`, also
//! through an alias such as `UiR.string.save` or a qualified `com.app.R`) or
//! an XML reference (`@string/save`, `@style/Theme.App`). Framework
//! references (`@android:string/ok`) are ignored. Declarations are not
//! references, with one exception: a style inherits its parent through the
//! `parent` attribute, or through its dotted name when the attribute is
//! absent (`Theme.App.Card` inherits `Theme.App`). Both count as references
//! to the parent.
//!
//! Two interchangeable implementations sit behind [`UsageOracle`]:
//! [`UsageIndex`] extracts every source file once, in parallel;
//! [`LazyUsageScanner`] scans a module the first time it is asked about
//! and memoizes the result. Both answer every query identically.

use crate::config::Settings;
use crate::parse::{ResourceKey, ResourceType};
use crate::scan::{gather_source_files, module_of, module_src_dir};
use anyhow::Result;
use rayon::prelude::*;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

/// (type, accessor name) as it appears in a reference.
pub type ReferenceKey = (ResourceType, String);

/// Answers usage queries for the planner.
pub trait UsageOracle: Sync {
    /// Does any source file of `module` reference `key`?
    fn is_locally_referenced(&self, key: &ResourceKey, module: &str) -> bool;

    /// Does any source file in the project reference `key`?
    fn is_referenced_anywhere(&self, key: &ResourceKey) -> bool;
}

/// Code accessor: `R.<type>.<ident>` with any `*R` alias or package prefix.
fn code_reference_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"\b[A-Za-z0-9_]*R\.(string|color|dimen|integer|style|array)\.([A-Za-z_][A-Za-z0-9_]*)")
            .expect("Hardcoded regex pattern is valid")
    })
}

/// XML reference: `@[+][pkg:]<type>/<name>`.
fn xml_reference_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(
            r"@\+?(?:\*?([A-Za-z0-9_.]+):)?(string|color|dimen|integer|style|array)/([A-Za-z_][A-Za-z0-9_.]*)",
        )
        .expect("Hardcoded regex pattern is valid")
    })
}

/// `<style ...>` start tag, capturing its attributes.
fn style_tag_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"<style\b([^>]*)>").expect("Hardcoded regex pattern is valid"))
}

/// `name` or `parent` attribute of a style tag.
fn style_attribute_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#"(?:^|\s)(name|parent)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("Hardcoded regex pattern is valid")
    })
}

/// Styles a dotted name inherits implicitly, as accessor names:
/// `Theme.App.Card` yields `Theme_App` and `Theme`.
fn implicit_parents(name: &str) -> impl Iterator<Item = String> + '_ {
    name.match_indices('.').map(move |(at, _)| name[..at].replace('.', "_"))
}

fn style_parent_references(content: &str, refs: &mut HashSet<ReferenceKey>) {
    for tag in style_tag_regex().captures_iter(content) {
        let mut name = None;
        let mut parent = None;
        for attr in style_attribute_regex().captures_iter(&tag[1]) {
            let value = attr.get(2).or_else(|| attr.get(3)).map_or("", |m| m.as_str());
            if &attr[1] == "name" {
                name = Some(value);
            } else {
                parent = Some(value.trim());
            }
        }
        match parent {
            // `@style/...` parents are matched as XML references
            Some(parent) => {
                if !parent.is_empty() && !parent.starts_with(['@', '?']) && !parent.contains(':') {
                    refs.insert((ResourceType::Style, parent.replace('.', "_")));
                }
            }
            None => {
                if let Some(name) = name {
                    refs.extend(implicit_parents(name).map(|p| (ResourceType::Style, p)));
                }
            }
        }
    }
}

fn reference_key(key: &ResourceKey) -> ReferenceKey {
    (key.kind, key.reference_name())
}

/// Every resource reference found in `content`.
pub fn extract_references(content: &str) -> HashSet<ReferenceKey> {
    let mut refs = HashSet::new();
    for cap in code_reference_regex().captures_iter(content) {
        if let Some(kind) = ResourceType::from_tag(&cap[1]) {
            refs.insert((kind, cap[2].to_string()));
        }
    }
    for cap in xml_reference_regex().captures_iter(content) {
        if cap.get(1).is_some_and(|pkg| pkg.as_str() == "android") {
            continue;
        }
        if let Some(kind) = ResourceType::from_tag(&cap[2]) {
            if kind == ResourceType::Style {
                refs.extend(implicit_parents(&cap[3]).map(|p| (kind, p)));
            }
            refs.insert((kind, cap[3].replace('.', "_")));
        }
    }
    style_parent_references(content, &mut refs);
    refs
}

/// References of one module (or of the files outside any module).
#[derive(Debug, Clone, Default)]
pub struct ModuleRefs {
    refs: HashSet<ReferenceKey>,
    /// A source file could not be read: every query answers "referenced".
    ambiguous: bool,
}

impl ModuleRefs {
    fn ambiguous() -> Self {
        Self {
            refs: HashSet::new(),
            ambiguous: true,
        }
    }

    fn absorb(&mut self, other: FileRefs) {
        match other {
            FileRefs::Read(refs) => self.refs.extend(refs),
            FileRefs::Unreadable => self.ambiguous = true,
        }
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.ambiguous || self.refs.contains(&reference_key(key))
    }
}

enum FileRefs {
    Read(HashSet<ReferenceKey>),
    Unreadable,
}

fn read_references(path: &Path) -> FileRefs {
    match fs::read(path) {
        Ok(bytes) => FileRefs::Read(extract_references(&String::from_utf8_lossy(&bytes))),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "unreadable source file, treating its module as referencing everything"
            );
            FileRefs::Unreadable
        }
    }
}

/// Bulk usage index: one parallel pass over every source file.
#[derive(Debug, Clone, Default)]
pub struct UsageIndex {
    modules: HashMap<String, ModuleRefs>,
    unattributed: ModuleRefs,
}

impl UsageIndex {
    pub fn build(root: &Path, settings: &Settings) -> Result<Self> {
        let files = gather_source_files(root, settings)?;
        let extracted: Vec<(Option<String>, FileRefs)> = files
            .par_iter()
            .map(|path| (module_of(root, path), read_references(path)))
            .collect();

        let mut index = Self::default();
        for (module, refs) in extracted {
            match module {
                Some(module) => index.modules.entry(module).or_default().absorb(refs),
                None => index.unattributed.absorb(refs),
            }
        }
        tracing::debug!(
            files = files.len(),
            modules = index.modules.len(),
            "usage index built"
        );
        Ok(index)
    }

    /// Modules referencing `key`, sorted.
    pub fn modules_referencing(&self, key: &ResourceKey) -> BTreeSet<&str> {
        self.modules
            .iter()
            .filter(|(_, refs)| refs.contains(key))
            .map(|(m, _)| m.as_str())
            .collect()
    }
}

impl UsageOracle for UsageIndex {
    fn is_locally_referenced(&self, key: &ResourceKey, module: &str) -> bool {
        self.modules.get(module).is_some_and(|m| m.contains(key))
    }

    fn is_referenced_anywhere(&self, key: &ResourceKey) -> bool {
        self.unattributed.contains(key) || self.modules.values().any(|m| m.contains(key))
    }
}

/// Where source files live, without their content.
#[derive(Debug, Default)]
struct SourceLayout {
    /// Modules owning at least one source file, sorted
    modules: Vec<String>,
    /// Source files outside any module
    unattributed: Vec<PathBuf>,
    /// The walk failed: every project-wide query answers "referenced".
    degraded: bool,
}

/// Scans a module's sources on first query and memoizes the result.
///
/// Project-wide queries walk the tree once to learn the module names, then
/// read modules one at a time and stop at the first one referencing the key.
#[derive(Debug)]
pub struct LazyUsageScanner {
    root: PathBuf,
    settings: Settings,
    memo: Mutex<HashMap<String, Arc<ModuleRefs>>>,
    layout: OnceLock<SourceLayout>,
    unattributed: OnceLock<ModuleRefs>,
}

impl LazyUsageScanner {
    pub fn new(root: impl Into<PathBuf>, settings: Settings) -> Self {
        Self {
            root: root.into(),
            settings,
            memo: Mutex::new(HashMap::new()),
            layout: OnceLock::new(),
            unattributed: OnceLock::new(),
        }
    }

    /// Modules whose sources have been read so far, sorted.
    pub fn scanned_modules(&self) -> Vec<String> {
        let mut modules: Vec<String> = self
            .memo
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        modules.sort();
        modules
    }

    fn module_refs(&self, module: &str) -> Arc<ModuleRefs> {
        if let Some(hit) = self
            .memo
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(module)
        {
            return Arc::clone(hit);
        }

        let refs = Arc::new(self.scan_module(module));
        self.memo
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(module.to_string())
            .or_insert(refs)
            .clone()
    }

    fn scan_module(&self, module: &str) -> ModuleRefs {
        let dir = module_src_dir(&self.root, module);
        let files = match gather_source_files(&dir, &self.settings) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(module, error = %e, "module scan failed, treating key as referenced");
                return ModuleRefs::ambiguous();
            }
        };
        let mut refs = ModuleRefs::default();
        for file in files {
            if module_of(&self.root, &file).as_deref() == Some(module) {
                refs.absorb(read_references(&file));
            }
        }
        tracing::debug!(module, "module usage scanned");
        refs
    }

    fn layout(&self) -> &SourceLayout {
        self.layout.get_or_init(|| match gather_source_files(&self.root, &self.settings) {
            Ok(files) => {
                let mut modules = BTreeSet::new();
                let mut unattributed = Vec::new();
                for file in files {
                    match module_of(&self.root, &file) {
                        Some(module) => {
                            modules.insert(module);
                        }
                        None => unattributed.push(file),
                    }
                }
                SourceLayout {
                    modules: modules.into_iter().collect(),
                    unattributed,
                    degraded: false,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "source walk failed, treating every key as referenced");
                SourceLayout {
                    degraded: true,
                    ..SourceLayout::default()
                }
            }
        })
    }

    fn unattributed_refs(&self) -> &ModuleRefs {
        self.unattributed.get_or_init(|| {
            let mut refs = ModuleRefs::default();
            for file in &self.layout().unattributed {
                refs.absorb(read_references(file));
            }
            refs
        })
    }
}

impl UsageOracle for LazyUsageScanner {
    fn is_locally_referenced(&self, key: &ResourceKey, module: &str) -> bool {
        self.module_refs(module).contains(key)
    }

    fn is_referenced_anywhere(&self, key: &ResourceKey) -> bool {
        let layout = self.layout();
        if layout.degraded {
            return true;
        }
        // Modules already read answer first
        let scanned: Vec<Arc<ModuleRefs>> = self
            .memo
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        if scanned.iter().any(|refs| refs.contains(key)) {
            return true;
        }
        layout.modules.iter().any(|m| self.module_refs(m).contains(key))
            || self.unattributed_refs().contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_project() -> PathBuf {
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!("resmerge_usage_test_{}_{}", std::process::id(), id));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn create_file(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn key(kind: ResourceType, name: &str) -> ResourceKey {
        ResourceKey::new(kind, name)
    }

    #[test]
    fn test_extract_code_references() {
        let refs = extract_references(
            "val a = getString(R.string.save)\nval b = UiR.color.accent\nval c = com.app.ui.R.dimen.gap\nR.style.Theme_App",
        );
        assert!(refs.contains(&(ResourceType::String, "save".into())));
        assert!(refs.contains(&(ResourceType::Color, "accent".into())));
        assert!(refs.contains(&(ResourceType::Dimen, "gap".into())));
        assert!(refs.contains(&(ResourceType::Style, "Theme_App".into())));
        assert_eq!(refs.len(), 4);
    }

    #[test]
    fn test_extract_xml_references() {
        let refs = extract_references(
            r#"<TextView android:text="@string/title" android:textColor="@color/ink"
                 style="@style/Theme.App.Card" android:hint="@android:string/ok"
                 android:entries="@array/choices" app:x="@com.lib:integer/max"/>"#,
        );
        assert!(refs.contains(&(ResourceType::String, "title".into())));
        assert!(refs.contains(&(ResourceType::Color, "ink".into())));
        assert!(refs.contains(&(ResourceType::Style, "Theme_App_Card".into())));
        assert!(refs.contains(&(ResourceType::Array, "choices".into())));
        assert!(refs.contains(&(ResourceType::Integer, "max".into())));
        assert!(!refs.contains(&(ResourceType::String, "ok".into())));
    }

    #[test]
    fn test_style_parents_are_references() {
        let refs = extract_references(
            r#"<resources>
    <style name="Theme.App.Card"><item name="radius">4dp</item></style>
    <style name='Widget.Chip' parent="Base.Chip"/>
    <style name="Widget.Chip.Small" parent="" />
    <style name="Theme.Dark" parent="android:Theme.Material" />
</resources>"#,
        );
        let style = |name: &str| (ResourceType::Style, name.to_string());
        assert!(refs.contains(&style("Theme_App")));
        assert!(refs.contains(&style("Theme")));
        assert!(refs.contains(&style("Base_Chip")));
        assert!(!refs.contains(&style("Widget")));
        assert!(!refs.contains(&style("Widget_Chip")));
        assert!(!refs.contains(&style("Theme_App_Card")));
        assert!(!refs.iter().any(|(_, name)| name.contains("Material")));
    }

    #[test]
    fn test_declarations_are_not_references() {
        let refs = extract_references(r#"<resources><string name="save">Save</string></resources>"#);
        assert!(refs.is_empty());
    }

    #[test]
    fn test_usage_index_attributes_modules() {
        let root = temp_project();
        create_file(&root, "feature/home/src/main/java/Home.kt", "getString(R.string.save)");
        create_file(&root, "ui/src/main/res/layout/card.xml", "<View android:background=\"@color/card\"/>");
        create_file(&root, "ui/build/generated/Gen.kt", "R.string.generated");
        create_file(&root, "tools/Script.kt", "R.dimen.loose");

        let index = UsageIndex::build(&root, &Settings::default()).unwrap();
        let save = key(ResourceType::String, "save");
        assert!(index.is_locally_referenced(&save, "feature/home"));
        assert!(!index.is_locally_referenced(&save, "ui"));
        assert!(index.is_referenced_anywhere(&save));
        assert!(index.is_locally_referenced(&key(ResourceType::Color, "card"), "ui"));
        assert!(!index.is_referenced_anywhere(&key(ResourceType::String, "generated")));
        assert!(index.is_referenced_anywhere(&key(ResourceType::Dimen, "loose")));
        assert_eq!(
            index.modules_referencing(&save).into_iter().collect::<Vec<_>>(),
            vec!["feature/home"]
        );

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_lazy_scanner_matches_bulk_index() {
        let root = temp_project();
        create_file(&root, "app/src/main/java/Main.kt", "R.string.save; R.style.Theme_App");
        create_file(&root, "core/src/main/java/Core.java", "R.dimen.gap");
        create_file(&root, "ui/src/main/res/values/styles.xml", "<style parent=\"@style/Base\"/>");
        create_file(&root, "src/main/java/Root.kt", "R.color.root");

        let settings = Settings::default();
        let bulk = UsageIndex::build(&root, &settings).unwrap();
        let lazy = LazyUsageScanner::new(&root, settings);

        let keys = [
            key(ResourceType::String, "save"),
            key(ResourceType::Style, "Theme.App"),
            key(ResourceType::Dimen, "gap"),
            key(ResourceType::Style, "Base"),
            key(ResourceType::Color, "root"),
            key(ResourceType::Color, "unused"),
        ];
        for module in ["app", "core", "ui", ".", "missing"] {
            for k in &keys {
                assert_eq!(
                    bulk.is_locally_referenced(k, module),
                    lazy.is_locally_referenced(k, module),
                    "{k} in {module}"
                );
            }
        }
        for k in &keys {
            assert_eq!(bulk.is_referenced_anywhere(k), lazy.is_referenced_anywhere(k), "{k}");
        }
        assert!(lazy.is_locally_referenced(&key(ResourceType::Style, "Theme.App"), "app"));
        assert!(!lazy.is_referenced_anywhere(&key(ResourceType::Color, "unused")));

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_lazy_scanner_stops_at_first_referencing_module() {
        let root = temp_project();
        create_file(&root, "a/src/main/java/A.kt", "R.string.save");
        create_file(&root, "b/src/main/java/B.kt", "R.string.save");
        create_file(&root, "c/src/main/java/C.kt", "R.string.other");

        let lazy = LazyUsageScanner::new(&root, Settings::default());
        assert!(lazy.scanned_modules().is_empty());
        assert!(lazy.is_referenced_anywhere(&key(ResourceType::String, "save")));
        assert_eq!(lazy.scanned_modules(), vec!["a"]);

        assert!(!lazy.is_referenced_anywhere(&key(ResourceType::String, "gone")));
        assert_eq!(lazy.scanned_modules(), vec!["a", "b", "c"]);

        fs::remove_dir_all(&root).ok();
    }
}
