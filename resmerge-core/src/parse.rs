//! Resource parsing: typed entries on top of the lossless document.
//!
//! Every parse is deterministic and error-resilient:
//! - Malformed files never abort the run, they become a [`ParseFailure`]
//! - Files are parsed in parallel with Rayon, one file per task
//! - Values are normalized per resource type so comparisons are stable

use crate::document::{ElementNode, ResourceDocument};
use crate::error::{IoResultExt, ResmergeError, ResmergeResult};
use crate::scan::ScannedFile;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Maximum file size to parse (10 MB).
const MAX_FILE_SIZE: usize = 10_000_000;

/// The resource kinds the engine indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    String,
    Color,
    Dimen,
    Integer,
    Style,
    Array,
}

impl ResourceType {
    pub const ALL: [ResourceType; 6] = [
        Self::String,
        Self::Color,
        Self::Dimen,
        Self::Integer,
        Self::Style,
        Self::Array,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Color => "color",
            Self::Dimen => "dimen",
            Self::Integer => "integer",
            Self::Style => "style",
            Self::Array => "array",
        }
    }

    /// Maps an element tag to its type. Unknown tags are not indexed.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "string" => Some(Self::String),
            "color" => Some(Self::Color),
            "dimen" => Some(Self::Dimen),
            "integer" => Some(Self::Integer),
            "style" => Some(Self::Style),
            "array" | "string-array" | "integer-array" => Some(Self::Array),
            _ => None,
        }
    }

    /// File created in a module that has no file of this type yet.
    pub fn default_file_name(&self) -> &'static str {
        match self {
            Self::String => "strings.xml",
            Self::Color => "colors.xml",
            Self::Dimen => "dimens.xml",
            Self::Integer => "integers.xml",
            Self::Style => "styles.xml",
            Self::Array => "arrays.xml",
        }
    }

    /// Default file-name pattern used by the scanner.
    pub fn default_pattern(&self) -> &'static str {
        match self {
            Self::String => r"^strings.*\.xml$",
            Self::Color => r"^colors.*\.xml$",
            Self::Dimen => r"^dimens.*\.xml$",
            Self::Integer => r"^integers.*\.xml$",
            Self::Style => r"^(styles|themes).*\.xml$",
            Self::Array => r"^arrays.*\.xml$",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = ResmergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| ResmergeError::invalid_argument(format!("unknown resource type: {s}")))
    }
}

/// Identity of a resource: (type, name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceKey {
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceType, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Identifier used by generated `R` accessors (`Theme.App` → `Theme_App`).
    pub fn reference_name(&self) -> String {
        self.name.replace('.', "_")
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// One declaration inside a resource file.
#[derive(Debug, Clone)]
pub struct ResourceEntry {
    pub key: ResourceKey,
    /// Normalized value used for equality
    pub value: String,
    /// Position among the file's elements
    pub ordinal: usize,
    /// The element exactly as written
    pub node: ElementNode,
}

/// A parsed resource file with its scan-time snapshot hash.
#[derive(Debug, Clone)]
pub struct ResourceFile {
    pub path: PathBuf,
    pub module: String,
    pub kind: ResourceType,
    /// SHA-256 of the bytes that were parsed
    pub hash: String,
    pub document: ResourceDocument,
    pub entries: Vec<ResourceEntry>,
}

/// A file that could not be parsed. The run continues without it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseFailure {
    pub path: PathBuf,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl From<ResmergeError> for ParseFailure {
    fn from(err: ResmergeError) -> Self {
        match err {
            ResmergeError::Parse {
                path,
                message,
                line,
                column,
            } => Self {
                path,
                message,
                line,
                column,
            },
            other => Self {
                path: other.path().cloned().unwrap_or_default(),
                message: other.to_string(),
                line: None,
                column: None,
            },
        }
    }
}

/// Result of parsing a single file - used for granular parallel control.
#[derive(Debug)]
pub enum ParseResult {
    Ok(Box<ResourceFile>),
    Skipped(ParseFailure),
}

/// Normalize a path string to use forward slashes consistently.
#[inline]
pub fn normalize_path_string(path: &str) -> String {
    path.replace('\\', "/")
}

/// Convert a Path to a normalized string (forward slashes).
#[inline]
pub fn path_to_normalized_string(path: &Path) -> String {
    normalize_path_string(&path.display().to_string())
}

/// Hex SHA-256 of a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut sha = Sha256::new();
    sha.update(bytes);
    format!("{:x}", sha.finalize())
}

/// Hex SHA-256 of a file's current content.
pub fn file_hash(path: &Path) -> ResmergeResult<String> {
    let bytes = fs::read(path).with_path(path)?;
    Ok(hash_bytes(&bytes))
}

/// Trim and collapse every whitespace run (NBSP included) to one space.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Type-specific normalized value of an element.
pub fn normalized_value(kind: ResourceType, node: &ElementNode) -> String {
    match kind {
        ResourceType::Style => {
            let mut items: Vec<(String, String)> = node
                .items
                .iter()
                .map(|item| {
                    (
                        item.name.clone().unwrap_or_default(),
                        normalize_text(&item.inner),
                    )
                })
                .collect();
            items.sort();
            serde_json::json!({
                "parent": node.parent,
                "items": items,
            })
            .to_string()
        }
        ResourceType::Array => {
            let items: Vec<String> = node.items.iter().map(|i| normalize_text(&i.inner)).collect();
            serde_json::json!(items).to_string()
        }
        _ => normalize_text(&node.inner),
    }
}

/// Typed entries of a document, in document order.
pub fn entries_of(document: &ResourceDocument) -> Vec<ResourceEntry> {
    document
        .elements()
        .enumerate()
        .filter_map(|(ordinal, node)| {
            let kind = ResourceType::from_tag(&node.tag)?;
            let name = node.name.as_deref()?;
            Some(ResourceEntry {
                key: ResourceKey::new(kind, name),
                value: normalized_value(kind, node),
                ordinal,
                node: node.clone(),
            })
        })
        .collect()
}

/// Parse resource XML, attaching `path` and line/column to failures.
pub fn parse_document(path: &Path, src: &str) -> ResmergeResult<ResourceDocument> {
    ResourceDocument::parse(src).map_err(|e| {
        let (line, column) = e.line_column(src);
        ResmergeError::parse_at(path, e.message, line, column)
    })
}

/// Read and parse one file from disk, returning its bytes' hash as well.
pub fn read_document(path: &Path) -> ResmergeResult<(ResourceDocument, String)> {
    let bytes = fs::read(path).with_path(path)?;
    if bytes.len() > MAX_FILE_SIZE {
        return Err(ResmergeError::parse(
            path,
            format!("file too large ({} bytes, max {})", bytes.len(), MAX_FILE_SIZE),
        ));
    }
    let hash = hash_bytes(&bytes);
    let src = String::from_utf8(bytes)
        .map_err(|e| ResmergeError::parse(path, format!("not valid UTF-8: {e}")))?;
    Ok((parse_document(path, &src)?, hash))
}

/// Parses a single scanned file. This is the atomic unit of parallel work.
pub fn parse_resource_file(scanned: &ScannedFile) -> ParseResult {
    match read_document(&scanned.path) {
        Ok((document, hash)) => {
            let entries = entries_of(&document);
            ParseResult::Ok(Box::new(ResourceFile {
                path: scanned.path.clone(),
                module: scanned.module.clone(),
                kind: scanned.kind,
                hash,
                document,
                entries,
            }))
        }
        Err(e) => ParseResult::Skipped(e.into()),
    }
}

/// Parses all files in parallel. Malformed files are logged and returned
/// separately; both lists come back sorted by path.
pub fn parse_resource_files(files: &[ScannedFile]) -> (Vec<ResourceFile>, Vec<ParseFailure>) {
    let results: Vec<ParseResult> = files.par_iter().map(parse_resource_file).collect();

    let mut parsed = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for result in results {
        match result {
            ParseResult::Ok(file) => parsed.push(*file),
            ParseResult::Skipped(failure) => {
                tracing::warn!(
                    path = %failure.path.display(),
                    error = %failure.message,
                    "skipping malformed resource file"
                );
                failures.push(failure);
            }
        }
    }
    parsed.sort_by(|a, b| a.path.cmp(&b.path));
    failures.sort_by(|a, b| a.path.cmp(&b.path));
    (parsed, failures)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(src: &str) -> ResourceDocument {
        ResourceDocument::parse(src).unwrap()
    }

    // === Resource Type Tests ===

    #[test]
    fn test_tag_mapping() {
        assert_eq!(ResourceType::from_tag("string"), Some(ResourceType::String));
        assert_eq!(ResourceType::from_tag("string-array"), Some(ResourceType::Array));
        assert_eq!(ResourceType::from_tag("integer-array"), Some(ResourceType::Array));
        assert_eq!(ResourceType::from_tag("plurals"), None);
        assert_eq!(ResourceType::from_tag("bool"), None);
    }

    #[test]
    fn test_resource_type_from_str() {
        assert_eq!("dimen".parse::<ResourceType>().unwrap(), ResourceType::Dimen);
        assert_eq!(" Style ".parse::<ResourceType>().unwrap(), ResourceType::Style);
        assert!("drawable".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_key_display_and_reference_name() {
        let key = ResourceKey::new(ResourceType::Style, "Theme.App.Card");
        assert_eq!(key.to_string(), "style/Theme.App.Card");
        assert_eq!(key.reference_name(), "Theme_App_Card");
    }

    // === Normalization Tests ===

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Save \n  file "), "Save file");
        assert_eq!(normalize_text("a\u{00A0}\u{00A0}b"), "a b");
        assert_eq!(normalize_text("Save"), "Save");
        assert_ne!(normalize_text("save"), normalize_text("Save"));
    }

    #[test]
    fn test_style_value_ignores_item_order() {
        let a = doc(r#"<resources><style name="S" parent="P">
            <item name="x">1dp</item><item name="y">2dp</item></style></resources>"#);
        let b = doc(r#"<resources><style name="S" parent="P">
            <item name="y"> 2dp </item><item name="x">1dp</item></style></resources>"#);
        assert_eq!(entries_of(&a)[0].value, entries_of(&b)[0].value);
    }

    #[test]
    fn test_style_parent_is_part_of_value() {
        let a = doc(r#"<resources><style name="S" parent="P"><item name="x">1</item></style></resources>"#);
        let b = doc(r#"<resources><style name="S" parent="Q"><item name="x">1</item></style></resources>"#);
        assert_ne!(entries_of(&a)[0].value, entries_of(&b)[0].value);
    }

    #[test]
    fn test_array_value_keeps_order() {
        let a = doc("<resources><string-array name=\"a\"><item>one</item><item>two</item></string-array></resources>");
        let b = doc("<resources><string-array name=\"a\"><item>two</item><item>one</item></string-array></resources>");
        let ea = entries_of(&a);
        assert_eq!(ea[0].value, r#"["one","two"]"#);
        assert_ne!(ea[0].value, entries_of(&b)[0].value);
    }

    #[test]
    fn test_entries_skip_unknown_and_unnamed() {
        let d = doc(r#"<resources>
    <string name="a">A</string>
    <plurals name="p"><item quantity="one">x</item></plurals>
    <string>nameless</string>
    <color name="c">#FFF</color>
</resources>"#);
        let entries = entries_of(&d);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, ResourceKey::new(ResourceType::String, "a"));
        assert_eq!(entries[1].key, ResourceKey::new(ResourceType::Color, "c"));
        assert_eq!(entries[1].ordinal, 3);
    }

    // === File Parsing Tests ===

    #[test]
    fn test_parse_document_reports_location() {
        let err = parse_document(
            Path::new("strings.xml"),
            "<resources>\n<string name=\"a\">A</color>\n</resources>",
        )
        .unwrap_err();
        match err {
            ResmergeError::Parse { line, .. } => assert_eq!(line, Some(2)),
            other => panic!("Expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_resource_files_mixed_valid_invalid() {
        let dir = std::env::temp_dir().join(format!("resmerge_parse_test_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let valid = dir.join("strings.xml");
        fs::write(&valid, "<resources><string name=\"a\">A</string></resources>").unwrap();
        let invalid = dir.join("colors.xml");
        fs::write(&invalid, "<resources><color name=\"c\">#FFF</resources>").unwrap();

        let files = vec![
            ScannedFile {
                path: valid.clone(),
                module: "ui".into(),
                kind: ResourceType::String,
                locale: None,
            },
            ScannedFile {
                path: invalid.clone(),
                module: "ui".into(),
                kind: ResourceType::Color,
                locale: None,
            },
        ];
        let (parsed, failures) = parse_resource_files(&files);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].entries.len(), 1);
        assert_eq!(parsed[0].hash, file_hash(&valid).unwrap());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, invalid);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_parse_missing_file_is_skipped() {
        let scanned = ScannedFile {
            path: PathBuf::from("/nonexistent/res/values/strings.xml"),
            module: "ui".into(),
            kind: ResourceType::String,
            locale: None,
        };
        assert!(matches!(parse_resource_file(&scanned), ParseResult::Skipped(_)));
    }

    #[test]
    fn test_missing_file_error_carries_path() {
        let path = Path::new("/nonexistent/res/values/colors.xml");
        let err = read_document(path).unwrap_err();
        assert!(matches!(err, ResmergeError::Io { .. }));
        assert_eq!(err.path().map(PathBuf::as_path), Some(path));
        assert!(file_hash(path).unwrap_err().to_string().contains("colors.xml"));
    }

    #[test]
    fn test_path_to_normalized_string() {
        assert_eq!(normalize_path_string("ui\\src\\main"), "ui/src/main");
        assert!(!path_to_normalized_string(Path::new("ui/src")).contains('\\'));
    }
}
