//! resmerge-core: cross-module resource consolidation for multi-module Android projects
//!
//! This library finds resource declarations (strings, colors, dimensions,
//! integers, styles, arrays) duplicated across Gradle modules and merges them
//! into one canonical file without deleting anything a module still uses.
//!
//! # Features
//!
//! - **Cross-module index**: every declaration of every `(type, name)` key
//! - **Classification**: mergeable duplicates vs. conflicting values
//! - **Usage gating**: a declaration is only removed when its module's own
//!   sources no longer reference it
//! - **Lossless edits**: untouched entries, comments and formatting survive byte-for-byte
//! - **Crash-safe apply**: backup manifest first, then staged writes committed by rename
//! - **Locale coverage**: base strings missing from `values-<locale>` directories
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use resmerge_core::prelude::*;
//!
//! let result = Resmerge::new("/path/to/project")
//!     .mode(RunMode::Apply)
//!     .run()?;
//!
//! for merged in &result.report.merged {
//!     println!("{}/{} -> {}", merged.kind, merged.name, merged.target);
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`scan`]: Parallel resource and source file discovery
//! - [`document`]: Lossless `<resources>` document model
//! - [`parse`]: Typed entries and normalized values
//! - [`index`]: Cross-module index keyed by `(type, name)`
//! - [`classify`]: Duplicate and conflict groups
//! - [`usage`]: Reference scanning behind the [`usage::UsageOracle`] trait
//! - [`plan`]: Target selection and gated removals
//! - [`backup`]: Snapshot and manifest before any write
//! - [`apply`]: Staged, per-file plan execution
//! - [`report`]: Plaintext and JSON output
//! - [`builder`]: Fluent builder running the whole pipeline
//! - [`error`]: Typed error handling
//!
//! # Cargo Features
//!
//! - `apply` (default): Enable backup and in-place rewrites

pub mod builder;
pub mod classify;
pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod locales;
pub mod logging;
pub mod parse;
pub mod plan;
pub mod prelude;
pub mod report;
pub mod scan;
pub mod usage;

#[cfg(feature = "apply")]
pub mod apply;
#[cfg(feature = "apply")]
pub mod backup;

// ============================================================================
// Explicit Re-exports (avoiding glob imports for clear API surface)
// ============================================================================

// Error types
pub use error::{IoResultExt, ResmergeError, ResmergeResult};

// Builder API
pub use builder::{Resmerge, RunMode, RunResult};

// Configuration
pub use config::{load_config, ResmergeConfig, Settings, CONFIG_FILE_NAME};

// Document model
pub use document::{ElementNode, ItemNode, ResourceDocument};

// Parsing
pub use parse::{
    file_hash, normalize_path_string, normalized_value, parse_resource_file,
    parse_resource_files, path_to_normalized_string, ParseFailure, ParseResult,
    ResourceEntry, ResourceFile, ResourceKey, ResourceType,
};

// File scanning
pub use scan::{gather_resource_files, gather_source_files, module_of, ScannedFile};

// Indexing and classification
pub use classify::{classify, cross_name_candidates, Classification, ConflictGroup, DuplicateGroup};
pub use index::{CrossModuleIndex, Occurrence};

// Usage
pub use usage::{extract_references, LazyUsageScanner, UsageIndex, UsageOracle};

// Planning
pub use plan::{ConsolidationPlan, GroupPlan, Planner, SkipReason};

// Locale coverage
pub use locales::{check_locales, MissingTranslation};

// Logging
pub use logging::init_structured_logging;

// Reporting
pub use report::{print_json, print_plain, ConsolidationReport};

// Feature-gated re-exports
#[cfg(feature = "apply")]
pub use apply::{ApplyOutcome, Executor, FileStatus, GroupStatus};
#[cfg(feature = "apply")]
pub use backup::{create_backup, Backup, BackupManifest};
