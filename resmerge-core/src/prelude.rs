//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use resmerge_core::prelude::*;
//! ```

// Running
pub use crate::builder::{Resmerge, RunMode, RunResult};
pub use crate::config::{load_config, ResmergeConfig, Settings};
pub use crate::error::{ResmergeError, ResmergeResult};

// Core data
pub use crate::classify::Classification;
pub use crate::parse::{ResourceKey, ResourceType};
pub use crate::plan::ConsolidationPlan;

// Output
pub use crate::report::{print_json, print_plain, ConsolidationReport};

#[cfg(feature = "apply")]
pub use crate::apply::ApplyOutcome;
