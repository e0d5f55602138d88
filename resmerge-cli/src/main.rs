//! resmerge CLI - consolidate duplicated Android resources across Gradle modules.
//!
//! Features:
//! - Report, dry-run and apply modes
//! - Usage-gated removal: a module that still references a key keeps it
//! - Conflicts reported, never resolved
//! - Backup snapshot with manifest before any write
//! - Plain text or JSON report, optionally written to a file

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};

use resmerge_core::{init_structured_logging, print_json, print_plain, ConsolidationReport, Resmerge, RunMode};

/// Exit code when `--strict` finds conflicts.
const EXIT_CONFLICTS: i32 = 1;
/// Exit code for errors, including files that could not be written.
const EXIT_ERROR: i32 = 2;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Classify and report; never writes
    Report,
    /// Build the full plan without writing
    DryRun,
    /// Back up, then rewrite resource files
    Apply,
}

impl From<Mode> for RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Report => RunMode::Report,
            Mode::DryRun => RunMode::DryRun,
            Mode::Apply => RunMode::Apply,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Consolidate duplicated resources across Android modules")]
pub struct Cli {
    /// Path to the root of the Gradle project
    #[arg(default_value = ".")]
    path: String,

    /// What the run is allowed to do
    #[arg(long, value_enum, default_value_t = Mode::Report)]
    mode: Mode,

    /// Also remove keys no source file references
    #[arg(long)]
    unsafe_remove_unused: bool,

    /// Exit with code 1 when conflicts exist
    #[arg(long)]
    strict: bool,

    /// Output the report in JSON format
    #[arg(long)]
    json: bool,

    /// Write the JSON report to a file (relative path)
    #[arg(long, value_name = "FILE")]
    report_file: Option<String>,

    /// Report base strings missing from values-<locale> directories
    #[arg(long)]
    check_locales: bool,

    /// Module receiving merged entries (empty string: use --priority)
    #[arg(long, value_name = "MODULE")]
    shared_module: Option<String>,

    /// Target module preference order
    #[arg(long, value_name = "MODULE", value_delimiter = ',', num_args = 1..)]
    priority: Vec<String>,

    /// Scan module sources on demand instead of up front
    #[arg(long)]
    lazy_usage: bool,

    /// Allow edits to files that hold a conflicting declaration
    #[arg(long)]
    no_freeze: bool,
}

/// Validates an output path for security.
///
/// Rejects null bytes, absolute paths and `..` traversal.
fn validate_output_path(path: &str) -> Result<PathBuf> {
    if path.contains('\0') {
        return Err(anyhow!("Output path contains null bytes"));
    }

    let p = PathBuf::from(path);
    if p.is_absolute() {
        return Err(anyhow!("Output path must be relative, not absolute: {}", path));
    }
    if p.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(anyhow!("Path traversal (..) not allowed in output paths: {}", path));
    }
    Ok(p)
}

fn engine(cli: &Cli) -> Resmerge {
    let mut engine = Resmerge::new(Path::new(&cli.path))
        .mode(cli.mode.into())
        .unsafe_remove_unused(cli.unsafe_remove_unused)
        .check_locales(cli.check_locales)
        .lazy_usage(cli.lazy_usage);
    if let Some(shared) = &cli.shared_module {
        engine = engine.shared_module(Some(shared.clone()));
    }
    if !cli.priority.is_empty() {
        engine = engine.module_priority(cli.priority.clone());
    }
    if cli.no_freeze {
        engine = engine.freeze_conflict_files(false);
    }
    engine
}

fn write_report_file(report: &ConsolidationReport, file: &str) -> Result<()> {
    let path = validate_output_path(file)?;
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    fs::write(&path, json).with_context(|| format!("Failed to write report to {}", path.display()))?;
    eprintln!("Report saved to: {}", path.display());
    Ok(())
}

fn exit_code(cli: &Cli, report: &ConsolidationReport) -> i32 {
    if !report.write_failures.is_empty() {
        EXIT_ERROR
    } else if cli.strict && report.has_conflicts() {
        EXIT_CONFLICTS
    } else {
        0
    }
}

fn run(cli: &Cli) -> Result<i32> {
    // Fail before scanning when the report cannot be written anyway
    if let Some(file) = &cli.report_file {
        validate_output_path(file)?;
    }

    let result = engine(cli)
        .run()
        .with_context(|| format!("resmerge failed for {}", cli.path))?;

    if cli.json {
        print_json(&result.report);
    } else {
        print_plain(&result.report);
    }
    if let Some(file) = &cli.report_file {
        write_report_file(&result.report, file)?;
    }

    Ok(exit_code(cli, &result.report))
}

fn main() {
    std::panic::set_hook(Box::new(|info| {
        eprintln!("[PANIC] resmerge internal error: {}", info);
        eprintln!("[PANIC] The process will exit with code {}.", EXIT_ERROR);
    }));

    // Structured logging (JSON to stderr, respects RUST_LOG)
    init_structured_logging();

    let cli = Cli::parse();
    let code = match std::panic::catch_unwind(|| run(&cli)) {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            eprintln!("[ERROR] {:#}", e);
            EXIT_ERROR
        }
        Err(_) => EXIT_ERROR,
    };
    std::process::exit(code);
}
