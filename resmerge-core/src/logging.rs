//! Structured logging using **tracing**.
//!
//! Library code emits events through the `tracing` macros; the binary
//! installs the JSON subscriber once at startup. Logs go to stderr so
//! stdout stays clean for the report.

/// Initializes the global tracing subscriber.
///
/// Call once at the beginning of the application's runtime.
///
/// # Environment Variables
/// - `RUST_LOG`: Controls log filtering (e.g., `RUST_LOG=resmerge_core=debug`)
pub fn init_structured_logging() {
    tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_level(true)
        .with_target(true)
        .with_current_span(true)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}
