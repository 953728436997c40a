//! Error types for yap-core operations.

use std::path::PathBuf;

use crate::bootstrap::BootstrapStep;
use crate::process::WorkerSignal;

/// All errors that can occur while supervising the worker.
///
/// Every variant renders as a single line; the CLI prints it verbatim and
/// exits non-zero.
#[derive(Debug, thiserror::Error)]
pub enum YapError {
    // ─────────────────────────────────────────────────────────────────────
    // Supervision Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("not running")]
    NotRunning,

    #[error("failed to {}: process {} exited before it could be signalled", .signal.verb(), .pid)]
    ProcessVanished { signal: WorkerSignal, pid: u32 },

    #[error("failed to {}: {}", .signal.verb(), .source)]
    Signal {
        signal: WorkerSignal,
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Bootstrap Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("setup failed: failed to {step}: {details}")]
    Bootstrap { step: BootstrapStep, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Typing Backend Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("typing setup failed: missing dependencies ({tools}); retry with --no-typing")]
    TypingToolMissing { tools: String },

    #[error("typing setup failed: {daemon} failed to start{hint}")]
    TypingDaemonFailed { daemon: String, hint: String },

    #[error("typing setup failed: failed to clean socket: {details}")]
    SocketCleanup { details: String },

    #[error("typing setup failed: cancelled")]
    Cancelled,

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("home directory not found")]
    HomeDirNotFound,

    #[error("configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Output Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("output file is disabled (set output_file = true in config.toml)")]
    OutputDisabled,

    #[error("output file not found (start yapping first)")]
    OutputMissing,

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command execution failed: {command}: {details}")]
    CommandFailed { command: String, details: String },
}

impl YapError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        YapError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using YapError.
pub type Result<T> = std::result::Result<T, YapError>;
