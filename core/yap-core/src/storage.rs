//! Storage configuration and path management for yap.
//!
//! Every file the supervisor reads or writes is named here:
//!
//! - **Config dir** (`~/.config/yap`): `config.toml`, `output.txt`
//! - **System dir** (`~/.config/yap/.system`): bundled worker files, the
//!   interpreter environment, the dependency marker and logs
//! - **Runtime dir** (`$XDG_RUNTIME_DIR`, else `/tmp`): the pid and state
//!   files shared by every invocation
//!
//! Production code uses `StorageConfig::from_env()`. Tests use
//! `StorageConfig::with_root(temp_dir)` so every path lives under one
//! directory.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Result, YapError};

/// Overrides every yap location with a single root directory.
pub const HOME_ENV: &str = "YAP_HOME";

const APP_DIR: &str = "yap";
const SYSTEM_DIR: &str = ".system";
const PID_FILE: &str = "yap.pid";
const STATE_FILE: &str = "yap-state";

/// Central configuration for all yap storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// User-facing configuration directory (default: ~/.config/yap)
    config_dir: PathBuf,
    /// Directory holding the pid and state files
    runtime_dir: PathBuf,
    /// Hugging Face hub cache, where the worker downloads models
    model_cache_dir: PathBuf,
}

impl StorageConfig {
    /// Resolves paths from the environment: `YAP_HOME` wins, otherwise the
    /// home directory and `XDG_RUNTIME_DIR` are used.
    pub fn from_env() -> Result<Self> {
        if let Some(root) = env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
            return Ok(Self::with_root(PathBuf::from(root)));
        }

        let home = dirs::home_dir().ok_or(YapError::HomeDirNotFound)?;
        let runtime_dir = env::var_os("XDG_RUNTIME_DIR")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);

        Ok(Self {
            config_dir: home.join(".config").join(APP_DIR),
            runtime_dir,
            model_cache_dir: home.join(".cache").join("huggingface").join("hub"),
        })
    }

    /// Creates a StorageConfig rooted at a single directory.
    /// Used for testing with temp directories.
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            config_dir: root.join("config"),
            runtime_dir: root.join("run"),
            model_cache_dir: root.join("cache").join("huggingface").join("hub"),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    pub fn model_cache_dir(&self) -> &Path {
        &self.model_cache_dir
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // User Files
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Transcriptions appended by the worker when `output_file` is enabled.
    pub fn output_file(&self) -> PathBuf {
        self.config_dir.join("output.txt")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Shared Runtime Files
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn pid_file(&self) -> PathBuf {
        self.runtime_dir.join(PID_FILE)
    }

    pub fn state_file(&self) -> PathBuf {
        self.runtime_dir.join(STATE_FILE)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Private Runtime Environment
    // ─────────────────────────────────────────────────────────────────────────────

    /// Private directory the bootstrap owns.
    pub fn system_dir(&self) -> PathBuf {
        self.config_dir.join(SYSTEM_DIR)
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.system_dir().join("venv")
    }

    /// Entry executable of the interpreter environment.
    pub fn venv_python(&self) -> PathBuf {
        self.venv_dir().join("bin").join("python")
    }

    pub fn venv_pip(&self) -> PathBuf {
        self.venv_dir().join("bin").join("pip")
    }

    pub fn worker_script(&self) -> PathBuf {
        self.system_dir().join("main.py")
    }

    pub fn dependency_manifest(&self) -> PathBuf {
        self.system_dir().join("requirements.txt")
    }

    /// Holds the manifest hash recorded by the last successful install.
    pub fn installed_marker(&self) -> PathBuf {
        self.system_dir().join(".deps_installed")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.system_dir().join("logs")
    }
}
