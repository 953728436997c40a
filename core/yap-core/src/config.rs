//! User configuration (`config.toml`) and launch option resolution.
//!
//! Resolution is layered: built-in defaults, then the config file, then
//! command-line flags. The result is one immutable [`EffectiveStartOptions`]
//! computed per `start`/`toggle` invocation.

use fs_err as fs;
use serde::Deserialize;
use std::path::Path;

use crate::error::{Result, YapError};

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# yap configuration

# Desktop notifications: comma-separated events (start, pause, stop),
# optionally with "urgent". "urgent" alone means "start,urgent".
# Use "disabled" to turn notifications off.
notifications = "urgent"

# Whisper model size: tiny, base, small, medium, large
model = "tiny"

# Compute device: cpu, cuda
device = "cpu"

# Language code
language = "en"

# int8 inference (faster, less accurate)
fast_mode = false

# Type transcriptions into the focused window
enable_typing = true

# Append transcriptions to output.txt (read with `yap output`)
output_file = false
"#;

/// Contents of `config.toml`. Missing keys take the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub notifications: String,
    pub model: String,
    pub device: String,
    pub language: String,
    pub fast_mode: bool,
    pub enable_typing: bool,
    pub output_file: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            notifications: "urgent".to_string(),
            model: "tiny".to_string(),
            device: "cpu".to_string(),
            language: "en".to_string(),
            fast_mode: false,
            enable_typing: true,
            output_file: false,
        }
    }
}

impl Config {
    /// Loads the configuration, returning defaults if the file doesn't exist
    /// or can't be parsed.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(error = %err, "Ignoring unreadable config; using defaults");
                Self::default()
            }
        }
    }

    fn try_load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|err| YapError::io("reading config", err))?;
        toml::from_str(&content).map_err(|err| YapError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })
    }

    /// Writes the commented default configuration if no config exists yet.
    /// Returns true when a file was created.
    pub fn write_default_if_missing(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| YapError::io("creating config directory", err))?;
        }
        fs::write(path, DEFAULT_CONFIG_TEMPLATE)
            .map_err(|err| YapError::io("writing default config", err))?;
        Ok(true)
    }
}

/// Launch parameters given on the command line. `None`/`false` means
/// "not given"; the config value is used instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOverrides {
    pub model: Option<String>,
    pub device: Option<String>,
    pub language: Option<String>,
    pub fast: bool,
    pub no_typing: bool,
}

/// Launch parameters after layering flags over the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveStartOptions {
    pub model: String,
    pub device: String,
    pub language: String,
    pub fast_mode: bool,
    pub enable_typing: bool,
    pub output_file: bool,
}

impl EffectiveStartOptions {
    pub fn resolve(config: &Config, overrides: &StartOverrides) -> Self {
        Self {
            model: overrides.model.clone().unwrap_or_else(|| config.model.clone()),
            device: overrides
                .device
                .clone()
                .unwrap_or_else(|| config.device.clone()),
            language: overrides
                .language
                .clone()
                .unwrap_or_else(|| config.language.clone()),
            fast_mode: overrides.fast || config.fast_mode,
            enable_typing: config.enable_typing && !overrides.no_typing,
            output_file: config.output_file,
        }
    }
}
