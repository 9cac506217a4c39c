use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures outside the compiler passes proper: reading inputs, decoding the
/// AST, loading `kairos.toml`.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{}: could not read file: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: invalid AST JSON: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{}: invalid syntax: {msg}", path.display())]
    ConfigSyntax { path: PathBuf, msg: String },

    #[error("{}: {msg}", path.display())]
    Config { path: PathBuf, msg: String },
}

pub const DEFAULT_TICKS_PER_SECOND: u64 = 1_000_000_000;

/// Compiler settings, normally read from `kairos.toml`.
///
/// Every key is optional; a missing file or empty table yields the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// Width an integer literal takes when nothing constrains it.
    pub default_int_width: u32,
    /// Device ticks in one second; converts `delay(seconds)` to ticks.
    pub ticks_per_second: u64,
    /// Method names that count as output writes for same-tick conflict checks.
    pub output_methods: Vec<String>,
    /// Additional exception class names accepted in `raise` and `except`.
    pub extra_exceptions: Vec<String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            default_int_width: 32,
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            output_methods: ["on", "off", "pulse", "pulse_mu", "set", "set_mu", "write"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            extra_exceptions: Vec::new(),
        }
    }
}

impl CompilerConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, DriverError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| DriverError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&content, path)
    }

    /// Parse and validate config text; `path` is only used in error messages.
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, DriverError> {
        let config: CompilerConfig = toml::from_str(content).map_err(|e| DriverError::ConfigSyntax {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    /// Look for `kairos.toml` next to `start_dir`, walking up to the filesystem
    /// root or the first directory containing `.git`.
    pub fn discover(start_dir: &Path) -> Option<PathBuf> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let candidate = dir.join("kairos.toml");
            if candidate.is_file() {
                return Some(candidate);
            }
            if dir.join(".git").exists() || !dir.pop() {
                return None;
            }
        }
    }

    fn validate(&self, path: &Path) -> Result<(), DriverError> {
        if self.default_int_width != 32 && self.default_int_width != 64 {
            return Err(DriverError::Config {
                path: path.to_path_buf(),
                msg: format!("default_int_width must be 32 or 64, got {}", self.default_int_width),
            });
        }
        if self.ticks_per_second == 0 {
            return Err(DriverError::Config {
                path: path.to_path_buf(),
                msg: "ticks_per_second must be positive".to_string(),
            });
        }
        for name in &self.extra_exceptions {
            let valid_ident = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid_ident {
                return Err(DriverError::Config {
                    path: path.to_path_buf(),
                    msg: format!("extra_exceptions: '{}' is not a valid class name", name),
                });
            }
        }
        Ok(())
    }

    pub fn is_output_method(&self, method: &str) -> bool {
        self.output_methods.iter().any(|m| m == method)
    }
}
