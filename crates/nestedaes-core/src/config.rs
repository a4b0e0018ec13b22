use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};

/// Top-level configuration (loaded from nestedaes.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NestedAesConfig {
    pub keys: KeysConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// KEK file read by reencrypt/decrypt and written by encrypt/reencrypt
    /// when no explicit path is given (default: kek.key)
    pub kek_file: PathBuf,
    /// Unix permission bits for written KEK files (default: 0o600)
    pub key_file_mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Unix permission bits for written blobs and plaintexts (default: 0o660)
    pub file_mode: u32,
    /// Rewrite the input file when no output path is given (default: true)
    pub overwrite_input: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            kek_file: PathBuf::from("kek.key"),
            key_file_mode: 0o600,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            file_mode: 0o660,
            overwrite_input: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl NestedAesConfig {
    /// Parse a config file.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file, falling back to defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> CoreResult<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            Ok(Self::default())
        }
    }

    fn validate(&self) -> CoreResult<()> {
        for (name, mode) in [
            ("keys.key_file_mode", self.keys.key_file_mode),
            ("output.file_mode", self.output.file_mode),
        ] {
            if mode > 0o777 {
                return Err(CoreError::Config(format!(
                    "{name} must be permission bits (<= 0o777), got {mode:#o}"
                )));
            }
        }

        match self.logging.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(CoreError::Config(format!(
                "logging.format must be \"json\" or \"text\", got {other:?}"
            ))),
        }
    }
}
