//! Configuration file resolution and loading
//!
//! Configuration files are optional. A missing file is not an error: callers
//! fall back to built-in defaults. A file that exists but cannot be parsed is
//! reported as an error so that typos are not silently ignored.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "NAR_CONFIG";

/// File name looked up inside the per-user configuration directory
pub const CONFIG_FILE_NAME: &str = "pipeline.toml";

/// Logging configuration shared by every NAR binary
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration file resolution following priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable (`NAR_CONFIG`)
/// 3. Per-user configuration directory (`<config_dir>/nar/pipeline.toml`), if present
///
/// Returns `None` when no file applies; callers then use compiled defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Per-user config directory (only if the file exists)
    let user_config = dirs::config_dir().map(|d| d.join("nar").join(CONFIG_FILE_NAME));
    match user_config {
        Some(path) if path.exists() => Some(path),
        _ => None,
    }
}

/// Load and deserialize a TOML configuration file
///
/// A missing file yields `T::default()` with a warning. Any other I/O failure
/// or a parse failure is returned as an error.
pub fn load_toml_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            return Ok(T::default());
        }
        Err(e) => return Err(Error::Io(e)),
    };

    debug!("Loading configuration from {}", path.display());
    let parsed = toml::from_str::<T>(&content)?;
    Ok(parsed)
}

/// Parse a TOML document held in memory
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T> {
    toml::from_str::<T>(content).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default)]
        value: u32,
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    fn test_logging_defaults() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.level, "info");
        assert!(logging.file.is_none());
    }

    #[test]
    fn test_cli_argument_wins() {
        let path = PathBuf::from("/tmp/explicit.toml");
        assert_eq!(resolve_config_path(Some(&path)), Some(path));
    }

    #[test]
    fn test_parse_toml_with_missing_sections() {
        let parsed: Sample = parse_toml("value = 7").unwrap();
        assert_eq!(parsed.value, 7);
        assert_eq!(parsed.logging, LoggingConfig::default());
    }

    #[test]
    fn test_parse_toml_rejects_bad_types() {
        let parsed: Result<Sample> = parse_toml("value = \"seven\"");
        assert!(matches!(parsed, Err(Error::Toml(_))));
    }
}
