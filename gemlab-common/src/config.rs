//! Configuration file discovery, TOML loading and root folder resolution
//!
//! Resolution priority for the configuration file:
//! 1. Explicit path (caller-supplied, e.g. from a batch driver's arguments)
//! 2. `GEMLAB_CONFIG` environment variable
//! 3. User config directory (`~/.config/gemlab/<file>` on Linux)
//! 4. System config directory (`/etc/gemlab/<file>`, Linux only)
//!
//! A missing configuration file is not an error: callers get built-in
//! defaults and a warning in the log.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "GEMLAB_CONFIG";

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "GEMLAB_ROOT_FOLDER";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error)
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

/// Locate the configuration file for `file_name`.
///
/// Explicit and environment-supplied paths are returned even if they do not
/// exist, so that loading them reports a clear error. Directory-based
/// candidates are only returned when present on disk.
pub fn resolve_config_path(explicit: Option<&Path>, file_name: &str) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("gemlab").join(file_name));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/gemlab").join(file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Read and parse a TOML file into `T`
pub fn read_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Read TOML failed ({}): {}", path.display(), e))
    })?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Load configuration of type `T`, falling back to `T::default()` when no
/// configuration file can be found.
pub fn load_toml_config<T>(explicit: Option<&Path>, file_name: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match resolve_config_path(explicit, file_name) {
        Some(path) => {
            let config = read_toml_file(&path)?;
            info!("Configuration loaded from {}", path.display());
            Ok(config)
        }
        None => {
            warn!(
                "No configuration file '{}' found, using built-in defaults",
                file_name
            );
            Ok(T::default())
        }
    }
}

/// Root folder resolution:
/// 1. Caller-supplied path (highest priority)
/// 2. `GEMLAB_ROOT_FOLDER` environment variable
/// 3. Value from the TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(explicit: Option<&Path>, configured: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = configured {
        return path.to_path_buf();
    }

    default_root_folder()
}

/// OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/gemlab (or /var/lib/gemlab for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("gemlab"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/gemlab"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("gemlab"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/gemlab"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("gemlab"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\gemlab"))
    } else {
        PathBuf::from("./gemlab_data")
    }
}
