//! Configuration system for modhost
//!
//! A single TOML file controls the injected runtime:
//! - Resource names watched by the file-open interceptor
//! - The host window class to subclass
//! - Where the extension bridge module lives
//! - Logging and diagnostic surfaces
//!
//! A default file is generated on first run. A missing or broken file never
//! stops activation: callers fall back to [`CoreConfig::default`].
//!
//! # Example
//!
//! ```toml
//! debug = false
//! console = false
//! dialogs = true
//!
//! [redirect]
//! trigger = "data.win"
//! passthrough = "unmodded.win"
//! canonical = "data.win"
//! generated = "modded.win"
//!
//! [window]
//! class_name = "YYGameMakerYY"
//!
//! [bridge]
//! module = "modhost/bridge.dll"
//! ```

mod loader;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use modhost_sdk::names;

pub use loader::{base_dir_for, configs_dir, core_config_path, logs_dir, modhost_base_dir};

/// Configuration system errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write config file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config to TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Could not determine config directory from the host location
    #[error("Config directory not available - could not resolve host executable path")]
    NoConfigDirectory,
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Resource names for the file-open interceptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// First open of this name generates the substituted resource
    pub trigger: String,

    /// Opens of this name are sent to `canonical`
    pub passthrough: String,

    /// Unmodified resource on disk
    pub canonical: String,

    /// Generated resource on disk
    pub generated: String,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            trigger: names::TRIGGER_RESOURCE.to_string(),
            passthrough: names::PASSTHROUGH_RESOURCE.to_string(),
            canonical: names::CANONICAL_RESOURCE.to_string(),
            generated: names::GENERATED_RESOURCE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Class name of the host's main window
    pub class_name: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            class_name: names::HOST_WINDOW_CLASS.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Module exporting the bridge entry points, relative to the host executable
    pub module: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            module: PathBuf::from(loader::BASE_DIR_NAME).join("bridge.dll"),
        }
    }
}

/// Core configuration.
///
/// Loaded from `<game>/modhost/configs/core.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Config version for future migration support
    pub version: u32,

    /// Enable debug logging
    pub debug: bool,

    /// Allocate a console and mirror the log to it
    pub console: bool,

    /// Also show bootstrap failures in a message box
    pub dialogs: bool,

    pub redirect: RedirectConfig,

    pub window: WindowConfig,

    pub bridge: BridgeConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            version: 1,
            debug: false,
            console: false,
            dialogs: true,
            redirect: RedirectConfig::default(),
            window: WindowConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Load core config from file, creating default if missing.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&core_config_path()?)
    }

    /// Load config from a specific path, creating default if missing.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            tracing::debug!("Loaded core config from {:?}", path);
            Ok(config)
        } else {
            let default = Self::default();
            default.save_to(path)?;
            tracing::info!("Created default core config at {:?}", path);
            Ok(default)
        }
    }

    /// Save core config to file.
    pub fn save(&self) -> ConfigResult<()> {
        self.save_to(&core_config_path()?)
    }

    /// Save config to a specific path.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!("Saved core config to {:?}", path);
        Ok(())
    }

    /// Reload core config from file.
    pub fn reload(&mut self) -> ConfigResult<()> {
        let path = core_config_path()?;
        let content = std::fs::read_to_string(&path)?;
        *self = toml::from_str(&content)?;
        tracing::debug!("Reloaded core config from {:?}", path);
        Ok(())
    }

    /// Load config, logging and falling back to defaults on any error
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Using default config: {}", e);
                Self::default()
            }
        }
    }
}
