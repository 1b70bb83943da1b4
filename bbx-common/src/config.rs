//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`BBX_ROOT_FOLDER`, then `BBX_ROOT`)
//! 3. TOML config file (`root_folder` key)
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file never stops startup: a warning is logged
//! and defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the SQLite database file inside the root folder
pub const DATABASE_FILE_NAME: &str = "bbx.db";

/// Logging section of the TOML config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// tracing filter directive (e.g. "info", "bbx_billing=debug")
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file path (stdout when absent)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_file: None,
        }
    }
}

/// Plan definition as written in the TOML config
///
/// `monthly_quota = -1` means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanConfig {
    pub id: String,
    pub monthly_quota: i64,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub audio_quality: Vec<String>,
    #[serde(default)]
    pub price_cents: i64,
}

/// TOML configuration file contents
///
/// Every field is optional so that partial files (or no file at all) work.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    #[serde(default)]
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub port: Option<u16>,
    /// Webhook signing secret shared with the payment provider
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Allowed clock skew for webhook signature timestamps
    #[serde(default)]
    pub signature_tolerance_secs: Option<i64>,
    /// Payment provider API key; offline provider is used when absent
    #[serde(default)]
    pub stripe_secret_key: Option<String>,
    /// Hosted checkout redirect after payment (required with a provider key)
    #[serde(default)]
    pub checkout_success_url: Option<String>,
    /// Hosted checkout redirect when the customer backs out
    #[serde(default)]
    pub checkout_cancel_url: Option<String>,
    /// Replaces the built-in plan catalog when non-empty
    #[serde(default)]
    pub plans: Vec<PlanConfig>,
}

/// OS-dependent compiled defaults
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub port: u16,
}

impl CompiledDefaults {
    /// Defaults for the platform this binary was compiled for
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: "info".to_string(),
            log_file: None,
            port: 5740,
        }
    }
}

fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/bbx (or /var/lib/bbx for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("bbx"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/bbx"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("bbx"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/bbx"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("bbx"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\bbx"))
    } else {
        PathBuf::from("./bbx_data")
    }
}

/// Default TOML config path for a module: `<config_dir>/bbx/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bbx").join(format!("{}.toml", module_name)))
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load a TOML config, falling back to defaults when missing or invalid
pub fn load_toml_config_or_default(path: Option<&Path>) -> TomlConfig {
    let Some(path) = path else {
        return TomlConfig::default();
    };

    if !path.exists() {
        debug!("Config file not found at {}, using defaults", path.display());
        return TomlConfig::default();
    }

    match load_toml_config(path) {
        Ok(config) => config,
        Err(e) => {
            warn!("{} - continuing with default configuration", e);
            TomlConfig::default()
        }
    }
}

/// Resolves the root folder for a module following the priority order
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml: Option<TomlConfig>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            toml: None,
        }
    }

    /// Command-line override (priority 1)
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Use an already-loaded TOML config instead of reading the default path
    pub fn with_toml(mut self, config: TomlConfig) -> Self {
        self.toml = Some(config);
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        for var in ["BBX_ROOT_FOLDER", "BBX_ROOT"] {
            if let Ok(path) = std::env::var(var) {
                if !path.trim().is_empty() {
                    return PathBuf::from(path);
                }
            }
        }

        let toml_root = match &self.toml {
            Some(config) => config.root_folder.clone(),
            None => {
                let path = default_config_path(&self.module_name);
                load_toml_config_or_default(path.as_deref()).root_folder
            }
        };
        if let Some(root) = toml_root {
            return root;
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder layout and exposes well-known paths inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Create the root folder and its document subdirectories if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        std::fs::create_dir_all(self.licenses_dir())?;
        std::fs::create_dir_all(self.feedback_dir())?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    /// Directory holding issued license documents
    pub fn licenses_dir(&self) -> PathBuf {
        self.root_folder.join("licenses")
    }

    /// Directory holding per-song lyric feedback artifacts
    pub fn feedback_dir(&self) -> PathBuf {
        self.root_folder.join("feedback")
    }
}
