//! Manager configuration.
//!
//! [`ManagerConfig`] is read from camelCase JSON. Every field has a default,
//! so an empty object is a valid configuration. Per-plugin entries accept
//! either a bare boolean or a full [`PluginConfig`].

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capability::DEFAULT_ALLOWED_MODULES;
use crate::error::PluginError;
use crate::permission::{PermissionSet, PluginPermission};
use crate::sandbox::DEFAULT_MEMORY_LIMIT_MIB;

/// Default directory scanned for plugin packages.
pub const DEFAULT_PLUGINS_DIR: &str = "plugins";

/// Default per-call timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Default number of consecutive errors before a plugin turns unhealthy.
pub const DEFAULT_ERROR_THRESHOLD: u32 = 3;

/// Default spacing between outbound HTTP requests in milliseconds.
pub const DEFAULT_MIN_REQUEST_INTERVAL_MS: u64 = 1_000;

/// Prefix identifying plugin packages during discovery.
pub const PLUGIN_PREFIX: &str = "seclinter-plugin-";

const fn default_true() -> bool {
    true
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from(DEFAULT_PLUGINS_DIR)
}

fn default_permissions() -> PermissionSet {
    PermissionSet::new()
        .with(PluginPermission::FsRead)
        .with(PluginPermission::NetOutbound)
}

const fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

const fn default_error_threshold() -> u32 {
    DEFAULT_ERROR_THRESHOLD
}

fn default_allowed_modules() -> Vec<String> {
    DEFAULT_ALLOWED_MODULES.map(String::from).to_vec()
}

const fn default_memory_limit_mb() -> u64 {
    DEFAULT_MEMORY_LIMIT_MIB
}

const fn default_min_request_interval_ms() -> u64 {
    DEFAULT_MIN_REQUEST_INTERVAL_MS
}

/// Settings of the plugin manager.
///
/// ```
/// use seclinter_plugins::ManagerConfig;
///
/// let config: ManagerConfig =
///     serde_json::from_str(r#"{"timeout": 2500, "plugins": {"xss": false}}"#).expect("valid");
/// assert!(config.auto_discover);
/// assert_eq!(config.call_timeout().as_millis(), 2500);
/// assert!(!config.plugins["xss"].is_enabled());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerConfig {
    /// Scan `plugins_dir` for packages during `init`.
    #[serde(default = "default_true")]
    pub auto_discover: bool,
    /// Directory holding plugin packages.
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: PathBuf,
    /// Per-plugin settings keyed by plugin name.
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginSetting>,
    /// Run plugins jailed; when false they run as trusted host processes.
    #[serde(default = "default_true")]
    pub enable_sandbox: bool,
    /// Permissions granted to sandboxed plugins.
    #[serde(default = "default_permissions")]
    pub default_permissions: PermissionSet,
    /// Per-call timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
    /// Consecutive errors before a plugin is marked unhealthy.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    /// Root of the plugin-visible filesystem; the current directory when
    /// unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_root: Option<Utf8PathBuf>,
    /// Host modules plugins may require.
    #[serde(default = "default_allowed_modules")]
    pub allowed_modules: Vec<String>,
    /// Resident memory budget per plugin process in MiB.
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
    /// Minimum spacing between outbound HTTP requests in milliseconds.
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            auto_discover: true,
            plugins_dir: default_plugins_dir(),
            plugins: BTreeMap::new(),
            enable_sandbox: true,
            default_permissions: default_permissions(),
            timeout: DEFAULT_TIMEOUT_MS,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            fs_root: None,
            allowed_modules: default_allowed_modules(),
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MIB,
            min_request_interval_ms: DEFAULT_MIN_REQUEST_INTERVAL_MS,
        }
    }
}

impl ManagerConfig {
    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Config`] when the file cannot be read or
    /// parsed.
    pub fn from_path(path: &Path) -> Result<Self, PluginError> {
        let raw = fs::read_to_string(path).map_err(|error| PluginError::Config {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|error| PluginError::Config {
            path: path.to_path_buf(),
            message: error.to_string(),
        })
    }

    /// Per-call timeout.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Minimum spacing between outbound HTTP requests.
    #[must_use]
    pub const fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    /// Settings for `name`, normalised to a [`PluginConfig`].
    #[must_use]
    pub fn plugin_config(&self, name: &str) -> PluginConfig {
        self.plugins
            .get(name)
            .map(PluginSetting::to_config)
            .unwrap_or_default()
    }
}

/// Per-plugin setting as written in the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PluginSetting {
    /// `true` enables with no options, `false` disables.
    Toggle(bool),
    /// Full settings.
    Config(PluginConfig),
}

impl PluginSetting {
    /// Whether the plugin should be loaded.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        match self {
            Self::Toggle(enabled) => *enabled,
            Self::Config(config) => config.enabled,
        }
    }

    /// Normalises the setting to a [`PluginConfig`].
    #[must_use]
    pub fn to_config(&self) -> PluginConfig {
        match self {
            Self::Toggle(enabled) => PluginConfig {
                enabled: *enabled,
                options: Map::new(),
            },
            Self::Config(config) => config.clone(),
        }
    }
}

/// Whether a plugin is enabled, plus its plugin-specific options.
///
/// Keys other than `enabled` are collected into `options` and handed to the
/// plugin's `init` and `scan` hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Whether the plugin takes part in scans.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Plugin-specific options.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            options: Map::new(),
        }
    }
}

impl PluginConfig {
    /// Options as a JSON object.
    #[must_use]
    pub fn options_value(&self) -> Value {
        Value::Object(self.options.clone())
    }
}
