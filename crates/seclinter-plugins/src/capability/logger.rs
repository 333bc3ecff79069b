//! Routes plugin log output into `tracing`.

use tracing::{debug, error, info, warn};

use crate::protocol::LogLevel;

/// Tracing target for messages logged by plugins.
pub const PLUGIN_LOG_TARGET: &str = "seclinter_plugins::plugin";

/// Logger handed to a plugin; every line carries the plugin name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginLogger {
    plugin: String,
}

impl PluginLogger {
    /// Creates a logger for `plugin`.
    #[must_use]
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
        }
    }

    /// Plugin name attached to every line.
    #[must_use]
    pub const fn plugin(&self) -> &str {
        self.plugin.as_str()
    }

    /// Logs at `level`.
    pub fn log(&self, level: LogLevel, message: &str) {
        let plugin = self.plugin.as_str();
        match level {
            LogLevel::Debug => debug!(target: PLUGIN_LOG_TARGET, plugin, "{message}"),
            LogLevel::Info => info!(target: PLUGIN_LOG_TARGET, plugin, "{message}"),
            LogLevel::Warn => warn!(target: PLUGIN_LOG_TARGET, plugin, "{message}"),
            LogLevel::Error => error!(target: PLUGIN_LOG_TARGET, plugin, "{message}"),
        }
    }

    /// Logs at debug level.
    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    /// Logs at info level.
    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    /// Logs at warn level.
    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    /// Logs at error level.
    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}
