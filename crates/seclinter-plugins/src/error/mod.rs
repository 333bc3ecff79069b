//! Domain errors raised by the plugin engine.
//!
//! All errors use `thiserror`-derived enums with structured context so callers
//! can inspect the failure programmatically. I/O errors are wrapped in `Arc`
//! to satisfy the `result_large_err` Clippy lint and keep the enums `Send`
//! and `Sync`.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::permission::PluginPermission;

/// Errors raised while discovering, loading or managing plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The package directory has no manifest file.
    #[error("plugin manifest not found at {path}")]
    ManifestMissing {
        /// Manifest path that was checked.
        path: PathBuf,
    },

    /// The manifest entry point does not exist.
    #[error("plugin '{name}' entry point not found: {path}")]
    EntryMissing {
        /// Plugin name from the manifest.
        name: String,
        /// Entry path that was checked.
        path: PathBuf,
    },

    /// The manifest could not be read or parsed.
    #[error("invalid plugin manifest {path}: {message}")]
    InvalidManifest {
        /// Manifest path.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// Neither the manifest nor the plugin supplied metadata.
    #[error("plugin '{name}' did not provide metadata")]
    MetaMissing {
        /// Plugin name from the manifest.
        name: String,
    },

    /// The sandbox failed while evaluating the plugin.
    #[error(transparent)]
    Sandbox(#[from] SandboxExecutionError),

    /// The plugin's `init` hook failed.
    #[error("plugin '{name}' failed to initialise: {source}")]
    Init {
        /// Plugin name.
        name: String,
        /// Fault reported by the plugin.
        #[source]
        source: PluginFault,
    },

    /// Wraps any load failure with the package path that caused it.
    #[error("failed to load plugin from {path}: {source}")]
    LoadFailed {
        /// Package path passed to the loader.
        path: PathBuf,
        /// Original cause.
        #[source]
        source: Box<PluginError>,
    },

    /// The named plugin is not registered.
    #[error("plugin '{name}' is not loaded")]
    NotLoaded {
        /// Name that was looked up.
        name: String,
    },

    /// The plugins directory could not be listed.
    #[error("failed to list plugin directory {dir}: {source}")]
    Discovery {
        /// Directory being listed.
        dir: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The manager configuration could not be read or parsed.
    #[error("invalid manager configuration {path}: {message}")]
    Config {
        /// Configuration file path.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },
}

impl PluginError {
    /// Wraps `self` in [`PluginError::LoadFailed`] unless it already is one.
    #[must_use]
    pub fn into_load_failure(self, path: impl Into<PathBuf>) -> Self {
        match self {
            wrapped @ Self::LoadFailed { .. } => wrapped,
            other => Self::LoadFailed {
                path: path.into(),
                source: Box::new(other),
            },
        }
    }
}

/// Failures raised by the sandbox while running a plugin entry.
#[derive(Debug, Error)]
pub enum SandboxExecutionError {
    /// The plugin process could not be started.
    #[error("plugin '{plugin}' failed to start: {message}")]
    Launch {
        /// Plugin label.
        plugin: String,
        /// Human-readable failure description.
        message: String,
    },

    /// Communicating with the plugin process failed.
    #[error("I/O error communicating with plugin '{plugin}': {source}")]
    Io {
        /// Plugin label.
        plugin: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The plugin wrote output that does not follow the protocol.
    #[error("plugin '{plugin}' broke the protocol: {message}")]
    Protocol {
        /// Plugin label.
        plugin: String,
        /// Description of the violation.
        message: String,
    },

    /// The plugin outlived its wall-clock budget and was killed.
    #[error("plugin '{plugin}' timed out after {} ms", timeout.as_millis())]
    Timeout {
        /// Plugin label.
        plugin: String,
        /// Budget that elapsed.
        timeout: Duration,
    },

    /// The plugin exceeded its memory budget and was killed.
    #[error("plugin '{plugin}' exceeded its memory budget ({observed_kib} KiB > {limit_kib} KiB)")]
    MemoryExceeded {
        /// Plugin label.
        plugin: String,
        /// Configured cap in KiB.
        limit_kib: u64,
        /// Resident size observed in KiB.
        observed_kib: u64,
    },

    /// The plugin process exited unsuccessfully.
    #[error("plugin '{plugin}' exited with non-zero status {status}")]
    NonZeroExit {
        /// Plugin label.
        plugin: String,
        /// Exit code, or -1 when killed by a signal.
        status: i32,
    },

    /// The plugin reported a failure in its response.
    #[error("plugin '{plugin}' reported an error: {message}")]
    Plugin {
        /// Plugin label.
        plugin: String,
        /// Message supplied by the plugin.
        message: String,
    },
}

/// A failure raised by a plugin hook.
#[derive(Debug, Error)]
pub enum PluginFault {
    /// The plugin reported an error of its own.
    #[error("{0}")]
    Message(String),

    /// The sandbox hosting the plugin failed.
    #[error(transparent)]
    Sandbox(#[from] SandboxExecutionError),
}

impl PluginFault {
    /// Creates a fault carrying a plugin-supplied message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Failures raised by capability calls made by a plugin.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The plugin lacks the permission the call requires.
    #[error("permission '{permission}' is required for {operation}")]
    PermissionDenied {
        /// Missing permission.
        permission: PluginPermission,
        /// Capability operation that was attempted.
        operation: &'static str,
    },

    /// Filesystem access is disabled for this plugin.
    #[error("filesystem access is disabled ({operation})")]
    FilesystemDisabled {
        /// Capability operation that was attempted.
        operation: &'static str,
    },

    /// The path escapes the filesystem root.
    #[error("path '{path}' is outside the filesystem root")]
    PathOutsideRoot {
        /// Offending path.
        path: String,
    },

    /// The module is not in the allow-list.
    #[error("module '{module}' is not allowed")]
    ModuleNotAllowed {
        /// Requested module.
        module: String,
    },

    /// The module is allowed but the host does not provide it.
    #[error("module '{module}' is not available in the sandbox")]
    ModuleUnavailable {
        /// Requested module.
        module: String,
    },

    /// A filesystem operation failed.
    #[error("filesystem error on '{path}': {source}")]
    Io {
        /// Path being accessed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The URL could not be parsed or uses an unsupported scheme.
    #[error("invalid URL '{url}': {message}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// Description of the problem.
        message: String,
    },

    /// The HTTP request failed.
    #[error("HTTP request to '{url}' failed: {message}")]
    Http {
        /// Requested URL.
        url: String,
        /// Description of the failure.
        message: String,
    },

    /// A host module rejected the call.
    #[error("module '{module}' failed: {message}")]
    Module {
        /// Module name.
        module: String,
        /// Description of the failure.
        message: String,
    },
}

impl CapabilityError {
    /// Stable snake-case discriminator used on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PermissionDenied { .. } => "permission_denied",
            Self::FilesystemDisabled { .. } => "filesystem_disabled",
            Self::PathOutsideRoot { .. } => "path_outside_root",
            Self::ModuleNotAllowed { .. } => "module_not_allowed",
            Self::ModuleUnavailable { .. } => "module_unavailable",
            Self::Io { .. } => "io",
            Self::InvalidUrl { .. } => "invalid_url",
            Self::Http { .. } => "http",
            Self::Module { .. } => "module",
        }
    }
}

/// Why a single plugin failed during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    /// The plugin did not settle within its timeout.
    #[error("Plugin {plugin} timed out after {}ms", timeout.as_millis())]
    Timeout {
        /// Plugin name.
        plugin: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The plugin's scan failed.
    #[error("Plugin {plugin} scan failed: {message}")]
    Plugin {
        /// Plugin name.
        plugin: String,
        /// Failure description.
        message: String,
    },

    /// The plugin panicked while scanning.
    #[error("Plugin {plugin} panicked during scan")]
    Panicked {
        /// Plugin name.
        plugin: String,
    },

    /// The plugin could not be started for the scan.
    #[error("Plugin {plugin} could not be launched: {message}")]
    Launch {
        /// Plugin name.
        plugin: String,
        /// Failure description.
        message: String,
    },
}

impl ScanError {
    /// Converts a hook fault into a scan failure for `plugin`.
    #[must_use]
    pub fn from_fault(plugin: &str, fault: PluginFault) -> Self {
        match fault {
            PluginFault::Sandbox(SandboxExecutionError::Timeout { timeout, .. }) => {
                Self::Timeout {
                    plugin: plugin.to_owned(),
                    timeout,
                }
            }
            PluginFault::Sandbox(SandboxExecutionError::Launch { message, .. }) => Self::Launch {
                plugin: plugin.to_owned(),
                message,
            },
            other => Self::Plugin {
                plugin: plugin.to_owned(),
                message: other.to_string(),
            },
        }
    }

    /// Name of the plugin that failed.
    #[must_use]
    pub const fn plugin(&self) -> &str {
        match self {
            Self::Timeout { plugin, .. }
            | Self::Plugin { plugin, .. }
            | Self::Panicked { plugin }
            | Self::Launch { plugin, .. } => plugin.as_str(),
        }
    }
}
