//! Plugin sandboxing and orchestration for SecLinter.
//!
//! The `seclinter-plugins` crate loads third-party scan plugins, runs them
//! behind a permission-checked capability facade and aggregates their
//! findings into one report. Plugins are short-lived processes that speak a
//! JSONL protocol over standard I/O; embedders may also link plugins
//! in-process.
//!
//! # Architecture
//!
//! - [`capability`] wraps filesystem, HTTP, environment, path and module
//!   access. Each wrapper either performs the operation or fails with a
//!   permission error.
//! - [`sandbox`] spawns a plugin entry inside a `birdcage` jail, enforces its
//!   wall-clock and memory budget, and serves its capability calls from the
//!   facade.
//! - [`events`] publishes lifecycle notifications to registered listeners.
//! - [`PluginManager`] discovers packages, loads and initialises plugins,
//!   tracks their health and fans scans out over them.
//! - [`guest`] is the plugin side of the protocol, used by plugin binaries.
//!
//! # Example
//!
//! ```rust,no_run
//! use seclinter_plugins::{ManagerConfig, PluginManager, ScanOptions, Severity};
//!
//! let config = ManagerConfig::from_path("seclinter.json".as_ref()).expect("valid config");
//! let mut manager = PluginManager::new(config);
//! let discovery = manager.init();
//! assert!(discovery.is_clean());
//!
//! let report = manager.scan(&ScanOptions::new("/srv/app").in_parallel(true));
//! assert!(!report.has_findings_at_or_above(Severity::High));
//! ```

pub mod capability;
pub mod config;
pub mod error;
pub mod events;
pub mod finding;
pub mod guest;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod permission;
pub mod plugin;
pub mod protocol;
pub mod sandbox;

#[cfg(test)]
mod tests;

pub use self::capability::CapabilityFacade;
pub use self::config::{ManagerConfig, PluginConfig, PluginSetting};
pub use self::error::{CapabilityError, PluginError, PluginFault, SandboxExecutionError, ScanError};
pub use self::events::{EventBus, EventListener, PluginEvent, PluginEventKind};
pub use self::finding::{ScanResult, Severity};
pub use self::loader::{PluginLoader, ProcessLoader, StaticLoader};
pub use self::manager::{
    DiscoveryOutcome, LoadOutcome, PluginManager, PluginPackage, PluginStatus, ScanOptions,
    ScanReport, ScanStats,
};
pub use self::manifest::{PluginEntry, PluginManifest, PluginMeta};
pub use self::permission::{PermissionSet, PluginPermission};
pub use self::plugin::{ScanPlugin, ScanRequest};
pub use self::sandbox::{Isolation, PluginEnvironment, PluginSandbox, SandboxOptions};
