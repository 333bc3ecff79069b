//! Plugin registry and lifecycle.
//!
//! The [`PluginManager`] discovers plugin packages, loads them through a
//! [`PluginLoader`], runs their `init` hook inside a per-plugin sandbox and
//! keeps a [`PluginStatus`] for each. Scans fan out over the enabled plugins
//! and are aggregated into a [`ScanReport`]; see [`PluginManager::scan`].
//!
//! Lifecycle transitions are published on the manager's [`EventBus`].

mod health;
mod report;
mod scan;

#[cfg(test)]
mod tests;

use std::env;
use std::fmt;
use std::fs;
use std::path::{self, Path, PathBuf};
use std::sync::Arc;

use camino::Utf8PathBuf;
use tracing::{debug, info, warn};

pub use self::health::PluginStatus;
pub use self::report::{ScanReport, ScanStats};
pub use self::scan::ScanOptions;
use crate::capability::HttpTransport;
use crate::config::{ManagerConfig, PLUGIN_PREFIX, PluginConfig, PluginSetting};
use crate::error::PluginError;
use crate::events::{EventBus, EventPayload, PluginEvent};
use crate::loader::{LoadTarget, PluginLoader, ProcessLoader};
use crate::manifest::{PluginManifest, PluginMeta};
use crate::permission::PermissionSet;
use crate::plugin::ScanPlugin;
use crate::sandbox::{Isolation, PluginSandbox, SandboxOptions};

const MANAGER_TARGET: &str = "seclinter_plugins::manager";

/// A registered plugin together with its bookkeeping.
pub struct PluginPackage {
    name: String,
    meta: PluginMeta,
    status: PluginStatus,
    config: PluginConfig,
    path: PathBuf,
    plugin: Arc<dyn ScanPlugin>,
}

impl PluginPackage {
    /// Registry key: the manifest name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Metadata from the manifest or the plugin.
    #[must_use]
    pub const fn meta(&self) -> &PluginMeta {
        &self.meta
    }

    /// Health and timing.
    #[must_use]
    pub const fn status(&self) -> &PluginStatus {
        &self.status
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Whether the plugin takes part in scans.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Package directory the plugin was loaded from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The plugin instance.
    #[must_use]
    pub const fn plugin(&self) -> &Arc<dyn ScanPlugin> {
        &self.plugin
    }
}

impl fmt::Debug for PluginPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginPackage")
            .field("name", &self.name)
            .field("meta", &self.meta)
            .field("status", &self.status)
            .field("config", &self.config)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Result of a successful [`PluginManager::load_plugin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The plugin was registered under this name.
    Loaded(String),
    /// A plugin with this name was already registered; nothing changed.
    AlreadyLoaded(String),
}

impl LoadOutcome {
    /// Name of the plugin concerned.
    #[must_use]
    pub const fn name(&self) -> &str {
        match self {
            Self::Loaded(name) | Self::AlreadyLoaded(name) => name.as_str(),
        }
    }
}

/// Plugins loaded and failures collected during discovery or `init`.
///
/// Individual failures never abort discovery.
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    loaded: Vec<String>,
    failures: Vec<PluginError>,
}

impl DiscoveryOutcome {
    /// Names registered by this pass.
    #[must_use]
    pub fn loaded(&self) -> &[String] {
        &self.loaded
    }

    /// Failures encountered, in discovery order.
    #[must_use]
    pub fn failures(&self) -> &[PluginError] {
        &self.failures
    }

    /// Whether every package loaded.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, result: Result<LoadOutcome, PluginError>) {
        match result {
            Ok(LoadOutcome::Loaded(name)) => self.loaded.push(name),
            Ok(LoadOutcome::AlreadyLoaded(_)) => {}
            Err(error) => self.failures.push(error),
        }
    }

    fn merge(&mut self, other: Self) {
        self.loaded.extend(other.loaded);
        self.failures.extend(other.failures);
    }
}

/// Discovers, loads and scans with plugins.
///
/// ```no_run
/// use seclinter_plugins::{ManagerConfig, PluginManager, ScanOptions};
///
/// let mut manager = PluginManager::new(ManagerConfig::default());
/// let outcome = manager.init();
/// assert!(outcome.loaded().len() <= manager.len());
/// let report = manager.scan(&ScanOptions::new(".").in_parallel(true));
/// assert_eq!(report.stats.plugins_scanned, manager.len());
/// ```
pub struct PluginManager<L = ProcessLoader> {
    config: ManagerConfig,
    loader: L,
    packages: Vec<PluginPackage>,
    events: EventBus,
    transport: Option<Arc<dyn HttpTransport>>,
}

impl PluginManager<ProcessLoader> {
    /// Creates a manager that loads executable plugin packages.
    #[must_use]
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_loader(config, ProcessLoader)
    }
}

impl<L: PluginLoader> PluginManager<L> {
    /// Creates a manager with a custom loader.
    #[must_use]
    pub fn with_loader(config: ManagerConfig, loader: L) -> Self {
        Self {
            config,
            loader,
            packages: Vec::new(),
            events: EventBus::new(),
            transport: None,
        }
    }

    /// Serves plugin HTTP capability calls through `transport`.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Discovers packages and applies the per-plugin settings.
    ///
    /// A `false` entry unloads the plugin; an enabled entry that discovery
    /// did not pick up is loaded from `pluginsDir/<name>`. Failures are
    /// collected, not raised.
    pub fn init(&mut self) -> DiscoveryOutcome {
        let mut outcome = DiscoveryOutcome::default();
        if self.config.auto_discover {
            outcome.merge(self.auto_discover_plugins());
        }

        let settings: Vec<(String, PluginSetting)> = self
            .config
            .plugins
            .iter()
            .map(|(name, setting)| (name.clone(), setting.clone()))
            .collect();
        for (name, setting) in settings {
            if matches!(setting, PluginSetting::Toggle(false)) {
                self.unload_plugin(&name);
            } else if setting.is_enabled() && self.plugin(&name).is_none() {
                let package_dir = self.package_dir_for(&name);
                outcome.record(self.load_plugin(&package_dir));
            }
        }

        info!(
            target: MANAGER_TARGET,
            loaded = self.packages.len(),
            failures = outcome.failures.len(),
            "plugin manager initialised"
        );
        outcome
    }

    /// Loads every `seclinter-plugin-*` package under the plugins directory.
    ///
    /// Packages load in name order. A missing or unreadable directory is
    /// reported as a single [`PluginError::Discovery`] failure.
    pub fn auto_discover_plugins(&mut self) -> DiscoveryOutcome {
        let mut outcome = DiscoveryOutcome::default();
        let dir = self.config.plugins_dir.clone();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(source) => {
                warn!(
                    target: MANAGER_TARGET,
                    dir = %dir.display(),
                    error = %source,
                    "plugin directory unavailable"
                );
                outcome.failures.push(PluginError::Discovery {
                    dir,
                    source: Arc::new(source),
                });
                return outcome;
            }
        };

        let mut packages: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(PLUGIN_PREFIX))
            })
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        packages.sort();

        debug!(
            target: MANAGER_TARGET,
            dir = %dir.display(),
            candidates = packages.len(),
            "discovered plugin packages"
        );
        for package in packages {
            outcome.record(self.load_plugin(&package));
        }
        outcome
    }

    /// Loads the package at `path`, runs its `init` hook and registers it.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LoadFailed`] wrapping the cause when the
    /// manifest, the entry, `init` or metadata resolution fails.
    pub fn load_plugin(&mut self, path: &Path) -> Result<LoadOutcome, PluginError> {
        let package_dir = path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        self.load_package(&package_dir).map_err(|error| {
            warn!(
                target: MANAGER_TARGET,
                path = %package_dir.display(),
                error = %error,
                "failed to load plugin"
            );
            error.into_load_failure(&package_dir)
        })
    }

    fn load_package(&mut self, package_dir: &Path) -> Result<LoadOutcome, PluginError> {
        let manifest = PluginManifest::read(package_dir)?;
        let name = manifest.name().to_owned();
        if self.plugin(&name).is_some() {
            warn!(target: MANAGER_TARGET, plugin = name.as_str(), "plugin already loaded");
            return Ok(LoadOutcome::AlreadyLoaded(name));
        }

        let sandbox = self.sandbox_for(&name);
        let plugin = self
            .loader
            .load(&LoadTarget::new(&manifest, package_dir, &sandbox))?;
        let config = self.config.plugin_config(&name);
        plugin
            .init(&sandbox.environment(config.options_value()))
            .map_err(|source| PluginError::Init {
                name: name.clone(),
                source,
            })?;
        let meta = manifest
            .meta()
            .cloned()
            .map_or_else(|| describe(&name, plugin.as_ref()), Ok)?;

        self.packages.push(PluginPackage {
            name: name.clone(),
            meta: meta.clone(),
            status: PluginStatus::new(name.as_str()),
            config,
            path: package_dir.to_path_buf(),
            plugin,
        });
        self.events
            .emit(&PluginEvent::now(name.as_str(), EventPayload::Loaded { meta }));
        self.events
            .emit(&PluginEvent::now(name.as_str(), EventPayload::Initialized));
        info!(
            target: MANAGER_TARGET,
            plugin = name.as_str(),
            version = manifest.version(),
            "plugin loaded"
        );
        Ok(LoadOutcome::Loaded(name))
    }

    /// Runs the plugin's `cleanup` hook and removes it.
    ///
    /// Returns `false` when no plugin of that name is registered. A failing
    /// `cleanup` is logged and the plugin is removed anyway.
    pub fn unload_plugin(&mut self, name: &str) -> bool {
        let Some(position) = self.packages.iter().position(|package| package.name == name) else {
            warn!(target: MANAGER_TARGET, plugin = name, "cannot unload unknown plugin");
            return false;
        };
        let package = self.packages.remove(position);
        if let Err(fault) = package.plugin.cleanup() {
            warn!(
                target: MANAGER_TARGET,
                plugin = name,
                error = %fault,
                "plugin cleanup failed"
            );
        }
        self.events
            .emit(&PluginEvent::now(name, EventPayload::Unloaded));
        info!(target: MANAGER_TARGET, plugin = name, "plugin unloaded");
        true
    }

    /// Registered plugins in load order.
    #[must_use]
    pub fn plugins(&self) -> &[PluginPackage] {
        &self.packages
    }

    /// Looks up a registered plugin.
    #[must_use]
    pub fn plugin(&self, name: &str) -> Option<&PluginPackage> {
        self.packages.iter().find(|package| package.name == name)
    }

    /// Health of a registered plugin.
    #[must_use]
    pub fn status(&self, name: &str) -> Option<&PluginStatus> {
        self.plugin(name).map(PluginPackage::status)
    }

    /// Number of registered plugins.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether no plugin is registered.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Includes or excludes a plugin from scans.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotLoaded`] for an unknown name.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), PluginError> {
        self.package_mut(name)?.config.enabled = enabled;
        Ok(())
    }

    /// Replaces a plugin's configuration for subsequent scans.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotLoaded`] for an unknown name.
    pub fn configure(&mut self, name: &str, config: PluginConfig) -> Result<(), PluginError> {
        self.package_mut(name)?.config = config;
        Ok(())
    }

    /// Marks a plugin healthy again and clears its error count.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotLoaded`] for an unknown name.
    pub fn reset_health(&mut self, name: &str) -> Result<(), PluginError> {
        self.package_mut(name)?.status.reset();
        info!(target: MANAGER_TARGET, plugin = name, "plugin health reset");
        Ok(())
    }

    /// The manager's event bus.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// The manager's configuration.
    #[must_use]
    pub const fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn package_mut(&mut self, name: &str) -> Result<&mut PluginPackage, PluginError> {
        self.packages
            .iter_mut()
            .find(|package| package.name == name)
            .ok_or_else(|| PluginError::NotLoaded {
                name: name.to_owned(),
            })
    }

    /// Resolves the package directory for a plugin named in the settings,
    /// accepting both the bare and the prefixed directory name.
    fn package_dir_for(&self, name: &str) -> PathBuf {
        let bare = self.config.plugins_dir.join(name);
        let prefixed = self.config.plugins_dir.join(format!("{PLUGIN_PREFIX}{name}"));
        if !bare.is_dir() && prefixed.is_dir() {
            return prefixed;
        }
        bare
    }

    fn sandbox_for(&self, name: &str) -> PluginSandbox {
        let fs_root = self.config.fs_root.clone().unwrap_or_else(|| {
            env::current_dir()
                .ok()
                .and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok())
                .unwrap_or_else(|| Utf8PathBuf::from("."))
        });
        let (permissions, isolation) = if self.config.enable_sandbox {
            (self.config.default_permissions.clone(), Isolation::Sandboxed)
        } else {
            (PermissionSet::all(), Isolation::Trusted)
        };
        let mut options = SandboxOptions::new(fs_root)
            .permissions(permissions)
            .isolation(isolation)
            .timeout(self.config.call_timeout())
            .memory_limit_mib(self.config.memory_limit_mb)
            .allowed_modules(self.config.allowed_modules.iter().cloned())
            .min_request_interval(self.config.min_request_interval());
        if let Some(transport) = &self.transport {
            options = options.transport(Arc::clone(transport));
        }
        PluginSandbox::new(name, options)
    }
}

fn describe(name: &str, plugin: &dyn ScanPlugin) -> Result<PluginMeta, PluginError> {
    plugin
        .meta()
        .map_err(|source| PluginError::Init {
            name: name.to_owned(),
            source,
        })?
        .ok_or_else(|| PluginError::MetaMissing {
            name: name.to_owned(),
        })
}

impl<L: fmt::Debug> fmt::Debug for PluginManager<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("config", &self.config)
            .field("loader", &self.loader)
            .field("packages", &self.packages)
            .field("events", &self.events)
            .field("transport", &self.transport.is_some())
            .finish()
    }
}
