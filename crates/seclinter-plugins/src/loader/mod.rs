//! Turning a plugin package into a live [`ScanPlugin`].
//!
//! The manager resolves the manifest and builds the sandbox; a
//! [`PluginLoader`] decides what implements the plugin. [`ProcessLoader`]
//! runs the manifest's entry as a sandboxed process. [`StaticLoader`] hands
//! out plugins linked into the host, which keeps tests and embedders free of
//! child processes.


use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::PluginError;
use crate::manifest::PluginManifest;
use crate::plugin::{ProcessPlugin, ScanPlugin};
use crate::sandbox::PluginSandbox;

/// Everything a loader needs to know about one package.
#[derive(Debug, Clone, Copy)]
pub struct LoadTarget<'a> {
    manifest: &'a PluginManifest,
    package_dir: &'a Path,
    sandbox: &'a PluginSandbox,
}

impl<'a> LoadTarget<'a> {
    /// Bundles a parsed manifest with its package and sandbox.
    #[must_use]
    pub const fn new(
        manifest: &'a PluginManifest,
        package_dir: &'a Path,
        sandbox: &'a PluginSandbox,
    ) -> Self {
        Self {
            manifest,
            package_dir,
            sandbox,
        }
    }

    /// Parsed manifest.
    #[must_use]
    pub const fn manifest(&self) -> &'a PluginManifest {
        self.manifest
    }

    /// Absolute package directory.
    #[must_use]
    pub const fn package_dir(&self) -> &'a Path {
        self.package_dir
    }

    /// Sandbox scoped to the plugin.
    #[must_use]
    pub const fn sandbox(&self) -> &'a PluginSandbox {
        self.sandbox
    }

    /// Entry point joined onto the package directory, unresolved.
    #[must_use]
    pub fn entry(&self) -> PathBuf {
        self.manifest.entry_path(self.package_dir)
    }
}

/// Produces plugin instances for packages.
pub trait PluginLoader {
    /// Evaluates the package described by `target`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::EntryMissing`] when the package has no usable
    /// entry, [`PluginError::InvalidManifest`] when the entry escapes the
    /// package, or another [`PluginError`] when evaluation fails.
    fn load(&self, target: &LoadTarget<'_>) -> Result<Arc<dyn ScanPlugin>, PluginError>;
}

/// Loads packages whose entry is an executable speaking the JSONL protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLoader;

impl PluginLoader for ProcessLoader {
    fn load(&self, target: &LoadTarget<'_>) -> Result<Arc<dyn ScanPlugin>, PluginError> {
        let entry = target.manifest().resolve_entry(target.package_dir())?;
        Ok(Arc::new(ProcessPlugin::new(entry, target.sandbox().clone())))
    }
}

/// Serves plugins registered in-process, keyed by manifest name.
#[derive(Default, Clone)]
pub struct StaticLoader {
    plugins: BTreeMap<String, Arc<dyn ScanPlugin>>,
}

impl StaticLoader {
    /// Creates an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `plugin` for packages whose manifest is named `name`.
    #[must_use]
    pub fn with_plugin(mut self, name: impl Into<String>, plugin: Arc<dyn ScanPlugin>) -> Self {
        self.plugins.insert(name.into(), plugin);
        self
    }

    /// Registers `plugin` in place.
    pub fn register(&mut self, name: impl Into<String>, plugin: Arc<dyn ScanPlugin>) {
        self.plugins.insert(name.into(), plugin);
    }

    /// Names with a registered plugin.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }
}

impl fmt::Debug for StaticLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticLoader")
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginLoader for StaticLoader {
    fn load(&self, target: &LoadTarget<'_>) -> Result<Arc<dyn ScanPlugin>, PluginError> {
        let name = target.manifest().name();
        self.plugins
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| PluginError::EntryMissing {
                name: name.to_owned(),
                path: target.entry(),
            })
    }
}
