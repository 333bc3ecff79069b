//! The plugin contract the manager drives.
//!
//! Every loaded plugin is an `Arc<dyn ScanPlugin>`. Process plugins are
//! [`ProcessPlugin`]s that forward each hook to a sandboxed child; embedders
//! can implement the trait directly and register instances with a
//! [`StaticLoader`](crate::loader::StaticLoader).

mod process;


use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;

use crate::error::PluginFault;
use crate::finding::ScanResult;
use crate::manifest::PluginMeta;
use crate::protocol::ScanPayload;
use crate::sandbox::PluginEnvironment;

pub use self::process::ProcessPlugin;

/// Deferred scan work, runnable on a worker thread.
pub type ScanJob = Box<dyn FnOnce() -> Result<Vec<ScanResult>, PluginFault> + Send>;

/// Arguments of one plugin scan call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    project_path: Utf8PathBuf,
    options: BTreeMap<String, Value>,
    config: Value,
    timeout: Duration,
}

impl ScanRequest {
    /// Creates a request for `project_path` with the given budget.
    #[must_use]
    pub fn new(project_path: impl Into<Utf8PathBuf>, timeout: Duration) -> Self {
        Self {
            project_path: project_path.into(),
            options: BTreeMap::new(),
            config: Value::Null,
            timeout,
        }
    }

    /// Attaches free-form scan options.
    #[must_use]
    pub fn with_options(mut self, options: BTreeMap<String, Value>) -> Self {
        self.options = options;
        self
    }

    /// Attaches the plugin's configured options.
    #[must_use]
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Project root to scan.
    #[must_use]
    pub fn project_path(&self) -> &Utf8Path {
        &self.project_path
    }

    /// Free-form scan options.
    #[must_use]
    pub const fn options(&self) -> &BTreeMap<String, Value> {
        &self.options
    }

    /// Plugin-specific configuration.
    #[must_use]
    pub const fn config(&self) -> &Value {
        &self.config
    }

    /// Budget for the call.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wire payload of the request.
    #[must_use]
    pub fn payload(&self) -> ScanPayload {
        ScanPayload {
            project_path: self.project_path.clone(),
            options: self.options.clone(),
            config: self.config.clone(),
        }
    }
}

/// A scan plugin.
///
/// Only [`ScanPlugin::scan`] is required. Hooks take `&self`; plugins that
/// keep state across calls use interior mutability.
pub trait ScanPlugin: Send + Sync + 'static {
    /// Metadata reported by the plugin itself, used when the manifest has
    /// none.
    ///
    /// # Errors
    ///
    /// Returns a [`PluginFault`] when the plugin cannot describe itself.
    fn meta(&self) -> Result<Option<PluginMeta>, PluginFault> {
        Ok(None)
    }

    /// Prepares the plugin with its capabilities and options.
    ///
    /// # Errors
    ///
    /// Returns a [`PluginFault`] when the configuration is rejected.
    fn init(&self, _environment: &PluginEnvironment) -> Result<(), PluginFault> {
        Ok(())
    }

    /// Scans a project.
    ///
    /// # Errors
    ///
    /// Returns a [`PluginFault`] when the scan fails.
    fn scan(&self, request: &ScanRequest) -> Result<Vec<ScanResult>, PluginFault>;

    /// Releases resources before unload.
    ///
    /// # Errors
    ///
    /// Returns a [`PluginFault`]; the manager logs it and unloads anyway.
    fn cleanup(&self) -> Result<(), PluginFault> {
        Ok(())
    }

    /// Does the part of a scan that must happen on the orchestrating thread
    /// and returns the rest as a job for a worker.
    ///
    /// The default defers everything to [`ScanPlugin::scan`].
    ///
    /// # Errors
    ///
    /// Returns a [`PluginFault`] when the scan cannot be started.
    fn launch(self: Arc<Self>, request: ScanRequest) -> Result<ScanJob, PluginFault> {
        Ok(Box::new(move || self.scan(&request)))
    }
}
