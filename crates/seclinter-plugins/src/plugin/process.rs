//! Plugins that run as sandboxed child processes.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use super::{ScanJob, ScanPlugin, ScanRequest};
use crate::error::{PluginFault, SandboxExecutionError};
use crate::finding::ScanResult;
use crate::manifest::{PluginEntry, PluginMeta};
use crate::protocol::{Operation, PluginOutput, PluginRequest, PluginResponse};
use crate::sandbox::{PluginEnvironment, PluginSandbox};

const PROCESS_TARGET: &str = "seclinter_plugins::plugin::process";

/// Forwards every hook to a fresh run of the plugin entry.
///
/// Each hook spawns the entry once, sends one request and reads one
/// response. Scans spawn during [`ScanPlugin::launch`] so jailing happens on
/// the orchestrating thread.
#[derive(Debug, Clone)]
pub struct ProcessPlugin {
    entry: PluginEntry,
    sandbox: PluginSandbox,
}

impl ProcessPlugin {
    /// Creates a plugin running `entry` in `sandbox`.
    #[must_use]
    pub const fn new(entry: PluginEntry, sandbox: PluginSandbox) -> Self {
        Self { entry, sandbox }
    }

    /// The plugin entry and its package directory.
    #[must_use]
    pub const fn entry(&self) -> &PluginEntry {
        &self.entry
    }

    /// Sandbox the entry runs in.
    #[must_use]
    pub const fn sandbox(&self) -> &PluginSandbox {
        &self.sandbox
    }

    fn call(&self, operation: Operation) -> Result<PluginResponse, PluginFault> {
        let name = operation.name();
        let started = Instant::now();
        let response = self.sandbox.run(&self.entry, PluginRequest::new(operation))?;
        debug!(
            target: PROCESS_TARGET,
            plugin = self.sandbox.plugin(),
            operation = name,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "plugin hook completed"
        );
        Ok(response)
    }
}

impl ScanPlugin for ProcessPlugin {
    fn meta(&self) -> Result<Option<PluginMeta>, PluginFault> {
        match self.call(Operation::Describe)?.into_output() {
            PluginOutput::Meta { meta } => Ok(Some(meta)),
            PluginOutput::Empty | PluginOutput::Findings { .. } => Ok(None),
        }
    }

    fn init(&self, environment: &PluginEnvironment) -> Result<(), PluginFault> {
        self.call(Operation::Init {
            options: environment.options().clone(),
        })
        .map(drop)
    }

    fn scan(&self, request: &ScanRequest) -> Result<Vec<ScanResult>, PluginFault> {
        let launched = self.sandbox.launch(&self.entry, request.timeout())?;
        findings(self.sandbox.plugin(), launched.run(scan_request(request)))
    }

    fn cleanup(&self) -> Result<(), PluginFault> {
        self.call(Operation::Cleanup).map(drop)
    }

    fn launch(self: Arc<Self>, request: ScanRequest) -> Result<ScanJob, PluginFault> {
        let launched = self.sandbox.launch(&self.entry, request.timeout())?;
        let plugin = self.sandbox.plugin().to_owned();
        Ok(Box::new(move || {
            findings(&plugin, launched.run(scan_request(&request)))
        }))
    }
}

fn scan_request(request: &ScanRequest) -> PluginRequest {
    PluginRequest::new(Operation::Scan(request.payload()))
}

fn findings(
    plugin: &str,
    outcome: Result<PluginResponse, SandboxExecutionError>,
) -> Result<Vec<ScanResult>, PluginFault> {
    match outcome?.into_output() {
        PluginOutput::Findings { results } => Ok(results),
        PluginOutput::Empty => Ok(Vec::new()),
        PluginOutput::Meta { .. } => Err(PluginFault::from(SandboxExecutionError::Protocol {
            plugin: plugin.to_owned(),
            message: String::from("scan answered with metadata instead of findings"),
        })),
    }
}
