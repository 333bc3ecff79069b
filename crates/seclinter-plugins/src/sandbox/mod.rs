//! Isolated execution of plugin entries.
//!
//! A [`PluginSandbox`] owns the [`CapabilityFacade`] granted to one plugin and
//! runs the plugin entry as a child process. In [`Isolation::Sandboxed`] mode
//! the child is jailed by `birdcage`: networking is denied, the environment is
//! stripped, and only the entry, its package directory and the runtime library
//! roots are readable. Everything else goes through capability calls on the
//! JSONL protocol, which the sandbox serves from the facade.
//!
//! Jailing requires a single-threaded process. [`PluginSandbox::launch`]
//! therefore only spawns; the returned [`LaunchedPlugin`] may be moved to a
//! worker thread and driven there with [`LaunchedPlugin::run`].

mod launch;
mod session;


use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde_json::Value;
use tracing::debug;

use seclinter_sandbox::{JailPolicy, ResourceLimits};

use self::launch::ChildProcess;
use crate::capability::{
    CapabilityFacade, DEFAULT_ALLOWED_MODULES, DEFAULT_MIN_REQUEST_INTERVAL, HttpTransport,
};
use crate::error::SandboxExecutionError;
use crate::manifest::PluginEntry;
use crate::permission::{PermissionSet, PluginPermission};
use crate::protocol::{PluginRequest, PluginResponse};

const SANDBOX_TARGET: &str = "seclinter_plugins::sandbox";

/// Default resident memory budget for a plugin process.
pub const DEFAULT_MEMORY_LIMIT_MIB: u64 = 100;

/// Default wall-clock budget for one plugin operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// How the plugin process is confined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    /// Spawn inside a `birdcage` jail.
    #[default]
    Sandboxed,
    /// Spawn directly on the host. Only for plugins the operator trusts.
    Trusted,
}

/// Settings for a [`PluginSandbox`].
#[derive(Clone)]
pub struct SandboxOptions {
    fs_root: Utf8PathBuf,
    permissions: PermissionSet,
    timeout: Duration,
    memory_limit_mib: u64,
    allowed_modules: Vec<String>,
    context: BTreeMap<String, Value>,
    executables: Vec<PathBuf>,
    isolation: Isolation,
    min_request_interval: Duration,
    transport: Option<Arc<dyn HttpTransport>>,
}

impl SandboxOptions {
    /// Creates options with no permissions and default budgets.
    #[must_use]
    pub fn new(fs_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            fs_root: fs_root.into(),
            permissions: PermissionSet::new(),
            timeout: DEFAULT_TIMEOUT,
            memory_limit_mib: DEFAULT_MEMORY_LIMIT_MIB,
            allowed_modules: DEFAULT_ALLOWED_MODULES.map(String::from).to_vec(),
            context: BTreeMap::new(),
            executables: Vec::new(),
            isolation: Isolation::default(),
            min_request_interval: DEFAULT_MIN_REQUEST_INTERVAL,
            transport: None,
        }
    }

    /// Sets the granted permissions.
    #[must_use]
    pub fn permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = permissions;
        self
    }

    /// Sets the wall-clock budget per operation.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the resident memory budget in MiB.
    #[must_use]
    pub const fn memory_limit_mib(mut self, mib: u64) -> Self {
        self.memory_limit_mib = mib;
        self
    }

    /// Replaces the module allow-list.
    #[must_use]
    pub fn allowed_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_modules = modules.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a value injected into every request's context.
    #[must_use]
    pub fn context_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Whitelists an extra executable for the jail. Ignored unless
    /// `process:exec` is granted.
    #[must_use]
    pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executables.push(path.into());
        self
    }

    /// Sets the isolation mode.
    #[must_use]
    pub const fn isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Sets the minimum spacing between HTTP requests.
    #[must_use]
    pub const fn min_request_interval(mut self, interval: Duration) -> Self {
        self.min_request_interval = interval;
        self
    }

    /// Replaces the HTTP transport used by the facade.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Root of the plugin-visible filesystem.
    #[must_use]
    pub const fn fs_root(&self) -> &Utf8PathBuf {
        &self.fs_root
    }

    /// Granted permissions.
    #[must_use]
    pub const fn granted(&self) -> &PermissionSet {
        &self.permissions
    }

    /// Wall-clock budget per operation.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        self.timeout
    }

    /// Resident memory budget in MiB.
    #[must_use]
    pub const fn memory_limit(&self) -> u64 {
        self.memory_limit_mib
    }

    /// Isolation mode.
    #[must_use]
    pub const fn isolation_mode(&self) -> Isolation {
        self.isolation
    }

    /// Context injected into requests.
    #[must_use]
    pub const fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }
}

impl fmt::Debug for SandboxOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxOptions")
            .field("fs_root", &self.fs_root)
            .field("permissions", &self.permissions)
            .field("timeout", &self.timeout)
            .field("memory_limit_mib", &self.memory_limit_mib)
            .field("allowed_modules", &self.allowed_modules)
            .field("executables", &self.executables)
            .field("isolation", &self.isolation)
            .finish_non_exhaustive()
    }
}

/// Everything a plugin receives at `init`.
#[derive(Debug, Clone)]
pub struct PluginEnvironment {
    facade: Arc<CapabilityFacade>,
    options: Value,
    context: BTreeMap<String, Value>,
}

impl PluginEnvironment {
    /// Bundles the facade with plugin options and injected context.
    #[must_use]
    pub const fn new(
        facade: Arc<CapabilityFacade>,
        options: Value,
        context: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            facade,
            options,
            context,
        }
    }

    /// Capabilities granted to the plugin.
    #[must_use]
    pub const fn facade(&self) -> &Arc<CapabilityFacade> {
        &self.facade
    }

    /// Plugin-specific options from the manager configuration.
    #[must_use]
    pub const fn options(&self) -> &Value {
        &self.options
    }

    /// Values injected by the host.
    #[must_use]
    pub const fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }
}

/// Runs one plugin's entry under its capability grant.
#[derive(Debug, Clone)]
pub struct PluginSandbox {
    plugin: String,
    options: SandboxOptions,
    facade: Arc<CapabilityFacade>,
}

impl PluginSandbox {
    /// Builds a sandbox and its facade for `plugin`.
    #[must_use]
    pub fn new(plugin: impl Into<String>, options: SandboxOptions) -> Self {
        let name = plugin.into();
        let mut builder = CapabilityFacade::builder(name.as_str(), options.fs_root.clone())
            .permissions(options.permissions.clone())
            .min_request_interval(options.min_request_interval)
            .allowed_modules(options.allowed_modules.iter().cloned());
        if let Some(transport) = &options.transport {
            builder = builder.transport(Arc::clone(transport));
        }
        Self {
            facade: Arc::new(builder.build()),
            plugin: name,
            options,
        }
    }

    /// Builds an unjailed sandbox with every permission granted.
    #[must_use]
    pub fn trusted(plugin: impl Into<String>, fs_root: impl Into<Utf8PathBuf>) -> Self {
        let options = SandboxOptions::new(fs_root)
            .permissions(PermissionSet::all())
            .isolation(Isolation::Trusted);
        Self::new(plugin, options)
    }

    /// Plugin name.
    #[must_use]
    pub const fn plugin(&self) -> &str {
        self.plugin.as_str()
    }

    /// Options the sandbox was built with.
    #[must_use]
    pub const fn options(&self) -> &SandboxOptions {
        &self.options
    }

    /// The capability facade; its [`CapabilityFacade::modules`] is the
    /// restricted module loader.
    #[must_use]
    pub const fn api(&self) -> &Arc<CapabilityFacade> {
        &self.facade
    }

    /// Builds the value handed to the plugin's `init`.
    #[must_use]
    pub fn environment(&self, options: Value) -> PluginEnvironment {
        PluginEnvironment::new(
            Arc::clone(&self.facade),
            options,
            self.options.context.clone(),
        )
    }

    /// Jail policy running `entry` from `package_dir` under `limits`.
    ///
    /// Only `package_dir` is made readable, whatever directory the entry
    /// sits in.
    #[must_use]
    pub fn jail_policy(
        &self,
        package_dir: &Path,
        entry: &Path,
        limits: ResourceLimits,
    ) -> JailPolicy {
        let mut policy = JailPolicy::new()
            .entry(entry)
            .readable(package_dir)
            .with_limits(limits);
        if self.options.permissions.contains(PluginPermission::ProcessExec) {
            policy = self
                .options
                .executables
                .iter()
                .fold(policy, |granted, path| granted.entry(path.clone()));
        }
        policy
    }

    /// Spawns `entry` with a wall-clock budget of `timeout`.
    ///
    /// Call this on a thread that may spawn jailed processes. The returned
    /// handle can be driven from any thread.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxExecutionError::Launch`] when the process cannot be
    /// started.
    pub fn launch(
        &self,
        entry: &PluginEntry,
        timeout: Duration,
    ) -> Result<LaunchedPlugin, SandboxExecutionError> {
        let limits = ResourceLimits::new(timeout).with_memory_mib(self.options.memory_limit_mib);
        let program = entry.program();
        debug!(
            target: SANDBOX_TARGET,
            plugin = self.plugin.as_str(),
            entry = %program.display(),
            isolation = ?self.options.isolation,
            "spawning plugin process"
        );
        let spawned = match self.options.isolation {
            Isolation::Sandboxed => ChildProcess::jailed(
                self.jail_policy(entry.package_dir(), program, limits),
                program,
            ),
            Isolation::Trusted => ChildProcess::host(program),
        };
        let child = spawned.map_err(|message| SandboxExecutionError::Launch {
            plugin: self.plugin.clone(),
            message,
        })?;
        Ok(LaunchedPlugin {
            plugin: self.plugin.clone(),
            child,
            facade: Arc::clone(&self.facade),
            limits,
            context: self.options.context.clone(),
        })
    }

    /// Spawns `entry`, sends `request` and serves it to completion.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxExecutionError`] for launch failures, protocol
    /// violations, non-zero exits, budget breaches and plugin-reported
    /// failures.
    pub fn run(
        &self,
        entry: &PluginEntry,
        request: PluginRequest,
    ) -> Result<PluginResponse, SandboxExecutionError> {
        self.launch(entry, self.options.timeout)?.run(request)
    }
}

/// A spawned plugin process waiting for its request.
pub struct LaunchedPlugin {
    plugin: String,
    child: ChildProcess,
    facade: Arc<CapabilityFacade>,
    limits: ResourceLimits,
    context: BTreeMap<String, Value>,
}

impl LaunchedPlugin {
    /// Sends `request` and supervises the process until it exits.
    ///
    /// The sandbox context is attached when the request carries none.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxExecutionError`] as described on
    /// [`PluginSandbox::run`].
    pub fn run(self, request: PluginRequest) -> Result<PluginResponse, SandboxExecutionError> {
        let outgoing = if request.context().is_empty() {
            request.with_context(self.context)
        } else {
            request
        };
        session::drive(
            &self.plugin,
            self.child,
            &self.facade,
            self.limits,
            &outgoing,
        )
    }

    /// Kills the process without sending a request.
    pub fn abandon(mut self) {
        self.child.terminate();
    }

    /// Plugin name.
    #[must_use]
    pub const fn plugin(&self) -> &str {
        self.plugin.as_str()
    }
}

impl fmt::Debug for LaunchedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchedPlugin")
            .field("plugin", &self.plugin)
            .field("pid", &self.child.id())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}
