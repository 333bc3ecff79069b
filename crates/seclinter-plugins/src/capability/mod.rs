//! Permission-checked capabilities handed to plugins.
//!
//! A [`CapabilityFacade`] is built once per plugin from its permission set.
//! Each family (filesystem, HTTP, environment) either performs the real
//! operation or fails with [`CapabilityError::PermissionDenied`]; path helpers
//! and logging are always available, and host modules go through the
//! [`ModuleLoader`] allow-list. Process plugins reach the facade through
//! [`CapabilityFacade::invoke`], which serves one wire-level
//! [`CapabilityCall`].

mod fs;
mod http;
mod logger;
mod modules;
mod path;

#[cfg(test)]
mod tests;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde_json::{Value, json};

use crate::error::CapabilityError;
use crate::permission::{PermissionSet, PluginPermission};
use crate::protocol::{CapabilityCall, HttpResponse};

pub use self::fs::{DirEntryInfo, FsCapability};
pub use self::http::{
    DEFAULT_MIN_REQUEST_INTERVAL, HTTP_TIMEOUT, HttpCapability, HttpTransport, MAX_REDIRECTS,
    ReqwestTransport, USER_AGENT,
};
pub use self::logger::{PLUGIN_LOG_TARGET, PluginLogger};
pub use self::modules::{DEFAULT_ALLOWED_MODULES, HostModule, ModuleLoader};
pub use self::path::PathOps;

/// The closed set of capabilities available to one plugin.
#[derive(Debug)]
pub struct CapabilityFacade {
    permissions: PermissionSet,
    fs: FsCapability,
    http: HttpCapability,
    path: PathOps,
    logger: PluginLogger,
    modules: ModuleLoader,
}

impl CapabilityFacade {
    /// Starts building a facade for `plugin` rooted at `fs_root`.
    ///
    /// ```
    /// use seclinter_plugins::capability::CapabilityFacade;
    /// use seclinter_plugins::{PermissionSet, PluginPermission};
    ///
    /// let facade = CapabilityFacade::builder("xss-detector", "/srv/project")
    ///     .permissions(PermissionSet::new().with(PluginPermission::FsRead))
    ///     .build();
    /// assert!(facade.http().get("https://example.test", &Default::default()).is_err());
    /// ```
    #[must_use]
    pub fn builder(plugin: impl Into<String>, fs_root: impl Into<Utf8PathBuf>) -> FacadeBuilder {
        FacadeBuilder {
            plugin: plugin.into(),
            fs_root: fs_root.into(),
            permissions: PermissionSet::new(),
            filesystem: true,
            transport: None,
            min_request_interval: DEFAULT_MIN_REQUEST_INTERVAL,
            allowed_modules: Vec::from(DEFAULT_ALLOWED_MODULES.map(String::from)),
            extra_modules: Vec::new(),
        }
    }

    /// Granted permissions.
    #[must_use]
    pub const fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    /// Filesystem capability.
    #[must_use]
    pub const fn fs(&self) -> &FsCapability {
        &self.fs
    }

    /// HTTP capability.
    #[must_use]
    pub const fn http(&self) -> &HttpCapability {
        &self.http
    }

    /// Path helpers.
    #[must_use]
    pub const fn path(&self) -> &PathOps {
        &self.path
    }

    /// Plugin logger.
    #[must_use]
    pub const fn logger(&self) -> &PluginLogger {
        &self.logger
    }

    /// Restricted module loader.
    #[must_use]
    pub const fn modules(&self) -> &ModuleLoader {
        &self.modules
    }

    /// Reads a host environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::PermissionDenied`] without `env:read`.
    pub fn env_var(&self, name: &str) -> Result<Option<String>, CapabilityError> {
        if !self.permissions.contains(PluginPermission::EnvRead) {
            return Err(CapabilityError::PermissionDenied {
                permission: PluginPermission::EnvRead,
                operation: "env_var",
            });
        }
        Ok(env::var(name).ok())
    }

    /// Serves one capability call received over the wire.
    ///
    /// # Errors
    ///
    /// Returns the [`CapabilityError`] raised by the underlying capability.
    pub fn invoke(&self, call: &CapabilityCall) -> Result<Value, CapabilityError> {
        match call {
            CapabilityCall::ReadFile { path } => self.fs.read_file(path).map(Value::String),
            CapabilityCall::WriteFile { path, content } => {
                self.fs.write_file(path, content).map(|()| Value::Null)
            }
            CapabilityCall::Exists { path } => self.fs.exists(path).map(Value::Bool),
            CapabilityCall::ReadDir { path } => self.fs.read_dir(path).map(|entries| {
                Value::Array(
                    entries
                        .into_iter()
                        .map(|entry| json!({"name": entry.name, "is_dir": entry.is_dir}))
                        .collect(),
                )
            }),
            CapabilityCall::HttpGet { url, options } => {
                self.http.get(url, options).map(|response| response_value(&response))
            }
            CapabilityCall::HttpPost { url, body, options } => self
                .http
                .post(url, body, options)
                .map(|response| response_value(&response)),
            CapabilityCall::EnvVar { name } => self
                .env_var(name)
                .map(|value| value.map_or(Value::Null, Value::String)),
            CapabilityCall::PathJoin { segments } => Ok(Value::String(self.path.join(segments))),
            CapabilityCall::PathResolve { segments } => {
                Ok(Value::String(self.path.resolve(segments)))
            }
            CapabilityCall::PathDirname { path } => Ok(Value::String(self.path.dirname(path))),
            CapabilityCall::PathBasename { path } => Ok(Value::String(self.path.basename(path))),
            CapabilityCall::Require { module } => self.modules.require(module).map(|found| {
                json!({"name": found.name(), "methods": found.methods()})
            }),
            CapabilityCall::CallModule {
                module,
                method,
                args,
            } => self.modules.call(module, method, args),
        }
    }
}

fn response_value(response: &HttpResponse) -> Value {
    json!({
        "status": response.status,
        "headers": response.headers,
        "body": response.body,
    })
}

/// Builder returned by [`CapabilityFacade::builder`].
pub struct FacadeBuilder {
    plugin: String,
    fs_root: Utf8PathBuf,
    permissions: PermissionSet,
    filesystem: bool,
    transport: Option<Arc<dyn HttpTransport>>,
    min_request_interval: Duration,
    allowed_modules: Vec<String>,
    extra_modules: Vec<Arc<dyn HostModule>>,
}

impl FacadeBuilder {
    /// Sets the granted permissions.
    #[must_use]
    pub fn permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = permissions;
        self
    }

    /// Disables the filesystem regardless of permissions.
    #[must_use]
    pub const fn without_filesystem(mut self) -> Self {
        self.filesystem = false;
        self
    }

    /// Replaces the HTTP transport.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the minimum spacing between HTTP requests.
    #[must_use]
    pub const fn min_request_interval(mut self, interval: Duration) -> Self {
        self.min_request_interval = interval;
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

    /// Provides an extra host module.
    #[must_use]
    pub fn module(mut self, module: Arc<dyn HostModule>) -> Self {
        self.extra_modules.push(module);
        self
    }

    /// Builds the facade.
    #[must_use]
    pub fn build(self) -> CapabilityFacade {
        let path = PathOps::new(self.fs_root.clone());
        let fs = if self.filesystem {
            FsCapability::rooted(self.fs_root, &self.permissions)
        } else {
            FsCapability::disabled()
        };
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport));
        let http = HttpCapability::new(&self.permissions, transport, self.min_request_interval);
        let modules = self
            .extra_modules
            .into_iter()
            .fold(ModuleLoader::new(self.allowed_modules, path.clone()), |loader, module| {
                loader.with_module(module)
            });

        CapabilityFacade {
            permissions: self.permissions,
            fs,
            http,
            path,
            logger: PluginLogger::new(self.plugin),
            modules,
        }
    }
}
