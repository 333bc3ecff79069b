//! What a jailed plugin process is allowed to touch.

use std::collections::BTreeSet;
use std::path::PathBuf;

use birdcage::Exception;

use crate::limits::ResourceLimits;
use crate::runtime::runtime_library_roots;

/// Which parent environment variables survive into the jail.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EnvInheritance {
    /// The child starts with an empty environment.
    #[default]
    None,
    /// Only the named variables are passed through.
    Only(BTreeSet<String>),
    /// The whole parent environment is passed through.
    All,
}

impl EnvInheritance {
    fn including(self, key: String) -> Self {
        match self {
            Self::None => Self::Only(BTreeSet::from([key])),
            Self::Only(mut keys) => {
                keys.insert(key);
                Self::Only(keys)
            }
            Self::All => Self::All,
        }
    }

    pub(crate) fn exceptions(&self) -> Vec<Exception> {
        match self {
            Self::None => Vec::new(),
            Self::Only(keys) => keys.iter().cloned().map(Exception::Environment).collect(),
            Self::All => vec![Exception::FullEnvironment],
        }
    }
}

/// Whether the jail keeps the host network namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkAccess {
    /// The child gets a private namespace with no usable interfaces.
    #[default]
    Denied,
    /// The child shares the host network.
    Allowed,
}

impl NetworkAccess {
    /// Returns `true` when the child cannot reach the network.
    #[must_use]
    pub const fn is_denied(self) -> bool {
        matches!(self, Self::Denied)
    }
}

/// The filesystem, environment, network and budget granted to one plugin
/// process.
///
/// A fresh policy only lets the child read the host's shared-library roots so
/// dynamically linked entries can start. Everything else has to be granted:
/// the entry itself with [`JailPolicy::entry`], extra data paths, environment
/// variables and networking.
///
/// ```
/// use std::time::Duration;
///
/// use seclinter_sandbox::{JailPolicy, ResourceLimits};
///
/// let policy = JailPolicy::new()
///     .entry("/opt/plugins/seclinter-plugin-xss/seclinter-plugin-xss")
///     .readable("/srv/project")
///     .with_limits(ResourceLimits::new(Duration::from_secs(5)));
/// assert!(policy.network().is_denied());
/// assert_eq!(policy.entries().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct JailPolicy {
    entries: Vec<PathBuf>,
    readable: Vec<PathBuf>,
    writable: Vec<PathBuf>,
    environment: EnvInheritance,
    network: NetworkAccess,
    limits: ResourceLimits,
}

impl JailPolicy {
    /// Creates the closed default policy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            readable: runtime_library_roots(),
            writable: Vec::new(),
            environment: EnvInheritance::default(),
            network: NetworkAccess::default(),
            limits: ResourceLimits::default(),
        }
    }

    /// Allows `path` to be executed (and read).
    #[must_use]
    pub fn entry(mut self, path: impl Into<PathBuf>) -> Self {
        self.entries.push(path.into());
        self
    }

    /// Allows `path` to be read.
    #[must_use]
    pub fn readable(mut self, path: impl Into<PathBuf>) -> Self {
        self.readable.push(path.into());
        self
    }

    /// Allows `path` to be read and written.
    #[must_use]
    pub fn writable(mut self, path: impl Into<PathBuf>) -> Self {
        self.writable.push(path.into());
        self
    }

    /// Passes the variable `key` through. Has no effect once the whole
    /// environment is inherited.
    #[must_use]
    pub fn inherit_var(mut self, key: impl Into<String>) -> Self {
        self.environment = self.environment.including(key.into());
        self
    }

    /// Passes the whole parent environment through.
    #[must_use]
    pub fn inherit_environment(mut self) -> Self {
        self.environment = EnvInheritance::All;
        self
    }

    /// Shares the host network with the child.
    #[must_use]
    pub const fn with_network(mut self) -> Self {
        self.network = NetworkAccess::Allowed;
        self
    }

    /// Replaces the resource budget.
    #[must_use]
    pub const fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Executable paths, in the order they were granted.
    #[must_use]
    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Read-only paths, starting with the runtime library roots.
    #[must_use]
    pub fn readable_paths(&self) -> &[PathBuf] {
        &self.readable
    }

    /// Read-write paths.
    #[must_use]
    pub fn writable_paths(&self) -> &[PathBuf] {
        &self.writable
    }

    /// Environment inheritance.
    #[must_use]
    pub const fn environment(&self) -> &EnvInheritance {
        &self.environment
    }

    /// Network access.
    #[must_use]
    pub const fn network(&self) -> NetworkAccess {
        self.network
    }

    /// Budget the supervisor enforces on the child.
    #[must_use]
    pub const fn limits(&self) -> &ResourceLimits {
        &self.limits
    }
}

impl Default for JailPolicy {
    fn default() -> Self {
        Self::new()
    }
}
