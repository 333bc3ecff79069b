//! Permissions a plugin may be granted.
//!
//! Permissions are declared once per load request and never change for the
//! lifetime of the loaded plugin. Each one unlocks a single capability family
//! on the [`CapabilityFacade`](crate::capability::CapabilityFacade).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single capability grant.
///
/// # Example
///
/// ```
/// use seclinter_plugins::PluginPermission;
///
/// let permission: PluginPermission = "net:outbound".parse().expect("known token");
/// assert_eq!(permission, PluginPermission::NetOutbound);
/// assert_eq!(permission.as_str(), "net:outbound");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PluginPermission {
    /// Read files and list directories under the filesystem root.
    #[serde(rename = "fs:read")]
    FsRead,
    /// Write files under the filesystem root.
    #[serde(rename = "fs:write")]
    FsWrite,
    /// Issue outbound HTTP requests.
    #[serde(rename = "net:outbound")]
    NetOutbound,
    /// Execute host programs beyond the plugin entry itself.
    #[serde(rename = "process:exec")]
    ProcessExec,
    /// Read host environment variables.
    #[serde(rename = "env:read")]
    EnvRead,
}

impl PluginPermission {
    /// Every permission, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::FsRead,
        Self::FsWrite,
        Self::NetOutbound,
        Self::ProcessExec,
        Self::EnvRead,
    ];

    /// Returns the wire token for the permission.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FsRead => "fs:read",
            Self::FsWrite => "fs:write",
            Self::NetOutbound => "net:outbound",
            Self::ProcessExec => "process:exec",
            Self::EnvRead => "env:read",
        }
    }
}

impl fmt::Display for PluginPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a permission token is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown plugin permission '{token}'")]
pub struct ParsePermissionError {
    /// The rejected token.
    pub token: String,
}

impl FromStr for PluginPermission {
    type Err = ParsePermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|permission| permission.as_str() == s)
            .ok_or_else(|| ParsePermissionError {
                token: s.to_owned(),
            })
    }
}

/// An ordered, duplicate-free set of permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<PluginPermission>);

impl PermissionSet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Creates a set holding every permission.
    #[must_use]
    pub fn all() -> Self {
        PluginPermission::ALL.into_iter().collect()
    }

    /// Adds a permission, returning the set for chaining.
    #[must_use]
    pub fn with(mut self, permission: PluginPermission) -> Self {
        let _ = self.0.insert(permission);
        self
    }

    /// Returns `true` when the permission is granted.
    #[must_use]
    pub fn contains(&self, permission: PluginPermission) -> bool {
        self.0.contains(&permission)
    }

    /// Iterates over the granted permissions in order.
    pub fn iter(&self) -> impl Iterator<Item = PluginPermission> + '_ {
        self.0.iter().copied()
    }

    /// Returns the number of granted permissions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when nothing is granted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<PluginPermission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = PluginPermission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
