//! Plugin package manifests and metadata.
//!
//! A plugin package is a directory holding a [`MANIFEST_FILE`] that names the
//! plugin and its entry point. Metadata may be declared inline in the
//! manifest; otherwise the plugin supplies it when described.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PluginError;
use crate::permission::PermissionSet;

/// File name of the manifest inside a plugin package.
pub const MANIFEST_FILE: &str = "plugin.json";

/// Entry point used when the manifest omits `main`.
pub const DEFAULT_ENTRY: &str = "index";

/// Descriptive metadata published by a plugin.
///
/// # Example
///
/// ```
/// use seclinter_plugins::{PermissionSet, PluginMeta, PluginPermission};
///
/// let meta = PluginMeta::new("xss-detector", "1.0.0", "js")
///     .with_description("Flags DOM XSS sinks")
///     .with_permissions(PermissionSet::new().with(PluginPermission::FsRead));
/// assert_eq!(meta.name(), "xss-detector");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMeta {
    name: String,
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(default, skip_serializing_if = "PermissionSet::is_empty")]
    permissions: PermissionSet,
}

impl PluginMeta {
    /// Creates metadata with the identifying fields.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            target: target.into(),
            tags: Vec::new(),
            permissions: PermissionSet::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the declared permissions.
    #[must_use]
    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = permissions;
        self
    }

    /// Unique plugin name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Plugin version.
    #[must_use]
    pub const fn version(&self) -> &str {
        self.version.as_str()
    }

    /// Short description.
    #[must_use]
    pub const fn description(&self) -> &str {
        self.description.as_str()
    }

    /// What the plugin inspects (`js`, `dependency`, ...).
    #[must_use]
    pub const fn target(&self) -> &str {
        self.target.as_str()
    }

    /// Free-form tags.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Permissions the plugin declares it needs.
    #[must_use]
    pub const fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }
}

/// Contents of a package's `plugin.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default = "default_entry")]
    main: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<PluginMeta>,
}

fn default_entry() -> String {
    String::from(DEFAULT_ENTRY)
}

impl PluginManifest {
    /// Creates a manifest with the default entry point.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            main: default_entry(),
            description: None,
            meta: None,
        }
    }

    /// Overrides the entry point.
    #[must_use]
    pub fn with_main(mut self, main: impl Into<String>) -> Self {
        self.main = main.into();
        self
    }

    /// Declares metadata inline.
    #[must_use]
    pub fn with_meta(mut self, meta: PluginMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Reads and validates the manifest of the package at `package_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ManifestMissing`] when the file is absent and
    /// [`PluginError::InvalidManifest`] when it cannot be read, parsed, or
    /// names no plugin.
    pub fn read(package_dir: &Path) -> Result<Self, PluginError> {
        let path = package_dir.join(MANIFEST_FILE);
        let raw = fs::read_to_string(&path).map_err(|error| {
            if error.kind() == io::ErrorKind::NotFound {
                PluginError::ManifestMissing { path: path.clone() }
            } else {
                PluginError::InvalidManifest {
                    path: path.clone(),
                    message: error.to_string(),
                }
            }
        })?;
        let manifest: Self =
            serde_json::from_str(&raw).map_err(|error| PluginError::InvalidManifest {
                path: path.clone(),
                message: error.to_string(),
            })?;
        manifest.validate(&path)?;
        Ok(manifest)
    }

    fn validate(&self, path: &Path) -> Result<(), PluginError> {
        if self.name.trim().is_empty() {
            return Err(PluginError::InvalidManifest {
                path: path.to_path_buf(),
                message: String::from("plugin name must not be empty"),
            });
        }
        if self.main.trim().is_empty() {
            return Err(PluginError::InvalidManifest {
                path: path.to_path_buf(),
                message: String::from("plugin entry point must not be empty"),
            });
        }
        let main = Path::new(&self.main);
        if main.has_root() || main.is_absolute() {
            return Err(PluginError::InvalidManifest {
                path: path.to_path_buf(),
                message: format!("plugin entry point '{}' must be relative", self.main),
            });
        }
        if main.components().any(|part| part == Component::ParentDir) {
            return Err(PluginError::InvalidManifest {
                path: path.to_path_buf(),
                message: format!(
                    "plugin entry point '{}' must not leave the package directory",
                    self.main
                ),
            });
        }
        Ok(())
    }

    /// Joins the entry point onto the package directory without touching
    /// the filesystem.
    #[must_use]
    pub fn entry_path(&self, package_dir: &Path) -> PathBuf {
        package_dir.join(&self.main)
    }

    /// Resolves the entry point to a file inside the package directory.
    ///
    /// Symlinks are followed, so a link pointing out of the package is
    /// refused as well.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::EntryMissing`] when the entry is not a file and
    /// [`PluginError::InvalidManifest`] when it resolves outside
    /// `package_dir`.
    pub fn resolve_entry(&self, package_dir: &Path) -> Result<PluginEntry, PluginError> {
        let joined = self.entry_path(package_dir);
        let missing = || PluginError::EntryMissing {
            name: self.name.clone(),
            path: joined.clone(),
        };
        let root = fs::canonicalize(package_dir).map_err(|_| missing())?;
        let program = fs::canonicalize(&joined).map_err(|_| missing())?;
        if !program.starts_with(&root) {
            return Err(PluginError::InvalidManifest {
                path: package_dir.join(MANIFEST_FILE),
                message: format!(
                    "plugin entry point '{}' resolves outside the package directory",
                    self.main
                ),
            });
        }
        if !program.is_file() {
            return Err(missing());
        }
        Ok(PluginEntry::new(root, program))
    }

    /// Plugin name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Package version.
    #[must_use]
    pub const fn version(&self) -> &str {
        self.version.as_str()
    }

    /// Entry point relative to the package directory.
    #[must_use]
    pub const fn main(&self) -> &str {
        self.main.as_str()
    }

    /// Package description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Inline metadata, when declared.
    #[must_use]
    pub const fn meta(&self) -> Option<&PluginMeta> {
        self.meta.as_ref()
    }
}

/// An entry point together with the package directory that contains it.
///
/// [`PluginManifest::resolve_entry`] produces canonical paths with the entry
/// under the directory. [`PluginEntry::new`] takes both as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEntry {
    package_dir: PathBuf,
    program: PathBuf,
}

impl PluginEntry {
    /// Pairs `program` with its `package_dir`.
    #[must_use]
    pub fn new(package_dir: impl Into<PathBuf>, program: impl Into<PathBuf>) -> Self {
        Self {
            package_dir: package_dir.into(),
            program: program.into(),
        }
    }

    /// Directory the plugin may read in the jail.
    #[must_use]
    pub fn package_dir(&self) -> &Path {
        &self.package_dir
    }

    /// Executable to spawn.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }
}
