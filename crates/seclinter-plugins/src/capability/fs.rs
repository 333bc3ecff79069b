//! Filesystem capability confined to a root directory.

use std::io;
use std::sync::Arc;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs::Dir;
use serde::Serialize;

use crate::error::CapabilityError;
use crate::permission::{PermissionSet, PluginPermission};

/// One entry returned by [`FsCapability::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntryInfo {
    /// Entry file name.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

#[derive(Debug, Clone)]
enum FsAccess {
    Disabled,
    Rooted {
        root: Utf8PathBuf,
        read: bool,
        write: bool,
    },
}

/// Filesystem operations available to a plugin.
///
/// Every path is resolved inside the root through `cap-std`, so symlinks and
/// `..` components cannot reach outside it. Absolute paths are accepted only
/// when they point inside the root.
#[derive(Debug, Clone)]
pub struct FsCapability {
    access: FsAccess,
}

impl FsCapability {
    /// Confines access to `root`, honouring `fs:read` and `fs:write`.
    #[must_use]
    pub fn rooted(root: impl Into<Utf8PathBuf>, permissions: &PermissionSet) -> Self {
        Self {
            access: FsAccess::Rooted {
                root: root.into(),
                read: permissions.contains(PluginPermission::FsRead),
                write: permissions.contains(PluginPermission::FsWrite),
            },
        }
    }

    /// A capability whose every method fails.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            access: FsAccess::Disabled,
        }
    }

    /// Returns the root, or `None` when access is disabled.
    #[must_use]
    pub fn root(&self) -> Option<&Utf8Path> {
        match &self.access {
            FsAccess::Disabled => None,
            FsAccess::Rooted { root, .. } => Some(root.as_path()),
        }
    }

    /// Reads a UTF-8 file.
    ///
    /// # Errors
    ///
    /// Fails without `fs:read`, outside the root, or on I/O errors.
    pub fn read_file(&self, path: &str) -> Result<String, CapabilityError> {
        let (dir, relative) = self.open(path, PluginPermission::FsRead, "read_file")?;
        dir.read_to_string(relative.as_std_path())
            .map_err(|source| io_error(path, source))
    }

    /// Writes a UTF-8 file, replacing any existing content.
    ///
    /// # Errors
    ///
    /// Fails without `fs:write`, outside the root, or on I/O errors.
    pub fn write_file(&self, path: &str, content: &str) -> Result<(), CapabilityError> {
        let (dir, relative) = self.open(path, PluginPermission::FsWrite, "write_file")?;
        dir.write(relative.as_std_path(), content)
            .map_err(|source| io_error(path, source))
    }

    /// Checks whether a path exists.
    ///
    /// # Errors
    ///
    /// Fails without `fs:read` or outside the root.
    pub fn exists(&self, path: &str) -> Result<bool, CapabilityError> {
        let (dir, relative) = self.open(path, PluginPermission::FsRead, "exists")?;
        Ok(dir.exists(relative.as_std_path()))
    }

    /// Lists a directory, sorted by name.
    ///
    /// # Errors
    ///
    /// Fails without `fs:read`, outside the root, or on I/O errors.
    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntryInfo>, CapabilityError> {
        let (dir, relative) = self.open(path, PluginPermission::FsRead, "read_dir")?;
        let entries = dir
            .read_dir(relative.as_std_path())
            .map_err(|source| io_error(path, source))?;

        let mut listing = Vec::new();
        for item in entries {
            let entry = item.map_err(|source| io_error(path, source))?;
            let is_dir = entry
                .file_type()
                .map_err(|source| io_error(path, source))?
                .is_dir();
            listing.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }
        listing.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(listing)
    }

    fn open(
        &self,
        path: &str,
        permission: PluginPermission,
        operation: &'static str,
    ) -> Result<(Dir, Utf8PathBuf), CapabilityError> {
        let FsAccess::Rooted { root, read, write } = &self.access else {
            return Err(CapabilityError::FilesystemDisabled { operation });
        };
        let granted = match permission {
            PluginPermission::FsWrite => *write,
            _ => *read,
        };
        if !granted {
            return Err(CapabilityError::PermissionDenied {
                permission,
                operation,
            });
        }
        let relative = confine(root, path)?;
        let dir = Dir::open_ambient_dir(root.as_std_path(), ambient_authority())
            .map_err(|source| io_error(root.as_str(), source))?;
        Ok((dir, relative))
    }
}

/// Maps `path` to a normalised path relative to `root`.
pub(crate) fn confine(root: &Utf8Path, path: &str) -> Result<Utf8PathBuf, CapabilityError> {
    let outside = || CapabilityError::PathOutsideRoot {
        path: path.to_owned(),
    };
    let candidate = Utf8Path::new(path);
    let relative = if candidate.is_absolute() {
        candidate.strip_prefix(root).map_err(|_| outside())?
    } else {
        candidate
    };

    let mut parts: Vec<&str> = Vec::new();
    for component in relative.components() {
        match component {
            Utf8Component::Normal(part) => parts.push(part),
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                parts.pop().ok_or_else(outside)?;
            }
            Utf8Component::RootDir | Utf8Component::Prefix(_) => return Err(outside()),
        }
    }

    if parts.is_empty() {
        return Ok(Utf8PathBuf::from("."));
    }
    Ok(parts.into_iter().collect())
}

fn io_error(path: &str, source: io::Error) -> CapabilityError {
    CapabilityError::Io {
        path: path.to_owned(),
        source: Arc::new(source),
    }
}
