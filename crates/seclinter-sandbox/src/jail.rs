//! Spawning plugin processes inside a `birdcage` jail.

use std::collections::{BTreeSet, HashMap};
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use birdcage::process::{Child, Command};
use birdcage::{Birdcage, Exception, Sandbox as _};

use crate::error::JailError;
use crate::policy::{JailPolicy, NetworkAccess};
use crate::runtime::thread_count;

/// Command builder accepted by [`Jail::spawn`].
pub type JailCommand = Command;
/// A running jailed process.
pub type JailChild = Child;

/// Launches plugin entries under a [`JailPolicy`].
#[derive(Debug, Clone)]
pub struct Jail {
    policy: JailPolicy,
}

impl Jail {
    /// Wraps `policy`.
    #[must_use]
    pub const fn new(policy: JailPolicy) -> Self {
        Self { policy }
    }

    /// The policy applied to every spawned child.
    #[must_use]
    pub const fn policy(&self) -> &JailPolicy {
        &self.policy
    }

    /// Spawns `command` inside the jail.
    ///
    /// The program must be absolute and listed with [`JailPolicy::entry`],
    /// and every path the policy names must exist. These checks run before
    /// the thread count is inspected, so a bad policy is reported the same
    /// way from any thread. Activation itself needs a single-threaded
    /// process.
    ///
    /// The parent's environment is put back once the child is running.
    ///
    /// # Errors
    ///
    /// Returns [`JailError`] when a check fails or `birdcage` cannot
    /// activate.
    pub fn spawn(&self, command: JailCommand) -> Result<JailChild, JailError> {
        let requested = Path::new(command.get_program());
        if !requested.is_absolute() {
            return Err(JailError::RelativeProgram(requested.to_path_buf()));
        }
        let program = resolve(requested)?;
        let entries = resolve_all(self.policy.entries())?;
        if !entries.contains(&program) {
            return Err(JailError::UnlistedEntry { program });
        }
        let exceptions = self.exceptions(entries)?;

        let threads = thread_count().map_err(|source| JailError::ThreadCount { source })?;
        if threads > 1 {
            return Err(JailError::Threaded { threads });
        }

        let _snapshot = EnvSnapshot::take();
        let mut cage = Birdcage::new();
        for exception in exceptions {
            cage.add_exception(exception)?;
        }
        cage.spawn(command).map_err(JailError::from)
    }

    fn exceptions(&self, entries: BTreeSet<PathBuf>) -> Result<Vec<Exception>, JailError> {
        let readable = resolve_all(self.policy.readable_paths())?;
        let writable = resolve_all(self.policy.writable_paths())?;

        let mut exceptions: Vec<Exception> = readable
            .into_iter()
            .map(Exception::Read)
            .chain(writable.into_iter().map(Exception::WriteAndRead))
            .chain(entries.into_iter().map(Exception::ExecuteAndRead))
            .collect();
        exceptions.extend(self.policy.environment().exceptions());
        if self.policy.network() == NetworkAccess::Allowed {
            exceptions.push(Exception::Networking);
        }
        Ok(exceptions)
    }
}

fn resolve_all(paths: &[PathBuf]) -> Result<BTreeSet<PathBuf>, JailError> {
    paths.iter().map(|path| resolve(path)).collect()
}

fn resolve(path: &Path) -> Result<PathBuf, JailError> {
    fs::canonicalize(path).map_err(|source| {
        if source.kind() == ErrorKind::NotFound {
            JailError::PathNotFound {
                path: path.to_path_buf(),
            }
        } else {
            JailError::Canonicalise {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

/// Parent environment captured before `birdcage` clears it for the child.
///
/// Dropping the snapshot removes variables that appeared since it was taken
/// and restores every captured value.
#[derive(Debug)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<OsString, OsString>,
}

impl EnvSnapshot {
    pub(crate) fn take() -> Self {
        Self {
            vars: env::vars_os().collect(),
        }
    }

    fn restore(&self) {
        let added: Vec<OsString> = env::vars_os()
            .map(|(key, _)| key)
            .filter(|key| !self.vars.contains_key(key))
            .collect();
        // SAFETY: `Jail::spawn` only takes a snapshot after confirming it is
        // the sole live thread.
        for key in added {
            unsafe { env::remove_var(key) };
        }
        for (key, value) in &self.vars {
            unsafe { env::set_var(key, value) };
        }
    }
}

impl Drop for EnvSnapshot {
    fn drop(&mut self) {
        self.restore();
    }
}
