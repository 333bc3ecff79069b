//! Errors raised while preparing or launching a jailed plugin process.

use std::io;
use std::path::PathBuf;

use birdcage::error::Error as BirdcageError;
use thiserror::Error;

/// Why a plugin process could not be jailed.
#[derive(Debug, Error)]
pub enum JailError {
    /// Jailed programs are looked up by absolute path only.
    #[error("jailed program must be an absolute path: {0}")]
    RelativeProgram(PathBuf),

    /// The program is not one of the policy's entries.
    #[error("{program} is not an entry of the jail policy")]
    UnlistedEntry {
        /// Canonical path of the rejected program.
        program: PathBuf,
    },

    /// A path named by the policy is absent from the host.
    #[error("jail path {path} does not exist")]
    PathNotFound {
        /// Path as given to the policy.
        path: PathBuf,
    },

    /// A path named by the policy could not be resolved.
    #[error("cannot resolve jail path {path}: {source}")]
    Canonicalise {
        /// Path as given to the policy.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// More than one thread is alive, which `birdcage` cannot handle.
    #[error("jails can only be entered from a single thread, found {threads}")]
    Threaded {
        /// Live threads observed in `/proc/self/status`.
        threads: usize,
    },

    /// The live thread count could not be read.
    #[error("cannot count process threads: {source}")]
    ThreadCount {
        /// Underlying I/O error.
        source: io::Error,
    },

    /// `birdcage` refused an exception or failed to spawn the child.
    #[error("birdcage: {0}")]
    Birdcage(#[from] BirdcageError),
}
