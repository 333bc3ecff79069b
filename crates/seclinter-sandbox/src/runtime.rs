//! Procfs readers and host library roots used by the jail and watchdog.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Shared-library directories present on this host, canonicalised and
/// deduplicated. On merged-`/usr` hosts `/lib` and `/usr/lib` collapse into
/// one root.
///
/// Dynamically linked plugin entries cannot start without read access to
/// these.
pub(crate) fn runtime_library_roots() -> Vec<PathBuf> {
    const ROOTS: [&str; 6] = [
        "/lib",
        "/lib64",
        "/usr/lib",
        "/usr/lib64",
        "/lib/x86_64-linux-gnu",
        "/usr/lib/x86_64-linux-gnu",
    ];
    if cfg!(not(target_os = "linux")) {
        return Vec::new();
    }
    ROOTS
        .iter()
        .filter_map(|root| fs::canonicalize(Path::new(root)).ok())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Returns the number of threads in the current process.
///
/// # Errors
///
/// Returns an I/O error when `/proc/self/status` cannot be read or parsed.
pub fn thread_count() -> io::Result<usize> {
    #[cfg(target_os = "linux")]
    {
        let status = fs::read_to_string("/proc/self/status")?;
        status_field(&status, "Threads:")?
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing thread count"))
            .and_then(|count| {
                usize::try_from(count)
                    .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
            })
    }

    #[cfg(not(target_os = "linux"))]
    {
        Ok(1)
    }
}

/// Returns the resident set size of process `pid` in KiB.
///
/// Yields `Ok(None)` when the process has no resident set entry (kernel
/// threads, zombies) or when the platform exposes no procfs.
///
/// # Errors
///
/// Returns an I/O error when the status file exists but cannot be parsed.
pub fn resident_memory_kib(pid: u32) -> io::Result<Option<u64>> {
    #[cfg(target_os = "linux")]
    {
        let path = format!("/proc/{pid}/status");
        match fs::read_to_string(path) {
            Ok(status) => status_field(&status, "VmRSS:"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error),
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        Ok(None)
    }
}

/// Extracts the leading integer of a `Key: value unit` line.
#[cfg(target_os = "linux")]
fn status_field(status: &str, key: &str) -> io::Result<Option<u64>> {
    let Some((_, tail)) = status.split_once(key) else {
        return Ok(None);
    };
    let value = tail
        .split_whitespace()
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("malformed {key}")))?;
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
}
