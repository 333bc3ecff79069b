//! Process jail for untrusted SecLinter scan plugins.
//!
//! A [`JailPolicy`] lists what a plugin process may touch. A [`Jail`] spawns
//! the process under that policy using the [`birdcage`] library (Linux
//! namespaces plus `seccomp-bpf`), and a [`Watchdog`] keeps it within the
//! policy's [`ResourceLimits`].
//!
//! Policies start closed. The network is unreachable, the environment is
//! empty, nothing outside the shared-library roots is readable and only
//! listed entries, given as absolute paths, may be executed.
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use seclinter_sandbox::{
//!     Jail, JailCommand, JailPolicy, ResourceLimits, Watchdog, process::Stdio,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let entry = "/opt/plugins/seclinter-plugin-xss/seclinter-plugin-xss";
//! let policy = JailPolicy::new()
//!     .entry(entry)
//!     .readable("/srv/project")
//!     .with_limits(ResourceLimits::new(Duration::from_secs(5)).with_memory_mib(100));
//!
//! let mut command = JailCommand::new(entry);
//! command.stdin(Stdio::piped()).stdout(Stdio::piped());
//!
//! let jail = Jail::new(policy);
//! let child = jail.spawn(command)?;
//! let watchdog = Watchdog::start(*jail.policy().limits());
//! assert!(watchdog.check(child.id()).is_none());
//! # Ok(()) }
//! ```
//!
//! [`Jail::spawn`] refuses to activate while other threads are alive and
//! returns [`JailError::Threaded`] instead.

mod error;
mod jail;
mod limits;
mod policy;
mod runtime;

#[cfg(test)]
mod tests;

pub use birdcage::process;
pub use error::JailError;
pub use jail::{Jail, JailChild, JailCommand};
pub use limits::{LimitBreach, ResourceLimits, Watchdog};
pub use policy::{EnvInheritance, JailPolicy, NetworkAccess};
pub use runtime::{resident_memory_kib, thread_count};
