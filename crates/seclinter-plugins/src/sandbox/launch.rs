//! Starting plugin entries, jailed or directly on the host.

use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};

use seclinter_sandbox::process::Stdio as JailStdio;
use seclinter_sandbox::{Jail, JailChild, JailCommand, JailPolicy};

/// How a plugin process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct ExitOutcome {
    pub(super) success: bool,
    pub(super) code: Option<i32>,
}

/// The three standard streams of a plugin process.
pub(super) struct Pipes {
    pub(super) stdin: Box<dyn Write + Send>,
    pub(super) stdout: Box<dyn Read + Send>,
    pub(super) stderr: Option<Box<dyn Read + Send>>,
}

/// A running plugin process.
pub(super) enum ChildProcess {
    Jailed(JailChild),
    Host(Child),
}

impl ChildProcess {
    /// Spawns `entry` inside a `birdcage` jail described by `policy`.
    pub(super) fn jailed(policy: JailPolicy, entry: &Path) -> Result<Self, String> {
        let mut command = JailCommand::new(entry);
        command
            .stdin(JailStdio::piped())
            .stdout(JailStdio::piped())
            .stderr(JailStdio::piped());
        Jail::new(policy)
            .spawn(command)
            .map(Self::Jailed)
            .map_err(|error| error.to_string())
    }

    /// Spawns `entry` as an ordinary host process.
    pub(super) fn host(entry: &Path) -> Result<Self, String> {
        Command::new(entry)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map(Self::Host)
            .map_err(|error| format!("{}: {error}", entry.display()))
    }

    pub(super) fn id(&self) -> u32 {
        match self {
            Self::Jailed(child) => child.id(),
            Self::Host(child) => child.id(),
        }
    }

    /// Takes ownership of the piped streams. Returns `None` when stdin or
    /// stdout was not captured.
    pub(super) fn take_pipes(&mut self) -> Option<Pipes> {
        match self {
            Self::Jailed(child) => Some(Pipes {
                stdin: Box::new(child.stdin.take()?),
                stdout: Box::new(child.stdout.take()?),
                stderr: child
                    .stderr
                    .take()
                    .map(|stream| Box::new(stream) as Box<dyn Read + Send>),
            }),
            Self::Host(child) => Some(Pipes {
                stdin: Box::new(child.stdin.take()?),
                stdout: Box::new(child.stdout.take()?),
                stderr: child
                    .stderr
                    .take()
                    .map(|stream| Box::new(stream) as Box<dyn Read + Send>),
            }),
        }
    }

    pub(super) fn try_wait(&mut self) -> io::Result<Option<ExitOutcome>> {
        match self {
            Self::Jailed(child) => child.try_wait().map(|status| {
                status.map(|exit| ExitOutcome {
                    success: exit.success(),
                    code: exit.code(),
                })
            }),
            Self::Host(child) => child.try_wait().map(|status| {
                status.map(|exit| ExitOutcome {
                    success: exit.success(),
                    code: exit.code(),
                })
            }),
        }
    }

    /// Kills the process and reaps it, ignoring failures from an already
    /// exited child.
    pub(super) fn terminate(&mut self) {
        match self {
            Self::Jailed(child) => {
                drop(child.kill());
                drop(child.wait());
            }
            Self::Host(child) => {
                drop(child.kill());
                drop(child.wait());
            }
        }
    }
}
