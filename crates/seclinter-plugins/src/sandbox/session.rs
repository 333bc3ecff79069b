//! Supervision of one request/response exchange with a plugin process.
//!
//! A reader thread forwards stdout lines over a channel so the supervisor can
//! wait with a deadline. Between lines the [`Watchdog`] is polled; a breach
//! kills the child. Stderr is drained on its own thread and logged. Both
//! helper threads are joined before the exchange returns.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use seclinter_sandbox::{LimitBreach, ResourceLimits, Watchdog};

use super::launch::{ChildProcess, Pipes};
use crate::capability::CapabilityFacade;
use crate::error::SandboxExecutionError;
use crate::protocol::{GuestMessage, HostReply, PluginRequest, PluginResponse};

/// Tracing target for plugin process supervision.
const SESSION_TARGET: &str = "seclinter_plugins::sandbox";

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long a helper thread may take to see end-of-file after the child is
/// gone. Grandchildren that inherited a pipe can hold it open indefinitely.
const HELPER_GRACE: Duration = Duration::from_millis(250);

type Line = io::Result<String>;

/// Sends `request` to `child` and serves it until the final response.
///
/// The child is always reaped before returning. On any failure it is killed
/// first.
pub(super) fn drive(
    plugin: &str,
    mut child: ChildProcess,
    facade: &CapabilityFacade,
    limits: ResourceLimits,
    request: &PluginRequest,
) -> Result<PluginResponse, SandboxExecutionError> {
    let Some(Pipes {
        stdin,
        stdout,
        stderr,
    }) = child.take_pipes()
    else {
        child.terminate();
        return Err(SandboxExecutionError::Launch {
            plugin: plugin.to_owned(),
            message: String::from("failed to capture plugin stdio"),
        });
    };

    let (sink, lines) = mpsc::channel();
    let reader = match spawn_helper(plugin, "stdout", move || forward_lines(stdout, &sink)) {
        Ok(handle) => handle,
        Err(error) => {
            child.terminate();
            return Err(error);
        }
    };
    let drain = stderr.and_then(|stream| {
        let label = plugin.to_owned();
        spawn_helper(plugin, "stderr", move || drain_stderr(&label, stream)).ok()
    });

    let mut session = Session {
        plugin,
        facade,
        watchdog: Watchdog::start(limits),
        child,
        stdin: Some(stdin),
        lines,
    };
    let outcome = session
        .exchange(request)
        .and_then(|response| session.await_exit().map(|()| response));
    if outcome.is_err() {
        session.child.terminate();
    }
    drop(session);

    join_helper(plugin, reader);
    if let Some(handle) = drain {
        join_helper(plugin, handle);
    }

    let response = outcome?;
    if response.is_success() {
        return Ok(response);
    }
    Err(SandboxExecutionError::Plugin {
        plugin: plugin.to_owned(),
        message: response
            .error()
            .unwrap_or("plugin reported a failure without a message")
            .to_owned(),
    })
}

struct Session<'a> {
    plugin: &'a str,
    facade: &'a CapabilityFacade,
    watchdog: Watchdog,
    child: ChildProcess,
    stdin: Option<Box<dyn Write + Send>>,
    lines: Receiver<Line>,
}

impl Session<'_> {
    fn exchange(&mut self, request: &PluginRequest) -> Result<PluginResponse, SandboxExecutionError> {
        debug!(
            target: SESSION_TARGET,
            plugin = self.plugin,
            operation = request.operation().name(),
            "writing request to plugin stdin"
        );
        match self.write_line(request) {
            Err(error) if error.kind() == io::ErrorKind::BrokenPipe => {
                // The child exited before reading; its exit status tells why.
                debug!(target: SESSION_TARGET, plugin = self.plugin, "plugin closed stdin early");
            }
            Err(error) => return Err(io_error(self.plugin, error)),
            Ok(()) => {}
        }

        loop {
            self.enforce_limits()?;
            match self.lines.recv_timeout(self.tick()) {
                Ok(Ok(line)) => {
                    if let Some(response) = self.handle_line(&line)? {
                        return Ok(response);
                    }
                }
                Ok(Err(error)) => return Err(io_error(self.plugin, error)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.await_exit()?;
                    return Err(protocol_error(
                        self.plugin,
                        "plugin closed stdout without a response",
                    ));
                }
            }
        }
    }

    fn handle_line(&mut self, line: &str) -> Result<Option<PluginResponse>, SandboxExecutionError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let message: GuestMessage = serde_json::from_str(trimmed).map_err(|error| {
            protocol_error(self.plugin, &format!("invalid message on stdout: {error}"))
        })?;

        match message {
            GuestMessage::Call { id, call } => {
                let outcome = self.facade.invoke(&call);
                if let Err(error) = &outcome {
                    debug!(
                        target: SESSION_TARGET,
                        plugin = self.plugin,
                        capability = call.name(),
                        %error,
                        "capability call refused"
                    );
                }
                let reply = HostReply::from_outcome(id, outcome);
                self.write_line(&reply)
                    .map_err(|error| io_error(self.plugin, error))?;
                Ok(None)
            }
            GuestMessage::Log { level, message } => {
                self.facade.logger().log(level, &message);
                Ok(None)
            }
            GuestMessage::Response(response) => Ok(Some(response)),
        }
    }

    /// Closes stdin and waits for the child to exit within its budget.
    fn await_exit(&mut self) -> Result<(), SandboxExecutionError> {
        self.stdin = None;
        loop {
            match self.child.try_wait() {
                Ok(Some(exit)) if exit.success => return Ok(()),
                Ok(Some(exit)) => {
                    return Err(SandboxExecutionError::NonZeroExit {
                        plugin: self.plugin.to_owned(),
                        status: exit.code.unwrap_or(-1),
                    });
                }
                Ok(None) => {
                    self.enforce_limits()?;
                    thread::sleep(self.tick());
                }
                Err(error) => return Err(io_error(self.plugin, error)),
            }
        }
    }

    fn enforce_limits(&self) -> Result<(), SandboxExecutionError> {
        let Some(breach) = self.watchdog.check(self.child.id()) else {
            return Ok(());
        };
        let elapsed_ms = u64::try_from(self.watchdog.elapsed().as_millis()).unwrap_or(u64::MAX);
        warn!(
            target: SESSION_TARGET,
            plugin = self.plugin,
            elapsed_ms,
            ?breach,
            "plugin exceeded its budget, killing process"
        );
        Err(match breach {
            LimitBreach::WallClock { limit } => SandboxExecutionError::Timeout {
                plugin: self.plugin.to_owned(),
                timeout: limit,
            },
            LimitBreach::Memory {
                limit_kib,
                observed_kib,
            } => SandboxExecutionError::MemoryExceeded {
                plugin: self.plugin.to_owned(),
                limit_kib,
                observed_kib,
            },
        })
    }

    fn tick(&self) -> Duration {
        POLL_INTERVAL.min(self.watchdog.remaining())
    }

    fn write_line<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        let mut line = serde_json::to_string(value).map_err(io::Error::other)?;
        line.push('\n');
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "plugin stdin is closed"))?;
        stdin.write_all(line.as_bytes())?;
        stdin.flush()
    }
}

fn spawn_helper<F>(
    plugin: &str,
    stream: &str,
    work: F,
) -> Result<JoinHandle<()>, SandboxExecutionError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{plugin}-{stream}"))
        .spawn(work)
        .map_err(|error| io_error(plugin, error))
}

fn join_helper(plugin: &str, handle: JoinHandle<()>) {
    let deadline = Instant::now() + HELPER_GRACE;
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    if handle.is_finished() {
        drop(handle.join());
    } else {
        warn!(
            target: SESSION_TARGET,
            plugin,
            thread = handle.thread().name().unwrap_or_default(),
            "plugin pipe still open after exit, detaching reader"
        );
    }
}

fn forward_lines(stdout: Box<dyn Read + Send>, sink: &Sender<Line>) {
    for line in BufReader::new(stdout).lines() {
        let failed = line.is_err();
        if sink.send(line).is_err() || failed {
            break;
        }
    }
}

fn drain_stderr(plugin: &str, stderr: Box<dyn Read + Send>) {
    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
        if !line.trim().is_empty() {
            debug!(target: SESSION_TARGET, plugin, stderr = %line.trim(), "plugin stderr output");
        }
    }
}

fn io_error(plugin: &str, error: io::Error) -> SandboxExecutionError {
    SandboxExecutionError::Io {
        plugin: plugin.to_owned(),
        source: Arc::new(error),
    }
}

fn protocol_error(plugin: &str, message: &str) -> SandboxExecutionError {
    SandboxExecutionError::Protocol {
        plugin: plugin.to_owned(),
        message: message.to_owned(),
    }
}
