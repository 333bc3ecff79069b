//! Scan orchestration: candidate selection, fan-out, deadlines and
//! settlement.
//!
//! Plugins are launched on the calling thread and their scan jobs run on
//! worker threads. Each outcome comes back over a channel and is awaited with
//! `recv_timeout`, so a plugin that never returns fails on its own deadline
//! without holding up the rest. Parallel scans launch every candidate before
//! any worker starts; serial scans settle one plugin before launching the
//! next.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::report::{ScanReport, Tally};
use super::{MANAGER_TARGET, PluginManager};
use crate::error::{PluginFault, ScanError};
use crate::events::{EventPayload, PluginEvent};
use crate::finding::ScanResult;
use crate::loader::PluginLoader;
use crate::plugin::{ScanJob, ScanPlugin, ScanRequest};

/// How long a finished scan's worker may take to wind down before it is
/// detached.
const WORKER_GRACE: Duration = Duration::from_millis(500);

/// Parameters of one scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanOptions {
    /// Project root handed to every plugin.
    pub project_path: Utf8PathBuf,
    /// Restrict the scan to these plugins when non-empty.
    pub target_plugins: Vec<String>,
    /// Plugins to leave out.
    pub exclude_plugins: Vec<String>,
    /// Run plugins concurrently.
    pub parallel: bool,
    /// Per-plugin timeout in milliseconds, overriding the manager default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Free-form options forwarded to plugins.
    #[serde(flatten)]
    pub options: BTreeMap<String, Value>,
}

impl ScanOptions {
    /// Creates options scanning `project_path` serially with defaults.
    #[must_use]
    pub fn new(project_path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            project_path: project_path.into(),
            ..Self::default()
        }
    }

    /// Restricts the scan to `plugins`.
    #[must_use]
    pub fn targeting<I, S>(mut self, plugins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_plugins = plugins.into_iter().map(Into::into).collect();
        self
    }

    /// Leaves `plugins` out of the scan.
    #[must_use]
    pub fn excluding<I, S>(mut self, plugins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_plugins = plugins.into_iter().map(Into::into).collect();
        self
    }

    /// Runs plugins concurrently.
    #[must_use]
    pub const fn in_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Overrides the per-plugin timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Adds a free-form option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    fn selects(&self, name: &str) -> bool {
        let targeted =
            self.target_plugins.is_empty() || self.target_plugins.iter().any(|target| target == name);
        targeted && !self.exclude_plugins.iter().any(|excluded| excluded == name)
    }
}

type Outcome = thread::Result<Result<Vec<ScanResult>, PluginFault>>;

/// One plugin's scan from launch to settlement.
struct Execution {
    index: usize,
    name: String,
    started: Instant,
    state: ExecutionState,
}

/// A finished (or abandoned) execution awaiting bookkeeping.
struct Settled {
    index: usize,
    name: String,
    outcome: Result<Vec<ScanResult>, ScanError>,
    elapsed: Duration,
}

enum ExecutionState {
    Ready(ScanJob),
    Running {
        outcome: Receiver<Outcome>,
        worker: JoinHandle<()>,
    },
    Failed(ScanError),
}

impl<L: PluginLoader> PluginManager<L> {
    /// Runs every selected, enabled plugin against the project.
    ///
    /// A plugin that fails or exceeds its timeout is listed in
    /// `failedPlugins` and counted towards its health; the scan itself never
    /// fails.
    pub fn scan(&mut self, options: &ScanOptions) -> ScanReport {
        let started = Instant::now();
        let timeout = options
            .timeout
            .map_or_else(|| self.config.call_timeout(), Duration::from_millis);
        let candidates: Vec<usize> = self
            .packages
            .iter()
            .enumerate()
            .filter(|(_, package)| package.config.enabled && options.selects(&package.name))
            .map(|(index, _)| index)
            .collect();

        info!(
            target: MANAGER_TARGET,
            plugins = candidates.len(),
            parallel = options.parallel,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            project = %options.project_path,
            "starting scan"
        );

        let mut tally = Tally::new();
        if options.parallel {
            let launched: Vec<Execution> = candidates
                .iter()
                .map(|&index| self.launch(index, options, timeout))
                .collect();
            let running: Vec<Execution> = launched.into_iter().map(start).collect();
            let mut workers = Vec::with_capacity(running.len());
            for execution in running {
                let (settled, worker) = wait(execution, timeout);
                self.settle(settled, &mut tally);
                workers.extend(worker);
            }
            retire(workers);
        } else {
            for &index in &candidates {
                let (settled, worker) = wait(start(self.launch(index, options, timeout)), timeout);
                self.settle(settled, &mut tally);
                retire(worker);
            }
        }

        let report = tally.finish(candidates.len(), started.elapsed());
        info!(
            target: MANAGER_TARGET,
            issues = report.stats.issues_found,
            failed = report.stats.failed_plugins.len(),
            elapsed_ms = report.stats.scan_time,
            "scan finished"
        );
        report
    }

    fn launch(&self, index: usize, options: &ScanOptions, timeout: Duration) -> Execution {
        let started = Instant::now();
        let Some(package) = self.packages.get(index) else {
            return Execution {
                index,
                name: String::new(),
                started,
                state: ExecutionState::Failed(ScanError::Launch {
                    plugin: String::new(),
                    message: String::from("plugin vanished from the registry"),
                }),
            };
        };
        let name = package.name.clone();
        self.events
            .emit(&PluginEvent::now(name.as_str(), EventPayload::ScanStarted));

        let request = ScanRequest::new(options.project_path.clone(), timeout)
            .with_options(options.options.clone())
            .with_config(package.config.options_value());
        let plugin: Arc<dyn ScanPlugin> = Arc::clone(&package.plugin);
        let state = match panic::catch_unwind(AssertUnwindSafe(|| plugin.launch(request))) {
            Ok(Ok(job)) => ExecutionState::Ready(job),
            Ok(Err(fault)) => ExecutionState::Failed(ScanError::from_fault(&name, fault)),
            Err(_) => ExecutionState::Failed(ScanError::Panicked {
                plugin: name.clone(),
            }),
        };
        Execution {
            index,
            name,
            started,
            state,
        }
    }

    fn settle(&mut self, settled: Settled, tally: &mut Tally) {
        let Settled {
            index,
            name,
            outcome,
            elapsed,
        } = settled;
        match outcome {
            Ok(findings) => {
                let count = findings.len();
                debug!(
                    target: MANAGER_TARGET,
                    plugin = name.as_str(),
                    count,
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "plugin scan completed"
                );
                tally.succeed(&name, findings);
                if let Some(package) = self.packages.get_mut(index) {
                    package.status.record_success(elapsed);
                }
                self.events.emit(&PluginEvent::now(
                    name.as_str(),
                    EventPayload::ScanCompleted { count },
                ));
            }
            Err(failure) => {
                tally.fail(&name);
                self.events.emit(&PluginEvent::now(
                    name.as_str(),
                    EventPayload::ScanError {
                        message: failure.to_string(),
                    },
                ));
                self.handle_plugin_error(index, &failure);
            }
        }
    }

    /// Counts a failure against the plugin and marks it unhealthy once the
    /// error threshold is reached.
    fn handle_plugin_error(&mut self, index: usize, failure: &ScanError) {
        let threshold = self.config.error_threshold;
        let Some(package) = self.packages.get_mut(index) else {
            return;
        };
        let message = failure.to_string();
        let crossed = package.status.record_failure(message.clone(), threshold);
        error!(
            target: MANAGER_TARGET,
            plugin = package.name.as_str(),
            error_count = package.status.error_count(),
            error = %message,
            "plugin failed"
        );
        if let Some(error_count) = crossed {
            warn!(
                target: MANAGER_TARGET,
                plugin = package.name.as_str(),
                error_count,
                "plugin marked unhealthy after repeated failures"
            );
            self.events.emit(&PluginEvent::now(
                package.name.as_str(),
                EventPayload::Error {
                    message,
                    error_count,
                },
            ));
        }
    }
}

/// Moves a launched job onto its worker thread.
fn start(execution: Execution) -> Execution {
    let Execution {
        index,
        name,
        started,
        state,
    } = execution;
    let ExecutionState::Ready(job) = state else {
        return Execution {
            index,
            name,
            started,
            state,
        };
    };

    let (sender, outcome) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name(format!("scan-{name}"))
        .spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(job));
            drop(sender.send(result));
        });
    let running = match spawned {
        Ok(worker) => ExecutionState::Running { outcome, worker },
        Err(spawn_error) => ExecutionState::Failed(ScanError::Launch {
            plugin: name.clone(),
            message: spawn_error.to_string(),
        }),
    };
    Execution {
        index,
        name,
        started,
        state: running,
    }
}

/// A scan worker thread that may outlive its plugin's deadline.
struct Worker {
    plugin: String,
    handle: JoinHandle<()>,
}

/// Awaits a running execution until its deadline.
///
/// The worker is handed back rather than joined so that a parallel scan can
/// retire all of them against one shared grace period.
fn wait(execution: Execution, timeout: Duration) -> (Settled, Option<Worker>) {
    let Execution {
        index,
        name,
        started,
        state,
    } = execution;
    let (outcome, worker) = match state {
        ExecutionState::Failed(failure) => (Err(failure), None),
        ExecutionState::Ready(_) => (
            Err(ScanError::Launch {
                plugin: name.clone(),
                message: String::from("scan job was never started"),
            }),
            None,
        ),
        ExecutionState::Running { outcome, worker } => {
            let remaining = timeout.saturating_sub(started.elapsed());
            let settled = match outcome.recv_timeout(remaining) {
                Ok(Ok(Ok(findings))) => Ok(findings),
                Ok(Ok(Err(fault))) => Err(ScanError::from_fault(&name, fault)),
                Ok(Err(_)) | Err(RecvTimeoutError::Disconnected) => Err(ScanError::Panicked {
                    plugin: name.clone(),
                }),
                Err(RecvTimeoutError::Timeout) => Err(ScanError::Timeout {
                    plugin: name.clone(),
                    timeout,
                }),
            };
            let worker = Worker {
                plugin: name.clone(),
                handle: worker,
            };
            (settled, Some(worker))
        }
    };
    let settled = Settled {
        index,
        name,
        outcome,
        elapsed: started.elapsed(),
    };
    (settled, worker)
}

/// Joins workers that have finished or are about to, and detaches those
/// still stuck in an in-process plugin.
///
/// Every worker shares a single [`WORKER_GRACE`] deadline.
fn retire(workers: impl IntoIterator<Item = Worker>) {
    let mut pending: Vec<Worker> = workers.into_iter().collect();
    let deadline = Instant::now() + WORKER_GRACE;
    loop {
        let (finished, running): (Vec<Worker>, Vec<Worker>) = pending
            .into_iter()
            .partition(|worker| worker.handle.is_finished());
        for worker in finished {
            drop(worker.handle.join());
        }
        pending = running;
        if pending.is_empty() || Instant::now() >= deadline {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    for worker in pending {
        warn!(
            target: MANAGER_TARGET,
            plugin = worker.plugin.as_str(),
            "plugin worker still running after its deadline, detaching"
        );
    }
}
