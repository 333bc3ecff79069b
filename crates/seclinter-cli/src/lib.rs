//! Command-line host for the SecLinter plugin engine.
//!
//! `seclinter scan <project>` discovers plugin packages, runs every enabled
//! plugin against the project and prints the aggregated report as JSON on
//! stdout. Logs go to stderr. The exit status is 0 for a clean run, 1 when a
//! finding reaches the `--fail-on` level, 2 for configuration or usage errors
//! and 3 when the report cannot be written.

mod cli;
mod errors;
pub mod telemetry;

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use seclinter_plugins::{ManagerConfig, PluginManager, ScanOptions, ScanReport, Severity};
use tracing::{debug, info, warn};

use crate::cli::{Cli, CliCommand, ScanArgs};
use crate::errors::AppError;

const CLI_TARGET: &str = "seclinter_cli";

const EXIT_FINDINGS: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_RUNTIME: u8 = 3;

/// How a completed scan maps onto the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Clean,
    Failing { threshold: Severity },
}

impl Verdict {
    fn of(report: &ScanReport, fail_on: Option<Severity>) -> Self {
        fail_on
            .filter(|threshold| report.has_findings_at_or_above(*threshold))
            .map_or(Self::Clean, |threshold| Self::Failing { threshold })
    }

    fn exit_code(self) -> ExitCode {
        match self {
            Self::Clean => ExitCode::SUCCESS,
            Self::Failing { .. } => ExitCode::from(EXIT_FINDINGS),
        }
    }
}

/// Runs the CLI with `args`, writing the report to `stdout` and diagnostics
/// to `stderr`.
///
/// Help and version output follow clap's conventions: they go to `stdout`
/// and exit successfully.
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => return report_usage(&error, stdout, stderr),
    };

    let result = match cli.command {
        CliCommand::Scan(scan_args) => scan(&scan_args, stdout),
    };
    match result {
        Ok(verdict) => verdict.exit_code(),
        Err(error) => {
            writeln!(stderr, "seclinter: {error}").ok();
            ExitCode::from(error.exit_status())
        }
    }
}

fn report_usage(error: &clap::Error, stdout: &mut impl Write, stderr: &mut impl Write) -> ExitCode {
    let rendered = error.render();
    if error.use_stderr() {
        write!(stderr, "{rendered}").ok();
    } else {
        write!(stdout, "{rendered}").ok();
    }
    ExitCode::from(u8::try_from(error.exit_code()).unwrap_or(EXIT_CONFIG))
}

fn scan(args: &ScanArgs, stdout: &mut impl Write) -> Result<Verdict, AppError> {
    telemetry::initialise(&args.log_filter, args.log_format).map_err(AppError::Telemetry)?;

    let project = project_root(args)?;
    let config = load_config(args, &project)?;
    let options = scan_options(args, project);

    let mut manager = PluginManager::new(config);
    let discovery = manager.init();
    debug!(
        target: CLI_TARGET,
        loaded = discovery.loaded().len(),
        failed = discovery.failures().len(),
        "plugin discovery finished"
    );

    let report = manager.scan(&options);
    let names: Vec<String> = manager
        .plugins()
        .iter()
        .map(|package| package.name().to_owned())
        .collect();
    let unloaded = names
        .iter()
        .filter(|name| manager.unload_plugin(name))
        .count();
    debug!(target: CLI_TARGET, unloaded, "plugins unloaded");

    write_report(stdout, &report)?;

    let verdict = Verdict::of(&report, args.fail_on);
    if let Verdict::Failing { threshold } = verdict {
        warn!(
            target: CLI_TARGET,
            %threshold,
            issues = report.stats.issues_found,
            "findings at or above the failure threshold"
        );
    } else {
        info!(
            target: CLI_TARGET,
            issues = report.stats.issues_found,
            plugins = report.stats.plugins_scanned,
            "scan finished"
        );
    }
    Ok(verdict)
}

fn project_root(args: &ScanArgs) -> Result<Utf8PathBuf, AppError> {
    let root = args
        .project
        .canonicalize_utf8()
        .map_err(|source| AppError::Project {
            path: args.project.clone(),
            source,
        })?;
    if !root.is_dir() {
        return Err(AppError::NotADirectory(root));
    }
    Ok(root)
}

/// Configuration from `--config` or defaults, with command-line overrides.
///
/// The filesystem root defaults to the project so plugins can read it.
fn load_config(args: &ScanArgs, project: &Utf8Path) -> Result<ManagerConfig, AppError> {
    let mut config = args
        .config
        .as_deref()
        .map_or_else(|| Ok(ManagerConfig::default()), ManagerConfig::from_path)
        .map_err(AppError::Config)?;
    if let Some(dir) = &args.plugins_dir {
        config.plugins_dir.clone_from(dir);
    }
    if config.fs_root.is_none() {
        config.fs_root = Some(project.to_path_buf());
    }
    Ok(config)
}

fn scan_options(args: &ScanArgs, project: Utf8PathBuf) -> ScanOptions {
    let mut options = ScanOptions::new(project)
        .targeting(args.plugins.iter().cloned())
        .excluding(args.excluded.iter().cloned())
        .in_parallel(args.parallel);
    options.timeout = args.timeout_ms;
    options
}

fn write_report(stdout: &mut impl Write, report: &ScanReport) -> Result<(), AppError> {
    serde_json::to_writer_pretty(&mut *stdout, report).map_err(AppError::SerialiseReport)?;
    writeln!(stdout).map_err(AppError::WriteReport)?;
    stdout.flush().map_err(AppError::WriteReport)
}
