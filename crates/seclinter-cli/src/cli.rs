//! Command-line argument definitions.

use std::path::PathBuf;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use seclinter_plugins::Severity;

use crate::telemetry::{DEFAULT_LOG_FILTER, LogFormat};

/// Command-line interface for the SecLinter plugin host.
#[derive(Parser, Debug)]
#[command(name = "seclinter", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// The action to perform.
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Structured subcommands.
#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Runs every enabled plugin against a project and prints the report.
    Scan(ScanArgs),
}

/// Arguments of `seclinter scan`.
#[derive(Args, Debug, Clone)]
pub(crate) struct ScanArgs {
    /// Project directory to scan.
    #[arg(value_name = "PROJECT")]
    pub(crate) project: Utf8PathBuf,
    /// JSON manager configuration file.
    #[arg(long, value_name = "FILE")]
    pub(crate) config: Option<PathBuf>,
    /// Directory searched for plugin packages, overriding the configuration.
    #[arg(long, value_name = "DIR")]
    pub(crate) plugins_dir: Option<PathBuf>,
    /// Runs plugins concurrently.
    #[arg(long)]
    pub(crate) parallel: bool,
    /// Per-plugin scan timeout in milliseconds.
    #[arg(long, value_name = "MILLIS")]
    pub(crate) timeout_ms: Option<u64>,
    /// Only runs the named plugin; repeat to name several.
    #[arg(long = "plugin", value_name = "NAME")]
    pub(crate) plugins: Vec<String>,
    /// Skips the named plugin; repeat to name several.
    #[arg(long = "exclude", value_name = "NAME")]
    pub(crate) excluded: Vec<String>,
    /// Tracing filter expression written to stderr.
    #[arg(long, value_name = "FILTER", default_value = DEFAULT_LOG_FILTER)]
    pub(crate) log_filter: String,
    /// Log output format (`json` or `compact`).
    #[arg(long, value_name = "FORMAT", default_value_t = LogFormat::Json)]
    pub(crate) log_format: LogFormat,
    /// Exits with status 1 when any finding is at or above this level.
    #[arg(long, value_name = "SEVERITY")]
    pub(crate) fail_on: Option<Severity>,
}
