//! Structured telemetry initialisation for the CLI.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Filter applied when `--log-filter` is not given.
pub const DEFAULT_LOG_FILTER: &str = "info";

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    #[default]
    Json,
    /// Human-readable single line output.
    Compact,
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global subscriber on the first call.
///
/// The filter is validated on every call. Later calls otherwise return `Ok`
/// without touching the global state, so the filter and format of the first
/// call win.
///
/// ```
/// use seclinter_cli::telemetry::{self, LogFormat};
///
/// telemetry::initialise("warn", LogFormat::Compact).expect("valid filter");
/// telemetry::initialise("debug", LogFormat::Json).expect("already installed");
/// ```
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for an unparsable filter and
/// [`TelemetryError::Subscriber`] when another subscriber is already
/// installed globally.
pub fn initialise(filter: &str, format: LogFormat) -> Result<(), TelemetryError> {
    let env_filter = parse_filter(filter)?;
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(env_filter, format))
        .map(|_| ())
}

/// Validates a filter expression without installing anything.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] when the expression does not parse.
pub fn parse_filter(filter: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(filter).map_err(|error| TelemetryError::Filter(error.to_string()))
}

fn install_subscriber(env_filter: EnvFilter, format: LogFormat) -> Result<(), TelemetryError> {
    let builder = |layer_filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(layer_filter)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            // stdout carries the report.
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match format {
        LogFormat::Json => Box::new(builder(env_filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(env_filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
