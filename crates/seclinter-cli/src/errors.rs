//! Error types for the CLI runtime.

use std::io;

use camino::Utf8PathBuf;
use seclinter_plugins::PluginError;
use thiserror::Error;

use crate::telemetry::TelemetryError;
use crate::{EXIT_CONFIG, EXIT_RUNTIME};

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[source] TelemetryError),
    #[error("failed to load configuration: {0}")]
    Config(#[source] PluginError),
    #[error("cannot open project {path}: {source}")]
    Project {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("project {0} is not a directory")]
    NotADirectory(Utf8PathBuf),
    #[error("failed to serialise scan report: {0}")]
    SerialiseReport(#[source] serde_json::Error),
    #[error("failed to write scan report: {0}")]
    WriteReport(#[source] io::Error),
}

impl AppError {
    /// Process exit status for the error.
    pub(crate) const fn exit_status(&self) -> u8 {
        match self {
            Self::Telemetry(_) | Self::Config(_) | Self::Project { .. } | Self::NotADirectory(_) => {
                EXIT_CONFIG
            }
            Self::SerialiseReport(_) | Self::WriteReport(_) => EXIT_RUNTIME,
        }
    }
}
