//! CLI entrypoint for the SecLinter plugin host.
//!
//! The binary delegates to [`seclinter_cli::run`], which parses arguments,
//! installs telemetry, runs the scan and maps the outcome to an exit code.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    seclinter_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
