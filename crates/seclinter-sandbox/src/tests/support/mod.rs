//! Shared state for the jail behaviour scenarios.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::JailError;
use crate::jail::{Jail, JailCommand};
use crate::limits::{LimitBreach, ResourceLimits, Watchdog};
use crate::policy::JailPolicy;

pub struct TestWorld {
    pub policy: JailPolicy,
    pub command: Option<JailCommand>,
    pub spawn_error: Option<JailError>,
    pub watchdog: Option<Watchdog>,
    pub breach: Option<LimitBreach>,
    pub entry: PathBuf,
    pub scratch: TempDir,
}

impl TestWorld {
    pub fn new() -> Self {
        let scratch = TempDir::new().expect("scratch directory");
        let entry = scratch.path().join("seclinter-plugin-demo");
        fs::write(&entry, "#!/bin/sh\nexit 0\n").expect("write plugin entry");
        Self {
            policy: JailPolicy::new(),
            command: None,
            spawn_error: None,
            watchdog: None,
            breach: None,
            entry,
            scratch,
        }
    }

    pub fn run(&mut self, program: &Path) {
        self.command = Some(JailCommand::new(program));
    }

    pub fn grant(&mut self, update: impl FnOnce(JailPolicy) -> JailPolicy) {
        let policy = std::mem::take(&mut self.policy);
        self.policy = update(policy);
    }

    pub fn absent_dir(&self) -> PathBuf {
        self.scratch.path().join("absent")
    }

    pub fn spawn(&mut self) {
        let command = self.command.take().expect("command configured");
        match Jail::new(self.policy.clone()).spawn(command) {
            Ok(mut child) => {
                drop(child.kill());
                drop(child.wait());
            }
            Err(error) => self.spawn_error = Some(error),
        }
    }

    pub fn watch(&mut self, limits: ResourceLimits) {
        self.watchdog = Some(Watchdog::start(limits));
    }

    pub fn check_self(&mut self) {
        let watchdog = self.watchdog.as_ref().expect("watchdog started");
        self.breach = watchdog.check(std::process::id());
    }
}
