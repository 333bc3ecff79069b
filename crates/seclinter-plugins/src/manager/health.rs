//! Per-plugin health bookkeeping.

use std::time::Duration;

use serde::{Serialize, Serializer};

/// Health and timing of one loaded plugin.
///
/// A plugin turns unhealthy when its consecutive error count reaches the
/// configured threshold. A later success clears the count but leaves the
/// plugin unhealthy until [`PluginManager::reset_health`] is called.
///
/// [`PluginManager::reset_health`]: crate::PluginManager::reset_health
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginStatus {
    name: String,
    healthy: bool,
    error_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    #[serde(serialize_with = "optional_millis", skip_serializing_if = "Option::is_none")]
    last_execution_time: Option<Duration>,
    #[serde(serialize_with = "optional_millis", skip_serializing_if = "Option::is_none")]
    average_execution_time: Option<Duration>,
    executions: u32,
    #[serde(skip)]
    total_execution_time: Duration,
}

impl PluginStatus {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: true,
            error_count: 0,
            last_error: None,
            last_execution_time: None,
            average_execution_time: None,
            executions: 0,
            total_execution_time: Duration::ZERO,
        }
    }

    /// Plugin name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Whether the plugin is considered healthy.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Consecutive errors since the last success.
    #[must_use]
    pub const fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Most recent failure message.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Duration of the most recent successful scan.
    #[must_use]
    pub const fn last_execution_time(&self) -> Option<Duration> {
        self.last_execution_time
    }

    /// Mean duration of successful scans.
    #[must_use]
    pub const fn average_execution_time(&self) -> Option<Duration> {
        self.average_execution_time
    }

    /// Number of timed successful scans.
    #[must_use]
    pub const fn executions(&self) -> u32 {
        self.executions
    }

    pub(crate) fn record_success(&mut self, elapsed: Duration) {
        self.error_count = 0;
        self.last_execution_time = Some(elapsed);
        self.executions = self.executions.saturating_add(1);
        self.total_execution_time = self.total_execution_time.saturating_add(elapsed);
        self.average_execution_time = self.total_execution_time.checked_div(self.executions);
    }

    /// Records a failure. Returns the error count when this failure turned a
    /// healthy plugin unhealthy.
    pub(crate) fn record_failure(&mut self, message: String, threshold: u32) -> Option<u32> {
        self.error_count = self.error_count.saturating_add(1);
        self.last_error = Some(message);
        if self.healthy && self.error_count >= threshold {
            self.healthy = false;
            return Some(self.error_count);
        }
        None
    }

    pub(crate) fn reset(&mut self) {
        self.healthy = true;
        self.error_count = 0;
    }
}

#[expect(clippy::ref_option, reason = "serde passes fields by reference")]
fn optional_millis<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    value
        .map(|duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
        .serialize(serializer)
}
