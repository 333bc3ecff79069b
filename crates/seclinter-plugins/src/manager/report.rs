//! Aggregated scan results.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::finding::{ScanResult, Severity};

/// Counters describing one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    /// Plugins selected for the scan, whether or not they succeeded.
    pub plugins_scanned: usize,
    /// Findings reported by successful plugins.
    pub issues_found: usize,
    /// Findings per severity; every level is present.
    pub by_level: BTreeMap<Severity, usize>,
    /// Findings per successful plugin.
    pub by_plugin: BTreeMap<String, usize>,
    /// Wall-clock duration of the scan in milliseconds.
    pub scan_time: u64,
    /// Plugins that failed, in selection order.
    pub failed_plugins: Vec<String>,
}

/// The result of [`PluginManager::scan`](crate::PluginManager::scan).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Findings from every successful plugin.
    pub results: Vec<ScanResult>,
    /// Aggregate counters.
    pub stats: ScanStats,
    /// When the report was produced.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ScanReport {
    /// Highest severity among the findings.
    #[must_use]
    pub fn max_severity(&self) -> Option<Severity> {
        self.results.iter().map(ScanResult::level).max()
    }

    /// Whether any finding is at or above `threshold`.
    #[must_use]
    pub fn has_findings_at_or_above(&self, threshold: Severity) -> bool {
        self.results.iter().any(|finding| finding.level() >= threshold)
    }
}

/// Accumulates outcomes while a scan runs.
#[derive(Debug)]
pub(crate) struct Tally {
    results: Vec<ScanResult>,
    by_level: BTreeMap<Severity, usize>,
    by_plugin: BTreeMap<String, usize>,
    failed_plugins: Vec<String>,
}

impl Tally {
    pub(crate) fn new() -> Self {
        Self {
            results: Vec::new(),
            by_level: Severity::ALL.into_iter().map(|level| (level, 0)).collect(),
            by_plugin: BTreeMap::new(),
            failed_plugins: Vec::new(),
        }
    }

    pub(crate) fn succeed(&mut self, plugin: &str, findings: Vec<ScanResult>) {
        for finding in &findings {
            *self.by_level.entry(finding.level()).or_insert(0) += 1;
        }
        *self.by_plugin.entry(plugin.to_owned()).or_insert(0) += findings.len();
        self.results.extend(findings);
    }

    pub(crate) fn fail(&mut self, plugin: &str) {
        self.failed_plugins.push(plugin.to_owned());
    }

    pub(crate) fn finish(self, plugins_scanned: usize, elapsed: Duration) -> ScanReport {
        ScanReport {
            stats: ScanStats {
                plugins_scanned,
                issues_found: self.results.len(),
                by_level: self.by_level,
                by_plugin: self.by_plugin,
                scan_time: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                failed_plugins: self.failed_plugins,
            },
            results: self.results,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}
