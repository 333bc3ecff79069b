//! Findings produced by scan plugins.
//!
//! A [`ScanResult`] is immutable once built. Plugins construct them with
//! [`ScanResult::builder`]; the manager never edits a finding, it only counts
//! them.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Ordered severity of a finding, from `info` up to `critical`.
///
/// # Example
///
/// ```
/// use seclinter_plugins::Severity;
///
/// assert!(Severity::Critical > Severity::High);
/// assert_eq!("medium".parse::<Severity>().expect("known level"), Severity::Medium);
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Severity {
    /// Informational note.
    Info,
    /// Low impact.
    Low,
    /// Medium impact.
    Medium,
    /// High impact.
    High,
    /// Critical impact.
    Critical,
}

impl Severity {
    /// Every level, lowest first.
    pub const ALL: [Self; 5] = [
        Self::Info,
        Self::Low,
        Self::Medium,
        Self::High,
        Self::Critical,
    ];
}

/// One issue reported by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    rule_id: String,
    plugin: String,
    level: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file: Option<Utf8PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    column: Option<u32>,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fix: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, serde_json::Value>,
}

impl ScanResult {
    /// Starts building a finding with its mandatory fields.
    ///
    /// ```
    /// use seclinter_plugins::{ScanResult, Severity};
    ///
    /// let finding = ScanResult::builder("xss-eval", "xss-detector", Severity::High, "eval of input")
    ///     .file("src/app.js")
    ///     .line(12)
    ///     .build();
    /// assert_eq!(finding.line(), Some(12));
    /// ```
    #[must_use]
    pub fn builder(
        rule_id: impl Into<String>,
        plugin: impl Into<String>,
        level: Severity,
        message: impl Into<String>,
    ) -> ScanResultBuilder {
        ScanResultBuilder {
            result: Self {
                rule_id: rule_id.into(),
                plugin: plugin.into(),
                level,
                file: None,
                line: None,
                column: None,
                message: message.into(),
                suggestion: None,
                fix: None,
                metadata: BTreeMap::new(),
            },
        }
    }

    /// Identifier of the rule that fired.
    #[must_use]
    pub const fn rule_id(&self) -> &str {
        self.rule_id.as_str()
    }

    /// Name of the plugin that reported the finding.
    #[must_use]
    pub const fn plugin(&self) -> &str {
        self.plugin.as_str()
    }

    /// Severity of the finding.
    #[must_use]
    pub const fn level(&self) -> Severity {
        self.level
    }

    /// File the finding points at, relative to the project root.
    #[must_use]
    pub const fn file(&self) -> Option<&Utf8PathBuf> {
        self.file.as_ref()
    }

    /// One-based line number.
    #[must_use]
    pub const fn line(&self) -> Option<u32> {
        self.line
    }

    /// One-based column number.
    #[must_use]
    pub const fn column(&self) -> Option<u32> {
        self.column
    }

    /// Human-readable description.
    #[must_use]
    pub const fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Remediation advice.
    #[must_use]
    pub fn suggestion(&self) -> Option<&str> {
        self.suggestion.as_deref()
    }

    /// Replacement code, when the plugin offers one.
    #[must_use]
    pub fn fix(&self) -> Option<&str> {
        self.fix.as_deref()
    }

    /// Plugin-specific extra data.
    #[must_use]
    pub const fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }
}

/// Builder returned by [`ScanResult::builder`].
#[derive(Debug, Clone)]
pub struct ScanResultBuilder {
    result: ScanResult,
}

impl ScanResultBuilder {
    /// Sets the file path.
    #[must_use]
    pub fn file(mut self, file: impl Into<Utf8PathBuf>) -> Self {
        self.result.file = Some(file.into());
        self
    }

    /// Sets the line number.
    #[must_use]
    pub const fn line(mut self, line: u32) -> Self {
        self.result.line = Some(line);
        self
    }

    /// Sets the column number.
    #[must_use]
    pub const fn column(mut self, column: u32) -> Self {
        self.result.column = Some(column);
        self
    }

    /// Sets the remediation advice.
    #[must_use]
    pub fn suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.result.suggestion = Some(suggestion.into());
        self
    }

    /// Sets the replacement code.
    #[must_use]
    pub fn fix(mut self, fix: impl Into<String>) -> Self {
        self.result.fix = Some(fix.into());
        self
    }

    /// Adds one metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        let _ = self.result.metadata.insert(key.into(), value);
        self
    }

    /// Finishes the finding.
    #[must_use]
    pub fn build(self) -> ScanResult {
        self.result
    }
}
