//! JSONL protocol spoken between the host and a plugin process.
//!
//! The host writes one [`PluginRequest`] line to the plugin's stdin. The
//! plugin may then write any number of [`GuestMessage::Call`] and
//! [`GuestMessage::Log`] lines and finishes with exactly one
//! [`GuestMessage::Response`]. Each call is answered on stdin with one
//! [`HostReply`] line carrying the same `id`. Stderr is not part of the
//! protocol and is only logged.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CapabilityError;
use crate::finding::ScanResult;
use crate::manifest::PluginMeta;

/// Request sent from the host to a plugin on stdin.
///
/// # Example
///
/// ```
/// use seclinter_plugins::protocol::{Operation, PluginRequest};
///
/// let request = PluginRequest::new(Operation::Describe);
/// let line = serde_json::to_string(&request).expect("serialise");
/// assert_eq!(line, r#"{"operation":"describe"}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRequest {
    #[serde(flatten)]
    operation: Operation,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    context: BTreeMap<String, Value>,
}

impl PluginRequest {
    /// Creates a request without injected context.
    #[must_use]
    pub const fn new(operation: Operation) -> Self {
        Self {
            operation,
            context: BTreeMap::new(),
        }
    }

    /// Attaches context values injected by the host.
    #[must_use]
    pub fn with_context(mut self, context: BTreeMap<String, Value>) -> Self {
        self.context = context;
        self
    }

    /// Returns the requested operation.
    #[must_use]
    pub const fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Returns the injected context values.
    #[must_use]
    pub const fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }
}

/// Lifecycle hook the host asks the plugin to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    /// Report the plugin's metadata.
    Describe,
    /// Validate configuration and prepare for scanning.
    Init {
        /// Plugin-specific options.
        #[serde(default)]
        options: Value,
    },
    /// Scan a project.
    Scan(ScanPayload),
    /// Release resources before unload.
    Cleanup,
}

impl Operation {
    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Describe => "describe",
            Self::Init { .. } => "init",
            Self::Scan(_) => "scan",
            Self::Cleanup => "cleanup",
        }
    }
}

/// Arguments of a scan operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanPayload {
    /// Project root to scan.
    pub project_path: Utf8PathBuf,
    /// Free-form scan options from the request.
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
    /// Plugin-specific configuration.
    #[serde(default)]
    pub config: Value,
}

/// A line written by the plugin on stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuestMessage {
    /// A capability call awaiting a [`HostReply`].
    Call {
        /// Correlation identifier echoed in the reply.
        id: u64,
        /// The requested capability.
        call: CapabilityCall,
    },
    /// A log line to re-emit on the host.
    Log {
        /// Log level.
        level: LogLevel,
        /// Message text.
        message: String,
    },
    /// The final response; no further lines are read.
    Response(PluginResponse),
}

/// Level of a plugin log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug detail.
    Debug,
    /// Informational.
    Info,
    /// Warning.
    Warn,
    /// Error.
    Error,
}

/// Options accepted by the HTTP capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpOptions {
    /// Extra request headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Response returned by the HTTP capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Response body decoded as text.
    pub body: String,
}

/// A capability requested by the plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "capability", rename_all = "snake_case")]
pub enum CapabilityCall {
    /// Read a UTF-8 file.
    ReadFile {
        /// Path relative to the filesystem root.
        path: String,
    },
    /// Write a UTF-8 file.
    WriteFile {
        /// Path relative to the filesystem root.
        path: String,
        /// New file content.
        content: String,
    },
    /// Check whether a path exists.
    Exists {
        /// Path relative to the filesystem root.
        path: String,
    },
    /// List a directory.
    ReadDir {
        /// Path relative to the filesystem root.
        path: String,
    },
    /// Issue an HTTP GET.
    HttpGet {
        /// Target URL.
        url: String,
        /// Request options.
        #[serde(default)]
        options: HttpOptions,
    },
    /// Issue an HTTP POST with a JSON body.
    HttpPost {
        /// Target URL.
        url: String,
        /// JSON body.
        #[serde(default)]
        body: Value,
        /// Request options.
        #[serde(default)]
        options: HttpOptions,
    },
    /// Read a host environment variable.
    EnvVar {
        /// Variable name.
        name: String,
    },
    /// Join path segments.
    PathJoin {
        /// Segments to join.
        segments: Vec<String>,
    },
    /// Resolve path segments against the working directory.
    PathResolve {
        /// Segments to resolve.
        segments: Vec<String>,
    },
    /// Parent directory of a path.
    PathDirname {
        /// Input path.
        path: String,
    },
    /// Final component of a path.
    PathBasename {
        /// Input path.
        path: String,
    },
    /// Check that a host module may be used.
    Require {
        /// Module name.
        module: String,
    },
    /// Invoke a host module method.
    CallModule {
        /// Module name.
        module: String,
        /// Method name.
        method: String,
        /// Method arguments.
        #[serde(default)]
        args: Value,
    },
}

impl CapabilityCall {
    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ReadFile { .. } => "read_file",
            Self::WriteFile { .. } => "write_file",
            Self::Exists { .. } => "exists",
            Self::ReadDir { .. } => "read_dir",
            Self::HttpGet { .. } => "http_get",
            Self::HttpPost { .. } => "http_post",
            Self::EnvVar { .. } => "env_var",
            Self::PathJoin { .. } => "path_join",
            Self::PathResolve { .. } => "path_resolve",
            Self::PathDirname { .. } => "path_dirname",
            Self::PathBasename { .. } => "path_basename",
            Self::Require { .. } => "require",
            Self::CallModule { .. } => "call_module",
        }
    }
}

/// The host's answer to a [`GuestMessage::Call`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HostReply {
    /// The call succeeded.
    Ok {
        /// Correlation identifier.
        id: u64,
        /// Result value.
        value: Value,
    },
    /// The call failed.
    Error {
        /// Correlation identifier.
        id: u64,
        /// Failure description.
        error: WireError,
    },
}

impl HostReply {
    /// Builds the reply for `id` from a capability outcome.
    #[must_use]
    pub fn from_outcome(id: u64, outcome: Result<Value, CapabilityError>) -> Self {
        match outcome {
            Ok(value) => Self::Ok { id, value },
            Err(error) => Self::Error {
                id,
                error: WireError::from(&error),
            },
        }
    }

    /// Correlation identifier of the reply.
    #[must_use]
    pub const fn id(&self) -> u64 {
        match self {
            Self::Ok { id, .. } | Self::Error { id, .. } => *id,
        }
    }
}

/// Serialisable description of a failed capability call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Stable discriminator such as `permission_denied`.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl From<&CapabilityError> for WireError {
    fn from(error: &CapabilityError) -> Self {
        Self {
            kind: error.kind().to_owned(),
            message: error.to_string(),
        }
    }
}

/// Final response written by the plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginResponse {
    success: bool,
    #[serde(default)]
    output: PluginOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl PluginResponse {
    /// Creates a successful response.
    #[must_use]
    pub const fn success(output: PluginOutput) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    /// Creates a failed response.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: PluginOutput::Empty,
            error: Some(message.into()),
        }
    }

    /// Returns whether the plugin completed successfully.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.success
    }

    /// Returns the output payload.
    #[must_use]
    pub const fn output(&self) -> &PluginOutput {
        &self.output
    }

    /// Consumes the response, returning the output payload.
    #[must_use]
    pub fn into_output(self) -> PluginOutput {
        self.output
    }

    /// Returns the failure message, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Output payload of a response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PluginOutput {
    /// Metadata returned by `describe`.
    Meta {
        /// Plugin metadata.
        meta: PluginMeta,
    },
    /// Findings returned by `scan`.
    Findings {
        /// Reported findings.
        results: Vec<ScanResult>,
    },
    /// Nothing to report.
    #[default]
    Empty,
}
