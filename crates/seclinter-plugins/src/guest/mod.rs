//! Plugin-side runtime for the JSONL protocol.
//!
//! A plugin binary implements [`GuestPlugin`] and hands its stdio to
//! [`serve`], which reads the one request, dispatches it and writes the final
//! response. While a hook runs it reaches the host through [`GuestHost`]:
//! every helper writes a capability call and blocks on the matching reply.
//!
//! ```no_run
//! use std::io::{self, BufReader};
//!
//! use seclinter_plugins::guest::{GuestError, GuestHost, GuestPlugin, serve};
//! use seclinter_plugins::protocol::ScanPayload;
//! use seclinter_plugins::{PluginMeta, ScanResult};
//!
//! struct Quiet;
//!
//! impl GuestPlugin for Quiet {
//!     fn describe(&self) -> PluginMeta {
//!         PluginMeta::new("quiet", "0.1.0", "any")
//!     }
//!
//!     fn scan(
//!         &mut self,
//!         _payload: &ScanPayload,
//!         _host: &mut GuestHost<'_>,
//!     ) -> Result<Vec<ScanResult>, GuestError> {
//!         Ok(Vec::new())
//!     }
//! }
//!
//! let mut reader = BufReader::new(io::stdin().lock());
//! let mut writer = io::stdout().lock();
//! serve(&mut reader, &mut writer, &mut Quiet).expect("protocol failure");
//! ```


use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::finding::ScanResult;
use crate::manifest::PluginMeta;
use crate::protocol::{
    CapabilityCall, GuestMessage, HostReply, HttpOptions, HttpResponse, LogLevel, Operation,
    PluginOutput, PluginRequest, PluginResponse, ScanPayload,
};

/// Failures on the plugin side of the protocol.
#[derive(Debug, Error)]
pub enum GuestError {
    /// Reading from or writing to the host failed.
    #[error("host channel failed: {source}")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The host sent something the guest cannot understand.
    #[error("host broke the protocol: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },

    /// The host refused a capability call.
    #[error("capability call refused ({kind}): {message}")]
    Refused {
        /// Stable discriminator such as `permission_denied`.
        kind: String,
        /// Host-supplied message.
        message: String,
    },

    /// The plugin's own logic failed.
    #[error("{0}")]
    Plugin(String),
}

impl GuestError {
    /// Creates a plugin failure.
    #[must_use]
    pub fn plugin(message: impl Into<String>) -> Self {
        Self::Plugin(message.into())
    }

    /// Whether the host denied the call for lack of permission.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Refused { kind, .. } if kind == "permission_denied")
    }
}

impl From<io::Error> for GuestError {
    fn from(source: io::Error) -> Self {
        Self::Io {
            source: Arc::new(source),
        }
    }
}

/// An entry returned by [`GuestHost::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// File name.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// The plugin's handle on the host during one hook.
pub struct GuestHost<'a> {
    reader: &'a mut dyn BufRead,
    writer: &'a mut dyn Write,
    context: &'a BTreeMap<String, Value>,
    next_id: u64,
}

impl<'a> GuestHost<'a> {
    fn new(
        reader: &'a mut dyn BufRead,
        writer: &'a mut dyn Write,
        context: &'a BTreeMap<String, Value>,
    ) -> Self {
        Self {
            reader,
            writer,
            context,
            next_id: 1,
        }
    }

    /// Context values injected by the host.
    #[must_use]
    pub const fn context(&self) -> &BTreeMap<String, Value> {
        self.context
    }

    /// Sends a log line to the host.
    ///
    /// # Errors
    ///
    /// Returns [`GuestError::Io`] when the host channel is closed.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) -> Result<(), GuestError> {
        let line = GuestMessage::Log {
            level,
            message: message.into(),
        };
        write_line(&mut *self.writer, &line)
    }

    /// Performs a capability call and returns its JSON result.
    ///
    /// # Errors
    ///
    /// Returns [`GuestError::Refused`] when the host rejects the call and
    /// [`GuestError::Io`] or [`GuestError::Protocol`] when the exchange
    /// fails.
    pub fn call(&mut self, call: CapabilityCall) -> Result<Value, GuestError> {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        write_line(&mut *self.writer, &GuestMessage::Call { id, call })?;

        let line = read_line(&mut *self.reader)?.ok_or_else(|| GuestError::Protocol {
            message: String::from("host closed stdin before replying"),
        })?;
        let reply: HostReply = serde_json::from_str(&line).map_err(|error| GuestError::Protocol {
            message: format!("invalid reply: {error}"),
        })?;
        if reply.id() != id {
            return Err(GuestError::Protocol {
                message: format!("reply {} does not match call {id}", reply.id()),
            });
        }
        match reply {
            HostReply::Ok { value, .. } => Ok(value),
            HostReply::Error { error, .. } => Err(GuestError::Refused {
                kind: error.kind,
                message: error.message,
            }),
        }
    }

    /// Reads a UTF-8 file below the filesystem root.
    ///
    /// # Errors
    ///
    /// See [`GuestHost::call`].
    pub fn read_file(&mut self, path: impl Into<String>) -> Result<String, GuestError> {
        let value = self.call(CapabilityCall::ReadFile { path: path.into() })?;
        decode(value)
    }

    /// Writes a UTF-8 file below the filesystem root.
    ///
    /// # Errors
    ///
    /// See [`GuestHost::call`].
    pub fn write_file(
        &mut self,
        path: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), GuestError> {
        self.call(CapabilityCall::WriteFile {
            path: path.into(),
            content: content.into(),
        })
        .map(drop)
    }

    /// Checks whether a path exists below the filesystem root.
    ///
    /// # Errors
    ///
    /// See [`GuestHost::call`].
    pub fn exists(&mut self, path: impl Into<String>) -> Result<bool, GuestError> {
        let value = self.call(CapabilityCall::Exists { path: path.into() })?;
        decode(value)
    }

    /// Lists a directory below the filesystem root.
    ///
    /// # Errors
    ///
    /// See [`GuestHost::call`].
    pub fn read_dir(&mut self, path: impl Into<String>) -> Result<Vec<DirEntry>, GuestError> {
        let value = self.call(CapabilityCall::ReadDir { path: path.into() })?;
        decode(value)
    }

    /// Issues an HTTP GET through the host.
    ///
    /// # Errors
    ///
    /// See [`GuestHost::call`].
    pub fn http_get(&mut self, url: impl Into<String>) -> Result<HttpResponse, GuestError> {
        let value = self.call(CapabilityCall::HttpGet {
            url: url.into(),
            options: HttpOptions::default(),
        })?;
        decode(value)
    }

    /// Reads a host environment variable.
    ///
    /// # Errors
    ///
    /// See [`GuestHost::call`].
    pub fn env_var(&mut self, name: impl Into<String>) -> Result<Option<String>, GuestError> {
        let value = self.call(CapabilityCall::EnvVar { name: name.into() })?;
        decode(value)
    }

    /// Joins path segments with the host's path rules.
    ///
    /// # Errors
    ///
    /// See [`GuestHost::call`].
    pub fn path_join<I, S>(&mut self, segments: I) -> Result<String, GuestError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let value = self.call(CapabilityCall::PathJoin {
            segments: segments.into_iter().map(Into::into).collect(),
        })?;
        decode(value)
    }
}

/// A plugin implemented on the guest side of the protocol.
pub trait GuestPlugin {
    /// Metadata reported for `describe`.
    fn describe(&self) -> PluginMeta;

    /// Validates options before scans.
    ///
    /// # Errors
    ///
    /// Returns a [`GuestError`] to reject the configuration.
    fn init(&mut self, _options: &Value, _host: &mut GuestHost<'_>) -> Result<(), GuestError> {
        Ok(())
    }

    /// Scans a project.
    ///
    /// # Errors
    ///
    /// Returns a [`GuestError`] when the scan fails.
    fn scan(
        &mut self,
        payload: &ScanPayload,
        host: &mut GuestHost<'_>,
    ) -> Result<Vec<ScanResult>, GuestError>;

    /// Releases resources before unload.
    ///
    /// # Errors
    ///
    /// Returns a [`GuestError`]; the host logs it.
    fn cleanup(&mut self, _host: &mut GuestHost<'_>) -> Result<(), GuestError> {
        Ok(())
    }
}

/// Serves one request from `stdin`, writing the response to `stdout`.
///
/// Hook failures become failed responses. A request that cannot be read is
/// answered with a failed response before the error is returned.
///
/// # Errors
///
/// Returns [`GuestError::Protocol`] for an unreadable request and
/// [`GuestError::Io`] when the response cannot be written.
pub fn serve(
    stdin: &mut impl BufRead,
    stdout: &mut impl Write,
    plugin: &mut impl GuestPlugin,
) -> Result<(), GuestError> {
    let request = match read_request(stdin) {
        Ok(request) => request,
        Err(error) => {
            write_line(
                stdout,
                &GuestMessage::Response(PluginResponse::failure(error.to_string())),
            )?;
            return Err(error);
        }
    };

    let mut host = GuestHost::new(stdin, stdout, request.context());
    let response = match dispatch(plugin, request.operation(), &mut host) {
        Ok(output) => PluginResponse::success(output),
        Err(error) => PluginResponse::failure(error.to_string()),
    };
    write_line(&mut *host.writer, &GuestMessage::Response(response))
}

fn dispatch(
    plugin: &mut impl GuestPlugin,
    operation: &Operation,
    host: &mut GuestHost<'_>,
) -> Result<PluginOutput, GuestError> {
    match operation {
        Operation::Describe => Ok(PluginOutput::Meta {
            meta: plugin.describe(),
        }),
        Operation::Init { options } => plugin.init(options, host).map(|()| PluginOutput::Empty),
        Operation::Scan(payload) => plugin
            .scan(payload, host)
            .map(|results| PluginOutput::Findings { results }),
        Operation::Cleanup => plugin.cleanup(host).map(|()| PluginOutput::Empty),
    }
}

fn read_request(stdin: &mut impl BufRead) -> Result<PluginRequest, GuestError> {
    let line = read_line(stdin)?.ok_or_else(|| GuestError::Protocol {
        message: String::from("no request on stdin"),
    })?;
    serde_json::from_str(&line).map_err(|error| GuestError::Protocol {
        message: format!("invalid request: {error}"),
    })
}

/// Next non-blank line, or `None` at end of input.
fn read_line(reader: &mut (impl BufRead + ?Sized)) -> Result<Option<String>, GuestError> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            return Ok(Some(line));
        }
    }
}

fn write_line(writer: &mut (impl Write + ?Sized), message: &GuestMessage) -> Result<(), GuestError> {
    let payload = serde_json::to_string(message).map_err(|error| GuestError::Protocol {
        message: format!("cannot encode message: {error}"),
    })?;
    writer.write_all(payload.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, GuestError> {
    serde_json::from_value(value).map_err(|error| GuestError::Protocol {
        message: format!("unexpected capability result: {error}"),
    })
}
