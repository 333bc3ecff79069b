//! Guest plugin that flags cross-site scripting patterns.
//!
//! The plugin walks the project through the host's filesystem capability,
//! so it needs nothing beyond `fs:read`. Script files are checked for
//! dangerous sinks, raised to high severity when the same line touches a
//! browser-controlled source; markup files are checked for inline script,
//! inline event handlers, and forms that allow autocomplete.

mod rules;
#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::io::{BufRead, Write};

use camino::{Utf8Path, Utf8PathBuf};
use seclinter_plugins::guest::{DirEntry, GuestError, GuestHost, GuestPlugin, serve};
use seclinter_plugins::protocol::{LogLevel, ScanPayload};
use seclinter_plugins::{PermissionSet, PluginMeta, PluginPermission, ScanResult};
use serde_json::Value;

pub use rules::{scan_markup, scan_script};

/// Name the plugin registers under.
pub const PLUGIN_NAME: &str = "seclinter-plugin-xss-detector";

const PLUGIN_VERSION: &str = "1.0.0";
const SCRIPT_EXTENSIONS: [&str; 4] = ["js", "jsx", "ts", "tsx"];
const MARKUP_EXTENSIONS: [&str; 2] = ["html", "htm"];
const SKIPPED_DIRS: [&str; 4] = ["node_modules", ".git", "dist", "build"];

/// Read access to the project being scanned.
pub trait ProjectSource {
    /// Lists a directory.
    ///
    /// # Errors
    ///
    /// Returns a [`GuestError`] when the directory cannot be listed.
    fn list(&mut self, dir: &Utf8Path) -> Result<Vec<DirEntry>, GuestError>;

    /// Reads a file as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns a [`GuestError`] when the file cannot be read.
    fn read(&mut self, path: &Utf8Path) -> Result<String, GuestError>;
}

impl ProjectSource for GuestHost<'_> {
    fn list(&mut self, dir: &Utf8Path) -> Result<Vec<DirEntry>, GuestError> {
        self.read_dir(dir.as_str())
    }

    fn read(&mut self, path: &Utf8Path) -> Result<String, GuestError> {
        self.read_file(path.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Script,
    Markup,
}

impl FileKind {
    fn of(path: &Utf8Path) -> Option<Self> {
        let extension = path.extension()?.to_ascii_lowercase();
        if SCRIPT_EXTENSIONS.contains(&extension.as_str()) {
            Some(Self::Script)
        } else if MARKUP_EXTENSIONS.contains(&extension.as_str()) {
            Some(Self::Markup)
        } else {
            None
        }
    }
}

/// The XSS detector.
#[derive(Debug, Clone)]
pub struct XssDetector {
    skipped: BTreeSet<String>,
}

impl Default for XssDetector {
    fn default() -> Self {
        Self {
            skipped: SKIPPED_DIRS.iter().map(|dir| String::from(*dir)).collect(),
        }
    }
}

impl XssDetector {
    /// Creates a detector that skips the usual vendored and build directories.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies plugin options.
    ///
    /// `ignore` lists extra directory names to skip.
    ///
    /// # Errors
    ///
    /// Returns [`GuestError::Plugin`] when `ignore` is not a list of strings.
    pub fn configure(&mut self, options: &Value) -> Result<(), GuestError> {
        let Some(ignore) = options.get("ignore") else {
            return Ok(());
        };
        let names = ignore
            .as_array()
            .ok_or_else(|| GuestError::plugin("option `ignore` must be a list of directory names"))?;
        for name in names {
            let dir = name
                .as_str()
                .ok_or_else(|| GuestError::plugin("option `ignore` must hold only strings"))?;
            let _ = self.skipped.insert(String::from(dir));
        }
        Ok(())
    }

    /// Whether a directory name is skipped during the walk.
    #[must_use]
    pub fn skips(&self, dir: &str) -> bool {
        self.skipped.contains(dir)
    }

    /// Scans every script and markup file below `root`.
    ///
    /// Reported paths are relative to `root`.
    ///
    /// # Errors
    ///
    /// Propagates the first listing or read failure.
    pub fn scan_project(
        &self,
        source: &mut (impl ProjectSource + ?Sized),
        root: &Utf8Path,
    ) -> Result<Vec<ScanResult>, GuestError> {
        let mut results = Vec::new();
        for (path, kind) in self.collect_files(source, root)? {
            let content = source.read(&path)?;
            let relative = path.strip_prefix(root).unwrap_or(path.as_path());
            match kind {
                FileKind::Script => results.extend(scan_script(&content, relative)),
                FileKind::Markup => results.extend(scan_markup(&content, relative)),
            }
        }
        Ok(results)
    }

    fn collect_files(
        &self,
        source: &mut (impl ProjectSource + ?Sized),
        root: &Utf8Path,
    ) -> Result<Vec<(Utf8PathBuf, FileKind)>, GuestError> {
        let mut files = Vec::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in source.list(&dir)? {
                let path = dir.join(&entry.name);
                if entry.is_dir {
                    if !self.skips(&entry.name) {
                        pending.push(path);
                    }
                } else if let Some(kind) = FileKind::of(&path) {
                    files.push((path, kind));
                }
            }
        }
        files.sort_by(|left, right| left.0.cmp(&right.0));
        Ok(files)
    }
}

impl GuestPlugin for XssDetector {
    fn describe(&self) -> PluginMeta {
        PluginMeta::new(PLUGIN_NAME, PLUGIN_VERSION, "xss")
            .with_description("Detects potential XSS vulnerabilities in web applications")
            .with_tags(vec![
                String::from("security"),
                String::from("xss"),
                String::from("injection"),
            ])
            .with_permissions(PermissionSet::new().with(PluginPermission::FsRead))
    }

    fn init(&mut self, options: &Value, host: &mut GuestHost<'_>) -> Result<(), GuestError> {
        self.configure(options)?;
        host.log(LogLevel::Info, "XSS detector initialised")
    }

    fn scan(
        &mut self,
        payload: &ScanPayload,
        host: &mut GuestHost<'_>,
    ) -> Result<Vec<ScanResult>, GuestError> {
        self.configure(&payload.config)?;
        let results = self.scan_project(host, &payload.project_path)?;
        host.log(
            LogLevel::Debug,
            format!("{} potential XSS issues found", results.len()),
        )?;
        Ok(results)
    }
}

/// Serves one host request with a default [`XssDetector`].
///
/// # Errors
///
/// Returns a [`GuestError`] when the request cannot be read or the response
/// cannot be written.
pub fn run(stdin: &mut impl BufRead, stdout: &mut impl Write) -> Result<(), GuestError> {
    serve(stdin, stdout, &mut XssDetector::new())
}
