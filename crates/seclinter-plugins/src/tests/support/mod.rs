//! Fixtures shared by unit and behaviour tests: shell-script plugins,
//! package directories on disk and in-process fake plugins.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

use crate::error::PluginFault;
use crate::finding::{ScanResult, Severity};
use crate::plugin::{ScanPlugin, ScanRequest};

/// Writes an executable `/bin/sh` script named `name` under `dir`.
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    fs::create_dir_all(dir).expect("create script dir");
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    }
    path
}

/// Creates `plugins_dir/dir_name` with `plugin.json` and an `index` script.
pub(crate) fn write_package(plugins_dir: &Path, dir_name: &str, manifest: &Value, script: &str) -> PathBuf {
    let package = plugins_dir.join(dir_name);
    fs::create_dir_all(&package).expect("create package dir");
    fs::write(
        package.join("plugin.json"),
        serde_json::to_string_pretty(manifest).expect("serialise manifest"),
    )
    .expect("write manifest");
    write_script(&package, "index", script);
    package
}

/// Script body answering every operation with `response_line`.
pub(crate) fn answer_with(response_line: &str) -> String {
    format!("read request\necho '{response_line}'")
}

/// Script body that reports `meta` on describe and succeeds with `findings`
/// on scan. `findings` is a JSON array literal.
pub(crate) fn scanning_plugin(meta: &Value, findings: &str) -> String {
    format!(
        r#"read request
case "$request" in
  *'"operation":"describe"'*)
    echo '{{"kind":"response","success":true,"output":{{"kind":"meta","meta":{meta}}}}}' ;;
  *'"operation":"scan"'*)
    echo '{{"kind":"response","success":true,"output":{{"kind":"findings","results":{findings}}}}}' ;;
  *)
    echo '{{"kind":"response","success":true,"output":{{"kind":"empty"}}}}' ;;
esac"#
    )
}

// ---------------------------------------------------------------------------
// In-process plugins
// ---------------------------------------------------------------------------

/// Reports one finding per level in `levels`.
pub(crate) struct Reporting {
    name: String,
    levels: Vec<Severity>,
}

impl Reporting {
    pub(crate) fn plugin(name: &str, levels: Vec<Severity>) -> Arc<dyn ScanPlugin> {
        Arc::new(Self {
            name: name.to_owned(),
            levels,
        })
    }
}

impl ScanPlugin for Reporting {
    fn scan(&self, request: &ScanRequest) -> Result<Vec<ScanResult>, PluginFault> {
        Ok(self
            .levels
            .iter()
            .map(|level| {
                ScanResult::builder("FAKE-1", self.name.as_str(), *level, "finding")
                    .file(request.project_path().join("index.js"))
                    .build()
            })
            .collect())
    }
}

/// Fails every scan and every cleanup.
pub(crate) struct Failing;

impl ScanPlugin for Failing {
    fn scan(&self, _request: &ScanRequest) -> Result<Vec<ScanResult>, PluginFault> {
        Err(PluginFault::message("boom"))
    }

    fn cleanup(&self) -> Result<(), PluginFault> {
        Err(PluginFault::message("cleanup refused"))
    }
}

/// Sleeps before returning no findings.
pub(crate) struct Sleeping(pub(crate) Duration);

impl ScanPlugin for Sleeping {
    fn scan(&self, _request: &ScanRequest) -> Result<Vec<ScanResult>, PluginFault> {
        thread::sleep(self.0);
        Ok(Vec::new())
    }
}

/// Panics while scanning.
pub(crate) struct Panicking;

impl ScanPlugin for Panicking {
    fn scan(&self, _request: &ScanRequest) -> Result<Vec<ScanResult>, PluginFault> {
        panic!("plugin bug");
    }
}

/// Manifest declaring metadata for `name`.
pub(crate) fn manifest_with_meta(name: &str) -> Value {
    json!({
        "name": name,
        "version": "1.0.0",
        "meta": {"name": name, "version": "1.0.0", "target": "js"}
    })
}

/// Shares `plugin` as a trait object.
pub(crate) fn shared(plugin: impl ScanPlugin) -> Arc<dyn ScanPlugin> {
    Arc::new(plugin)
}
