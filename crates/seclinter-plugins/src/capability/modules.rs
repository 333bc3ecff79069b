//! Restricted module loader.
//!
//! Plugins reach host functionality beyond the facade only through named
//! modules. A name must be on the allow-list and provided by the host.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::capability::path::PathOps;
use crate::error::CapabilityError;

/// Modules a plugin may require when none are configured.
pub const DEFAULT_ALLOWED_MODULES: [&str; 2] = ["path", "crypto"];

/// A host-provided module callable by plugins.
pub trait HostModule: Send + Sync {
    /// Module name used by `require`.
    fn name(&self) -> &'static str;

    /// Methods the module exposes.
    fn methods(&self) -> &'static [&'static str];

    /// Invokes `method` with JSON arguments.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Module`] for unknown methods or bad
    /// arguments.
    fn invoke(&self, method: &str, args: &Value) -> Result<Value, CapabilityError>;
}

/// Resolves module names against an allow-list.
#[derive(Clone)]
pub struct ModuleLoader {
    allowed: BTreeSet<String>,
    modules: BTreeMap<&'static str, Arc<dyn HostModule>>,
}

impl fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("allowed", &self.allowed)
            .field("provided", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleLoader {
    /// Creates a loader with the built-in `path` and `crypto` modules.
    #[must_use]
    pub fn new<I, S>(allowed: I, paths: PathOps) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
            modules: BTreeMap::new(),
        }
        .with_module(Arc::new(PathModule { ops: paths }))
        .with_module(Arc::new(CryptoModule))
    }

    /// Registers an additional host module.
    #[must_use]
    pub fn with_module(mut self, module: Arc<dyn HostModule>) -> Self {
        let _ = self.modules.insert(module.name(), module);
        self
    }

    /// Names on the allow-list.
    pub fn allowed(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }

    /// Resolves `name` to a host module.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::ModuleNotAllowed`] for names off the
    /// allow-list and [`CapabilityError::ModuleUnavailable`] for allowed
    /// names the host does not provide.
    pub fn require(&self, name: &str) -> Result<Arc<dyn HostModule>, CapabilityError> {
        if !self.allowed.contains(name) {
            return Err(CapabilityError::ModuleNotAllowed {
                module: name.to_owned(),
            });
        }
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| CapabilityError::ModuleUnavailable {
                module: name.to_owned(),
            })
    }

    /// Requires `module` and invokes `method` on it.
    ///
    /// # Errors
    ///
    /// Propagates [`ModuleLoader::require`] and module failures.
    pub fn call(&self, module: &str, method: &str, args: &Value) -> Result<Value, CapabilityError> {
        self.require(module)?.invoke(method, args)
    }
}

fn module_error(module: &str, message: impl Into<String>) -> CapabilityError {
    CapabilityError::Module {
        module: module.to_owned(),
        message: message.into(),
    }
}

fn string_args(module: &str, args: &Value) -> Result<Vec<String>, CapabilityError> {
    match args {
        Value::String(single) => Ok(vec![single.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| module_error(module, "arguments must be strings"))
            })
            .collect(),
        _ => Err(module_error(module, "expected a string or an array of strings")),
    }
}

struct PathModule {
    ops: PathOps,
}

impl HostModule for PathModule {
    fn name(&self) -> &'static str {
        "path"
    }

    fn methods(&self) -> &'static [&'static str] {
        &["join", "resolve", "dirname", "basename"]
    }

    fn invoke(&self, method: &str, args: &Value) -> Result<Value, CapabilityError> {
        let segments = string_args(self.name(), args)?;
        let first = || {
            segments
                .first()
                .map(String::as_str)
                .ok_or_else(|| module_error("path", "missing path argument"))
        };
        let result = match method {
            "join" => self.ops.join(&segments),
            "resolve" => self.ops.resolve(&segments),
            "dirname" => self.ops.dirname(first()?),
            "basename" => self.ops.basename(first()?),
            other => return Err(module_error("path", format!("unknown method '{other}'"))),
        };
        Ok(Value::String(result))
    }
}

struct CryptoModule;

impl HostModule for CryptoModule {
    fn name(&self) -> &'static str {
        "crypto"
    }

    fn methods(&self) -> &'static [&'static str] {
        &["sha256"]
    }

    fn invoke(&self, method: &str, args: &Value) -> Result<Value, CapabilityError> {
        if method != "sha256" {
            return Err(module_error("crypto", format!("unknown method '{method}'")));
        }
        let input = string_args(self.name(), args)?.concat();
        let digest = Sha256::digest(input.as_bytes());
        let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
        Ok(json!(hex))
    }
}
