//! Pure path helpers. Always available; they never touch the filesystem.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Lexical path operations resolved against a base directory.
///
/// ```
/// use seclinter_plugins::capability::PathOps;
///
/// let ops = PathOps::new("/srv/project");
/// assert_eq!(ops.join(&["src", "../lib", "a.js"]), "lib/a.js");
/// assert_eq!(ops.resolve(&["src", "a.js"]), "/srv/project/src/a.js");
/// assert_eq!(ops.dirname("src/a.js"), "src");
/// assert_eq!(ops.basename("src/a.js"), "a.js");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathOps {
    base: Utf8PathBuf,
}

impl PathOps {
    /// Creates helpers that resolve relative paths against `base`.
    #[must_use]
    pub fn new(base: impl Into<Utf8PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Base directory used by [`PathOps::resolve`].
    #[must_use]
    pub fn base(&self) -> &Utf8Path {
        &self.base
    }

    /// Joins segments and normalises the result.
    #[must_use]
    pub fn join<S: AsRef<str>>(&self, segments: &[S]) -> String {
        let joined: Utf8PathBuf = segments
            .iter()
            .map(AsRef::as_ref)
            .filter(|segment| !segment.is_empty())
            .collect();
        normalise(&joined).into_string()
    }

    /// Resolves segments right to left into an absolute path.
    ///
    /// An absolute segment restarts resolution; otherwise the base directory
    /// is the starting point.
    #[must_use]
    pub fn resolve<S: AsRef<str>>(&self, segments: &[S]) -> String {
        let mut resolved = self.base.clone();
        for segment in segments.iter().map(AsRef::as_ref) {
            if segment.is_empty() {
                continue;
            }
            let path = Utf8Path::new(segment);
            if path.is_absolute() {
                resolved = path.to_path_buf();
            } else {
                resolved.push(path);
            }
        }
        normalise(&resolved).into_string()
    }

    /// Parent directory of `path`, or `.` when it has none.
    #[must_use]
    pub fn dirname(&self, path: &str) -> String {
        match Utf8Path::new(path).parent() {
            Some(parent) if !parent.as_str().is_empty() => parent.as_str().to_owned(),
            Some(_) => String::from("."),
            None if path.starts_with('/') => String::from("/"),
            None => String::from("."),
        }
    }

    /// Final component of `path`, or an empty string.
    #[must_use]
    pub fn basename(&self, path: &str) -> String {
        Utf8Path::new(path)
            .file_name()
            .map(str::to_owned)
            .unwrap_or_default()
    }
}

/// Collapses `.` and `..` components without touching the filesystem.
///
/// Leading `..` components are kept for relative paths and dropped for
/// absolute ones.
pub(crate) fn normalise(path: &Utf8Path) -> Utf8PathBuf {
    let mut prefix = Utf8PathBuf::new();
    let mut parts: Vec<&str> = Vec::new();
    let mut leading_parents = 0_usize;

    for component in path.components() {
        match component {
            Utf8Component::Prefix(_) | Utf8Component::RootDir => {
                prefix.push(component.as_str());
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if parts.pop().is_none() && prefix.as_str().is_empty() {
                    leading_parents = leading_parents.saturating_add(1);
                }
            }
            Utf8Component::Normal(part) => parts.push(part),
        }
    }

    let mut normalised = prefix;
    for _ in 0..leading_parents {
        normalised.push("..");
    }
    for part in parts {
        normalised.push(part);
    }
    if normalised.as_str().is_empty() {
        normalised.push(".");
    }
    normalised
}
