//! Path confinement for application directories
//!
//! Provides [`AppSlug`] (a filesystem-safe application token) and
//! [`PathGuard`], which decides whether a candidate path stays inside
//! `<root>/<slug>`.
//!
//! Checks run in two passes:
//! 1. lexical: absolute, no `..`, no control characters, prefix of the app dir
//! 2. resolved: the deepest existing ancestor is canonicalized so that a
//!    symlink planted anywhere in the tree cannot point outside the app dir
//!
//! Any ambiguity is a rejection.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};

/// Maximum slug length (fits a DNS label and a database identifier)
pub const MAX_SLUG_LEN: usize = 63;

/// Sanitized application identifier
///
/// Only `[a-z0-9_-]`, never empty, never starting or ending with `-`/`_`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppSlug(String);

impl AppSlug {
    /// Collapse an arbitrary caller-supplied name into a slug
    ///
    /// Separators, dots, whitespace and non-ASCII characters become `-`,
    /// runs of `-` collapse, and edge punctuation is trimmed.
    ///
    /// # Errors
    /// Returns [`GuardError::EmptyToken`] when nothing usable remains
    pub fn sanitize(name: &str) -> Result<Self, GuardError> {
        let mut out = String::with_capacity(name.len());
        let mut last_dash = false;
        for c in name.chars() {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                out.push(c);
                last_dash = false;
            } else if !last_dash {
                out.push('-');
                last_dash = true;
            }
        }

        let mut token = out.trim_matches(|c| c == '-' || c == '_').to_string();
        if token.len() > MAX_SLUG_LEN {
            token.truncate(MAX_SLUG_LEN);
            token = token.trim_end_matches(|c| c == '-' || c == '_').to_string();
        }

        if token.is_empty() {
            return Err(GuardError::EmptyToken {
                input: name.escape_debug().to_string(),
            });
        }
        Ok(Self(token))
    }

    /// Accept a string only if it is already in sanitized form
    ///
    /// # Errors
    /// Returns [`GuardError::NotSanitized`] if sanitizing would change it
    pub fn parse(token: &str) -> Result<Self, GuardError> {
        let slug = Self::sanitize(token)?;
        if slug.0 == token {
            Ok(slug)
        } else {
            Err(GuardError::NotSanitized(token.escape_debug().to_string()))
        }
    }

    /// Get slug as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Slug as an unquoted SQL identifier
    ///
    /// `-` becomes `_`, and a slug that does not start with a letter gets an
    /// `app_` prefix. The result is cut to [`MAX_SLUG_LEN`] bytes.
    #[must_use]
    pub fn database_name(&self) -> String {
        let mut name = self.0.replace('-', "_");
        if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
            name.insert_str(0, "app_");
            name.truncate(MAX_SLUG_LEN);
        }
        name
    }
}

impl Display for AppSlug {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AppSlug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AppSlug {
    type Error = GuardError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AppSlug> for String {
    fn from(slug: AppSlug) -> Self {
        slug.0
    }
}

/// Confines filesystem access to per-application subtrees of a managed root
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// Create a guard over an absolute managed root
    ///
    /// # Errors
    /// Returns [`GuardError::NotAbsolute`] or [`GuardError::Traversal`] for
    /// roots that could not be reasoned about lexically
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, GuardError> {
        let root = root.into();
        if !root.is_absolute() {
            return Err(GuardError::NotAbsolute {
                path: root.display().to_string(),
            });
        }
        let root = normalize(&root)?;
        Ok(Self { root })
    }

    /// Managed root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sanitize a caller-supplied application name
    ///
    /// # Errors
    /// See [`AppSlug::sanitize`]
    #[inline]
    pub fn sanitize(&self, name: &str) -> Result<AppSlug, GuardError> {
        AppSlug::sanitize(name)
    }

    /// Directory owned by an application
    #[inline]
    #[must_use]
    pub fn app_dir(&self, slug: &AppSlug) -> PathBuf {
        self.root.join(slug.as_str())
    }

    /// `true` if `candidate` resolves inside `<root>/<owner>`
    #[must_use]
    pub fn validate(&self, candidate: &Path, owner: &str) -> bool {
        match AppSlug::parse(owner) {
            Ok(slug) => self.check(candidate, &slug).is_ok(),
            Err(_) => false,
        }
    }

    /// Validate `candidate` against the app dir and return its normalized form
    ///
    /// # Errors
    /// Returns a [`GuardError`] describing the first violated rule
    pub fn check(&self, candidate: &Path, owner: &AppSlug) -> Result<PathBuf, GuardError> {
        let display = candidate.display().to_string();

        if candidate.as_os_str().to_string_lossy().chars().any(char::is_control) {
            return Err(GuardError::InvalidCharacter { path: display });
        }
        if !candidate.is_absolute() {
            return Err(GuardError::NotAbsolute { path: display });
        }

        let normalized = normalize(candidate)?;
        let app_dir = self.app_dir(owner);
        if !normalized.starts_with(&app_dir) {
            return Err(GuardError::OutsideRoot {
                path: display,
                owner: owner.to_string(),
            });
        }

        self.check_resolved(&normalized, owner)?;
        Ok(normalized)
    }

    /// Join `relative` onto the app dir and validate the result
    ///
    /// # Errors
    /// Returns a [`GuardError`] if the joined path escapes the app dir
    pub fn resolve(&self, owner: &AppSlug, relative: impl AsRef<Path>) -> Result<PathBuf, GuardError> {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            return Err(GuardError::OutsideRoot {
                path: relative.display().to_string(),
                owner: owner.to_string(),
            });
        }
        self.check(&self.app_dir(owner).join(relative), owner)
    }

    /// Follow symlinks on the existing part of the path
    fn check_resolved(&self, normalized: &Path, owner: &AppSlug) -> Result<(), GuardError> {
        let canonical_root = canonicalize(&self.root)?;
        let canonical_app = canonical_root.join(owner.as_str());

        // The app dir itself must not be a link to somewhere else.
        let app_dir = self.app_dir(owner);
        if exists_no_follow(&app_dir) && canonicalize(&app_dir)? != canonical_app {
            return Err(GuardError::SymlinkEscape {
                path: app_dir.display().to_string(),
            });
        }

        let mut existing = normalized;
        let mut remainder = Vec::new();
        while !exists_no_follow(existing) {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    remainder.push(name.to_os_string());
                    existing = parent;
                }
                _ => {
                    return Err(GuardError::Unresolvable {
                        path: normalized.display().to_string(),
                        reason: "no existing ancestor".to_string(),
                    })
                }
            }
        }

        let mut resolved = canonicalize(existing)?;
        for name in remainder.into_iter().rev() {
            resolved.push(name);
        }

        if resolved.starts_with(&canonical_app) {
            Ok(())
        } else {
            tracing::warn!(path = %normalized.display(), resolved = %resolved.display(), "symlink escape rejected");
            Err(GuardError::SymlinkEscape {
                path: normalized.display().to_string(),
            })
        }
    }
}

/// Lexically normalize an absolute path, rejecting `..`
fn normalize(path: &Path) -> Result<PathBuf, GuardError> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(GuardError::Traversal {
                    path: path.display().to_string(),
                })
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

fn exists_no_follow(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

fn canonicalize(path: &Path) -> Result<PathBuf, GuardError> {
    std::fs::canonicalize(path).map_err(|e| GuardError::Unresolvable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Errors related to path confinement
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    /// Name sanitized to nothing
    #[error("application name '{input}' contains no usable characters")]
    EmptyToken { input: String },

    /// Owner token is not in sanitized form
    #[error("'{0}' is not a sanitized application slug")]
    NotSanitized(String),

    /// Path contains a `..` segment
    #[error("path contains parent directory traversal: {path}")]
    Traversal { path: String },

    /// Path is relative
    #[error("path is not absolute: {path}")]
    NotAbsolute { path: String },

    /// Path contains control characters
    #[error("path contains control characters: {path:?}")]
    InvalidCharacter { path: String },

    /// Path is outside the owner's directory
    #[error("path '{path}' is outside the directory of '{owner}'")]
    OutsideRoot { path: String, owner: String },

    /// Path resolves outside the owner's directory via a symlink
    #[error("path '{path}' resolves outside its application directory")]
    SymlinkEscape { path: String },

    /// Path could not be resolved
    #[error("cannot resolve '{path}': {reason}")]
    Unresolvable { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> (tempfile::TempDir, PathGuard) {
        let dir = tempfile::tempdir().unwrap();
        let guard = PathGuard::new(dir.path()).unwrap();
        (dir, guard)
    }

    fn slug(s: &str) -> AppSlug {
        AppSlug::parse(s).unwrap()
    }

    #[test]
    fn sanitize_keeps_simple_names() {
        assert_eq!(AppSlug::sanitize("demo").unwrap().as_str(), "demo");
        assert_eq!(AppSlug::sanitize("my_app-2").unwrap().as_str(), "my_app-2");
    }

    #[test]
    fn sanitize_lowercases_and_collapses() {
        assert_eq!(AppSlug::sanitize("My  Cool App").unwrap().as_str(), "my-cool-app");
        assert_eq!(AppSlug::sanitize("a///b").unwrap().as_str(), "a-b");
    }

    #[test]
    fn sanitize_strips_traversal() {
        assert_eq!(AppSlug::sanitize("../../etc/passwd").unwrap().as_str(), "etc-passwd");
        assert_eq!(AppSlug::sanitize("..\\windows").unwrap().as_str(), "windows");
    }

    #[test]
    fn sanitize_rejects_empty_result() {
        assert!(matches!(AppSlug::sanitize(".."), Err(GuardError::EmptyToken { .. })));
        assert!(AppSlug::sanitize("").is_err());
        assert!(AppSlug::sanitize("ñ/ü").is_err());
    }

    #[test]
    fn sanitize_truncates_long_names() {
        let long = "a".repeat(200);
        assert_eq!(AppSlug::sanitize(&long).unwrap().as_str().len(), MAX_SLUG_LEN);
    }

    #[test]
    fn parse_requires_sanitized_form() {
        assert!(AppSlug::parse("demo").is_ok());
        assert!(matches!(AppSlug::parse("Demo"), Err(GuardError::NotSanitized(_))));
        assert!(AppSlug::parse("a/b").is_err());
    }

    #[test]
    fn database_name_replaces_dashes() {
        assert_eq!(slug("my-app").database_name(), "my_app");
    }

    #[test]
    fn database_name_starts_with_a_letter() {
        assert_eq!(slug("2048-game").database_name(), "app_2048_game");

        let long = format!("9{}", "a".repeat(MAX_SLUG_LEN - 1));
        let name = slug(&long).database_name();
        assert_eq!(name.len(), MAX_SLUG_LEN);
        assert!(name.starts_with("app_9"));
    }

    #[test]
    fn guard_rejects_relative_root() {
        assert!(matches!(PathGuard::new("relative/root"), Err(GuardError::NotAbsolute { .. })));
    }

    #[test]
    fn validate_accepts_paths_inside_app() {
        let (_dir, guard) = guard();
        let app = guard.root().join("demo");
        assert!(guard.validate(&app.join("src"), "demo"));
        assert!(guard.validate(&app.join("releases/rel-1/index.js"), "demo"));
        assert!(guard.validate(&app.join("./logs"), "demo"));
    }

    #[test]
    fn validate_rejects_traversal_segments() {
        let (_dir, guard) = guard();
        let app = guard.root().join("demo");
        assert!(!guard.validate(&app.join("../other"), "demo"));
        assert!(!guard.validate(&app.join("src/../../etc"), "demo"));
    }

    #[test]
    fn validate_rejects_other_apps_and_root() {
        let (_dir, guard) = guard();
        assert!(!guard.validate(&guard.root().join("other/src"), "demo"));
        assert!(!guard.validate(guard.root(), "demo"));
        assert!(!guard.validate(&guard.root().join("demo-evil"), "demo"));
        assert!(!guard.validate(Path::new("/etc/passwd"), "demo"));
    }

    #[test]
    fn validate_rejects_unsanitized_owner() {
        let (_dir, guard) = guard();
        assert!(!guard.validate(&guard.root().join("../x/src"), "../x"));
        assert!(!guard.validate(&guard.root().join("Demo/src"), "Demo"));
    }

    #[test]
    fn validate_rejects_relative_candidates() {
        let (_dir, guard) = guard();
        assert!(!guard.validate(Path::new("demo/src"), "demo"));
    }

    #[test]
    fn resolve_joins_relative_paths() {
        let (_dir, guard) = guard();
        let path = guard.resolve(&slug("demo"), "logs/rel-1").unwrap();
        assert_eq!(path, guard.root().join("demo/logs/rel-1"));
        assert!(guard.resolve(&slug("demo"), "../x").is_err());
        assert!(guard.resolve(&slug("demo"), "/etc").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn validate_rejects_symlink_escape() {
        let (_dir, guard) = guard();
        let outside = tempfile::tempdir().unwrap();
        let app = guard.root().join("demo");
        std::fs::create_dir_all(&app).unwrap();
        std::os::unix::fs::symlink(outside.path(), app.join("escape")).unwrap();

        assert!(!guard.validate(&app.join("escape"), "demo"));
        assert!(!guard.validate(&app.join("escape/new-file"), "demo"));
    }

    #[cfg(unix)]
    #[test]
    fn validate_accepts_symlink_within_app() {
        let (_dir, guard) = guard();
        let app = guard.root().join("demo");
        std::fs::create_dir_all(app.join("releases/rel-1")).unwrap();
        std::os::unix::fs::symlink(app.join("releases/rel-1"), app.join("current")).unwrap();

        assert!(guard.validate(&app.join("current"), "demo"));
    }

    #[cfg(unix)]
    #[test]
    fn validate_rejects_linked_app_dir() {
        let (_dir, guard) = guard();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), guard.root().join("demo")).unwrap();

        assert!(!guard.validate(&guard.root().join("demo/src"), "demo"));
    }
}
