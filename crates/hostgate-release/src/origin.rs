//! Allowed source origin and ref names
//!
//! The origin is fixed: `https://github.com/<owner>/<repo>[.git]`. There is
//! no configuration knob for it.

use crate::error::PipelineError;
use regex::Regex;
use std::sync::LazyLock;

/// Ref used when the caller does not name one
pub const DEFAULT_REF: &str = "main";

static ORIGIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://github\.com/([A-Za-z0-9][A-Za-z0-9-]{0,38})/([A-Za-z0-9._-]{1,100})$")
        .expect("origin regex is valid")
});

static REF_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._/-]{0,127}$").expect("ref regex is valid"));

/// Accept only the allowed origin
///
/// # Errors
/// Returns [`PipelineError::OriginRejected`] for anything else, including
/// credentials, ports, queries and fragments
pub fn check_origin(url: &str) -> Result<(), PipelineError> {
    let accepted = ORIGIN_REGEX
        .captures(url)
        .and_then(|c| c.get(2))
        .is_some_and(|repo| !matches!(repo.as_str(), "." | ".." | ".git"));
    if accepted {
        Ok(())
    } else {
        Err(PipelineError::OriginRejected {
            url: hostgate_audit::strip_url_credentials(url),
        })
    }
}

/// Accept branch and tag names that cannot be read as options or ranges
///
/// # Errors
/// Returns [`PipelineError::InvalidRef`]
pub fn check_ref(reference: &str) -> Result<(), PipelineError> {
    let valid = REF_REGEX.is_match(reference)
        && !reference.contains("..")
        && !reference.contains("//")
        && !reference.ends_with('/')
        && !reference.ends_with(".lock");
    if valid {
        Ok(())
    } else {
        Err(PipelineError::InvalidRef(reference.to_string()))
    }
}

/// Whether two origin URLs name the same repository
///
/// GitHub matches owner and repository case-insensitively and accepts an
/// optional `.git` suffix.
#[must_use]
pub fn same_origin(a: &str, b: &str) -> bool {
    fn canonical(url: &str) -> String {
        let url = hostgate_audit::strip_url_credentials(url.trim());
        let url = url.trim_end_matches('/');
        url.strip_suffix(".git").unwrap_or(url).to_ascii_lowercase()
    }
    canonical(a) == canonical(b)
}
