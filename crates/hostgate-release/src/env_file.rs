//! `.env` handling
//!
//! Presence checks are a substring match on `KEY=`; values are never parsed
//! or returned.

use indexmap::IndexMap;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Rejected `.env` update
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvFileError {
    #[error("invalid environment key '{0}'")]
    InvalidKey(String),

    #[error("value for '{0}' contains a line break")]
    InvalidValue(String),
}

static KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("env key regex is valid"));

/// `true` if `key` is a plausible environment variable name
#[must_use]
pub fn is_valid_key(key: &str) -> bool {
    key.len() <= 128 && KEY_REGEX.is_match(key)
}

/// Read `.env`, treating a missing file as empty
///
/// # Errors
/// Returns any I/O error other than not-found
pub async fn read_env(path: &Path) -> std::io::Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

/// Required keys with no `KEY=` in `contents`, in request order
#[must_use]
pub fn missing_keys(contents: &str, required: &[String]) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    for key in required {
        if !contents.contains(&format!("{key}=")) && !missing.contains(key) {
            missing.push(key.clone());
        }
    }
    missing
}

/// Set `values` in `existing`, replacing lines that start with `KEY=`
///
/// Other lines (comments, unrelated keys) keep their position.
///
/// # Errors
/// Returns an error for an invalid key or a value with a line break
pub fn merge_env(existing: &str, values: &IndexMap<String, String>) -> Result<String, EnvFileError> {
    for (key, value) in values {
        if !is_valid_key(key) {
            return Err(EnvFileError::InvalidKey(key.clone()));
        }
        if value.contains(['\n', '\r']) {
            return Err(EnvFileError::InvalidValue(key.clone()));
        }
    }

    let mut pending: IndexMap<&str, &str> = values
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let mut out = String::with_capacity(existing.len());

    for line in existing.lines() {
        let key = line.split_once('=').map(|(k, _)| k.trim());
        match key.and_then(|k| pending.shift_remove_entry(k)) {
            Some((k, v)) => out.push_str(&format!("{k}={v}\n")),
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    for (k, v) in pending {
        out.push_str(&format!("{k}={v}\n"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn reports_every_missing_key() {
        let contents = "EXISTING_KEY=value\n";
        assert_eq!(
            missing_keys(contents, &keys(&["EXISTING_KEY", "MISSING_KEY", "OTHER"])),
            keys(&["MISSING_KEY", "OTHER"])
        );
        assert!(missing_keys(contents, &keys(&["EXISTING_KEY"])).is_empty());
    }

    #[test]
    fn presence_is_substring_match() {
        assert!(missing_keys("API_URL=", &keys(&["API_URL"])).is_empty());
        assert!(missing_keys("# API_URL=set later", &keys(&["API_URL"])).is_empty());
        assert_eq!(missing_keys("", &keys(&["A", "A"])), keys(&["A"]));
    }

    #[test]
    fn merge_replaces_and_appends() {
        let existing = "# comment\nA=1\nB=2\n";
        let mut values = IndexMap::new();
        values.insert("B".to_string(), "20".to_string());
        values.insert("C".to_string(), "3".to_string());

        let merged = merge_env(existing, &values).unwrap();
        assert_eq!(merged, "# comment\nA=1\nB=20\nC=3\n");
    }

    #[test]
    fn merge_rejects_bad_input() {
        let mut values = IndexMap::new();
        values.insert("BAD KEY".to_string(), "x".to_string());
        assert_eq!(
            merge_env("", &values),
            Err(EnvFileError::InvalidKey("BAD KEY".to_string()))
        );

        let mut values = IndexMap::new();
        values.insert("OK".to_string(), "x\nINJECTED=1".to_string());
        assert_eq!(
            merge_env("", &values),
            Err(EnvFileError::InvalidValue("OK".to_string()))
        );
    }

    #[tokio::test]
    async fn missing_env_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_env(&dir.path().join(".env")).await.unwrap(), "");
    }
}
