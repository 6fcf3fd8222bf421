//! Secret redaction for audit arguments and returned artifacts
//!
//! Arguments use an allow-list: a top-level field is logged verbatim only if
//! its name is known to be safe. Everything else is replaced by
//! [`REDACTED`]. Inside allowed values, and in artifacts, keys that look like
//! credentials are still masked.

use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Placeholder written in place of a hidden value
pub const REDACTED: &str = "[REDACTED]";

/// Argument names that are safe to persist
pub const DEFAULT_SAFE_FIELDS: &[&str] = &[
    "app_slug",
    "release_id",
    "git_url",
    "ref",
    "project_path",
    "functions",
    "type",
    "service",
    "port",
    "domain",
    "healthcheck",
    "env_required",
    "action",
    "lines",
    "confirm",
];

const SECRET_MARKERS: &[&str] = &[
    "password", "passwd", "secret", "token", "key", "credential", "auth", "cookie", "private",
];

/// Default-deny argument redactor
#[derive(Debug, Clone)]
pub struct Redactor {
    safe_fields: BTreeSet<String>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::with_safe_fields(DEFAULT_SAFE_FIELDS.iter().copied())
    }
}

impl Redactor {
    /// Create redactor that allows exactly the given field names
    #[must_use]
    pub fn with_safe_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            safe_fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Check whether a top-level argument is logged verbatim
    #[inline]
    #[must_use]
    pub fn is_safe_field(&self, name: &str) -> bool {
        self.safe_fields.contains(name) && !is_secret_like(name)
    }

    /// Produce the snapshot persisted in the audit trail
    #[must_use]
    pub fn redact_arguments(&self, arguments: &Value) -> Value {
        match arguments {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        let v = if self.is_safe_field(k) {
                            mask_secret_keys(v)
                        } else {
                            Value::String(REDACTED.to_string())
                        };
                        (k.clone(), v)
                    })
                    .collect(),
            ),
            Value::Null => Value::Null,
            _ => Value::String(REDACTED.to_string()),
        }
    }
}

/// Heuristic for credential-bearing key names
#[must_use]
pub fn is_secret_like(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SECRET_MARKERS.iter().any(|m| lower.contains(m))
}

/// Mask secret-looking keys at any depth and strip URL userinfo
#[must_use]
pub fn mask_secret_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                let v = if is_secret_like(k) {
                    Value::String(REDACTED.to_string())
                } else {
                    mask_secret_keys(v)
                };
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(mask_secret_keys).collect()),
        Value::String(s) => Value::String(strip_url_credentials(s)),
        other => other.clone(),
    }
}

/// Replace `user:pass@` in a URL-looking string with `[REDACTED]@`
#[must_use]
pub fn strip_url_credentials(s: &str) -> String {
    let Some(scheme_end) = s.find("://") else {
        return s.to_string();
    };
    let rest = &s[scheme_end + 3..];
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}://{}@{}", &s[..scheme_end], REDACTED, &rest[at + 1..]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn unknown_fields_are_redacted() {
        let redactor = Redactor::default();
        let out = redactor.redact_arguments(&json!({
            "app_slug": "demo",
            "sql": "ALTER USER x PASSWORD 'p'",
            "values": {"API_KEY": "abc"},
            "brand_new_field": "whatever"
        }));
        assert_eq!(out["app_slug"], "demo");
        assert_eq!(out["sql"], REDACTED);
        assert_eq!(out["values"], REDACTED);
        assert_eq!(out["brand_new_field"], REDACTED);
    }

    #[test]
    fn secret_keys_nested_in_safe_fields_are_masked() {
        let redactor = Redactor::default();
        let out = redactor.redact_arguments(&json!({
            "healthcheck": {"path": "/health", "auth_token": "t"}
        }));
        assert_eq!(out["healthcheck"]["path"], "/health");
        assert_eq!(out["healthcheck"]["auth_token"], REDACTED);
    }

    #[test]
    fn allow_list_cannot_admit_secret_names() {
        let redactor = Redactor::with_safe_fields(["db_password"]);
        let out = redactor.redact_arguments(&json!({"db_password": "x"}));
        assert_eq!(out["db_password"], REDACTED);
    }

    #[test]
    fn non_object_arguments_are_hidden() {
        let redactor = Redactor::default();
        assert_eq!(redactor.redact_arguments(&json!("raw")), json!(REDACTED));
        assert_eq!(redactor.redact_arguments(&Value::Null), Value::Null);
    }

    #[test]
    fn url_credentials_are_stripped() {
        assert_eq!(
            strip_url_credentials("https://user:pw@github.com/org/repo"),
            "https://[REDACTED]@github.com/org/repo"
        );
        assert_eq!(
            strip_url_credentials("https://github.com/org/repo"),
            "https://github.com/org/repo"
        );
        assert_eq!(strip_url_credentials("plain text"), "plain text");
        assert_eq!(
            strip_url_credentials("https://github.com/a@b"),
            "https://github.com/a@b"
        );
    }

    #[test]
    fn masks_secret_keys_in_artifacts() {
        let out = mask_secret_keys(&json!({
            "api_url": "http://localhost:54321",
            "anon_key": "eyJ...",
            "nested": [{"service_role_key": "x", "port": 1}]
        }));
        assert_eq!(out["api_url"], "http://localhost:54321");
        assert_eq!(out["anon_key"], REDACTED);
        assert_eq!(out["nested"][0]["service_role_key"], REDACTED);
        assert_eq!(out["nested"][0]["port"], 1);
    }

    #[test]
    fn secret_heuristic() {
        assert!(is_secret_like("DB_PASSWORD"));
        assert!(is_secret_like("githubToken"));
        assert!(!is_secret_like("app_slug"));
        assert!(!is_secret_like("port"));
    }
}
