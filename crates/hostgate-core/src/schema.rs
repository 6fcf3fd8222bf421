//! Argument schemas derived from typed request structs
//!
//! Every capability deserializes its arguments into a struct deriving
//! [`JsonSchema`] with `deny_unknown_fields`. The generated schema is
//! compiled into a [`jsonschema::Validator`] once, when the registry is
//! built, so the listing and the check can never drift from the struct the
//! handler actually reads. Every failure names the field it concerns.

use jsonschema::error::ValidationErrorKind;
use jsonschema::{ValidationError, Validator};
use schemars::JsonSchema;
use serde_json::{Map, Value};
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

/// A generated schema the validator refused to compile
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("argument schema of '{capability}' is invalid: {reason}")]
pub struct SchemaError {
    pub capability: &'static str,
    pub reason: String,
}

/// Why a set of arguments was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SchemaViolation {
    /// Top-level argument the failure concerns, if any
    pub field: Option<String>,
    pub message: String,
}

impl SchemaViolation {
    #[inline]
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    fn from_error(error: &ValidationError<'_>) -> Self {
        match &error.kind {
            ValidationErrorKind::AdditionalProperties { unexpected } => {
                let field = unexpected.first().cloned();
                let message = format!("unknown field '{}'", field.as_deref().unwrap_or_default());
                Self { field, message }
            }
            ValidationErrorKind::Required { property } => {
                let field = property.as_str().map(ToString::to_string);
                let message = format!("missing required field '{}'", field.as_deref().unwrap_or_default());
                Self { field, message }
            }
            _ => {
                let path = error.instance_path.to_string();
                let field = path.split('/').find(|s| !s.is_empty()).map(ToString::to_string);
                let message = match &field {
                    Some(name) => format!("field '{name}': {error}"),
                    None => format!("arguments must be an object: {error}"),
                };
                Self { field, message }
            }
        }
    }
}

/// Compiled argument schema of one capability
#[derive(Clone)]
pub struct InputSchema {
    document: Value,
    validator: Arc<Validator>,
}

impl Debug for InputSchema {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSchema").field("document", &self.document).finish_non_exhaustive()
    }
}

impl InputSchema {
    /// Generate the schema of `T` and compile it
    ///
    /// # Errors
    /// Returns a [`SchemaError`] if the generated document does not compile
    pub fn of<T: JsonSchema>(capability: &'static str) -> Result<Self, SchemaError> {
        let invalid = |reason: String| SchemaError { capability, reason };
        let root = schemars::schema_for!(T);
        let document = serde_json::to_value(&root).map_err(|e| invalid(e.to_string()))?;
        let validator = jsonschema::options()
            .build(&document)
            .map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            document,
            validator: Arc::new(validator),
        })
    }

    /// Check `arguments`; `null` counts as no arguments
    ///
    /// # Errors
    /// Returns the first [`SchemaViolation`] the validator reports
    pub fn validate(&self, arguments: &Value) -> Result<(), SchemaViolation> {
        let empty = Value::Object(Map::new());
        let arguments = if arguments.is_null() { &empty } else { arguments };
        self.validator
            .validate(arguments)
            .map_err(|error| SchemaViolation::from_error(&error))
    }

    /// Names of the required arguments
    #[must_use]
    pub fn required_names(&self) -> Vec<&str> {
        self.document["required"]
            .as_array()
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Whether `name` is an accepted argument at all
    #[must_use]
    pub fn accepts(&self, name: &str) -> bool {
        self.document["properties"].get(name).is_some()
    }

    /// The generated JSON Schema, as shown in capability listings
    #[inline]
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        self.document.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    #[serde(deny_unknown_fields)]
    struct Sample {
        app_slug: String,
        #[serde(default)]
        lines: Option<i64>,
        #[serde(default)]
        functions: Vec<String>,
        #[serde(default)]
        values: BTreeMap<String, String>,
    }

    fn schema() -> InputSchema {
        InputSchema::of::<Sample>("sample").unwrap()
    }

    #[test]
    fn accepts_valid_arguments() {
        let args = json!({"app_slug": "demo", "lines": 20, "functions": ["a", "b"], "values": {"K": "v"}});
        assert_eq!(schema().validate(&args), Ok(()));
        assert_eq!(schema().validate(&json!({"app_slug": "demo", "lines": null})), Ok(()));
    }

    #[test]
    fn missing_field_is_named() {
        let err = schema().validate(&json!({})).unwrap_err();
        assert_eq!(err.field(), Some("app_slug"));
        assert_eq!(err.to_string(), "missing required field 'app_slug'");

        let err = schema().validate(&Value::Null).unwrap_err();
        assert_eq!(err.field(), Some("app_slug"));
    }

    #[test]
    fn wrong_kind_is_named() {
        let err = schema().validate(&json!({"app_slug": 7})).unwrap_err();
        assert_eq!(err.field(), Some("app_slug"));
        assert!(err.to_string().starts_with("field 'app_slug': "), "{err}");

        let err = schema()
            .validate(&json!({"app_slug": "x", "functions": ["a", 1]}))
            .unwrap_err();
        assert_eq!(err.field(), Some("functions"));

        let err = schema()
            .validate(&json!({"app_slug": "x", "lines": 1.5}))
            .unwrap_err();
        assert_eq!(err.field(), Some("lines"));

        let err = schema()
            .validate(&json!({"app_slug": "x", "values": {"K": 1}}))
            .unwrap_err();
        assert_eq!(err.field(), Some("values"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = schema()
            .validate(&json!({"app_slug": "x", "command": "rm -rf /"}))
            .unwrap_err();
        assert_eq!(err.field(), Some("command"));
        assert_eq!(err.to_string(), "unknown field 'command'");
    }

    #[test]
    fn non_object_is_rejected() {
        let err = schema().validate(&json!([1])).unwrap_err();
        assert_eq!(err.field(), None);
    }

    #[test]
    fn document_comes_from_the_struct() {
        let schema = schema();
        assert_eq!(schema.required_names(), vec!["app_slug"]);
        assert!(schema.accepts("functions"));
        assert!(!schema.accepts("command"));

        let rendered = schema.to_json_schema();
        assert_eq!(rendered["properties"]["functions"]["items"]["type"], "string");
        assert_eq!(rendered["additionalProperties"], false);
    }
}
