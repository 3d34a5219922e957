use jsonschema::error::ValidationErrorKind;
use serde_json::Value;
use thiserror::Error;

use super::{Issue, IssueCode, PathSegment, Schema, Typed, ValidationError};

/// Errors raised while compiling a [`JsonSchema`].
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid JSON Schema: {message}")]
    InvalidSchema { message: String },
}

/// A compiled JSON Schema used as a validation capability.
///
/// Every violation becomes an [`Issue`] whose path is the instance location.
/// A missing `required` property is reported at the property itself (not at
/// the enclosing object) with the message `required`, so it shows up as a
/// field error.
///
/// # Examples
///
/// ```
/// use fileroute::validation::{JsonSchema, Schema};
/// use serde_json::json;
///
/// let schema = JsonSchema::new(&json!({
///     "type": "object",
///     "required": ["id"],
///     "properties": { "id": { "type": "string" } }
/// }))
/// .unwrap();
///
/// assert!(schema.parse(&json!({"id": "7"})).is_ok());
/// assert_eq!(schema.parse(&json!({})).unwrap_err().message(), "id (required)");
/// ```
#[derive(Debug)]
pub struct JsonSchema {
    validator: jsonschema::Validator,
}

impl JsonSchema {
    /// Compiles `schema`, detecting the draft from its `$schema` keyword.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidSchema`] if `schema` is not a valid JSON
    /// Schema document.
    pub fn new(schema: &Value) -> Result<Self, SchemaError> {
        let validator =
            jsonschema::validator_for(schema).map_err(|e| SchemaError::InvalidSchema {
                message: e.to_string(),
            })?;
        Ok(Self { validator })
    }

    /// Chains deserialization into `T` after this schema passes.
    pub fn deserialize<T>(self) -> Typed<T> {
        Typed::with_schema(self)
    }

    fn issues(&self, raw: &Value) -> Vec<Issue> {
        self.validator
            .iter_errors(raw)
            .map(|error| {
                let mut path = pointer_segments(&error.instance_path().to_string());
                match error.kind() {
                    ValidationErrorKind::Required { property } => {
                        let name = property
                            .as_str()
                            .map_or_else(|| property.to_string(), str::to_owned);
                        path.push(PathSegment::Key(name));
                        Issue::new(IssueCode::Required, path, "required")
                    }
                    ValidationErrorKind::Type { .. } => {
                        Issue::new(IssueCode::InvalidType, path, error.to_string())
                    }
                    _ => Issue::new(IssueCode::InvalidValue, path, error.to_string()),
                }
            })
            .collect()
    }
}

impl Schema for JsonSchema {
    type Output = Value;

    fn parse(&self, raw: &Value) -> Result<Value, ValidationError> {
        let issues = self.issues(raw);
        if issues.is_empty() {
            Ok(raw.clone())
        } else {
            Err(ValidationError::new(issues))
        }
    }
}

// Splits an RFC 6901 JSON pointer into path segments; numeric tokens are indices.
fn pointer_segments(pointer: &str) -> Vec<PathSegment> {
    pointer
        .split('/')
        .skip(1)
        .map(|token| {
            let token = token.replace("~1", "/").replace("~0", "~");
            match token.parse::<usize>() {
                Ok(index) => PathSegment::Index(index),
                Err(_) => PathSegment::Key(token),
            }
        })
        .collect()
}
