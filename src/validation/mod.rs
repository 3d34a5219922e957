//! Schema-based validation of raw request data.
//!
//! Validation is a capability: anything implementing [`Schema`] can turn a raw
//! JSON value (path parameters, query string, or body) into a typed value or a
//! [`ValidationError`] listing every issue found. Two implementations ship
//! with the crate:
//!
//! - [`JsonSchema`]: validates against a JSON Schema document and returns the
//!   raw value unchanged on success.
//! - [`Typed`]: deserializes into any `serde` type, optionally after a
//!   [`JsonSchema`] pass.
//!
//! Closures can be used directly through [`schema_fn`].

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

mod json_schema;
mod typed;

pub use json_schema::{JsonSchema, SchemaError};
pub use typed::Typed;

/// Parses raw request data into a validated value.
pub trait Schema {
    /// The value produced on success.
    type Output;

    /// Validates `raw`, returning the parsed value or every issue found.
    ///
    /// Implementations must not retain or mutate `raw`.
    fn parse(&self, raw: &Value) -> Result<Self::Output, ValidationError>;
}

/// A [`Schema`] backed by a closure. Built with [`schema_fn`].
pub struct FnSchema<F>(F);

/// Wraps a closure as a [`Schema`].
///
/// # Examples
///
/// ```
/// use fileroute::validation::{Issue, Schema, ValidationError, schema_fn};
/// use serde_json::json;
///
/// let id = schema_fn(|raw| {
///     raw.get("id")
///         .and_then(|v| v.as_str())
///         .map(str::to_owned)
///         .ok_or_else(|| ValidationError::from(Issue::required("id")))
/// });
///
/// assert_eq!(id.parse(&json!({"id": "7"})).unwrap(), "7");
/// assert_eq!(id.parse(&json!({})).unwrap_err().message(), "id (required)");
/// ```
pub fn schema_fn<F, T>(f: F) -> FnSchema<F>
where
    F: Fn(&Value) -> Result<T, ValidationError>,
{
    FnSchema(f)
}

impl<F, T> Schema for FnSchema<F>
where
    F: Fn(&Value) -> Result<T, ValidationError>,
{
    type Output = T;

    fn parse(&self, raw: &Value) -> Result<T, ValidationError> {
        (self.0)(raw)
    }
}

/// Machine-readable category of a validation [`Issue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    /// A required field is absent.
    Required,
    /// A value has the wrong JSON type.
    InvalidType,
    /// A value has the right type but breaks a constraint.
    InvalidValue,
    /// The raw input could not be decoded at all.
    InvalidJson,
    /// Raised by a custom schema.
    Custom,
}

/// One element of an issue path: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// A single validation problem, serialized verbatim into the `validation`
/// array of a `400` error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub code: IssueCode,
    pub path: Vec<PathSegment>,
    pub message: String,
}

impl Issue {
    pub fn new(code: IssueCode, path: Vec<PathSegment>, message: impl Into<String>) -> Self {
        Self {
            code,
            path,
            message: message.into(),
        }
    }

    /// A missing top-level field.
    pub fn required(field: impl Into<PathSegment>) -> Self {
        Self::new(IssueCode::Required, vec![field.into()], "required")
    }

    /// A problem with the input as a whole rather than any one field.
    pub fn form(code: IssueCode, message: impl Into<String>) -> Self {
        Self::new(code, Vec::new(), message)
    }
}

/// Issues grouped the way they are reported to clients.
///
/// Field errors are keyed by the first path segment, in order of first
/// appearance; issues with an empty path are form errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flattened {
    pub form_errors: Vec<String>,
    pub field_errors: Vec<(String, Vec<String>)>,
}

/// A failed validation carrying every [`Issue`] found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed: {}", render_message(.issues))]
pub struct ValidationError {
    issues: Vec<Issue>,
}

impl ValidationError {
    pub fn new(issues: Vec<Issue>) -> Self {
        Self { issues }
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn into_issues(self) -> Vec<Issue> {
        self.issues
    }

    /// Groups issues into field-level and form-level messages.
    pub fn flatten(&self) -> Flattened {
        flatten_issues(&self.issues)
    }

    /// The client-facing summary.
    ///
    /// Each field renders as `field (msg1,msg2)` and each form error as
    /// `index (msg)`; field errors come first and entries are joined with `", "`.
    pub fn message(&self) -> String {
        render_message(&self.issues)
    }
}

fn flatten_issues(issues: &[Issue]) -> Flattened {
    let mut flat = Flattened::default();
    for issue in issues {
        let Some(first) = issue.path.first() else {
            flat.form_errors.push(issue.message.clone());
            continue;
        };

        let field = first.to_string();
        match flat.field_errors.iter_mut().find(|(name, _)| *name == field) {
            Some((_, messages)) => messages.push(issue.message.clone()),
            None => flat.field_errors.push((field, vec![issue.message.clone()])),
        }
    }
    flat
}

fn render_message(issues: &[Issue]) -> String {
    let flat = flatten_issues(issues);
    let fields = flat
        .field_errors
        .iter()
        .map(|(field, messages)| format!("{field} ({})", messages.join(",")));
    let forms = flat
        .form_errors
        .iter()
        .enumerate()
        .map(|(index, message)| format!("{index} ({message})"));
    fields.chain(forms).collect::<Vec<_>>().join(", ")
}

impl From<Issue> for ValidationError {
    fn from(issue: Issue) -> Self {
        Self::new(vec![issue])
    }
}
