use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{Issue, IssueCode, JsonSchema, Schema, ValidationError};

/// Deserializes raw request data into `T`.
///
/// When built with [`Typed::with_schema`] (or [`JsonSchema::deserialize`]) the
/// JSON Schema runs first and reports every violation; deserialization only
/// runs on input that passed it.
///
/// `serde` reports the first problem it meets, so a bare `Typed<T>` yields at
/// most one issue. Missing fields become `required` field errors; other
/// mismatches are form errors because `serde_json` does not expose the path.
///
/// # Examples
///
/// ```
/// use fileroute::validation::{Schema, Typed};
/// use serde::Deserialize;
/// use serde_json::json;
///
/// #[derive(Debug, Deserialize)]
/// struct Lookup {
///     id: String,
/// }
///
/// let lookup = Typed::<Lookup>::new().parse(&json!({"id": "7"})).unwrap();
/// assert_eq!(lookup.id, "7");
///
/// let err = Typed::<Lookup>::new().parse(&json!({})).unwrap_err();
/// assert_eq!(err.message(), "id (required)");
/// ```
pub struct Typed<T> {
    schema: Option<JsonSchema>,
    _output: PhantomData<fn() -> T>,
}

impl<T> Typed<T> {
    pub fn new() -> Self {
        Self {
            schema: None,
            _output: PhantomData,
        }
    }

    pub fn with_schema(schema: JsonSchema) -> Self {
        Self {
            schema: Some(schema),
            _output: PhantomData,
        }
    }
}

impl<T> Default for Typed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Schema for Typed<T> {
    type Output = T;

    fn parse(&self, raw: &Value) -> Result<T, ValidationError> {
        if let Some(schema) = &self.schema {
            schema.parse(raw)?;
        }
        T::deserialize(raw).map_err(|e| ValidationError::from(issue_from_serde(&e)))
    }
}

fn issue_from_serde(err: &serde_json::Error) -> Issue {
    let message = err.to_string();
    if let Some(field) = backticked(&message, "missing field `") {
        return Issue::required(field);
    }
    if let Some(field) = backticked(&message, "unknown field `") {
        return Issue::new(
            IssueCode::InvalidValue,
            vec![field.into()],
            "unrecognized field",
        );
    }
    Issue::form(IssueCode::InvalidType, message)
}

fn backticked<'a>(message: &'a str, prefix: &str) -> Option<&'a str> {
    message.strip_prefix(prefix)?.split('`').next()
}
