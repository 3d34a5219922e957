//! The per-request view handed to route handlers.

use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use super::{Context, client_ip};
use crate::http::{Headers, Request};
use crate::validation::{Issue, IssueCode, Schema, ValidationError};

/// Everything a route handler receives for one request.
///
/// Built fresh by the dispatcher for each matched request and moved into the
/// handler, so it never outlives the request. The validation accessors read
/// the raw request without modifying it.
///
/// # Examples
///
/// ```
/// use fileroute::context::{Context, Invocation};
/// use fileroute::validation::{JsonSchema, Schema};
/// use fileroute::Request;
/// use serde_json::json;
///
/// let (request, _) = Request::parse(b"GET /?id=42 HTTP/1.1\r\n\r\n").unwrap();
/// let invocation = Invocation::new("GET /", &Context::new(request));
///
/// let schema = JsonSchema::new(&json!({"required": ["id"]})).unwrap();
/// assert_eq!(invocation.use_query(&schema).unwrap(), json!({"id": "42"}));
/// assert_eq!(invocation.route(), "GET /");
/// ```
pub struct Invocation {
    route: String,
    request: Arc<Request>,
    params: Value,
    ip_address: Option<IpAddr>,
    response_headers: ResponseHeaders,
}

impl Invocation {
    /// Binds an invocation for the manifest entry `route` to the request in `ctx`.
    pub fn new(route: impl Into<String>, ctx: &Context) -> Self {
        let request = ctx.shared_request();
        let ip_address = client_ip(&request);
        Self {
            route: route.into(),
            params: ctx.params().to_json(),
            request,
            ip_address,
            response_headers: ResponseHeaders::default(),
        }
    }

    /// The manifest key that matched, e.g. `"GET /users"`.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// The request path as sent by the client.
    pub fn path(&self) -> &str {
        self.request.path()
    }

    /// Validates the path parameters (an object of strings).
    pub fn use_params<S: Schema>(&self, schema: &S) -> Result<S::Output, ValidationError> {
        schema.parse(&self.params)
    }

    /// Validates the decoded query string (an object of strings and string arrays).
    pub fn use_query<S: Schema>(&self, schema: &S) -> Result<S::Output, ValidationError> {
        schema.parse(&self.request.query_json())
    }

    /// Validates the JSON body; an absent body is validated as `{}`.
    ///
    /// A body that is not valid JSON fails with a single form-level issue.
    pub fn use_body<S: Schema>(&self, schema: &S) -> Result<S::Output, ValidationError> {
        let raw = self.request.body_json().map_err(|e| {
            Issue::form(IssueCode::InvalidJson, format!("malformed JSON body: {e}"))
        })?;
        schema.parse(&raw)
    }

    /// The resolved client address, if any source yielded one.
    pub fn ip_address(&self) -> Option<IpAddr> {
        self.ip_address
    }

    /// The underlying request, for handlers that need headers or raw bytes.
    pub fn raw_request(&self) -> &Request {
        &self.request
    }

    /// Headers to add to whatever response the dispatcher emits for this request.
    ///
    /// Status and body are decided by the dispatcher from the handler's
    /// result; only headers can be contributed here.
    pub fn response_headers(&self) -> &ResponseHeaders {
        &self.response_headers
    }
}

/// A shared, append-only set of headers a handler contributes to its response.
///
/// Clones refer to the same set, so the dispatcher keeps one and reads it
/// back after the handler settles.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeaders {
    inner: Arc<Mutex<Headers>>,
}

impl ResponseHeaders {
    /// Appends a header value.
    pub fn insert(&self, name: impl Into<String>, value: impl Into<String>) {
        self.lock().insert(name, value);
    }

    /// Replaces any previous values for `name`.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.lock().set(name, value);
    }

    /// Removes and returns everything contributed so far.
    pub fn take(&self) -> Headers {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Headers> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
