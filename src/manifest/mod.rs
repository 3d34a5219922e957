//! Route manifest: the table from `"METHOD /path"` keys to route handlers.
//!
//! A manifest is produced ahead of time by whatever compiles route files and
//! is only read by the dispatcher. Keys are matched exactly:
//!
//! | Request            | Lookup key     |
//! |--------------------|----------------|
//! | `GET /users`       | `GET /users`   |
//! | `HEAD /users`      | `GET /users`   |
//! | `GET /users/`      | `GET /users/`  |
//! | `POST /Users`      | `POST /Users`  |
//!
//! There is no pattern matching, trailing-slash folding, or case folding. A
//! build step that wants dynamic segments must expand them into concrete keys.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::Method;
use crate::context::Invocation;
use crate::dispatch::Failure;

mod provider;

pub use provider::{
    CachedProvider, IntoManifestProvider, ManifestError, ManifestFuture, ManifestProvider,
    ProviderFn, SharedManifest, provider_fn,
};

/// The future returned by a [`Handler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, Failure>> + Send>>;

/// Type-erased, heap-allocated async route handler.
///
/// Handlers are stored behind `Arc<dyn Fn(…)>` so manifests can be cloned and
/// shared across tasks. In practice you never construct this type directly;
/// register functions through [`Manifest::get`], [`Manifest::insert`], and the
/// other helpers.
pub type Handler = Arc<dyn Fn(Invocation) -> HandlerFuture + Send + Sync + 'static>;

/// Conversion trait for route handler functions.
///
/// Any `Fn(Invocation) -> impl Future<Output = Result<T, Failure>>` where `T`
/// is serializable implements this trait through the blanket impl below. The
/// value is converted to JSON when the handler settles; a value that cannot be
/// represented as JSON is an unclassified failure.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler, boxing the returned future.
    fn call(&self, invocation: Invocation) -> HandlerFuture;
}

impl<H, F, T> IntoHandler for H
where
    H: Fn(Invocation) -> F + Send + Sync + 'static,
    F: Future<Output = Result<T, Failure>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    fn call(&self, invocation: Invocation) -> HandlerFuture {
        let future = (self)(invocation);
        Box::pin(async move { Ok(serde_json::to_value(future.await?)?) })
    }
}

/// Adapts a synchronous function into an [`IntoHandler`].
///
/// # Examples
///
/// ```rust
/// use fileroute::manifest::{Manifest, sync_handler};
/// use fileroute::dispatch::Failure;
///
/// let mut manifest = Manifest::new();
/// manifest.get("/health", sync_handler(|_inv| Ok::<_, Failure>("ok")));
/// assert!(manifest.lookup("GET /health").is_some());
/// ```
pub fn sync_handler<H, T>(handler: H) -> impl IntoHandler
where
    H: Fn(Invocation) -> Result<T, Failure> + Send + Sync + 'static,
    T: Serialize + Send + 'static,
{
    move |invocation: Invocation| {
        let outcome = handler(invocation);
        async move { outcome }
    }
}

/// Computes the manifest key for a request.
///
/// `HEAD` is looked up as `GET`; everything else is `"<METHOD> <path>"` verbatim.
///
/// # Examples
///
/// ```
/// use fileroute::{Method, manifest::lookup_key};
///
/// assert_eq!(lookup_key(&Method::Head, "/users"), "GET /users");
/// assert_eq!(lookup_key(&Method::Post, "/Users/"), "POST /Users/");
/// ```
pub fn lookup_key(method: &Method, path: &str) -> String {
    let method = match method {
        Method::Head => "GET",
        other => other.as_str(),
    };
    format!("{method} {path}")
}

/// An immutable-once-shared table of route handlers keyed by lookup key.
///
/// # Examples
///
/// ```rust
/// use fileroute::context::Invocation;
/// use fileroute::manifest::Manifest;
/// use fileroute::dispatch::{Failure, HttpException};
/// use serde_json::json;
///
/// let mut manifest = Manifest::new();
/// manifest.get("/", |_inv: Invocation| async {
///     Ok::<_, Failure>(json!({"success": true}))
/// });
/// manifest.get("/users", |_inv: Invocation| async {
///     Err::<(), _>(HttpException::bad_request("Test exception is bad").into())
/// });
/// assert_eq!(manifest.len(), 2);
/// ```
#[derive(Clone, Default)]
pub struct Manifest {
    routes: HashMap<String, Handler>,
}

impl Manifest {
    /// Create a new, empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a precomputed lookup key such as `"GET /users"`.
    ///
    /// The key is stored verbatim. Keys beginning with `HEAD ` are never
    /// matched because lookups normalize `HEAD` to `GET`.
    pub fn insert(&mut self, key: impl Into<String>, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |invocation: Invocation| handler.call(invocation));
        self.routes.insert(key.into(), handler);
    }

    /// Register a handler for `GET` (and therefore `HEAD`) requests to `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(&Method::Get, path, handler);
    }

    /// Register a handler for `POST` requests to `path`.
    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(&Method::Post, path, handler);
    }

    /// Register a handler for `PUT` requests to `path`.
    pub fn put(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(&Method::Put, path, handler);
    }

    /// Register a handler for `PATCH` requests to `path`.
    pub fn patch(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(&Method::Patch, path, handler);
    }

    /// Register a handler for `DELETE` requests to `path`.
    pub fn delete(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(&Method::Delete, path, handler);
    }

    /// Register a handler for `OPTIONS` requests to `path`.
    pub fn options(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(&Method::Options, path, handler);
    }

    fn add_route(&mut self, method: &Method, path: &str, handler: impl IntoHandler) {
        self.insert(lookup_key(method, path), handler);
    }

    /// Find the handler registered under `key`.
    pub fn lookup(&self, key: &str) -> Option<&Handler> {
        self.routes.get(key)
    }

    /// Iterate over the registered keys in arbitrary order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Return the number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Return `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Debug for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("Manifest").field("routes", &keys).finish()
    }
}
