//! Per-request context: request data, path parameters, and extensions.
//!
//! [`Context`] is what flows through the middleware chain. The dispatcher
//! derives a route-facing [`Invocation`] from it once a manifest entry matches.

use std::{
    any::{Any, TypeId},
    collections::BTreeMap,
    collections::HashMap,
    sync::Arc,
};

use serde_json::Value;

use crate::Request;

pub mod client_ip;
pub mod invocation;

pub use client_ip::client_ip;
pub use invocation::{Invocation, ResponseHeaders};

/// Type-erased request extensions map, used to inject per-request state
/// into handlers without requiring handlers to know about each other's types.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create a new empty extensions map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous value of the same type
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Get a value from the extensions map
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Remove a value from the extensions map
    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

/// Path parameters attached to the request by upstream middleware.
///
/// Manifest lookup is exact, so nothing in this crate fills these in; a
/// router placed in front of the dispatcher may, and handlers read them
/// through [`Invocation::use_params`].
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Parameters {
    map: BTreeMap<String, String>,
}

impl Parameters {
    /// Create a new empty parameters map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value into the parameters map
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), value.into());
    }

    /// Get a value from the parameters map
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The parameters as a JSON object of strings.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.map
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }
}

/// Per-request state carried through the middleware chain.
pub struct Context {
    request: Arc<Request>,
    params: Parameters,
    extensions: Extensions,
}

impl Context {
    /// Create a new context from a request
    pub fn new(request: Request) -> Self {
        Self {
            request: Arc::new(request),
            params: Parameters::new(),
            extensions: Extensions::new(),
        }
    }

    /// Create a context with path parameters already resolved
    pub fn with_params(request: Request, params: Parameters) -> Self {
        Self {
            params,
            ..Self::new(request)
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Shared handle to the request, for state that outlives a borrow of the context.
    pub fn shared_request(&self) -> Arc<Request> {
        Arc::clone(&self.request)
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}
