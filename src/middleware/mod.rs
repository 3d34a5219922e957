//! Middleware pipeline: composable before/after request handler logic.
//!
//! This module defines the core types for building an ordered middleware stack.
//! Each middleware wraps the next layer, enabling request inspection, short-circuit
//! responses, and response decoration without coupling handlers to infrastructure
//! concerns. The manifest [`Dispatcher`](crate::dispatch::Dispatcher) is one such
//! layer.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`from_middleware`] and [`middleware_fn`]: build a [`MiddlewareHandler`]
//!   from a trait object or an async closure.
//! - [`Pipeline`]: the ordered stack a server hands each request to.
//! - [`LoggerMiddleware`]: built-in request/response logger.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{Request, Response, StatusCode, context::Context};

/// The boxed future every middleware returns.
pub type MiddlewareFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is passed to each middleware's [`Middleware::handle`] implementation.
/// Calling [`Next::run`] advances the cursor by one position and invokes the next
/// middleware (or returns a `404 Not Found` when the chain is exhausted without
/// any middleware generating a response).
///
/// `Next` is consumed on each call to [`run`](Self::run), so it cannot be called
/// more than once per middleware invocation.
///
/// # Examples
///
/// ```rust
/// use fileroute::{Response, context::Context, middleware::{Middleware, MiddlewareFuture, Next}};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

/// A type-erased, reference-counted middleware function.
///
/// Every entry in the middleware stack is stored as a `MiddlewareHandler`.
/// The [`Arc`] wrapper makes handlers cheap to clone so that [`Next`] can
/// advance through the chain without copying closures.
///
/// Construct one with [`from_middleware`] or [`middleware_fn`].
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> MiddlewareFuture + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use fileroute::middleware::{LoggerMiddleware, from_middleware};
///
/// let handler = from_middleware(Arc::new(LoggerMiddleware));
/// ```
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// Wraps an async closure as a [`MiddlewareHandler`].
///
/// # Examples
///
/// ```rust
/// use fileroute::{Response, StatusCode, middleware::{Pipeline, middleware_fn}};
///
/// let health = middleware_fn(|ctx, next| async move {
///     if ctx.request().path() == "/health" {
///         return Response::new(StatusCode::NO_CONTENT);
///     }
///     next.run(ctx).await
/// });
/// let pipeline = Pipeline::new().with_handler(health);
/// assert_eq!(pipeline.len(), 1);
/// ```
pub fn middleware_fn<F, Fut>(f: F) -> MiddlewareHandler
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |ctx: Context, next: Next| -> MiddlewareFuture { Box::pin(f(ctx, next)) })
}

impl Next {
    /// Creates a new `Next` positioned at the start of the given middleware stack.
    pub fn new(middlewares: impl Into<Arc<[MiddlewareHandler]>>) -> Self {
        Self {
            middlewares: middlewares.into(),
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// Advances the internal cursor by one, clones the handler at the current
    /// position, and awaits it. If no handler remains, no layer claimed the
    /// request and a `404 Not Found` is returned.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => Response::new(StatusCode::NOT_FOUND).body("Not Found"),
        }
    }
}

/// The core trait for all fileroute middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may:
///
/// - **Pass through**: call `next.run(ctx).await` without modification.
/// - **Short-circuit**: return a [`Response`] directly without calling `next`.
/// - **Decorate**: call `next.run(ctx).await`, inspect the response, and return
///   a modified copy.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync` because middleware is shared across
///   Tokio tasks.
/// - `handle` **must** return a pinned, `Send` future so it can be awaited across
///   `.await` points in multi-threaded runtimes.
/// - Implementations **should not** hold `&mut` references to shared state across
///   an `.await` point.
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the next middleware.
    fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture;
}

/// An ordered, immutable middleware stack.
///
/// Cloning is cheap; every clone shares the same handlers.
///
/// # Examples
///
/// ```rust
/// use fileroute::middleware::{LoggerMiddleware, Pipeline};
/// use fileroute::{Request, StatusCode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pipeline = Pipeline::new().with(LoggerMiddleware);
/// let (request, _) = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
/// assert_eq!(pipeline.handle(request).await.status(), StatusCode::NOT_FOUND);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    stack: Arc<[MiddlewareHandler]>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `middleware` after every layer added so far.
    #[must_use]
    pub fn with<M: Middleware + 'static>(self, middleware: M) -> Self {
        self.with_handler(from_middleware(Arc::new(middleware)))
    }

    /// Appends an already type-erased handler.
    #[must_use]
    pub fn with_handler(self, handler: MiddlewareHandler) -> Self {
        let mut stack = self.stack.to_vec();
        stack.push(handler);
        Self {
            stack: stack.into(),
        }
    }

    /// Runs `request` through the stack with an empty context.
    pub async fn handle(&self, request: Request) -> Response {
        self.handle_context(Context::new(request)).await
    }

    /// Runs a prepared context through the stack.
    pub async fn handle_context(&self, ctx: Context) -> Response {
        Next::new(Arc::clone(&self.stack)).run(ctx).await
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

/// Built-in middleware that logs each request's method, path, status, and duration.
///
/// Emits a single `tracing::info!` line after the downstream handler completes,
/// in the format:
///
/// ```text
/// METHOD /path - STATUS (duration)
/// ```
///
/// `LoggerMiddleware` does not short-circuit; it always delegates to the next
/// middleware and decorates the response timing after the fact.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().to_string();
            let path = ctx.request().path().to_owned();

            let response = next.run(ctx).await;

            let duration = start.elapsed();
            let status = response.status().as_u16();

            tracing::info!("{} {} - {} ({:?})", method, path, status, duration);

            response
        })
    }
}
