//! # fileroute
//!
//! File-based route dispatch for an async HTTP/1.1 server.
//!
//! A build step turns route files into a [`Manifest`]: a table keyed by
//! `"METHOD /path"`. The [`Dispatcher`] middleware looks each request up in the
//! current manifest, hands the matched handler an [`Invocation`] with
//! schema-validated accessors for params, query and body, and maps whatever the
//! handler produces to a single JSON response.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fileroute::context::Invocation;
//! use fileroute::dispatch::{Failure, HttpException, use_router};
//! use fileroute::manifest::Manifest;
//! use fileroute::middleware::{LoggerMiddleware, Pipeline};
//! use fileroute::server::Server;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut manifest = Manifest::new();
//!     manifest.get("/", |_inv: Invocation| async { Ok::<_, Failure>(json!({"success": true})) });
//!     manifest.get("/users", |_inv: Invocation| async {
//!         Err::<(), _>(HttpException::bad_request("Test exception is bad").into())
//!     });
//!
//!     let pipeline = use_router(Pipeline::new().with(LoggerMiddleware), manifest);
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server.serve(pipeline).await?;
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod dispatch;
pub mod http;
pub mod manifest;
pub mod middleware;
pub mod server;
pub mod validation;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use context::{Context, Invocation};
pub use dispatch::{DispatchConfig, Dispatcher, Failure, HttpException, use_router};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use manifest::{IntoManifestProvider, Manifest, ManifestProvider, SharedManifest};
pub use middleware::{Middleware, Next, Pipeline};
pub use server::{Server, ServerError};
pub use validation::{JsonSchema, Schema, Typed, ValidationError};
