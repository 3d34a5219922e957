//! Manifest dispatch: the middleware that turns a manifest entry into a response.
//!
//! For every request the [`Dispatcher`] fetches the current manifest, computes
//! the lookup key (`HEAD` is looked up as `GET`) and, on a hit, builds an
//! [`Invocation`] and awaits the handler. The result is mapped to exactly one
//! response:
//!
//! | Outcome                         | Response                                   |
//! |---------------------------------|--------------------------------------------|
//! | value, request was `HEAD`       | `204`, empty body                          |
//! | value                           | `200`, value as JSON                       |
//! | [`Failure::Validation`]         | `400`, message plus `validation` issues    |
//! | [`Failure::Http`]               | exception status and message               |
//! | [`Failure::Unclassified`]       | `500`, generic body; cause is only logged  |
//!
//! A miss is not an error: the dispatcher does no response work and hands
//! the request to the rest of the chain.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::context::{Context, Invocation};
use crate::http::{Method, Response, StatusCode};
use crate::manifest::{CachedProvider, IntoManifestProvider, ManifestProvider, lookup_key};
use crate::middleware::{Middleware, Next, Pipeline};

mod config;
mod error;

pub use config::{
    AfterResponse, DispatchConfig, ENV_AFTER_RESPONSE, ENV_HANDLER_TIMEOUT_MS,
    ENV_MANIFEST_TTL_MS, ParseAfterResponseError,
};
pub use error::{ErrorResponse, Failure, GENERIC_ERROR_MESSAGE, HttpException};

/// Marker left in the request extensions once the dispatcher has answered.
///
/// Middleware running after the dispatcher (with [`AfterResponse::Continue`])
/// can check for it to tell that the request was already handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    /// The lookup key the dispatcher answered for.
    pub key: String,
    /// Status of the response that will be sent.
    pub status: StatusCode,
}

#[derive(Debug, Error)]
#[error("route handler did not settle within {0:?}")]
struct HandlerTimeout(Duration);

/// Middleware that dispatches requests to manifest handlers.
///
/// # Examples
///
/// ```rust
/// use fileroute::dispatch::{Dispatcher, Failure};
/// use fileroute::manifest::{Manifest, sync_handler};
/// use fileroute::middleware::Pipeline;
/// use fileroute::{Request, StatusCode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut manifest = Manifest::new();
/// manifest.get("/ping", sync_handler(|_| Ok::<_, Failure>("pong")));
///
/// let pipeline = Pipeline::new().with(Dispatcher::new(manifest));
/// let (request, _) = Request::parse(b"GET /ping HTTP/1.1\r\n\r\n").unwrap();
/// let response = pipeline.handle(request).await;
///
/// assert_eq!(response.status(), StatusCode::OK);
/// assert_eq!(response.body_content(), br#""pong""#);
/// # }
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    provider: Arc<dyn ManifestProvider>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(provider: impl IntoManifestProvider) -> Self {
        Self::with_config(provider, DispatchConfig::default())
    }

    /// Creates a dispatcher with explicit settings.
    ///
    /// When `config.manifest_ttl` is set the provider is wrapped in a
    /// [`CachedProvider`].
    pub fn with_config(provider: impl IntoManifestProvider, config: DispatchConfig) -> Self {
        let provider = provider.into_provider();
        let provider: Arc<dyn ManifestProvider> = match config.manifest_ttl {
            Some(ttl) => Arc::new(CachedProvider::new(provider, ttl)),
            None => Arc::new(provider),
        };
        Self { provider, config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Produces the response for `ctx`, or `None` if no manifest entry matches.
    ///
    /// Never touches the rest of the middleware chain; see the [`Middleware`]
    /// impl for that.
    pub async fn respond(&self, ctx: &Context) -> Option<Response> {
        let manifest = match self.provider.manifest().await {
            Ok(manifest) => manifest,
            Err(e) => {
                error!(error = %e, "failed to load route manifest");
                return Some(generic_error_response());
            }
        };

        let request = ctx.request();
        let key = lookup_key(request.method(), request.path());
        let Some(handler) = manifest.lookup(&key) else {
            debug!(key = %key, "no manifest entry, passing through");
            return None;
        };

        let invocation = Invocation::new(key.as_str(), ctx);
        let response_headers = invocation.response_headers().clone();
        debug!(key = %key, "dispatching to route handler");

        let outcome = match self.config.handler_timeout {
            Some(limit) => tokio::time::timeout(limit, handler(invocation))
                .await
                .unwrap_or_else(|_| Err(Failure::unclassified(HandlerTimeout(limit)))),
            None => handler(invocation).await,
        };

        let mut response = match outcome {
            Ok(_) if *request.method() == Method::Head => Response::new(StatusCode::NO_CONTENT),
            Ok(value) => json_response(StatusCode::OK, &value),
            Err(failure) => failure_response(&key, failure),
        };
        response.merge_headers(response_headers.take());
        Some(response)
    }
}

impl Middleware for Dispatcher {
    fn handle(&self, mut ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let dispatcher = self.clone();
        Box::pin(async move {
            let Some(response) = dispatcher.respond(&ctx).await else {
                return next.run(ctx).await;
            };

            if dispatcher.config.after_response == AfterResponse::Continue {
                let key = lookup_key(ctx.request().method(), ctx.request().path());
                ctx.extensions_mut().insert(Dispatched {
                    key,
                    status: response.status(),
                });
                // The route has answered; downstream output is dropped.
                next.run(ctx).await;
            }

            response
        })
    }
}

/// Appends a [`Dispatcher`] for `provider` to `pipeline`.
///
/// # Examples
///
/// ```rust
/// use fileroute::dispatch::use_router;
/// use fileroute::manifest::SharedManifest;
/// use fileroute::middleware::{LoggerMiddleware, Pipeline};
///
/// let routes = SharedManifest::default();
/// let pipeline = use_router(Pipeline::new().with(LoggerMiddleware), routes.clone());
/// assert_eq!(pipeline.len(), 2);
/// ```
pub fn use_router(pipeline: Pipeline, provider: impl IntoManifestProvider) -> Pipeline {
    use_router_with_config(pipeline, provider, DispatchConfig::default())
}

/// Like [`use_router`], with explicit dispatch settings.
pub fn use_router_with_config(
    pipeline: Pipeline,
    provider: impl IntoManifestProvider,
    config: DispatchConfig,
) -> Pipeline {
    pipeline.with(Dispatcher::with_config(provider, config))
}

fn failure_response(key: &str, failure: Failure) -> Response {
    match &failure {
        Failure::Validation(e) => {
            warn!(key, status = 400, error = %e, "request failed validation");
        }
        Failure::Http(e) => {
            warn!(key, status = e.code().as_u16(), message = e.message(), "route raised HTTP exception");
        }
        Failure::Unclassified(e) => {
            error!(key, error = %e, "route handler failed");
        }
    }
    let body = ErrorResponse::from(failure);
    json_response(body.status, &body)
}

fn json_response<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Response {
    Response::json(status, body).unwrap_or_else(|e| {
        error!(error = %e, "failed to serialize response body");
        generic_error_response()
    })
}

fn generic_error_response() -> Response {
    let body = ErrorResponse::generic();
    Response::json(body.status, &body).unwrap_or_else(|_| {
        Response::new(StatusCode::INTERNAL_SERVER_ERROR).body(GENERIC_ERROR_MESSAGE)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Request;
    use crate::context::Parameters;
    use crate::manifest::{
        Manifest, ManifestError, SharedManifest, provider_fn, sync_handler,
    };
    use crate::middleware::{MiddlewareHandler, middleware_fn};
    use crate::validation::{JsonSchema, Typed};
    use serde::Deserialize;
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const GENERIC_BODY: &str = r#"{"status":500,"message":"Internal Server Error"}"#;

    fn request(raw: &str) -> Request {
        Request::parse(raw.as_bytes()).unwrap().0
    }

    fn get(path: &str) -> Request {
        request(&format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n"))
    }

    fn json_body(response: &Response) -> Value {
        serde_json::from_slice(response.body_content()).unwrap()
    }

    fn teapot() -> StatusCode {
        StatusCode::from_u16(418).unwrap()
    }

    /// Terminal middleware answering 418 and counting how often it ran.
    fn downstream(hits: Arc<AtomicUsize>) -> MiddlewareHandler {
        middleware_fn(move |_ctx: Context, _next: Next| {
            hits.fetch_add(1, Ordering::SeqCst);
            async { Response::new(teapot()) }
        })
    }

    fn id_schema() -> JsonSchema {
        JsonSchema::new(&json!({
            "type": "object",
            "required": ["id"],
            "properties": { "id": { "type": "string" } }
        }))
        .unwrap()
    }

    /// `GET /` echoes a required query `id`; `GET /users` always rejects.
    fn example_manifest() -> Manifest {
        let schema = id_schema();
        let mut manifest = Manifest::new();
        manifest.get(
            "/",
            sync_handler(move |inv| Ok::<_, Failure>(inv.use_query(&schema)?)),
        );
        manifest.get(
            "/users",
            sync_handler(|_| {
                Err::<(), _>(HttpException::bad_request("Test exception is bad").into())
            }),
        );
        manifest
    }

    fn counting_route(calls: Arc<AtomicUsize>) -> Manifest {
        let mut manifest = Manifest::new();
        manifest.get(
            "/count",
            sync_handler(move |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, Failure>(json!({ "calls": n }))
            }),
        );
        manifest
    }

    fn pipeline(dispatcher: Dispatcher, hits: &Arc<AtomicUsize>) -> Pipeline {
        Pipeline::new()
            .with(dispatcher)
            .with_handler(downstream(Arc::clone(hits)))
    }

    #[tokio::test]
    async fn matched_route_runs_handler_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hits = Arc::new(AtomicUsize::new(0));
        let app = pipeline(Dispatcher::new(counting_route(Arc::clone(&calls))), &hits);

        let response = app.handle(get("/count")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(&response), json!({"calls": 1}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            response.headers().get("content-type"),
            Some("application/json; charset=utf-8")
        );
    }

    #[tokio::test]
    async fn unmatched_request_passes_through() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = pipeline(Dispatcher::new(example_manifest()), &hits);

        let response = app.handle(get("/missing")).await;

        assert_eq!(response.status(), teapot());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lookup_is_exact() {
        let dispatcher = Dispatcher::new(example_manifest());
        for path in ["/users/", "/Users", "/users/1"] {
            let ctx = Context::new(get(path));
            assert!(dispatcher.respond(&ctx).await.is_none(), "{path} matched");
        }
        let post = Context::new(request("POST /users HTTP/1.1\r\n\r\n"));
        assert!(dispatcher.respond(&post).await.is_none());
    }

    #[tokio::test]
    async fn head_answers_no_content() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hits = Arc::new(AtomicUsize::new(0));
        let app = pipeline(Dispatcher::new(counting_route(Arc::clone(&calls))), &hits);

        let response = app
            .handle(request("HEAD /count HTTP/1.1\r\n\r\n"))
            .await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.body_content().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn head_failure_maps_like_get() {
        let dispatcher = Dispatcher::new(example_manifest());

        let response = dispatcher
            .respond(&Context::new(request("HEAD /users HTTP/1.1\r\n\r\n")))
            .await
            .unwrap();

        // The server leaves the body off the wire for HEAD.
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.body_content(),
            br#"{"status":400,"message":"Test exception is bad"}"#
        );
    }

    #[tokio::test]
    async fn validation_failure_is_bad_request() {
        let dispatcher = Dispatcher::new(example_manifest());

        let response = dispatcher.respond(&Context::new(get("/"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(&response),
            json!({
                "status": 400,
                "message": "id (required)",
                "validation": [{"code": "required", "path": ["id"], "message": "required"}]
            })
        );
    }

    #[tokio::test]
    async fn valid_query_is_echoed() {
        let dispatcher = Dispatcher::new(example_manifest());
        let response = dispatcher
            .respond(&Context::new(get("/?id=a%20b")))
            .await
            .unwrap();
        assert_eq!(json_body(&response), json!({"id": "a b"}));
    }

    #[tokio::test]
    async fn http_exception_body_is_exact() {
        let dispatcher = Dispatcher::new(example_manifest());

        let response = dispatcher.respond(&Context::new(get("/users"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.body_content(),
            br#"{"status":400,"message":"Test exception is bad"}"#
        );
    }

    #[tokio::test]
    async fn unclassified_failure_hides_details() {
        let mut manifest = Manifest::new();
        manifest.get(
            "/boom",
            sync_handler(|_| Err::<(), _>(Failure::unclassified("db password=hunter2 rejected"))),
        );
        let dispatcher = Dispatcher::new(manifest);

        let response = dispatcher.respond(&Context::new(get("/boom"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body_content(), GENERIC_BODY.as_bytes());
    }

    #[tokio::test]
    async fn identical_requests_yield_identical_bodies() {
        let dispatcher = Dispatcher::new(example_manifest());
        let first = dispatcher.respond(&Context::new(get("/?id=7"))).await.unwrap();
        let second = dispatcher.respond(&Context::new(get("/?id=7"))).await.unwrap();
        assert_eq!(first.body_content(), second.body_content());
    }

    #[tokio::test]
    async fn continue_runs_downstream_but_keeps_route_response() {
        let seen = Arc::new(Mutex::new(None));
        let recorder = {
            let seen = Arc::clone(&seen);
            middleware_fn(move |ctx: Context, _next: Next| {
                *seen.lock().unwrap() = ctx.extensions().get::<Dispatched>().cloned();
                async { Response::new(teapot()) }
            })
        };
        let app = Pipeline::new()
            .with(Dispatcher::new(example_manifest()))
            .with_handler(recorder);

        let response = app.handle(get("/users")).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(Dispatched {
                key: "GET /users".into(),
                status: StatusCode::BAD_REQUEST,
            })
        );
    }

    #[tokio::test]
    async fn stop_skips_downstream() {
        let hits = Arc::new(AtomicUsize::new(0));
        let config = DispatchConfig::default().after_response(AfterResponse::Stop);
        let app = pipeline(Dispatcher::with_config(example_manifest(), config), &hits);

        let response = app.handle(get("/?id=1")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let missed = app.handle(get("/nowhere")).await;
        assert_eq!(missed.status(), teapot());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn replaced_manifest_applies_to_later_requests() {
        let routes = SharedManifest::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let app = use_router(Pipeline::new(), routes.clone())
            .with_handler(downstream(Arc::clone(&hits)));

        assert_eq!(app.handle(get("/users")).await.status(), teapot());
        routes.replace(example_manifest());
        assert_eq!(app.handle(get("/users")).await.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_config_caches_manifest() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let provider = provider_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Arc::new(example_manifest())) }
        });
        let config = DispatchConfig::default().manifest_ttl(Duration::from_secs(30));
        let dispatcher = Dispatcher::with_config(provider, config);

        for _ in 0..3 {
            dispatcher.respond(&Context::new(get("/users"))).await.unwrap();
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        dispatcher.respond(&Context::new(get("/users"))).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn manifest_is_fetched_per_request_by_default() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let dispatcher = Dispatcher::new(provider_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Arc::new(Manifest::new())) }
        }));
        dispatcher.respond(&Context::new(get("/"))).await;
        dispatcher.respond(&Context::new(get("/"))).await;
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let mut manifest = Manifest::new();
        manifest.get("/slow", |_inv: Invocation| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, Failure>("late")
        });
        let config = DispatchConfig::default().handler_timeout(Duration::from_millis(50));
        let dispatcher = Dispatcher::with_config(manifest, config);

        let response = dispatcher.respond(&Context::new(get("/slow"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body_content(), GENERIC_BODY.as_bytes());
    }

    #[tokio::test]
    async fn manifest_failure_is_generic_error() {
        let hits = Arc::new(AtomicUsize::new(0));
        let provider = provider_fn(|| async {
            Err(ManifestError::Unavailable("routes still compiling".into()))
        });
        let app = pipeline(Dispatcher::new(provider), &hits);

        let response = app.handle(get("/")).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body_content(), GENERIC_BODY.as_bytes());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_headers_are_merged() {
        let mut manifest = Manifest::new();
        manifest.get(
            "/cached",
            sync_handler(|inv| {
                inv.response_headers().insert("Cache-Control", "max-age=60");
                Ok::<_, Failure>(json!([]))
            }),
        );
        manifest.get(
            "/limited",
            sync_handler(|inv| {
                inv.response_headers().insert("Retry-After", "30");
                Err::<(), _>(HttpException::too_many_requests("slow down").into())
            }),
        );
        let dispatcher = Dispatcher::new(manifest);

        let ok = dispatcher.respond(&Context::new(get("/cached"))).await.unwrap();
        assert_eq!(ok.headers().get("cache-control"), Some("max-age=60"));

        let limited = dispatcher.respond(&Context::new(get("/limited"))).await.unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.headers().get("retry-after"), Some("30"));
    }

    #[tokio::test]
    async fn path_parameters_come_from_context() {
        #[derive(Deserialize)]
        struct UserPath {
            id: String,
        }

        let mut manifest = Manifest::new();
        manifest.get(
            "/users/42",
            sync_handler(|inv| {
                let path = inv.use_params(&Typed::<UserPath>::new())?;
                Ok::<_, Failure>(json!({ "id": path.id }))
            }),
        );
        let mut params = Parameters::new();
        params.insert("id", "42");
        let app = Pipeline::new().with(Dispatcher::new(manifest));

        let response = app
            .handle_context(Context::with_params(get("/users/42"), params))
            .await;

        assert_eq!(json_body(&response), json!({"id": "42"}));
    }

    #[tokio::test]
    async fn client_ip_reaches_handler() {
        let mut manifest = Manifest::new();
        manifest.get(
            "/ip",
            sync_handler(|inv| Ok::<_, Failure>(inv.ip_address().map(|ip| ip.to_string()))),
        );
        let dispatcher = Dispatcher::new(manifest);
        let ctx = Context::new(request(
            "GET /ip HTTP/1.1\r\nX-Forwarded-For: unknown, 203.0.113.7, 10.0.0.1\r\n\r\n",
        ));

        let response = dispatcher.respond(&ctx).await.unwrap();

        assert_eq!(json_body(&response), json!("203.0.113.7"));
    }

    #[tokio::test]
    async fn post_body_is_deserialized() {
        #[derive(Debug, Deserialize, Serialize)]
        struct NewUser {
            name: String,
        }

        let mut manifest = Manifest::new();
        manifest.post(
            "/users",
            sync_handler(|inv| Ok::<_, Failure>(inv.use_body(&Typed::<NewUser>::new())?)),
        );
        let dispatcher = Dispatcher::new(manifest);

        let created = dispatcher
            .respond(&Context::new(request(
                "POST /users HTTP/1.1\r\nContent-Length: 14\r\n\r\n{\"name\":\"ada\"}",
            )))
            .await
            .unwrap();
        assert_eq!(json_body(&created), json!({"name": "ada"}));

        let missing = dispatcher
            .respond(&Context::new(request("POST /users HTTP/1.1\r\n\r\n")))
            .await
            .unwrap();
        assert_eq!(json_body(&missing)["message"], "name (required)");

        let malformed = dispatcher
            .respond(&Context::new(request(
                "POST /users HTTP/1.1\r\nContent-Length: 6\r\n\r\n{name:",
            )))
            .await
            .unwrap();
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
        let message = json_body(&malformed)["message"].as_str().unwrap().to_owned();
        assert!(message.starts_with("0 (malformed JSON body"), "{message}");
    }
}
