//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler function
//! or a middleware [`Pipeline`]. Supports HTTP/1.1 persistent connections
//! (keep-alive) out of the box and stamps each request with the peer address.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    Method, StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::middleware::Pipeline;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The fileroute HTTP server.
///
/// Binds to a TCP address and dispatches incoming HTTP/1.1 requests to a
/// handler function or a [`Pipeline`].
///
/// # Examples
///
/// ```rust,no_run
/// use fileroute::dispatch::use_router;
/// use fileroute::manifest::Manifest;
/// use fileroute::middleware::{LoggerMiddleware, Pipeline};
/// use fileroute::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pipeline = use_router(Pipeline::new().with(LoggerMiddleware), Manifest::new());
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.serve(pipeline).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections and dispatching requests to `handler`.
    ///
    /// The handler receives a [`Request`] and must return a [`Future`] that
    /// resolves to a [`Response`]. The handler is wrapped in an [`Arc`] and
    /// shared across all spawned Tokio tasks, so it must be `Send + Sync + 'static`.
    ///
    /// This method runs until the process is terminated or an unrecoverable
    /// listener error occurs.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.run_until(handler, std::future::pending()).await
    }

    /// Serves every request through `pipeline` until the process exits.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn serve(self, pipeline: Pipeline) -> Result<(), ServerError> {
        self.serve_until(pipeline, std::future::pending()).await
    }

    /// Like [`serve`](Self::serve), but stops accepting once `shutdown` resolves.
    ///
    /// Connections already accepted keep running on their own tasks.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn serve_until(
        self,
        pipeline: Pipeline,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<(), ServerError> {
        self.run_until(
            move |request: Request| {
                let pipeline = pipeline.clone();
                async move { pipeline.handle(request).await }
            },
            shutdown,
        )
        .await
    }

    /// Like [`run`](Self::run), but stops accepting once `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run_until<H, F>(
        self,
        handler: H,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "fileroute listening");
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                () = &mut shutdown => {
                    info!(address = %self.local_addr, "shutdown requested, no longer accepting");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection or signals
/// `Connection: close`.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    // Pipelined requests may already be buffered after a response is written.
    let mut need_read = true;

    loop {
        if need_read {
            let bytes_read = stream.read_buf(&mut buf).await?;
            if bytes_read == 0 {
                debug!(peer = %peer_addr, "connection closed by peer");
                break;
            }
        }
        need_read = true;

        // Guard against excessively large requests.
        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large, sending 413");
            let response = Response::new(StatusCode::PAYLOAD_TOO_LARGE)
                .body("Request entity too large")
                .keep_alive(false);
            stream.write_all(&encode(response, starts_with_head(&buf))).await?;
            break;
        }

        // Attempt to parse the buffered data as an HTTP request.
        let (mut request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => {
                // Headers not yet fully received; read more data.
                continue;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = Response::new(StatusCode::BAD_REQUEST)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&encode(response, starts_with_head(&buf))).await?;
                break;
            }
        };

        // Wait for the full body to arrive if Content-Length is set.
        let content_length = request.content_length().unwrap_or(0);
        let total_needed = body_offset + content_length;
        if buf.len() < total_needed {
            continue;
        }

        let head = *request.method() == Method::Head;
        request.truncate_body(content_length);
        request.set_peer_addr(peer_addr);

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let client_keep_alive = request.is_keep_alive();
        let response = handler(request).await;
        let keep_alive = client_keep_alive && response.is_keep_alive();
        stream.write_all(&encode(response.keep_alive(keep_alive), head)).await?;
        stream.flush().await?;

        // Drop the consumed request bytes from the buffer.
        let _ = buf.split_to(total_needed);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
        need_read = buf.is_empty();
    }

    Ok(())
}

/// Serializes `response`, leaving the body off when answering `HEAD`.
fn encode(response: Response, head: bool) -> BytesMut {
    if head {
        response.into_head_bytes()
    } else {
        response.into_bytes()
    }
}

fn starts_with_head(buf: &[u8]) -> bool {
    buf.starts_with(b"HEAD ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Failure, HttpException, use_router};
    use crate::manifest::{Manifest, sync_handler};
    use tokio::sync::oneshot;

    async fn roundtrip(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    fn pipeline() -> Pipeline {
        let mut manifest = Manifest::new();
        manifest.get(
            "/ip",
            sync_handler(|inv| Ok::<_, Failure>(inv.ip_address().map(|ip| ip.to_string()))),
        );
        manifest.get(
            "/users",
            sync_handler(|_| {
                Err::<(), _>(HttpException::bad_request("Test exception is bad").into())
            }),
        );
        use_router(Pipeline::new(), manifest)
    }

    #[tokio::test]
    async fn serves_pipeline_over_tcp() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve_until(pipeline(), async {
            let _ = stopped.await;
        }));

        let users = roundtrip(addr, "GET /users HTTP/1.1\r\nConnection: close\r\n\r\n").await;
        assert!(users.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{users}");
        assert!(users.contains("Connection: close\r\n"), "{users}");
        assert!(users.ends_with(r#"{"status":400,"message":"Test exception is bad"}"#));

        let ip = roundtrip(addr, "GET /ip HTTP/1.1\r\nConnection: close\r\n\r\n").await;
        assert!(ip.ends_with(r#""127.0.0.1""#), "{ip}");

        let missing = roundtrip(addr, "GET /nope HTTP/1.1\r\nConnection: close\r\n\r\n").await;
        assert!(missing.starts_with("HTTP/1.1 404 Not Found\r\n"), "{missing}");

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn head_responses_carry_no_body() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve_until(pipeline(), async {
            let _ = stopped.await;
        }));

        let missing = roundtrip(addr, "HEAD /nope HTTP/1.1\r\nConnection: close\r\n\r\n").await;
        assert!(missing.starts_with("HTTP/1.1 404 Not Found\r\n"), "{missing}");
        assert!(missing.ends_with("Content-Length: 9\r\n\r\n"), "{missing}");

        // A failing route answers HEAD with the GET headers, then the
        // connection stays usable for the next request.
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"HEAD /users HTTP/1.1\r\n\r\n").await.unwrap();
        let mut head = Vec::new();
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            assert_ne!(stream.read_buf(&mut head).await.unwrap(), 0);
        }
        stream
            .write_all(b"GET /nope HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        stream.read_to_end(&mut head).await.unwrap();
        let text = String::from_utf8(head).unwrap();
        let (first, rest) = text.split_once("\r\n\r\n").unwrap();
        assert!(first.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{text}");
        assert!(first.ends_with("Content-Length: 48"), "{text}");
        assert!(rest.starts_with("HTTP/1.1 404 Not Found\r\n"), "{text}");

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn pipelined_requests_are_answered_in_order() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve_until(pipeline(), async {
            let _ = stopped.await;
        }));

        let both = roundtrip(
            addr,
            "GET /ip HTTP/1.1\r\n\r\nGET /nope HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .await;
        let (first, second) = both.split_once("\"127.0.0.1\"").unwrap();
        assert!(first.starts_with("HTTP/1.1 200 OK\r\n"), "{both}");
        assert!(first.contains("Connection: keep-alive\r\n"), "{both}");
        assert!(second.starts_with("HTTP/1.1 404 Not Found\r\n"), "{both}");
        assert!(second.contains("Connection: close\r\n"), "{both}");

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_request_is_rejected() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve_until(pipeline(), async {
            let _ = stopped.await;
        }));

        let response = roundtrip(addr, "GET\0 / HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{response}");

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bind_failure_names_address() {
        let first = Server::bind("127.0.0.1:0").await.unwrap();
        let taken = first.local_addr().to_string();
        let err = Server::bind(&taken).await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
        assert!(err.to_string().starts_with(&format!("failed to bind to {taken}")));
    }
}
