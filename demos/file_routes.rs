//! A two-route app wired the way a generated manifest would be.
//!
//! ```text
//! RUST_LOG=debug cargo run --example file_routes
//! curl -i 'http://127.0.0.1:8080/?id=7'
//! curl -i 'http://127.0.0.1:8080/'          # 400, id (required)
//! curl -i  http://127.0.0.1:8080/users      # every fourth call is a 400
//! curl -I  http://127.0.0.1:8080/users      # 204
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fileroute::dispatch::{DispatchConfig, Failure, HttpException, use_router_with_config};
use fileroute::manifest::{Manifest, SharedManifest, sync_handler};
use fileroute::middleware::{LoggerMiddleware, Pipeline};
use fileroute::server::Server;
use fileroute::validation::{JsonSchema, Typed};
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Deserialize)]
struct IndexQuery {
    id: String,
}

/// routes/index: `GET /` requires a string `id` in the query.
fn index_route(manifest: &mut Manifest) -> Result<(), Box<dyn std::error::Error>> {
    let query: Typed<IndexQuery> = JsonSchema::new(&json!({
        "type": "object",
        "required": ["id"],
        "properties": { "id": { "type": "string" } }
    }))?
    .deserialize();

    manifest.get(
        "/",
        sync_handler(move |inv| {
            let IndexQuery { id } = inv.use_query(&query)?;
            Ok::<_, Failure>(json!({ "success": { "id": id } }))
        }),
    );
    Ok(())
}

/// routes/users: `GET /users` succeeds, except every fourth call.
fn users_route(manifest: &mut Manifest) {
    let calls = Arc::new(AtomicUsize::new(0));
    manifest.get(
        "/users",
        sync_handler(move |_| {
            if calls.fetch_add(1, Ordering::Relaxed) % 4 == 3 {
                return Err(HttpException::bad_request("Test exception is bad").into());
            }
            Ok::<_, Failure>(json!({ "success": true }))
        }),
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut manifest = Manifest::new();
    index_route(&mut manifest)?;
    users_route(&mut manifest);

    let routes = SharedManifest::new(manifest);
    let pipeline = use_router_with_config(
        Pipeline::new().with(LoggerMiddleware),
        routes,
        DispatchConfig::from_env(),
    );

    let server = Server::bind("127.0.0.1:8080").await?;
    println!("Listening on http://{}", server.local_addr());
    server
        .serve_until(pipeline, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
