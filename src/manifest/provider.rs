use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::debug;

use super::Manifest;

/// Errors raised while obtaining a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest unavailable: {0}")]
    Unavailable(String),

    #[error("failed to load manifest: {0}")]
    Load(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// The future returned by [`ManifestProvider::manifest`].
pub type ManifestFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Arc<Manifest>, ManifestError>> + Send + 'a>>;

/// An asynchronous source of the current route manifest.
///
/// The dispatcher asks for the manifest on every request and never keeps a
/// copy, so a provider decides how fresh the table is. A plain
/// `Arc<Manifest>` is the static case; [`SharedManifest`] supports
/// replacement at runtime and [`CachedProvider`] bounds how often a slow
/// source is consulted.
pub trait ManifestProvider: Send + Sync {
    fn manifest(&self) -> ManifestFuture<'_>;
}

impl ManifestProvider for Arc<Manifest> {
    fn manifest(&self) -> ManifestFuture<'_> {
        let manifest = Arc::clone(self);
        Box::pin(async move { Ok(manifest) })
    }
}

/// Conversion into a [`ManifestProvider`], accepted wherever a dispatcher is
/// built.
///
/// Every provider converts to itself. A bare [`Manifest`] is moved behind an
/// `Arc` once, so each request only bumps a reference count.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use fileroute::manifest::{IntoManifestProvider, Manifest};
///
/// let provider: Arc<Manifest> = Manifest::new().into_provider();
/// assert!(provider.is_empty());
/// ```
pub trait IntoManifestProvider {
    type Provider: ManifestProvider + 'static;

    fn into_provider(self) -> Self::Provider;
}

impl<P: ManifestProvider + 'static> IntoManifestProvider for P {
    type Provider = P;

    fn into_provider(self) -> P {
        self
    }
}

impl IntoManifestProvider for Manifest {
    type Provider = Arc<Manifest>;

    fn into_provider(self) -> Arc<Manifest> {
        Arc::new(self)
    }
}

/// A provider backed by an async closure; see [`provider_fn`].
pub struct ProviderFn<F>(F);

/// Wraps a closure returning a manifest future as a [`ManifestProvider`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use fileroute::manifest::{Manifest, ManifestError, ManifestProvider, provider_fn};
///
/// let provider = provider_fn(|| async { Ok::<_, ManifestError>(Arc::new(Manifest::new())) });
/// let _: &dyn ManifestProvider = &provider;
/// ```
pub fn provider_fn<F, Fut>(f: F) -> ProviderFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Arc<Manifest>, ManifestError>> + Send + 'static,
{
    ProviderFn(f)
}

impl<F, Fut> ManifestProvider for ProviderFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Arc<Manifest>, ManifestError>> + Send + 'static,
{
    fn manifest(&self) -> ManifestFuture<'_> {
        Box::pin((self.0)())
    }
}

/// A manifest that can be swapped while the server is running.
///
/// Requests already dispatched keep the table they started with; requests
/// arriving after [`SharedManifest::replace`] see the new one.
#[derive(Debug, Clone)]
pub struct SharedManifest {
    current: Arc<watch::Sender<Arc<Manifest>>>,
}

impl SharedManifest {
    pub fn new(manifest: Manifest) -> Self {
        let (current, _) = watch::channel(Arc::new(manifest));
        Self {
            current: Arc::new(current),
        }
    }

    /// Installs `manifest` for all subsequent lookups.
    pub fn replace(&self, manifest: Manifest) {
        debug!(routes = manifest.len(), "manifest replaced");
        self.current.send_replace(Arc::new(manifest));
    }

    /// Returns the table currently in effect.
    pub fn current(&self) -> Arc<Manifest> {
        Arc::clone(&self.current.borrow())
    }

    /// Subscribes to replacements.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Manifest>> {
        self.current.subscribe()
    }
}

impl Default for SharedManifest {
    fn default() -> Self {
        Self::new(Manifest::new())
    }
}

impl ManifestProvider for SharedManifest {
    fn manifest(&self) -> ManifestFuture<'_> {
        let manifest = self.current();
        Box::pin(async move { Ok(manifest) })
    }
}

/// Serves a manifest from memory, consulting the inner provider at most once
/// per `ttl`.
///
/// Concurrent requests that find the entry stale wait for a single refresh.
/// A failed refresh is returned to the caller and nothing is cached, so the
/// next request tries again.
pub struct CachedProvider<P> {
    inner: P,
    ttl: Duration,
    slot: Mutex<Option<(Instant, Arc<Manifest>)>>,
}

impl<P: ManifestProvider> CachedProvider<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drops the cached entry so the next request reloads.
    pub async fn invalidate(&self) {
        self.slot.lock().await.take();
    }
}

impl<P: ManifestProvider> ManifestProvider for CachedProvider<P> {
    fn manifest(&self) -> ManifestFuture<'_> {
        Box::pin(async move {
            let mut slot = self.slot.lock().await;
            if let Some((loaded_at, manifest)) = slot.as_ref() {
                if loaded_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(manifest));
                }
            }
            let manifest = self.inner.manifest().await?;
            debug!(routes = manifest.len(), "manifest reloaded");
            *slot = Some((Instant::now(), Arc::clone(&manifest)));
            Ok(manifest)
        })
    }
}
