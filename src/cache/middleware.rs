//! HTTP cache kernel.
//!
//! Serves `GET`/`HEAD` from the store, regenerates misses under the
//! fleet-wide lock, and invalidates stored variants after successful unsafe
//! requests. Every request gets its own store handle, and that handle's
//! `cleanup` runs on every exit path.

use std::sync::Arc;

use axum::{
    body::{Body, HttpBody, to_bytes},
    extract::State,
    http::{
        HeaderMap, HeaderValue, Method, Request, StatusCode,
        header::{CONTENT_LOCATION, LOCATION, RETRY_AFTER, SET_COOKIE},
        request::Parts,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, instrument, warn};
use url::Url;

use super::config::HttpCacheConfig;
use super::entry::{DIGEST_FIELD, HeaderSnapshot};
use super::freshness::{self, CacheControl};
use super::hooks::{CacheHook, HookOutcome};
use super::keys::canonical_request_uri;
use super::store::CacheStore;

const X_CACHE: &str = "x-cache";
const CLEANUP_FAILED_BODY: &str = "Cannot unlock store.";
const LOCK_TIMEOUT_BODY: &str = "Cache regeneration in progress.";
const CACHEABLE_STATUSES: [u16; 7] = [200, 203, 300, 301, 302, 404, 410];

/// Shared kernel state: the store, ordered hooks and tuning.
#[derive(Clone)]
pub struct HttpCache {
    store: Arc<CacheStore>,
    hooks: Arc<Vec<Arc<dyn CacheHook>>>,
    config: HttpCacheConfig,
}

impl HttpCache {
    pub fn new(store: CacheStore, config: HttpCacheConfig) -> Self {
        Self {
            store: Arc::new(store),
            hooks: Arc::new(Vec::new()),
            config,
        }
    }

    /// Append a hook; hooks run in the order they were added.
    pub fn with_hook(mut self, hook: impl CacheHook + 'static) -> Self {
        Arc::make_mut(&mut self.hooks).push(Arc::new(hook));
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn hook_names(&self) -> Vec<&'static str> {
        self.hooks.iter().map(|hook| hook.name()).collect()
    }
}

/// Axum middleware running the cache kernel in front of `next`.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn http_cache_layer(
    State(cache): State<HttpCache>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let store = Arc::new(cache.store.for_request());
    let guard = CleanupGuard::new(Arc::clone(&store), cache.config.retry_after_secs);
    let (parts, body) = request.into_parts();

    for hook in cache.hooks.iter() {
        if let HookOutcome::Respond(response) = hook.pre_handle(&parts, &store).await {
            debug!(hook = hook.name(), "pre-handle hook answered request");
            return guard.finish(response).await;
        }
    }

    let response = if parts.method == Method::GET || parts.method == Method::HEAD {
        serve_safe(&cache, &store, parts, body, next).await
    } else {
        serve_unsafe(&cache, &store, parts, body, next).await
    };

    guard.finish(response).await
}

async fn serve_safe(
    cache: &HttpCache,
    store: &CacheStore,
    parts: Parts,
    body: Body,
    next: Next,
) -> Response {
    let stored = match store.lookup(&parts).await {
        Ok(stored) => stored,
        Err(err) => {
            warn!(cache = "http", error = %err, "lookup failed; bypassing cache");
            return forward(parts, body, next).await;
        }
    };

    if let Some(hit) = stored.filter(is_fresh_response) {
        return serve_hit(hit, &parts.method);
    }

    if store.lock(&parts).await {
        let request_parts = parts.clone();
        let response = next.run(Request::from_parts(parts, body)).await;
        let response = store_if_cacheable(cache, store, &request_parts, response).await;
        store.unlock(&request_parts).await;
        return response;
    }

    debug!(cache = "http", outcome = "locked", "waiting for concurrent regeneration");
    if !wait_for_release(cache, store, &parts).await {
        warn!(cache = "http", "lock wait timed out");
        return service_unavailable(cache.config.retry_after_secs, LOCK_TIMEOUT_BODY);
    }

    match store.lookup(&parts).await {
        Ok(Some(hit)) if is_fresh_response(&hit) => serve_hit(hit, &parts.method),
        Ok(_) => forward(parts, body, next).await,
        Err(err) => {
            warn!(cache = "http", error = %err, "lookup after lock wait failed");
            forward(parts, body, next).await
        }
    }
}

async fn serve_unsafe(
    cache: &HttpCache,
    store: &CacheStore,
    parts: Parts,
    body: Body,
    next: Next,
) -> Response {
    for hook in cache.hooks.iter() {
        if let HookOutcome::Respond(response) = hook.pre_invalidate(&parts, store).await {
            debug!(hook = hook.name(), "pre-invalidate hook answered request");
            return response;
        }
    }

    let request_parts = parts.clone();
    let response = forward(parts, body, next).await;
    let status = response.status();
    if !(status.is_success() || status.is_redirection()) {
        return response;
    }

    if let Err(err) = store.invalidate(&request_parts).await {
        warn!(cache = "http", error = %err, "invalidation failed");
    }
    for target in same_host_targets(&request_parts, response.headers()) {
        if let Err(err) = store.invalidate_url(&target).await {
            warn!(cache = "http", target = %target, error = %err, "invalidation failed");
        }
    }
    response
}

async fn forward(parts: Parts, body: Body, next: Next) -> Response {
    strip_internal_headers(next.run(Request::from_parts(parts, body)).await)
}

async fn wait_for_release(cache: &HttpCache, store: &CacheStore, parts: &Parts) -> bool {
    let deadline = Instant::now() + cache.config.lock_wait_timeout;
    while store.is_locked(parts).await {
        if Instant::now() >= deadline {
            return false;
        }
        sleep(cache.config.lock_poll_interval).await;
    }
    true
}

async fn store_if_cacheable(
    cache: &HttpCache,
    store: &CacheStore,
    request: &Parts,
    response: Response,
) -> Response {
    let response = strip_internal_headers(response);
    if request.method != Method::GET || !is_cacheable(&response, cache.config.max_body_bytes) {
        return response;
    }

    // Without a digest header the store hashes and saves the body itself.
    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, cache.config.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(cache = "http", error = %err, "failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut buffered = Response::from_parts(parts, bytes);
    match store.write(request, &mut buffered).await {
        Ok(key) => debug!(cache = "http", outcome = "stored", key = %key, "response cached"),
        Err(err) => warn!(cache = "http", error = %err, "failed to store response"),
    }

    let mut response = strip_internal_headers(buffered.map(Body::from));
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static("miss"));
    response
}

fn serve_hit(hit: axum::http::Response<Bytes>, method: &Method) -> Response {
    let head = *method == Method::HEAD;
    let mut response = hit.map(|body| if head { Body::empty() } else { Body::from(body) });
    response = strip_internal_headers(response);
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static("hit"));
    response
}

fn is_fresh_response<B>(response: &axum::http::Response<B>) -> bool {
    freshness::is_fresh(&HeaderSnapshot::from_header_map(response.headers()))
}

/// Whether a downstream response may be stored for shared reuse.
pub fn is_cacheable(response: &Response, max_body_bytes: usize) -> bool {
    if !CACHEABLE_STATUSES.contains(&response.status().as_u16()) {
        return false;
    }
    if response.headers().contains_key(SET_COOKIE) {
        return false;
    }

    let headers = HeaderSnapshot::from_header_map(response.headers());
    let control = CacheControl::from_headers(&headers);
    if control.has("no-store") || control.has("private") {
        return false;
    }
    if !freshness::is_fresh(&headers) {
        return false;
    }

    // Bodies of unknown length are never buffered for storage.
    response
        .body()
        .size_hint()
        .upper()
        .is_some_and(|upper| upper <= max_body_bytes as u64)
}

/// `Location` and `Content-Location` targets on the request's own origin.
fn same_host_targets(request: &Parts, headers: &HeaderMap) -> Vec<String> {
    let Ok(base) = Url::parse(&canonical_request_uri(request)) else {
        return Vec::new();
    };

    [LOCATION, CONTENT_LOCATION]
        .iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| base.join(value).ok())
        .filter(|target| target.origin() == base.origin())
        .map(String::from)
        .collect()
}

fn strip_internal_headers(mut response: Response) -> Response {
    response.headers_mut().remove(DIGEST_FIELD);
    response
}

fn service_unavailable(retry_after_secs: u64, message: &'static str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(RETRY_AFTER, retry_after_secs.to_string())],
        message,
    )
        .into_response()
}

/// Runs the per-request store cleanup.
///
/// [`CleanupGuard::finish`] is the normal path. If the request future is
/// dropped first while the handle has a lock outstanding, the cleanup is spawned
/// onto the runtime instead.
struct CleanupGuard {
    store: Arc<CacheStore>,
    retry_after_secs: u64,
    armed: bool,
}

impl CleanupGuard {
    fn new(store: Arc<CacheStore>, retry_after_secs: u64) -> Self {
        Self {
            store,
            retry_after_secs,
            armed: true,
        }
    }

    async fn finish(mut self, response: Response) -> Response {
        self.armed = false;
        match self.store.cleanup().await {
            Ok(()) => response,
            Err(err) => {
                error!(cache = "http", error = %err, "failed to clear lock namespace");
                service_unavailable(self.retry_after_secs, CLEANUP_FAILED_BODY)
            }
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed || !self.store.lock_outstanding() {
            return;
        }

        let store = Arc::clone(&self.store);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = store.cleanup().await {
                        error!(cache = "http", error = %err, "deferred cleanup failed");
                    }
                });
            }
            Err(_) => warn!(cache = "http", "no runtime to release an abandoned cache lock"),
        }
    }
}
