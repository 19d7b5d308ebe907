//! Extension points of the HTTP cache kernel.
//!
//! Hooks are registered once at startup and run in registration order. A
//! hook may answer a request itself, which stops the remaining hooks and the
//! normal cache handling.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use axum::{
    extract::ConnectInfo,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use super::keys::canonical_request_uri;
use super::store::CacheStore;

/// Result of running one hook.
pub enum HookOutcome {
    /// Fall through to the next hook, then to normal handling.
    Continue,
    /// Answer the request with this response.
    Respond(Response),
}

#[async_trait]
pub trait CacheHook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs before any cache handling of every request.
    async fn pre_handle(&self, _request: &Parts, _store: &CacheStore) -> HookOutcome {
        HookOutcome::Continue
    }

    /// Runs before an unsafe request is forwarded and its URI invalidated.
    async fn pre_invalidate(&self, _request: &Parts, _store: &CacheStore) -> HookOutcome {
        HookOutcome::Continue
    }
}

const PURGE_METHOD: &str = "PURGE";

/// Answers `PURGE` requests by deleting the stored variants of the URI.
///
/// Only clients whose address is on the allow-list may purge; the peer
/// address comes from axum's `ConnectInfo<SocketAddr>` extension.
pub struct PurgeHook {
    allowed: Vec<IpAddr>,
}

impl PurgeHook {
    pub fn new(allowed: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Allow-list of the loopback addresses only.
    pub fn loopback_only() -> Self {
        Self::new([IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V6(Ipv6Addr::LOCALHOST)])
    }

    fn is_allowed(&self, request: &Parts) -> bool {
        request
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .is_some_and(|ConnectInfo(peer)| self.allowed.contains(&peer.ip()))
    }
}

#[async_trait]
impl CacheHook for PurgeHook {
    fn name(&self) -> &'static str {
        "purge"
    }

    async fn pre_invalidate(&self, request: &Parts, store: &CacheStore) -> HookOutcome {
        if request.method.as_str() != PURGE_METHOD {
            return HookOutcome::Continue;
        }

        if !self.is_allowed(request) {
            let peer = request
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(peer)| peer.to_string());
            warn!(hook = "purge", peer = ?peer, "purge rejected for client");
            return HookOutcome::Respond((StatusCode::BAD_REQUEST, "Not allowed").into_response());
        }

        let url = canonical_request_uri(request);
        let response = match store.purge(&url).await {
            Ok(true) => (StatusCode::OK, "Purged").into_response(),
            Ok(false) => (StatusCode::OK, "Not found").into_response(),
            Err(err) => {
                warn!(hook = "purge", url = %url, error = %err, "purge failed");
                StatusCode::SERVICE_UNAVAILABLE.into_response()
            }
        };
        info!(hook = "purge", url = %url, status = response.status().as_u16(), "purge request served");
        HookOutcome::Respond(response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{Method, Request};
    use bytes::Bytes;

    use super::*;
    use crate::cache::backend::MemoryBackend;
    use crate::cache::config::StoreConfig;

    fn purge_request(uri: &str, peer: Option<&str>) -> Parts {
        let mut request = Request::builder()
            .method(Method::from_bytes(PURGE_METHOD.as_bytes()).expect("valid method"))
            .uri(uri)
            .body(())
            .expect("valid request");
        if let Some(peer) = peer {
            let addr: SocketAddr = peer.parse().expect("valid socket address");
            request.extensions_mut().insert(ConnectInfo(addr));
        }
        request.into_parts().0
    }

    fn store() -> CacheStore {
        CacheStore::new(Arc::new(MemoryBackend::new()), StoreConfig::default())
    }

    fn respond(outcome: HookOutcome) -> Response {
        match outcome {
            HookOutcome::Respond(response) => response,
            HookOutcome::Continue => panic!("hook fell through"),
        }
    }

    #[tokio::test]
    async fn other_methods_fall_through() {
        let hook = PurgeHook::loopback_only();
        let request = Request::get("/a").body(()).expect("valid request").into_parts().0;

        assert!(matches!(
            hook.pre_invalidate(&request, &store()).await,
            HookOutcome::Continue
        ));
    }

    #[tokio::test]
    async fn allowed_client_purges_existing_entry() {
        let hook = PurgeHook::loopback_only();
        let store = store();
        let get = Request::get("/a").body(()).expect("valid request").into_parts().0;
        let mut response = axum::http::Response::new(Bytes::from_static(b"hello"));
        store.write(&get, &mut response).await.unwrap();

        let purged = respond(
            hook.pre_invalidate(&purge_request("/a", Some("127.0.0.1:4000")), &store)
                .await,
        );
        assert_eq!(purged.status(), StatusCode::OK);
        assert!(store.lookup(&get).await.unwrap().is_none());

        let again = respond(
            hook.pre_invalidate(&purge_request("/a", Some("[::1]:4000")), &store)
                .await,
        );
        assert_eq!(again.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn foreign_or_unknown_clients_are_rejected() {
        let hook = PurgeHook::loopback_only();
        let store = store();

        let foreign = respond(
            hook.pre_invalidate(&purge_request("/a", Some("10.0.0.7:4000")), &store)
                .await,
        );
        assert_eq!(foreign.status(), StatusCode::BAD_REQUEST);

        let unknown = respond(hook.pre_invalidate(&purge_request("/a", None), &store).await);
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
    }
}
