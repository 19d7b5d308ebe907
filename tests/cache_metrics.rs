use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::any,
};
use metrics_util::debugging::DebuggingRecorder;
use strata::cache::{
    CacheStore, HttpCache, HttpCacheConfig, MemoryBackend, StoreConfig, http_cache_layer,
};
use tower::ServiceExt;

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let backend = Arc::new(MemoryBackend::new());
    let store = CacheStore::new(backend, StoreConfig::default());

    // Contention: a second handle cannot take a lock the first one holds.
    let (parts, _) = Request::builder()
        .uri("/contended")
        .body(())
        .expect("request should build")
        .into_parts();
    let first = store.for_request();
    assert!(first.lock(&parts).await);
    assert!(!store.for_request().lock(&parts).await);
    assert!(first.unlock(&parts).await);

    // Miss, write, hit and invalidation through the kernel.
    let cache = HttpCache::new(store, HttpCacheConfig::default());
    let app = Router::new()
        .route(
            "/tags/{slug}",
            any(|method: Method| async move {
                if method == Method::GET {
                    ([(header::CACHE_CONTROL, "max-age=60")], "tag").into_response()
                } else {
                    StatusCode::NO_CONTENT.into_response()
                }
            }),
        )
        .layer(middleware::from_fn_with_state(cache, http_cache_layer));

    for (method, uri) in [
        (Method::GET, "/tags/one"),
        (Method::GET, "/tags/one"),
        (Method::DELETE, "/tags/one"),
    ] {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request should build");
        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");
        assert!(response.status().is_success());
    }

    let snapshot = snapshotter.snapshot().into_vec();
    let names: HashSet<String> = snapshot
        .iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "strata_cache_hit_total",
        "strata_cache_miss_total",
        "strata_cache_write_total",
        "strata_cache_invalidate_total",
        "strata_cache_lock_contended_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }

    let miss_reasons: HashSet<String> = snapshot
        .iter()
        .filter(|(composite_key, _, _, _)| composite_key.key().name() == "strata_cache_miss_total")
        .flat_map(|(composite_key, _, _, _)| {
            composite_key
                .key()
                .labels()
                .filter(|label| label.key() == "reason")
                .map(|label| label.value().to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    assert!(miss_reasons.contains("not_found"), "reasons: {miss_reasons:?}");
}
