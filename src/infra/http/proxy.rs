//! Forwarding of requests to the origin server.

use std::{net::SocketAddr, time::Duration};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode, Uri,
        header::{CONNECTION, CONTENT_LENGTH, HOST},
    },
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use reqwest::{Client, Url, redirect};
use tracing::{debug, warn};

use crate::infra::error::InfraError;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// HTTP client bound to one origin.
///
/// Redirects are passed through to the client untouched. Response bodies are
/// buffered so the cache kernel sees an exact length.
#[derive(Clone)]
pub struct Upstream {
    client: Client,
    base: Url,
}

impl Upstream {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(concat!("strata/", env!("CARGO_PKG_VERSION")))
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::upstream(format!("failed to build client: {err}")))?;
        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Origin URL for an incoming request URI; the base path is kept as prefix.
    pub fn target(&self, uri: &Uri) -> Url {
        let mut url = self.base.clone();
        let prefix = self.base.path().trim_end_matches('/');
        url.set_path(&format!("{prefix}{}", uri.path()));
        url.set_query(uri.query());
        url
    }

    pub async fn send(&self, request: Request) -> Result<Response, InfraError> {
        let (parts, body) = request.into_parts();
        let url = self.target(&parts.uri);

        let body = body
            .collect()
            .await
            .map_err(|err| InfraError::upstream(format!("failed to read request body: {err}")))?
            .to_bytes();

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(HOST);
        headers.remove(CONTENT_LENGTH);
        if let Some(ConnectInfo(peer)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            append_forwarded_for(&mut headers, peer);
        }

        debug!(
            target = "strata::infra::http::proxy",
            method = %parts.method,
            url = %url,
            "forwarding request"
        );

        let upstream = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|err| InfraError::upstream(err.to_string()))?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);
        let bytes = upstream
            .bytes()
            .await
            .map_err(|err| InfraError::upstream(format!("failed to read response body: {err}")))?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Router handler forwarding every request to the origin.
pub async fn forward(State(upstream): State<Upstream>, request: Request) -> Response {
    match upstream.send(request).await {
        Ok(response) => response,
        Err(err) => {
            warn!(
                target = "strata::infra::http::proxy",
                error = %err,
                "upstream request failed"
            );
            (StatusCode::BAD_GATEWAY, "Bad gateway").into_response()
        }
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: &SocketAddr) {
    let ip = peer.ip().to_string();
    let value = match headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
    {
        Some(existing) if !existing.trim().is_empty() => format!("{existing}, {ip}"),
        _ => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

#[cfg(test)]
mod tests {
    use axum::{Router, routing::any};
    use tokio::net::TcpListener;

    use super::*;

    async fn echo(request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let body = body.collect().await.expect("body").to_bytes();
        let mut response = Response::new(Body::from(body));
        let headers = response.headers_mut();
        headers.insert(
            "x-echo-path",
            HeaderValue::from_str(&parts.uri.to_string()).expect("uri"),
        );
        headers.insert(
            "x-echo-method",
            HeaderValue::from_str(parts.method.as_str()).expect("method"),
        );
        for name in ["x-forwarded-for", "x-custom", "keep-alive"] {
            if let Some(value) = parts.headers.get(name) {
                let seen = HeaderName::from_bytes(format!("x-seen-{name}").as_bytes());
                headers.insert(seen.expect("name"), value.clone());
            }
        }
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        response
    }

    async fn spawn_origin() -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let app = Router::new().route("/{*path}", any(echo));
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("origin server");
        });
        Url::parse(&format!("http://{addr}/")).expect("url")
    }

    #[test]
    fn target_keeps_base_prefix_and_query() {
        let upstream = Upstream::new(
            Url::parse("http://origin.test/app/").expect("url"),
            Duration::from_secs(1),
        )
        .expect("client");
        let uri: Uri = "/posts/1?page=2".parse().expect("uri");
        assert_eq!(
            upstream.target(&uri).as_str(),
            "http://origin.test/app/posts/1?page=2"
        );
    }

    #[test]
    fn connection_listed_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("close, x-session"));
        headers.insert("x-session", HeaderValue::from_static("abc"));
        headers.insert("x-kept", HeaderValue::from_static("1"));
        strip_hop_by_hop(&mut headers);
        assert!(headers.get("x-session").is_none());
        assert!(headers.get(CONNECTION).is_none());
        assert!(headers.get("x-kept").is_some());
    }

    #[test]
    fn forwarded_for_is_appended() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("10.0.0.1"));
        append_forwarded_for(&mut headers, &"192.0.2.7:5000".parse().expect("addr"));
        assert_eq!(headers[X_FORWARDED_FOR], "10.0.0.1, 192.0.2.7");
    }

    #[tokio::test]
    async fn forwards_method_path_headers_and_body() {
        let base = spawn_origin().await;
        let upstream = Upstream::new(base, Duration::from_secs(5)).expect("client");

        let mut request = axum::http::Request::builder()
            .method("POST")
            .uri("/comments?draft=1")
            .header("x-custom", "yes")
            .header("keep-alive", "timeout=9")
            .header(HOST, "public.test")
            .body(Body::from("hello"))
            .expect("request");
        request
            .extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("198.51.100.4:443".parse().expect("addr")));

        let response = forward(State(upstream), request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers().clone();
        assert_eq!(headers["x-echo-path"], "/comments?draft=1");
        assert_eq!(headers["x-echo-method"], "POST");
        assert_eq!(headers["x-seen-x-custom"], "yes");
        assert_eq!(headers["x-seen-x-forwarded-for"], "198.51.100.4");
        assert!(headers.get("x-seen-keep-alive").is_none());
        assert!(headers.get("keep-alive").is_none());

        let body = response.into_body().collect().await.expect("body").to_bytes();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn unreachable_origin_is_bad_gateway() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let upstream = Upstream::new(
            Url::parse(&format!("http://{addr}/")).expect("url"),
            Duration::from_secs(2),
        )
        .expect("client");
        let request = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .expect("request");

        let response = forward(State(upstream), request).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
