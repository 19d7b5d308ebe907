//! Cache key definitions.
//!
//! `CacheKey` names the metadata list of one normalized request URI and
//! `ContentDigest` names one response body. Both are a namespace prefix
//! followed by the hex SHA-1 of the hashed material, which keeps keys
//! identical across processes and backend nodes.

use std::fmt;

use axum::http::{header::HOST, request::Parts};
use sha1::{Digest, Sha1};
use url::Url;

const DEFAULT_BASE: &str = "http://localhost";

/// Backend key of the metadata list for one canonical request URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_request(prefix: &str, request: &Parts) -> Self {
        Self::for_canonical_uri(prefix, &canonical_request_uri(request))
    }

    /// Key for a URL given as text; bare paths resolve against `http://localhost`.
    pub fn for_url(prefix: &str, url: &str) -> Self {
        Self::for_canonical_uri(prefix, &canonical_url(url))
    }

    fn for_canonical_uri(prefix: &str, canonical: &str) -> Self {
        Self(format!("{prefix}{}", sha1_hex(canonical.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content-addressed backend key of a response body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn of(prefix: &str, body: &[u8]) -> Self {
        Self(format!("{prefix}{}", sha1_hex(body)))
    }

    /// Rehydrate a digest previously written into a response header.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

/// Fully qualified URI of a request with its query string normalized.
///
/// Origin-form requests take their authority from `Host`, falling back to
/// `localhost`; the scheme defaults to `http`.
pub fn canonical_request_uri(request: &Parts) -> String {
    let scheme = request.uri.scheme_str().unwrap_or("http");
    let host = request
        .uri
        .authority()
        .map(|authority| authority.as_str().to_owned())
        .or_else(|| {
            request
                .headers
                .get(HOST)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| "localhost".to_owned());
    let path_and_query = request
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    canonical_url(&format!("{scheme}://{host}{path_and_query}"))
}

/// Normalize an absolute or path-only URL.
///
/// Default ports and fragments are dropped and query pairs are sorted by
/// name, so `?b=2&a=1` and `?a=1&b=2` share one cache key. Input that cannot
/// be parsed at all is hashed verbatim.
pub fn canonical_url(raw: &str) -> String {
    let parsed = Url::parse(raw).or_else(|_| Url::parse(DEFAULT_BASE).and_then(|base| base.join(raw)));
    match parsed {
        Ok(url) => normalize(url),
        Err(_) => raw.to_owned(),
    }
}

fn normalize(mut url: Url) -> String {
    url.set_fragment(None);

    if url.query().is_some() {
        let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        if pairs.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
    }

    url.into()
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn parts(uri: &str) -> Parts {
        Request::builder()
            .uri(uri)
            .body(())
            .expect("valid request")
            .into_parts()
            .0
    }

    #[test]
    fn sha1_matches_reference_vector() {
        assert_eq!(sha1_hex(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn origin_form_requests_default_to_localhost() {
        assert_eq!(canonical_request_uri(&parts("/test")), "http://localhost/test");
    }

    #[test]
    fn host_header_supplies_authority() {
        let request = Request::builder()
            .uri("/a?x=1")
            .header(HOST, "example.org:8080")
            .body(())
            .expect("valid request")
            .into_parts()
            .0;

        assert_eq!(
            canonical_request_uri(&request),
            "http://example.org:8080/a?x=1"
        );
    }

    #[test]
    fn query_pairs_are_sorted_and_default_port_dropped() {
        assert_eq!(
            canonical_url("https://example.org:443/p?b=2&a=1#frag"),
            "https://example.org/p?a=1&b=2"
        );
    }

    #[test]
    fn purge_paths_match_request_keys() {
        let from_request = CacheKey::for_request("hrm", &parts("/foorequest"));
        let from_url = CacheKey::for_url("hrm", "/foorequest");

        assert_eq!(from_request, from_url);
        assert_eq!(
            from_url.as_str(),
            format!("hrm{}", sha1_hex(b"http://localhost/foorequest"))
        );
    }

    #[test]
    fn digest_depends_only_on_bytes_and_prefix() {
        assert_eq!(ContentDigest::of("hrd", b"A"), ContentDigest::of("hrd", b"A"));
        assert_ne!(ContentDigest::of("hrd", b"A"), ContentDigest::of("hrd", b"B"));
        assert_eq!(
            ContentDigest::of("hrd", b"abc").as_str(),
            "hrda9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn prefixes_separate_namespaces() {
        let a = CacheKey::for_url("one", "/x");
        let b = CacheKey::for_url("two", "/x");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("one"));
    }
}
