//! Stored request/response variants and vary matching.

use std::collections::BTreeMap;

use axum::http::{HeaderMap, Response, StatusCode, request::Parts};
use serde::{Deserialize, Serialize};

/// Synthetic response field carrying the numeric status code.
pub const STATUS_FIELD: &str = "X-Status";
/// Response field pointing at the body in the content store.
pub const DIGEST_FIELD: &str = "x-content-digest";

const AGE: &str = "age";
const VARY: &str = "vary";

/// Header names mapped to their ordered raw values.
///
/// Names coming from real messages are lower-case. A `BTreeMap` keeps the
/// serialized form deterministic, so re-encoding an unchanged list yields
/// identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderSnapshot(BTreeMap<String, Vec<String>>);

impl HeaderSnapshot {
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in headers {
            fields
                .entry(name.as_str().to_owned())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
        Self(fields)
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.0.insert(name.into(), values);
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.0.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }
}

impl<const N: usize> From<[(&str, &str); N]> for HeaderSnapshot {
    fn from(pairs: [(&str, &str); N]) -> Self {
        let mut snapshot = Self::default();
        for (name, value) in pairs {
            snapshot
                .0
                .entry(name.to_owned())
                .or_default()
                .push(value.to_owned());
        }
        snapshot
    }
}

/// One cached variant: the request headers it was produced for and the
/// response headers (plus synthetic status) it answered with.
///
/// Entries are immutable; invalidation builds a replacement through
/// [`CacheEntry::from_stale_copy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(HeaderSnapshot, HeaderSnapshot)", into = "(HeaderSnapshot, HeaderSnapshot)")]
pub struct CacheEntry {
    request_headers: HeaderSnapshot,
    response_headers: HeaderSnapshot,
}

impl CacheEntry {
    pub fn from_fresh_exchange<B>(request: &Parts, response: &Response<B>) -> Self {
        Self {
            request_headers: HeaderSnapshot::from_header_map(&request.headers),
            response_headers: with_status(
                HeaderSnapshot::from_header_map(response.headers()),
                response.status(),
            ),
        }
    }

    /// Keep `previous`'s request side and replace its response side with
    /// `expired_headers`, an expired rendition of the stored response.
    pub fn from_stale_copy(
        previous: &CacheEntry,
        status: StatusCode,
        expired_headers: HeaderSnapshot,
    ) -> Self {
        Self {
            request_headers: previous.request_headers.clone(),
            response_headers: with_status(expired_headers, status),
        }
    }

    pub fn request_headers(&self) -> &HeaderSnapshot {
        &self.request_headers
    }

    pub fn response_headers(&self) -> &HeaderSnapshot {
        &self.response_headers
    }

    /// Stored status, if the synthetic field holds a valid code.
    pub fn status(&self) -> Option<StatusCode> {
        self.response_headers
            .first(STATUS_FIELD)
            .and_then(|value| value.parse::<u16>().ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
    }

    pub fn content_digest(&self) -> Option<&str> {
        self.response_headers.first(DIGEST_FIELD)
    }

    /// The stored vary value; a missing header reads as "vary on nothing".
    pub fn vary(&self) -> &str {
        self.response_headers.first(VARY).unwrap_or("")
    }

    /// Whether this variant can answer a request carrying `request_headers`.
    pub fn matches_request(&self, request_headers: &HeaderMap) -> bool {
        let incoming = HeaderSnapshot::from_header_map(request_headers);
        request_headers_agree(self.vary(), &incoming, &self.request_headers)
    }

    /// Whether this entry describes a different variant than a new exchange.
    ///
    /// A changed vary value always diverges, since the set of dimensions
    /// being varied on has itself changed.
    pub fn diverges_from(&self, request_headers: &HeaderMap, response_headers: &HeaderMap) -> bool {
        let new_vary = response_headers
            .get(VARY)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .unwrap_or_default();
        if new_vary != self.vary() {
            return true;
        }

        let incoming = HeaderSnapshot::from_header_map(request_headers);
        !request_headers_agree(self.vary(), &self.request_headers, &incoming)
    }
}

impl From<(HeaderSnapshot, HeaderSnapshot)> for CacheEntry {
    fn from((request_headers, response_headers): (HeaderSnapshot, HeaderSnapshot)) -> Self {
        Self {
            request_headers,
            response_headers,
        }
    }
}

impl From<CacheEntry> for (HeaderSnapshot, HeaderSnapshot) {
    fn from(entry: CacheEntry) -> Self {
        (entry.request_headers, entry.response_headers)
    }
}

fn with_status(mut headers: HeaderSnapshot, status: StatusCode) -> HeaderSnapshot {
    headers.remove(AGE);
    headers.insert(STATUS_FIELD, vec![status.as_u16().to_string()]);
    headers
}

/// Compare the header sets on every name listed in `vary`.
///
/// Names are split on whitespace and commas, lower-cased, and underscores
/// become hyphens. An empty vary never distinguishes requests.
fn request_headers_agree(vary: &str, left: &HeaderSnapshot, right: &HeaderSnapshot) -> bool {
    if vary.is_empty() {
        return true;
    }

    vary.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|name| !name.is_empty())
        .map(|name| name.to_ascii_lowercase().replace('_', "-"))
        .all(|name| left.get(&name) == right.get(&name))
}
