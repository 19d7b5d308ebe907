//! Shared-cache freshness of stored response headers.
//!
//! Only what invalidation and the kernel's admission check need: a TTL
//! derived from `s-maxage`, `max-age` or `Expires`, and a way to force a
//! response into the expired state.

use time::{
    OffsetDateTime, PrimitiveDateTime, format_description::BorrowedFormatItem,
    macros::format_description,
};

use super::entry::HeaderSnapshot;

const CACHE_CONTROL: &str = "cache-control";
const EXPIRES: &str = "expires";
const DATE: &str = "date";
const AGE: &str = "age";

const HTTP_DATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Parsed `Cache-Control` directives in header order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    directives: Vec<(String, Option<String>)>,
}

impl CacheControl {
    pub fn from_headers(headers: &HeaderSnapshot) -> Self {
        let directives = headers
            .get(CACHE_CONTROL)
            .unwrap_or_default()
            .iter()
            .flat_map(|value| value.split(','))
            .filter_map(|directive| {
                let directive = directive.trim();
                if directive.is_empty() {
                    return None;
                }
                let (name, value) = match directive.split_once('=') {
                    Some((name, value)) => (name, Some(value.trim().trim_matches('"').to_owned())),
                    None => (directive, None),
                };
                Some((name.trim().to_ascii_lowercase(), value))
            })
            .collect();
        Self { directives }
    }

    pub fn has(&self, name: &str) -> bool {
        self.directives.iter().any(|(directive, _)| directive == name)
    }

    pub fn seconds(&self, name: &str) -> Option<i64> {
        self.directives
            .iter()
            .find(|(directive, _)| directive == name)
            .and_then(|(_, value)| value.as_deref())
            .and_then(|value| value.parse().ok())
    }

    fn with_zeroed_lifetimes(mut self) -> Self {
        for (name, value) in &mut self.directives {
            if name == "max-age" || name == "s-maxage" {
                *value = Some("0".to_owned());
            }
        }
        self
    }

    fn render(&self) -> String {
        self.directives
            .iter()
            .map(|(name, value)| match value {
                Some(value) => format!("{name}={value}"),
                None => name.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(value.trim(), HTTP_DATE)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// Lifetime in seconds granted to a shared cache, if any.
pub fn max_age(headers: &HeaderSnapshot) -> Option<i64> {
    let control = CacheControl::from_headers(headers);
    if let Some(seconds) = control.seconds("s-maxage") {
        return Some(seconds);
    }
    if let Some(seconds) = control.seconds("max-age") {
        return Some(seconds);
    }

    let expires = headers.first(EXPIRES).and_then(parse_http_date)?;
    let date = headers.first(DATE).and_then(parse_http_date)?;
    Some((expires - date).whole_seconds())
}

/// Seconds the response has been alive at `now`.
pub fn age_at(headers: &HeaderSnapshot, now: OffsetDateTime) -> i64 {
    // Delta-seconds are unsigned; a negative or malformed `Age` is ignored.
    if let Some(age) = headers
        .first(AGE)
        .and_then(|value| value.trim().parse::<u64>().ok())
    {
        return i64::try_from(age).unwrap_or(i64::MAX);
    }
    headers
        .first(DATE)
        .and_then(parse_http_date)
        .map(|date| (now - date).whole_seconds().max(0))
        .unwrap_or(0)
}

pub fn ttl_at(headers: &HeaderSnapshot, now: OffsetDateTime) -> Option<i64> {
    max_age(headers).map(|max_age| max_age.saturating_sub(age_at(headers, now)))
}

pub fn is_fresh_at(headers: &HeaderSnapshot, now: OffsetDateTime) -> bool {
    ttl_at(headers, now).is_some_and(|ttl| ttl > 0)
}

pub fn is_fresh(headers: &HeaderSnapshot) -> bool {
    is_fresh_at(headers, OffsetDateTime::now_utc())
}

/// Expired rendition of `headers`.
///
/// `Expires` and `Age` are dropped and every lifetime directive is rewritten
/// to zero, so the result stays expired regardless of when it is evaluated.
pub fn expire(headers: &HeaderSnapshot) -> HeaderSnapshot {
    let mut expired = headers.clone();
    expired.remove(EXPIRES);
    expired.remove(AGE);

    if headers.contains(CACHE_CONTROL) {
        let control = CacheControl::from_headers(headers).with_zeroed_lifetimes();
        expired.insert(CACHE_CONTROL, vec![control.render()]);
    }

    expired
}
