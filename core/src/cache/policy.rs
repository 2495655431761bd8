/*
 * policy.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere, an embeddable HTTP client engine.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! RFC 7234 cache policy: response age, freshness lifetime, and the
//! decision between serving from cache, revalidating, or going to the
//! network outright.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::HttpResult;
use crate::headers::Headers;
use crate::request::{Method, Request};

use super::CacheEntry;

/// Heuristic freshness is capped at one day.
const MAX_HEURISTIC_LIFETIME_MILLIS: i64 = 24 * 3600 * 1000;

/// Statuses that may be cached on heuristic freshness alone (RFC 7231 §6.1).
const HEURISTIC_STATUSES: &[u16] = &[200, 203, 204, 300, 301, 308, 404, 405, 410, 414, 501];

/// Parsed Cache-Control directives; unknown directives are ignored.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheControl {
    pub no_cache: bool,
    pub no_store: bool,
    pub max_age: Option<i64>,
    pub s_maxage: Option<i64>,
    /// Present iff max-stale appeared; the inner value is its argument.
    pub max_stale: Option<Option<i64>>,
    pub min_fresh: Option<i64>,
    pub only_if_cached: bool,
    pub public: bool,
    pub private: bool,
    pub must_revalidate: bool,
    pub immutable: bool,
}

impl CacheControl {
    pub fn parse(headers: &Headers) -> CacheControl {
        let mut cc = CacheControl::default();
        for value in headers.get_all("cache-control") {
            for directive in value.split(',') {
                let directive = directive.trim();
                let (name, arg) = match directive.find('=') {
                    Some(i) => (
                        directive[..i].trim(),
                        Some(directive[i + 1..].trim().trim_matches('"')),
                    ),
                    None => (directive, None),
                };
                let seconds = arg.and_then(|a| a.parse::<i64>().ok());
                match name.to_ascii_lowercase().as_str() {
                    "no-cache" => cc.no_cache = true,
                    "no-store" => cc.no_store = true,
                    "max-age" => cc.max_age = seconds,
                    "s-maxage" => cc.s_maxage = seconds,
                    "max-stale" => cc.max_stale = Some(seconds),
                    "min-fresh" => cc.min_fresh = seconds,
                    "only-if-cached" => cc.only_if_cached = true,
                    "public" => cc.public = true,
                    "private" => cc.private = true,
                    "must-revalidate" => cc.must_revalidate = true,
                    "immutable" => cc.immutable = true,
                    _ => {}
                }
            }
        }
        cc
    }
}

/// Parse the three date formats HTTP servers actually emit: RFC 1123,
/// RFC 850, and asctime.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    for format in [
        "%a, %d %b %Y %H:%M:%S GMT",
        "%A, %d-%b-%y %H:%M:%S GMT",
        "%a %b %e %H:%M:%S %Y",
    ] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc());
        }
    }
    None
}

pub fn format_http_date(datetime: DateTime<Utc>) -> String {
    datetime.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// The cache stage's decision for one request.
pub struct CacheStrategy {
    /// Request to send to the origin; None means serve purely from cache.
    pub network_request: Option<Request>,
    /// Entry to serve or validate against; None means pure network.
    pub cache_entry: Option<CacheEntry>,
}

impl CacheStrategy {
    /// Decide per RFC 7234. `now_millis` is wall-clock milliseconds.
    pub fn compute(
        now_millis: i64,
        request: &Request,
        cached: Option<&CacheEntry>,
    ) -> HttpResult<CacheStrategy> {
        let strategy = Self::compute_unchecked(now_millis, request, cached)?;
        // only-if-cached forbids the network entirely; without a fresh
        // entry the caller synthesizes a 504.
        if strategy.network_request.is_some()
            && CacheControl::parse(request.headers()).only_if_cached
        {
            return Ok(CacheStrategy {
                network_request: None,
                cache_entry: None,
            });
        }
        Ok(strategy)
    }

    fn compute_unchecked(
        now_millis: i64,
        request: &Request,
        cached: Option<&CacheEntry>,
    ) -> HttpResult<CacheStrategy> {
        let entry = match cached {
            Some(entry) => entry,
            None => return Ok(Self::network_only(request)),
        };
        let request_cc = CacheControl::parse(request.headers());

        // A conditional request from the caller, or an explicit no-cache,
        // bypasses the stored entry.
        if request_cc.no_cache
            || request.headers().contains("if-modified-since")
            || request.headers().contains("if-none-match")
        {
            return Ok(Self::network_only(request));
        }

        let response_cc = CacheControl::parse(&entry.headers);
        if response_cc.no_store {
            return Ok(Self::network_only(request));
        }

        let age = entry.age_millis(now_millis);
        let lifetime = entry.freshness_lifetime_millis();

        if !response_cc.no_cache {
            let min_fresh = request_cc.min_fresh.unwrap_or(0) * 1000;
            // max-stale only applies when the response does not demand
            // revalidation.
            let max_stale = if response_cc.must_revalidate {
                0
            } else {
                match request_cc.max_stale {
                    Some(Some(seconds)) => seconds * 1000,
                    Some(None) => i64::MAX / 4,
                    None => 0,
                }
            };
            if age + min_fresh <= lifetime + max_stale {
                return Ok(CacheStrategy {
                    network_request: None,
                    cache_entry: Some(entry.clone()),
                });
            }
        }

        // Stale: revalidate when the entry carries a validator.
        let mut builder = request.to_builder();
        let condition = if let Some(etag) = entry.headers.get("etag") {
            Some(("If-None-Match", etag.to_string()))
        } else {
            entry
                .headers
                .get("last-modified")
                .or_else(|| entry.headers.get("date"))
                .map(|d| ("If-Modified-Since", d.to_string()))
        };
        match condition {
            Some((name, value)) => {
                builder = builder.set_header(name, &value)?;
                Ok(CacheStrategy {
                    network_request: Some(builder.build()),
                    cache_entry: Some(entry.clone()),
                })
            }
            None => Ok(Self::network_only(request)),
        }
    }

    fn network_only(request: &Request) -> CacheStrategy {
        CacheStrategy {
            network_request: Some(request.clone()),
            cache_entry: None,
        }
    }
}

impl CacheEntry {
    /// Current age per RFC 7234 §4.2.3, in milliseconds.
    pub fn age_millis(&self, now_millis: i64) -> i64 {
        let served_date = self
            .headers
            .get("date")
            .and_then(parse_http_date)
            .map(|d| d.timestamp_millis());
        let apparent_age = served_date
            .map(|d| (self.received_at_millis - d).max(0))
            .unwrap_or(0);
        let age_header = self
            .headers
            .get("age")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|seconds| seconds * 1000)
            .unwrap_or(0);
        let corrected_received_age = apparent_age.max(age_header);
        let response_delay = (self.received_at_millis - self.sent_at_millis).max(0);
        let corrected_initial_age = corrected_received_age + response_delay;
        let resident = (now_millis - self.received_at_millis).max(0);
        corrected_initial_age + resident
    }

    /// Freshness lifetime per RFC 7234 §4.2.1, in milliseconds.
    pub fn freshness_lifetime_millis(&self) -> i64 {
        let cc = CacheControl::parse(&self.headers);
        if let Some(seconds) = cc.max_age {
            return seconds * 1000;
        }
        let served_date = self.headers.get("date").and_then(parse_http_date);
        if let Some(expires) = self.headers.get("expires").and_then(parse_http_date) {
            let base = served_date
                .map(|d| d.timestamp_millis())
                .unwrap_or(self.received_at_millis);
            return (expires.timestamp_millis() - base).max(0);
        }
        // Heuristic: 10% of the time since Last-Modified, for statuses that
        // allow it, capped at a day.
        if HEURISTIC_STATUSES.contains(&self.code) {
            if let (Some(date), Some(last_modified)) = (
                served_date,
                self.headers.get("last-modified").and_then(parse_http_date),
            ) {
                let interval = date.timestamp_millis() - last_modified.timestamp_millis();
                if interval > 0 {
                    return (interval / 10).min(MAX_HEURISTIC_LIFETIME_MILLIS);
                }
            }
        }
        0
    }
}

/// Whether a network response may be written to the cache for this request.
pub fn is_cacheable(request: &Request, code: u16, response_headers: &Headers) -> bool {
    if *request.method() != Method::Get {
        return false;
    }
    let request_cc = CacheControl::parse(request.headers());
    let response_cc = CacheControl::parse(response_headers);
    if request_cc.no_store || response_cc.no_store {
        return false;
    }
    // Vary: * can never be satisfied by a later request.
    if response_headers
        .get_all("vary")
        .iter()
        .any(|v| v.split(',').any(|f| f.trim() == "*"))
    {
        return false;
    }
    // Authorized requests are cacheable only with explicit permission.
    if request.headers().contains("authorization")
        && !(response_cc.public || response_cc.must_revalidate || response_cc.s_maxage.is_some())
    {
        return false;
    }
    match code {
        code if HEURISTIC_STATUSES.contains(&code) => true,
        302 | 307 => {
            // Cacheable only with explicit freshness information.
            response_cc.max_age.is_some()
                || response_cc.public
                || response_cc.private
                || response_headers.contains("expires")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Protocol;

    fn entry(headers: Headers, sent: i64, received: i64) -> CacheEntry {
        CacheEntry {
            url: "http://h/a".into(),
            request_method: "GET".into(),
            vary_headers: Vec::new(),
            code: 200,
            reason: None,
            protocol: Protocol::Http11,
            headers,
            body: b"cached".to_vec(),
            sent_at_millis: sent,
            received_at_millis: received,
            handshake: None,
        }
    }

    fn get(url: &str) -> Request {
        Request::get(url).unwrap()
    }

    #[test]
    fn cache_control_parsing() {
        let headers = Headers::of(&[(
            "Cache-Control",
            "no-cache, max-age=300, max-stale, min-fresh=\"5\", only-if-cached",
        )]);
        let cc = CacheControl::parse(&headers);
        assert!(cc.no_cache);
        assert_eq!(cc.max_age, Some(300));
        assert_eq!(cc.max_stale, Some(None));
        assert_eq!(cc.min_fresh, Some(5));
        assert!(cc.only_if_cached);
        assert!(!cc.no_store);
    }

    #[test]
    fn http_date_formats() {
        let rfc1123 = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        let rfc850 = parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT").unwrap();
        let asctime = parse_http_date("Sun Nov  6 08:49:37 1994").unwrap();
        assert_eq!(rfc1123, rfc850);
        assert_eq!(rfc1123, asctime);
        assert_eq!(format_http_date(rfc1123), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert!(parse_http_date("not a date").is_none());
    }

    #[test]
    fn fresh_entry_serves_from_cache() {
        let now = 1_700_000_000_000i64;
        let headers = Headers::of(&[
            ("Cache-Control", "max-age=300"),
            ("Date", &format_http_date(DateTime::from_timestamp_millis(now).unwrap())),
        ]);
        let entry = entry(headers, now, now);
        // 30 seconds later: fresh.
        let strategy =
            CacheStrategy::compute(now + 30_000, &get("http://h/a"), Some(&entry)).unwrap();
        assert!(strategy.network_request.is_none());
        assert!(strategy.cache_entry.is_some());
        // 301 seconds later: stale. The served Date is the validator of
        // last resort, so this still revalidates rather than refetching.
        let strategy =
            CacheStrategy::compute(now + 301_000, &get("http://h/a"), Some(&entry)).unwrap();
        let network = strategy.network_request.unwrap();
        assert!(network.header("if-modified-since").is_some());
        assert!(strategy.cache_entry.is_some());
    }

    #[test]
    fn stale_with_etag_becomes_conditional() {
        let now = 1_700_000_000_000i64;
        let headers = Headers::of(&[
            ("Cache-Control", "max-age=60"),
            ("Date", &format_http_date(DateTime::from_timestamp_millis(now).unwrap())),
            ("ETag", "\"v1\""),
        ]);
        let entry = entry(headers, now, now);
        let strategy =
            CacheStrategy::compute(now + 120_000, &get("http://h/a"), Some(&entry)).unwrap();
        let network = strategy.network_request.unwrap();
        assert_eq!(network.header("if-none-match"), Some("\"v1\""));
        assert!(strategy.cache_entry.is_some());
    }

    #[test]
    fn max_stale_extends_freshness() {
        let now = 1_700_000_000_000i64;
        let headers = Headers::of(&[
            ("Cache-Control", "max-age=60"),
            ("Date", &format_http_date(DateTime::from_timestamp_millis(now).unwrap())),
        ]);
        let entry = entry(headers, now, now);
        let request = Request::builder(crate::uri::HttpUrl::parse("http://h/a").unwrap())
            .set_header("Cache-Control", "max-stale=120")
            .unwrap()
            .build();
        let strategy = CacheStrategy::compute(now + 100_000, &request, Some(&entry)).unwrap();
        assert!(strategy.network_request.is_none());
    }

    #[test]
    fn only_if_cached_without_entry_blocks_network() {
        let request = Request::builder(crate::uri::HttpUrl::parse("http://h/a").unwrap())
            .set_header("Cache-Control", "only-if-cached")
            .unwrap()
            .build();
        let strategy = CacheStrategy::compute(0, &request, None).unwrap();
        assert!(strategy.network_request.is_none());
        assert!(strategy.cache_entry.is_none());
    }

    #[test]
    fn heuristic_lifetime_is_tenth_of_modification_age() {
        let now = 1_700_000_000_000i64;
        let date = DateTime::from_timestamp_millis(now).unwrap();
        let modified = DateTime::from_timestamp_millis(now - 10_000_000).unwrap();
        let headers = Headers::of(&[
            ("Date", &format_http_date(date)),
            ("Last-Modified", &format_http_date(modified)),
        ]);
        let entry = entry(headers, now, now);
        assert_eq!(entry.freshness_lifetime_millis(), 1_000_000);
    }

    #[test]
    fn age_combines_header_and_transit() {
        let now = 1_700_000_000_000i64;
        let date = DateTime::from_timestamp_millis(now - 5_000).unwrap();
        let headers = Headers::of(&[
            ("Date", &format_http_date(date)),
            ("Age", "10"),
        ]);
        // Sent 2s before receipt.
        let entry = entry(headers, now - 2_000, now);
        // Age header (10s) beats apparent age (5s); plus 2s delay, plus 3s
        // residence.
        assert_eq!(entry.age_millis(now + 3_000), 15_000);
    }

    #[test]
    fn vary_star_and_authorization_rules() {
        let request = get("http://h/a");
        assert!(is_cacheable(&request, 200, &Headers::of(&[("Vary", "Accept-Encoding")])));
        assert!(!is_cacheable(&request, 200, &Headers::of(&[("Vary", "*")])));

        let authorized = Request::builder(crate::uri::HttpUrl::parse("http://h/a").unwrap())
            .set_header("Authorization", "Bearer t")
            .unwrap()
            .build();
        assert!(!is_cacheable(&authorized, 200, &Headers::new()));
        assert!(is_cacheable(
            &authorized,
            200,
            &Headers::of(&[("Cache-Control", "public")])
        ));
        assert!(is_cacheable(
            &authorized,
            200,
            &Headers::of(&[("Cache-Control", "s-maxage=30")])
        ));
    }

    #[test]
    fn statuses_gate_cacheability() {
        let request = get("http://h/a");
        assert!(is_cacheable(&request, 301, &Headers::new()));
        assert!(is_cacheable(&request, 404, &Headers::new()));
        assert!(!is_cacheable(&request, 302, &Headers::new()));
        assert!(is_cacheable(
            &request,
            302,
            &Headers::of(&[("Cache-Control", "max-age=60")])
        ));
        assert!(!is_cacheable(&request, 500, &Headers::new()));
    }
}
