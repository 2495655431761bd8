/*
 * mod.rs
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

//! Response cache: the storage seam, the stored-entry shape, and the
//! concurrency rules around writes. Policy lives in [`policy`].
//!
//! The engine stores one entry per canonical URL. Vary-selected request
//! headers are captured with the entry and re-checked on lookup.

pub mod policy;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::headers::Headers;
use crate::net::Handshake;
use crate::request::Request;
use crate::response::{Protocol, Response, ResponseBody, ResponseHead};

/// One stored response. Serializable so disk-backed stores can persist it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url: String,
    pub request_method: String,
    /// (name, value-as-sent) for each Vary-selected request header. An
    /// absent header is stored with an empty value.
    pub vary_headers: Vec<(String, String)>,
    pub code: u16,
    pub reason: Option<String>,
    pub protocol: Protocol,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub sent_at_millis: i64,
    pub received_at_millis: i64,
    pub handshake: Option<Handshake>,
}

impl CacheEntry {
    /// Capture the Vary-selected headers of `request` for this entry's
    /// response headers.
    pub fn vary_from(response_headers: &Headers, request: &Request) -> Vec<(String, String)> {
        let mut names: Vec<String> = Vec::new();
        for value in response_headers.get_all("vary") {
            for field in value.split(',') {
                let field = field.trim().to_ascii_lowercase();
                if !field.is_empty() && !names.contains(&field) {
                    names.push(field);
                }
            }
        }
        names
            .into_iter()
            .map(|name| {
                let value = request.headers().get_all(&name).join(", ");
                (name, value)
            })
            .collect()
    }

    /// Whether this entry's variant matches the request.
    pub fn matches_vary(&self, request: &Request) -> bool {
        self.vary_headers.iter().all(|(name, stored)| {
            let current = request.headers().get_all(name).join(", ");
            current == *stored
        })
    }

    /// Rebuild a response from this entry. The body is served from memory.
    pub fn to_response(&self, request: Request) -> Response {
        let head = ResponseHead {
            protocol: self.protocol,
            code: self.code,
            reason: self.reason.clone(),
            headers: self.headers.clone(),
        };
        let content_type = self.headers.get("content-type").map(|s| s.to_string());
        Response::builder(request, head)
            .body(ResponseBody::buffered(content_type, self.body.clone().into()))
            .handshake(self.handshake.clone())
            .timestamps(self.sent_at_millis, self.received_at_millis)
            .from_cache(true)
            .build()
    }

    /// Merge validator-indicated fresh headers into this entry after a 304.
    /// Fresh values win; hop-by-hop framing headers from the validation
    /// response are ignored.
    pub fn merged_with(&self, fresh_headers: &Headers, sent: i64, received: i64) -> CacheEntry {
        let mut merged = self.headers.clone();
        for (name, value) in fresh_headers.iter() {
            match name.to_ascii_lowercase().as_str() {
                "content-length" | "transfer-encoding" | "connection" => {}
                _ => {
                    let _ = merged.set(name, value);
                }
            }
        }
        CacheEntry {
            headers: merged,
            sent_at_millis: sent,
            received_at_millis: received,
            ..self.clone()
        }
    }
}

/// Cache key: the canonical request URL.
pub fn cache_key(request: &Request) -> String {
    request.url().to_string()
}

/// Storage seam. Implementations are invoked synchronously from the cache
/// stage and must not block.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<CacheEntry>;
    fn put(&self, key: String, entry: CacheEntry);
    fn remove(&self, key: &str);
}

/// In-memory store, unbounded. The stock implementation.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn put(&self, key: String, entry: CacheEntry) {
        self.entries.lock().unwrap().insert(key, entry);
    }

    fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}

/// The cache the engine actually talks to: a store plus write coalescing.
/// Concurrent misses for one key produce a single writer; later writers
/// lose their lease and skip the write.
pub struct HttpCache {
    store: Arc<dyn CacheStore>,
    writes_in_flight: Arc<Mutex<HashSet<String>>>,
}

impl HttpCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            writes_in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::new()))
    }

    /// Entry for the request, if one is stored and its Vary headers match.
    pub fn lookup(&self, request: &Request) -> Option<CacheEntry> {
        let entry = self.store.get(&cache_key(request))?;
        if entry.matches_vary(request) {
            Some(entry)
        } else {
            None
        }
    }

    /// Claim the write for a key. None means another writer got there
    /// first; its entry wins.
    pub fn begin_write(&self, key: String) -> Option<WriteLease> {
        let mut in_flight = self.writes_in_flight.lock().unwrap();
        if !in_flight.insert(key.clone()) {
            return None;
        }
        Some(WriteLease {
            key,
            in_flight: self.writes_in_flight.clone(),
        })
    }

    pub fn put(&self, key: String, entry: CacheEntry) {
        self.store.put(key, entry);
    }

    pub fn remove(&self, key: &str) {
        self.store.remove(key);
    }
}

/// Exclusive permission to write one key; releases on drop.
pub struct WriteLease {
    key: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl WriteLease {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for WriteLease {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::HttpUrl;

    fn entry_for(url: &str, vary: Vec<(String, String)>) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            request_method: "GET".into(),
            vary_headers: vary,
            code: 200,
            reason: Some("OK".into()),
            protocol: Protocol::Http11,
            headers: Headers::of(&[("Content-Type", "text/plain")]),
            body: b"hello".to_vec(),
            sent_at_millis: 1,
            received_at_millis: 2,
            handshake: None,
        }
    }

    #[test]
    fn lookup_respects_vary() {
        let cache = HttpCache::in_memory();
        let url = "http://h/a";
        cache.put(
            url.to_string(),
            entry_for(url, vec![("accept-language".into(), "en".into())]),
        );

        let matching = Request::builder(HttpUrl::parse(url).unwrap())
            .set_header("Accept-Language", "en")
            .unwrap()
            .build();
        assert!(cache.lookup(&matching).is_some());

        let different = Request::builder(HttpUrl::parse(url).unwrap())
            .set_header("Accept-Language", "fr")
            .unwrap()
            .build();
        assert!(cache.lookup(&different).is_none());

        // Absent header was stored as empty: a request without it matches
        // an entry recorded without it.
        let absent = Request::get(url).unwrap();
        assert!(cache.lookup(&absent).is_none());
    }

    #[test]
    fn write_coalescing_single_winner() {
        let cache = HttpCache::in_memory();
        let first = cache.begin_write("k".to_string());
        assert!(first.is_some());
        assert!(cache.begin_write("k".to_string()).is_none());
        drop(first);
        assert!(cache.begin_write("k".to_string()).is_some());
    }

    #[test]
    fn merged_entry_prefers_fresh_headers() {
        let entry = entry_for("http://h/a", Vec::new());
        let fresh = Headers::of(&[
            ("Cache-Control", "max-age=600"),
            ("Content-Length", "999"),
        ]);
        let merged = entry.merged_with(&fresh, 10, 20);
        assert_eq!(merged.headers.get("cache-control"), Some("max-age=600"));
        // Framing headers from the 304 are not copied over.
        assert_eq!(merged.headers.get("content-length"), None);
        assert_eq!(merged.headers.get("content-type"), Some("text/plain"));
        assert_eq!(merged.sent_at_millis, 10);
        assert_eq!(merged.body, b"hello");
    }

    #[test]
    fn entry_roundtrips_through_serde() {
        let entry = entry_for("http://h/a", vec![("accept".into(), "*/*".into())]);
        let json = serde_json::to_string(&entry).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.body, entry.body);
        assert_eq!(back.headers, entry.headers);
        assert_eq!(back.vary_headers, entry.vary_headers);
    }

    #[test]
    fn vary_capture_includes_absent_headers() {
        let response_headers = Headers::of(&[("Vary", "Accept-Encoding, User-Agent")]);
        let request = Request::get("http://h/a").unwrap();
        let vary = CacheEntry::vary_from(&response_headers, &request);
        assert_eq!(
            vary,
            vec![
                ("accept-encoding".to_string(), String::new()),
                ("user-agent".to_string(), String::new()),
            ]
        );
    }
}
