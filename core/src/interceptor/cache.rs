/*
 * cache.rs
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

//! Cache stage. Pure hits short-circuit the chain; stale entries turn into
//! conditional requests whose 304 answers are merged with the stored entry;
//! cacheable misses are written through while the body streams to the
//! caller. Concurrent writers for one key coalesce: the first wins.

use bytes::Bytes;
use std::sync::Arc;

use tracing::debug;

use crate::cache::policy::{is_cacheable, CacheStrategy};
use crate::cache::{cache_key, CacheEntry, HttpCache, WriteLease};
use crate::error::{HttpError, HttpResult};
use crate::headers::Headers;
use crate::now_millis;
use crate::request::Request;
use crate::response::{Protocol, RawBody, Response, ResponseBody, ResponseHead};
use crate::BoxFuture;

use super::{Chain, Interceptor};

pub struct CacheStage {
    cache: Option<Arc<HttpCache>>,
}

impl CacheStage {
    pub fn new(cache: Option<Arc<HttpCache>>) -> Self {
        Self { cache }
    }
}

impl Interceptor for CacheStage {
    fn intercept<'a>(&'a self, chain: &'a mut Chain) -> BoxFuture<'a, HttpResult<Response>> {
        Box::pin(async move {
            let request = chain.request().clone();
            let cache = match &self.cache {
                Some(cache) => cache.clone(),
                None => return chain.proceed(request).await,
            };
            let events = chain.call().client.events.clone();
            let now = now_millis();
            let cached = cache.lookup(&request);
            let strategy = CacheStrategy::compute(now, &request, cached.as_ref())?;

            match (strategy.network_request, strategy.cache_entry) {
                // only-if-cached with nothing fresh: synthetic 504.
                (None, None) => {
                    events.cache_miss(&request);
                    Ok(unsatisfiable(request))
                }
                // Pure hit.
                (None, Some(entry)) => {
                    debug!(url = %request.url(), "cache hit");
                    events.cache_hit(&request);
                    Ok(entry.to_response(request))
                }
                // Conditional or plain network.
                (Some(network_request), entry) => {
                    if entry.is_none() {
                        events.cache_miss(&request);
                    }
                    let response = chain.proceed(network_request.clone()).await?;

                    if let Some(entry) = entry {
                        if response.code() == 304 {
                            debug!(url = %request.url(), "conditional hit");
                            events.cache_conditional_hit(&request);
                            return Ok(merge_not_modified(
                                &cache, request, entry, response,
                            ));
                        }
                    }

                    let key = cache_key(&network_request);
                    if is_cacheable(&network_request, response.code(), response.headers()) {
                        if let Some(lease) = cache.begin_write(key) {
                            return Ok(tee_into_cache(
                                cache.clone(),
                                lease,
                                &network_request,
                                response,
                            ));
                        }
                    } else if network_request.method().invalidates_cache() && response.is_success()
                    {
                        cache.remove(&key);
                    }
                    Ok(response)
                }
            }
        })
    }
}

/// `Cache-Control: only-if-cached` without a satisfying entry.
fn unsatisfiable(request: Request) -> Response {
    let head = ResponseHead {
        protocol: Protocol::Http11,
        code: 504,
        reason: Some("Unsatisfiable Request (only-if-cached)".to_string()),
        headers: Headers::new(),
    };
    Response::builder(request, head)
        .body(ResponseBody::empty())
        .timestamps(now_millis(), now_millis())
        .build()
}

/// A 304 confirms the entry: merge the fresh headers, restore the entry,
/// serve the cached body with the validation response as predecessor.
fn merge_not_modified(
    cache: &HttpCache,
    request: Request,
    entry: CacheEntry,
    network: Response,
) -> Response {
    let merged = entry.merged_with(
        network.headers(),
        network.sent_at_millis(),
        network.received_at_millis(),
    );
    cache.put(cache_key(&request), merged.clone());
    merged
        .to_response(request)
        .to_builder_keeping_body()
        .prior(Some(network.into_shell()))
        .build()
}

/// Stream the response to the caller while copying it into the cache. The
/// entry is committed only when the body reaches its clean end.
fn tee_into_cache(
    cache: Arc<HttpCache>,
    lease: WriteLease,
    network_request: &Request,
    response: Response,
) -> Response {
    let entry = CacheEntry {
        url: network_request.url().to_string(),
        request_method: network_request.method().as_str().to_string(),
        vary_headers: CacheEntry::vary_from(response.headers(), network_request),
        code: response.code(),
        reason: response.reason().map(|s| s.to_string()),
        protocol: response.protocol(),
        headers: response.headers().clone(),
        body: Vec::new(),
        sent_at_millis: response.sent_at_millis(),
        received_at_millis: response.received_at_millis(),
        handshake: response.handshake().cloned(),
    };
    let (shell, body) = response.split_for_rewrap();
    let content_type = body.content_type_owned();
    let content_length = body.content_length();
    let source: Box<dyn RawBody> = match body.into_source() {
        Some(inner) => Box::new(TeeBody {
            inner,
            collected: Vec::new(),
            entry: Some(entry),
            cache,
            lease: Some(lease),
        }),
        None => {
            // Empty body: commit right away.
            cache.put(lease.key().to_string(), entry);
            drop(lease);
            return shell.body(ResponseBody::empty()).build();
        }
    };
    shell
        .body(ResponseBody::new(content_type, content_length, source))
        .build()
}

struct TeeBody {
    inner: Box<dyn RawBody>,
    collected: Vec<u8>,
    entry: Option<CacheEntry>,
    cache: Arc<HttpCache>,
    lease: Option<WriteLease>,
}

impl RawBody for TeeBody {
    fn chunk(&mut self) -> BoxFuture<'_, HttpResult<Option<Bytes>>> {
        Box::pin(async move {
            match self.inner.chunk().await {
                Ok(Some(chunk)) => {
                    self.collected.extend_from_slice(&chunk);
                    Ok(Some(chunk))
                }
                Ok(None) => {
                    if let (Some(mut entry), Some(lease)) = (self.entry.take(), self.lease.take())
                    {
                        entry.body = std::mem::take(&mut self.collected);
                        self.cache.put(lease.key().to_string(), entry);
                    }
                    Ok(None)
                }
                Err(e) => {
                    // Truncated responses are never committed.
                    self.entry = None;
                    self.lease = None;
                    Err(e)
                }
            }
        })
    }

    fn trailers(&self) -> Option<Headers> {
        self.inner.trailers()
    }
}
