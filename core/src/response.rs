/*
 * response.rs
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

//! HTTP response: immutable shell over a lazily consumed, single-shot body.
//!
//! The body is pulled chunk by chunk from whatever produced it: a live
//! exchange, a cache entry, or a gzip wrapper around either. Reading it to
//! the end releases the underlying connection hold.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;

use crate::error::{HttpError, HttpResult};
use crate::headers::Headers;
use crate::net::Handshake;
use crate::request::Request;
use crate::BoxFuture;

/// Wire protocol a response arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Http10,
    Http11,
    H2,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http10 => "http/1.0",
            Protocol::Http11 => "http/1.1",
            Protocol::H2 => "h2",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status line and headers, before the body is bound. Produced by the codecs.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub protocol: Protocol,
    pub code: u16,
    pub reason: Option<String>,
    pub headers: Headers,
}

/// Producer side of a response body: a pull source of byte chunks.
/// `None` means clean end of body.
pub(crate) trait RawBody: Send {
    fn chunk(&mut self) -> BoxFuture<'_, HttpResult<Option<Bytes>>>;

    /// Trailers, once the body has been read to its end.
    fn trailers(&self) -> Option<Headers> {
        None
    }
}

/// A body already in memory (cache hits, synthetic responses, tests).
struct BufferedBody {
    remaining: Bytes,
}

impl RawBody for BufferedBody {
    fn chunk(&mut self) -> BoxFuture<'_, HttpResult<Option<Bytes>>> {
        Box::pin(async move {
            if self.remaining.is_empty() {
                Ok(None)
            } else {
                Ok(Some(std::mem::take(&mut self.remaining)))
            }
        })
    }
}

/// Streaming gzip inflater over another body. Used by the bridge stage when
/// it injected `Accept-Encoding: gzip` and the origin compressed.
pub(crate) struct GzipBody {
    inner: Box<dyn RawBody>,
    decoder: Option<flate2::write::GzDecoder<Vec<u8>>>,
}

impl GzipBody {
    pub(crate) fn new(inner: Box<dyn RawBody>) -> Self {
        Self {
            inner,
            decoder: Some(flate2::write::GzDecoder::new(Vec::new())),
        }
    }
}

impl RawBody for GzipBody {
    fn chunk(&mut self) -> BoxFuture<'_, HttpResult<Option<Bytes>>> {
        Box::pin(async move {
            loop {
                let decoder = match self.decoder.as_mut() {
                    Some(d) => d,
                    None => return Ok(None),
                };
                match self.inner.chunk().await? {
                    Some(compressed) => {
                        decoder
                            .write_all(&compressed)
                            .map_err(|e| HttpError::protocol(format!("gzip body: {}", e)))?;
                        let decoded = std::mem::take(decoder.get_mut());
                        if !decoded.is_empty() {
                            return Ok(Some(Bytes::from(decoded)));
                        }
                        // Not enough input for output yet; pull more.
                    }
                    None => {
                        let decoder = self.decoder.take().expect("decoder present");
                        let tail = decoder
                            .finish()
                            .map_err(|e| HttpError::protocol(format!("gzip body truncated: {}", e)))?;
                        return if tail.is_empty() {
                            Ok(None)
                        } else {
                            Ok(Some(Bytes::from(tail)))
                        };
                    }
                }
            }
        })
    }
}

/// Single-shot response body stream.
pub struct ResponseBody {
    content_type: Option<String>,
    content_length: Option<u64>,
    source: Option<Box<dyn RawBody>>,
}

impl ResponseBody {
    pub(crate) fn new(
        content_type: Option<String>,
        content_length: Option<u64>,
        source: Box<dyn RawBody>,
    ) -> Self {
        Self {
            content_type,
            content_length,
            source: Some(source),
        }
    }

    pub fn empty() -> Self {
        Self {
            content_type: None,
            content_length: Some(0),
            source: None,
        }
    }

    pub fn buffered(content_type: Option<String>, payload: Bytes) -> Self {
        let len = payload.len() as u64;
        Self {
            content_type,
            content_length: Some(len),
            source: Some(Box::new(BufferedBody { remaining: payload })),
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Declared length; None for chunked or read-until-close bodies.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Next chunk of the body, or None at the clean end.
    pub async fn chunk(&mut self) -> HttpResult<Option<Bytes>> {
        match self.source.as_mut() {
            Some(source) => source.chunk().await,
            None => Ok(None),
        }
    }

    /// Read the whole body into memory.
    pub async fn bytes(&mut self) -> HttpResult<Bytes> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Read and decode the whole body as UTF-8.
    pub async fn text(&mut self) -> HttpResult<String> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| HttpError::protocol("response body is not UTF-8"))
    }

    /// Consume the rest of the body, discarding it. Lets the connection be
    /// reused when a caller walks away from a body (redirects do this).
    pub async fn drain(&mut self) -> HttpResult<()> {
        while self.chunk().await?.is_some() {}
        Ok(())
    }

    /// Trailers that followed the body, if the protocol carried any.
    /// Available only after the body has been read to its end.
    pub fn trailers(&self) -> Option<Headers> {
        self.source.as_ref().and_then(|s| s.trailers())
    }

    /// Tear out the raw source so a stage can wrap it (gzip, cache tee).
    pub(crate) fn into_source(self) -> Option<Box<dyn RawBody>> {
        self.source
    }

    pub(crate) fn content_type_owned(&self) -> Option<String> {
        self.content_type.clone()
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish()
    }
}

/// Immutable HTTP response.
#[derive(Debug)]
pub struct Response {
    request: Request,
    protocol: Protocol,
    code: u16,
    reason: Option<String>,
    headers: Headers,
    body: ResponseBody,
    handshake: Option<Handshake>,
    sent_at_millis: i64,
    received_at_millis: i64,
    from_cache: bool,
    prior: Option<Box<Response>>,
}

impl Response {
    pub fn builder(request: Request, head: ResponseHead) -> ResponseBuilder {
        ResponseBuilder {
            request,
            protocol: head.protocol,
            code: head.code,
            reason: head.reason,
            headers: head.headers,
            body: ResponseBody::empty(),
            handshake: None,
            sent_at_millis: 0,
            received_at_millis: 0,
            from_cache: false,
            prior: None,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.code, 300 | 301 | 302 | 303 | 307 | 308)
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    /// Handshake of the TLS session the response arrived over, if any.
    pub fn handshake(&self) -> Option<&Handshake> {
        self.handshake.as_ref()
    }

    /// When the initiating request's headers left the client, millis since epoch.
    pub fn sent_at_millis(&self) -> i64 {
        self.sent_at_millis
    }

    /// When this response's headers arrived, millis since epoch.
    pub fn received_at_millis(&self) -> i64 {
        self.received_at_millis
    }

    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    /// The response this one was chained from: the redirect, auth challenge,
    /// or cache-validation predecessor. Its body has been consumed.
    pub fn prior(&self) -> Option<&Response> {
        self.prior.as_deref()
    }

    /// Length of the predecessor chain.
    pub fn prior_count(&self) -> usize {
        let mut n = 0;
        let mut cur = self.prior.as_deref();
        while let Some(r) = cur {
            n += 1;
            cur = r.prior.as_deref();
        }
        n
    }

    /// Rebuild into a builder, dropping the body (used for prior links).
    pub(crate) fn into_shell(mut self) -> Response {
        self.body = ResponseBody::empty();
        self
    }

    /// Split into a shell builder and the live body, so a stage can wrap
    /// the body and put it back.
    pub(crate) fn split_for_rewrap(mut self) -> (ResponseBuilder, ResponseBody) {
        let body = std::mem::replace(&mut self.body, ResponseBody::empty());
        (self.to_builder_keeping_body(), body)
    }

    pub(crate) fn to_builder_keeping_body(self) -> ResponseBuilder {
        ResponseBuilder {
            request: self.request,
            protocol: self.protocol,
            code: self.code,
            reason: self.reason,
            headers: self.headers,
            body: self.body,
            handshake: self.handshake,
            sent_at_millis: self.sent_at_millis,
            received_at_millis: self.received_at_millis,
            from_cache: self.from_cache,
            prior: self.prior,
        }
    }
}

/// Builder used by the terminal stage, the cache, and tests.
pub struct ResponseBuilder {
    request: Request,
    protocol: Protocol,
    code: u16,
    reason: Option<String>,
    headers: Headers,
    body: ResponseBody,
    handshake: Option<Handshake>,
    sent_at_millis: i64,
    received_at_millis: i64,
    from_cache: bool,
    prior: Option<Box<Response>>,
}

impl ResponseBuilder {
    pub fn body(mut self, body: ResponseBody) -> Self {
        self.body = body;
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn handshake(mut self, handshake: Option<Handshake>) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn timestamps(mut self, sent_at_millis: i64, received_at_millis: i64) -> Self {
        self.sent_at_millis = sent_at_millis;
        self.received_at_millis = received_at_millis;
        self
    }

    pub fn from_cache(mut self, from_cache: bool) -> Self {
        self.from_cache = from_cache;
        self
    }

    pub fn prior(mut self, prior: Option<Response>) -> Self {
        self.prior = prior.map(Box::new);
        self
    }

    pub fn build(self) -> Response {
        Response {
            request: self.request,
            protocol: self.protocol,
            code: self.code,
            reason: self.reason,
            headers: self.headers,
            body: self.body,
            handshake: self.handshake,
            sent_at_millis: self.sent_at_millis,
            received_at_millis: self.received_at_millis,
            from_cache: self.from_cache,
            prior: self.prior,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;

    fn head(code: u16) -> ResponseHead {
        ResponseHead {
            protocol: Protocol::Http11,
            code,
            reason: Some("OK".into()),
            headers: Headers::new(),
        }
    }

    #[tokio::test]
    async fn buffered_body_reads_once() {
        let req = Request::get("http://h/a").unwrap();
        let mut response = Response::builder(req, head(200))
            .body(ResponseBody::buffered(None, Bytes::from_static(b"hello")))
            .build();
        assert_eq!(response.body_mut().bytes().await.unwrap(), "hello");
        // Second read sees the exhausted stream.
        assert_eq!(response.body_mut().bytes().await.unwrap(), "");
    }

    #[tokio::test]
    async fn gzip_body_inflates() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"hello gzip world").unwrap();
        let compressed = enc.finish().unwrap();

        let inner = Box::new(BufferedBody {
            remaining: Bytes::from(compressed),
        });
        let mut body = ResponseBody::new(None, None, Box::new(GzipBody::new(inner)));
        assert_eq!(body.bytes().await.unwrap(), "hello gzip world");
    }

    #[test]
    fn prior_chain_counts() {
        let req = Request::get("http://h/a").unwrap();
        let first = Response::builder(req.clone(), head(302)).build();
        let second = Response::builder(req, head(200))
            .prior(Some(first))
            .build();
        assert_eq!(second.prior_count(), 1);
        assert_eq!(second.prior().unwrap().code(), 302);
    }
}
