/*
 * request.rs
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

//! HTTP request: URL, method, headers, optional body, caller tags.
//!
//! Requests are immutable; derive modified copies with `to_builder()`. The
//! chain stages do this for redirects, auth retries, and header injection.

use bytes::Bytes;
use std::collections::HashMap;

use crate::error::HttpResult;
use crate::headers::Headers;
use crate::uri::HttpUrl;

/// HTTP request method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
    Propfind,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Propfind => "PROPFIND",
            Method::Other(s) => s,
        }
    }

    pub fn from_token(token: &str) -> Method {
        match token {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            "PROPFIND" => Method::Propfind,
            other => Method::Other(other.to_string()),
        }
    }

    /// True for methods that conventionally carry a request body.
    pub fn permits_body(&self) -> bool {
        !matches!(self, Method::Get | Method::Head)
    }

    /// Methods whose success invalidates a cached GET for the same URL.
    pub fn invalidates_cache(&self) -> bool {
        matches!(
            self,
            Method::Post | Method::Put | Method::Delete | Method::Patch
        )
    }
}

/// Request body. Payload bytes plus framing and replay hints.
///
/// A body with `chunked` set is written with `Transfer-Encoding: chunked`
/// even though its length is known locally; this is how callers express
/// unknown-length uploads. A `one_shot` body is never replayed, which
/// disables connection-failure retries and redirect re-sends for it.
#[derive(Debug, Clone)]
pub struct RequestBody {
    content_type: Option<String>,
    payload: Bytes,
    chunked: bool,
    one_shot: bool,
}

impl RequestBody {
    pub fn new(content_type: Option<&str>, payload: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.map(|s| s.to_string()),
            payload: payload.into(),
            chunked: false,
            one_shot: false,
        }
    }

    /// Force chunked transfer encoding instead of Content-Length.
    pub fn chunked(mut self) -> Self {
        self.chunked = true;
        self
    }

    /// Mark this body as not replayable.
    pub fn one_shot(mut self) -> Self {
        self.one_shot = true;
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Known length, or None when chunked framing was requested.
    pub fn content_length(&self) -> Option<u64> {
        if self.chunked {
            None
        } else {
            Some(self.payload.len() as u64)
        }
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn is_one_shot(&self) -> bool {
        self.one_shot
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// Immutable HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: HttpUrl,
    headers: Headers,
    body: Option<RequestBody>,
    tags: HashMap<String, String>,
}

impl Request {
    pub fn get(url: &str) -> HttpResult<Request> {
        Ok(Request::builder(HttpUrl::parse(url)?).build())
    }

    pub fn builder(url: HttpUrl) -> RequestBuilder {
        RequestBuilder {
            method: Method::Get,
            url,
            headers: Headers::new(),
            body: None,
            tags: HashMap::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &HttpUrl {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(|s| s.as_str())
    }

    /// Derive a builder seeded with this request's fields.
    pub fn to_builder(&self) -> RequestBuilder {
        RequestBuilder {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Mutable builder for [`Request`].
pub struct RequestBuilder {
    method: Method,
    url: HttpUrl,
    headers: Headers,
    body: Option<RequestBody>,
    tags: HashMap<String, String>,
}

impl RequestBuilder {
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn url(mut self, url: HttpUrl) -> Self {
        self.url = url;
        self
    }

    /// Append a header, keeping existing pairs of the same name.
    pub fn header(mut self, name: &str, value: &str) -> HttpResult<Self> {
        self.headers.add(name, value)?;
        Ok(self)
    }

    /// Set a header, replacing existing pairs of the same name.
    pub fn set_header(mut self, name: &str, value: &str) -> HttpResult<Self> {
        self.headers.set(name, value)?;
        Ok(self)
    }

    pub fn remove_header(mut self, name: &str) -> Self {
        self.headers.remove(name);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: Option<RequestBody>) -> Self {
        self.body = body;
        self
    }

    pub fn post(self, body: RequestBody) -> Self {
        self.method(Method::Post).body(Some(body))
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Request {
        Request {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body,
            tags: self.tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_roundtrip() {
        let url = HttpUrl::parse("http://example.com/x").unwrap();
        let req = Request::builder(url)
            .method(Method::Post)
            .header("Accept", "*/*")
            .unwrap()
            .body(Some(RequestBody::new(Some("text/plain"), "hi")))
            .tag("trace", "t1")
            .build();
        assert_eq!(req.method().as_str(), "POST");
        assert_eq!(req.header("accept"), Some("*/*"));
        assert_eq!(req.body().unwrap().content_length(), Some(2));
        assert_eq!(req.tag("trace"), Some("t1"));

        let derived = req.to_builder().method(Method::Get).body(None).build();
        assert_eq!(derived.method(), &Method::Get);
        assert_eq!(derived.header("accept"), Some("*/*"));
    }

    #[test]
    fn chunked_body_has_no_length() {
        let body = RequestBody::new(None, "abc").chunked();
        assert_eq!(body.content_length(), None);
        assert!(body.is_chunked());
    }

    #[test]
    fn method_classification() {
        assert!(!Method::Get.permits_body());
        assert!(Method::Post.permits_body());
        assert!(Method::Put.invalidates_cache());
        assert!(!Method::Propfind.invalidates_cache());
        assert_eq!(Method::from_token("PROPFIND"), Method::Propfind);
    }
}
