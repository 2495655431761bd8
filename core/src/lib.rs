/*
 * lib.rs
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

//! Corriere: an embeddable HTTP client engine.
//!
//! The engine accepts user-level requests and produces user-level
//! responses, managing everything in between: the interceptor chain
//! (retries, redirects, auth, caching), the connection pool and route
//! planner, and the two protocol codecs: HTTP/1.1 with chunked framing,
//! and HTTP/2 with its own framing, HPACK, and flow control (no external
//! h2 crate).
//!
//! ```no_run
//! use corriere_core::{HttpClient, Request};
//!
//! # async fn example() -> Result<(), corriere_core::HttpError> {
//! let client = HttpClient::new();
//! let mut response = client
//!     .call(Request::get("https://example.com/")?)
//!     .execute()
//!     .await?;
//! let body = response.body_mut().text().await?;
//! # Ok(())
//! # }
//! ```
//!
//! TLS, DNS, cache storage, and cookie scope decisions are consumed through
//! seams ([`TransportFactory`], [`DnsResolver`], [`cache::CacheStore`],
//! [`CookieJar`]) so embedders can replace them.

use std::future::Future;
use std::pin::Pin;

pub mod auth;
pub mod cache;
pub mod call;
pub mod client;
pub mod connection;
pub mod cookie;
pub mod dispatcher;
pub mod dns;
pub mod error;
pub mod event;
pub mod h1;
pub mod h2;
pub mod headers;
pub mod hpack;
pub mod interceptor;
pub mod net;
pub mod request;
pub mod response;
pub mod uri;

pub use auth::{Authenticator, BasicAuthenticator, NoAuthenticator};
pub use cache::{HttpCache, MemoryCache};
pub use call::Call;
pub use client::{HttpClient, HttpClientBuilder};
pub use connection::route::{Address, Proxy, ProxySelector, Route};
pub use cookie::{Cookie, CookieJar, NoCookies};
pub use dispatcher::Dispatcher;
pub use dns::{DnsResolver, SystemDns};
pub use error::{ErrorKind, HttpError, HttpResult};
pub use event::{EventListener, NoEvents};
pub use headers::Headers;
pub use interceptor::{Chain, Interceptor};
pub use net::{Handshake, HttpStream, SystemTransport, TransportFactory};
pub use request::{Method, Request, RequestBody, RequestBuilder};
pub use response::{Protocol, Response, ResponseBody, ResponseHead};
pub use uri::{HttpUrl, Scheme};

/// Boxed future alias used across the trait seams.
pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Wall-clock milliseconds since the epoch, for response timestamps and
/// cache age math.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
