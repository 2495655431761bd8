/*
 * client.rs
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

//! HTTP client: the embedder-facing entry point. Holds the shared pool,
//! dispatcher, cache, and every policy knob; issues [`Call`]s. Clients are
//! cheap to clone and safe to share.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{Authenticator, NoAuthenticator};
use crate::cache::HttpCache;
use crate::call::Call;
use crate::connection::pool::{ConnectionPool, DEFAULT_KEEP_ALIVE, DEFAULT_MAX_IDLE};
use crate::connection::route::{NoProxy, Proxy, ProxySelector};
use crate::connection::route_planner::RouteDatabase;
use crate::connection::ConnectParams;
use crate::cookie::{CookieJar, NoCookies};
use crate::dispatcher::Dispatcher;
use crate::dns::{DnsResolver, SystemDns};
use crate::event::{EventListener, NoEvents};
use crate::interceptor::{assemble, bridge::Bridge, cache::CacheStage, Interceptor, Stage};
use crate::net::{SystemTransport, TransportFactory};
use crate::request::Request;
use crate::response::Protocol;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_FOLLOW_UPS: u32 = 20;

pub(crate) struct ClientInner {
    pub stages: Arc<[Stage]>,
    pub dispatcher: Dispatcher,
    pub pool: ConnectionPool,
    pub route_db: Arc<RouteDatabase>,
    pub dns: Arc<dyn DnsResolver>,
    pub transport: Arc<dyn TransportFactory>,
    pub authenticator: Arc<dyn Authenticator>,
    pub events: Arc<dyn EventListener>,
    pub proxy: Option<Proxy>,
    pub proxy_selector: Arc<dyn ProxySelector>,
    pub protocols: Vec<Protocol>,
    pub h2_prior_knowledge: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub retry_on_connection_failure: bool,
    pub follow_redirects: bool,
    pub max_follow_ups: u32,
    pub http2_ping_interval: Option<Duration>,
}

impl ClientInner {
    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            transport: self.transport.clone(),
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            h2_prior_knowledge: self.h2_prior_knowledge,
            ping_interval: self.http2_ping_interval,
            events: self.events.clone(),
        }
    }
}

/// The client. Build with [`HttpClient::builder`]; `HttpClient::new()` uses
/// the defaults.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

impl HttpClient {
    pub fn new() -> HttpClient {
        Self::builder().build()
    }

    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Bind a request to a new call.
    pub fn call(&self, request: Request) -> Call {
        Call::new(self.inner.clone(), request)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn connection_pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

pub struct HttpClientBuilder {
    interceptors: Vec<Arc<dyn Interceptor>>,
    network_interceptors: Vec<Arc<dyn Interceptor>>,
    dispatcher: Dispatcher,
    max_idle_connections: usize,
    keep_alive: Duration,
    dns: Arc<dyn DnsResolver>,
    transport: Arc<dyn TransportFactory>,
    authenticator: Arc<dyn Authenticator>,
    cookie_jar: Arc<dyn CookieJar>,
    cache: Option<Arc<HttpCache>>,
    events: Arc<dyn EventListener>,
    proxy: Option<Proxy>,
    proxy_selector: Arc<dyn ProxySelector>,
    protocols: Vec<Protocol>,
    h2_prior_knowledge: bool,
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    retry_on_connection_failure: bool,
    follow_redirects: bool,
    max_follow_ups: u32,
    user_agent: String,
    http2_ping_interval: Option<Duration>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            interceptors: Vec::new(),
            network_interceptors: Vec::new(),
            dispatcher: Dispatcher::default(),
            max_idle_connections: DEFAULT_MAX_IDLE,
            keep_alive: DEFAULT_KEEP_ALIVE,
            dns: Arc::new(SystemDns),
            transport: Arc::new(SystemTransport::new()),
            authenticator: Arc::new(NoAuthenticator),
            cookie_jar: Arc::new(NoCookies),
            cache: None,
            events: Arc::new(NoEvents),
            proxy: None,
            proxy_selector: Arc::new(NoProxy),
            protocols: vec![Protocol::H2, Protocol::Http11],
            h2_prior_knowledge: false,
            connect_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
            retry_on_connection_failure: true,
            follow_redirects: true,
            max_follow_ups: DEFAULT_MAX_FOLLOW_UPS,
            user_agent: format!("corriere/{}", env!("CARGO_PKG_VERSION")),
            http2_ping_interval: None,
        }
    }
}

impl HttpClientBuilder {
    /// Application interceptor: runs before the core stages, sees the
    /// request as the caller built it.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Network interceptor: runs after a connection is bound, sees the
    /// request as it goes on the wire.
    pub fn network_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.network_interceptors.push(interceptor);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn max_idle_connections(mut self, count: usize) -> Self {
        self.max_idle_connections = count;
        self
    }

    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.keep_alive = duration;
        self
    }

    pub fn dns(mut self, dns: Arc<dyn DnsResolver>) -> Self {
        self.dns = dns;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn TransportFactory>) -> Self {
        self.transport = transport;
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    pub fn cookie_jar(mut self, jar: Arc<dyn CookieJar>) -> Self {
        self.cookie_jar = jar;
        self
    }

    pub fn cache(mut self, cache: Arc<HttpCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn event_listener(mut self, events: Arc<dyn EventListener>) -> Self {
        self.events = events;
        self
    }

    pub fn proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn proxy_selector(mut self, selector: Arc<dyn ProxySelector>) -> Self {
        self.proxy_selector = selector;
        self
    }

    /// Protocols to offer via ALPN, in preference order.
    pub fn protocols(mut self, protocols: Vec<Protocol>) -> Self {
        self.protocols = protocols;
        self
    }

    /// Speak HTTP/2 on plaintext connections without negotiation.
    pub fn http2_prior_knowledge(mut self) -> Self {
        self.h2_prior_knowledge = true;
        self.protocols = vec![Protocol::H2];
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn retry_on_connection_failure(mut self, retry: bool) -> Self {
        self.retry_on_connection_failure = retry;
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Keepalive PING interval for HTTP/2 connections. An interval without
    /// an answering ACK fails the connection.
    pub fn http2_ping_interval(mut self, interval: Duration) -> Self {
        self.http2_ping_interval = Some(interval);
        self
    }

    pub fn build(self) -> HttpClient {
        let stages = assemble(
            &self.interceptors,
            &self.network_interceptors,
            Bridge::new(self.cookie_jar.clone(), self.user_agent.clone()),
            CacheStage::new(self.cache.clone()),
        );
        HttpClient {
            inner: Arc::new(ClientInner {
                stages,
                dispatcher: self.dispatcher,
                pool: ConnectionPool::new(self.max_idle_connections, self.keep_alive),
                route_db: Arc::new(RouteDatabase::new()),
                dns: self.dns,
                transport: self.transport,
                authenticator: self.authenticator,
                events: self.events,
                proxy: self.proxy,
                proxy_selector: self.proxy_selector,
                protocols: self.protocols,
                h2_prior_knowledge: self.h2_prior_knowledge,
                connect_timeout: self.connect_timeout,
                read_timeout: self.read_timeout,
                write_timeout: self.write_timeout,
                retry_on_connection_failure: self.retry_on_connection_failure,
                follow_redirects: self.follow_redirects,
                max_follow_ups: self.max_follow_ups,
                http2_ping_interval: self.http2_ping_interval,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Read one request head (through the blank line) as text.
    async fn read_request_head(sock: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        while !buf.ends_with(b"\r\n\r\n") {
            let n = sock.read(&mut byte).await.unwrap();
            if n == 0 {
                break;
            }
            buf.push(byte[0]);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn client() -> HttpClient {
        HttpClient::builder()
            .connect_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_secs(5))
            .write_timeout(Duration::from_secs(5))
            .build()
    }

    #[tokio::test]
    async fn simple_get_with_bridge_headers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let head = read_request_head(&mut sock).await;
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
                .await
                .unwrap();
            head
        });

        let request = Request::get(&format!("http://127.0.0.1:{}/a", port)).unwrap();
        let mut response = client().call(request).execute().await.unwrap();

        assert_eq!(response.code(), 200);
        assert_eq!(response.protocol(), Protocol::Http11);
        assert_eq!(response.body_mut().text().await.unwrap(), "hello");

        let head = server.await.unwrap();
        assert!(head.starts_with("GET /a HTTP/1.1\r\n"), "{}", head);
        assert!(head.contains(&format!("Host: 127.0.0.1:{}\r\n", port)));
        assert!(head.contains("Accept-Encoding: gzip\r\n"));
        assert!(head.contains("Connection: Keep-Alive\r\n"));
        assert!(head.contains("User-Agent: corriere/"));
    }

    #[tokio::test]
    async fn redirect_reuses_connection_and_links_prior() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepts = Arc::new(AtomicUsize::new(0));
        let server_accepts = accepts.clone();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            server_accepts.fetch_add(1, Ordering::SeqCst);
            let first = read_request_head(&mut sock).await;
            assert!(first.starts_with("GET /a "), "{}", first);
            sock.write_all(b"HTTP/1.1 302 Found\r\nLocation: /b\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
            let second = read_request_head(&mut sock).await;
            assert!(second.starts_with("GET /b "), "{}", second);
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\ndone")
                .await
                .unwrap();
        });

        let request = Request::get(&format!("http://127.0.0.1:{}/a", port)).unwrap();
        let mut response = client().call(request).execute().await.unwrap();
        assert_eq!(response.code(), 200);
        assert_eq!(response.body_mut().text().await.unwrap(), "done");
        assert_eq!(response.prior_count(), 1);
        assert_eq!(response.prior().unwrap().code(), 302);
        server.await.unwrap();
        assert_eq!(accepts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expect_continue_sends_body_after_100() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let head = read_request_head(&mut sock).await;
            assert!(head.contains("Expect: 100-continue\r\n"), "{}", head);
            sock.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.unwrap();
            let mut body = [0u8; 1];
            sock.read_exact(&mut body).await.unwrap();
            assert_eq!(&body, b"x");
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .await
                .unwrap();
        });

        let url = crate::uri::HttpUrl::parse(&format!("http://127.0.0.1:{}/up", port)).unwrap();
        let request = Request::builder(url)
            .post(crate::request::RequestBody::new(Some("text/plain"), "x"))
            .set_header("Expect", "100-continue")
            .unwrap()
            .build();
        let mut response = client().call(request).execute().await.unwrap();
        assert_eq!(response.code(), 200);
        assert_eq!(response.body_mut().text().await.unwrap(), "ok");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn fresh_cache_entry_skips_the_network() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let hits = Arc::new(AtomicUsize::new(0));
        let server_hits = hits.clone();
        tokio::spawn(async move {
            loop {
                let (mut sock, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                server_hits.fetch_add(1, Ordering::SeqCst);
                let _ = read_request_head(&mut sock).await;
                let date = crate::cache::policy::format_http_date(chrono::Utc::now());
                let reply = format!(
                    "HTTP/1.1 200 OK\r\nCache-Control: max-age=60\r\nDate: {}\r\nContent-Length: 6\r\n\r\ncached",
                    date
                );
                let _ = sock.write_all(reply.as_bytes()).await;
            }
        });

        let client = HttpClient::builder()
            .cache(Arc::new(HttpCache::in_memory()))
            .build();
        let url = format!("http://127.0.0.1:{}/c", port);

        let mut first = client
            .call(Request::get(&url).unwrap())
            .execute()
            .await
            .unwrap();
        assert_eq!(first.body_mut().text().await.unwrap(), "cached");
        assert!(!first.is_from_cache());

        let mut second = client
            .call(Request::get(&url).unwrap())
            .execute()
            .await
            .unwrap();
        assert_eq!(second.body_mut().text().await.unwrap(), "cached");
        assert!(second.is_from_cache());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gzip_response_is_transparently_inflated() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"the payload").unwrap();
        let compressed = encoder.finish().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let _ = read_request_head(&mut sock).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
                compressed.len()
            );
            sock.write_all(head.as_bytes()).await.unwrap();
            sock.write_all(&compressed).await.unwrap();
        });

        let request = Request::get(&format!("http://127.0.0.1:{}/z", port)).unwrap();
        let mut response = client().call(request).execute().await.unwrap();
        assert_eq!(response.body_mut().text().await.unwrap(), "the payload");
        // The bridge strips the coding headers it consumed.
        assert_eq!(response.header("content-encoding"), None);
        assert_eq!(response.header("content-length"), None);
    }

    #[tokio::test]
    async fn enqueue_delivers_through_dispatcher() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let _ = read_request_head(&mut sock).await;
            let _ = sock
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .await;
        });

        let client = client();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let call = client.call(Request::get(&format!("http://127.0.0.1:{}/q", port)).unwrap());
        call.enqueue(move |result| {
            let _ = tx.send(result.map(|r| r.code()));
        });
        let code = rx.await.unwrap().unwrap();
        assert_eq!(code, 200);
        client.dispatcher().wait_until_idle().await;
    }

    #[tokio::test]
    async fn call_executes_at_most_once() {
        let client = client();
        let call = client.call(Request::get("http://127.0.0.1:9/never").unwrap());
        let clone = call.clone();
        // First execution fails to connect, but it consumes the call.
        let _ = call.execute().await;
        let err = clone.execute().await.unwrap_err();
        assert!(err.to_string().contains("already executed"));
    }

    #[tokio::test]
    async fn cancel_interrupts_blocked_body_read() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (hold_tx, hold_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let _ = read_request_head(&mut sock).await;
            // Promise 10 bytes, deliver 3, then stall.
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc")
                .await
                .unwrap();
            let _ = hold_rx.await;
        });

        let client = HttpClient::builder().read_timeout(Duration::from_secs(30)).build();
        let call = client.call(Request::get(&format!("http://127.0.0.1:{}/s", port)).unwrap());
        let canceller = call.clone();
        let reader = tokio::spawn(async move {
            let mut response = call.execute().await?;
            response.body_mut().bytes().await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
        let err = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .expect("cancel must interrupt the read promptly")
            .unwrap()
            .unwrap_err();
        assert!(err.is_canceled(), "{}", err);
        drop(hold_tx);
    }
}
