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

//! Connections: one dialed transport (plus its codec or session), shared
//! through the pool, carrying exchanges.
//!
//! State machine: IDLE ⇄ ACQUIRED, with LIMIT_REACHED for multiplexed
//! connections at their stream cap; NO_NEW_EXCHANGES never returns to
//! ACQUIRED; CLOSED is terminal.

pub mod exchange;
pub mod pool;
pub mod route;
pub mod route_planner;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{HttpError, HttpResult};
use crate::event::EventListener;
use crate::h1::Http1Codec;
use crate::h2::{H2Config, H2Session};
use crate::headers::Headers;
use crate::net::{socks5_connect, Handshake, HttpStream, TransportFactory};
use crate::request::{Method, Request};
use crate::response::Protocol;
use crate::uri::HttpUrl;

use route::{Proxy, Route};

/// Lifecycle of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Acquired,
    /// Multiplexed connection at the peer's stream cap; releases may make it
    /// acquirable again.
    LimitReached,
    /// Finishes current exchanges but accepts no new ones. One-way.
    NoNewExchanges,
    /// Terminal.
    Closed,
}

struct ConnMeta {
    state: ConnectionState,
    /// Exchanges currently holding this connection.
    holds: u32,
    idle_since: Instant,
    total_exchanges: u64,
}

pub(crate) enum ConnectionIo {
    H1(tokio::sync::Mutex<Http1Codec>),
    H2(H2Session),
}

/// Everything dialing needs from the client configuration.
pub(crate) struct ConnectParams {
    pub transport: Arc<dyn TransportFactory>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub h2_prior_knowledge: bool,
    pub ping_interval: Option<Duration>,
    pub events: Arc<dyn EventListener>,
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One live transport connection.
pub struct Connection {
    id: u64,
    route: Route,
    protocol: Protocol,
    handshake: Option<Handshake>,
    pub(crate) io: ConnectionIo,
    meta: Mutex<ConnMeta>,
}

impl Connection {
    /// Dial the route: TCP, then SOCKS or CONNECT setup as the proxy
    /// demands, then TLS with ALPN, then the protocol binding (for HTTP/2,
    /// preface + SETTINGS and the session tasks).
    pub(crate) async fn connect(route: Route, params: &ConnectParams) -> HttpResult<Connection> {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        params.events.connect_start(&route);
        let result = Self::connect_inner(id, &route, params).await;
        match &result {
            Ok(conn) => params.events.connect_end(&route, conn.protocol),
            Err(e) => params.events.connect_failed(&route, e),
        }
        result
    }

    async fn connect_inner(id: u64, route: &Route, params: &ConnectParams) -> HttpResult<Connection> {
        let mut tcp = params
            .transport
            .dial(route.endpoint, params.connect_timeout)
            .await
            .map_err(|e| HttpError::io(e).with_connection(id))?;

        if let Proxy::Socks { .. } = &route.proxy {
            socks5_connect(&mut tcp, route.address.host(), route.address.port())
                .await
                .map_err(|e| HttpError::io(e).with_connection(id))?;
        }

        let (stream, handshake, protocol) = if route.address.is_secure() {
            let tcp = if route.requires_tunnel() {
                establish_tunnel(tcp, route, params).await?
            } else {
                tcp
            };
            let (stream, handshake) = params
                .transport
                .secure(
                    tcp,
                    route.address.host().to_string(),
                    route.address.protocols().to_vec(),
                )
                .await
                .map_err(|e| HttpError::io(e).with_connection(id))?;
            let protocol = match handshake.alpn.as_deref() {
                Some("h2") => Protocol::H2,
                _ => Protocol::Http11,
            };
            (stream, Some(handshake), protocol)
        } else {
            let protocol = if params.h2_prior_knowledge {
                Protocol::H2
            } else {
                Protocol::Http11
            };
            (HttpStream::Plain(tcp), None, protocol)
        };

        debug!(connection = id, %route, protocol = %protocol, "connected");
        let io = match protocol {
            Protocol::H2 => ConnectionIo::H2(
                H2Session::start(
                    stream,
                    id,
                    H2Config {
                        write_timeout: params.write_timeout,
                        ping_interval: params.ping_interval,
                    },
                )
                .await?,
            ),
            _ => ConnectionIo::H1(tokio::sync::Mutex::new(Http1Codec::new(
                stream,
                params.read_timeout,
                params.write_timeout,
            ))),
        };

        Ok(Connection {
            id,
            route: route.clone(),
            protocol,
            handshake,
            io,
            meta: Mutex::new(ConnMeta {
                state: ConnectionState::Idle,
                holds: 0,
                idle_since: Instant::now(),
                total_exchanges: 0,
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn handshake(&self) -> Option<&Handshake> {
        self.handshake.as_ref()
    }

    pub fn is_multiplexed(&self) -> bool {
        matches!(self.io, ConnectionIo::H2(_))
    }

    pub fn state(&self) -> ConnectionState {
        self.meta.lock().unwrap().state
    }

    /// Whether a new exchange could be bound right now.
    pub fn can_accept_exchange(&self) -> bool {
        let meta = self.meta.lock().unwrap();
        match meta.state {
            ConnectionState::NoNewExchanges | ConnectionState::Closed => false,
            ConnectionState::Idle | ConnectionState::Acquired | ConnectionState::LimitReached => {
                match &self.io {
                    ConnectionIo::H1(_) => meta.holds == 0,
                    ConnectionIo::H2(session) => session.can_open_stream(),
                }
            }
        }
    }

    /// Take a hold for a new exchange. Returns false if the connection
    /// cannot accept one (lost a race, shut down, or at its cap).
    pub fn acquire(&self) -> bool {
        let mut meta = self.meta.lock().unwrap();
        let acceptable = match meta.state {
            ConnectionState::NoNewExchanges | ConnectionState::Closed => false,
            _ => match &self.io {
                ConnectionIo::H1(_) => meta.holds == 0,
                ConnectionIo::H2(session) => session.can_open_stream(),
            },
        };
        if !acceptable {
            return false;
        }
        meta.holds += 1;
        meta.total_exchanges += 1;
        meta.state = match &self.io {
            ConnectionIo::H2(session) if !session.can_open_stream() => ConnectionState::LimitReached,
            _ => ConnectionState::Acquired,
        };
        true
    }

    /// Release one exchange's hold.
    pub fn release(&self) {
        let mut meta = self.meta.lock().unwrap();
        debug_assert!(meta.holds > 0);
        meta.holds = meta.holds.saturating_sub(1);
        if meta.holds == 0 {
            meta.idle_since = Instant::now();
            if meta.state == ConnectionState::Acquired || meta.state == ConnectionState::LimitReached
            {
                meta.state = ConnectionState::Idle;
            }
        } else if meta.state == ConnectionState::LimitReached {
            if let ConnectionIo::H2(session) = &self.io {
                if session.can_open_stream() {
                    meta.state = ConnectionState::Acquired;
                }
            }
        }
    }

    /// Refuse all future exchanges; in-flight ones finish.
    pub fn no_new_exchanges(&self) {
        let mut meta = self.meta.lock().unwrap();
        if meta.state != ConnectionState::Closed {
            meta.state = ConnectionState::NoNewExchanges;
        }
    }

    /// Hard close. Safe to call repeatedly.
    pub fn close(self: &Arc<Self>) {
        {
            let mut meta = self.meta.lock().unwrap();
            if meta.state == ConnectionState::Closed {
                return;
            }
            meta.state = ConnectionState::Closed;
        }
        debug!(connection = self.id, "closing connection");
        match &self.io {
            ConnectionIo::H2(session) => session.shutdown(),
            ConnectionIo::H1(_) => {
                let conn = self.clone();
                tokio::spawn(async move {
                    if let ConnectionIo::H1(codec) = &conn.io {
                        codec.lock().await.shutdown().await;
                    }
                });
            }
        }
    }

    pub fn holds(&self) -> u32 {
        self.meta.lock().unwrap().holds
    }

    /// Idle time of an unheld connection; None while held.
    pub fn idle_for(&self) -> Option<Duration> {
        let meta = self.meta.lock().unwrap();
        if meta.holds == 0 {
            Some(meta.idle_since.elapsed())
        } else {
            None
        }
    }

    /// An HTTP/2 connection that saw GOAWAY or died must not be handed out;
    /// reflect that in the pool's view of the state.
    pub fn refresh_health(&self) {
        if let ConnectionIo::H2(session) = &self.io {
            if session.is_shutdown() {
                self.no_new_exchanges();
            }
        }
    }
}

/// CONNECT tunnel through an HTTP proxy, run on the raw TCP stream before
/// TLS. Any response but 2xx aborts the dial.
async fn establish_tunnel(
    tcp: TcpStream,
    route: &Route,
    params: &ConnectParams,
) -> HttpResult<TcpStream> {
    let target = format!("{}:{}", route.address.host(), route.address.port());
    let mut headers = Headers::new();
    headers.set("Host", target.clone())?;
    if let Proxy::Http {
        authorization: Some(value),
        ..
    } = &route.proxy
    {
        headers.set("Proxy-Authorization", value.clone())?;
    }
    let request = Request::builder(HttpUrl::parse(&format!("http://{}/", target))?)
        .method(Method::Other("CONNECT".to_string()))
        .headers(headers)
        .build();

    let mut codec = Http1Codec::new(
        HttpStream::Plain(tcp),
        params.read_timeout,
        params.write_timeout,
    );
    codec.write_request_head(&request, &target).await?;
    let head = codec.read_response_head().await?;
    if !(200..300).contains(&head.code) {
        return Err(HttpError::protocol(format!(
            "proxy refused CONNECT: {}",
            head.code
        )));
    }
    let (stream, leftover) = codec.into_stream();
    if !leftover.is_empty() {
        return Err(HttpError::protocol("proxy sent data before TLS handshake"));
    }
    match stream {
        HttpStream::Plain(tcp) => Ok(tcp),
        HttpStream::Tls(_) => unreachable!("tunnel runs on plain TCP"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::SystemTransport;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn params() -> ConnectParams {
        ConnectParams {
            transport: Arc::new(SystemTransport::new()),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            h2_prior_knowledge: false,
            ping_interval: None,
            events: Arc::new(crate::event::NoEvents),
        }
    }

    async fn listener_route(proxy: Proxy) -> (TcpListener, Route) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap();
        let address = route::Address::new(
            "127.0.0.1",
            endpoint.port(),
            false,
            vec![Protocol::Http11],
            None,
        );
        let route = Route::new(address, proxy, endpoint);
        (listener, route)
    }

    #[tokio::test]
    async fn plaintext_dial_yields_http11_idle_connection() {
        let (listener, route) = listener_route(Proxy::Direct).await;
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let conn = Connection::connect(route, &params()).await.unwrap();
        accept.await.unwrap();
        assert_eq!(conn.protocol(), Protocol::Http11);
        assert_eq!(conn.state(), ConnectionState::Idle);
        assert!(!conn.is_multiplexed());
        assert!(conn.handshake().is_none());
    }

    #[tokio::test]
    async fn h1_single_exchange_invariant() {
        let (listener, route) = listener_route(Proxy::Direct).await;
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let conn = Connection::connect(route, &params()).await.unwrap();
        accept.await.unwrap();

        assert!(conn.acquire());
        assert_eq!(conn.state(), ConnectionState::Acquired);
        // A second exchange may not share an HTTP/1 connection.
        assert!(!conn.acquire());
        conn.release();
        assert_eq!(conn.state(), ConnectionState::Idle);
        assert!(conn.acquire());
        conn.release();
    }

    #[tokio::test]
    async fn no_new_exchanges_is_one_way() {
        let (listener, route) = listener_route(Proxy::Direct).await;
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let conn = Connection::connect(route, &params()).await.unwrap();
        accept.await.unwrap();

        conn.no_new_exchanges();
        assert!(!conn.acquire());
        assert_eq!(conn.state(), ConnectionState::NoNewExchanges);
    }

    #[tokio::test]
    async fn connect_tunnel_handshake() {
        // Fake proxy that grants the tunnel.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap();
        let proxy_task = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 512];
            let n = sock.read(&mut buf).await.unwrap();
            let text = String::from_utf8_lossy(&buf[..n]).into_owned();
            assert!(text.starts_with("CONNECT origin.example:443 HTTP/1.1\r\n"), "{}", text);
            assert!(text.contains("Proxy-Authorization: Basic dTpw\r\n"));
            sock.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                .await
                .unwrap();
        });

        let address = route::Address::new(
            "origin.example",
            443,
            true,
            vec![Protocol::Http11],
            None,
        );
        let proxy = Proxy::Http {
            host: "127.0.0.1".into(),
            port: endpoint.port(),
            authorization: Some("Basic dTpw".into()),
        };
        let route = Route::new(address, proxy, endpoint);
        let p = params();
        let tcp = p.transport.dial(endpoint, p.connect_timeout).await.unwrap();
        let tunneled = establish_tunnel(tcp, &route, &p).await;
        proxy_task.await.unwrap();
        assert!(tunneled.is_ok());
    }

    #[tokio::test]
    async fn tunnel_refusal_aborts_dial() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 512];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
        });
        let address = route::Address::new("origin.example", 443, true, vec![Protocol::Http11], None);
        let route = Route::new(address, Proxy::http("127.0.0.1", endpoint.port()), endpoint);
        let p = params();
        let tcp = p.transport.dial(endpoint, p.connect_timeout).await.unwrap();
        assert!(establish_tunnel(tcp, &route, &p).await.is_err());
    }
}
