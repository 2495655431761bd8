/*
 * route.rs
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

//! Addresses and routes. An [`Address`] is the abstract endpoint a request
//! targets, including its TLS mode and proxy policy; a [`Route`] is one
//! concrete dialing plan for it. Route equality drives pool matching.

use std::fmt;
use std::net::SocketAddr;

use crate::response::Protocol;
use crate::uri::HttpUrl;

/// Proxy for one hop. `Direct` dials the origin itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Proxy {
    Direct,
    /// HTTP proxy: absolute-form targets on plaintext, CONNECT for TLS.
    Http {
        host: String,
        port: u16,
        /// Pre-built Proxy-Authorization value, when the proxy needs one.
        authorization: Option<String>,
    },
    /// SOCKS5 proxy, no authentication.
    Socks { host: String, port: u16 },
}

impl Proxy {
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Proxy::Http {
            host: host.into(),
            port,
            authorization: None,
        }
    }

    pub fn socks(host: impl Into<String>, port: u16) -> Self {
        Proxy::Socks {
            host: host.into(),
            port,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Proxy::Direct)
    }

    /// Host and port the transport actually dials for this proxy, or None
    /// for direct connections (which dial the origin).
    pub fn dial_target(&self) -> Option<(&str, u16)> {
        match self {
            Proxy::Direct => None,
            Proxy::Http { host, port, .. } | Proxy::Socks { host, port } => {
                Some((host.as_str(), *port))
            }
        }
    }
}

/// Chooses proxies for a URL. Consulted only when the client has no
/// explicitly configured proxy.
pub trait ProxySelector: Send + Sync {
    /// Proxies to attempt, in preference order. Must not be empty.
    fn select(&self, url: &HttpUrl) -> Vec<Proxy>;
}

/// Selector that always goes direct. The default.
pub struct NoProxy;

impl ProxySelector for NoProxy {
    fn select(&self, _url: &HttpUrl) -> Vec<Proxy> {
        vec![Proxy::Direct]
    }
}

/// The abstract endpoint of a request: origin host and port, TLS mode,
/// acceptable protocols, and proxy policy. Two addresses are equal iff a
/// connection made for one can serve the other.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    host: String,
    port: u16,
    secure: bool,
    protocols: Vec<Protocol>,
    /// Explicit proxy from configuration; None defers to the selector.
    proxy: Option<Proxy>,
}

impl Address {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        secure: bool,
        protocols: Vec<Protocol>,
        proxy: Option<Proxy>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
            protocols,
            proxy,
        }
    }

    pub fn from_url(url: &HttpUrl, protocols: Vec<Protocol>, proxy: Option<Proxy>) -> Self {
        Self::new(url.host(), url.port(), url.is_https(), protocols, proxy)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    pub fn explicit_proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}",
            if self.secure { "https" } else { "http" },
            self.host,
            self.port
        )
    }
}

/// One concrete way to reach an address: the proxy hop and the resolved
/// socket endpoint. Equality over all three components; the pool reuses an
/// idle HTTP/1 connection only on an identical route.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Route {
    pub address: Address,
    pub proxy: Proxy,
    pub endpoint: SocketAddr,
}

impl Route {
    pub fn new(address: Address, proxy: Proxy, endpoint: SocketAddr) -> Self {
        Self {
            address,
            proxy,
            endpoint,
        }
    }

    /// CONNECT tunneling is needed when TLS crosses an HTTP proxy.
    pub fn requires_tunnel(&self) -> bool {
        self.address.secure && matches!(self.proxy, Proxy::Http { .. })
    }

    /// Plaintext requests through an HTTP proxy use absolute-form targets.
    pub fn uses_absolute_form(&self) -> bool {
        !self.address.secure && matches!(self.proxy, Proxy::Http { .. })
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {:?} at {}", self.address, self.proxy, self.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(secure: bool) -> Address {
        Address::new("example.com", if secure { 443 } else { 80 }, secure, vec![Protocol::Http11], None)
    }

    #[test]
    fn route_equality_is_componentwise() {
        let ep1: SocketAddr = "10.0.0.1:443".parse().unwrap();
        let ep2: SocketAddr = "10.0.0.2:443".parse().unwrap();
        let r1 = Route::new(addr(true), Proxy::Direct, ep1);
        let r2 = Route::new(addr(true), Proxy::Direct, ep1);
        let r3 = Route::new(addr(true), Proxy::Direct, ep2);
        let r4 = Route::new(addr(true), Proxy::http("p", 3128), ep1);
        assert_eq!(r1, r2);
        assert_ne!(r1, r3);
        assert_ne!(r1, r4);
    }

    #[test]
    fn tunnel_and_absolute_form() {
        let ep: SocketAddr = "10.0.0.1:3128".parse().unwrap();
        let tls_via_proxy = Route::new(addr(true), Proxy::http("p", 3128), ep);
        assert!(tls_via_proxy.requires_tunnel());
        assert!(!tls_via_proxy.uses_absolute_form());

        let plain_via_proxy = Route::new(addr(false), Proxy::http("p", 3128), ep);
        assert!(!plain_via_proxy.requires_tunnel());
        assert!(plain_via_proxy.uses_absolute_form());

        let direct = Route::new(addr(true), Proxy::Direct, ep);
        assert!(!direct.requires_tunnel());

        let socks = Route::new(addr(true), Proxy::socks("s", 1080), ep);
        assert!(!socks.requires_tunnel());
    }
}
