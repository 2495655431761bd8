/*
 * route_planner.rs
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

//! Route planning: lazily enumerate (proxy, endpoint) pairs for an address,
//! trying routes that failed recently last.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::dns::DnsResolver;
use crate::error::{HttpError, HttpResult};
use crate::event::EventListener;
use crate::uri::HttpUrl;

use super::route::{Address, Proxy, ProxySelector, Route};

/// Upper bound on remembered failures; oldest entries fall off.
const MAX_FAILED_ROUTES: usize = 64;

/// Client-wide memory of routes that failed to connect. A failed route is
/// not skipped, only deprioritized; success clears the entry.
pub struct RouteDatabase {
    failed: Mutex<VecDeque<Route>>,
}

impl RouteDatabase {
    pub fn new() -> Self {
        Self {
            failed: Mutex::new(VecDeque::new()),
        }
    }

    pub fn failed(&self, route: &Route) {
        let mut failed = self.failed.lock().unwrap();
        if failed.contains(route) {
            return;
        }
        if failed.len() >= MAX_FAILED_ROUTES {
            failed.pop_front();
        }
        failed.push_back(route.clone());
    }

    /// A connection on this route succeeded; forget the failure.
    pub fn connected(&self, route: &Route) {
        self.failed.lock().unwrap().retain(|r| r != route);
    }

    pub fn should_postpone(&self, route: &Route) -> bool {
        self.failed.lock().unwrap().contains(route)
    }
}

impl Default for RouteDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy route iterator for one address. Enumerates proxies in preference
/// order, resolves each dial host on demand, and yields previously-failed
/// routes only after all healthy candidates are exhausted.
pub struct RouteSelector {
    address: Address,
    dns: Arc<dyn DnsResolver>,
    route_db: Arc<RouteDatabase>,
    events: Arc<dyn EventListener>,
    proxies: Vec<Proxy>,
    next_proxy: usize,
    current_proxy: Option<Proxy>,
    endpoints: VecDeque<std::net::SocketAddr>,
    postponed: VecDeque<Route>,
    exhausted: bool,
}

impl RouteSelector {
    pub fn new(
        address: Address,
        url: &HttpUrl,
        proxy_selector: &dyn ProxySelector,
        dns: Arc<dyn DnsResolver>,
        route_db: Arc<RouteDatabase>,
        events: Arc<dyn EventListener>,
    ) -> Self {
        let proxies = match address.explicit_proxy() {
            Some(proxy) => vec![proxy.clone()],
            None => {
                let mut list = proxy_selector.select(url);
                if list.is_empty() {
                    list.push(Proxy::Direct);
                }
                list
            }
        };
        Self {
            address,
            dns,
            route_db,
            events,
            proxies,
            next_proxy: 0,
            current_proxy: None,
            endpoints: VecDeque::new(),
            postponed: VecDeque::new(),
            exhausted: false,
        }
    }

    /// True until `next` has returned None once.
    pub fn has_more(&self) -> bool {
        !self.exhausted
    }

    /// The next route to attempt, or None when every candidate (including
    /// postponed failures) has been handed out.
    pub async fn next(&mut self) -> HttpResult<Option<Route>> {
        loop {
            if let Some(endpoint) = self.endpoints.pop_front() {
                let proxy = self.current_proxy.clone().expect("proxy set with endpoints");
                let route = Route::new(self.address.clone(), proxy, endpoint);
                if self.route_db.should_postpone(&route) {
                    debug!(%route, "postponing previously failed route");
                    self.postponed.push_back(route);
                    continue;
                }
                return Ok(Some(route));
            }
            if self.next_proxy < self.proxies.len() {
                let proxy = self.proxies[self.next_proxy].clone();
                self.next_proxy += 1;
                self.resolve_endpoints(&proxy).await?;
                self.current_proxy = Some(proxy);
                continue;
            }
            if let Some(route) = self.postponed.pop_front() {
                return Ok(Some(route));
            }
            self.exhausted = true;
            return Ok(None);
        }
    }

    /// Resolve the dial host for a proxy hop: the proxy's own address for
    /// HTTP and SOCKS proxies, the origin host for direct connections.
    async fn resolve_endpoints(&mut self, proxy: &Proxy) -> HttpResult<()> {
        let (host, port) = match proxy.dial_target() {
            Some((host, port)) => (host.to_string(), port),
            None => (self.address.host().to_string(), self.address.port()),
        };
        self.events.dns_start(&host);
        let endpoints = self
            .dns
            .resolve(&host, port)
            .await
            .map_err(|e| HttpError::io(e).with_url(format!("{}:{}", host, port)))?;
        self.events.dns_end(&host, endpoints.len());
        self.endpoints = endpoints.into();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NoEvents;
    use crate::response::Protocol;
    use crate::BoxFuture;
    use std::io;
    use std::net::SocketAddr;

    struct FakeDns(Vec<&'static str>);

    impl DnsResolver for FakeDns {
        fn resolve(&self, _host: &str, port: u16) -> BoxFuture<'_, io::Result<Vec<SocketAddr>>> {
            let addrs = self
                .0
                .iter()
                .map(|ip| format!("{}:{}", ip, port).parse().unwrap())
                .collect();
            Box::pin(async move { Ok(addrs) })
        }
    }

    fn address() -> Address {
        Address::new("h", 80, false, vec![Protocol::Http11], None)
    }

    fn selector(dns: FakeDns, db: Arc<RouteDatabase>) -> RouteSelector {
        let url = HttpUrl::parse("http://h/").unwrap();
        RouteSelector::new(
            address(),
            &url,
            &crate::connection::route::NoProxy,
            Arc::new(dns),
            db,
            Arc::new(NoEvents),
        )
    }

    #[tokio::test]
    async fn yields_endpoints_in_resolver_order() {
        let mut sel = selector(
            FakeDns(vec!["10.0.0.1", "10.0.0.2"]),
            Arc::new(RouteDatabase::new()),
        );
        let r1 = sel.next().await.unwrap().unwrap();
        let r2 = sel.next().await.unwrap().unwrap();
        assert_eq!(r1.endpoint.to_string(), "10.0.0.1:80");
        assert_eq!(r2.endpoint.to_string(), "10.0.0.2:80");
        assert!(sel.next().await.unwrap().is_none());
        assert!(!sel.has_more());
    }

    #[tokio::test]
    async fn failed_routes_move_to_the_back() {
        let db = Arc::new(RouteDatabase::new());
        // Record 10.0.0.1 as failed.
        {
            let mut sel = selector(FakeDns(vec!["10.0.0.1"]), db.clone());
            let bad = sel.next().await.unwrap().unwrap();
            db.failed(&bad);
        }
        let mut sel = selector(FakeDns(vec!["10.0.0.1", "10.0.0.2"]), db.clone());
        let first = sel.next().await.unwrap().unwrap();
        let second = sel.next().await.unwrap().unwrap();
        assert_eq!(first.endpoint.to_string(), "10.0.0.2:80");
        assert_eq!(second.endpoint.to_string(), "10.0.0.1:80");
    }

    #[tokio::test]
    async fn success_clears_failure_memory() {
        let db = Arc::new(RouteDatabase::new());
        let mut sel = selector(FakeDns(vec!["10.0.0.1"]), db.clone());
        let route = sel.next().await.unwrap().unwrap();
        db.failed(&route);
        assert!(db.should_postpone(&route));
        db.connected(&route);
        assert!(!db.should_postpone(&route));
    }

    #[tokio::test]
    async fn explicit_proxy_is_the_only_proxy() {
        let url = HttpUrl::parse("http://h/").unwrap();
        let address = Address::new(
            "h",
            80,
            false,
            vec![Protocol::Http11],
            Some(Proxy::http("proxy.local", 3128)),
        );
        let mut sel = RouteSelector::new(
            address,
            &url,
            &crate::connection::route::NoProxy,
            Arc::new(FakeDns(vec!["10.9.9.9"])),
            Arc::new(RouteDatabase::new()),
            Arc::new(NoEvents),
        );
        let route = sel.next().await.unwrap().unwrap();
        // The dial endpoint is the proxy's, not the origin's.
        assert_eq!(route.endpoint.to_string(), "10.9.9.9:3128");
        assert_eq!(route.proxy, Proxy::http("proxy.local", 3128));
    }
}
