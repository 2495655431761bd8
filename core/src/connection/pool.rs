/*
 * pool.rs
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

//! Connection pool: caches live connections for reuse across calls.
//!
//! Acquisition preference: a multiplexed connection to the same address
//! first, then an idle HTTP/1 connection on the identical route; otherwise
//! the caller dials a fresh route. A background sweeper evicts connections
//! that overstay the keep-alive and bounds the idle count.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::route::{Address, Route};
use super::{Connection, ConnectionState};

pub const DEFAULT_MAX_IDLE: usize = 5;
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(5 * 60);

struct PoolInner {
    connections: Mutex<Vec<Arc<Connection>>>,
    max_idle: usize,
    keep_alive: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Shared cache of connections, keyed by address and route equality.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(max_idle: usize, keep_alive: Duration) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connections: Mutex::new(Vec::new()),
                max_idle,
                keep_alive,
                sweeper: Mutex::new(None),
            }),
        }
    }

    /// Rule 1: a multiplexed connection to the same address with stream
    /// capacity left. Returns it already acquired.
    pub fn find_multiplexed(&self, address: &Address) -> Option<Arc<Connection>> {
        let connections = self.inner.connections.lock().unwrap();
        for conn in connections.iter() {
            if !conn.is_multiplexed() || conn.route().address != *address {
                continue;
            }
            conn.refresh_health();
            if conn.acquire() {
                trace!(connection = conn.id(), "reusing multiplexed connection");
                return Some(conn.clone());
            }
        }
        None
    }

    /// Rule 2: an idle HTTP/1 connection on the exact route whose keep-alive
    /// has not expired. Returns it already acquired.
    pub fn find_idle_route(&self, route: &Route) -> Option<Arc<Connection>> {
        self.find_idle(|conn| conn.route() == route)
    }

    /// Idle HTTP/1 connection whose own route serves this address. Used for
    /// follow-ups within a call, before route enumeration runs again.
    pub fn find_idle_address(&self, address: &Address) -> Option<Arc<Connection>> {
        self.find_idle(|conn| conn.route().address == *address)
    }

    fn find_idle(&self, matches: impl Fn(&Connection) -> bool) -> Option<Arc<Connection>> {
        let connections = self.inner.connections.lock().unwrap();
        for conn in connections.iter() {
            if conn.is_multiplexed() || !matches(conn.as_ref()) {
                continue;
            }
            match conn.idle_for() {
                Some(idle) if idle < self.inner.keep_alive => {}
                _ => continue,
            }
            if conn.acquire() {
                trace!(connection = conn.id(), "reusing idle connection");
                return Some(conn.clone());
            }
        }
        None
    }

    /// Share a freshly dialed connection and make sure the sweeper runs.
    pub fn add(&self, connection: Arc<Connection>) {
        self.inner
            .connections
            .lock()
            .unwrap()
            .push(connection.clone());
        debug!(connection = connection.id(), "connection added to pool");
        self.ensure_sweeper();
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().unwrap().len()
    }

    pub fn idle_count(&self) -> usize {
        self.inner
            .connections
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.holds() == 0)
            .count()
    }

    /// One sweep: drop dead connections, close the least-recently-used idle
    /// connection past the keep-alive, and enforce the idle cap
    /// oldest-first.
    pub fn sweep(&self) {
        let mut doomed: Vec<Arc<Connection>> = Vec::new();
        {
            let mut connections = self.inner.connections.lock().unwrap();
            connections.retain(|conn| {
                let dead = matches!(conn.state(), ConnectionState::Closed)
                    || (matches!(conn.state(), ConnectionState::NoNewExchanges)
                        && conn.holds() == 0);
                if dead {
                    doomed.push(conn.clone());
                }
                !dead
            });

            // Oldest idle connection past the keep-alive.
            if let Some(oldest) = connections
                .iter()
                .filter(|c| c.holds() == 0)
                .max_by_key(|c| c.idle_for().unwrap_or(Duration::ZERO))
                .cloned()
            {
                if oldest.idle_for().unwrap_or(Duration::ZERO) >= self.inner.keep_alive {
                    connections.retain(|c| !Arc::ptr_eq(c, &oldest));
                    doomed.push(oldest);
                }
            }

            // Idle cap, evicting oldest-first.
            loop {
                let idle: Vec<Arc<Connection>> = connections
                    .iter()
                    .filter(|c| c.holds() == 0)
                    .cloned()
                    .collect();
                if idle.len() <= self.inner.max_idle {
                    break;
                }
                let oldest = idle
                    .iter()
                    .max_by_key(|c| c.idle_for().unwrap_or(Duration::ZERO))
                    .cloned()
                    .expect("non-empty idle list");
                connections.retain(|c| !Arc::ptr_eq(c, &oldest));
                doomed.push(oldest);
            }
        }
        for conn in doomed {
            debug!(connection = conn.id(), "evicting connection");
            conn.close();
        }
    }

    /// Close everything immediately.
    pub fn close_all(&self) {
        let drained: Vec<Arc<Connection>> = {
            let mut connections = self.inner.connections.lock().unwrap();
            connections.drain(..).collect()
        };
        for conn in drained {
            conn.close();
        }
    }

    fn ensure_sweeper(&self) {
        let mut sweeper = self.inner.sweeper.lock().unwrap();
        if sweeper.is_some() {
            return;
        }
        let weak: Weak<PoolInner> = Arc::downgrade(&self.inner);
        let period = (self.inner.keep_alive / 2).max(Duration::from_secs(1));
        *sweeper = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                match weak.upgrade() {
                    Some(inner) => ConnectionPool { inner }.sweep(),
                    None => return,
                }
            }
        }));
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::route::Proxy;
    use crate::connection::ConnectParams;
    use crate::net::SystemTransport;
    use crate::response::Protocol;
    use tokio::net::TcpListener;

    async fn dialed_connection(keep: &mut Vec<tokio::net::TcpStream>) -> Arc<Connection> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap();
        let address = Address::new(
            "127.0.0.1",
            endpoint.port(),
            false,
            vec![Protocol::Http11],
            None,
        );
        let route = Route::new(address, Proxy::Direct, endpoint);
        let params = ConnectParams {
            transport: Arc::new(SystemTransport::new()),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            h2_prior_knowledge: false,
            ping_interval: None,
            events: Arc::new(crate::event::NoEvents),
        };
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let conn = Arc::new(Connection::connect(route, &params).await.unwrap());
        keep.push(accept.await.unwrap().0);
        conn
    }

    #[tokio::test]
    async fn idle_route_reuse_requires_exact_route() {
        let mut socks = Vec::new();
        let pool = ConnectionPool::new(DEFAULT_MAX_IDLE, DEFAULT_KEEP_ALIVE);
        let conn = dialed_connection(&mut socks).await;
        let route = conn.route().clone();
        pool.add(conn.clone());

        let reused = pool.find_idle_route(&route).unwrap();
        assert_eq!(reused.id(), conn.id());
        // Held now, so a second reuse attempt fails (HTTP/1 single exchange).
        assert!(pool.find_idle_route(&route).is_none());
        reused.release();
        assert!(pool.find_idle_route(&route).is_some());
    }

    #[tokio::test]
    async fn poisoned_connections_are_not_reused_and_get_swept() {
        let mut socks = Vec::new();
        let pool = ConnectionPool::new(DEFAULT_MAX_IDLE, DEFAULT_KEEP_ALIVE);
        let conn = dialed_connection(&mut socks).await;
        let route = conn.route().clone();
        pool.add(conn.clone());

        conn.no_new_exchanges();
        assert!(pool.find_idle_route(&route).is_none());
        pool.sweep();
        assert_eq!(pool.connection_count(), 0);
    }

    #[tokio::test]
    async fn idle_cap_evicts_excess() {
        let mut socks = Vec::new();
        let pool = ConnectionPool::new(2, DEFAULT_KEEP_ALIVE);
        for _ in 0..4 {
            pool.add(dialed_connection(&mut socks).await);
        }
        assert_eq!(pool.connection_count(), 4);
        pool.sweep();
        assert_eq!(pool.connection_count(), 2);
    }

    #[tokio::test]
    async fn expired_keep_alive_evicts_lru() {
        let mut socks = Vec::new();
        let pool = ConnectionPool::new(DEFAULT_MAX_IDLE, Duration::from_millis(10));
        let conn = dialed_connection(&mut socks).await;
        pool.add(conn);
        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.sweep();
        assert_eq!(pool.connection_count(), 0);
    }
}
