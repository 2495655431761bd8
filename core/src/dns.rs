/*
 * dns.rs
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

//! Name resolution seam. The route planner asks for all endpoints of a host
//! and rotates through them on connect failures.

use std::io;
use std::net::SocketAddr;

use crate::BoxFuture;

/// Hostname to endpoint list. Implementations must preserve resolver order;
/// the first endpoint is preferred.
pub trait DnsResolver: Send + Sync {
    fn resolve(&self, host: &str, port: u16) -> BoxFuture<'_, io::Result<Vec<SocketAddr>>>;
}

/// Stock resolver backed by the operating system via tokio.
pub struct SystemDns;

impl DnsResolver for SystemDns {
    fn resolve(&self, host: &str, port: u16) -> BoxFuture<'_, io::Result<Vec<SocketAddr>>> {
        let query = format!("{}:{}", host, port);
        Box::pin(async move {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host(&query).await?.collect();
            if addrs.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses for {}", query),
                ));
            }
            Ok(addrs)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_loopback_literal() {
        let addrs = SystemDns.resolve("127.0.0.1", 8080).await.unwrap();
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].port(), 8080);
        assert!(addrs[0].ip().is_loopback());
    }
}
