/*
 * connect.rs
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

//! Connect stage: binds an exchange to a connection before the terminal
//! stage runs. Reuses a pooled connection when the rules allow, otherwise
//! walks the route planner and dials, remembering failed routes.

use std::sync::Arc;

use crate::connection::exchange::Exchange;
use crate::connection::route::Address;
use crate::connection::route_planner::RouteSelector;
use crate::connection::Connection;
use crate::error::{HttpError, HttpResult};
use crate::response::Response;
use crate::BoxFuture;

use super::{Chain, Interceptor};

pub struct ConnectStage;

impl Interceptor for ConnectStage {
    fn intercept<'a>(&'a self, chain: &'a mut Chain) -> BoxFuture<'a, HttpResult<Response>> {
        Box::pin(async move {
            let request = chain.request().clone();
            let call = chain.call().clone();
            let client = call.client.clone();
            let address = Address::from_url(
                request.url(),
                client.protocols.clone(),
                client.proxy.clone(),
            );

            let mut dial_error: Option<HttpError> = None;
            let connection: Arc<Connection> = loop {
                if call.cancel.is_canceled() {
                    return Err(HttpError::canceled());
                }

                // Rule 1: share a multiplexed connection to the same address.
                if let Some(conn) = client.pool.find_multiplexed(&address) {
                    break conn;
                }

                // An idle connection this call (or a predecessor) already
                // used for the address serves follow-ups without running
                // route enumeration again.
                if let Some(conn) = client.pool.find_idle_address(&address) {
                    break conn;
                }

                // Walk the planner for the next concrete route.
                let route = {
                    let mut slot = call.route_selector.lock().await;
                    if slot.address.as_ref() != Some(&address) {
                        slot.selector = Some(RouteSelector::new(
                            address.clone(),
                            request.url(),
                            client.proxy_selector.as_ref(),
                            client.dns.clone(),
                            client.route_db.clone(),
                            client.events.clone(),
                        ));
                        slot.address = Some(address.clone());
                    }
                    let selector = slot.selector.as_mut().expect("selector initialized");
                    match selector.next().await {
                        Ok(Some(route)) => route,
                        Ok(None) => {
                            return Err(dial_error.unwrap_or_else(|| {
                                HttpError::io(std::io::Error::new(
                                    std::io::ErrorKind::NotFound,
                                    format!("exhausted all routes to {}", address),
                                ))
                            }))
                        }
                        Err(e) => {
                            let mut e = e;
                            if let Some(prior) = dial_error.take() {
                                e.push_suppressed(prior);
                            }
                            return Err(e);
                        }
                    }
                };

                // Rule 2: an idle HTTP/1 connection on the identical route.
                if let Some(conn) = client.pool.find_idle_route(&route) {
                    break conn;
                }

                // Rule 3: dial.
                match Connection::connect(route.clone(), &client.connect_params()).await {
                    Ok(conn) => {
                        client.route_db.connected(&route);
                        let conn = Arc::new(conn);
                        // Coalesce with a connection another call raced in.
                        if conn.is_multiplexed() {
                            if let Some(existing) = client.pool.find_multiplexed(&address) {
                                conn.close();
                                break existing;
                            }
                        }
                        if !conn.acquire() {
                            return Err(HttpError::connection_shutdown());
                        }
                        client.pool.add(conn.clone());
                        break conn;
                    }
                    Err(e) => {
                        client.route_db.failed(&route);
                        match dial_error.as_mut() {
                            Some(first) => first.push_suppressed(e),
                            None => dial_error = Some(e),
                        }
                    }
                }
            };

            client.events.connection_acquired(connection.id());
            let exchange = Exchange::new(connection, call.cancel.clone(), client.read_timeout);
            *call.exchange_cancel.lock().unwrap() = Some(exchange.cancel_handle());
            *call.exchange.lock().unwrap() = Some(exchange);

            chain.proceed(request).await
        })
    }
}
