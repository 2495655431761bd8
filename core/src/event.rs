/*
 * event.rs
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

//! Observability hooks. All methods default to no-ops and are invoked
//! synchronously from the engine's own paths; listeners must return quickly.

use crate::connection::route::Route;
use crate::error::HttpError;
use crate::request::Request;
use crate::response::Protocol;

/// Lifecycle events of calls and connections.
#[allow(unused_variables)]
pub trait EventListener: Send + Sync {
    fn call_start(&self, request: &Request) {}
    fn call_end(&self, request: &Request) {}
    fn call_failed(&self, request: &Request, error: &HttpError) {}

    fn dns_start(&self, host: &str) {}
    fn dns_end(&self, host: &str, addresses: usize) {}

    fn connect_start(&self, route: &Route) {}
    fn connect_end(&self, route: &Route, protocol: Protocol) {}
    fn connect_failed(&self, route: &Route, error: &HttpError) {}

    fn connection_acquired(&self, connection_id: u64) {}
    fn connection_released(&self, connection_id: u64) {}

    fn cache_hit(&self, request: &Request) {}
    fn cache_miss(&self, request: &Request) {}
    fn cache_conditional_hit(&self, request: &Request) {}
}

/// Listener that observes nothing. The default.
pub struct NoEvents;

impl EventListener for NoEvents {}
