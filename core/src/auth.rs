/*
 * auth.rs
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

//! Authentication seam. The retry stage calls the authenticator on 401 and
//! 407 responses; the authenticator either produces a request carrying
//! credentials or gives up by returning None.

use crate::connection::route::Route;
use crate::request::Request;
use crate::response::Response;

/// Reacts to an authentication challenge. Returning the same credential a
/// second time ends the retry loop, so implementations need not track their
/// own attempt counts for static credentials.
pub trait Authenticator: Send + Sync {
    /// Build a request satisfying the challenge in `response`, or None to
    /// give up. `route` is the route the challenge arrived on, when known;
    /// for 407 it identifies the proxy.
    fn authenticate(&self, route: Option<&Route>, response: &Response) -> Option<Request>;
}

/// Authenticator that never answers a challenge. The default.
pub struct NoAuthenticator;

impl Authenticator for NoAuthenticator {
    fn authenticate(&self, _route: Option<&Route>, _response: &Response) -> Option<Request> {
        None
    }
}

/// Static HTTP Basic credentials for origin-server challenges.
pub struct BasicAuthenticator {
    header_value: String,
}

impl BasicAuthenticator {
    pub fn new(username: &str, password: &str) -> Self {
        use base64::Engine;
        let raw = format!("{}:{}", username, password);
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw.as_bytes());
        Self {
            header_value: format!("Basic {}", encoded),
        }
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate(&self, _route: Option<&Route>, response: &Response) -> Option<Request> {
        if response.code() != 401 {
            return None;
        }
        response
            .request()
            .to_builder()
            .set_header("Authorization", &self.header_value)
            .ok()
            .map(|b| b.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;
    use crate::response::{Protocol, ResponseHead};

    fn challenge(code: u16) -> Response {
        let req = Request::get("http://h/secret").unwrap();
        Response::builder(
            req,
            ResponseHead {
                protocol: Protocol::Http11,
                code,
                reason: None,
                headers: Headers::of(&[("WWW-Authenticate", "Basic realm=\"r\"")]),
            },
        )
        .build()
    }

    #[test]
    fn basic_answers_401() {
        let auth = BasicAuthenticator::new("aladdin", "opensesame");
        let next = auth.authenticate(None, &challenge(401)).unwrap();
        assert_eq!(
            next.header("authorization"),
            Some("Basic YWxhZGRpbjpvcGVuc2VzYW1l")
        );
    }

    #[test]
    fn basic_ignores_proxy_challenge() {
        let auth = BasicAuthenticator::new("u", "p");
        assert!(auth.authenticate(None, &challenge(407)).is_none());
    }
}
