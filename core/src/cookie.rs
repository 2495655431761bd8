/*
 * cookie.rs
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

//! Cookie jar seam. The bridge stage loads cookies into the request and
//! hands Set-Cookie responses back to the jar. Scope decisions (domain
//! matching, public-suffix rules) belong to the jar implementation, not the
//! engine.

use crate::uri::HttpUrl;

/// One cookie as received. Attributes are kept verbatim; the engine does not
/// interpret them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Attribute list after the first pair, e.g. ("Max-Age", Some("3600")).
    pub attributes: Vec<(String, Option<String>)>,
}

impl Cookie {
    /// Parse one Set-Cookie header value. Returns None when there is no
    /// name=value pair to speak of.
    pub fn parse(set_cookie: &str) -> Option<Cookie> {
        let mut parts = set_cookie.split(';');
        let first = parts.next()?.trim();
        let eq = first.find('=')?;
        let name = first[..eq].trim();
        if name.is_empty() {
            return None;
        }
        let value = first[eq + 1..].trim();
        let attributes = parts
            .map(|attr| {
                let attr = attr.trim();
                match attr.find('=') {
                    Some(i) => (
                        attr[..i].trim().to_string(),
                        Some(attr[i + 1..].trim().to_string()),
                    ),
                    None => (attr.to_string(), None),
                }
            })
            .collect();
        Some(Cookie {
            name: name.to_string(),
            value: value.to_string(),
            attributes,
        })
    }

    /// Render as it appears inside a Cookie request header.
    pub fn pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Cookie storage seam. Called synchronously from the bridge stage.
pub trait CookieJar: Send + Sync {
    /// Cookies to attach to a request for this URL.
    fn load(&self, url: &HttpUrl) -> Vec<Cookie>;

    /// Cookies received in a response for this URL.
    fn save(&self, url: &HttpUrl, cookies: Vec<Cookie>);
}

/// Jar that stores nothing and sends nothing. The default.
pub struct NoCookies;

impl CookieJar for NoCookies {
    fn load(&self, _url: &HttpUrl) -> Vec<Cookie> {
        Vec::new()
    }

    fn save(&self, _url: &HttpUrl, _cookies: Vec<Cookie>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple() {
        let c = Cookie::parse("sid=abc123").unwrap();
        assert_eq!(c.name, "sid");
        assert_eq!(c.value, "abc123");
        assert!(c.attributes.is_empty());
        assert_eq!(c.pair(), "sid=abc123");
    }

    #[test]
    fn parse_with_attributes() {
        let c = Cookie::parse("a=b; Path=/; Secure; Max-Age=60").unwrap();
        assert_eq!(c.attributes.len(), 3);
        assert_eq!(c.attributes[0], ("Path".into(), Some("/".into())));
        assert_eq!(c.attributes[1], ("Secure".into(), None));
    }

    #[test]
    fn parse_rejects_nameless() {
        assert!(Cookie::parse("=v").is_none());
        assert!(Cookie::parse("junk").is_none());
    }
}
