/*
 * uri.rs
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

//! HTTP URLs: scheme (http/https), host, port, path, query. Fragments are
//! dropped at parse time; they never reach the wire. Paths keep the form the
//! caller gave them apart from percent-encoding of characters that cannot
//! appear in a request target.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt;

use crate::error::{HttpError, HttpResult};

/// Characters percent-encoded inside a path: controls, space, and the
/// delimiters that would change the request-target structure.
const PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'|')
    .add(b'\\')
    .add(b'^');

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// Parsed HTTP URL. Immutable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HttpUrl {
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
    query: Option<String>,
}

impl HttpUrl {
    /// Parse an absolute http:// or https:// URL.
    pub fn parse(input: &str) -> HttpResult<Self> {
        let (scheme, rest) = if let Some(rest) = strip_prefix_ignore_case(input, "http://") {
            (Scheme::Http, rest)
        } else if let Some(rest) = strip_prefix_ignore_case(input, "https://") {
            (Scheme::Https, rest)
        } else {
            return Err(HttpError::config(format!("unsupported URL scheme: {}", input)));
        };

        // Authority runs to the first '/', '?', or '#'.
        let authority_end = rest
            .find(|c| c == '/' || c == '?' || c == '#')
            .unwrap_or(rest.len());
        let authority = &rest[..authority_end];
        let tail = &rest[authority_end..];

        // Userinfo is not supported; a URL carrying one is rejected rather
        // than silently leaking credentials into the Host header.
        if authority.contains('@') {
            return Err(HttpError::config("userinfo in URL is not supported"));
        }

        let (host, port) = split_host_port(authority, scheme)?;
        if host.is_empty() {
            return Err(HttpError::config(format!("URL has no host: {}", input)));
        }

        let (path, query) = split_path_query(tail);
        Ok(Self {
            scheme,
            host,
            port,
            path,
            query,
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn is_https(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// Host without brackets; may be a name, IPv4, or IPv6 literal.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Path plus query, as written into an origin-form request line.
    pub fn request_target(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// Value for the Host header: host, with the port only when non-default.
    pub fn host_header(&self) -> String {
        let host = self.host_for_authority();
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// host:port pair, always explicit. Used for CONNECT targets.
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host_for_authority(), self.port)
    }

    fn host_for_authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    /// Resolve a Location header value against this URL. Handles absolute
    /// URLs, scheme-relative, absolute-path, and relative references.
    pub fn resolve(&self, reference: &str) -> HttpResult<HttpUrl> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Ok(self.clone());
        }
        if starts_with_ignore_case(reference, "http://")
            || starts_with_ignore_case(reference, "https://")
        {
            return HttpUrl::parse(reference);
        }
        if let Some(rest) = reference.strip_prefix("//") {
            return HttpUrl::parse(&format!("{}://{}", self.scheme.as_str(), rest));
        }
        let (ref_path, ref_query) = split_path_query(reference);
        let path = if reference.starts_with('/') {
            ref_path
        } else if reference.starts_with('?') {
            self.path.clone()
        } else {
            // Merge with the base path's directory.
            let base_dir = match self.path.rfind('/') {
                Some(i) => &self.path[..=i],
                None => "/",
            };
            remove_dot_segments(&format!("{}{}", base_dir, ref_path))
        };
        Ok(HttpUrl {
            scheme: self.scheme,
            host: self.host.clone(),
            port: self.port,
            path,
            query: ref_query,
        })
    }
}

impl fmt::Display for HttpUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.host_for_authority())?;
        if self.port != self.scheme.default_port() {
            write!(f, ":{}", self.port)?;
        }
        write!(f, "{}", self.path)?;
        if let Some(q) = &self.query {
            write!(f, "?{}", q)?;
        }
        Ok(())
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    strip_prefix_ignore_case(s, prefix).is_some()
}

fn split_host_port(authority: &str, scheme: Scheme) -> HttpResult<(String, u16)> {
    if let Some(rest) = authority.strip_prefix('[') {
        // IPv6 literal
        let close = rest
            .find(']')
            .ok_or_else(|| HttpError::config("unterminated IPv6 literal in URL"))?;
        let host = rest[..close].to_ascii_lowercase();
        let after = &rest[close + 1..];
        let port = match after.strip_prefix(':') {
            Some(p) => parse_port(p)?,
            None if after.is_empty() => scheme.default_port(),
            None => return Err(HttpError::config("junk after IPv6 literal in URL")),
        };
        return Ok((host, port));
    }
    match authority.rfind(':') {
        Some(i) => Ok((
            authority[..i].to_ascii_lowercase(),
            parse_port(&authority[i + 1..])?,
        )),
        None => Ok((authority.to_ascii_lowercase(), scheme.default_port())),
    }
}

fn parse_port(s: &str) -> HttpResult<u16> {
    s.parse::<u16>()
        .map_err(|_| HttpError::config(format!("invalid port: {:?}", s)))
}

fn split_path_query(tail: &str) -> (String, Option<String>) {
    // Drop any fragment first.
    let tail = match tail.find('#') {
        Some(i) => &tail[..i],
        None => tail,
    };
    let (path, query) = match tail.find('?') {
        Some(i) => (&tail[..i], Some(tail[i + 1..].to_string())),
        None => (tail, None),
    };
    let path = if path.is_empty() {
        "/".to_string()
    } else {
        utf8_percent_encode(path, PATH).to_string()
    };
    (path, query)
}

/// RFC 3986 §5.2.4, the parts reachable from relative references.
fn remove_dot_segments(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s),
        }
    }
    let mut joined = out.join("/");
    if !joined.starts_with('/') {
        joined.insert(0, '/');
    }
    joined
}
