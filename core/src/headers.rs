/*
 * headers.rs
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

//! Ordered header multimap. Names compare case-insensitively, duplicates are
//! permitted, insertion order is preserved on the wire. Values are 8-bit
//! clean except CR, LF, and NUL, which are rejected on insertion.

use serde::{Deserialize, Serialize};

use crate::error::{HttpError, HttpResult};

/// Ordered sequence of (name, value) pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

/// RFC 7230 token characters, for header names.
fn is_token_char(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
        | b'^' | b'_' | b'`' | b'|' | b'~'
        | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z')
}

fn validate_name(name: &str) -> HttpResult<()> {
    if name.is_empty() || !name.bytes().all(is_token_char) {
        return Err(HttpError::config(format!("invalid header name: {:?}", name)));
    }
    Ok(())
}

fn validate_value(name: &str, value: &str) -> HttpResult<()> {
    if value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) {
        return Err(HttpError::config(format!(
            "header {} value contains CR, LF, or NUL",
            name
        )));
    }
    Ok(())
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a pair slice. Panics on invalid names/values; intended for
    /// literals in configuration and tests.
    pub fn of(pairs: &[(&str, &str)]) -> Self {
        let mut headers = Self::new();
        for (name, value) in pairs {
            headers.add(*name, *value).expect("invalid header literal");
        }
        headers
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a pair, keeping any existing pairs with the same name.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> HttpResult<()> {
        let name = name.into();
        let value = value.into();
        validate_name(&name)?;
        validate_value(&name, &value)?;
        self.entries.push((name, value));
        Ok(())
    }

    /// Replace all pairs with this name by a single pair.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> HttpResult<()> {
        let name = name.into();
        let value = value.into();
        validate_name(&name)?;
        validate_value(&name, &value)?;
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.entries.push((name, value));
        Ok(())
    }

    /// Remove all pairs with this name.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// First value for the name, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for the name, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = std::vec::IntoIter<(&'a str, &'a str)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_str()))
            .collect::<Vec<_>>()
            .into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut h = Headers::new();
        h.add("Content-Type", "text/plain").unwrap();
        assert_eq!(h.get("content-type"), Some("text/plain"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("text/plain"));
        assert!(h.contains("cOnTeNt-TyPe"));
    }

    #[test]
    fn duplicates_preserve_order() {
        let mut h = Headers::new();
        h.add("Set-Cookie", "a=1").unwrap();
        h.add("Set-Cookie", "b=2").unwrap();
        assert_eq!(h.get("set-cookie"), Some("a=1"));
        assert_eq!(h.get_all("set-cookie"), vec!["a=1", "b=2"]);
    }

    #[test]
    fn set_collapses_duplicates() {
        let mut h = Headers::new();
        h.add("Accept", "text/html").unwrap();
        h.add("accept", "text/plain").unwrap();
        h.set("Accept", "*/*").unwrap();
        assert_eq!(h.get_all("accept"), vec!["*/*"]);
    }

    #[test]
    fn crlf_and_nul_rejected() {
        let mut h = Headers::new();
        assert!(h.add("X-A", "ok\r\nInjected: yes").is_err());
        assert!(h.add("X-A", "nul\0byte").is_err());
        assert!(h.add("bad name", "v").is_err());
        assert!(h.add("", "v").is_err());
        // 8-bit clean otherwise
        assert!(h.add("X-A", "caf\u{e9}").is_ok());
    }
}
