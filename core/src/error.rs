/*
 * error.rs
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

//! Engine error type. One error surfaces per call; causes suppressed during
//! route retries are carried along in order.

use std::fmt;
use std::io;

/// What went wrong, behaviorally. Recoverability is a property of the kind:
/// I/O and connection-shutdown failures may be retried on a fresh route,
/// protocol violations and cancellation may not.
#[derive(Debug)]
pub enum ErrorKind {
    /// Socket-level failure: connect refused, reset, timeout, TLS failure.
    Io(io::Error),
    /// The peer violated HTTP/1.1 or HTTP/2 framing; the connection is dead.
    Protocol(String),
    /// The call was canceled by the caller.
    Canceled,
    /// A new exchange was refused because the connection had already shut
    /// down (GOAWAY sent or received, or REFUSED_STREAM).
    ConnectionShutdown,
    /// Bad input before any I/O: malformed URL, invalid header, reused call.
    Config(String),
}

/// Error produced by the engine. Carries the failing request URL, the
/// identity of the connection in use (when one was bound), and the ordered
/// chain of causes suppressed by retries before this one was surfaced.
#[derive(Debug)]
pub struct HttpError {
    kind: ErrorKind,
    url: Option<String>,
    connection_id: Option<u64>,
    suppressed: Vec<HttpError>,
}

impl HttpError {
    pub fn io(err: io::Error) -> Self {
        Self::from_kind(ErrorKind::Io(err))
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::Protocol(msg.into()))
    }

    pub fn canceled() -> Self {
        Self::from_kind(ErrorKind::Canceled)
    }

    pub fn connection_shutdown() -> Self {
        Self::from_kind(ErrorKind::ConnectionShutdown)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::Config(msg.into()))
    }

    fn from_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            url: None,
            connection_id: None,
            suppressed: Vec::new(),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn connection_id(&self) -> Option<u64> {
        self.connection_id
    }

    /// Causes suppressed during retries, oldest first.
    pub fn suppressed(&self) -> &[HttpError] {
        &self.suppressed
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_connection(mut self, id: u64) -> Self {
        self.connection_id = Some(id);
        self
    }

    pub fn push_suppressed(&mut self, cause: HttpError) {
        self.suppressed.push(cause);
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self.kind, ErrorKind::Canceled)
    }

    /// True if a retry on a different route could plausibly succeed.
    /// Protocol violations and cancellation are terminal; timeouts on
    /// connect, resets, and shutdown races are not.
    pub fn is_recoverable(&self) -> bool {
        match &self.kind {
            ErrorKind::Io(_) | ErrorKind::ConnectionShutdown => true,
            ErrorKind::Protocol(_) | ErrorKind::Canceled | ErrorKind::Config(_) => false,
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Io(e) => write!(f, "i/o error: {}", e)?,
            ErrorKind::Protocol(m) => write!(f, "protocol error: {}", m)?,
            ErrorKind::Canceled => write!(f, "call canceled")?,
            ErrorKind::ConnectionShutdown => write!(f, "connection shut down before exchange")?,
            ErrorKind::Config(m) => write!(f, "{}", m)?,
        }
        if let Some(url) = &self.url {
            write!(f, " (url {})", url)?;
        }
        if let Some(id) = self.connection_id {
            write!(f, " (connection {})", id)?;
        }
        if !self.suppressed.is_empty() {
            write!(f, " [{} suppressed]", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for HttpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for HttpError {
    fn from(err: io::Error) -> Self {
        Self::io(err)
    }
}

pub type HttpResult<T> = Result<T, HttpError>;
