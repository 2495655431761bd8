/*
 * parser.rs
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

//! HTTP/1.1 response push parser: status line, headers, body with
//! Content-Length, chunked, or read-until-close framing, and trailers.
//!
//! Feed bytes via `receive`; the sink is invoked as complete tokens are
//! parsed. Body framing is not chosen by the parser: after the header block
//! the parser parks in `HeadersComplete` until the connection layer calls
//! `set_body_mode`, because the decision needs the request method and the
//! framing priority rules.

use bytes::{Buf, Bytes, BytesMut};
use std::io;

use crate::response::Protocol;

/// Callback for response events, in wire order.
pub trait H1MessageSink {
    fn status(&mut self, protocol: Protocol, code: u16, reason: Option<&str>);
    fn header(&mut self, name: &str, value: &str);
    fn body_data(&mut self, data: Bytes);
    fn trailer(&mut self, name: &str, value: &str);
    fn message_complete(&mut self);
}

/// Body framing chosen from the response head (and request method).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    /// 1xx, 204, 304, or a HEAD response: the message ends at the headers.
    None,
    Chunked,
    Fixed(u64),
    /// No framing information: the body runs to connection close.
    UntilClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// Between messages.
    Idle,
    StatusLine,
    Headers,
    /// Headers done; waiting for `set_body_mode`.
    HeadersComplete,
    FixedBody,
    UntilCloseBody,
    ChunkSize,
    ChunkData,
    ChunkDataEnd,
    Trailers,
}

/// Push parser for one HTTP/1.1 response at a time.
pub struct ResponseParser {
    state: ParseState,
    remaining: u64,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::StatusLine,
            remaining: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Prepare for the next response on the same connection.
    pub fn reset(&mut self) {
        self.state = ParseState::StatusLine;
        self.remaining = 0;
    }

    /// Consume and parse as much as possible from `buf`, invoking the sink
    /// for each complete token. Partial data is left in `buf`.
    pub fn receive<S: H1MessageSink>(&mut self, buf: &mut BytesMut, sink: &mut S) -> io::Result<()> {
        loop {
            match self.state {
                ParseState::StatusLine => {
                    let line = match take_line(buf)? {
                        Some(l) => l,
                        None => return Ok(()),
                    };
                    let (protocol, code, reason) = parse_status_line(&line)?;
                    sink.status(protocol, code, reason);
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let line = match take_line(buf)? {
                        Some(l) => l,
                        None => return Ok(()),
                    };
                    if line.is_empty() {
                        self.state = ParseState::HeadersComplete;
                        return Ok(());
                    }
                    if let Some((name, value)) = split_header(&line) {
                        sink.header(name, value);
                    }
                }
                ParseState::HeadersComplete => return Ok(()),
                ParseState::FixedBody => {
                    if buf.is_empty() {
                        return Ok(());
                    }
                    let take = (self.remaining as usize).min(buf.len());
                    self.remaining -= take as u64;
                    sink.body_data(buf.split_to(take).freeze());
                    if self.remaining == 0 {
                        sink.message_complete();
                        self.state = ParseState::Idle;
                    }
                }
                ParseState::UntilCloseBody => {
                    if buf.is_empty() {
                        return Ok(());
                    }
                    sink.body_data(buf.split().freeze());
                    // Stays here until note_eof().
                }
                ParseState::ChunkSize => {
                    let line = match take_line(buf)? {
                        Some(l) => l,
                        None => return Ok(()),
                    };
                    let size_part = line.split(';').next().unwrap_or("").trim();
                    let size = u64::from_str_radix(size_part, 16).map_err(|_| {
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("invalid chunk size: {:?}", size_part),
                        )
                    })?;
                    if size == 0 {
                        self.state = ParseState::Trailers;
                    } else {
                        self.remaining = size;
                        self.state = ParseState::ChunkData;
                    }
                }
                ParseState::ChunkData => {
                    if buf.is_empty() {
                        return Ok(());
                    }
                    let take = (self.remaining as usize).min(buf.len());
                    self.remaining -= take as u64;
                    sink.body_data(buf.split_to(take).freeze());
                    if self.remaining == 0 {
                        self.state = ParseState::ChunkDataEnd;
                    }
                }
                ParseState::ChunkDataEnd => {
                    if buf.len() < 2 {
                        return Ok(());
                    }
                    if buf[..2] != *b"\r\n" {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "chunk data not terminated by CRLF",
                        ));
                    }
                    buf.advance(2);
                    self.state = ParseState::ChunkSize;
                }
                ParseState::Trailers => {
                    let line = match take_line(buf)? {
                        Some(l) => l,
                        None => return Ok(()),
                    };
                    if line.is_empty() {
                        sink.message_complete();
                        self.state = ParseState::Idle;
                    } else if let Some((name, value)) = split_header(&line) {
                        sink.trailer(name, value);
                    }
                }
                ParseState::Idle => return Ok(()),
            }
        }
    }

    /// Set the body framing once headers are complete. `BodyMode::None`
    /// completes the message immediately.
    pub fn set_body_mode<S: H1MessageSink>(&mut self, mode: BodyMode, sink: &mut S) {
        debug_assert_eq!(self.state, ParseState::HeadersComplete);
        match mode {
            BodyMode::None => {
                sink.message_complete();
                self.state = ParseState::Idle;
            }
            BodyMode::Chunked => self.state = ParseState::ChunkSize,
            BodyMode::Fixed(0) => {
                sink.message_complete();
                self.state = ParseState::Idle;
            }
            BodyMode::Fixed(n) => {
                self.remaining = n;
                self.state = ParseState::FixedBody;
            }
            BodyMode::UntilClose => self.state = ParseState::UntilCloseBody,
        }
    }

    /// The peer closed the connection. Valid only as the clean end of a
    /// read-until-close body; anywhere else it is a truncation.
    pub fn note_eof<S: H1MessageSink>(&mut self, sink: &mut S) -> io::Result<()> {
        match self.state {
            ParseState::UntilCloseBody => {
                sink.message_complete();
                self.state = ParseState::Idle;
                Ok(())
            }
            ParseState::Idle => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-response",
            )),
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Take one CRLF-terminated line out of `buf`, excluding the CRLF.
/// Returns None when no complete line is buffered yet.
fn take_line(buf: &mut BytesMut) -> io::Result<Option<String>> {
    let end = match buf.windows(2).position(|w| w == b"\r\n") {
        Some(n) => n,
        None => return Ok(None),
    };
    let line = buf.split_to(end + 2);
    let text = std::str::from_utf8(&line[..end])
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "response line is not UTF-8"))?;
    Ok(Some(text.to_string()))
}

/// Parse a status line, tolerating the ICY and SOURCETABLE spellings some
/// servers emit in place of an HTTP-version token.
fn parse_status_line(line: &str) -> io::Result<(Protocol, u16, Option<&str>)> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    let protocol = match version {
        "HTTP/1.1" => Protocol::Http11,
        "HTTP/1.0" => Protocol::Http10,
        "ICY" => Protocol::Http10,
        "SOURCETABLE" => Protocol::Http11,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected status line: {:?}", other),
            ))
        }
    };
    let code = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .filter(|c| (100..600).contains(c))
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unparseable status code in {:?}", line),
            )
        })?;
    let reason = parts.next().filter(|r| !r.is_empty());
    Ok((protocol, code, reason))
}

fn split_header(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let name = line[..colon].trim();
    let value = line[colon + 1..].trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value))
}
