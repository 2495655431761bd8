/*
 * exchange.rs
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

//! Exchange: the one-to-one binding of a request/response pair to a live
//! connection. Forwards request writes and response reads to the bound
//! codec or session, releases the connection hold when both directions
//! finish, and poisons the connection when a failure makes reuse unsafe.
//!
//! Every potentially blocking operation races the owning call's cancel
//! signal, so cancellation interrupts in-flight I/O promptly.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::call::CancelSignal;
use crate::error::{HttpError, HttpResult};
use crate::h1::BodyMode;
use crate::h2::{H2Session, StreamHandle};
use crate::headers::Headers;
use crate::request::{Method, Request, RequestBody};
use crate::response::{RawBody, ResponseBody, ResponseHead};
use crate::BoxFuture;

use super::{Connection, ConnectionIo};

/// How long to wait for a provisional response after Expect: 100-continue.
const EXPECT_CONTINUE_WAIT: Duration = Duration::from_secs(1);

enum ExchangeKind {
    H1,
    /// Stream is bound once the request HEADERS frame goes out.
    H2 { stream: Option<Arc<StreamHandle>> },
}

/// A live request/response binding. Obtained from the connect stage, driven
/// by the call-server stage, consumed into the response body.
pub struct Exchange {
    connection: Arc<Connection>,
    cancel: Arc<CancelSignal>,
    kind: ExchangeKind,
    read_timeout: Duration,
    released: bool,
}

impl Exchange {
    /// Bind to an acquired connection. The caller must already hold the
    /// connection (`Connection::acquire`).
    pub(crate) fn new(
        connection: Arc<Connection>,
        cancel: Arc<CancelSignal>,
        read_timeout: Duration,
    ) -> Self {
        let kind = match &connection.io {
            ConnectionIo::H1(_) => ExchangeKind::H1,
            ConnectionIo::H2(_) => ExchangeKind::H2 { stream: None },
        };
        Self {
            connection,
            cancel,
            kind,
            read_timeout,
            released: false,
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// A cheap handle the call keeps for cancellation wake-ups.
    pub(crate) fn cancel_handle(&self) -> ExchangeCancelHandle {
        ExchangeCancelHandle {
            connection: self.connection.clone(),
            stream: match &self.kind {
                ExchangeKind::H2 { stream } => stream.clone(),
                ExchangeKind::H1 => None,
            },
        }
    }

    fn check_canceled(&self) -> HttpResult<()> {
        if self.cancel.is_canceled() {
            Err(HttpError::canceled())
        } else {
            Ok(())
        }
    }

    /// Send the request line/HEADERS frame. For HTTP/2 this allocates the
    /// stream; a body-less request ends the stream immediately.
    pub async fn write_request_headers(&mut self, request: &Request) -> HttpResult<()> {
        self.check_canceled()?;
        let connection = self.connection.clone();
        let cancel = self.cancel.clone();
        match &connection.io {
            ConnectionIo::H1(codec) => {
                let target = if connection.route().uses_absolute_form() {
                    request.url().to_string()
                } else {
                    request.url().request_target()
                };
                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(HttpError::canceled()),
                    r = async {
                        codec.lock().await.write_request_head(request, &target).await
                    } => r.map_err(HttpError::io),
                };
                result.map_err(|e| self.note_failure(e))
            }
            ConnectionIo::H2(session) => {
                let end_stream = request.body().is_none();
                let headers = h2_request_headers(request);
                let opened = tokio::select! {
                    _ = cancel.cancelled() => Err(HttpError::canceled()),
                    r = session.open_stream(headers, end_stream) => r,
                };
                match opened {
                    Ok(handle) => {
                        if let ExchangeKind::H2 { stream } = &mut self.kind {
                            *stream = Some(handle);
                        }
                        Ok(())
                    }
                    Err(e) => Err(self.note_failure(e)),
                }
            }
        }
    }

    /// Write the whole request body and end the request direction.
    pub async fn write_request_body(&mut self, body: &RequestBody) -> HttpResult<()> {
        self.check_canceled()?;
        let connection = self.connection.clone();
        let cancel = self.cancel.clone();
        let result = match &connection.io {
            ConnectionIo::H1(codec) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(HttpError::canceled()),
                    r = async { codec.lock().await.write_request_body(body).await } => {
                        r.map_err(HttpError::io)
                    }
                }
            }
            ConnectionIo::H2(session) => {
                let stream = self.h2_stream();
                tokio::select! {
                    _ = cancel.cancelled() => Err(HttpError::canceled()),
                    r = session.write_data(&stream, body.payload().clone(), true) => r,
                }
            }
        };
        result.map_err(|e| self.note_failure(e))
    }

    /// End the request direction without a body. Needed when a 100-continue
    /// negotiation suppressed the body.
    pub async fn finish_request(&mut self) -> HttpResult<()> {
        let connection = self.connection.clone();
        if let ConnectionIo::H2(session) = &connection.io {
            let stream = self.h2_stream();
            let already_closed = stream.buf.lock().unwrap().closed_for_send;
            if !already_closed {
                session
                    .write_data(&stream, Bytes::new(), true)
                    .await
                    .map_err(|e| self.note_failure(e))?;
            }
        }
        Ok(())
    }

    fn h2_stream(&self) -> Arc<StreamHandle> {
        match &self.kind {
            ExchangeKind::H2 { stream } => stream.clone().expect("stream bound by headers write"),
            ExchangeKind::H1 => unreachable!("H1 exchange has no stream"),
        }
    }

    /// Read response heads until a usable one arrives.
    ///
    /// With `expect_continue`, waits a bounded time for a provisional
    /// response: `Ok(None)` means "transmit the body" (a 100 arrived or the
    /// wait elapsed); `Ok(Some(head))` with a final code means the server
    /// skipped the 100 and that head is the real response. Informational
    /// responses other than 100 and 101 are swallowed here.
    pub async fn read_response_head(
        &mut self,
        expect_continue: bool,
    ) -> HttpResult<Option<ResponseHead>> {
        let mut first_wait = expect_continue;
        loop {
            self.check_canceled()?;
            let head = match self.read_one_head(first_wait).await {
                Ok(Some(head)) => head,
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.note_failure(e)),
            };
            first_wait = false;
            match head.code {
                100 => {
                    self.discard_informational();
                    if expect_continue {
                        return Ok(None);
                    }
                }
                101 => return Ok(Some(head)),
                102..=199 => self.discard_informational(),
                _ => return Ok(Some(head)),
            }
        }
    }

    async fn read_one_head(&mut self, bounded: bool) -> HttpResult<Option<ResponseHead>> {
        match (&self.kind, &self.connection.io) {
            (ExchangeKind::H1, ConnectionIo::H1(codec)) => {
                let read = async { codec.lock().await.read_response_head().await };
                let read = async {
                    tokio::select! {
                        _ = self.cancel.cancelled() => Err(HttpError::canceled()),
                        r = read => r.map_err(HttpError::io),
                    }
                };
                if bounded {
                    match timeout(EXPECT_CONTINUE_WAIT, read).await {
                        Ok(result) => result.map(Some),
                        Err(_) => Ok(None),
                    }
                } else {
                    read.await.map(Some)
                }
            }
            (ExchangeKind::H2 { stream }, ConnectionIo::H2(session)) => {
                let stream = stream.clone().expect("headers written before response read");
                let read = async {
                    tokio::select! {
                        _ = self.cancel.cancelled() => Err(HttpError::canceled()),
                        r = session.read_head(&stream) => r,
                    }
                };
                if bounded {
                    match timeout(EXPECT_CONTINUE_WAIT, read).await {
                        Ok(result) => result.map(Some),
                        Err(_) => Ok(None),
                    }
                } else {
                    read.await.map(Some)
                }
            }
            _ => unreachable!(),
        }
    }

    fn discard_informational(&mut self) {
        if let ConnectionIo::H1(codec) = &self.connection.io {
            // The codec lock is uncontended: this exchange owns the
            // connection exclusively.
            if let Ok(mut codec) = codec.try_lock() {
                codec.discard_informational();
            }
        }
        // HTTP/2 informational heads are separate HEADERS frames; nothing to
        // rewind.
    }

    /// Refuse further exchanges on the bound connection.
    pub fn no_new_exchanges_on_connection(&self) {
        self.connection.no_new_exchanges();
    }

    /// Bind the response body and hand the connection hold to it. The body
    /// releases the hold at its clean end (or poisons the connection on
    /// failure / early drop).
    pub fn into_response_body(
        mut self,
        request_method: &Method,
        head: &ResponseHead,
    ) -> HttpResult<ResponseBody> {
        self.released = true;
        let content_type = head.headers.get("content-type").map(|s| s.to_string());
        let content_length = head
            .headers
            .get("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok());

        match (&self.kind, &self.connection.io) {
            (ExchangeKind::H1, ConnectionIo::H1(codec)) => {
                let mode = {
                    let mut codec = codec
                        .try_lock()
                        .expect("exclusive H1 exchange");
                    codec.begin_body(request_method, head).map_err(HttpError::io)?
                };
                if mode == BodyMode::UntilClose {
                    // This response consumes the connection.
                    self.connection.no_new_exchanges();
                }
                if matches!(mode, BodyMode::None | BodyMode::Fixed(0)) {
                    // Message already complete; release the hold now so an
                    // unread empty body cannot strand the connection.
                    if let Ok(mut codec) = codec.try_lock() {
                        codec.prepare_next_exchange();
                    }
                    self.connection.release();
                    return Ok(ResponseBody::buffered(content_type, Bytes::new()));
                }
                let reported_length = match mode {
                    BodyMode::Fixed(n) => Some(n),
                    _ => content_length,
                };
                let source = H1Body {
                    connection: self.connection.clone(),
                    cancel: self.cancel.clone(),
                    trailers: None,
                    done: false,
                };
                Ok(ResponseBody::new(content_type, reported_length, Box::new(source)))
            }
            (ExchangeKind::H2 { stream }, ConnectionIo::H2(_)) => {
                let stream = stream.clone().expect("headers written before body");
                let empty = *request_method == Method::Head
                    || head.code == 204
                    || head.code == 304;
                let source = H2Body {
                    connection: self.connection.clone(),
                    cancel: self.cancel.clone(),
                    stream,
                    read_timeout: self.read_timeout,
                    done: false,
                    drain_only: empty,
                };
                let reported_length = if empty { Some(0) } else { content_length };
                Ok(ResponseBody::new(content_type, reported_length, Box::new(source)))
            }
            _ => unreachable!(),
        }
    }

    /// Record a failure and decide whether the connection survives. An
    /// HTTP/1 connection cannot be resequenced after a broken exchange; an
    /// HTTP/2 connection outlives stream-level failures, and session-level
    /// ones are reflected through its own shutdown state.
    fn note_failure(&mut self, error: HttpError) -> HttpError {
        match &self.connection.io {
            ConnectionIo::H1(_) => self.connection.no_new_exchanges(),
            ConnectionIo::H2(_) => self.connection.refresh_health(),
        }
        error.with_connection(self.connection.id())
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Abandoned before the body was bound: the request/response cycle is
        // incomplete and the connection cannot be sequenced safely.
        match (&self.kind, &self.connection.io) {
            (ExchangeKind::H2 { stream: Some(stream) }, ConnectionIo::H2(session)) => {
                if !stream.is_terminal() {
                    session.cancel_stream(stream);
                }
                session.release_stream(stream);
                self.connection.refresh_health();
            }
            (ExchangeKind::H2 { stream: None }, _) => {}
            _ => self.connection.no_new_exchanges(),
        }
        self.connection.release();
    }
}

/// Cancellation hook the call holds while an exchange is live: closes the
/// HTTP/1 socket or resets the HTTP/2 stream so blocked I/O fails fast.
pub(crate) struct ExchangeCancelHandle {
    connection: Arc<Connection>,
    stream: Option<Arc<StreamHandle>>,
}

impl ExchangeCancelHandle {
    pub fn cancel(&self) {
        match (&self.connection.io, &self.stream) {
            (ConnectionIo::H2(session), Some(stream)) => session.cancel_stream(stream),
            (ConnectionIo::H2(_), None) => {}
            (ConnectionIo::H1(_), _) => {
                self.connection.no_new_exchanges();
                let connection = self.connection.clone();
                tokio::spawn(async move {
                    if let ConnectionIo::H1(codec) = &connection.io {
                        codec.lock().await.shutdown().await;
                    }
                });
            }
        }
    }
}

/// Build the HTTP/2 header list: pseudo-headers first, then the regular
/// headers lowercased, minus connection-specific ones.
fn h2_request_headers(request: &Request) -> Vec<(String, String)> {
    let url = request.url();
    let mut out = Vec::with_capacity(request.headers().len() + 4);
    out.push((":method".to_string(), request.method().as_str().to_string()));
    out.push((":path".to_string(), url.request_target()));
    out.push((":authority".to_string(), url.host_header()));
    out.push((":scheme".to_string(), url.scheme().as_str().to_string()));
    for (name, value) in request.headers().iter() {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "host" | "connection" | "keep-alive" | "proxy-connection" | "transfer-encoding"
            | "upgrade" => {}
            "te" if !value.eq_ignore_ascii_case("trailers") => {}
            _ => out.push((lower, value.to_string())),
        }
    }
    out
}

struct H1Body {
    connection: Arc<Connection>,
    cancel: Arc<CancelSignal>,
    trailers: Option<Headers>,
    done: bool,
}

impl H1Body {
    fn finish_clean(&mut self) {
        self.done = true;
        if let ConnectionIo::H1(codec) = &self.connection.io {
            if let Ok(mut codec) = codec.try_lock() {
                self.trailers = codec.trailers();
                codec.prepare_next_exchange();
            }
        }
        self.connection.release();
    }

    fn finish_failed(&mut self) {
        self.done = true;
        self.connection.no_new_exchanges();
        self.connection.release();
    }
}

impl RawBody for H1Body {
    fn chunk(&mut self) -> BoxFuture<'_, HttpResult<Option<Bytes>>> {
        Box::pin(async move {
            if self.done {
                return Ok(None);
            }
            let result = match &self.connection.io {
                ConnectionIo::H1(codec) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => Err(HttpError::canceled()),
                        r = async { codec.lock().await.read_body_chunk().await } => {
                            r.map_err(HttpError::io)
                        }
                    }
                }
                _ => unreachable!(),
            };
            match result {
                Ok(Some(chunk)) => Ok(Some(chunk)),
                Ok(None) => {
                    self.finish_clean();
                    Ok(None)
                }
                Err(e) => {
                    let id = self.connection.id();
                    self.finish_failed();
                    Err(e.with_connection(id))
                }
            }
        })
    }

    fn trailers(&self) -> Option<Headers> {
        self.trailers.clone()
    }
}

impl Drop for H1Body {
    fn drop(&mut self) {
        if !self.done {
            // Body abandoned mid-read; the connection cannot be resequenced.
            self.finish_failed();
        }
    }
}

struct H2Body {
    connection: Arc<Connection>,
    cancel: Arc<CancelSignal>,
    stream: Arc<StreamHandle>,
    read_timeout: Duration,
    done: bool,
    /// HEAD/204/304: report no payload but still drain the stream end.
    drain_only: bool,
}

impl H2Body {
    fn session(&self) -> &H2Session {
        match &self.connection.io {
            ConnectionIo::H2(session) => session,
            _ => unreachable!(),
        }
    }

    fn finish_clean(&mut self) {
        self.done = true;
        self.session().release_stream(&self.stream);
        self.connection.refresh_health();
        self.connection.release();
    }

    /// Stream-level failures leave the connection usable; when the whole
    /// session died, refresh_health marks the connection unusable.
    fn finish_failed(&mut self) {
        self.done = true;
        if !self.stream.is_terminal() {
            self.session().cancel_stream(&self.stream);
        }
        self.session().release_stream(&self.stream);
        self.connection.refresh_health();
        self.connection.release();
    }
}

impl RawBody for H2Body {
    fn chunk(&mut self) -> BoxFuture<'_, HttpResult<Option<Bytes>>> {
        Box::pin(async move {
            loop {
                if self.done {
                    return Ok(None);
                }
                let read = async {
                    tokio::select! {
                        _ = self.cancel.cancelled() => Err(HttpError::canceled()),
                        r = self.session().read_data(&self.stream) => r,
                    }
                };
                let result = if self.read_timeout.is_zero() {
                    read.await
                } else {
                    match timeout(self.read_timeout, read).await {
                        Ok(r) => r,
                        Err(_) => Err(HttpError::io(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "read timed out",
                        ))),
                    }
                };
                match result {
                    Ok(Some(chunk)) => {
                        if self.drain_only {
                            continue;
                        }
                        return Ok(Some(chunk));
                    }
                    Ok(None) => {
                        self.finish_clean();
                        return Ok(None);
                    }
                    Err(e) => {
                        let id = self.connection.id();
                        self.finish_failed();
                        return Err(e.with_connection(id));
                    }
                }
            }
        })
    }

    fn trailers(&self) -> Option<Headers> {
        self.session().trailers(&self.stream)
    }
}

impl Drop for H2Body {
    fn drop(&mut self) {
        if !self.done {
            self.finish_failed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::HttpUrl;

    #[test]
    fn h2_header_list_shape() {
        let request = Request::builder(HttpUrl::parse("https://h:8443/a?b=1").unwrap())
            .set_header("Host", "h:8443")
            .unwrap()
            .set_header("Accept", "*/*")
            .unwrap()
            .set_header("Connection", "Keep-Alive")
            .unwrap()
            .set_header("TE", "trailers")
            .unwrap()
            .build();
        let headers = h2_request_headers(&request);
        assert_eq!(
            &headers[..4],
            &[
                (":method".to_string(), "GET".to_string()),
                (":path".to_string(), "/a?b=1".to_string()),
                (":authority".to_string(), "h:8443".to_string()),
                (":scheme".to_string(), "https".to_string()),
            ]
        );
        // Connection-specific headers are dropped, TE: trailers survives.
        assert!(headers.iter().all(|(n, _)| n != "host" && n != "connection"));
        assert!(headers.iter().any(|(n, v)| n == "te" && v == "trailers"));
        assert!(headers.iter().any(|(n, v)| n == "accept" && v == "*/*"));
    }
}
