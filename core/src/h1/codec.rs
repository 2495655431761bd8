/*
 * codec.rs
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

//! HTTP/1.1 codec: serializes requests onto the stream and drives the
//! response parser. One request/response pair at a time, strictly
//! alternating; the exchange layer enforces the alternation.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use super::parser::{BodyMode, H1MessageSink, ParseState, ResponseParser};
use crate::headers::Headers;
use crate::net::HttpStream;
use crate::request::{Method, Request, RequestBody};
use crate::response::{Protocol, ResponseHead};

const READ_CHUNK: usize = 8192;

/// Accumulates parser events for the current response.
#[derive(Default)]
struct MessageSink {
    status: Option<(Protocol, u16, Option<String>)>,
    headers: Vec<(String, String)>,
    body: VecDeque<Bytes>,
    trailers: Vec<(String, String)>,
    complete: bool,
}

impl MessageSink {
    fn reset(&mut self) {
        *self = MessageSink::default();
    }

    fn head(&self) -> Option<ResponseHead> {
        let (protocol, code, reason) = self.status.clone()?;
        let mut headers = Headers::new();
        for (name, value) in &self.headers {
            // Skip names that are not valid tokens rather than failing the
            // whole response.
            let _ = headers.add(name.clone(), value.clone());
        }
        Some(ResponseHead {
            protocol,
            code,
            reason,
            headers,
        })
    }
}

impl H1MessageSink for MessageSink {
    fn status(&mut self, protocol: Protocol, code: u16, reason: Option<&str>) {
        self.status = Some((protocol, code, reason.map(|s| s.to_string())));
    }

    fn header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn body_data(&mut self, data: Bytes) {
        self.body.push_back(data);
    }

    fn trailer(&mut self, name: &str, value: &str) {
        self.trailers.push((name.to_string(), value.to_string()));
    }

    fn message_complete(&mut self) {
        self.complete = true;
    }
}

/// Codec over one HTTP/1.1 connection.
pub struct Http1Codec {
    stream: HttpStream,
    buf: BytesMut,
    parser: ResponseParser,
    sink: MessageSink,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl Http1Codec {
    pub fn new(stream: HttpStream, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(READ_CHUNK),
            parser: ResponseParser::new(),
            sink: MessageSink::default(),
            read_timeout,
            write_timeout,
        }
    }

    /// Serialize and flush the request line and headers.
    /// `target` is the request-target: origin-form for direct connections,
    /// absolute-form for plaintext requests through an HTTP proxy.
    pub async fn write_request_head(&mut self, request: &Request, target: &str) -> io::Result<()> {
        let mut head = format!("{} {} HTTP/1.1\r\n", request.method().as_str(), target);
        for (name, value) in request.headers().iter() {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        self.write_all(head.into_bytes()).await
    }

    /// Write the request body with the framing the body asked for.
    pub async fn write_request_body(&mut self, body: &RequestBody) -> io::Result<()> {
        if body.is_chunked() {
            let payload = body.payload().clone();
            if !payload.is_empty() {
                let mut framed = BytesMut::with_capacity(payload.len() + 32);
                framed.extend_from_slice(format!("{:x}\r\n", payload.len()).as_bytes());
                framed.extend_from_slice(&payload);
                framed.extend_from_slice(b"\r\n");
                self.write_all(framed.to_vec()).await?;
            }
            self.write_all(b"0\r\n\r\n".to_vec()).await
        } else {
            self.write_all(body.payload().to_vec()).await
        }
    }

    /// Read until a full status line and header block are buffered.
    pub async fn read_response_head(&mut self) -> io::Result<ResponseHead> {
        loop {
            self.parser.receive(&mut self.buf, &mut self.sink)?;
            if self.parser.state() == ParseState::HeadersComplete {
                return self
                    .sink
                    .head()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing status line"));
            }
            if self.fill().await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before response headers",
                ));
            }
        }
    }

    /// Drop a 1xx head and rewind for the following message.
    pub fn discard_informational(&mut self) {
        debug_assert_eq!(self.parser.state(), ParseState::HeadersComplete);
        self.sink.reset();
        self.parser.reset();
    }

    /// Choose body framing for the response just read, in priority order:
    /// no body for 1xx/204/304 and HEAD, then chunked, then Content-Length,
    /// then read-until-close. When both chunked and Content-Length are
    /// present, chunked wins and the length is ignored.
    pub fn begin_body(&mut self, request_method: &Method, head: &ResponseHead) -> io::Result<BodyMode> {
        let mode = body_mode(request_method, head)?;
        self.parser.set_body_mode(mode, &mut self.sink);
        // Flush any body bytes that arrived with the header block.
        self.parser.receive(&mut self.buf, &mut self.sink)?;
        Ok(mode)
    }

    /// Next body chunk, or None at the end of the message.
    pub async fn read_body_chunk(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            if let Some(chunk) = self.sink.body.pop_front() {
                return Ok(Some(chunk));
            }
            if self.sink.complete {
                return Ok(None);
            }
            if self.fill().await? == 0 {
                self.parser.note_eof(&mut self.sink)?;
                continue;
            }
            self.parser.receive(&mut self.buf, &mut self.sink)?;
        }
    }

    /// Trailers, available once the message is complete.
    pub fn trailers(&self) -> Option<Headers> {
        if !self.sink.complete || self.sink.trailers.is_empty() {
            return None;
        }
        let mut headers = Headers::new();
        for (name, value) in &self.sink.trailers {
            let _ = headers.add(name.clone(), value.clone());
        }
        Some(headers)
    }

    /// True when the current message has been fully consumed.
    pub fn is_message_complete(&self) -> bool {
        self.sink.complete
    }

    /// Rewind for the next request/response pair on this connection.
    pub fn prepare_next_exchange(&mut self) {
        self.sink.reset();
        self.parser.reset();
    }

    /// Tear the codec apart after a CONNECT handshake. Any bytes the server
    /// sent beyond the tunnel response are handed back with the stream.
    pub fn into_stream(self) -> (HttpStream, BytesMut) {
        (self.stream, self.buf)
    }

    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    async fn fill(&mut self) -> io::Result<usize> {
        let mut tmp = [0u8; READ_CHUNK];
        let read = self.stream.read(&mut tmp);
        let n = if self.read_timeout.is_zero() {
            read.await?
        } else {
            timeout(self.read_timeout, read)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))??
        };
        if n > 0 {
            self.buf.extend_from_slice(&tmp[..n]);
        }
        Ok(n)
    }

    async fn write_all(&mut self, data: Vec<u8>) -> io::Result<()> {
        let write = async {
            self.stream.write_all(&data).await?;
            self.stream.flush().await
        };
        if self.write_timeout.is_zero() {
            write.await
        } else {
            timeout(self.write_timeout, write)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))?
        }
    }
}

fn body_mode(request_method: &Method, head: &ResponseHead) -> io::Result<BodyMode> {
    if *request_method == Method::Head
        || (100..200).contains(&head.code)
        || head.code == 204
        || head.code == 304
    {
        return Ok(BodyMode::None);
    }
    let chunked = head
        .headers
        .get_all("transfer-encoding")
        .iter()
        .any(|v| v.to_ascii_lowercase().contains("chunked"));
    if chunked {
        return Ok(BodyMode::Chunked);
    }
    if let Some(value) = head.headers.get("content-length") {
        let length = value.trim().parse::<u64>().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid Content-Length: {:?}", value),
            )
        })?;
        return Ok(BodyMode::Fixed(length));
    }
    Ok(BodyMode::UntilClose)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::HttpUrl;
    use tokio::net::{TcpListener, TcpStream};

    async fn pair() -> (HttpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (HttpStream::Plain(client), server)
    }

    fn get_request(url: &str) -> Request {
        Request::builder(HttpUrl::parse(url).unwrap())
            .set_header("Host", "h")
            .unwrap()
            .build()
    }

    #[tokio::test]
    async fn writes_request_and_reads_fixed_response() {
        let (client, mut server) = pair().await;
        let mut codec = Http1Codec::new(client, Duration::from_secs(5), Duration::from_secs(5));

        let request = get_request("http://h/a");
        codec.write_request_head(&request, "/a").await.unwrap();

        let mut seen = vec![0u8; 64];
        let n = server.read(&mut seen).await.unwrap();
        let text = String::from_utf8_lossy(&seen[..n]).into_owned();
        assert!(text.starts_with("GET /a HTTP/1.1\r\n"), "{}", text);
        assert!(text.contains("Host: h\r\n"));

        server
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap();

        let head = codec.read_response_head().await.unwrap();
        assert_eq!(head.code, 200);
        let mode = codec.begin_body(&Method::Get, &head).unwrap();
        assert_eq!(mode, BodyMode::Fixed(5));
        let mut body = Vec::new();
        while let Some(chunk) = codec.read_body_chunk().await.unwrap() {
            body.extend_from_slice(&chunk);
        }
        assert_eq!(body, b"hello");
        assert!(codec.is_message_complete());
    }

    #[tokio::test]
    async fn chunked_request_body_framing() {
        let (client, mut server) = pair().await;
        let mut codec = Http1Codec::new(client, Duration::from_secs(5), Duration::from_secs(5));
        let body = RequestBody::new(None, "abc").chunked();
        codec.write_request_body(&body).await.unwrap();

        let mut seen = vec![0u8; 13];
        server.read_exact(&mut seen).await.unwrap();
        assert_eq!(&seen[..], b"3\r\nabc\r\n0\r\n\r\n");
    }

    #[tokio::test]
    async fn head_response_has_no_body_despite_length() {
        let (client, mut server) = pair().await;
        let mut codec = Http1Codec::new(client, Duration::from_secs(5), Duration::from_secs(5));
        server
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n")
            .await
            .unwrap();
        let head = codec.read_response_head().await.unwrap();
        let mode = codec.begin_body(&Method::Head, &head).unwrap();
        assert_eq!(mode, BodyMode::None);
        assert_eq!(codec.read_body_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn chunked_wins_over_content_length() {
        let (client, mut server) = pair().await;
        let mut codec = Http1Codec::new(client, Duration::from_secs(5), Duration::from_secs(5));
        server
            .write_all(
                b"HTTP/1.1 200 OK\r\nContent-Length: 999\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\n0\r\n\r\n",
            )
            .await
            .unwrap();
        let head = codec.read_response_head().await.unwrap();
        let mode = codec.begin_body(&Method::Get, &head).unwrap();
        assert_eq!(mode, BodyMode::Chunked);
        let mut body = Vec::new();
        while let Some(chunk) = codec.read_body_chunk().await.unwrap() {
            body.extend_from_slice(&chunk);
        }
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn read_until_close_body() {
        let (client, mut server) = pair().await;
        let mut codec = Http1Codec::new(client, Duration::from_secs(5), Duration::from_secs(5));
        server
            .write_all(b"HTTP/1.1 200 OK\r\n\r\nall the bytes")
            .await
            .unwrap();
        drop(server);
        let head = codec.read_response_head().await.unwrap();
        let mode = codec.begin_body(&Method::Get, &head).unwrap();
        assert_eq!(mode, BodyMode::UntilClose);
        let mut body = Vec::new();
        while let Some(chunk) = codec.read_body_chunk().await.unwrap() {
            body.extend_from_slice(&chunk);
        }
        assert_eq!(body, b"all the bytes");
    }
}
