/*
 * session.rs
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

//! HTTP/2 session: one instance per connection, multiplexing any number of
//! client-initiated streams.
//!
//! One reader task owns the socket's input half. It parses frames, fills
//! per-stream buffers, and wakes waiters; it never runs user code and never
//! writes to the socket itself (control frames go through a channel drained
//! by a separate task). Exchanges write under the session's writer mutex.
//! Stream ids are allocated inside the same writer critical section that
//! emits the first HEADERS frame, so ids on the wire are monotonic.
//!
//! Lock order: writer mutex (async) may enclose brief state/stream locks
//! (sync); the sync locks are never held across an await.

use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tracing::{debug, trace};

use super::frame::*;
use super::handler::H2FrameHandler;
use super::parser::H2Parser;
use super::stream::{StreamFailure, StreamHandle};
use super::writer::FrameWriter;
use crate::error::{HttpError, HttpResult};
use crate::headers::Headers;
use crate::hpack;
use crate::net::HttpStream;
use crate::response::{Protocol, ResponseHead};

/// Session knobs from the client configuration.
#[derive(Clone)]
pub(crate) struct H2Config {
    pub write_timeout: Duration,
    /// Keepalive PING interval; a PING unanswered for a full interval fails
    /// the connection. None disables keepalive.
    pub ping_interval: Option<Duration>,
}

struct PeerSettings {
    header_table_size: u32,
    max_concurrent_streams: Option<u32>,
    initial_window_size: u32,
    max_frame_size: usize,
    #[allow(dead_code)]
    max_header_list_size: Option<u32>,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE as u32,
            max_concurrent_streams: None,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

struct SessionState {
    streams: HashMap<u32, Arc<StreamHandle>>,
    next_stream_id: u32,
    conn_send_window: i64,
    peer: PeerSettings,
    /// lastStreamId from a received GOAWAY.
    goaway: Option<u32>,
    /// Fatal failure reason; set once.
    closed: Option<String>,
    /// Our initial SETTINGS has been acknowledged. Local settings take
    /// effect only after this; we only ever send defaults, so the flag is
    /// informational.
    local_settings_acked: bool,
    ping_outstanding: bool,
}

struct SessionWriter {
    io: WriteHalf<HttpStream>,
    frames: FrameWriter,
    encoder: hpack::Encoder,
    write_timeout: Duration,
}

impl SessionWriter {
    async fn flush(&mut self) -> std::io::Result<()> {
        let buf = self.frames.take();
        let write = async {
            self.io.write_all(&buf).await?;
            self.io.flush().await
        };
        if self.write_timeout.is_zero() {
            write.await
        } else {
            timeout(self.write_timeout, write)
                .await
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))?
        }
    }
}

enum Control {
    SettingsAck,
    Ping(u64),
    PingAck(u64),
    WindowUpdate { stream_id: u32, increment: u32 },
    RstStream { stream_id: u32, error_code: u32 },
    GoAway { last_stream_id: u32, error_code: u32 },
    EncoderTableSize(u32),
    MaxFrameSize(usize),
    Close,
}

struct Shared {
    connection_id: u64,
    state: Mutex<SessionState>,
    writer: tokio::sync::Mutex<SessionWriter>,
    /// Woken when the connection-level send window grows or the session dies.
    conn_window: Notify,
    control: mpsc::UnboundedSender<Control>,
}

/// Handle to a live HTTP/2 session.
pub(crate) struct H2Session {
    shared: Arc<Shared>,
}

impl H2Session {
    /// Write the connection preface and initial SETTINGS, then spawn the
    /// reader, control-writer, and optional keepalive tasks.
    pub async fn start(
        stream: HttpStream,
        connection_id: u64,
        config: H2Config,
    ) -> HttpResult<H2Session> {
        let (read_half, write_half) = tokio::io::split(stream);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            connection_id,
            state: Mutex::new(SessionState {
                streams: HashMap::new(),
                next_stream_id: 1,
                conn_send_window: DEFAULT_INITIAL_WINDOW_SIZE as i64,
                peer: PeerSettings::default(),
                goaway: None,
                closed: None,
                local_settings_acked: false,
                ping_outstanding: false,
            }),
            writer: tokio::sync::Mutex::new(SessionWriter {
                io: write_half,
                frames: FrameWriter::new(),
                encoder: hpack::Encoder::new(DEFAULT_HEADER_TABLE_SIZE),
                write_timeout: config.write_timeout,
            }),
            conn_window: Notify::new(),
            control: control_tx,
        });

        {
            let mut w = shared.writer.lock().await;
            w.frames.preface();
            w.frames.settings(&[
                (SETTINGS_ENABLE_PUSH, 0),
                (SETTINGS_HEADER_TABLE_SIZE, DEFAULT_HEADER_TABLE_SIZE as u32),
            ]);
            w.flush().await.map_err(HttpError::io)?;
        }

        tokio::spawn(reader_task(shared.clone(), read_half));
        tokio::spawn(control_task(shared.clone(), control_rx));
        if let Some(interval) = config.ping_interval {
            tokio::spawn(ping_task(shared.clone(), interval));
        }

        Ok(H2Session { shared })
    }

    /// Open a stream by sending HEADERS. The pair list must be complete:
    /// pseudo-headers first, names lowercase.
    pub async fn open_stream(
        &self,
        headers: Vec<(String, String)>,
        end_stream: bool,
    ) -> HttpResult<Arc<StreamHandle>> {
        let mut w = self.shared.writer.lock().await;
        let stream = {
            let mut st = self.shared.state.lock().unwrap();
            if st.closed.is_some() || st.goaway.is_some() {
                return Err(HttpError::connection_shutdown());
            }
            let id = st.next_stream_id;
            st.next_stream_id += 2;
            let stream = Arc::new(StreamHandle::new(id, st.peer.initial_window_size));
            st.streams.insert(id, stream.clone());
            stream
        };
        trace!(stream = stream.id, end_stream, "send HEADERS");
        let mut block = BytesMut::new();
        w.encoder.encode(&headers, &mut block);
        w.frames.headers(stream.id, &block, end_stream);
        if end_stream {
            stream.buf.lock().unwrap().closed_for_send = true;
        }
        if let Err(e) = w.flush().await {
            drop(w);
            fail_session(&self.shared, format!("write failed: {}", e));
            return Err(HttpError::io(e));
        }
        Ok(stream)
    }

    /// Write a request body, honoring stream and connection flow-control
    /// windows and the peer's frame size.
    pub async fn write_data(
        &self,
        stream: &Arc<StreamHandle>,
        data: Bytes,
        end_stream: bool,
    ) -> HttpResult<()> {
        let mut remaining = data;
        if remaining.is_empty() {
            if end_stream {
                self.write_data_frame(stream, Bytes::new(), true).await?;
            }
            return Ok(());
        }
        while !remaining.is_empty() {
            let claim = loop {
                let conn_credit = self.shared.conn_window.notified();
                let stream_credit = stream.window.notified();
                match self.try_claim(stream, remaining.len())? {
                    0 => {
                        trace!(stream = stream.id, "waiting for window credit");
                        tokio::select! {
                            _ = conn_credit => {}
                            _ = stream_credit => {}
                        }
                    }
                    n => break n,
                }
            };
            let chunk = remaining.split_to(claim);
            let last = end_stream && remaining.is_empty();
            self.write_data_frame(stream, chunk, last).await?;
        }
        Ok(())
    }

    /// Claim up to `want` bytes from both send windows. Zero means no
    /// credit is available yet.
    fn try_claim(&self, stream: &Arc<StreamHandle>, want: usize) -> HttpResult<usize> {
        let mut st = self.shared.state.lock().unwrap();
        if let Some(reason) = &st.closed {
            return Err(HttpError::protocol(reason.clone()));
        }
        let max_frame = st.peer.max_frame_size;
        let mut buf = stream.buf.lock().unwrap();
        if let Some(failure) = &buf.failure {
            return Err(failure.to_error());
        }
        let available = st
            .conn_send_window
            .min(buf.send_window)
            .min(want as i64)
            .min(max_frame as i64);
        if available <= 0 {
            return Ok(0);
        }
        st.conn_send_window -= available;
        buf.send_window -= available;
        Ok(available as usize)
    }

    async fn write_data_frame(
        &self,
        stream: &Arc<StreamHandle>,
        chunk: Bytes,
        end_stream: bool,
    ) -> HttpResult<()> {
        let mut w = self.shared.writer.lock().await;
        w.frames.data(stream.id, &chunk, end_stream);
        if end_stream {
            stream.buf.lock().unwrap().closed_for_send = true;
        }
        if let Err(e) = w.flush().await {
            drop(w);
            fail_session(&self.shared, format!("write failed: {}", e));
            return Err(HttpError::io(e));
        }
        Ok(())
    }

    /// Wait for the next response head on the stream: a 1xx or the final one.
    pub async fn read_head(&self, stream: &Arc<StreamHandle>) -> HttpResult<ResponseHead> {
        loop {
            let readable = stream.readable.notified();
            {
                let mut buf = stream.buf.lock().unwrap();
                if let Some(head) = buf.heads.pop_front() {
                    return Ok(head);
                }
                if let Some(failure) = &buf.failure {
                    return Err(failure.to_error());
                }
                if buf.closed_for_receive {
                    return Err(HttpError::protocol("stream closed before response headers"));
                }
            }
            readable.await;
        }
    }

    /// Pull the next body chunk. None is the clean end of the stream.
    pub async fn read_data(&self, stream: &Arc<StreamHandle>) -> HttpResult<Option<Bytes>> {
        enum Step {
            Chunk(Bytes, Option<u64>),
            End(u64),
            Fail(HttpError),
            Wait,
        }
        loop {
            let readable = stream.readable.notified();
            let step = {
                let mut buf = stream.buf.lock().unwrap();
                if let Some(chunk) = buf.data.pop_front() {
                    buf.unacked_recv += chunk.len() as u64;
                    // Replenish both windows once half the initial window
                    // has been consumed.
                    let flush = if buf.unacked_recv >= (DEFAULT_INITIAL_WINDOW_SIZE as u64) / 2 {
                        Some(std::mem::take(&mut buf.unacked_recv))
                    } else {
                        None
                    };
                    Step::Chunk(chunk, flush)
                } else if let Some(failure) = &buf.failure {
                    Step::Fail(failure.to_error())
                } else if buf.closed_for_receive {
                    Step::End(std::mem::take(&mut buf.unacked_recv))
                } else {
                    Step::Wait
                }
            };
            match step {
                Step::Chunk(chunk, flush) => {
                    if let Some(n) = flush {
                        self.send_window_updates(stream.id, n);
                    }
                    return Ok(Some(chunk));
                }
                Step::End(leftover) => {
                    if leftover > 0 {
                        // The stream is done; only the connection window
                        // still needs the credit back.
                        let _ = self.shared.control.send(Control::WindowUpdate {
                            stream_id: 0,
                            increment: leftover as u32,
                        });
                    }
                    return Ok(None);
                }
                Step::Fail(err) => return Err(err),
                Step::Wait => readable.await,
            }
        }
    }

    fn send_window_updates(&self, stream_id: u32, amount: u64) {
        let _ = self.shared.control.send(Control::WindowUpdate {
            stream_id,
            increment: amount as u32,
        });
        let _ = self.shared.control.send(Control::WindowUpdate {
            stream_id: 0,
            increment: amount as u32,
        });
    }

    pub fn trailers(&self, stream: &Arc<StreamHandle>) -> Option<Headers> {
        stream.buf.lock().unwrap().trailers.clone()
    }

    /// Cancel a stream: RST_STREAM(CANCEL) on the wire, waiters woken with a
    /// canceled error.
    pub fn cancel_stream(&self, stream: &Arc<StreamHandle>) {
        let dropped = fail_stream(stream, StreamFailure::LocalCancel);
        return_dropped_credit(&self.shared, dropped);
        let _ = self.shared.control.send(Control::RstStream {
            stream_id: stream.id,
            error_code: stream.local_cancel_code(),
        });
    }

    /// Remove a finished stream from the table.
    pub fn release_stream(&self, stream: &Arc<StreamHandle>) {
        let mut st = self.shared.state.lock().unwrap();
        st.streams.remove(&stream.id);
    }

    /// Whether the pool may route another exchange here.
    pub fn can_open_stream(&self) -> bool {
        let st = self.shared.state.lock().unwrap();
        if st.closed.is_some() || st.goaway.is_some() {
            return false;
        }
        match st.peer.max_concurrent_streams {
            Some(cap) => (st.streams.len() as u32) < cap,
            None => true,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        let st = self.shared.state.lock().unwrap();
        st.closed.is_some() || st.goaway.is_some()
    }

    /// Orderly shutdown: GOAWAY(NO_ERROR) then close the write side once the
    /// control queue drains.
    pub fn shutdown(&self) {
        let last = {
            let mut st = self.shared.state.lock().unwrap();
            if st.closed.is_some() {
                return;
            }
            st.closed = Some("connection closed locally".to_string());
            st.next_stream_id.saturating_sub(2)
        };
        let _ = self.shared.control.send(Control::GoAway {
            last_stream_id: last,
            error_code: ERROR_NO_ERROR,
        });
        let _ = self.shared.control.send(Control::Close);
        self.shared.conn_window.notify_waiters();
    }
}

fn return_dropped_credit(shared: &Arc<Shared>, dropped: usize) {
    if dropped > 0 {
        let _ = shared.control.send(Control::WindowUpdate {
            stream_id: 0,
            increment: dropped as u32,
        });
    }
}

/// Fail one stream; returns the number of buffered body bytes discarded so
/// the caller can return the connection-window credit.
fn fail_stream(stream: &Arc<StreamHandle>, failure: StreamFailure) -> usize {
    let dropped: usize = {
        let buf = stream.buf.lock().unwrap();
        buf.data.iter().map(|b| b.len()).sum()
    };
    stream.fail(failure);
    dropped
}

fn fail_session(shared: &Arc<Shared>, reason: String) {
    let streams: Vec<Arc<StreamHandle>> = {
        let mut st = shared.state.lock().unwrap();
        if st.closed.is_some() {
            return;
        }
        debug!(connection = shared.connection_id, %reason, "HTTP/2 session failed");
        st.closed = Some(reason.clone());
        st.streams.drain().map(|(_, s)| s).collect()
    };
    for stream in streams {
        stream.fail(StreamFailure::Connection(reason.clone()));
    }
    shared.conn_window.notify_waiters();
    let _ = shared.control.send(Control::Close);
}

async fn reader_task(shared: Arc<Shared>, mut read_half: ReadHalf<HttpStream>) {
    let mut parser = H2Parser::new();
    let mut dispatch = Dispatch {
        shared: shared.clone(),
        decoder: hpack::Decoder::new(DEFAULT_HEADER_TABLE_SIZE),
        assembly: None,
    };
    let mut buf = BytesMut::with_capacity(DEFAULT_MAX_FRAME_SIZE * 2);
    loop {
        if shared.state.lock().unwrap().closed.is_some() {
            break;
        }
        match read_half.read_buf(&mut buf).await {
            Ok(0) => {
                fail_session(&shared, "connection closed by peer".to_string());
                break;
            }
            Ok(_) => parser.receive(&mut buf, &mut dispatch),
            Err(e) => {
                fail_session(&shared, format!("read failed: {}", e));
                break;
            }
        }
    }
}

async fn control_task(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Control>) {
    while let Some(op) = rx.recv().await {
        let mut w = shared.writer.lock().await;
        match op {
            Control::SettingsAck => w.frames.settings_ack(),
            Control::Ping(payload) => w.frames.ping(payload, false),
            Control::PingAck(payload) => w.frames.ping(payload, true),
            Control::WindowUpdate {
                stream_id,
                increment,
            } => w.frames.window_update(stream_id, increment),
            Control::RstStream {
                stream_id,
                error_code,
            } => w.frames.rst_stream(stream_id, error_code),
            Control::GoAway {
                last_stream_id,
                error_code,
            } => w.frames.goaway(last_stream_id, error_code, b""),
            Control::EncoderTableSize(size) => {
                w.encoder.set_max_table_size(size as usize);
                continue;
            }
            Control::MaxFrameSize(size) => {
                w.frames.set_max_frame_size(size);
                continue;
            }
            Control::Close => {
                let _ = w.io.shutdown().await;
                break;
            }
        }
        if let Err(e) = w.flush().await {
            drop(w);
            fail_session(&shared, format!("write failed: {}", e));
            break;
        }
    }
}

async fn ping_task(shared: Arc<Shared>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let was_outstanding = {
            let mut st = shared.state.lock().unwrap();
            if st.closed.is_some() {
                return;
            }
            std::mem::replace(&mut st.ping_outstanding, true)
        };
        if was_outstanding {
            fail_session(&shared, "keepalive PING unanswered".to_string());
            return;
        }
        let _ = shared.control.send(Control::Ping(rand::random()));
    }
}

/// Pending header-block accumulation across HEADERS/CONTINUATION frames.
struct Assembly {
    stream_id: u32,
    end_stream: bool,
    block: BytesMut,
}

/// The reader task's frame handler.
struct Dispatch {
    shared: Arc<Shared>,
    decoder: hpack::Decoder,
    assembly: Option<Assembly>,
}

impl Dispatch {
    fn lookup(&self, stream_id: u32) -> Option<Arc<StreamHandle>> {
        self.shared
            .state
            .lock()
            .unwrap()
            .streams
            .get(&stream_id)
            .cloned()
    }

    /// Validate an inbound stream id for HEADERS. Even ids and ids we never
    /// allocated are protocol violations; ids below the allocation horizon
    /// belong to finished streams and their frames are decoded then dropped.
    fn classify_headers_target(&mut self, stream_id: u32) -> Result<Option<Arc<StreamHandle>>, ()> {
        if stream_id % 2 == 0 {
            self.connection_error(
                ERROR_PROTOCOL_ERROR,
                "HEADERS on a server-initiated stream id".to_string(),
            );
            return Err(());
        }
        let st = self.shared.state.lock().unwrap();
        if stream_id >= st.next_stream_id {
            drop(st);
            self.connection_error(
                ERROR_PROTOCOL_ERROR,
                format!("HEADERS on unopened stream {}", stream_id),
            );
            return Err(());
        }
        Ok(st.streams.get(&stream_id).cloned())
    }

    fn finish_assembly(&mut self) {
        let assembly = match self.assembly.take() {
            Some(a) => a,
            None => return,
        };
        let mut cursor = &assembly.block[..];
        let pairs = match self.decoder.decode(&mut cursor) {
            Ok(pairs) => pairs,
            Err(e) => {
                self.connection_error(ERROR_COMPRESSION_ERROR, format!("HPACK: {}", e));
                return;
            }
        };
        let stream = match self.lookup(assembly.stream_id) {
            Some(s) => s,
            // Stale stream: the block was decoded for HPACK state, drop it.
            None => return,
        };

        let expecting_trailers = stream.buf.lock().unwrap().final_head_seen;
        if expecting_trailers {
            match split_trailers(&pairs) {
                Ok(trailers) => stream.push_trailers(trailers, assembly.end_stream),
                Err(msg) => self.stream_error(assembly.stream_id, ERROR_PROTOCOL_ERROR, msg),
            }
            return;
        }
        match split_response_head(&pairs) {
            Ok(head) => {
                trace!(stream = assembly.stream_id, code = head.code, "recv HEADERS");
                stream.push_head(head, assembly.end_stream);
            }
            Err(msg) => self.stream_error(assembly.stream_id, ERROR_PROTOCOL_ERROR, msg),
        }
    }
}

impl H2FrameHandler for Dispatch {
    fn on_data(&mut self, stream_id: u32, end_stream: bool, data: Bytes) {
        if self.assembly.is_some() {
            self.connection_error(
                ERROR_PROTOCOL_ERROR,
                "DATA interleaved in a header block".to_string(),
            );
            return;
        }
        match self.lookup(stream_id) {
            Some(stream) => {
                trace!(stream = stream_id, len = data.len(), end_stream, "recv DATA");
                stream.push_data(data, end_stream);
            }
            None => {
                // Closed or unknown stream: the bytes still consumed
                // connection window, return the credit immediately.
                if !data.is_empty() {
                    let _ = self.shared.control.send(Control::WindowUpdate {
                        stream_id: 0,
                        increment: data.len() as u32,
                    });
                }
            }
        }
    }

    fn on_headers(&mut self, stream_id: u32, end_stream: bool, end_headers: bool, block: Bytes) {
        if self.assembly.is_some() {
            self.connection_error(
                ERROR_PROTOCOL_ERROR,
                "HEADERS interleaved in a header block".to_string(),
            );
            return;
        }
        if self.classify_headers_target(stream_id).is_err() {
            return;
        }
        let mut assembly = Assembly {
            stream_id,
            end_stream,
            block: BytesMut::from(&block[..]),
        };
        if end_headers {
            self.assembly = Some(assembly);
            self.finish_assembly();
        } else {
            assembly.block.reserve(DEFAULT_MAX_FRAME_SIZE);
            self.assembly = Some(assembly);
        }
    }

    fn on_priority(&mut self, _stream_id: u32, _dependency: u32, _exclusive: bool, _weight: u8) {}

    fn on_rst_stream(&mut self, stream_id: u32, error_code: u32) {
        debug!(stream = stream_id, code = error_to_string(error_code), "recv RST_STREAM");
        if let Some(stream) = self.lookup(stream_id) {
            let dropped = fail_stream(&stream, StreamFailure::Reset(error_code));
            return_dropped_credit(&self.shared, dropped);
        }
    }

    fn on_settings(&mut self, ack: bool, settings: Vec<(u16, u32)>) {
        if ack {
            self.shared.state.lock().unwrap().local_settings_acked = true;
            return;
        }
        let mut adjust: Vec<(Arc<StreamHandle>, i64)> = Vec::new();
        {
            let mut st = self.shared.state.lock().unwrap();
            for &(id, value) in &settings {
                match id {
                    SETTINGS_HEADER_TABLE_SIZE => {
                        st.peer.header_table_size = value;
                        let _ = self.shared.control.send(Control::EncoderTableSize(value));
                    }
                    SETTINGS_MAX_CONCURRENT_STREAMS => {
                        st.peer.max_concurrent_streams = Some(value);
                    }
                    SETTINGS_INITIAL_WINDOW_SIZE => {
                        if value as i64 > MAX_WINDOW_SIZE {
                            drop(st);
                            self.connection_error(
                                ERROR_FLOW_CONTROL_ERROR,
                                "SETTINGS_INITIAL_WINDOW_SIZE too large".to_string(),
                            );
                            return;
                        }
                        let delta = value as i64 - st.peer.initial_window_size as i64;
                        st.peer.initial_window_size = value;
                        if delta != 0 {
                            adjust = st
                                .streams
                                .values()
                                .map(|s| (s.clone(), delta))
                                .collect();
                        }
                    }
                    SETTINGS_MAX_FRAME_SIZE => {
                        if !(MIN_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&(value as usize)) {
                            drop(st);
                            self.connection_error(
                                ERROR_PROTOCOL_ERROR,
                                "SETTINGS_MAX_FRAME_SIZE out of range".to_string(),
                            );
                            return;
                        }
                        st.peer.max_frame_size = value as usize;
                        let _ = self
                            .shared
                            .control
                            .send(Control::MaxFrameSize(value as usize));
                    }
                    SETTINGS_MAX_HEADER_LIST_SIZE => {
                        st.peer.max_header_list_size = Some(value);
                    }
                    _ => {}
                }
            }
        }
        // Apply the INITIAL_WINDOW_SIZE delta to every live stream.
        for (stream, delta) in adjust {
            if stream.grow_send_window(delta).is_err() {
                self.connection_error(
                    ERROR_FLOW_CONTROL_ERROR,
                    "stream window overflow from SETTINGS".to_string(),
                );
                return;
            }
        }
        let _ = self.shared.control.send(Control::SettingsAck);
    }

    fn on_push_promise(&mut self, _: u32, _: u32, _: bool, _: Bytes) {
        // We advertise ENABLE_PUSH=0.
        self.connection_error(
            ERROR_PROTOCOL_ERROR,
            "PUSH_PROMISE received with push disabled".to_string(),
        );
    }

    fn on_ping(&mut self, ack: bool, payload: u64) {
        if ack {
            self.shared.state.lock().unwrap().ping_outstanding = false;
        } else {
            let _ = self.shared.control.send(Control::PingAck(payload));
        }
    }

    fn on_goaway(&mut self, last_stream_id: u32, error_code: u32, _debug_data: Bytes) {
        debug!(
            last_stream = last_stream_id,
            code = error_to_string(error_code),
            "recv GOAWAY"
        );
        let doomed: Vec<Arc<StreamHandle>> = {
            let mut st = self.shared.state.lock().unwrap();
            st.goaway = Some(last_stream_id);
            st.streams
                .values()
                .filter(|s| s.id > last_stream_id)
                .cloned()
                .collect()
        };
        for stream in doomed {
            let dropped = fail_stream(&stream, StreamFailure::Shutdown);
            return_dropped_credit(&self.shared, dropped);
            self.shared.state.lock().unwrap().streams.remove(&stream.id);
        }
    }

    fn on_window_update(&mut self, stream_id: u32, increment: u32) {
        if stream_id == 0 {
            let overflow = {
                let mut st = self.shared.state.lock().unwrap();
                st.conn_send_window += increment as i64;
                st.conn_send_window > MAX_WINDOW_SIZE
            };
            if overflow {
                self.connection_error(
                    ERROR_FLOW_CONTROL_ERROR,
                    "connection window overflow".to_string(),
                );
                return;
            }
            self.shared.conn_window.notify_waiters();
            return;
        }
        if let Some(stream) = self.lookup(stream_id) {
            if stream.grow_send_window(increment as i64).is_err() {
                self.stream_error(
                    stream_id,
                    ERROR_FLOW_CONTROL_ERROR,
                    "stream window overflow".to_string(),
                );
            }
        }
    }

    fn on_continuation(&mut self, stream_id: u32, end_headers: bool, block: Bytes) {
        match &mut self.assembly {
            Some(assembly) if assembly.stream_id == stream_id => {
                assembly.block.extend_from_slice(&block);
                if end_headers {
                    self.finish_assembly();
                }
            }
            _ => self.connection_error(
                ERROR_PROTOCOL_ERROR,
                "CONTINUATION without a pending header block".to_string(),
            ),
        }
    }

    fn connection_error(&mut self, error_code: u32, message: String) {
        let last = {
            let st = self.shared.state.lock().unwrap();
            st.next_stream_id.saturating_sub(2)
        };
        let _ = self.shared.control.send(Control::GoAway {
            last_stream_id: last,
            error_code,
        });
        fail_session(&self.shared, message);
    }

    fn stream_error(&mut self, stream_id: u32, error_code: u32, message: String) {
        // Stream 0 cannot be reset; the violation is fatal to the session.
        if stream_id == 0 {
            self.connection_error(ERROR_PROTOCOL_ERROR, message);
            return;
        }
        debug!(stream = stream_id, code = error_to_string(error_code), %message, "stream error");
        if let Some(stream) = self.lookup(stream_id) {
            let dropped =
                fail_stream(&stream, StreamFailure::Connection(message));
            return_dropped_credit(&self.shared, dropped);
        }
        let _ = self.shared.control.send(Control::RstStream {
            stream_id,
            error_code,
        });
    }
}

/// Split decoded pairs into a response head. Pseudo-headers must precede
/// regular headers; `:status` is the only one a response may carry.
fn split_response_head(pairs: &[(String, String)]) -> Result<ResponseHead, String> {
    let mut code: Option<u16> = None;
    let mut headers = Headers::new();
    let mut seen_regular = false;
    for (name, value) in pairs {
        if let Some(pseudo) = name.strip_prefix(':') {
            if seen_regular {
                return Err("pseudo-header after regular header".to_string());
            }
            match pseudo {
                "status" => {
                    if code.is_some() {
                        return Err("duplicate :status".to_string());
                    }
                    code = Some(
                        value
                            .parse::<u16>()
                            .map_err(|_| format!("bad :status {:?}", value))?,
                    );
                }
                _ => return Err(format!("unknown pseudo-header :{}", pseudo)),
            }
        } else {
            seen_regular = true;
            headers
                .add(name.clone(), value.clone())
                .map_err(|e| e.to_string())?;
        }
    }
    let code = code.ok_or_else(|| "response without :status".to_string())?;
    Ok(ResponseHead {
        protocol: Protocol::H2,
        code,
        reason: None,
        headers,
    })
}

/// Trailers may not contain pseudo-headers at all.
fn split_trailers(pairs: &[(String, String)]) -> Result<Headers, String> {
    let mut trailers = Headers::new();
    for (name, value) in pairs {
        if name.starts_with(':') {
            return Err("pseudo-header in trailers".to_string());
        }
        trailers
            .add(name.clone(), value.clone())
            .map_err(|e| e.to_string())?;
    }
    Ok(trailers)
}
