/*
 * http_integration.rs
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

//! Integration tests against scripted loopback servers: the full client
//! pipeline over cleartext HTTP/2 (prior knowledge) and HTTP/1.1
//! keep-alive, through the public API only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use corriere_core::{HttpClient, Protocol, Request};

const TYPE_HEADERS: u8 = 0x1;
const TYPE_SETTINGS: u8 = 0x4;
const FLAG_END_STREAM: u8 = 0x1;
const FLAG_END_HEADERS: u8 = 0x4;

fn frame(frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![
        (payload.len() >> 16) as u8,
        (payload.len() >> 8) as u8,
        payload.len() as u8,
        frame_type,
        flags,
    ];
    out.extend_from_slice(&stream_id.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

async fn read_frame(sock: &mut TcpStream) -> Option<(u8, u8, u32, Vec<u8>)> {
    let mut head = [0u8; 9];
    sock.read_exact(&mut head).await.ok()?;
    let len = ((head[0] as usize) << 16) | ((head[1] as usize) << 8) | head[2] as usize;
    let mut payload = vec![0u8; len];
    sock.read_exact(&mut payload).await.ok()?;
    let stream_id = u32::from_be_bytes([head[5] & 0x7f, head[6], head[7], head[8]]);
    Some((head[3], head[4], stream_id, payload))
}

/// Serve `responses` HTTP/2 requests on one socket: 200 with a small DATA
/// payload per stream. Returns the stream ids seen.
async fn serve_h2(mut sock: TcpStream, responses: usize) -> Vec<u32> {
    let mut preface = [0u8; 24];
    sock.read_exact(&mut preface).await.unwrap();
    assert_eq!(&preface[..], b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n");
    sock.write_all(&frame(TYPE_SETTINGS, 0, 0, &[])).await.unwrap();

    let mut stream_ids = Vec::new();
    while stream_ids.len() < responses {
        let (frame_type, flags, stream_id, _) = match read_frame(&mut sock).await {
            Some(f) => f,
            None => break,
        };
        if frame_type == TYPE_HEADERS && (flags & FLAG_END_HEADERS) != 0 {
            stream_ids.push(stream_id);
            // :status 200 (indexed), then the body.
            sock.write_all(&frame(TYPE_HEADERS, FLAG_END_HEADERS, stream_id, &[0x88]))
                .await
                .unwrap();
            sock.write_all(&frame(0x0, FLAG_END_STREAM, stream_id, b"h2 body"))
                .await
                .unwrap();
        }
    }
    stream_ids
}

#[tokio::test]
async fn http2_prior_knowledge_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (sock, _) = listener.accept().await.unwrap();
        serve_h2(sock, 1).await
    });

    let client = HttpClient::builder()
        .http2_prior_knowledge()
        .connect_timeout(Duration::from_secs(5))
        .read_timeout(Duration::from_secs(5))
        .build();
    let request = Request::get(&format!("http://127.0.0.1:{}/x", port)).unwrap();
    let mut response = client.call(request).execute().await.unwrap();

    assert_eq!(response.code(), 200);
    assert_eq!(response.protocol(), Protocol::H2);
    assert_eq!(response.body_mut().text().await.unwrap(), "h2 body");
    assert_eq!(server.await.unwrap(), vec![1]);
}

#[tokio::test]
async fn http2_connection_is_shared_with_distinct_stream_ids() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicUsize::new(0));
    let server_accepts = accepts.clone();
    let server = tokio::spawn(async move {
        let (sock, _) = listener.accept().await.unwrap();
        server_accepts.fetch_add(1, Ordering::SeqCst);
        serve_h2(sock, 3).await
    });

    let client = HttpClient::builder()
        .http2_prior_knowledge()
        .connect_timeout(Duration::from_secs(5))
        .read_timeout(Duration::from_secs(5))
        .build();
    let url = format!("http://127.0.0.1:{}/shared", port);

    // Prime the pool with one completed call, then run two concurrently.
    let mut first = client
        .call(Request::get(&url).unwrap())
        .execute()
        .await
        .unwrap();
    first.body_mut().drain().await.unwrap();

    let call_a = client.call(Request::get(&url).unwrap());
    let call_b = client.call(Request::get(&url).unwrap());
    let (a, b) = tokio::join!(call_a.execute(), call_b.execute());
    let mut a = a.unwrap();
    let mut b = b.unwrap();
    assert_eq!(a.body_mut().text().await.unwrap(), "h2 body");
    assert_eq!(b.body_mut().text().await.unwrap(), "h2 body");

    let stream_ids = server.await.unwrap();
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
    assert_eq!(stream_ids.len(), 3);
    // Strictly increasing odd ids on one connection.
    assert!(stream_ids.windows(2).all(|w| w[0] < w[1]));
    assert!(stream_ids.iter().all(|id| id % 2 == 1));
}

#[tokio::test]
async fn http1_keep_alive_reuses_the_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicUsize::new(0));
    let server_accepts = accepts.clone();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        server_accepts.fetch_add(1, Ordering::SeqCst);
        for index in 0..2 {
            // Read one request head.
            let mut head = Vec::new();
            let mut byte = [0u8; 1];
            while !head.ends_with(b"\r\n\r\n") {
                if sock.read(&mut byte).await.unwrap() == 0 {
                    return;
                }
                head.push(byte[0]);
            }
            let body = format!("response {}", index);
            let reply = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            sock.write_all(reply.as_bytes()).await.unwrap();
        }
    });

    let client = HttpClient::builder()
        .connect_timeout(Duration::from_secs(5))
        .read_timeout(Duration::from_secs(5))
        .build();
    let url = format!("http://127.0.0.1:{}/ka", port);

    let mut first = client
        .call(Request::get(&url).unwrap())
        .execute()
        .await
        .unwrap();
    assert_eq!(first.body_mut().text().await.unwrap(), "response 0");

    let mut second = client
        .call(Request::get(&url).unwrap())
        .execute()
        .await
        .unwrap();
    assert_eq!(second.body_mut().text().await.unwrap(), "response 1");

    assert_eq!(accepts.load(Ordering::SeqCst), 1);
    assert_eq!(client.connection_pool().connection_count(), 1);
}
