/*
 * net.rs
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

//! Transport layer: TCP dialing, TLS with ALPN (rustls), SOCKS5 setup.
//!
//! The engine consumes transports through [`TransportFactory`] so embedders
//! can substitute their own socket or TLS machinery; [`SystemTransport`] is
//! the stock implementation (native roots with webpki-roots as fallback).

use serde::{Deserialize, Serialize};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream as TokioTlsStream;
use tokio_rustls::rustls::client::ClientConfig;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::RootCertStore;
use tokio_rustls::TlsConnector;

use crate::response::Protocol;
use crate::BoxFuture;

/// Snapshot of a completed TLS handshake, attached to responses and cache
/// entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Negotiated TLS version, e.g. "TLSv1_3".
    pub tls_version: String,
    /// Negotiated cipher suite name.
    pub cipher_suite: String,
    /// ALPN protocol the peer selected, if any.
    pub alpn: Option<String>,
}

/// Unified byte stream: plain TCP or TLS over TCP.
pub enum HttpStream {
    Plain(TcpStream),
    Tls(Box<TokioTlsStream<TcpStream>>),
}

impl AsyncRead for HttpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for HttpStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_flush(cx),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Opens the raw streams the engine runs over. The factory owns certificate
/// policy; the engine only sees the negotiated result.
pub trait TransportFactory: Send + Sync {
    /// Open a TCP connection to the endpoint within the timeout.
    fn dial(
        &self,
        endpoint: SocketAddr,
        connect_timeout: Duration,
    ) -> BoxFuture<'_, io::Result<TcpStream>>;

    /// Perform a TLS handshake over an established stream, advertising the
    /// given protocols via ALPN. Returns the secured stream and a handshake
    /// descriptor.
    fn secure(
        &self,
        tcp: TcpStream,
        host: String,
        alpn: Vec<Protocol>,
    ) -> BoxFuture<'_, io::Result<(HttpStream, Handshake)>>;
}

/// Build a root certificate store: platform native certs first, then
/// webpki-roots as fallback.
fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    if let Ok(certs) = rustls_native_certs::load_native_certs() {
        for cert in certs {
            let _ = root_store.add(cert);
        }
    }
    if root_store.is_empty() {
        root_store.roots = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
    }
    root_store
}

fn client_config(alpn: &[Protocol]) -> Arc<ClientConfig> {
    let mut config = ClientConfig::builder()
        .with_root_certificates(build_root_store())
        .with_no_client_auth();
    config.alpn_protocols = alpn
        .iter()
        .map(|p| match p {
            Protocol::H2 => b"h2".to_vec(),
            _ => b"http/1.1".to_vec(),
        })
        .collect();
    Arc::new(config)
}

/// Stock transport: tokio TCP plus rustls TLS.
pub struct SystemTransport;

impl SystemTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for SystemTransport {
    fn dial(
        &self,
        endpoint: SocketAddr,
        connect_timeout: Duration,
    ) -> BoxFuture<'_, io::Result<TcpStream>> {
        Box::pin(async move {
            let connect = TcpStream::connect(endpoint);
            let tcp = if connect_timeout.is_zero() {
                connect.await?
            } else {
                timeout(connect_timeout, connect)
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TCP connect timed out"))??
            };
            tcp.set_nodelay(true)?;
            Ok(tcp)
        })
    }

    fn secure(
        &self,
        tcp: TcpStream,
        host: String,
        alpn: Vec<Protocol>,
    ) -> BoxFuture<'_, io::Result<(HttpStream, Handshake)>> {
        Box::pin(async move {
            let server_name: ServerName<'static> = host
                .clone()
                .try_into()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid host name"))?;
            let connector = TlsConnector::from(client_config(&alpn));
            let tls = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e))?;
            let session = tls.get_ref().1;
            let handshake = Handshake {
                tls_version: session
                    .protocol_version()
                    .map(|v| format!("{:?}", v))
                    .unwrap_or_else(|| "unknown".to_string()),
                cipher_suite: session
                    .negotiated_cipher_suite()
                    .map(|s| format!("{:?}", s.suite()))
                    .unwrap_or_else(|| "unknown".to_string()),
                alpn: session
                    .alpn_protocol()
                    .map(|p| String::from_utf8_lossy(p).into_owned()),
            };
            Ok((HttpStream::Tls(Box::new(tls)), handshake))
        })
    }
}

/// Minimal SOCKS5 client handshake (no authentication): greeting, then a
/// CONNECT to the target host and port. Runs before any TLS.
pub(crate) async fn socks5_connect(
    stream: &mut TcpStream,
    host: &str,
    port: u16,
) -> io::Result<()> {
    // Greeting: version 5, one method, no-auth.
    stream.write_all(&[0x05, 0x01, 0x00]).await?;
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply != [0x05, 0x00] {
        return Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "SOCKS5 proxy requires authentication",
        ));
    }

    // CONNECT request with a domain-name address.
    let host_bytes = host.as_bytes();
    if host_bytes.len() > 255 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "host too long for SOCKS5"));
    }
    let mut request = Vec::with_capacity(7 + host_bytes.len());
    request.extend_from_slice(&[0x05, 0x01, 0x00, 0x03, host_bytes.len() as u8]);
    request.extend_from_slice(host_bytes);
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[1] != 0x00 {
        return Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("SOCKS5 connect failed: code {}", head[1]),
        ));
    }
    // Consume the bound address: 4 (IPv4), 16 (IPv6), or len-prefixed name.
    let addr_len = match head[3] {
        0x01 => 4,
        0x04 => 16,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("SOCKS5 reply with unknown address type {}", other),
            ))
        }
    };
    let mut rest = vec![0u8; addr_len + 2];
    stream.read_exact(&mut rest).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn dial_within_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let transport = SystemTransport::new();
        let stream = transport.dial(addr, Duration::from_secs(5)).await.unwrap();
        assert!(stream.peer_addr().is_ok());
    }

    #[tokio::test]
    async fn socks5_handshake_happy_path() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut greeting = [0u8; 3];
            sock.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [0x05, 0x01, 0x00]);
            sock.write_all(&[0x05, 0x00]).await.unwrap();
            let mut head = [0u8; 5];
            sock.read_exact(&mut head).await.unwrap();
            assert_eq!(&head[..4], &[0x05, 0x01, 0x00, 0x03]);
            let mut rest = vec![0u8; head[4] as usize + 2];
            sock.read_exact(&mut rest).await.unwrap();
            // Reply: success, IPv4 0.0.0.0:0
            sock.write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        socks5_connect(&mut stream, "example.com", 80).await.unwrap();
        server.await.unwrap();
    }
}
