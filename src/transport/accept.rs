//! Pre-handshake stream plumbing for the listener.
//!
//! Every accepted socket may carry a PROXY protocol preamble, a TLS
//! handshake, and then either a plain HTTP request (`/health`, dev
//! `/ingest`) or a WebSocket upgrade. The request head is read once here
//! and replayed through [`Rewind`] so the WebSocket handshake sees the
//! bytes untouched.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

/// Upper bound on the size of a request head.
const MAX_REQUEST_HEAD_BYTES: usize = 8 * 1024;
/// A PROXY protocol v1 line is at most 107 bytes including CRLF.
const MAX_PROXY_LINE_BYTES: usize = 107;

/// A stream that replays already-buffered bytes before reading from the
/// underlying stream.
pub struct Rewind<S> {
    buffer: Vec<u8>,
    position: usize,
    inner: S,
}

impl<S> Rewind<S> {
    pub fn new(buffer: Vec<u8>, inner: S) -> Self {
        Self { buffer, position: 0, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.position < this.buffer.len() {
            let remaining = &this.buffer[this.position..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            this.position += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Consumes the PROXY protocol v1 line from the socket and returns the
/// advertised client address plus any bytes read past the line, which the
/// caller must replay.
pub async fn read_proxy_header(stream: &mut TcpStream) -> io::Result<(String, Vec<u8>)> {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let leftover = buf.split_off(pos + 1);
            let line = String::from_utf8_lossy(&buf[..pos]).into_owned();
            let addr = parse_proxy_line(line.trim_end_matches('\r'))?;
            return Ok((addr, leftover));
        }
        if buf.len() >= MAX_PROXY_LINE_BYTES {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "PROXY header too long"));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Parses `PROXY TCP4 <src> <dst> <sport> <dport>` into `src:sport`.
pub(crate) fn parse_proxy_line(line: &str) -> io::Result<String> {
    let mut parts = line.split(' ');
    if parts.next() != Some("PROXY") {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "missing PROXY preamble"));
    }
    match parts.next() {
        Some("TCP4") | Some("TCP6") => {
            let src = parts
                .next()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "PROXY line missing source"))?;
            let _dst = parts.next();
            let src_port = parts
                .next()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "PROXY line missing port"))?;
            Ok(format!("{}:{}", src, src_port))
        }
        Some("UNKNOWN") => Ok("unknown".to_string()),
        _ => Err(io::Error::new(io::ErrorKind::InvalidData, "unsupported PROXY protocol")),
    }
}

/// Reads the HTTP request head (through the blank line) into a buffer.
pub async fn read_request_head<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<Vec<u8>> {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(buf);
        }
        if buf.len() > MAX_REQUEST_HEAD_BYTES {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "request head too large"));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Where an accepted request is routed.
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    Health,
    Ingest,
    WebSocketUpgrade,
    Unknown,
}

pub fn route_request(head: &[u8]) -> Route {
    let text = String::from_utf8_lossy(head);
    let request_line = text.lines().next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("").split('?').next().unwrap_or("");
    match (method, path) {
        ("GET", "/health") => Route::Health,
        ("POST", "/ingest") => Route::Ingest,
        ("GET", _) => Route::WebSocketUpgrade,
        _ => Route::Unknown,
    }
}

/// Value of the Content-Length header in the request head, if any.
pub fn content_length(head: &[u8]) -> Option<usize> {
    let text = String::from_utf8_lossy(head);
    for line in text.lines().skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                return value.trim().parse().ok();
            }
        }
    }
    None
}

/// Reads the request body, combining bytes already present in the head
/// buffer with the rest of the stream.
pub async fn read_body<S: AsyncRead + Unpin>(
    stream: &mut S,
    head: &[u8],
    length: usize,
) -> io::Result<Vec<u8>> {
    let start = head
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
        .unwrap_or(head.len());
    let mut body = head[start..].to_vec();
    let mut chunk = [0u8; 1024];
    while body.len() < length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(length);
    Ok(body)
}

/// Writes a minimal HTTP response and flushes it.
pub async fn respond<S: AsyncWrite + Unpin>(
    stream: &mut S,
    status: u16,
    reason: &str,
    body: &str,
) -> io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

/// Builds a TLS acceptor from a PEM bundle holding the certificate chain
/// and private key.
pub fn load_tls_acceptor(cert_path: &str) -> anyhow::Result<TlsAcceptor> {
    let pem = std::fs::read(cert_path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice()).collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut pem.as_slice())?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", cert_path))?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}
