// src/proxy/forwarder.rs
//
// Bidirectional byte shuttle between a client and the backend chosen for it.

use super::backend::Backend;
use crate::metrics::MetricsCollector;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, warn, Instrument, Span};

/// Per-direction copy buffer. Memory per connection is two of these.
pub const BUFFER_SIZE: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToBackend,
    ToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ToBackend => f.write_str("client->backend"),
            Direction::ToClient => f.write_str("backend->client"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardSummary {
    pub to_backend: u64,
    pub to_client: u64,
}

impl ForwardSummary {
    pub fn total(&self) -> u64 {
        self.to_backend + self.to_client
    }
}

/// Read side of a connection that can stop receiving while its write side
/// stays open.
pub trait CloseRead {
    fn close_read(&self) -> io::Result<()>;
}

/// A connection that splits into independently owned read and write halves.
pub trait IntoHalves: Send + 'static {
    type Read: AsyncRead + CloseRead + Unpin + Send + 'static;
    type Write: AsyncWrite + Unpin + Send + 'static;

    fn into_halves(self) -> (Self::Read, Self::Write);
}

impl IntoHalves for TcpStream {
    type Read = OwnedReadHalf;
    type Write = OwnedWriteHalf;

    fn into_halves(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.into_split()
    }
}

impl CloseRead for OwnedReadHalf {
    fn close_read(&self) -> io::Result<()> {
        shutdown_read(self.as_ref())
    }
}

#[cfg(unix)]
fn shutdown_read(stream: &TcpStream) -> io::Result<()> {
    use nix::sys::socket::{shutdown, Shutdown};
    use std::os::unix::io::AsRawFd;

    shutdown(stream.as_raw_fd(), Shutdown::Read).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn shutdown_read(_stream: &TcpStream) -> io::Result<()> {
    Ok(())
}

impl IntoHalves for DuplexStream {
    type Read = ReadHalf<DuplexStream>;
    type Write = WriteHalf<DuplexStream>;

    fn into_halves(self) -> (Self::Read, Self::Write) {
        tokio::io::split(self)
    }
}

// In-memory pipes have no separate receive shutdown; the half is released on drop.
impl<T> CloseRead for ReadHalf<T> {
    fn close_read(&self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct Forwarder {
    metrics: Option<Arc<MetricsCollector>>,
}

impl Forwarder {
    pub fn new() -> Self {
        Self { metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Copy bytes both ways until each direction reaches EOF or fails.
    ///
    /// Each direction runs in its own task. When it ends it shuts down the
    /// destination's write side and the source's read side, so the other
    /// direction keeps flowing. Returns once both tasks have finished; errors
    /// are logged, never returned.
    pub async fn forward<C, U>(&self, client: C, upstream: U, backend: Arc<Backend>) -> ForwardSummary
    where
        C: IntoHalves,
        U: IntoHalves,
    {
        if let Some(metrics) = &self.metrics {
            metrics.increment_active_connections();
        }
        debug!("<{}> Start transfer", backend.address);

        let (client_read, client_write) = client.into_halves();
        let (upstream_read, upstream_write) = upstream.into_halves();

        let to_backend = tokio::spawn(copy_half(
            client_read,
            upstream_write,
            backend.clone(),
            self.metrics.clone(),
            Direction::ToBackend,
        )
        .instrument(Span::current()));
        let to_client = tokio::spawn(copy_half(
            upstream_read,
            client_write,
            backend.clone(),
            self.metrics.clone(),
            Direction::ToClient,
        )
        .instrument(Span::current()));

        let (to_backend, to_client) = tokio::join!(to_backend, to_client);
        let summary = ForwardSummary {
            to_backend: to_backend.unwrap_or_else(|e| {
                warn!("<{}> {} copy task failed: {}", backend.address, Direction::ToBackend, e);
                0
            }),
            to_client: to_client.unwrap_or_else(|e| {
                warn!("<{}> {} copy task failed: {}", backend.address, Direction::ToClient, e);
                0
            }),
        };

        if let Some(metrics) = &self.metrics {
            metrics.decrement_active_connections();
        }
        debug!(
            to_backend = summary.to_backend,
            to_client = summary.to_client,
            "<{}> Finished transfer",
            backend.address
        );

        summary
    }
}

/// Copy one side of the connection, then half-close both ends of it.
///
/// Bytes are accounted on the backend as each write lands, so a write that
/// fails part way still counts what the destination accepted.
async fn copy_half<R, W>(
    mut src: R,
    mut dst: W,
    backend: Arc<Backend>,
    metrics: Option<Arc<MetricsCollector>>,
    direction: Direction,
) -> u64
where
    R: AsyncRead + CloseRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut copied = 0u64;

    'copy: loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("<{}> {} read error: {}", backend.address, direction, e);
                break;
            }
        };

        let mut pending = &buf[..n];
        while !pending.is_empty() {
            let written = match dst.write(pending).await {
                Ok(0) => {
                    warn!("<{}> {} write error: peer accepted no bytes", backend.address, direction);
                    break 'copy;
                }
                Ok(written) => written,
                Err(e) => {
                    warn!("<{}> {} write error: {}", backend.address, direction, e);
                    break 'copy;
                }
            };
            pending = &pending[written..];

            let written = written as u64;
            copied += written;
            backend.add_transferred(written);
            if let Some(metrics) = &metrics {
                metrics.record_transferred(&backend.address, written);
            }
        }
    }

    if let Err(e) = dst.shutdown().await {
        debug!("<{}> {} half-close failed: {}", backend.address, direction, e);
    }
    if let Err(e) = src.close_read() {
        debug!("<{}> {} read shutdown failed: {}", backend.address, direction, e);
    }

    copied
}
