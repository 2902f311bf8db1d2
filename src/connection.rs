//! Connection types shared by the worker, its readers and the dialer

use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::proxy::reader::LineReader;
use crate::{Error, Result};

/// Any bidirectional byte stream a worker can proxy over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Read side of a connection, buffered for line-oriented parsing.
pub type ConnReader = LineReader<BufReader<ReadHalf<BoxedStream>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// Which side of the proxy a connection faces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    Client,
    Server,
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Peer::Client => write!(f, "client"),
            Peer::Server => write!(f, "server"),
        }
    }
}

/// Write side of a proxied connection.
///
/// The read half is handed out by [`Connection::split`] and moves between the
/// worker and its reader tasks; the write half stays here until [`close`] is
/// called, which happens at most once.
///
/// [`close`]: Connection::close
pub struct Connection {
    pub peer: Peer,
    pub address: String,
    pub state: ConnectionState,
    opened_at: Instant,
    writer: Option<WriteHalf<BoxedStream>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("address", &self.address)
            .field("state", &self.state)
            .finish()
    }
}

impl Connection {
    pub fn split(
        stream: BoxedStream,
        peer: Peer,
        address: impl Into<String>,
    ) -> (Self, ConnReader) {
        let (read_half, write_half) = tokio::io::split(stream);
        let connection = Self {
            peer,
            address: address.into(),
            state: ConnectionState::Open,
            opened_at: Instant::now(),
            writer: Some(write_half),
        };
        (connection, LineReader::new(BufReader::new(read_half)))
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Write the whole buffer and flush it; any failure is a `WriteFailed`.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let is_open = self.is_open();
        let writer = match self.writer.as_mut() {
            Some(writer) if is_open => writer,
            _ => {
                return Err(Error::write_failed(format!(
                    "{} connection {} is closed",
                    self.peer, self.address
                )))
            }
        };
        writer.write_all(data).await.map_err(Error::write_failed)?;
        writer.flush().await.map_err(Error::write_failed)?;
        Ok(())
    }

    /// Like [`write_all`](Connection::write_all), but gives up with
    /// `Cancelled` as soon as `token` fires, even if the peer has stopped
    /// reading. Part of `data` may have been written by then.
    pub async fn write_all_or_cancel(
        &mut self,
        data: &[u8],
        token: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            res = self.write_all(data) => res,
        }
    }

    /// Shut the write side down and drop it. Returns `false` if the connection
    /// had already been closed.
    pub async fn close(&mut self) -> bool {
        let Some(mut writer) = self.writer.take() else {
            return false;
        };
        if let Err(e) = writer.shutdown().await {
            debug!("{} connection {} shutdown: {}", self.peer, self.address, e);
        }
        self.state = ConnectionState::Closed;
        debug!(
            "{} connection {} closed after {:?}",
            self.peer,
            self.address,
            self.opened_at.elapsed()
        );
        true
    }
}
