//! Streaming body decoding for fixed-length and chunked messages
//!
//! A [`BodyReader`] is chosen from the response headers with
//! [`BodyReader::new`]. Starting it spawns a task that decodes the body and
//! pushes successive non-empty chunks onto a bounded channel, followed by
//! exactly one terminal item: an empty chunk on success or the error that
//! stopped decoding. The consumer side is a [`BodyTransfer`].

use bytes::Bytes;
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::proxy::headers::HeaderMap;
use crate::proxy::reader::LineReader;
use crate::{Error, Result};

/// Terminal chunk of a chunked body as sent on the wire.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

type ChunkSender = mpsc::Sender<Result<Bytes>>;

/// How a message body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Fixed(u64),
    Chunked,
    Unsupported,
}

impl BodyFraming {
    /// `content-length` wins when it parses; otherwise `transfer-encoding:
    /// chunked`; otherwise the body cannot be delimited.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        if let Some(length) = headers
            .get("content-length")
            .and_then(|v| v.parse::<u64>().ok())
        {
            return BodyFraming::Fixed(length);
        }
        if headers.get("transfer-encoding") == Some("chunked") {
            return BodyFraming::Chunked;
        }
        BodyFraming::Unsupported
    }
}

/// Reads exactly `length` bytes.
#[derive(Debug)]
pub struct FixedLengthBodyReader<R> {
    reader: LineReader<R>,
    length: u64,
    buffer_size: usize,
}

impl<R> FixedLengthBodyReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: LineReader<R>, length: u64, buffer_size: usize) -> Self {
        Self {
            reader,
            length,
            buffer_size: buffer_size.max(1),
        }
    }

    async fn produce(&mut self, tx: &ChunkSender) -> Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        let mut remaining = self.length;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = self
                .reader
                .read(&mut buf[..want])
                .await
                .map_err(Error::body_read_failed)?;
            if n == 0 {
                return Err(Error::body_read_failed(format!(
                    "connection closed with {} of {} bytes outstanding",
                    remaining, self.length
                )));
            }
            remaining -= n as u64;
            send_chunk(tx, Bytes::copy_from_slice(&buf[..n])).await?;
        }
        Ok(())
    }
}

/// Decodes `transfer-encoding: chunked`. Chunk extensions are ignored and
/// trailer fields are read and discarded.
#[derive(Debug)]
pub struct ChunkedBodyReader<R> {
    reader: LineReader<R>,
    buffer_size: usize,
}

impl<R> ChunkedBodyReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: LineReader<R>, buffer_size: usize) -> Self {
        Self {
            reader,
            buffer_size: buffer_size.max(1),
        }
    }

    async fn produce(&mut self, tx: &ChunkSender) -> Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let line = self
                .reader
                .read_line()
                .await
                .map_err(Error::body_read_failed)?;
            let size = parse_chunk_size(&line)?;
            if size == 0 {
                let trailers = self
                    .reader
                    .read_headers()
                    .await
                    .map_err(Error::body_read_failed)?;
                if !trailers.is_empty() {
                    debug!("discarding {} trailer field(s)", trailers.len());
                }
                return Ok(());
            }

            let mut remaining = size;
            while remaining > 0 {
                let want = remaining.min(buf.len() as u64) as usize;
                self.reader
                    .read_exact(&mut buf[..want])
                    .await
                    .map_err(Error::body_read_failed)?;
                remaining -= want as u64;
                send_chunk(tx, Bytes::copy_from_slice(&buf[..want])).await?;
            }

            let end = self
                .reader
                .read_line()
                .await
                .map_err(Error::body_read_failed)?;
            if !end.is_empty() {
                return Err(Error::body_read_failed("missing CRLF after chunk data"));
            }
        }
    }
}

/// Parse a chunk-size line (without its CRLF), ignoring any extensions.
pub fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::body_read_failed("empty chunk size line"));
    }
    let mut wire = Vec::with_capacity(line.len() + 2);
    wire.extend_from_slice(line);
    wire.extend_from_slice(b"\r\n");
    match httparse::parse_chunk_size(&wire) {
        Ok(httparse::Status::Complete((_, size))) => Ok(size),
        _ => Err(Error::body_read_failed(format!(
            "invalid chunk size line: {:?}",
            String::from_utf8_lossy(line)
        ))),
    }
}

/// Frame `data` as a single chunk of a chunked body.
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{:x}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

async fn send_chunk(tx: &ChunkSender, chunk: Bytes) -> Result<()> {
    tx.send(Ok(chunk)).await.map_err(|_| Error::Cancelled)
}

/// The closed set of body decoders.
#[derive(Debug)]
pub enum BodyReader<R> {
    FixedLength(FixedLengthBodyReader<R>),
    Chunked(ChunkedBodyReader<R>),
}

impl<R> BodyReader<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    /// Pick a decoder for a message with `headers`. Fails with
    /// `UnsupportedBodyFraming` when neither framing header is usable.
    pub fn new(reader: LineReader<R>, headers: &HeaderMap, buffer_size: usize) -> Result<Self> {
        match BodyFraming::from_headers(headers) {
            BodyFraming::Fixed(length) => Ok(BodyReader::FixedLength(FixedLengthBodyReader::new(
                reader,
                length,
                buffer_size,
            ))),
            BodyFraming::Chunked => Ok(BodyReader::Chunked(ChunkedBodyReader::new(
                reader,
                buffer_size,
            ))),
            BodyFraming::Unsupported => Err(Error::UnsupportedBodyFraming),
        }
    }

    pub fn framing(&self) -> BodyFraming {
        match self {
            BodyReader::FixedLength(r) => BodyFraming::Fixed(r.length),
            BodyReader::Chunked(_) => BodyFraming::Chunked,
        }
    }

    async fn produce(&mut self, tx: &ChunkSender) -> Result<()> {
        match self {
            BodyReader::FixedLength(r) => r.produce(tx).await,
            BodyReader::Chunked(r) => r.produce(tx).await,
        }
    }

    /// Spawn the decoding task. Cancelling `token` stops it at its next
    /// await point; chunks already queued may or may not be delivered.
    pub fn start(mut self, channel_capacity: usize, token: CancellationToken) -> BodyTransfer {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = task_token.cancelled() => {
                    debug!("body reader cancelled");
                    return;
                }
                res = self.produce(&tx) => res,
            };
            let terminal = match outcome {
                Ok(()) => Ok(Bytes::new()),
                Err(Error::Cancelled) => return,
                Err(e) => Err(e),
            };
            let _ = tx.send(terminal).await;
        });
        BodyTransfer { rx, token, handle }
    }
}

/// Consumer side of a running [`BodyReader`].
#[derive(Debug)]
pub struct BodyTransfer {
    rx: mpsc::Receiver<Result<Bytes>>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl BodyTransfer {
    /// Next item from the reader: a non-empty chunk, the terminal empty
    /// chunk, or the error that ended decoding. `None` means the reader
    /// stopped without either, which only happens after cancellation.
    pub async fn body_received(&mut self) -> Option<Result<Bytes>> {
        self.rx.recv().await
    }

    /// Stop the reader and wait until it has released the connection.
    pub async fn cancel(self) {
        let BodyTransfer { rx, token, handle } = self;
        token.cancel();
        drop(rx);
        let _ = handle.await;
    }

    /// Wait for the reader task to exit after it delivered its terminal item.
    pub async fn finish(self) {
        let _ = self.handle.await;
    }
}
