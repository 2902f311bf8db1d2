//! Line-oriented reading of HTTP/1.1 message heads

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::proxy::headers::HeaderMap;
use crate::{Error, Result};

/// Buffered reader that yields protocol lines with the trailing CR/LF removed.
///
/// Lines are returned as raw bytes and are not length limited; a line split
/// across several reads of the underlying stream is reassembled before it is
/// returned.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read one logical line. End of stream before the terminating LF is an
    /// error, even when part of a line was already read.
    pub async fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        let n = self
            .inner
            .read_until(b'\n', &mut line)
            .await
            .map_err(Error::read_error)?;
        if n == 0 {
            return Err(Error::read_error("unexpected end of stream"));
        }
        if line.last() != Some(&b'\n') {
            return Err(Error::read_error("stream ended in the middle of a line"));
        }
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(line)
    }

    /// Read header lines up to and including the blank line that ends the
    /// header block. Values keep their bytes as received, apart from the
    /// surrounding whitespace.
    pub async fn read_headers(&mut self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        loop {
            let line = self
                .read_line()
                .await
                .map_err(Error::headers_read_failed)?;
            if line.is_empty() {
                return Ok(headers);
            }
            let invalid = || Error::invalid_header_format(String::from_utf8_lossy(&line));
            let colon = line.iter().position(|&b| b == b':').ok_or_else(invalid)?;
            let name = std::str::from_utf8(&line[..colon]).map_err(|_| invalid())?;
            headers.insert(name, trim_whitespace(&line[colon + 1..]));
        }
    }

    /// Read whatever is available, up to `buf.len()` bytes. Returns 0 at end
    /// of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf).await
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.inner.read_exact(buf).await.map(|_| ())
    }
}

fn trim_whitespace(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if !first.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    while let [rest @ .., last] = bytes {
        if !last.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use tokio_test::io::Builder;

    type MockReader = LineReader<tokio::io::BufReader<tokio_test::io::Mock>>;

    fn reader(mock: tokio_test::io::Mock) -> MockReader {
        LineReader::new(tokio::io::BufReader::new(mock))
    }

    #[tokio::test]
    async fn test_read_line_strips_crlf_and_lf() {
        let mut r = reader(Builder::new().read(b"first\r\nsecond\n\r\n").build());
        assert_eq!(r.read_line().await.unwrap(), b"first");
        assert_eq!(r.read_line().await.unwrap(), b"second");
        assert!(r.read_line().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_line_reassembles_split_reads() {
        let mock = Builder::new()
            .read(b"GET /very")
            .read(b"/long/pa")
            .read(b"th HTTP/1.1\r")
            .read(b"\n")
            .build();
        let mut r = reader(mock);
        assert_eq!(r.read_line().await.unwrap(), b"GET /very/long/path HTTP/1.1");
    }

    #[tokio::test]
    async fn test_read_line_longer_than_buffer() {
        let long = "a".repeat(64 * 1024);
        let input = format!("{}\r\n", long);
        let mut r = LineReader::new(tokio::io::BufReader::with_capacity(
            16,
            Builder::new().read(input.as_bytes()).build(),
        ));
        assert_eq!(r.read_line().await.unwrap(), long.as_bytes());
    }

    #[tokio::test]
    async fn test_read_line_eof_mid_line() {
        let mut r = reader(Builder::new().read(b"partial").build());
        let err = r.read_line().await.unwrap_err();
        assert!(matches!(err, Error::ReadError(_)));
    }

    #[tokio::test]
    async fn test_read_line_clean_eof() {
        let mut r = reader(Builder::new().build());
        assert!(matches!(r.read_line().await, Err(Error::ReadError(_))));
    }

    #[tokio::test]
    async fn test_read_line_stream_error() {
        let mock = Builder::new()
            .read(b"Host: exa")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut r = reader(mock);
        assert!(matches!(r.read_line().await, Err(Error::ReadError(_))));
    }

    #[tokio::test]
    async fn test_read_headers() {
        let mock = Builder::new()
            .read(b"Host: example.com\r\n")
            .read(b"  Content-TYPE :  text/plain  \r\n")
            .read(b"X-Empty:\r\n")
            .read(b"Location: http://example.com:8080/a\r\n")
            .read(b"\r\n")
            .build();
        let mut r = reader(mock);
        let headers = r.read_headers().await.unwrap();

        assert_eq!(headers.len(), 4);
        assert_eq!(headers.get("host"), Some("example.com"));
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("x-empty"), Some(""));
        assert_eq!(headers.get("location"), Some("http://example.com:8080/a"));
    }

    #[tokio::test]
    async fn test_read_headers_duplicate_last_wins() {
        let mut r = reader(Builder::new().read(b"Via: a\r\nvia: b\r\n\r\n").build());
        let headers = r.read_headers().await.unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("via"), Some("b"));
    }

    #[tokio::test]
    async fn test_read_headers_keeps_non_utf8_values() {
        let mut r = reader(Builder::new().read(b"X-Name: caf\xe9 \r\n\r\n").build());
        let headers = r.read_headers().await.unwrap();

        assert_eq!(headers.get_raw("x-name"), Some(&b"caf\xe9"[..]));
        assert_eq!(headers.get("x-name"), None);

        let mut wire = Vec::new();
        headers.write_to(&mut wire);
        assert_eq!(wire, b"X-Name: caf\xe9\r\n\r\n");
    }

    #[tokio::test]
    async fn test_read_headers_rejects_non_utf8_name() {
        let mut r = reader(Builder::new().read(b"X-\xff: 1\r\n\r\n").build());
        let err = r.read_headers().await.unwrap_err();
        assert!(matches!(err, Error::InvalidHeaderFormat(_)));
    }

    #[tokio::test]
    async fn test_read_headers_missing_colon() {
        let mut r = reader(Builder::new().read(b"Host example.com\r\n").build());
        let err = r.read_headers().await.unwrap_err();
        assert!(matches!(err, Error::InvalidHeaderFormat(_)));
    }

    #[tokio::test]
    async fn test_read_headers_eof_before_blank_line() {
        let mut r = reader(Builder::new().read(b"Host: example.com\r\n").build());
        let err = r.read_headers().await.unwrap_err();
        assert!(matches!(err, Error::HeadersReadFailed(_)));
    }

    #[tokio::test]
    async fn test_header_block_round_trip() {
        let original: HeaderMap = [
            ("Host", "example.com"),
            ("accept-encoding", "gzip, deflate"),
            ("X-Request-Id", "42"),
        ]
        .into_iter()
        .collect();
        let mut wire = Vec::new();
        original.write_to(&mut wire);

        let mut r = reader(Builder::new().read(&wire).build());
        let parsed = r.read_headers().await.unwrap();
        assert_eq!(parsed, original);
        assert_eq!(parsed.get("x-request-id"), Some("42"));
    }
}
