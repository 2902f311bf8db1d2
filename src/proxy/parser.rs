//! Request and response head readers running as independent tasks
//!
//! A [`MessageReader`] takes ownership of a connection's read side, parses a
//! start line plus header block on a spawned task, and hands the read side
//! back together with the parsed head. Bodies are never touched here; body
//! framing is decided by the worker once the full head is known.

use tokio::io::AsyncBufRead;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::proxy::headers::HeaderMap;
use crate::proxy::message::{Request, Response};
use crate::proxy::reader::LineReader;
use crate::{Error, Result};

/// A message head that can be built from its start line.
pub trait MessageHead: Sized + Send + 'static {
    const KIND: &'static str;

    fn from_start_line(line: &str) -> Result<Self>;

    /// Error for a start line that cannot be parsed at all.
    fn invalid_start_line(line: &str) -> Error;

    fn set_headers(&mut self, headers: HeaderMap);
}

impl MessageHead for Request {
    const KIND: &'static str = "request";

    /// `METHOD SP target SP version`, exactly three tokens.
    fn from_start_line(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split(' ').collect();
        let [method, target, version] = fields.as_slice() else {
            return Err(Error::invalid_request_line(line));
        };
        Ok(Request {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers: HeaderMap::new(),
        })
    }

    fn invalid_start_line(line: &str) -> Error {
        Error::invalid_request_line(line)
    }

    fn set_headers(&mut self, headers: HeaderMap) {
        self.headers = headers;
    }
}

impl MessageHead for Response {
    const KIND: &'static str = "response";

    /// `version SP status SP phrase...`; the phrase may itself contain spaces.
    fn from_start_line(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split(' ').collect();
        if fields.len() < 3 {
            return Err(Error::invalid_status_line(line));
        }
        Ok(Response {
            version: fields[0].to_string(),
            status: parse_status_code(fields[1])?,
            phrase: fields[2..].join(" "),
            headers: HeaderMap::new(),
        })
    }

    fn invalid_start_line(line: &str) -> Error {
        Error::invalid_status_line(line)
    }

    fn set_headers(&mut self, headers: HeaderMap) {
        self.headers = headers;
    }
}

/// Status codes must be integers whose first digit is 1 through 5.
pub fn parse_status_code(s: &str) -> Result<u16> {
    let status: i64 = s.parse().map_err(|_| Error::invalid_status_code(s))?;
    if !(1..=5).contains(&(status / 100)) {
        return Err(Error::invalid_status_code(s));
    }
    u16::try_from(status).map_err(|_| Error::invalid_status_code(s))
}

/// Parse a start line and header block from `reader`. Start lines must be
/// valid UTF-8; header values are kept as raw bytes.
pub async fn read_message<M, R>(reader: &mut LineReader<R>) -> Result<M>
where
    M: MessageHead,
    R: AsyncBufRead + Unpin,
{
    let raw = reader.read_line().await?;
    let line = std::str::from_utf8(&raw)
        .map_err(|_| M::invalid_start_line(&String::from_utf8_lossy(&raw)))?;
    let mut message = M::from_start_line(line)?;
    message.set_headers(reader.read_headers().await?);
    Ok(message)
}

/// Handle to a head-parsing task. Exactly one outcome is produced: the parsed
/// head with the reader handed back, or the error that stopped parsing.
#[derive(Debug)]
pub struct MessageReader<M, R> {
    handle: JoinHandle<Result<(M, LineReader<R>)>>,
    token: CancellationToken,
}

pub type RequestReader<R> = MessageReader<Request, R>;
pub type ResponseReader<R> = MessageReader<Response, R>;

impl<M, R> MessageReader<M, R>
where
    M: MessageHead,
    R: AsyncBufRead + Unpin + Send + 'static,
{
    /// Spawn the parsing task. Cancelling `token` stops it at its next read.
    pub fn start(mut reader: LineReader<R>, token: CancellationToken) -> Self {
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = task_token.cancelled() => {
                    debug!("{} reader cancelled", M::KIND);
                    return Err(Error::Cancelled);
                }
                res = read_message::<M, R>(&mut reader) => res,
            };
            outcome.map(|message| (message, reader))
        });
        Self { handle, token }
    }

    /// Wait for the task's outcome. Safe to use as a `select!` branch.
    pub async fn received(&mut self) -> Result<(M, LineReader<R>)> {
        match (&mut self.handle).await {
            Ok(outcome) => outcome,
            Err(e) => Err(Error::internal(format!("{} reader task failed: {}", M::KIND, e))),
        }
    }

    /// Stop the task and wait until it has released the connection.
    pub async fn cancel(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;
    use tokio_test::io::{Builder, Mock};

    fn line_reader(mock: Mock) -> LineReader<BufReader<Mock>> {
        LineReader::new(BufReader::new(mock))
    }

    #[test]
    fn test_request_line_fields_verbatim() {
        let req = Request::from_start_line("GET http://example.com/a?b=c HTTP/1.1").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "http://example.com/a?b=c");
        assert_eq!(req.version, "HTTP/1.1");

        let req = Request::from_start_line("get /x http/1.0").unwrap();
        assert_eq!(req.method, "get");
        assert_eq!(req.version, "http/1.0");
    }

    #[test]
    fn test_request_line_token_count() {
        for line in ["GET /", "GET / HTTP/1.1 extra", "GET  / HTTP/1.1", ""] {
            let err = Request::from_start_line(line).unwrap_err();
            assert!(matches!(err, Error::InvalidRequestLine(_)), "{:?}", line);
        }
    }

    #[test]
    fn test_status_line() {
        let res = Response::from_start_line("HTTP/1.1 404 Not Found").unwrap();
        assert_eq!(res.version, "HTTP/1.1");
        assert_eq!(res.status, 404);
        assert_eq!(res.phrase, "Not Found");

        let res = Response::from_start_line("HTTP/1.0 200 OK  then more").unwrap();
        assert_eq!(res.phrase, "OK  then more");
    }

    #[test]
    fn test_status_line_too_short() {
        let err = Response::from_start_line("HTTP/1.1 200").unwrap_err();
        assert!(matches!(err, Error::InvalidStatusLine(_)));
    }

    #[test]
    fn test_status_code_range() {
        assert_eq!(parse_status_code("100").unwrap(), 100);
        assert_eq!(parse_status_code("599").unwrap(), 599);
        for bad in ["099", "600", "1000", "abc", "-200", ""] {
            let err = parse_status_code(bad).unwrap_err();
            assert!(matches!(err, Error::InvalidStatusCode(_)), "{:?}", bad);
        }
    }

    #[tokio::test]
    async fn test_request_reader_task() {
        let mock = Builder::new()
            .read(b"GET / HTTP/1.1\r\n")
            .read(b"Host: www.example.com\r\n\r\n")
            .build();
        let mut reader = RequestReader::start(line_reader(mock), CancellationToken::new());

        let (req, _rest) = reader.received().await.unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "/");
        assert_eq!(req.version, "HTTP/1.1");
        assert_eq!(req.headers.get("host"), Some("www.example.com"));
    }

    #[tokio::test]
    async fn test_response_reader_hands_back_body_bytes() {
        let mock = Builder::new()
            .read(b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nFooBar")
            .build();
        let mut reader = ResponseReader::start(line_reader(mock), CancellationToken::new());

        let (res, mut rest) = reader.received().await.unwrap();
        assert_eq!(res.status, 200);
        assert_eq!(res.phrase, "OK");
        assert_eq!(res.headers.get("content-length"), Some("6"));

        let mut body = [0u8; 6];
        rest.read_exact(&mut body).await.unwrap();
        assert_eq!(&body, b"FooBar");
    }

    #[tokio::test]
    async fn test_request_reader_reports_parse_error() {
        let mock = Builder::new().read(b"GET /\r\n").build();
        let mut reader = RequestReader::start(line_reader(mock), CancellationToken::new());
        let err = reader.received().await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequestLine(_)));
    }

    #[tokio::test]
    async fn test_non_utf8_start_line_is_rejected() {
        let mock = Builder::new().read(b"GET /caf\xe9 HTTP/1.1\r\n").build();
        let mut reader = RequestReader::start(line_reader(mock), CancellationToken::new());
        let err = reader.received().await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequestLine(_)));
    }

    #[tokio::test]
    async fn test_response_reader_reports_header_error() {
        let mock = Builder::new().read(b"HTTP/1.1 200 OK\r\nbroken\r\n").build();
        let mut reader = ResponseReader::start(line_reader(mock), CancellationToken::new());
        let err = reader.received().await.unwrap_err();
        assert!(matches!(err, Error::InvalidHeaderFormat(_)));
    }

    #[tokio::test]
    async fn test_cancel_stalled_reader() {
        let (local, _remote) = tokio::io::duplex(64);
        let token = CancellationToken::new();
        let reader: RequestReader<_> =
            MessageReader::start(LineReader::new(BufReader::new(local)), token.clone());

        reader.cancel().await;
        assert!(token.is_cancelled());
    }
}
