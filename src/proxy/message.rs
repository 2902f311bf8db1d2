//! Request and response heads as seen by the proxy

use http::StatusCode;

use crate::proxy::headers::HeaderMap;
use crate::Error;

/// A parsed request head. The target is kept exactly as the client sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: HeaderMap,
}

impl Request {
    /// Serialise the request line and header block.
    pub fn encode_head(&self) -> Vec<u8> {
        let mut buf = format!("{} {} {}\r\n", self.method, self.target, self.version).into_bytes();
        self.headers.write_to(&mut buf);
        buf
    }
}

/// A parsed response head.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub version: String,
    pub status: u16,
    pub phrase: String,
    pub headers: HeaderMap,
}

impl Response {
    /// Canned response with an empty header set, used when the proxy has to
    /// answer the client itself.
    pub fn canned(status: StatusCode) -> Self {
        Self {
            version: "HTTP/1.1".to_string(),
            status: status.as_u16(),
            phrase: status.canonical_reason().unwrap_or("Unknown").to_string(),
            headers: HeaderMap::new(),
        }
    }

    /// Canned response for an error that ended the request phase.
    pub fn for_error(error: &Error) -> Self {
        Self::canned(error.status_code())
    }

    pub fn internal_server_error() -> Self {
        Self::canned(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Serialise the status line and header block.
    pub fn encode_head(&self) -> Vec<u8> {
        let mut buf = format!("{} {} {}\r\n", self.version, self.status, self.phrase).into_bytes();
        self.headers.write_to(&mut buf);
        buf
    }

    /// Whether a body follows this head at all, given the request method.
    /// HEAD responses and 1xx, 204 and 304 statuses never carry one.
    pub fn has_body(&self, request_method: &str) -> bool {
        if request_method.eq_ignore_ascii_case("HEAD") {
            return false;
        }
        !matches!(self.status, 100..=199 | 204 | 304)
    }
}
