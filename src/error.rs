use std::fmt;

use http::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Failed to read line: {0}")]
    ReadError(String),

    #[error("Invalid request line: {0}")]
    InvalidRequestLine(String),

    #[error("Invalid status line: {0}")]
    InvalidStatusLine(String),

    #[error("Invalid status code: {0}")]
    InvalidStatusCode(String),

    #[error("Invalid header format: {0}")]
    InvalidHeaderFormat(String),

    #[error("Failed to read headers: {0}")]
    HeadersReadFailed(String),

    #[error("{0} is not supported")]
    UnsupportedMethod(String),

    #[error("Missing host")]
    MissingHost,

    #[error("Failed to dial {addr}: {reason}")]
    DialFailed { addr: String, reason: String },

    #[error("Unsupported body framing")]
    UnsupportedBodyFraming,

    #[error("Failed to read body: {0}")]
    BodyReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn read_error<T: fmt::Display>(msg: T) -> Self {
        Error::ReadError(msg.to_string())
    }

    pub fn invalid_request_line<T: fmt::Display>(line: T) -> Self {
        Error::InvalidRequestLine(line.to_string())
    }

    pub fn invalid_status_line<T: fmt::Display>(line: T) -> Self {
        Error::InvalidStatusLine(line.to_string())
    }

    pub fn invalid_status_code<T: fmt::Display>(code: T) -> Self {
        Error::InvalidStatusCode(code.to_string())
    }

    pub fn invalid_header_format<T: fmt::Display>(line: T) -> Self {
        Error::InvalidHeaderFormat(line.to_string())
    }

    pub fn headers_read_failed<T: fmt::Display>(msg: T) -> Self {
        Error::HeadersReadFailed(msg.to_string())
    }

    pub fn dial_failed<A: fmt::Display, T: fmt::Display>(addr: A, reason: T) -> Self {
        Error::DialFailed {
            addr: addr.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn body_read_failed<T: fmt::Display>(msg: T) -> Self {
        Error::BodyReadFailed(msg.to_string())
    }

    pub fn write_failed<T: fmt::Display>(msg: T) -> Self {
        Error::WriteFailed(msg.to_string())
    }

    pub fn internal<T: fmt::Display>(msg: T) -> Self {
        Error::Internal(msg.to_string())
    }

    /// Status of the canned response sent to the client when this error ends
    /// the request phase of a worker.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidRequestLine(_)
            | Error::InvalidHeaderFormat(_)
            | Error::UnsupportedMethod(_)
            | Error::MissingHost => StatusCode::BAD_REQUEST,
            Error::DialFailed { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
