//! Forward HTTP/1.1 proxy engine
//!
//! One [`Worker`] per client connection drives a request/response exchange
//! through a small state machine. Parsing of message heads and decoding of
//! bodies run as cancellable sub-tasks that report back to the worker.

pub mod body;
pub mod dialer;
pub mod headers;
pub mod message;
pub mod parser;
pub mod reader;
pub mod server;
pub mod worker;

pub use body::{BodyFraming, BodyReader, BodyTransfer};
pub use dialer::{Dialer, TcpDialer};
pub use headers::HeaderMap;
pub use message::{Request, Response};
pub use parser::{MessageReader, RequestReader, ResponseReader};
pub use reader::LineReader;
pub use server::ProxyServer;
pub use worker::{Worker, WorkerHandle, WorkerReport, WorkerState};
