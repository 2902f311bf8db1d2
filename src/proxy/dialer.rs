//! Origin connection factory

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::connection::BoxedStream;
use crate::{Error, Result};

/// Opens the connection to an origin server. Injected into every worker so
/// tests can substitute in-memory peers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: &str) -> Result<BoxedStream>;
}

/// Plain TCP dialer.
#[derive(Debug, Clone, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str) -> Result<BoxedStream> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::dial_failed(addr, e))?;
        debug!("connected to {}", addr);
        Ok(Box::new(stream))
    }
}

/// Derive `host:port` from a `Host` header value. The value is kept when the
/// text after its last colon is a positive integer; otherwise
/// `:default_port` is appended.
pub fn append_port_if_needed(host: &str, default_port: u16) -> String {
    match host.rsplit_once(':') {
        Some((_, port)) if port.parse::<u32>().map_or(false, |p| p > 0) => host.to_string(),
        _ => format!("{}:{}", host, default_port),
    }
}
