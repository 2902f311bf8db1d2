pub mod config;
pub mod connection;
pub mod error;
pub mod proxy;
pub mod server;

pub use config::{Config, WorkerOptions};
pub use error::{Error, Result};
pub use proxy::{ProxyServer, Worker, WorkerState};
pub use server::FwdProxyServer;
