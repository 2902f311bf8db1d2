use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::proxy::ProxyServer;
use crate::Result;

/// Top-level process: runs the proxy until Ctrl+C.
pub struct FwdProxyServer {
    config: Config,
    proxy: Arc<ProxyServer>,
    shutdown: CancellationToken,
}

impl FwdProxyServer {
    pub fn new(config: Config) -> Self {
        let proxy = Arc::new(ProxyServer::new(Arc::new(config.clone())));
        Self {
            config,
            proxy,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the proxy when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(self) -> Result<()> {
        info!("Starting fwdproxy-rs server");
        info!("Proxy listening on: {}", self.config.listen_addr());

        let mut proxy_handle = {
            let proxy = Arc::clone(&self.proxy);
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move { proxy.run(shutdown).await })
        };

        tokio::select! {
            res = &mut proxy_handle => {
                info!("Proxy server shut down");
                return match res {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("Proxy server task failed: {}", e);
                        Ok(())
                    }
                };
            }
            signalled = signal::ctrl_c() => {
                if let Err(e) = signalled {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Received shutdown signal");
            }
            _ = self.shutdown.cancelled() => {}
        }

        info!("Shutting down gracefully");
        self.shutdown.cancel();
        match proxy_handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Proxy server task failed: {}", e);
                Ok(())
            }
        }
    }
}
