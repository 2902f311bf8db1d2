//! Listener that hands each accepted client connection to its own worker

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::proxy::dialer::{Dialer, TcpDialer};
use crate::proxy::worker::Worker;
use crate::Result;

pub struct ProxyServer {
    config: Arc<Config>,
    dialer: Arc<dyn Dialer>,
}

impl ProxyServer {
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_dialer(config, Arc::new(TcpDialer))
    }

    pub fn with_dialer(config: Arc<Config>, dialer: Arc<dyn Dialer>) -> Self {
        Self { config, dialer }
    }

    /// Bind the configured address and serve until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!("Proxy server listening on {}", listener.local_addr()?);
        self.serve(listener, shutdown).await
    }

    /// Accept loop over an already bound listener. Each worker gets a child
    /// of `shutdown`; cancelling it stops accepting and waits for every
    /// worker to reach `Finished`.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let mut workers = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Proxy server shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("New connection from {}", peer);
                        self.spawn_worker(&mut workers, stream, peer, shutdown.child_token());
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                    }
                },
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = joined {
                        error!("Worker task failed: {}", e);
                    }
                }
            }
        }

        drop(listener);
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Worker task failed: {}", e);
            }
        }
        Ok(())
    }

    fn spawn_worker(
        &self,
        workers: &mut JoinSet<()>,
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
        token: CancellationToken,
    ) {
        let worker = Worker::new(Arc::clone(&self.dialer), self.config.worker_options())
            .with_cancellation(token);
        workers.spawn(async move {
            let report = worker.run(Box::new(stream), peer.to_string()).await;
            debug!("worker {} went through {:?}", report.id, report.states);
        });
    }
}
