use clap::Parser;
use fwdproxy_rs::{config::Config, server::FwdProxyServer, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fwdproxy-rs")]
#[command(about = "A minimal forward HTTP/1.1 proxy")]
struct Cli {
    #[arg(long)]
    listen_host: Option<String>,

    #[arg(short = 'p', long)]
    listen_port: Option<u16>,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting fwdproxy-rs");

    let mut config = if let Some(config_path) = cli.config {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };
    if let Some(listen_host) = cli.listen_host {
        config.listen_host = listen_host;
    }
    if let Some(listen_port) = cli.listen_port {
        config.listen_port = listen_port;
    }

    FwdProxyServer::new(config).run().await
}
