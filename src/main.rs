use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use keymaster::api::AppState;
use keymaster::config::Config;
use keymaster::distribution::DistributionEngine;
use keymaster::http_server::HttpServer;
use keymaster::metrics::KdcMetrics;
use keymaster::server::DnsServer;
use keymaster::storage::Storage;

#[derive(Parser, Debug)]
#[command(name = "keymaster", about = "DNSSEC key distribution center")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "keymaster.toml")]
    config: String,

    /// Override the DNS bind address
    #[arg(long)]
    dns_bind: Option<SocketAddr>,

    /// Override the control API bind address
    #[arg(long)]
    http_bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut config = if std::path::Path::new(&args.config).exists() {
        match Config::load(&args.config) {
            Ok(config) => config,
            Err(e) => {
                error!("failed to load {}: {}", args.config, e);
                std::process::exit(1);
            }
        }
    } else {
        warn!("config file {} not found, using defaults", args.config);
        Config::default()
    };
    if let Some(dns_bind) = args.dns_bind {
        config.server.dns_bind = dns_bind;
    }
    if let Some(http_bind) = args.http_bind {
        config.server.http_bind = http_bind;
    }
    if let Err(e) = config.validate() {
        error!("invalid configuration: {}", e);
        std::process::exit(1);
    }
    let config = Arc::new(config);

    let storage = match Storage::connect(&config.database).await {
        Ok(storage) => storage,
        Err(e) => {
            error!("storage initialization failed: {}", e);
            std::process::exit(1);
        }
    };

    let metrics = Arc::new(KdcMetrics::new().expect("metrics registry"));
    let engine = Arc::new(DistributionEngine::new(
        storage.clone(),
        config.clone(),
        metrics.clone(),
    ));

    info!(
        "keymaster starting, control zone {}",
        config.kdc.control_zone
    );

    // DNS plane: UDP and TCP on the same address.
    let udp_socket = match UdpSocket::bind(config.server.dns_bind).await {
        Ok(socket) => Arc::new(socket),
        Err(e) => {
            error!("cannot bind DNS/UDP on {}: {}", config.server.dns_bind, e);
            std::process::exit(1);
        }
    };
    let tcp_listener = match TcpListener::bind(config.server.dns_bind).await {
        Ok(listener) => Arc::new(listener),
        Err(e) => {
            error!("cannot bind DNS/TCP on {}: {}", config.server.dns_bind, e);
            std::process::exit(1);
        }
    };

    let dns_server = Arc::new(DnsServer::new(
        storage.clone(),
        engine.clone(),
        config.clone(),
        metrics.clone(),
    ));
    tokio::spawn({
        let server = dns_server.clone();
        async move {
            if let Err(e) = server.run_udp(udp_socket).await {
                error!("DNS/UDP server exited: {}", e);
            }
        }
    });
    tokio::spawn({
        let server = dns_server.clone();
        async move {
            if let Err(e) = server.run_tcp(tcp_listener).await {
                error!("DNS/TCP server exited: {}", e);
            }
        }
    });

    // Lifecycle sweeper: publish/retire holds and completion checks.
    tokio::spawn({
        let engine = engine.clone();
        async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                if let Err(e) = engine.lifecycle_sweep().await {
                    warn!("lifecycle sweep failed: {}", e);
                }
            }
        }
    });

    let state = AppState {
        storage,
        engine,
        config: config.clone(),
        metrics,
    };
    if let Err(e) = HttpServer::new(state, config.server.http_bind).start().await {
        error!("control API server failed: {}", e);
        std::process::exit(1);
    }
}
