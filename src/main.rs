//! Flower Care Prometheus Exporter CLI
//!
//! Serves readings of a single Flower Care device on `/metrics`.

use clap::Parser;
use flowercare_exporter::{
    config::{ConfigError, FileConfig},
    device::GattToolReader,
    metrics::{FlowercareCollector, MetricsRegistry, MetricsServer, MetricsServerConfig},
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Prometheus exporter for Flower Care plant sensors.
#[derive(Debug, Parser)]
#[command(name = "flowercare-exporter", version, about)]
struct Cli {
    /// Address to listen on for connections.
    #[arg(short = 'a', long = "addr")]
    addr: Option<SocketAddr>,

    /// MAC-Address of Flower Care device.
    #[arg(short = 'b', long = "device")]
    device: Option<String>,

    /// Bluetooth device to use for communication.
    #[arg(short = 'i', long = "adapter")]
    adapter: Option<String>,

    /// Interval in seconds during which the results from the Bluetooth device are cached.
    #[arg(short = 'c', long = "cache-duration", value_name = "SECS")]
    cache_duration: Option<u64>,

    /// Optional TOML configuration file; flags take precedence.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn load_config(&self) -> Result<FileConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };

        if let Some(addr) = self.addr {
            config.server.listen_addr = addr;
        }
        if let Some(device) = &self.device {
            config.device.address = device.clone();
        }
        if let Some(adapter) = &self.adapter {
            config.device.adapter = adapter.clone();
        }
        if let Some(secs) = self.cache_duration {
            config.device.cache_duration_secs = secs;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let (file_config, collector_config) =
        match cli.load_config().and_then(|c| c.collector_config().map(|cc| (c, cc))) {
            Ok(configs) => configs,
            Err(e) => {
                error!("Error in configuration: {}", e);
                std::process::exit(1);
            }
        };

    info!("Flowercare Exporter v{}", flowercare_exporter::VERSION);
    info!(
        "Looking for {} via {}",
        collector_config.device_address(),
        collector_config.adapter()
    );

    let collector = match FlowercareCollector::new(collector_config, Arc::new(GattToolReader::new()))
    {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create collector: {}", e);
            std::process::exit(1);
        }
    };

    let registry = match MetricsRegistry::new(collector) {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to register collector: {}", e);
            std::process::exit(1);
        }
    };

    let server = MetricsServer::new(
        MetricsServerConfig {
            bind_addr: file_config.server.listen_addr,
        },
        registry,
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutting down");
    };

    if let Err(e) = server.run(shutdown).await {
        error!("Metrics server failed: {}", e);
        std::process::exit(1);
    }
}
