//! streamkinect-ping
//!
//! Finds control servers, asks each to describe itself and measures the
//! control round trip. With `--watch`, keeps a heartbeat on one server and
//! prints device changes until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sk_client::{ClientSession, DeviceEvent, Discovery, SessionEvent, SessionMonitor};
use sk_core::config::{self, ClientConfig, ConfiguredServer};
use sk_core::ConfiguredDirectory;
use sk_protocol::{EndpointAddress, EndpointKind, ServerDescriptor};

#[derive(Parser)]
#[command(name = "streamkinect-ping")]
#[command(about = "Query streamkinect control servers")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control endpoint to query instead of discovering servers
    #[arg(short, long)]
    endpoint: Option<EndpointAddress>,

    /// Number of pings per server
    #[arg(short = 'n', long, default_value_t = 3)]
    count: u32,

    /// Keep watching the first server for device changes
    #[arg(short, long)]
    watch: bool,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config: ClientConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        config::load_config_or_default(&config::default_client_config_path())?
    };
    config.validate().context("Invalid client configuration")?;

    let servers = match &args.endpoint {
        Some(endpoint) => vec![ConfiguredServer {
            name: endpoint.to_string(),
            endpoint: endpoint.clone(),
        }],
        None => discover(&config).await?,
    };
    if servers.is_empty() {
        bail!("No servers found; pass --endpoint or list servers in the client config");
    }

    if args.watch {
        return watch(&servers[0].endpoint, &config).await;
    }

    for server in &servers {
        if let Err(e) = query(&server.endpoint, &config, args.count).await {
            println!("{}: {}", server.name, e);
        }
    }
    Ok(())
}

async fn discover(config: &ClientConfig) -> Result<Vec<ConfiguredServer>> {
    let directory = Arc::new(ConfiguredDirectory::new(
        config.service_type.clone(),
        &config.servers,
    ));
    let discovery = Discovery::from_config(config, directory);

    let mut servers = Vec::new();
    let mut pass = discovery.discover();
    while let Some(result) = pass.next().await {
        let server = result.context("Discovery failed")?;
        servers.push(ConfiguredServer {
            name: server.name,
            endpoint: server.endpoint,
        });
    }
    Ok(servers)
}

async fn query(endpoint: &EndpointAddress, config: &ClientConfig, count: u32) -> Result<()> {
    let mut session = ClientSession::connect(endpoint, config).await?;
    let descriptor = session.who().await?;
    print_descriptor(&descriptor);

    for _ in 0..count {
        let rtt = session.ping().await?;
        println!("  pong from {} in {:.2} ms", endpoint, rtt.as_secs_f64() * 1000.0);
    }

    session.close().await?;
    Ok(())
}

async fn watch(endpoint: &EndpointAddress, config: &ClientConfig) -> Result<()> {
    let session = ClientSession::connect_with_retry(endpoint, config).await?;
    let (monitor, mut events) = SessionMonitor::spawn(session, config.heartbeat_period);
    println!("Watching {} (Ctrl+C to stop)", endpoint);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(SessionEvent::Device(DeviceEvent::Added(device))) => {
                    println!("+ {} {}", device.id, depth_of(device.endpoint(EndpointKind::Depth)));
                }
                Some(SessionEvent::Device(DeviceEvent::Removed(id))) => {
                    println!("- {}", id);
                }
                Some(SessionEvent::Device(DeviceEvent::EndpointsChanged(device))) => {
                    println!("~ {} {}", device.id, depth_of(device.endpoint(EndpointKind::Depth)));
                }
                Some(SessionEvent::Unusable(version)) => {
                    bail!("{} speaks unsupported descriptor version {}", endpoint, version);
                }
                Some(SessionEvent::Lost(e)) => {
                    bail!("Lost {}: {}", endpoint, e);
                }
                None => break,
            }
        }
    }

    if let Some(session) = monitor.stop().await {
        tokio::time::timeout(Duration::from_secs(1), session.close())
            .await
            .ok();
    }
    Ok(())
}

fn print_descriptor(descriptor: &ServerDescriptor) {
    println!("{} (version {})", descriptor.name, descriptor.version);
    for (name, address) in &descriptor.endpoints {
        println!("  {:<10} {}", name, address);
    }
    for device in &descriptor.devices {
        println!(
            "  device {} {}",
            device.id,
            depth_of(device.endpoint(EndpointKind::Depth))
        );
    }
}

fn depth_of(endpoint: Option<&EndpointAddress>) -> String {
    endpoint
        .map(|e| format!("depth={}", e))
        .unwrap_or_else(|| "(no depth endpoint)".to_string())
}
