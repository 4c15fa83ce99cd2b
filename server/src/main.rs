use clap::Parser;
use log::{error, info};
use server::config::{Heuristic, ServerConfig};
use server::hub::{Hub, HubRequest};
use server::network::serve;
use server::username::UsernameGate;
use server::world::MapData;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Map document with obstacles, items and guards
    #[clap(short, long, default_value = "mapData.json")]
    map: PathBuf,
    /// Maximum number of concurrent clients
    #[clap(long, default_value = "64")]
    max_clients: usize,
    /// Messages buffered per client before the oldest ones are dropped
    #[clap(
        long,
        default_value = "256",
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    outbound_capacity: usize,
    /// Guard think interval in milliseconds
    #[clap(long, default_value = "200", value_parser = clap::value_parser!(u64).range(1..))]
    think_ms: u64,
    /// Seconds without a successful plan before a guard is teleported home
    #[clap(long, default_value = "60")]
    teleport_after: u64,
    /// Distance estimate used by the guard planner
    #[clap(long, value_enum, default_value = "euclidean")]
    heuristic: Heuristic,
    /// Skip the username moderation service
    #[clap(long)]
    no_profanity_check: bool,
    /// Override the username moderation endpoint
    #[clap(long)]
    moderation_endpoint: Option<String>,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.hub.map_path = self.map;
        config.hub.max_clients = self.max_clients;
        config.hub.outbound_capacity = self.outbound_capacity;
        config.hub.think_interval = Duration::from_millis(self.think_ms);
        config.guard.teleport_after = Duration::from_secs(self.teleport_after);
        config.planner.heuristic = self.heuristic;
        if self.no_profanity_check {
            config.username.moderation_endpoint = None;
        } else if let Some(endpoint) = self.moderation_endpoint {
            config.username.moderation_endpoint = Some(endpoint);
        }
        config
    }
}

/// Parses command-line arguments, loads the map, then runs the hub and the
/// WebSocket listener until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);
    let config = args.into_config();

    let map = MapData::load_or_empty(&config.hub.map_path);
    let hub = Hub::new(&map, &config);
    let gate = UsernameGate::new(&config.username);

    // Create bounded mailbox for hub requests
    let (mailbox, requests) = mpsc::channel::<HubRequest>(config.hub.mailbox_capacity);
    let hub_handle = tokio::spawn(hub.clone().run(requests));

    let listener = TcpListener::bind(&address).await?;
    let server_handle = tokio::spawn(serve(listener, hub, mailbox, gate));

    // Handle shutdown gracefully
    tokio::select! {
        result = server_handle => {
            if let Err(e) = result {
                error!("Network task panicked: {}", e);
            }
        }
        result = hub_handle => {
            if let Err(e) = result {
                error!("Hub task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
