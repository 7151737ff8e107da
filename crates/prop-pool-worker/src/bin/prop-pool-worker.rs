use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use prop_pool_coordinator::shares::Sha256Proof;
use prop_pool_coordinator::types::Address;
use prop_pool_worker::{Miner, PoolClient, PoolClientConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[clap(name = "prop-pool-worker")]
#[clap(about = "Worker for a proportional-reward mining pool", long_about = None)]
struct Args {
    /// Websocket URL of the pool coordinator
    #[clap(long, env = "POOL_URL", default_value = "ws://127.0.0.1:8080/")]
    pool_url: String,

    /// Address credited for this worker's shares
    #[clap(long, env = "WORKER_ADDRESS")]
    worker_address: String,

    /// Nonces tried per batch before checking for a new round
    #[clap(long, env = "WORKER_BATCH_SIZE", default_value = "65536")]
    batch_size: u64,

    /// Seconds to wait before reconnecting
    #[clap(long, default_value = "5")]
    reconnect_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let worker_address = Address::new(args.worker_address);
    if !worker_address.is_well_formed() {
        anyhow::bail!("malformed worker address {:?}", worker_address.as_str());
    }

    info!("Starting worker {} for {}", worker_address, args.pool_url);

    let mut config = PoolClientConfig::new(args.pool_url, worker_address);
    config.reconnect_delay = Duration::from_secs(args.reconnect_secs);

    let proof = Arc::new(Sha256Proof);
    let client = PoolClient::connect(config, proof.clone());
    let miner = Miner::new(client, proof).with_batch_size(args.batch_size);

    tokio::select! {
        res = miner.run() => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            Ok(())
        }
    }
}
