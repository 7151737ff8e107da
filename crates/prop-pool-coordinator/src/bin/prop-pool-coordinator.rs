use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prop_pool_coordinator::{
    chain::LocalChain,
    coordinator::{PoolConfig, RoundController},
    database::{MemoryStore, RedisStore, RoundStore},
    metrics::{metrics_handler, register_metrics},
    payout::RewardConfig,
    shares::Sha256Proof,
    stratum::{ConnectionRegistry, StratumServer},
    types::{Address, Target},
};

#[derive(Parser, Debug)]
#[clap(name = "prop-pool-coordinator")]
#[clap(about = "Proportional-reward mining pool coordinator", long_about = None)]
struct Args {
    /// Address that receives the operator cut and block rewards
    #[clap(long, env = "POOL_OPERATOR_ADDRESS", default_value = "pool-operator")]
    operator_address: String,

    /// Pool name
    #[clap(long, env = "POOL_NAME", default_value = "PROP Mining Pool")]
    pool_name: String,

    /// Reward paid out per found block, in base units
    #[clap(long, env = "POOL_TOTAL_REWARD", default_value = "25000000")]
    total_reward: u64,

    /// Operator share of each block reward, in base units
    #[clap(long, env = "POOL_OPERATOR_CUT", default_value = "5000000")]
    operator_cut: u64,

    /// Leading zero bits a share proof needs
    #[clap(long, env = "POOL_SHARE_BITS", default_value = "12")]
    share_bits: u32,

    /// Leading zero bits a full block proof needs on the local chain
    #[clap(long, env = "POOL_FULL_BITS", default_value = "20")]
    full_bits: u32,

    /// Redis URL for round history. In-memory when unset.
    #[clap(long, env = "POOL_REDIS_URL")]
    redis_url: Option<String>,

    /// HTTP and websocket bind address
    #[clap(long, env = "POOL_HTTP_BIND", default_value = "0.0.0.0:8080")]
    http_bind: SocketAddr,
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

    info!("Starting {} coordinator", args.pool_name);
    info!(
        "Operator {}, reward {}, operator cut {}",
        args.operator_address, args.total_reward, args.operator_cut
    );

    register_metrics().context("registering metrics")?;

    let config = PoolConfig {
        pool_name: args.pool_name.clone(),
        operator_address: Address::new(args.operator_address),
        rewards: RewardConfig {
            total_reward: args.total_reward,
            operator_cut: args.operator_cut,
        },
        share_target: Target::from_leading_zero_bits(args.share_bits),
        ..PoolConfig::default()
    };

    let store: Arc<dyn RoundStore> = match &args.redis_url {
        Some(url) => {
            info!("Redis URL: {}", url);
            Arc::new(RedisStore::new(url).await.context("connecting to redis")?)
        }
        None => {
            warn!("No redis URL given, round history is kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let proof = Arc::new(Sha256Proof);
    let chain = Arc::new(LocalChain::new(
        proof.clone(),
        Target::from_leading_zero_bits(args.full_bits),
    ));
    let registry = ConnectionRegistry::new();

    let controller = RoundController::new(
        chain,
        proof,
        Arc::new(registry.clone()),
        store.clone(),
        config.clone(),
    )
    .await
    .context("creating round controller")?;
    let (handle, controller_task) = controller.spawn().await?;

    let server = StratumServer::new(handle.clone(), registry, store, &config);
    let router = axum::Router::new()
        .merge(server.router())
        .route("/metrics", axum::routing::get(|| async { metrics_handler() }));

    let listener = tokio::net::TcpListener::bind(args.http_bind)
        .await
        .with_context(|| format!("binding {}", args.http_bind))?;
    info!("Websocket and HTTP API listening on {}", args.http_bind);

    let http_server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    );

    tokio::select! {
        res = http_server => {
            if let Err(e) = res {
                error!("HTTP server error: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    if let Err(e) = handle.shutdown().await {
        warn!("Round controller already stopped: {}", e);
    }
    controller_task.await.context("joining round controller")?;

    info!("Pool coordinator shutting down");
    Ok(())
}
