pub mod miner;
pub mod pool_client;

pub use miner::{mine_range, mine_range_until, Miner};
pub use pool_client::{parse_pool_message, PoolClient, PoolClientConfig, PoolMessage};
