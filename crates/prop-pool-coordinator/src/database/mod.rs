pub mod memory_store;
pub mod redis_store;
pub mod schema;

use async_trait::async_trait;

use crate::error::Result;
use crate::payout::PayoutReport;
use crate::types::{Address, RoundId};

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
pub use schema::{PoolStats, RoundRecord, WorkerRecord};

/// History of finalized rounds and per-worker totals.
#[async_trait]
pub trait RoundStore: Send + Sync {
    /// Saves a finalized round and credits every contributor.
    async fn save_round(&self, record: &RoundRecord) -> Result<()>;

    async fn get_round(&self, round_id: RoundId) -> Result<Option<RoundRecord>>;

    /// Newest first.
    async fn recent_rounds(&self, limit: usize) -> Result<Vec<RoundRecord>>;

    /// Attaches the emission outcome to its round and updates paid totals.
    async fn record_payout_report(&self, report: &PayoutReport) -> Result<()>;

    async fn get_worker(&self, address: &Address) -> Result<Option<WorkerRecord>>;

    async fn rounds_found(&self) -> Result<u64>;
}
