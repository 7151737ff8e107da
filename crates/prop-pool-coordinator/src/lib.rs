pub mod chain;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod payout;
pub mod queue;
pub mod shares;
pub mod stratum;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use chain::{ChainBackend, LocalChain, StructureCheck};
pub use coordinator::{PoolConfig, PoolEvent, PoolHandle, RoundController, RoundStatus};
pub use error::{PoolError, Result};
pub use shares::{ProofFunction, RoundTemplate, Sha256Proof, ShareOutcome, ShareSubmission, ShareValidator};
