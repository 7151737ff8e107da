//! Per-round share accounting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};
use crate::types::{Address, RoundId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    Open,
    Finalizing,
    Closed,
}

/// Share counts for exactly one round. Owned by the round controller and
/// only mutated from its processing loop.
#[derive(Debug)]
pub struct ContributionLedger {
    round_id: RoundId,
    state: RoundState,
    counts: BTreeMap<Address, u64>,
    total: u64,
}

/// Frozen tally handed to the reward distributor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub round_id: RoundId,
    pub contributions: BTreeMap<Address, u64>,
    pub total_shares: u64,
}

impl ContributionLedger {
    /// Empty ledger for a freshly opened round.
    pub fn open(round_id: RoundId) -> Self {
        Self {
            round_id,
            state: RoundState::Open,
            counts: BTreeMap::new(),
            total: 0,
        }
    }

    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    /// Credits one share and returns the worker's new count.
    pub fn record_share(&mut self, worker: &Address) -> Result<u64> {
        if self.state != RoundState::Open {
            return Err(PoolError::RoundClosed(self.round_id));
        }
        let count = self.counts.entry(worker.clone()).or_insert(0);
        *count += 1;
        self.total += 1;
        Ok(*count)
    }

    /// Locks the ledger. No share is recorded after this.
    pub fn begin_finalizing(&mut self) -> Result<()> {
        if self.state != RoundState::Open {
            return Err(PoolError::RoundClosed(self.round_id));
        }
        self.state = RoundState::Finalizing;
        Ok(())
    }

    pub fn snapshot(&self) -> Result<LedgerSnapshot> {
        if self.state != RoundState::Finalizing {
            return Err(PoolError::RoundNotFinalizing(self.round_id));
        }
        Ok(LedgerSnapshot {
            round_id: self.round_id,
            contributions: self.counts.clone(),
            total_shares: self.total,
        })
    }

    pub fn close(&mut self) {
        self.state = RoundState::Closed;
    }

    pub fn shares_of(&self, worker: &Address) -> u64 {
        self.counts.get(worker).copied().unwrap_or(0)
    }

    pub fn total_shares(&self) -> u64 {
        self.total
    }

    pub fn workers(&self) -> usize {
        self.counts.len()
    }
}

impl LedgerSnapshot {
    pub fn empty(round_id: RoundId) -> Self {
        Self {
            round_id,
            contributions: BTreeMap::new(),
            total_shares: 0,
        }
    }
}
