use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::RoundState;
use crate::payout::{Payout, PayoutReport};
use crate::types::{Address, Amount, BlockId, RoundId, TemplateId};

/// A round that ended with a full proof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round_id: RoundId,
    pub template_id: TemplateId,
    pub block_id: BlockId,
    pub chain_length: u64,
    pub winner: Address,
    pub contributions: BTreeMap<Address, u64>,
    pub total_shares: u64,
    pub payouts: Vec<Payout>,
    pub dust: Amount,
    pub undistributed: Amount,
    pub finalized_at: DateTime<Utc>,
    pub payout_report: Option<PayoutReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub address: Address,
    pub rounds_contributed: u64,
    pub total_shares: u64,
    pub blocks_found: u64,
    pub total_paid: Amount,
    pub failed_payouts: u64,
    pub last_round: Option<RoundId>,
    pub last_seen: DateTime<Utc>,
}

impl WorkerRecord {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            rounds_contributed: 0,
            total_shares: 0,
            blocks_found: 0,
            total_paid: 0,
            failed_payouts: 0,
            last_round: None,
            last_seen: Utc::now(),
        }
    }

    pub fn credit_round(&mut self, round: &RoundRecord, shares: u64) {
        self.rounds_contributed += 1;
        self.total_shares += shares;
        if round.winner == self.address {
            self.blocks_found += 1;
        }
        self.last_round = Some(round.round_id);
        self.last_seen = round.finalized_at;
    }

    pub fn apply_report(&mut self, report: &PayoutReport) {
        self.total_paid += report
            .posted
            .iter()
            .filter(|p| p.address == self.address)
            .map(|p| p.amount)
            .sum::<Amount>();
        self.failed_payouts += report
            .failed
            .iter()
            .filter(|p| p.address == self.address)
            .count() as u64;
    }
}

/// Payout report addresses, deduplicated.
pub fn report_addresses(report: &PayoutReport) -> Vec<Address> {
    let mut addresses: Vec<Address> = report
        .posted
        .iter()
        .map(|p| p.address.clone())
        .chain(report.failed.iter().map(|p| p.address.clone()))
        .collect();
    addresses.sort();
    addresses.dedup();
    addresses
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub pool_name: String,
    pub operator: Address,
    pub current_round: Option<RoundId>,
    pub round_state: Option<RoundState>,
    pub round_shares: u64,
    pub round_workers: usize,
    pub pending_transactions: usize,
    pub connected_workers: usize,
    pub rounds_found: u64,
    pub total_reward: Amount,
    pub operator_cut: Amount,
}
