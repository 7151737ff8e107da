use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::schema::{report_addresses, RoundRecord, WorkerRecord};
use super::RoundStore;
use crate::error::Result;
use crate::payout::PayoutReport;
use crate::types::{Address, RoundId};

#[derive(Default)]
struct MemoryState {
    rounds: BTreeMap<RoundId, RoundRecord>,
    workers: HashMap<Address, WorkerRecord>,
}

/// Process-local store used when no Redis URL is configured.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoundStore for MemoryStore {
    async fn save_round(&self, record: &RoundRecord) -> Result<()> {
        let mut state = self.state.write().await;
        for (address, shares) in &record.contributions {
            state
                .workers
                .entry(address.clone())
                .or_insert_with(|| WorkerRecord::new(address.clone()))
                .credit_round(record, *shares);
        }
        state.rounds.insert(record.round_id, record.clone());
        debug!("Stored round {}", record.round_id);
        Ok(())
    }

    async fn get_round(&self, round_id: RoundId) -> Result<Option<RoundRecord>> {
        Ok(self.state.read().await.rounds.get(&round_id).cloned())
    }

    async fn recent_rounds(&self, limit: usize) -> Result<Vec<RoundRecord>> {
        Ok(self
            .state
            .read()
            .await
            .rounds
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn record_payout_report(&self, report: &PayoutReport) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(round) = state.rounds.get_mut(&report.round_id) {
            round.payout_report = Some(report.clone());
        }
        for address in report_addresses(report) {
            if let Some(worker) = state.workers.get_mut(&address) {
                worker.apply_report(report);
            }
        }
        Ok(())
    }

    async fn get_worker(&self, address: &Address) -> Result<Option<WorkerRecord>> {
        Ok(self.state.read().await.workers.get(address).cloned())
    }

    async fn rounds_found(&self) -> Result<u64> {
        Ok(self.state.read().await.rounds.len() as u64)
    }
}
