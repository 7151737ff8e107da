use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use prop_pool_coordinator::shares::{ProofFunction, RoundTemplate, ShareClass};
use tracing::{debug, info, warn};

use crate::pool_client::PoolClient;

pub const DEFAULT_BATCH_SIZE: u64 = 1 << 16;

/// Nonces in `[start, start + count)` (wrapping) whose proof meets the
/// round's share target.
pub fn mine_range(
    proof: &dyn ProofFunction,
    template: &RoundTemplate,
    start: u64,
    count: u64,
) -> Vec<u64> {
    mine_range_until(proof, template, start, count, &AtomicBool::new(false))
}

/// Like [`mine_range`], but stops early once `cancel` is set and returns
/// whatever was found so far.
pub fn mine_range_until(
    proof: &dyn ProofFunction,
    template: &RoundTemplate,
    start: u64,
    count: u64,
    cancel: &AtomicBool,
) -> Vec<u64> {
    let mut found = Vec::new();
    let mut nonce = start;
    for _ in 0..count {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let hash = proof.proof_hash(&template.template_id, nonce);
        if template.share_target.is_met_by(&hash) {
            found.push(nonce);
        }
        nonce = nonce.wrapping_add(1);
    }
    found
}

/// Searches the latest template in batches and submits every share it
/// finds. A new template from the pool abandons the current batch.
pub struct Miner {
    client: PoolClient,
    proof: Arc<dyn ProofFunction>,
    batch_size: u64,
}

impl Miner {
    pub fn new(client: PoolClient, proof: Arc<dyn ProofFunction>) -> Self {
        Self {
            client,
            proof,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let mut template = Arc::new(self.client.recv_template().await?);
        let mut next_nonce: u64 = rand::random();
        info!("Mining round {}", template.round_id);

        loop {
            let cancel = Arc::new(AtomicBool::new(false));
            let batch = {
                let proof = self.proof.clone();
                let template = template.clone();
                let cancel = cancel.clone();
                let (start, count) = (next_nonce, self.batch_size);
                tokio::task::spawn_blocking(move || {
                    mine_range_until(proof.as_ref(), &template, start, count, &cancel)
                })
            };

            tokio::select! {
                newer = self.client.recv_template() => {
                    cancel.store(true, Ordering::Relaxed);
                    template = Arc::new(newer?);
                    next_nonce = rand::random();
                    info!("Switching to round {}", template.round_id);
                }
                found = batch => {
                    for nonce in found? {
                        match self.client.submit_candidate(&template, nonce).await? {
                            ShareClass::FullProof => info!("Found full proof {} for round {}", nonce, template.round_id),
                            ShareClass::Share => debug!("Submitted share {}", nonce),
                            ShareClass::Rejected(reason) => warn!("Self-check rejected {}: {}", nonce, reason),
                        }
                    }
                    next_nonce = next_nonce.wrapping_add(self.batch_size);
                }
            }
        }
    }
}
