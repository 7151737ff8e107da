//! Interface to the underlying blockchain, plus an in-memory chain used by the
//! standalone binary and the tests.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{PoolError, Result};
use crate::shares::ProofFunction;
use crate::types::{
    Address, BlockId, BlockReference, BlockTemplate, Hash256, Target, Transaction, TxId,
};

/// Chain-specific block checks that do not depend on pool state.
pub trait StructureCheck: Send + Sync {
    fn validate_block_structure(&self, block: &BlockTemplate) -> bool;
}

#[async_trait]
pub trait ChainBackend: StructureCheck {
    async fn current_head(&self) -> BlockReference;

    async fn build_template(
        &self,
        head: BlockReference,
        reward_address: &Address,
        transactions: Vec<Transaction>,
    ) -> BlockTemplate;

    async fn full_difficulty_threshold(&self) -> Target;

    async fn submit_transaction(&self, tx: Transaction) -> Result<TxId>;

    /// Publishes a solved block.
    async fn announce_block(&self, block: BlockTemplate) -> Result<()>;
}

pub fn block_id(block: &BlockTemplate, nonce: u64) -> BlockId {
    let mut hasher = Sha256::new();
    hasher.update(block.template_id().as_bytes());
    hasher.update(nonce.to_le_bytes());
    Hash256(hasher.finalize().into())
}

struct LocalChainState {
    head: BlockReference,
    blocks: Vec<BlockTemplate>,
    mempool: Vec<Transaction>,
}

pub const DEFAULT_MAX_BLOCK_TRANSACTIONS: usize = 1000;

pub struct LocalChain {
    proof: Arc<dyn ProofFunction>,
    full_target: Target,
    max_transactions: usize,
    state: RwLock<LocalChainState>,
}

impl LocalChain {
    pub fn new(proof: Arc<dyn ProofFunction>, full_target: Target) -> Self {
        Self {
            proof,
            full_target,
            max_transactions: DEFAULT_MAX_BLOCK_TRANSACTIONS,
            state: RwLock::new(LocalChainState {
                head: BlockReference {
                    id: Hash256::ZERO,
                    chain_length: 0,
                },
                blocks: Vec::new(),
                mempool: Vec::new(),
            }),
        }
    }

    pub fn with_max_transactions(mut self, max_transactions: usize) -> Self {
        self.max_transactions = max_transactions;
        self
    }

    pub async fn blocks(&self) -> Vec<BlockTemplate> {
        self.state.read().await.blocks.clone()
    }

    /// Submitted transactions not yet confirmed by an announced block.
    pub async fn submitted_transactions(&self) -> Vec<Transaction> {
        self.state.read().await.mempool.clone()
    }
}

impl StructureCheck for LocalChain {
    fn validate_block_structure(&self, block: &BlockTemplate) -> bool {
        let mut seen = HashSet::new();
        block.chain_length > 0
            && block.transactions.len() <= self.max_transactions
            && block.reward_address.is_well_formed()
            && block
                .transactions
                .iter()
                .all(|tx| tx.validate().is_ok() && seen.insert(tx.id()))
    }
}

#[async_trait]
impl ChainBackend for LocalChain {
    async fn current_head(&self) -> BlockReference {
        self.state.read().await.head
    }

    async fn build_template(
        &self,
        head: BlockReference,
        reward_address: &Address,
        transactions: Vec<Transaction>,
    ) -> BlockTemplate {
        BlockTemplate {
            previous_block_id: head.id,
            chain_length: head.chain_length + 1,
            reward_address: reward_address.clone(),
            transactions,
            proof: None,
        }
    }

    async fn full_difficulty_threshold(&self) -> Target {
        self.full_target
    }

    async fn submit_transaction(&self, tx: Transaction) -> Result<TxId> {
        tx.validate().map_err(|e| PoolError::Chain(e.to_string()))?;
        let id = tx.id();
        self.state.write().await.mempool.push(tx);
        debug!("Accepted transaction {} into mempool", id);
        Ok(id)
    }

    async fn announce_block(&self, block: BlockTemplate) -> Result<()> {
        let nonce = block
            .proof
            .ok_or_else(|| PoolError::Chain("block has no proof".to_string()))?;
        if !self
            .full_target
            .is_met_by(&self.proof.proof_hash(&block.template_id(), nonce))
        {
            return Err(PoolError::Chain("proof misses full target".to_string()));
        }

        let mut state = self.state.write().await;
        if block.previous_block_id != state.head.id
            || block.chain_length != state.head.chain_length + 1
        {
            return Err(PoolError::Chain(format!(
                "block {} does not extend head at length {}",
                block.chain_length, state.head.chain_length
            )));
        }

        state.head = BlockReference {
            id: block_id(&block, nonce),
            chain_length: block.chain_length,
        };
        info!("Chain head advanced to {} ({})", state.head.chain_length, state.head.id);
        let confirmed: HashSet<TxId> = block.transactions.iter().map(Transaction::id).collect();
        state.mempool.retain(|tx| !confirmed.contains(&tx.id()));
        state.blocks.push(block);
        Ok(())
    }
}
