//! Fixtures shared by the unit tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::chain::{ChainBackend, LocalChain, StructureCheck};
use crate::coordinator::PoolConfig;
use crate::error::{PoolError, Result};
use crate::payout::RewardConfig;
use crate::shares::{ProofFunction, RoundTemplate};
use crate::types::{
    Address, BlockReference, BlockTemplate, Hash256, RoundId, Target, TemplateId, Transaction,
    TxId,
};

pub const SHARE_BITS: u32 = 8;
pub const FULL_BITS: u32 = 24;

/// Nonces whose proof hash misses the share target.
pub const MISS_NONCE: u64 = u64::MAX;

/// Uses the nonce itself as the top of the proof hash so tests can pick
/// shares and full proofs without searching.
pub struct NonceProof;

impl ProofFunction for NonceProof {
    fn proof_hash(&self, _template_id: &TemplateId, nonce: u64) -> Hash256 {
        let mut bytes = [0xffu8; 32];
        bytes[..8].copy_from_slice(&nonce.to_be_bytes());
        Hash256(bytes)
    }
}

/// Meets the share target but not the full one.
pub fn share_nonce(n: u64) -> u64 {
    0x00ff_0000_0000_0000 + n
}

/// Meets the full target.
pub fn full_nonce(n: u64) -> u64 {
    1 + n
}

pub fn sample_tx(n: u64) -> Transaction {
    Transaction {
        from: Address::new("client"),
        nonce: n,
        recipient: Address::new("merchant"),
        amount: 10 + n,
        fee: 1,
    }
}

pub fn local_chain() -> LocalChain {
    LocalChain::new(Arc::new(NonceProof), Target::from_leading_zero_bits(FULL_BITS))
}

pub fn sample_round(round_id: RoundId) -> RoundTemplate {
    let block = BlockTemplate {
        previous_block_id: Hash256([7; 32]),
        chain_length: round_id.0,
        reward_address: Address::new("operator"),
        transactions: vec![sample_tx(1), sample_tx(2)],
        proof: None,
    };
    RoundTemplate {
        round_id,
        template_id: block.template_id(),
        block,
        share_target: Target::from_leading_zero_bits(SHARE_BITS),
        target: Target::from_leading_zero_bits(FULL_BITS),
    }
}

pub fn test_config() -> PoolConfig {
    PoolConfig {
        pool_name: "test pool".to_string(),
        operator_address: Address::new("operator"),
        rewards: RewardConfig {
            total_reward: 25,
            operator_cut: 5,
        },
        share_target: Target::from_leading_zero_bits(SHARE_BITS),
        ..PoolConfig::default()
    }
}

/// Local chain that refuses transactions to one recipient.
pub struct RefusingChain {
    pub inner: LocalChain,
    pub refuse: Address,
}

impl RefusingChain {
    pub fn new(refuse: &str) -> Self {
        Self {
            inner: local_chain(),
            refuse: Address::new(refuse),
        }
    }
}

impl StructureCheck for RefusingChain {
    fn validate_block_structure(&self, block: &BlockTemplate) -> bool {
        self.inner.validate_block_structure(block)
    }
}

#[async_trait]
impl ChainBackend for RefusingChain {
    async fn current_head(&self) -> BlockReference {
        self.inner.current_head().await
    }

    async fn build_template(
        &self,
        head: BlockReference,
        reward_address: &Address,
        transactions: Vec<Transaction>,
    ) -> BlockTemplate {
        self.inner.build_template(head, reward_address, transactions).await
    }

    async fn full_difficulty_threshold(&self) -> Target {
        self.inner.full_difficulty_threshold().await
    }

    async fn submit_transaction(&self, tx: Transaction) -> Result<TxId> {
        if tx.recipient == self.refuse {
            return Err(PoolError::Chain("mempool full".to_string()));
        }
        self.inner.submit_transaction(tx).await
    }

    async fn announce_block(&self, block: BlockTemplate) -> Result<()> {
        self.inner.announce_block(block).await
    }
}

/// Local chain whose full target can be moved between rounds.
pub struct RetargetingChain {
    pub inner: LocalChain,
    full_bits: AtomicU32,
}

impl RetargetingChain {
    pub fn new() -> Self {
        Self {
            inner: local_chain(),
            full_bits: AtomicU32::new(FULL_BITS),
        }
    }

    pub fn retarget(&self, bits: u32) {
        self.full_bits.store(bits, Ordering::SeqCst);
    }
}

impl StructureCheck for RetargetingChain {
    fn validate_block_structure(&self, block: &BlockTemplate) -> bool {
        self.inner.validate_block_structure(block)
    }
}

#[async_trait]
impl ChainBackend for RetargetingChain {
    async fn current_head(&self) -> BlockReference {
        self.inner.current_head().await
    }

    async fn build_template(
        &self,
        head: BlockReference,
        reward_address: &Address,
        transactions: Vec<Transaction>,
    ) -> BlockTemplate {
        self.inner.build_template(head, reward_address, transactions).await
    }

    async fn full_difficulty_threshold(&self) -> Target {
        Target::from_leading_zero_bits(self.full_bits.load(Ordering::SeqCst))
    }

    async fn submit_transaction(&self, tx: Transaction) -> Result<TxId> {
        self.inner.submit_transaction(tx).await
    }

    async fn announce_block(&self, block: BlockTemplate) -> Result<()> {
        self.inner.announce_block(block).await
    }
}
