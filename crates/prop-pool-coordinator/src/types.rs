//! Chain-facing value types shared by every pool component.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PoolError, Result};

/// Base units in one coin. All amounts are integer base units.
pub const UNITS_PER_COIN: u64 = 1_000_000;

const MAX_ADDRESS_LEN: usize = 128;

pub type Amount = u64;

/// Wallet address of a worker, the operator or a transaction party.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Non-empty printable ASCII without whitespace, at most 128 bytes.
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= MAX_ADDRESS_LEN
            && self.0.bytes().all(|b| b.is_ascii_graphic())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub u64);

impl RoundId {
    pub fn next(self) -> Self {
        RoundId(self.0 + 1)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

mod hex32 {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let decoded = hex::decode(&encoded).map_err(D::Error::custom)?;
        decoded
            .try_into()
            .map_err(|_| D::Error::custom("expected 32 bytes"))
    }
}

/// SHA-256 digest, hex encoded on the wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Hash256(#[serde(with = "hex32")] pub [u8; 32]);

pub type TxId = Hash256;
pub type TemplateId = Hash256;
pub type BlockId = Hash256;

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", hex::encode(&self.0[..8]))
    }
}

/// 256-bit big-endian difficulty threshold. A proof hash meets the target
/// when it is numerically less than or equal to it.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target(#[serde(with = "hex32")] pub [u8; 32]);

impl Target {
    pub fn from_leading_zero_bits(bits: u32) -> Self {
        let bits = bits.min(256) as usize;
        let mut bytes = [0xffu8; 32];
        for byte in bytes.iter_mut().take(bits / 8) {
            *byte = 0;
        }
        if bits < 256 && bits % 8 != 0 {
            bytes[bits / 8] = 0xff >> (bits % 8);
        }
        Target(bytes)
    }

    pub fn is_met_by(&self, hash: &Hash256) -> bool {
        hash.0 <= self.0
    }

    /// Strictly easier to meet than `other`.
    pub fn is_looser_than(&self, other: &Target) -> bool {
        self.0 > other.0
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target({})", hex::encode(self.0))
    }
}

fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Address,
    pub nonce: u64,
    pub recipient: Address,
    pub amount: Amount,
    pub fee: Amount,
}

impl Transaction {
    pub fn id(&self) -> TxId {
        let mut hasher = Sha256::new();
        hasher.update(b"tx");
        hash_field(&mut hasher, self.from.as_str().as_bytes());
        hasher.update(self.nonce.to_le_bytes());
        hash_field(&mut hasher, self.recipient.as_str().as_bytes());
        hasher.update(self.amount.to_le_bytes());
        hasher.update(self.fee.to_le_bytes());
        Hash256(hasher.finalize().into())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.from.is_well_formed() {
            return Err(PoolError::InvalidTransaction(format!(
                "malformed sender address {:?}",
                self.from.as_str()
            )));
        }
        if !self.recipient.is_well_formed() {
            return Err(PoolError::InvalidTransaction(format!(
                "malformed recipient address {:?}",
                self.recipient.as_str()
            )));
        }
        if self.amount == 0 {
            return Err(PoolError::InvalidTransaction("amount must be positive".to_string()));
        }
        if self.amount.checked_add(self.fee).is_none() {
            return Err(PoolError::InvalidTransaction("amount plus fee overflows".to_string()));
        }
        Ok(())
    }
}

/// Position of a block in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockReference {
    pub id: BlockId,
    pub chain_length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTemplate {
    pub previous_block_id: BlockId,
    pub chain_length: u64,
    pub reward_address: Address,
    pub transactions: Vec<Transaction>,
    pub proof: Option<u64>,
}

impl BlockTemplate {
    /// Digest of every field except the proof. Candidates carrying a
    /// different proof still share the template id.
    pub fn template_id(&self) -> TemplateId {
        let mut hasher = Sha256::new();
        hasher.update(b"template");
        hasher.update(self.previous_block_id.as_bytes());
        hasher.update(self.chain_length.to_le_bytes());
        hash_field(&mut hasher, self.reward_address.as_str().as_bytes());
        hasher.update((self.transactions.len() as u64).to_le_bytes());
        for tx in &self.transactions {
            hasher.update(tx.id().as_bytes());
        }
        Hash256(hasher.finalize().into())
    }

    pub fn with_proof(&self, nonce: u64) -> Self {
        Self {
            proof: Some(nonce),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(amount: Amount) -> Transaction {
        Transaction {
            from: Address::new("alice"),
            nonce: 0,
            recipient: Address::new("bob"),
            amount,
            fee: 1,
        }
    }

    #[test]
    fn leading_zero_targets() {
        let t = Target::from_leading_zero_bits(12);
        assert_eq!(t.0[0], 0x00);
        assert_eq!(t.0[1], 0x0f);
        assert_eq!(t.0[2], 0xff);
        assert_eq!(Target::from_leading_zero_bits(256).0, [0u8; 32]);
        assert_eq!(Target::from_leading_zero_bits(0).0, [0xffu8; 32]);
    }

    #[test]
    fn looser_target_comparison() {
        let easy = Target::from_leading_zero_bits(8);
        let hard = Target::from_leading_zero_bits(20);
        assert!(easy.is_looser_than(&hard));
        assert!(!hard.is_looser_than(&easy));
        assert!(!easy.is_looser_than(&easy));
    }

    #[test]
    fn target_is_inclusive() {
        let target = Target::from_leading_zero_bits(8);
        assert!(target.is_met_by(&Hash256(target.0)));
        let mut above = target.0;
        above[0] = 1;
        assert!(!target.is_met_by(&Hash256(above)));
    }

    #[test]
    fn transaction_validation() {
        assert!(tx(10).validate().is_ok());
        assert!(matches!(tx(0).validate(), Err(PoolError::InvalidTransaction(_))));

        let mut bad = tx(10);
        bad.recipient = Address::new("has space");
        assert!(bad.validate().is_err());

        let mut overflow = tx(u64::MAX);
        overflow.fee = 1;
        assert!(overflow.validate().is_err());
    }

    #[test]
    fn template_id_ignores_proof() {
        let template = BlockTemplate {
            previous_block_id: Hash256::ZERO,
            chain_length: 1,
            reward_address: Address::new("operator"),
            transactions: vec![tx(5)],
            proof: None,
        };
        assert_eq!(template.template_id(), template.with_proof(42).template_id());

        let mut other = template.clone();
        other.transactions.push(tx(6));
        assert_ne!(template.template_id(), other.template_id());
    }

    #[test]
    fn hash_serializes_as_hex() {
        let json = serde_json::to_string(&Hash256([0xab; 32])).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let back: Hash256 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Hash256([0xab; 32]));
    }
}
