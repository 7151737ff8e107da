use sha2::{Digest, Sha256};

use crate::types::{Hash256, TemplateId};

/// The chain's proof-of-work function, injected into the validator.
pub trait ProofFunction: Send + Sync {
    fn proof_hash(&self, template_id: &TemplateId, nonce: u64) -> Hash256;
}

/// `sha256(template_id || nonce_le)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Proof;

impl ProofFunction for Sha256Proof {
    fn proof_hash(&self, template_id: &TemplateId, nonce: u64) -> Hash256 {
        let mut hasher = Sha256::new();
        hasher.update(template_id.as_bytes());
        hasher.update(nonce.to_le_bytes());
        Hash256(hasher.finalize().into())
    }
}
