use std::sync::Arc;

use tracing::debug;

use super::proof::ProofFunction;
use super::types::{RoundTemplate, ShareClass, ShareSubmission};
use crate::chain::StructureCheck;

/// Stateless share classifier. The coordinator and worker-side self-checks
/// share this type so both sides agree on what counts as a share.
#[derive(Clone)]
pub struct ShareValidator {
    proof: Arc<dyn ProofFunction>,
    structure: Option<Arc<dyn StructureCheck>>,
}

impl ShareValidator {
    pub fn new(proof: Arc<dyn ProofFunction>) -> Self {
        Self {
            proof,
            structure: None,
        }
    }

    /// Adds the chain's own structural check on top of the template checks.
    pub fn with_structure_check(mut self, structure: Arc<dyn StructureCheck>) -> Self {
        self.structure = Some(structure);
        self
    }

    /// Classifies a candidate against the round it claims to answer. The
    /// result depends only on the submission and the round template.
    pub fn classify(&self, submission: &ShareSubmission, round: &RoundTemplate) -> ShareClass {
        match self.check_candidate(submission, round) {
            Err(reason) => {
                debug!(
                    "Rejected candidate from {} for round {}: {}",
                    submission.worker_address, submission.round_id, reason
                );
                ShareClass::Rejected(reason)
            }
            Ok(class) => class,
        }
    }

    fn check_candidate(
        &self,
        submission: &ShareSubmission,
        round: &RoundTemplate,
    ) -> Result<ShareClass, String> {
        let candidate = &submission.candidate;
        let template = &round.block;

        if !submission.worker_address.is_well_formed() {
            return Err("malformed worker address".to_string());
        }
        if submission.round_id != round.round_id {
            return Err(format!(
                "candidate answers round {}, open round is {}",
                submission.round_id, round.round_id
            ));
        }
        if candidate.previous_block_id != template.previous_block_id {
            return Err(format!(
                "wrong previous block {}",
                candidate.previous_block_id
            ));
        }
        if candidate.chain_length != template.chain_length {
            return Err(format!("wrong chain length {}", candidate.chain_length));
        }
        if candidate.reward_address != template.reward_address {
            return Err(format!("wrong reward address {}", candidate.reward_address));
        }
        if let Some(err) = candidate.transactions.iter().find_map(|tx| tx.validate().err()) {
            return Err(err.to_string());
        }
        if candidate.transactions != template.transactions {
            return Err("transactions differ from template".to_string());
        }
        let template_id = candidate.template_id();
        if template_id != round.template_id {
            return Err(format!("unknown template {}", template_id));
        }
        if let Some(structure) = &self.structure {
            if !structure.validate_block_structure(candidate) {
                return Err("block failed structure check".to_string());
            }
        }

        let nonce = candidate.proof.ok_or_else(|| "missing proof".to_string())?;
        let hash = self.proof.proof_hash(&template_id, nonce);

        if round.target.is_met_by(&hash) {
            Ok(ShareClass::FullProof)
        } else if round.share_target.is_met_by(&hash) {
            Ok(ShareClass::Share)
        } else {
            Err(format!("proof {} misses share target", nonce))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        full_nonce, sample_round, sample_tx, share_nonce, NonceProof, MISS_NONCE,
    };
    use crate::types::{Address, BlockTemplate, Hash256, RoundId};

    struct RejectAll;

    impl StructureCheck for RejectAll {
        fn validate_block_structure(&self, _block: &BlockTemplate) -> bool {
            false
        }
    }

    fn validator() -> ShareValidator {
        ShareValidator::new(Arc::new(NonceProof))
    }

    fn submit(round: &RoundTemplate, nonce: u64) -> ShareSubmission {
        ShareSubmission {
            worker_address: Address::new("worker-a"),
            round_id: round.round_id,
            candidate: round.block.with_proof(nonce),
        }
    }

    #[test]
    fn classifies_by_threshold() {
        let round = sample_round(RoundId(1));
        let v = validator();

        assert_eq!(v.classify(&submit(&round, share_nonce(0)), &round), ShareClass::Share);
        assert_eq!(v.classify(&submit(&round, full_nonce(0)), &round), ShareClass::FullProof);
        assert!(matches!(
            v.classify(&submit(&round, MISS_NONCE), &round),
            ShareClass::Rejected(_)
        ));
    }

    #[test]
    fn full_proof_is_countable_share() {
        let round = sample_round(RoundId(1));
        let class = validator().classify(&submit(&round, full_nonce(3)), &round);
        assert!(class.is_countable());
        assert!(!ShareClass::Rejected(String::new()).is_countable());
    }

    #[test]
    fn rejects_other_round() {
        let round = sample_round(RoundId(2));
        let mut submission = submit(&round, share_nonce(0));
        submission.round_id = RoundId(1);
        assert!(matches!(
            validator().classify(&submission, &round),
            ShareClass::Rejected(reason) if reason.contains("round 1")
        ));
    }

    #[test]
    fn rejects_structural_mismatches() {
        let round = sample_round(RoundId(1));
        let v = validator();

        let mut wrong_prev = submit(&round, share_nonce(0));
        wrong_prev.candidate.previous_block_id = Hash256([9; 32]);
        assert!(matches!(v.classify(&wrong_prev, &round), ShareClass::Rejected(_)));

        let mut extra_tx = submit(&round, share_nonce(0));
        extra_tx.candidate.transactions.push(sample_tx(99));
        assert!(matches!(v.classify(&extra_tx, &round), ShareClass::Rejected(_)));

        let mut malformed = submit(&round, share_nonce(0));
        malformed.candidate.transactions[0].amount = 0;
        assert!(matches!(
            v.classify(&malformed, &round),
            ShareClass::Rejected(reason) if reason.contains("amount")
        ));

        let mut no_proof = submit(&round, share_nonce(0));
        no_proof.candidate.proof = None;
        assert_eq!(
            v.classify(&no_proof, &round),
            ShareClass::Rejected("missing proof".to_string())
        );

        let mut bad_worker = submit(&round, share_nonce(0));
        bad_worker.worker_address = Address::new("");
        assert!(matches!(v.classify(&bad_worker, &round), ShareClass::Rejected(_)));
    }

    #[test]
    fn applies_external_structure_check() {
        let round = sample_round(RoundId(1));
        let v = validator().with_structure_check(Arc::new(RejectAll));
        assert!(matches!(
            v.classify(&submit(&round, full_nonce(0)), &round),
            ShareClass::Rejected(reason) if reason.contains("structure")
        ));
    }

    #[test]
    fn classification_is_idempotent() {
        let round = sample_round(RoundId(4));
        let v = validator();
        for nonce in [share_nonce(1), full_nonce(1), MISS_NONCE] {
            let submission = submit(&round, nonce);
            assert_eq!(v.classify(&submission, &round), v.classify(&submission, &round));
            // A second validator built the same way agrees.
            assert_eq!(v.classify(&submission, &round), validator().classify(&submission, &round));
        }
    }
}
