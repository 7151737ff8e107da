use serde::{Deserialize, Serialize};

use crate::types::{Address, BlockTemplate, RoundId, Target, TemplateId};

/// Work unit broadcast to workers at round start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTemplate {
    pub round_id: RoundId,
    pub template_id: TemplateId,
    pub block: BlockTemplate,
    /// Pool's reduced threshold. Always strictly looser than `target`.
    pub share_target: Target,
    /// Network threshold for a full block proof.
    pub target: Target,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareSubmission {
    pub worker_address: Address,
    pub round_id: RoundId,
    pub candidate: BlockTemplate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareClass {
    Rejected(String),
    Share,
    FullProof,
}

impl ShareClass {
    /// Full proofs count as shares too.
    pub fn is_countable(&self) -> bool {
        matches!(self, ShareClass::Share | ShareClass::FullProof)
    }
}

/// What the coordinator did with a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ShareOutcome {
    Accepted { round_id: RoundId, worker_shares: u64 },
    BlockFound { round_id: RoundId, worker_shares: u64 },
    Stale { round_id: RoundId },
    Rejected { reason: String },
}
