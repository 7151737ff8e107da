use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chain::ChainBackend;
use crate::error::{PoolError, Result};
use crate::ledger::LedgerSnapshot;
use crate::metrics::{PAYOUTS_FAILED, PAYOUTS_POSTED};
use crate::types::{Address, Amount, RoundId, Transaction, TxId, UNITS_PER_COIN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardConfig {
    pub total_reward: Amount,
    pub operator_cut: Amount,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            total_reward: 25 * UNITS_PER_COIN,
            operator_cut: 5 * UNITS_PER_COIN,
        }
    }
}

impl RewardConfig {
    pub fn validate(&self) -> Result<()> {
        if self.operator_cut > self.total_reward {
            return Err(PoolError::Configuration(format!(
                "operator cut {} exceeds total reward {}",
                self.operator_cut, self.total_reward
            )));
        }
        Ok(())
    }

    pub fn remaining(&self) -> Amount {
        self.total_reward - self.operator_cut
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payee {
    Operator,
    Worker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub address: Address,
    pub amount: Amount,
    pub shares: u64,
    pub payee: Payee,
}

/// Proportional split of one round's reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutPlan {
    pub round_id: RoundId,
    /// Operator first, then workers ordered by address.
    pub payouts: Vec<Payout>,
    pub total_shares: u64,
    /// Rounding remainder added to the last worker payout.
    pub dust: Amount,
    /// Worker reward left unpaid because nobody contributed a share.
    pub undistributed: Amount,
}

impl PayoutPlan {
    pub fn operator_amount(&self) -> Amount {
        self.payouts
            .iter()
            .filter(|p| p.payee == Payee::Operator)
            .map(|p| p.amount)
            .sum()
    }

    pub fn worker_payouts(&self) -> impl Iterator<Item = &Payout> {
        self.payouts.iter().filter(|p| p.payee == Payee::Worker)
    }

    pub fn distributed(&self) -> Amount {
        self.payouts.iter().map(|p| p.amount).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedPayout {
    pub address: Address,
    pub amount: Amount,
    pub tx_id: TxId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPayout {
    pub address: Address,
    pub amount: Amount,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutReport {
    pub round_id: RoundId,
    pub posted: Vec<PostedPayout>,
    pub failed: Vec<FailedPayout>,
}

pub struct RewardDistributor {
    config: RewardConfig,
    operator: Address,
}

impl RewardDistributor {
    pub fn new(config: RewardConfig, operator: Address) -> Result<Self> {
        config.validate()?;
        if !operator.is_well_formed() {
            return Err(PoolError::Configuration(format!(
                "malformed operator address {:?}",
                operator.as_str()
            )));
        }
        Ok(Self { config, operator })
    }

    pub fn config(&self) -> RewardConfig {
        self.config
    }

    pub fn operator(&self) -> &Address {
        &self.operator
    }

    /// Splits the round reward. Worker amounts are floored in base units and
    /// the remainder goes to the last worker, so a plan with shares always
    /// sums to `total_reward`.
    pub fn compute_payouts(&self, snapshot: &LedgerSnapshot) -> PayoutPlan {
        let remaining = self.config.remaining();
        let mut payouts = vec![Payout {
            address: self.operator.clone(),
            amount: self.config.operator_cut,
            shares: 0,
            payee: Payee::Operator,
        }];

        let total_shares: u64 = snapshot.contributions.values().sum();
        if total_shares == 0 {
            warn!(
                "Round {} closed with no shares, {} left undistributed",
                snapshot.round_id, remaining
            );
            return PayoutPlan {
                round_id: snapshot.round_id,
                payouts,
                total_shares,
                dust: 0,
                undistributed: remaining,
            };
        }

        let mut distributed: Amount = 0;
        for (address, shares) in &snapshot.contributions {
            let amount = (remaining as u128 * *shares as u128 / total_shares as u128) as Amount;
            distributed += amount;
            payouts.push(Payout {
                address: address.clone(),
                amount,
                shares: *shares,
                payee: Payee::Worker,
            });
        }

        let dust = remaining - distributed;
        if let Some(last) = payouts.last_mut() {
            last.amount += dust;
        }

        info!(
            "Round {} payouts: {} workers, {} shares, operator {}, dust {}",
            snapshot.round_id,
            payouts.len() - 1,
            total_shares,
            self.config.operator_cut,
            dust
        );

        PayoutPlan {
            round_id: snapshot.round_id,
            payouts,
            total_shares,
            dust,
            undistributed: 0,
        }
    }

    /// One transaction per non-zero payout, sent from the operator with the
    /// round id as nonce.
    pub fn payout_transactions<'a>(&self, plan: &'a PayoutPlan) -> Vec<(&'a Payout, Transaction)> {
        plan.payouts
            .iter()
            .filter(|payout| {
                if payout.amount == 0 {
                    debug!("Skipping zero payout to {}", payout.address);
                }
                payout.amount > 0
            })
            .map(|payout| {
                let tx = Transaction {
                    from: self.operator.clone(),
                    nonce: plan.round_id.0,
                    recipient: payout.address.clone(),
                    amount: payout.amount,
                    fee: 0,
                };
                (payout, tx)
            })
            .collect()
    }

    /// Posts every payout transaction. Each submission stands on its own: a
    /// failure is recorded and the rest still go out.
    pub async fn emit_payout_transactions<C>(&self, chain: &C, plan: &PayoutPlan) -> PayoutReport
    where
        C: ChainBackend + ?Sized,
    {
        let submissions = self
            .payout_transactions(plan)
            .into_iter()
            .map(|(payout, tx)| async move { (payout, chain.submit_transaction(tx).await) });

        let mut report = PayoutReport {
            round_id: plan.round_id,
            posted: Vec::new(),
            failed: Vec::new(),
        };

        for (payout, result) in join_all(submissions).await {
            match result {
                Ok(tx_id) => {
                    debug!("Paid {} to {} in {}", payout.amount, payout.address, tx_id);
                    PAYOUTS_POSTED.inc();
                    report.posted.push(PostedPayout {
                        address: payout.address.clone(),
                        amount: payout.amount,
                        tx_id,
                    });
                }
                Err(e) => {
                    let err = PoolError::PayoutSubmissionFailed {
                        address: payout.address.clone(),
                        reason: e.to_string(),
                    };
                    warn!("Round {}: {}", plan.round_id, err);
                    PAYOUTS_FAILED.inc();
                    report.failed.push(FailedPayout {
                        address: payout.address.clone(),
                        amount: payout.amount,
                        reason: e.to_string(),
                    });
                }
            }
        }

        report
    }
}
