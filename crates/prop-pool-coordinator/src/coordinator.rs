use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::chain::{block_id, ChainBackend, StructureCheck};
use crate::database::{RoundRecord, RoundStore};
use crate::error::{PoolError, Result};
use crate::ledger::{ContributionLedger, RoundState};
use crate::metrics::{
    BLOCKS_FOUND, CURRENT_ROUND, ROUNDS_STARTED, SHARES_ACCEPTED, SHARES_REJECTED, SHARES_STALE,
    SHARES_SUBMITTED, SHARE_VALIDATION_TIME,
};
use crate::payout::{PayoutPlan, PayoutReport, RewardConfig, RewardDistributor};
use crate::queue::TransactionQueue;
use crate::shares::{
    ProofFunction, RoundTemplate, ShareClass, ShareOutcome, ShareSubmission, ShareValidator,
};
use crate::transport::{Topic, Transport};
use crate::types::{Address, RoundId, Target, TemplateId, Transaction, TxId};

pub const DEFAULT_SHARE_DIFFICULTY_BITS: u32 = 12;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub pool_name: String,
    pub operator_address: Address,
    pub rewards: RewardConfig,
    pub share_target: Target,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_name: "PROP Mining Pool".to_string(),
            operator_address: Address::new("pool-operator"),
            rewards: RewardConfig::default(),
            share_target: Target::from_leading_zero_bits(DEFAULT_SHARE_DIFFICULTY_BITS),
            command_buffer: 1024,
            event_buffer: 256,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pool_name.trim().is_empty() {
            return Err(PoolError::Configuration("pool name is empty".to_string()));
        }
        if self.command_buffer == 0 || self.event_buffer == 0 {
            return Err(PoolError::Configuration(
                "channel buffers must be non-zero".to_string(),
            ));
        }
        self.rewards.validate()
    }
}

/// Published whenever the open round changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStatus {
    pub round_id: Option<RoundId>,
    pub state: Option<RoundState>,
    pub total_shares: u64,
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
    RoundStarted {
        round_id: RoundId,
        template_id: TemplateId,
        chain_length: u64,
        transactions: usize,
    },
    RoundFinalized {
        round_id: RoundId,
        winner: Address,
        plan: PayoutPlan,
    },
    PayoutsPosted {
        report: PayoutReport,
    },
    /// No round could be opened after `after` finalized. The controller
    /// retries on the next share.
    RoundStartFailed {
        after: RoundId,
        reason: String,
    },
}

enum PoolCommand {
    Share {
        submission: ShareSubmission,
        reply: Option<oneshot::Sender<ShareOutcome>>,
    },
    Shutdown,
}

struct Round {
    template: RoundTemplate,
    ledger: ContributionLedger,
    seen_proofs: HashSet<u64>,
}

/// Owns the open round. Shares are handled strictly one at a time: either
/// through `&mut self` directly or, once spawned, by a single consumer task
/// reading the command channel.
pub struct RoundController<C: ChainBackend + 'static> {
    chain: Arc<C>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn RoundStore>,
    validator: ShareValidator,
    distributor: Arc<RewardDistributor>,
    config: PoolConfig,
    pending: TransactionQueue,
    round: Option<Round>,
    last_round_id: RoundId,
    current: watch::Sender<Option<RoundTemplate>>,
    status: watch::Sender<RoundStatus>,
    events: broadcast::Sender<PoolEvent>,
}

impl<C: ChainBackend + 'static> RoundController<C> {
    pub async fn new(
        chain: Arc<C>,
        proof: Arc<dyn ProofFunction>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn RoundStore>,
        config: PoolConfig,
    ) -> Result<Self> {
        config.validate()?;
        let distributor = Arc::new(RewardDistributor::new(
            config.rewards,
            config.operator_address.clone(),
        )?);
        check_share_target(&config.share_target, &chain.full_difficulty_threshold().await)?;

        let structure: Arc<dyn StructureCheck> = chain.clone();
        let validator = ShareValidator::new(proof).with_structure_check(structure);
        let (current, _) = watch::channel(None);
        let (status, _) = watch::channel(RoundStatus::default());
        let (events, _) = broadcast::channel(config.event_buffer);

        Ok(Self {
            chain,
            transport,
            store,
            validator,
            distributor,
            config,
            pending: TransactionQueue::new(),
            round: None,
            last_round_id: RoundId(0),
            current,
            status,
            events,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn current_template(&self) -> Option<&RoundTemplate> {
        self.round.as_ref().map(|r| &r.template)
    }

    pub fn ledger(&self) -> Option<&ContributionLedger> {
        self.round.as_ref().map(|r| &r.ledger)
    }

    pub fn round_state(&self) -> Option<RoundState> {
        self.ledger().map(|l| l.state())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    pub async fn queue_transaction(&self, tx: Transaction) -> Result<TxId> {
        self.pending.insert(tx).await
    }

    /// Drains the pending queue into a new template on top of the chain
    /// head, opens a fresh ledger and broadcasts the template once.
    #[instrument(skip(self), fields(pool = %self.config.pool_name))]
    pub async fn start_new_round(&mut self) -> Result<RoundId> {
        let target = self.chain.full_difficulty_threshold().await;
        check_share_target(&self.config.share_target, &target)?;

        let transactions = self.pending.drain().await;
        let head = self.chain.current_head().await;
        let block = self
            .chain
            .build_template(head, &self.config.operator_address, transactions)
            .await;

        let round_id = self.last_round_id.next();
        self.last_round_id = round_id;

        let template = RoundTemplate {
            round_id,
            template_id: block.template_id(),
            block,
            share_target: self.config.share_target,
            target,
        };
        self.round = Some(Round {
            template: template.clone(),
            ledger: ContributionLedger::open(round_id),
            seen_proofs: HashSet::new(),
        });
        self.current.send_replace(Some(template.clone()));
        self.publish_status();
        ROUNDS_STARTED.inc();
        CURRENT_ROUND.set(round_id.0 as f64);

        info!(
            "Sending block {} to pool miners (round {}, {} transactions)",
            template.block.chain_length,
            round_id,
            template.block.transactions.len()
        );
        let payload = serde_json::to_value(&template)?;
        if let Err(e) = self.transport.broadcast(Topic::NewPoolBlock, payload).await {
            warn!("Broadcast of round {} failed: {}", round_id, e);
        }

        let _ = self.events.send(PoolEvent::RoundStarted {
            round_id,
            template_id: template.template_id,
            chain_length: template.block.chain_length,
            transactions: template.block.transactions.len(),
        });
        Ok(round_id)
    }

    /// Single entry point for worker responses. Rejections are logged and
    /// reported only to the local caller, never as an error.
    pub async fn handle_share(&mut self, submission: ShareSubmission) -> ShareOutcome {
        SHARES_SUBMITTED.inc();
        if self.round.is_none() && self.last_round_id.0 > 0 {
            self.reopen_round().await;
        }
        match self.process_share(&submission).await {
            Ok(outcome) => outcome,
            Err(PoolError::RoundClosed(round_id)) => {
                SHARES_STALE.inc();
                debug!(
                    "Stale share from {} for round {}",
                    submission.worker_address, round_id
                );
                ShareOutcome::Stale { round_id }
            }
            Err(PoolError::InvalidShare(reason)) => {
                SHARES_REJECTED.inc();
                info!("Invalid share from {}: {}", submission.worker_address, reason);
                ShareOutcome::Rejected { reason }
            }
            Err(e) => {
                SHARES_REJECTED.inc();
                error!(
                    "Failed to process share from {}: {}",
                    submission.worker_address, e
                );
                ShareOutcome::Rejected {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn process_share(&mut self, submission: &ShareSubmission) -> Result<ShareOutcome> {
        let round = self.round.as_mut().ok_or(PoolError::NoOpenRound)?;
        let round_id = round.ledger.round_id();
        if submission.round_id < round_id || round.ledger.state() != RoundState::Open {
            return Err(PoolError::RoundClosed(submission.round_id));
        }

        let timer = SHARE_VALIDATION_TIME.start_timer();
        let class = self.validator.classify(submission, &round.template);
        timer.observe_duration();

        if let ShareClass::Rejected(reason) = class {
            return Err(PoolError::InvalidShare(reason));
        }
        let nonce = submission
            .candidate
            .proof
            .ok_or_else(|| PoolError::InvalidShare("missing proof".to_string()))?;
        if !round.seen_proofs.insert(nonce) {
            return Err(PoolError::InvalidShare(format!("duplicate proof {}", nonce)));
        }

        // Counted before any finalization so the finder is always paid.
        let worker_shares = round.ledger.record_share(&submission.worker_address)?;
        SHARES_ACCEPTED.inc();

        if class == ShareClass::FullProof {
            BLOCKS_FOUND.inc();
            info!(
                "Mining pool found proof for block {}: {}",
                round.template.block.chain_length, nonce
            );
            self.finalize_round(submission).await?;
            return Ok(ShareOutcome::BlockFound {
                round_id,
                worker_shares,
            });
        }

        self.publish_status();
        Ok(ShareOutcome::Accepted {
            round_id,
            worker_shares,
        })
    }

    /// Locks the ledger, announces the block, pays out and opens the next
    /// round. Payout emission runs in the background. Failing to open the
    /// next round does not fail the finalization.
    #[instrument(skip_all, fields(round = %winning.round_id, winner = %winning.worker_address))]
    async fn finalize_round(&mut self, winning: &ShareSubmission) -> Result<()> {
        let round = self.round.as_mut().ok_or(PoolError::NoOpenRound)?;
        round.ledger.begin_finalizing()?;
        let snapshot = round.ledger.snapshot()?;
        let round_id = snapshot.round_id;
        let template_id = round.template.template_id;
        self.publish_status();

        let block = winning.candidate.clone();
        let nonce = block.proof.unwrap_or_default();
        if let Err(e) = self.chain.announce_block(block.clone()).await {
            warn!("Chain did not accept block for round {}: {}", round_id, e);
        }

        let plan = self.distributor.compute_payouts(&snapshot);
        let record = RoundRecord {
            round_id,
            template_id,
            block_id: block_id(&block, nonce),
            chain_length: block.chain_length,
            winner: winning.worker_address.clone(),
            contributions: snapshot.contributions.clone(),
            total_shares: snapshot.total_shares,
            payouts: plan.payouts.clone(),
            dust: plan.dust,
            undistributed: plan.undistributed,
            finalized_at: Utc::now(),
            payout_report: None,
        };
        if let Err(e) = self.store.save_round(&record).await {
            error!("Failed to store round {}: {}", round_id, e);
        }

        if let Some(round) = self.round.as_mut() {
            round.ledger.close();
        }
        let _ = self.events.send(PoolEvent::RoundFinalized {
            round_id,
            winner: winning.worker_address.clone(),
            plan: plan.clone(),
        });

        // Payouts are mined in the pool's next block; the chain submission
        // below relays them to the rest of the network.
        for (_, tx) in self.distributor.payout_transactions(&plan) {
            if let Err(e) = self.pending.insert(tx).await {
                warn!("Could not queue payout for round {}: {}", round_id, e);
            }
        }
        self.spawn_payouts(plan);

        self.open_next_round(round_id).await;
        Ok(())
    }

    /// A failed start leaves the controller without a round instead of
    /// holding a closed one, so the next share can retry.
    async fn open_next_round(&mut self, finished: RoundId) {
        if let Err(e) = self.start_new_round().await {
            error!("Failed to open the round after {}: {}", finished, e);
            self.round = None;
            self.current.send_replace(None);
            self.publish_status();
            let _ = self.events.send(PoolEvent::RoundStartFailed {
                after: finished,
                reason: e.to_string(),
            });
        }
    }

    async fn reopen_round(&mut self) {
        match self.start_new_round().await {
            Ok(round_id) => info!("Recovered with round {}", round_id),
            Err(e) => warn!("Still unable to open a round: {}", e),
        }
    }

    fn spawn_payouts(&self, plan: PayoutPlan) {
        let chain = self.chain.clone();
        let distributor = self.distributor.clone();
        let store = self.store.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let report = distributor
                .emit_payout_transactions(chain.as_ref(), &plan)
                .await;
            if !report.failed.is_empty() {
                warn!(
                    "Round {}: {} of {} payouts failed",
                    report.round_id,
                    report.failed.len(),
                    report.failed.len() + report.posted.len()
                );
            }
            if let Err(e) = store.record_payout_report(&report).await {
                error!("Failed to store payout report for round {}: {}", report.round_id, e);
            }
            let _ = events.send(PoolEvent::PayoutsPosted { report });
        });
    }

    fn publish_status(&self) {
        let status = match &self.round {
            Some(round) => RoundStatus {
                round_id: Some(round.ledger.round_id()),
                state: Some(round.ledger.state()),
                total_shares: round.ledger.total_shares(),
                workers: round.ledger.workers(),
            },
            None => RoundStatus::default(),
        };
        self.status.send_replace(status);
    }

    /// Opens the first round if needed and moves the controller onto its own
    /// task. All further access goes through the returned handle.
    pub async fn spawn(mut self) -> Result<(PoolHandle, JoinHandle<()>)> {
        if self.round.is_none() {
            self.start_new_round().await?;
        }

        let (commands, receiver) = mpsc::channel(self.config.command_buffer);
        let handle = PoolHandle {
            commands,
            pending: self.pending.clone(),
            current: self.current.subscribe(),
            status: self.status.subscribe(),
            events: self.events.clone(),
        };
        let task = tokio::spawn(self.run(receiver));
        Ok((handle, task))
    }

    async fn run(mut self, mut commands: mpsc::Receiver<PoolCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                PoolCommand::Share { submission, reply } => {
                    let outcome = self.handle_share(submission).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                }
                PoolCommand::Shutdown => {
                    info!("Round controller shutting down");
                    break;
                }
            }
        }
    }
}

fn check_share_target(share_target: &Target, full_target: &Target) -> Result<()> {
    if !share_target.is_looser_than(full_target) {
        return Err(PoolError::Configuration(
            "share target must be strictly easier than the full target".to_string(),
        ));
    }
    Ok(())
}

/// Cloneable front door to a spawned round controller.
#[derive(Clone)]
pub struct PoolHandle {
    commands: mpsc::Sender<PoolCommand>,
    pending: TransactionQueue,
    current: watch::Receiver<Option<RoundTemplate>>,
    status: watch::Receiver<RoundStatus>,
    events: broadcast::Sender<PoolEvent>,
}

impl PoolHandle {
    /// Queues a transaction for the next round. Safe to call concurrently.
    pub async fn queue_transaction(&self, tx: Transaction) -> Result<TxId> {
        self.pending.insert(tx).await
    }

    /// Enqueues a share without waiting for its outcome.
    pub async fn submit_share(&self, submission: ShareSubmission) -> Result<()> {
        self.commands
            .send(PoolCommand::Share {
                submission,
                reply: None,
            })
            .await
            .map_err(|_| PoolError::ChannelClosed)
    }

    pub async fn submit_share_and_wait(&self, submission: ShareSubmission) -> Result<ShareOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(PoolCommand::Share {
                submission,
                reply: Some(reply),
            })
            .await
            .map_err(|_| PoolError::ChannelClosed)?;
        outcome.await.map_err(|_| PoolError::ChannelClosed)
    }

    pub fn current_round(&self) -> Option<RoundTemplate> {
        self.current.borrow().clone()
    }

    pub fn watch_rounds(&self) -> watch::Receiver<Option<RoundTemplate>> {
        self.current.clone()
    }

    pub fn status(&self) -> RoundStatus {
        self.status.borrow().clone()
    }

    pub async fn pending_transactions(&self) -> usize {
        self.pending.len().await
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.commands
            .send(PoolCommand::Shutdown)
            .await
            .map_err(|_| PoolError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;
    use tracing_test::traced_test;

    use super::*;
    use crate::chain::LocalChain;
    use crate::database::MemoryStore;
    use crate::testing::{
        full_nonce, local_chain, sample_tx, share_nonce, test_config, NonceProof, RefusingChain,
        RetargetingChain, FULL_BITS, MISS_NONCE,
    };
    use crate::transport::ChannelTransport;

    struct Fixture<C: ChainBackend + 'static> {
        controller: RoundController<C>,
        chain: Arc<C>,
        transport: ChannelTransport,
        store: Arc<MemoryStore>,
    }

    async fn fixture_with<C: ChainBackend + 'static>(chain: C) -> Fixture<C> {
        let chain = Arc::new(chain);
        let transport = ChannelTransport::new(64);
        let store = Arc::new(MemoryStore::new());
        let controller = RoundController::new(
            chain.clone(),
            Arc::new(NonceProof),
            Arc::new(transport.clone()),
            store.clone(),
            test_config(),
        )
        .await
        .unwrap();
        Fixture {
            controller,
            chain,
            transport,
            store,
        }
    }

    async fn fixture() -> Fixture<LocalChain> {
        fixture_with(local_chain()).await
    }

    fn share(template: &RoundTemplate, worker: &str, nonce: u64) -> ShareSubmission {
        ShareSubmission {
            worker_address: Address::new(worker),
            round_id: template.round_id,
            candidate: template.block.with_proof(nonce),
        }
    }

    async fn next_payout_report(events: &mut broadcast::Receiver<PoolEvent>) -> PayoutReport {
        timeout(Duration::from_secs(5), async {
            loop {
                if let PoolEvent::PayoutsPosted { report } = events.recv().await.unwrap() {
                    return report;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn ledger_counts_only_accepted_shares() {
        let mut f = fixture().await;
        f.controller.start_new_round().await.unwrap();
        let t = f.controller.current_template().unwrap().clone();

        for n in 0..3 {
            let outcome = f.controller.handle_share(share(&t, "A", share_nonce(n))).await;
            assert!(matches!(outcome, ShareOutcome::Accepted { .. }));
        }
        f.controller.handle_share(share(&t, "B", share_nonce(3))).await;

        // Misses, duplicates and foreign templates leave the ledger untouched.
        let rejected = [
            share(&t, "A", MISS_NONCE),
            share(&t, "B", share_nonce(0)),
            {
                let mut s = share(&t, "B", share_nonce(9));
                s.candidate.transactions.push(sample_tx(42));
                s
            },
        ];
        for s in rejected {
            assert!(matches!(
                f.controller.handle_share(s).await,
                ShareOutcome::Rejected { .. }
            ));
        }

        let ledger = f.controller.ledger().unwrap();
        assert_eq!(ledger.total_shares(), 4);
        assert_eq!(ledger.shares_of(&Address::new("A")), 3);
        assert_eq!(ledger.shares_of(&Address::new("B")), 1);
    }

    #[tokio::test]
    async fn full_proof_finder_is_paid() {
        let mut f = fixture().await;
        let mut events = f.controller.subscribe_events();
        f.controller.start_new_round().await.unwrap();
        let t = f.controller.current_template().unwrap().clone();

        f.controller.handle_share(share(&t, "A", share_nonce(0))).await;
        f.controller.handle_share(share(&t, "A", share_nonce(1))).await;
        let outcome = f.controller.handle_share(share(&t, "B", full_nonce(0))).await;
        assert_eq!(
            outcome,
            ShareOutcome::BlockFound {
                round_id: t.round_id,
                worker_shares: 1
            }
        );

        let report = next_payout_report(&mut events).await;
        let paid = |who: &str| {
            report
                .posted
                .iter()
                .find(|p| p.address.as_str() == who)
                .map(|p| p.amount)
        };
        assert_eq!(paid("operator"), Some(5));
        assert_eq!(paid("A"), Some(13));
        assert_eq!(paid("B"), Some(7));

        let record = f.store.get_round(t.round_id).await.unwrap().unwrap();
        assert_eq!(record.winner.as_str(), "B");
        assert_eq!(record.total_shares, 3);
        assert_eq!(f.chain.blocks().await.len(), 1);
    }

    #[tokio::test]
    async fn stale_share_after_next_round() {
        let mut f = fixture().await;
        let first = f.controller.start_new_round().await.unwrap();
        let t1 = f.controller.current_template().unwrap().clone();

        f.controller.handle_share(share(&t1, "A", full_nonce(0))).await;
        let second = f.controller.current_template().unwrap().round_id;
        assert_eq!(second, first.next());
        assert_eq!(f.controller.round_state(), Some(RoundState::Open));

        let outcome = f.controller.handle_share(share(&t1, "A", share_nonce(0))).await;
        assert_eq!(outcome, ShareOutcome::Stale { round_id: first });
        assert_eq!(f.controller.ledger().unwrap().total_shares(), 0);
    }

    #[tokio::test]
    async fn future_round_is_rejected_not_stale() {
        let mut f = fixture().await;
        f.controller.start_new_round().await.unwrap();
        let mut s = share(f.controller.current_template().unwrap(), "A", share_nonce(0));
        s.round_id = s.round_id.next();
        assert!(matches!(
            f.controller.handle_share(s).await,
            ShareOutcome::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn queued_transactions_land_in_exactly_one_round() {
        let mut f = fixture().await;
        f.controller.queue_transaction(sample_tx(1)).await.unwrap();
        f.controller.queue_transaction(sample_tx(2)).await.unwrap();
        f.controller.queue_transaction(sample_tx(1)).await.unwrap();

        f.controller.start_new_round().await.unwrap();
        let t1 = f.controller.current_template().unwrap().clone();
        assert_eq!(t1.block.transactions, vec![sample_tx(1), sample_tx(2)]);

        // Arrives after the drain: next round only.
        f.controller.queue_transaction(sample_tx(3)).await.unwrap();
        assert_eq!(f.controller.current_template().unwrap().block.transactions.len(), 2);

        f.controller.handle_share(share(&t1, "A", full_nonce(0))).await;
        let t2 = f.controller.current_template().unwrap();
        assert_eq!(t2.block.transactions[0], sample_tx(3));
        assert!(t2.block.transactions[1..]
            .iter()
            .all(|tx| tx.from.as_str() == "operator"));
        assert_eq!(t2.block.chain_length, t1.block.chain_length + 1);
    }

    #[tokio::test]
    async fn rejects_malformed_transaction() {
        let f = fixture().await;
        let mut tx = sample_tx(1);
        tx.amount = 0;
        assert!(matches!(
            f.controller.queue_transaction(tx).await,
            Err(PoolError::InvalidTransaction(_))
        ));
    }

    #[tokio::test]
    async fn one_broadcast_per_round() {
        let mut f = fixture().await;
        let mut broadcasts = f.transport.subscribe();

        f.controller.start_new_round().await.unwrap();
        let t = f.controller.current_template().unwrap().clone();
        f.controller.handle_share(share(&t, "A", share_nonce(0))).await;
        f.controller.handle_share(share(&t, "A", full_nonce(0))).await;

        let (topic, first) = broadcasts.try_recv().unwrap();
        assert_eq!(topic, Topic::NewPoolBlock);
        assert_eq!(first["round_id"], 1);
        let (_, second) = broadcasts.try_recv().unwrap();
        assert_eq!(second["round_id"], 2);
        assert!(broadcasts.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_round_pays_only_operator() {
        let mut f = fixture().await;
        let mut events = f.controller.subscribe_events();
        f.controller.start_new_round().await.unwrap();
        let round = f.controller.current_template().unwrap().round_id;

        // Force finalization without any recorded share.
        let winning = share(f.controller.current_template().unwrap(), "A", full_nonce(0));
        f.controller.finalize_round(&winning).await.unwrap();

        let report = next_payout_report(&mut events).await;
        assert_eq!(report.round_id, round);
        assert_eq!(report.posted.len(), 1);
        assert_eq!(report.posted[0].address.as_str(), "operator");
        let record = f.store.get_round(round).await.unwrap().unwrap();
        assert_eq!(record.undistributed, 20);
    }

    #[tokio::test]
    async fn failed_payout_does_not_block_next_round() {
        let mut f = fixture_with(RefusingChain::new("A")).await;
        let mut events = f.controller.subscribe_events();
        f.controller.start_new_round().await.unwrap();
        let t = f.controller.current_template().unwrap().clone();

        f.controller.handle_share(share(&t, "A", share_nonce(0))).await;
        f.controller.handle_share(share(&t, "B", full_nonce(0))).await;

        let report = next_payout_report(&mut events).await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].address.as_str(), "A");
        assert_eq!(report.posted.len(), 2);

        let t2 = f.controller.current_template().unwrap().clone();
        assert_eq!(t2.round_id, t.round_id.next());
        let outcome = f.controller.handle_share(share(&t2, "A", share_nonce(0))).await;
        assert!(matches!(outcome, ShareOutcome::Accepted { worker_shares: 1, .. }));

        let worker = f.store.get_worker(&Address::new("A")).await.unwrap().unwrap();
        assert_eq!(worker.failed_payouts, 1);
        assert_eq!(f.chain.inner.submitted_transactions().await.len(), 2);
    }

    #[tokio::test]
    async fn payouts_ride_in_the_next_round() {
        let mut f = fixture().await;
        f.controller.start_new_round().await.unwrap();
        let t1 = f.controller.current_template().unwrap().clone();
        f.controller.handle_share(share(&t1, "A", share_nonce(0))).await;
        f.controller.handle_share(share(&t1, "B", full_nonce(0))).await;

        let t2 = f.controller.current_template().unwrap().clone();
        let paid: Vec<_> = t2
            .block
            .transactions
            .iter()
            .map(|tx| (tx.from.as_str(), tx.recipient.as_str(), tx.amount, tx.nonce))
            .collect();
        assert_eq!(
            paid,
            vec![
                ("operator", "operator", 5, 1),
                ("operator", "A", 10, 1),
                ("operator", "B", 10, 1),
            ]
        );

        f.controller.handle_share(share(&t2, "A", full_nonce(0))).await;
        let t3 = f.controller.current_template().unwrap();
        assert!(t3.block.transactions.iter().all(|tx| tx.nonce == t2.round_id.0));
        assert_eq!(f.chain.blocks().await[1].transactions, t2.block.transactions);
    }

    #[tokio::test]
    async fn failed_round_start_recovers_on_next_share() {
        let mut f = fixture_with(RetargetingChain::new()).await;
        let mut events = f.controller.subscribe_events();
        f.controller.start_new_round().await.unwrap();
        let t = f.controller.current_template().unwrap().clone();

        // Full target drops below the share target before the next round.
        f.chain.retarget(4);
        let outcome = f.controller.handle_share(share(&t, "A", full_nonce(0))).await;
        assert_eq!(
            outcome,
            ShareOutcome::BlockFound {
                round_id: t.round_id,
                worker_shares: 1
            }
        );
        assert!(f.controller.current_template().is_none());
        let mut start_failed = None;
        while let Ok(event) = events.try_recv() {
            if let PoolEvent::RoundStartFailed { after, .. } = event {
                start_failed = Some(after);
            }
        }
        assert_eq!(start_failed, Some(t.round_id));

        // Still misconfigured: nothing is credited.
        let outcome = f.controller.handle_share(share(&t, "B", share_nonce(0))).await;
        assert!(matches!(outcome, ShareOutcome::Rejected { .. }));

        f.chain.retarget(FULL_BITS);
        let outcome = f.controller.handle_share(share(&t, "B", share_nonce(1))).await;
        assert_eq!(outcome, ShareOutcome::Stale { round_id: t.round_id });

        let t2 = f.controller.current_template().unwrap().clone();
        assert_eq!(t2.round_id, t.round_id.next());
        assert_eq!(f.controller.round_state(), Some(RoundState::Open));
        // Operator and finder payouts survived the failed start.
        assert_eq!(t2.block.transactions.len(), 2);
        let outcome = f.controller.handle_share(share(&t2, "B", share_nonce(2))).await;
        assert!(matches!(outcome, ShareOutcome::Accepted { worker_shares: 1, .. }));
    }

    #[tokio::test]
    async fn share_target_must_be_looser() {
        let mut config = test_config();
        config.share_target = Target::from_leading_zero_bits(FULL_BITS);
        let result = RoundController::new(
            Arc::new(local_chain()),
            Arc::new(NonceProof),
            Arc::new(ChannelTransport::new(4)),
            Arc::new(MemoryStore::new()),
            config,
        )
        .await;
        assert!(matches!(result, Err(PoolError::Configuration(_))));
    }

    #[tokio::test]
    #[traced_test]
    async fn invalid_share_is_logged_and_dropped() {
        let mut f = fixture().await;
        f.controller.start_new_round().await.unwrap();
        let t = f.controller.current_template().unwrap().clone();
        f.controller.handle_share(share(&t, "A", MISS_NONCE)).await;
        assert!(logs_contain("Invalid share from A"));
        assert_eq!(f.controller.ledger().unwrap().total_shares(), 0);
    }

    #[tokio::test]
    async fn spawned_controller_serializes_full_proofs() {
        let f = fixture().await;
        let (handle, task) = f.controller.spawn().await.unwrap();
        let mut events = handle.subscribe_events();
        let t = handle.current_round().unwrap();

        handle.queue_transaction(sample_tx(5)).await.unwrap();
        assert_eq!(handle.pending_transactions().await, 1);

        let (a, b) = tokio::join!(
            handle.submit_share_and_wait(share(&t, "A", full_nonce(0))),
            handle.submit_share_and_wait(share(&t, "B", full_nonce(1))),
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        let found = outcomes
            .iter()
            .filter(|o| matches!(o, ShareOutcome::BlockFound { .. }))
            .count();
        let stale = outcomes
            .iter()
            .filter(|o| matches!(o, ShareOutcome::Stale { .. }))
            .count();
        assert_eq!((found, stale), (1, 1));

        let next = handle.current_round().unwrap();
        assert_eq!(next.round_id, t.round_id.next());
        // Queued transaction first, then operator and finder payouts.
        assert_eq!(next.block.transactions.len(), 3);
        assert_eq!(next.block.transactions[0], sample_tx(5));
        assert_eq!(handle.status().state, Some(RoundState::Open));

        let mut finalized = 0;
        let report = timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await.unwrap() {
                    PoolEvent::RoundFinalized { .. } => finalized += 1,
                    PoolEvent::PayoutsPosted { report } => return report,
                    _ => {}
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(finalized, 1);
        assert_eq!(report.round_id, t.round_id);
        // Operator plus the single finder.
        assert_eq!(report.posted.len(), 2);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(handle.submit_share(share(&next, "A", share_nonce(0))).await.is_err());
    }
}
