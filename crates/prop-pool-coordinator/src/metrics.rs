use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, TextEncoder};

use crate::error::{PoolError, Result};

lazy_static! {
    pub static ref SHARES_SUBMITTED: Counter = Counter::new(
        "pool_shares_submitted_total",
        "Total number of shares submitted"
    ).expect("valid metric");

    pub static ref SHARES_ACCEPTED: Counter = Counter::new(
        "pool_shares_accepted_total",
        "Total number of shares accepted"
    ).expect("valid metric");

    pub static ref SHARES_REJECTED: Counter = Counter::new(
        "pool_shares_rejected_total",
        "Total number of shares rejected"
    ).expect("valid metric");

    pub static ref SHARES_STALE: Counter = Counter::new(
        "pool_shares_stale_total",
        "Total number of shares submitted for a round that is no longer open"
    ).expect("valid metric");

    pub static ref BLOCKS_FOUND: Counter = Counter::new(
        "pool_blocks_found_total",
        "Total number of blocks found"
    ).expect("valid metric");

    pub static ref ROUNDS_STARTED: Counter = Counter::new(
        "pool_rounds_started_total",
        "Total number of rounds opened"
    ).expect("valid metric");

    pub static ref PAYOUTS_POSTED: Counter = Counter::new(
        "pool_payouts_posted_total",
        "Total number of payout transactions posted"
    ).expect("valid metric");

    pub static ref PAYOUTS_FAILED: Counter = Counter::new(
        "pool_payouts_failed_total",
        "Total number of payout transactions that failed to post"
    ).expect("valid metric");

    pub static ref CURRENT_ROUND: Gauge = Gauge::new(
        "pool_current_round",
        "Identifier of the open round"
    ).expect("valid metric");

    pub static ref PENDING_TRANSACTIONS: Gauge = Gauge::new(
        "pool_pending_transactions",
        "Transactions queued for the next round"
    ).expect("valid metric");

    pub static ref ACTIVE_WORKERS: Gauge = Gauge::new(
        "pool_active_workers",
        "Number of authorized worker connections"
    ).expect("valid metric");

    pub static ref SHARE_VALIDATION_TIME: Histogram = Histogram::with_opts(
        HistogramOpts::new("pool_share_validation_seconds", "Time to validate shares")
    ).expect("valid metric");
}

pub fn register_metrics() -> Result<()> {
    prometheus::register(Box::new(SHARES_SUBMITTED.clone()))?;
    prometheus::register(Box::new(SHARES_ACCEPTED.clone()))?;
    prometheus::register(Box::new(SHARES_REJECTED.clone()))?;
    prometheus::register(Box::new(SHARES_STALE.clone()))?;
    prometheus::register(Box::new(BLOCKS_FOUND.clone()))?;
    prometheus::register(Box::new(ROUNDS_STARTED.clone()))?;
    prometheus::register(Box::new(PAYOUTS_POSTED.clone()))?;
    prometheus::register(Box::new(PAYOUTS_FAILED.clone()))?;
    prometheus::register(Box::new(CURRENT_ROUND.clone()))?;
    prometheus::register(Box::new(PENDING_TRANSACTIONS.clone()))?;
    prometheus::register(Box::new(ACTIVE_WORKERS.clone()))?;
    prometheus::register(Box::new(SHARE_VALIDATION_TIME.clone()))?;
    Ok(())
}

pub fn metrics_handler() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| PoolError::Metrics(prometheus::Error::Msg(e.to_string())))
}
