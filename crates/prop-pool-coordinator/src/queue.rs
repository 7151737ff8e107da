use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::metrics::PENDING_TRANSACTIONS;
use crate::types::{Transaction, TxId};

#[derive(Default)]
struct PendingSet {
    order: Vec<Transaction>,
    ids: HashSet<TxId>,
}

/// Transactions waiting for the next round. Shared between the controller
/// and any number of submitters; a drain takes everything under one lock.
#[derive(Clone, Default)]
pub struct TransactionQueue {
    inner: Arc<Mutex<PendingSet>>,
}

impl TransactionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and queues a transaction. Re-queuing one that is already
    /// pending is a no-op.
    pub async fn insert(&self, tx: Transaction) -> Result<TxId> {
        tx.validate()?;
        let id = tx.id();
        let mut pending = self.inner.lock().await;
        if pending.ids.insert(id) {
            pending.order.push(tx);
            PENDING_TRANSACTIONS.set(pending.order.len() as f64);
        } else {
            debug!("Transaction {} already queued", id);
        }
        Ok(id)
    }

    /// Takes every pending transaction in arrival order.
    pub async fn drain(&self) -> Vec<Transaction> {
        let mut pending = self.inner.lock().await;
        pending.ids.clear();
        PENDING_TRANSACTIONS.set(0.0);
        std::mem::take(&mut pending.order)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
