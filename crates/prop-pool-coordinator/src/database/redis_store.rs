use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::schema::{report_addresses, RoundRecord, WorkerRecord};
use super::RoundStore;
use crate::error::Result;
use crate::payout::PayoutReport;
use crate::types::{Address, RoundId};

const ROUNDS_INDEX: &str = "rounds:index";

fn round_key(round_id: RoundId) -> String {
    format!("round:{}", round_id)
}

fn worker_key(address: &Address) -> String {
    format!("worker:{}", address)
}

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(key).await?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(value)?;
        let _: () = conn.set(key, json).await?;
        Ok(())
    }
}

#[async_trait]
impl RoundStore for RedisStore {
    async fn save_round(&self, record: &RoundRecord) -> Result<()> {
        self.store(&round_key(record.round_id), record).await?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .zadd(ROUNDS_INDEX, record.round_id.0, record.round_id.0)
            .await?;

        for (address, shares) in &record.contributions {
            let key = worker_key(address);
            let mut worker = self
                .load::<WorkerRecord>(&key)
                .await?
                .unwrap_or_else(|| WorkerRecord::new(address.clone()));
            worker.credit_round(record, *shares);
            self.store(&key, &worker).await?;
        }

        debug!("Stored round {} in redis", record.round_id);
        Ok(())
    }

    async fn get_round(&self, round_id: RoundId) -> Result<Option<RoundRecord>> {
        self.load(&round_key(round_id)).await
    }

    async fn recent_rounds(&self, limit: usize) -> Result<Vec<RoundRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let ids: Vec<u64> = conn.zrevrange(ROUNDS_INDEX, 0, limit as isize - 1).await?;

        let mut rounds = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(round) = self.get_round(RoundId(id)).await? {
                rounds.push(round);
            }
        }
        Ok(rounds)
    }

    async fn record_payout_report(&self, report: &PayoutReport) -> Result<()> {
        if let Some(mut round) = self.get_round(report.round_id).await? {
            round.payout_report = Some(report.clone());
            self.store(&round_key(round.round_id), &round).await?;
        }

        for address in report_addresses(report) {
            let key = worker_key(&address);
            if let Some(mut worker) = self.load::<WorkerRecord>(&key).await? {
                worker.apply_report(report);
                self.store(&key, &worker).await?;
            }
        }
        Ok(())
    }

    async fn get_worker(&self, address: &Address) -> Result<Option<WorkerRecord>> {
        self.load(&worker_key(address)).await
    }

    async fn rounds_found(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.zcard(ROUNDS_INDEX).await?;
        Ok(count)
    }
}
