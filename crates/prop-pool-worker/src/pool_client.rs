use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use futures::{SinkExt, StreamExt};
use prop_pool_coordinator::shares::{
    ProofFunction, RoundTemplate, ShareClass, ShareSubmission, ShareValidator,
};
use prop_pool_coordinator::stratum::protocol::{
    METHOD_AUTHORIZE, METHOD_NOTIFY, METHOD_SUBMIT, METHOD_SUBSCRIBE,
};
use prop_pool_coordinator::stratum::{StratumError, StratumMessage, SubmitParams};
use prop_pool_coordinator::types::Address;
use serde_json::json;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const AUTHORIZE_ID: u64 = 1;
const SUBSCRIBE_ID: u64 = 2;
const CHANNEL_BUFFER: usize = 100;

#[derive(Debug, Clone)]
pub struct PoolClientConfig {
    pub pool_url: String,
    pub worker_address: Address,
    pub reconnect_delay: Duration,
}

impl PoolClientConfig {
    pub fn new(pool_url: impl Into<String>, worker_address: Address) -> Self {
        Self {
            pool_url: pool_url.into(),
            worker_address,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// What the pool sent us, reduced to what the worker acts on.
#[derive(Debug)]
pub enum PoolMessage {
    Template(RoundTemplate),
    Ack { id: u64, accepted: bool },
    Error { id: Option<u64>, error: StratumError },
    Other,
}

pub fn parse_pool_message(text: &str) -> anyhow::Result<PoolMessage> {
    let msg: StratumMessage = serde_json::from_str(text).context("malformed pool message")?;
    if let Some(error) = msg.error {
        return Ok(PoolMessage::Error { id: msg.id, error });
    }
    match (msg.method.as_deref(), msg.id) {
        (Some(METHOD_NOTIFY), _) => {
            let params = msg.params.ok_or_else(|| anyhow!("notify without params"))?;
            Ok(PoolMessage::Template(
                serde_json::from_value(params).context("malformed round template")?,
            ))
        }
        (None, Some(id)) => Ok(PoolMessage::Ack {
            id,
            accepted: msg.result.as_ref().and_then(|r| r.as_bool()).unwrap_or(true),
        }),
        _ => Ok(PoolMessage::Other),
    }
}

#[derive(Clone)]
pub struct PoolClient {
    pub config: PoolClientConfig,
    validator: ShareValidator,
    template_receiver: Arc<Mutex<mpsc::Receiver<RoundTemplate>>>,
    share_sender: mpsc::Sender<ShareSubmission>,
    authorized: Arc<RwLock<bool>>,
}

impl PoolClient {
    /// Starts the connection task. It reconnects on its own until the
    /// client and every clone of it are dropped.
    pub fn connect(config: PoolClientConfig, proof: Arc<dyn ProofFunction>) -> Self {
        let (template_tx, template_rx) = mpsc::channel(CHANNEL_BUFFER);
        let (share_tx, share_rx) = mpsc::channel(CHANNEL_BUFFER);

        let client = Self {
            config,
            validator: ShareValidator::new(proof),
            template_receiver: Arc::new(Mutex::new(template_rx)),
            share_sender: share_tx,
            authorized: Arc::new(RwLock::new(false)),
        };

        let config = client.config.clone();
        let authorized = client.authorized.clone();
        tokio::spawn(connection_handler(config, authorized, template_tx, share_rx));

        client
    }

    pub async fn recv_template(&self) -> anyhow::Result<RoundTemplate> {
        let mut receiver = self.template_receiver.lock().await;
        receiver
            .recv()
            .await
            .ok_or_else(|| anyhow!("template channel closed"))
    }

    /// Checks the candidate locally and forwards it only when it counts.
    pub async fn submit_candidate(
        &self,
        template: &RoundTemplate,
        nonce: u64,
    ) -> anyhow::Result<ShareClass> {
        let submission = ShareSubmission {
            worker_address: self.config.worker_address.clone(),
            round_id: template.round_id,
            candidate: template.block.with_proof(nonce),
        };
        let class = self.validator.classify(&submission, template);
        match &class {
            ShareClass::Rejected(reason) => {
                debug!("Not submitting nonce {}: {}", nonce, reason);
            }
            _ => {
                self.share_sender
                    .send(submission)
                    .await
                    .map_err(|_| anyhow!("share channel closed"))?;
            }
        }
        Ok(class)
    }

    pub async fn is_authorized(&self) -> bool {
        *self.authorized.read().await
    }
}

async fn connection_handler(
    config: PoolClientConfig,
    authorized: Arc<RwLock<bool>>,
    template_sender: mpsc::Sender<RoundTemplate>,
    mut share_receiver: mpsc::Receiver<ShareSubmission>,
) {
    loop {
        match connect_and_handle(&config, &authorized, &template_sender, &mut share_receiver).await
        {
            Ok(true) => {
                info!("Pool client stopped");
                return;
            }
            Ok(false) => warn!(
                "Pool connection closed, reconnecting in {:?}",
                config.reconnect_delay
            ),
            Err(e) => error!(
                "Pool connection error: {}, reconnecting in {:?}",
                e, config.reconnect_delay
            ),
        }

        *authorized.write().await = false;
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

/// Returns `Ok(true)` once the local side has gone away.
async fn connect_and_handle(
    config: &PoolClientConfig,
    authorized: &RwLock<bool>,
    template_sender: &mpsc::Sender<RoundTemplate>,
    share_receiver: &mut mpsc::Receiver<ShareSubmission>,
) -> anyhow::Result<bool> {
    let (ws_stream, _) = connect_async(config.pool_url.as_str())
        .await
        .with_context(|| format!("connecting to {}", config.pool_url))?;
    let (mut write, mut read) = ws_stream.split();
    info!("Connected to pool at {}", config.pool_url);

    let subscribe = StratumMessage::request(SUBSCRIBE_ID, METHOD_SUBSCRIBE, json!(["prop-pool-worker"]));
    write.send(Message::Text(serde_json::to_string(&subscribe)?)).await?;
    let authorize = StratumMessage::request(
        AUTHORIZE_ID,
        METHOD_AUTHORIZE,
        json!([config.worker_address.as_str()]),
    );
    write.send(Message::Text(serde_json::to_string(&authorize)?)).await?;

    let mut next_id = SUBSCRIBE_ID + 1;
    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match parse_pool_message(&text) {
                        Ok(PoolMessage::Template(template)) => {
                            debug!("Received round {}", template.round_id);
                            if template_sender.send(template).await.is_err() {
                                return Ok(true);
                            }
                        }
                        Ok(PoolMessage::Ack { id: AUTHORIZE_ID, accepted }) => {
                            *authorized.write().await = accepted;
                            if accepted {
                                info!("Authorized with pool as {}", config.worker_address);
                            }
                        }
                        Ok(PoolMessage::Error { id, error }) => {
                            warn!("Pool error for request {:?}: {}", id, error.message);
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Ignoring pool message: {}", e),
                    },
                    Some(Ok(Message::Close(_))) => {
                        info!("Pool closed connection");
                        return Ok(false);
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(false),
                    _ => {}
                }
            }

            share = share_receiver.recv() => {
                let Some(share) = share else {
                    return Ok(true);
                };
                let params = SubmitParams {
                    round_id: share.round_id,
                    candidate: share.candidate,
                };
                let submit = StratumMessage::request(next_id, METHOD_SUBMIT, serde_json::to_value(&params)?);
                next_id += 1;
                write.send(Message::Text(serde_json::to_string(&submit)?)).await?;
            }
        }
    }
}
