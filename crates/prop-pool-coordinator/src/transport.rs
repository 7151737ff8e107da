use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "NEW_POOL_BLOCK")]
    NewPoolBlock,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::NewPoolBlock => "NEW_POOL_BLOCK",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound fan-out to workers. Delivery is best effort: the coordinator
/// logs failures and carries on.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn broadcast(&self, topic: Topic, payload: Value) -> Result<()>;
}

/// In-process transport backed by a tokio broadcast channel.
#[derive(Clone)]
pub struct ChannelTransport {
    sender: broadcast::Sender<(Topic, Value)>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(Topic, Value)> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn broadcast(&self, topic: Topic, payload: Value) -> Result<()> {
        if self.sender.send((topic, payload)).is_err() {
            debug!("No subscribers for {}", topic);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn channel_transport_fans_out() {
        let transport = ChannelTransport::new(8);
        let mut a = transport.subscribe();
        let mut b = transport.subscribe();

        transport
            .broadcast(Topic::NewPoolBlock, json!({ "round_id": 1 }))
            .await
            .unwrap();

        assert_eq!(a.recv().await.unwrap().1["round_id"], 1);
        assert_eq!(b.recv().await.unwrap().0, Topic::NewPoolBlock);
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_ok() {
        let transport = ChannelTransport::new(8);
        assert!(transport.broadcast(Topic::NewPoolBlock, json!(null)).await.is_ok());
    }
}
