//! Redis-backed event bus: publish/subscribe over the channel taxonomy in
//! [`channels`], plus the small KV surface (`NX EX` locks, ephemeral
//! counters) the scheduler and EventSub adapter share with overlay
//! consumers. Not a durable log — subscribers only see messages published
//! after they subscribe (spec §4.1 Non-goals).

pub mod channels;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use signalhub_core::{Envelope, Error, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A message delivered to a subscriber: the channel it arrived on and the
/// decoded envelope. Malformed payloads are logged and dropped rather than
/// propagated, so the overlay listener never has to handle a parse error.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: String,
    pub envelope: Envelope,
}

/// A live subscription. Dropping it (or calling [`BusSubscription::close`])
/// cancels the background reader task.
pub struct BusSubscription {
    rx: mpsc::Receiver<BusMessage>,
    cancel: CancellationToken,
}

impl BusSubscription {
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, channel: &str, envelope: &Envelope) -> Result<()>;

    /// Subscribe to one or more channels. Delivery order within a single
    /// channel matches publication order for this subscriber; there is no
    /// ordering guarantee across channels.
    async fn subscribe(&self, channels: &[&str]) -> Result<BusSubscription>;

    async fn kv_get(&self, key: &str) -> Result<Option<String>>;
    async fn kv_set(&self, key: &str, value: &str) -> Result<()>;
    async fn kv_set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
    /// `SET key value NX EX ttl_secs` — returns `true` if this call acquired
    /// the lock, `false` if another holder already has it.
    async fn kv_set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;
    async fn kv_del(&self, key: &str) -> Result<()>;
}

pub struct RedisBus {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisBus {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client =
            redis::Client::open(redis_url).map_err(|e| Error::Bus(format!("invalid redis url: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::Bus(format!("failed to connect to redis: {e}")))?;
        Ok(Self { client, manager })
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, channel: &str, envelope: &Envelope) -> Result<()> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.manager.clone();
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| Error::Bus(format!("publish to {channel} failed: {e}")))?;
        Ok(())
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<BusSubscription> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| Error::Bus(format!("failed to open pubsub connection: {e}")))?;

        for channel in channels {
            pubsub
                .subscribe(*channel)
                .await
                .map_err(|e| Error::Bus(format!("subscribe to {channel} failed: {e}")))?;
        }

        let (tx, rx) = mpsc::channel(1024);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        debug!("bus subscription cancelled");
                        break;
                    }
                    msg = futures_util::StreamExt::next(&mut stream) => {
                        let Some(msg) = msg else { break };
                        let channel = msg.get_channel_name().to_string();
                        let payload: String = match msg.get_payload() {
                            Ok(p) => p,
                            Err(e) => {
                                warn!(%channel, error = %e, "dropping non-utf8 bus message");
                                continue;
                            }
                        };
                        match serde_json::from_str::<Envelope>(&payload) {
                            Ok(envelope) => {
                                if tx.send(BusMessage { channel, envelope }).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(%channel, error = %e, "dropping malformed bus message");
                            }
                        }
                    }
                }
            }
        });

        Ok(BusSubscription { rx, cancel })
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key)
            .await
            .map_err(|e| Error::Bus(format!("GET {key} failed: {e}")))
    }

    async fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| Error::Bus(format!("SET {key} failed: {e}")))
    }

    async fn kv_set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs)
            .await
            .map_err(|e| Error::Bus(format!("SET {key} EX {ttl_secs} failed: {e}")))
    }

    async fn kv_set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.manager.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Bus(format!("SET {key} NX EX {ttl_secs} failed: {e}")))?;
        Ok(result.is_some())
    }

    async fn kv_del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| Error::Bus(format!("DEL {key} failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trips_through_json() {
        let env = Envelope::new("channel.follow", "twitch", json!({"user": "alice"}))
            .with_event_id("evt-1");
        let encoded = serde_json::to_string(&env).unwrap();
        let decoded: Envelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.event_type, "channel.follow");
        assert_eq!(decoded.event_id.as_deref(), Some("evt-1"));
    }
}
