use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value as Json;
use signalhub_bus::Bus;
use signalhub_core::{
    config::{
        EVENTSUB_DEDUP_CAPACITY, EVENTSUB_RATE_LIMIT_SLEEP, EVENTSUB_RECONNECT_BASE,
        EVENTSUB_RECONNECT_CAP, EVENTSUB_SUBSCRIBE_PACING,
    },
    Envelope, Error, Result,
};
use signalhub_storage::TokenStore;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::dedup::DedupSet;
use crate::gift_policy::{self, GiftDecision};
use crate::state::AdapterState;
use crate::topics::{self, CATALOGUE};

const EVENTSUB_WS_URL: &str = "wss://eventsub.wss.twitch.tv/ws";
const HELIX_SUBSCRIPTIONS_URL: &str = "https://api.twitch.tv/helix/eventsub/subscriptions";
const WELCOME_TIMEOUT: Duration = Duration::from_secs(10);
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

pub struct EventSubConfig {
    pub client_id: String,
    pub client_secret: String,
    pub broadcaster_user_id: String,
}

/// Owns the single reconnecting EventSub subscription. Shared across the
/// health-probe scheduler task via `Arc`; the atomic state lets the
/// scheduler read current status without locking.
pub struct EventSubAdapter {
    config: EventSubConfig,
    bus: Arc<dyn Bus>,
    tokens: Arc<TokenStore>,
    dedup: DedupSet,
    http: reqwest::Client,
    state: AtomicU8,
}

impl EventSubAdapter {
    pub fn new(config: EventSubConfig, bus: Arc<dyn Bus>, tokens: Arc<TokenStore>) -> Arc<Self> {
        Arc::new(Self {
            config,
            bus,
            tokens,
            dedup: DedupSet::new(EVENTSUB_DEDUP_CAPACITY),
            http: reqwest::Client::new(),
            state: AtomicU8::new(AdapterState::Disconnected as u8),
        })
    }

    pub fn state(&self) -> AdapterState {
        match self.state.load(Ordering::Relaxed) {
            x if x == AdapterState::Connecting as u8 => AdapterState::Connecting,
            x if x == AdapterState::Ready as u8 => AdapterState::Ready,
            x if x == AdapterState::Subscribing as u8 => AdapterState::Subscribing,
            x if x == AdapterState::Active as u8 => AdapterState::Active,
            x if x == AdapterState::Reconnecting as u8 => AdapterState::Reconnecting,
            x if x == AdapterState::Revoked as u8 => AdapterState::Revoked,
            x if x == AdapterState::Silenced as u8 => AdapterState::Silenced,
            _ => AdapterState::Disconnected,
        }
    }

    fn set_state(&self, s: AdapterState) {
        self.state.store(s as u8, Ordering::Relaxed);
    }

    /// Runs forever (until a `revoked` terminal state), reconnecting with
    /// exponential backoff capped at `EVENTSUB_RECONNECT_CAP`.
    pub async fn run(self: Arc<Self>) {
        let mut backoff = EVENTSUB_RECONNECT_BASE;
        loop {
            self.set_state(AdapterState::Connecting);
            match self.connect_once().await {
                Ok(()) => {
                    info!("eventsub connection closed cleanly, reconnecting");
                    backoff = EVENTSUB_RECONNECT_BASE;
                }
                Err(Error::SubscriptionRevoked(reason)) => {
                    warn!(%reason, "eventsub subscription revoked, not auto-reconnecting");
                    self.set_state(AdapterState::Revoked);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, backoff_secs = backoff.as_secs(), "eventsub connection failed");
                    self.set_state(AdapterState::Reconnecting);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(EVENTSUB_RECONNECT_CAP);
                }
            }
        }
    }

    async fn connect_once(&self) -> Result<()> {
        let (mut ws, _) = tokio_tungstenite::connect_async(EVENTSUB_WS_URL)
            .await
            .map_err(|e| Error::TransientNetwork(format!("eventsub connect failed: {e}")))?;

        let session_id = self.wait_for_welcome(&mut ws).await?;
        self.set_state(AdapterState::Ready);

        self.set_state(AdapterState::Subscribing);
        if let Err(e) = self.subscribe_catalogue(&session_id).await {
            warn!(error = %e, "eventsub subscription batch aborted, reconnecting");
            return Err(e);
        }

        self.set_state(AdapterState::Active);
        self.listen(ws).await
    }

    async fn wait_for_welcome(
        &self,
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> Result<String> {
        loop {
            match tokio::time::timeout(WELCOME_TIMEOUT, ws.next()).await {
                Ok(Some(Ok(WsMessage::Text(text)))) => {
                    let msg: WsEnvelope = serde_json::from_str(&text)?;
                    if msg.metadata.message_type == "session_welcome" {
                        let payload: WelcomePayload = serde_json::from_value(msg.payload)?;
                        info!(session_id = %payload.session.id, "eventsub session welcome");
                        return Ok(payload.session.id);
                    }
                }
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(e))) => {
                    return Err(Error::TransientNetwork(format!("eventsub ws error: {e}")))
                }
                Ok(None) => return Err(Error::TransientNetwork("eventsub closed before welcome".into())),
                Err(_) => return Err(Error::TransientNetwork("eventsub welcome timed out".into())),
            }
        }
    }

    async fn subscribe_catalogue(&self, session_id: &str) -> Result<()> {
        let mut token = self
            .tokens
            .get("twitch", &self.config.broadcaster_user_id)
            .await?
            .ok_or_else(|| Error::AuthExpired("no stored twitch token".into()))?;
        let mut refreshed_once = false;

        let mut i = 0;
        while i < CATALOGUE.len() {
            let (event_type, version) = CATALOGUE[i];
            let condition = condition_for(event_type, &self.config.broadcaster_user_id);
            let body = serde_json::json!({
                "type": event_type,
                "version": version,
                "condition": condition,
                "transport": { "method": "websocket", "session_id": session_id },
            });

            let resp = self
                .http
                .post(HELIX_SUBSCRIPTIONS_URL)
                .bearer_auth(&token.access_token)
                .header("Client-Id", &self.config.client_id)
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::TransientNetwork(format!("subscribe request failed: {e}")))?;

            match resp.status().as_u16() {
                200 | 202 => {}
                409 => {
                    debug!(%event_type, "duplicate_subscription, ignoring");
                }
                429 => {
                    warn!(%event_type, "eventsub subscribe rate limited, sleeping");
                    tokio::time::sleep(EVENTSUB_RATE_LIMIT_SLEEP).await;
                }
                400 => {
                    let text = resp.text().await.unwrap_or_default();
                    if text.contains("websocket transport session does not exist") {
                        return Err(Error::TransientNetwork(
                            "eventsub socket died mid-subscribe".into(),
                        ));
                    }
                    warn!(%event_type, %text, "eventsub subscribe rejected");
                }
                401 if !refreshed_once => {
                    warn!(%event_type, "twitch token rejected, attempting refresh");
                    token = self
                        .tokens
                        .refresh(
                            &self.config.client_id,
                            &self.config.client_secret,
                            "twitch",
                            &self.config.broadcaster_user_id,
                        )
                        .await?;
                    refreshed_once = true;
                    continue; // retry this same subscription with the new token
                }
                401 => return Err(Error::AuthExpired("twitch token rejected after refresh".into())),
                other => {
                    warn!(%event_type, status = other, "unexpected subscribe response");
                }
            }

            tokio::time::sleep(EVENTSUB_SUBSCRIBE_PACING).await;
            i += 1;
        }
        Ok(())
    }

    async fn listen(
        &self,
        mut ws: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> Result<()> {
        loop {
            match tokio::time::timeout(KEEPALIVE_TIMEOUT, ws.next()).await {
                Ok(Some(Ok(WsMessage::Text(text)))) => {
                    self.handle_message(&text).await?;
                }
                Ok(Some(Ok(WsMessage::Ping(data)))) => {
                    let _ = ws.send(WsMessage::Pong(data)).await;
                }
                Ok(Some(Ok(WsMessage::Close(_)))) | Ok(None) => {
                    return Err(Error::TransientNetwork("eventsub socket closed".into()));
                }
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => {
                    return Err(Error::TransientNetwork(format!("eventsub ws error: {e}")))
                }
                Err(_) => return Err(Error::TransientNetwork("eventsub keepalive timeout".into())),
            }
        }
    }

    async fn handle_message(&self, text: &str) -> Result<()> {
        let msg: WsEnvelope = serde_json::from_str(text)?;
        match msg.metadata.message_type.as_str() {
            "session_keepalive" => Ok(()),
            "revocation" => {
                let reason = msg
                    .payload
                    .get("subscription")
                    .and_then(|s| s.get("status"))
                    .and_then(Json::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                Err(Error::SubscriptionRevoked(reason))
            }
            "notification" => {
                self.handle_notification(msg.metadata.message_id, msg.payload).await
            }
            other => {
                debug!(message_type = other, "ignoring unhandled eventsub message type");
                Ok(())
            }
        }
    }

    async fn handle_notification(&self, message_id: Option<String>, payload: Json) -> Result<()> {
        let _ = self
            .bus
            .kv_set(
                signalhub_bus::channels::keys::EVENTSUB_LAST_EVENT_TIME,
                &Utc::now().to_rfc3339(),
            )
            .await;

        let subscription = payload.get("subscription").cloned().unwrap_or_default();
        let event_type = subscription
            .get("type")
            .and_then(Json::as_str)
            .unwrap_or_default()
            .to_string();
        // `subscription.id` is the subscription's own id, constant across every
        // notification of that topic — not usable as a per-event identifier.
        // `metadata.message_id` is the per-notification id.
        let event_id = message_id;
        let event_payload = payload.get("event").cloned().unwrap_or(Json::Null);

        if let Some(id) = &event_id {
            if self.dedup.seen_or_insert(id) {
                debug!(event_id = %id, "dropping duplicate eventsub notification");
                return Ok(());
            }
        }

        if event_type == "channel.chat.notification" {
            match gift_policy::decide(&event_payload) {
                GiftDecision::Drop => return Ok(()),
                GiftDecision::PublishCommunity { community_gift_id } => {
                    let mut envelope =
                        Envelope::new(event_type.clone(), "twitch", event_payload.clone());
                    if let Some(id) = event_id {
                        envelope = envelope.with_event_id(id);
                    }
                    envelope = envelope.with_community_gift_id(community_gift_id);
                    return self.publish(&event_type, envelope).await;
                }
                GiftDecision::PublishTargeted | GiftDecision::NotAGift => {}
            }
        }

        let mut envelope = Envelope::new(event_type.clone(), "twitch", event_payload);
        if let Some(id) = event_id {
            envelope = envelope.with_event_id(id);
        }
        self.publish(&event_type, envelope).await
    }

    async fn publish(&self, event_type: &str, envelope: Envelope) -> Result<()> {
        let channel = topics::channel_for(event_type);
        self.bus.publish(channel, &envelope).await
    }
}

fn condition_for(event_type: &str, broadcaster_user_id: &str) -> Json {
    match event_type {
        "channel.raid" => serde_json::json!({ "to_broadcaster_user_id": broadcaster_user_id }),
        _ => serde_json::json!({ "broadcaster_user_id": broadcaster_user_id }),
    }
}

#[derive(Debug, Deserialize)]
struct WsEnvelope {
    metadata: WsMetadata,
    payload: Json,
}

#[derive(Debug, Deserialize)]
struct WsMetadata {
    message_type: String,
    message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WelcomePayload {
    session: SessionInfo,
}

#[derive(Debug, Deserialize)]
struct SessionInfo {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use signalhub_bus::{channels, BusSubscription};
    use std::sync::Mutex;

    struct RecordingBus {
        published: Mutex<Vec<(String, String)>>,
    }

    impl RecordingBus {
        fn new() -> Self {
            Self {
                published: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Bus for RecordingBus {
        async fn publish(&self, channel: &str, envelope: &Envelope) -> Result<()> {
            self.published
                .lock()
                .unwrap()
                .push((channel.to_string(), envelope.event_type.clone()));
            Ok(())
        }
        async fn subscribe(&self, _channels: &[&str]) -> Result<BusSubscription> {
            unimplemented!("not exercised in these tests")
        }
        async fn kv_get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn kv_set(&self, _key: &str, _value: &str) -> Result<()> {
            Ok(())
        }
        async fn kv_set_ex(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<()> {
            Ok(())
        }
        async fn kv_set_nx_ex(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<bool> {
            Ok(true)
        }
        async fn kv_del(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    fn adapter(bus: Arc<dyn Bus>) -> EventSubAdapter {
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/unused").expect("lazy pool construction");
        EventSubAdapter {
            config: EventSubConfig {
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                broadcaster_user_id: "123".to_string(),
            },
            bus,
            tokens: Arc::new(TokenStore::new(pool, &[3u8; 32]).unwrap()),
            dedup: DedupSet::new(EVENTSUB_DEDUP_CAPACITY),
            http: reqwest::Client::new(),
            state: AtomicU8::new(AdapterState::Disconnected as u8),
        }
    }

    #[test]
    fn condition_for_raid_uses_to_broadcaster_key() {
        assert_eq!(
            condition_for("channel.raid", "123"),
            serde_json::json!({ "to_broadcaster_user_id": "123" })
        );
        assert_eq!(
            condition_for("channel.follow", "123"),
            serde_json::json!({ "broadcaster_user_id": "123" })
        );
    }

    #[tokio::test]
    async fn notification_routes_to_twitch_channel_by_default() {
        let bus = Arc::new(RecordingBus::new());
        let a = adapter(bus.clone());
        let payload = serde_json::json!({
            "subscription": {"type": "channel.follow", "id": "sub-1"},
            "event": {"user_name": "alice"},
        });
        a.handle_notification(Some("msg-1".to_string()), payload).await.unwrap();

        let published = bus.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, channels::TWITCH);
        assert_eq!(published[0].1, "channel.follow");
    }

    #[tokio::test]
    async fn duplicate_message_id_is_dropped() {
        let bus = Arc::new(RecordingBus::new());
        let a = adapter(bus.clone());
        let payload = serde_json::json!({
            "subscription": {"type": "channel.follow", "id": "sub-dup"},
            "event": {},
        });
        a.handle_notification(Some("msg-dup".to_string()), payload.clone())
            .await
            .unwrap();
        a.handle_notification(Some("msg-dup".to_string()), payload)
            .await
            .unwrap();
        assert_eq!(bus.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_subscription_id_with_distinct_message_ids_are_not_deduped() {
        // subscription.id is constant for every notification of a topic; only
        // metadata.message_id identifies a single event.
        let bus = Arc::new(RecordingBus::new());
        let a = adapter(bus.clone());
        let payload = serde_json::json!({
            "subscription": {"type": "channel.follow", "id": "sub-shared"},
            "event": {"user_name": "alice"},
        });
        a.handle_notification(Some("msg-a".to_string()), payload.clone())
            .await
            .unwrap();
        a.handle_notification(Some("msg-b".to_string()), payload)
            .await
            .unwrap();
        assert_eq!(bus.published.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn per_recipient_gift_sub_with_community_id_is_dropped() {
        let bus = Arc::new(RecordingBus::new());
        let a = adapter(bus.clone());
        let payload = serde_json::json!({
            "subscription": {"type": "channel.chat.notification", "id": "sub-2"},
            "event": {
                "notice_type": "sub_gift",
                "sub_gift": {"community_gift_id": "G1"},
            },
        });
        a.handle_notification(Some("msg-2".to_string()), payload)
            .await
            .unwrap();
        assert!(bus.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn community_gift_notification_routes_to_chat_channel() {
        let bus = Arc::new(RecordingBus::new());
        let a = adapter(bus.clone());
        let payload = serde_json::json!({
            "subscription": {"type": "channel.chat.notification", "id": "sub-3"},
            "event": {
                "notice_type": "community_sub_gift",
                "community_sub_gift": {"id": "G2", "total": 3},
            },
        });
        a.handle_notification(Some("msg-3".to_string()), payload)
            .await
            .unwrap();

        let published = bus.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, channels::CHAT);
    }
}
