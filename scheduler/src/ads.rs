use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use signalhub_bus::{channels, Bus};
use signalhub_core::config::{AD_DURATION_SECONDS, AD_INTERVAL_MINUTES, AD_RETRY_MINUTES, AD_WARNING_WINDOW_SECS};
use signalhub_core::{Envelope, Result};
use signalhub_storage::TokenStore;
use tracing::{info, warn};

const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);
const WARNING_LOCK_TTL_SECS: u64 = 10;
const HELIX_START_COMMERCIAL_URL: &str = "https://api.twitch.tv/helix/channels/commercial";

pub struct AdSchedulerConfig {
    pub client_id: String,
    pub client_secret: String,
    pub broadcaster_user_id: String,
}

/// Drives the ad-break warning/start cycle from shared KV state (§4.7).
/// Any number of server instances can run this tick concurrently — the
/// `ads:warning_lock` NX+EX key ensures only one of them actually announces
/// the warning window.
pub struct AdScheduler {
    config: AdSchedulerConfig,
    bus: Arc<dyn Bus>,
    tokens: Arc<TokenStore>,
    http: reqwest::Client,
}

impl AdScheduler {
    pub fn new(config: AdSchedulerConfig, bus: Arc<dyn Bus>, tokens: Arc<TokenStore>) -> Arc<Self> {
        Arc::new(Self {
            config,
            bus,
            tokens,
            http: reqwest::Client::new(),
        })
    }

    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                warn!(error = %e, "ad scheduler tick failed");
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        let enabled = self
            .bus
            .kv_get(channels::keys::ADS_ENABLED)
            .await?
            .map(|v| v == "true")
            .unwrap_or(false);
        if !enabled {
            return Ok(());
        }

        let next_time = match self.bus.kv_get(channels::keys::ADS_NEXT_TIME).await? {
            Some(raw) => raw,
            None => return Ok(()),
        };
        let next_time: DateTime<Utc> = match next_time.parse() {
            Ok(t) => t,
            Err(_) => {
                warn!(%next_time, "ads:next_time is timezone-naive or unparsable, disabling ads");
                self.bus.kv_set(channels::keys::ADS_ENABLED, "false").await?;
                return Ok(());
            }
        };

        let seconds_until = (next_time - Utc::now()).num_seconds();
        let warning_active = self
            .bus
            .kv_get(channels::keys::ADS_WARNING_ACTIVE)
            .await?
            .map(|v| v == "true")
            .unwrap_or(false);

        if seconds_until <= 0 {
            return self.start_commercial().await;
        }

        if seconds_until as u64 <= AD_WARNING_WINDOW_SECS {
            if !warning_active {
                let acquired = self
                    .bus
                    .kv_set_nx_ex(channels::keys::ADS_WARNING_LOCK, "1", WARNING_LOCK_TTL_SECS)
                    .await?;
                if acquired {
                    self.bus.kv_set(channels::keys::ADS_WARNING_ACTIVE, "true").await?;
                    self.announce(seconds_until).await?;
                }
            } else {
                // Re-announce every tick inside the window rather than waiting
                // for an exact-second mark, which the 10s tick cadence would
                // usually step over.
                self.announce(seconds_until).await?;
            }
        }

        Ok(())
    }

    async fn announce(&self, seconds_remaining: i64) -> Result<()> {
        let envelope = Envelope::new(
            "ads.warning",
            "scheduler",
            json!({ "seconds_remaining": seconds_remaining }),
        );
        self.bus.publish(channels::ADS, &envelope).await?;
        self.bus.publish(channels::BOT_ADS, &envelope).await
    }

    async fn start_commercial(&self) -> Result<()> {
        let token = match self.tokens.get("twitch", &self.config.broadcaster_user_id).await? {
            Some(t) => t,
            None => {
                warn!("no stored twitch token, cannot start commercial, retrying later");
                return self.reschedule(AD_RETRY_MINUTES).await;
            }
        };

        let resp = self.request_commercial(&token.access_token).await;

        match resp {
            Ok(r) if r.status().is_success() => {
                info!("ad commercial started");
                self.bus.kv_set(channels::keys::ADS_WARNING_ACTIVE, "false").await?;
                self.bus.kv_del(channels::keys::ADS_WARNING_LOCK).await?;
                self.reschedule(AD_INTERVAL_MINUTES).await
            }
            Ok(r) if r.status().as_u16() == 401 => {
                warn!("twitch token rejected starting commercial, refreshing and retrying later");
                if let Err(e) = self
                    .tokens
                    .refresh(
                        &self.config.client_id,
                        &self.config.client_secret,
                        "twitch",
                        &self.config.broadcaster_user_id,
                    )
                    .await
                {
                    warn!(error = %e, "token refresh failed");
                }
                self.reschedule(AD_RETRY_MINUTES).await
            }
            Ok(r) => {
                warn!(status = %r.status(), "start commercial rejected, retrying later");
                self.reschedule(AD_RETRY_MINUTES).await
            }
            Err(e) => {
                warn!(error = %e, "start commercial request failed, retrying later");
                self.reschedule(AD_RETRY_MINUTES).await
            }
        }
    }

    async fn request_commercial(&self, access_token: &str) -> std::result::Result<reqwest::Response, reqwest::Error> {
        self.http
            .post(HELIX_START_COMMERCIAL_URL)
            .bearer_auth(access_token)
            .header("Client-Id", &self.config.client_id)
            .json(&json!({
                "broadcaster_id": self.config.broadcaster_user_id,
                "length": AD_DURATION_SECONDS,
            }))
            .send()
            .await
    }

    async fn reschedule(&self, minutes: i64) -> Result<()> {
        let next = Utc::now() + chrono::Duration::minutes(minutes);
        self.bus
            .kv_set(channels::keys::ADS_NEXT_TIME, &next.to_rfc3339())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use signalhub_bus::BusSubscription;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeBus {
        kv: Mutex<HashMap<String, String>>,
        published: Mutex<Vec<String>>,
    }

    impl FakeBus {
        fn new() -> Self {
            Self {
                kv: Mutex::new(HashMap::new()),
                published: Mutex::new(Vec::new()),
            }
        }

        fn set(&self, key: &str, value: &str) {
            self.kv.lock().unwrap().insert(key.to_string(), value.to_string());
        }

        fn get(&self, key: &str) -> Option<String> {
            self.kv.lock().unwrap().get(key).cloned()
        }
    }

    #[async_trait]
    impl Bus for FakeBus {
        async fn publish(&self, _channel: &str, envelope: &Envelope) -> Result<()> {
            self.published.lock().unwrap().push(envelope.event_type.clone());
            Ok(())
        }
        async fn subscribe(&self, _channels: &[&str]) -> Result<BusSubscription> {
            unimplemented!("not exercised in these tests")
        }
        async fn kv_get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.get(key))
        }
        async fn kv_set(&self, key: &str, value: &str) -> Result<()> {
            self.set(key, value);
            Ok(())
        }
        async fn kv_set_ex(&self, key: &str, value: &str, _ttl_secs: u64) -> Result<()> {
            self.set(key, value);
            Ok(())
        }
        async fn kv_set_nx_ex(&self, key: &str, value: &str, _ttl_secs: u64) -> Result<bool> {
            let mut kv = self.kv.lock().unwrap();
            if kv.contains_key(key) {
                Ok(false)
            } else {
                kv.insert(key.to_string(), value.to_string());
                Ok(true)
            }
        }
        async fn kv_del(&self, key: &str) -> Result<()> {
            self.kv.lock().unwrap().remove(key);
            Ok(())
        }
    }

    fn scheduler(bus: Arc<FakeBus>) -> AdScheduler {
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/unused").expect("lazy pool construction");
        AdScheduler {
            config: AdSchedulerConfig {
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                broadcaster_user_id: "123".to_string(),
            },
            bus,
            tokens: Arc::new(signalhub_storage::TokenStore::new(pool, &[9u8; 32]).unwrap()),
            http: reqwest::Client::new(),
        }
    }

    #[tokio::test]
    async fn disabled_ads_are_a_no_op() {
        let bus = Arc::new(FakeBus::new());
        bus.set(channels::keys::ADS_ENABLED, "false");
        scheduler(bus.clone()).tick().await.unwrap();
        assert!(bus.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn far_from_next_break_stays_quiet() {
        let bus = Arc::new(FakeBus::new());
        bus.set(channels::keys::ADS_ENABLED, "true");
        let next = Utc::now() + chrono::Duration::minutes(20);
        bus.set(channels::keys::ADS_NEXT_TIME, &next.to_rfc3339());
        scheduler(bus.clone()).tick().await.unwrap();
        assert!(bus.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn entering_warning_window_announces_once_and_acquires_lock() {
        let bus = Arc::new(FakeBus::new());
        bus.set(channels::keys::ADS_ENABLED, "true");
        let next = Utc::now() + chrono::Duration::seconds(45);
        bus.set(channels::keys::ADS_NEXT_TIME, &next.to_rfc3339());
        scheduler(bus.clone()).tick().await.unwrap();

        assert_eq!(bus.published.lock().unwrap().len(), 2); // ads + bot_ads channels
        assert_eq!(bus.get(channels::keys::ADS_WARNING_ACTIVE), Some("true".to_string()));
    }

    #[tokio::test]
    async fn every_tick_inside_an_active_warning_window_re_announces() {
        let bus = Arc::new(FakeBus::new());
        bus.set(channels::keys::ADS_ENABLED, "true");
        bus.set(channels::keys::ADS_WARNING_ACTIVE, "true");
        let next = Utc::now() + chrono::Duration::seconds(30);
        bus.set(channels::keys::ADS_NEXT_TIME, &next.to_rfc3339());
        let s = scheduler(bus.clone());
        s.tick().await.unwrap();
        s.tick().await.unwrap();
        assert_eq!(bus.published.lock().unwrap().len(), 4); // two announces, two channels each
    }

    #[tokio::test]
    async fn unparsable_next_time_disables_ads() {
        let bus = Arc::new(FakeBus::new());
        bus.set(channels::keys::ADS_ENABLED, "true");
        bus.set(channels::keys::ADS_NEXT_TIME, "not-a-timestamp");
        scheduler(bus.clone()).tick().await.unwrap();
        assert_eq!(bus.get(channels::keys::ADS_ENABLED), Some("false".to_string()));
    }
}
