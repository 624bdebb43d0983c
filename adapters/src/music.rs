use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as Json;
use signalhub_bus::{channels, Bus};
use signalhub_core::{Envelope, Result};
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(10);
const BREAKER_CAP: Duration = Duration::from_secs(60);

pub struct MusicPollerConfig {
    pub poll_url: String,
}

/// Polls an HTTP "now playing" endpoint every 10s, diffing against the last
/// seen track to publish only on change, with a circuit breaker that backs
/// off consecutive failures up to a 60s cap (§4.8).
pub struct MusicPoller {
    config: MusicPollerConfig,
    bus: Arc<dyn Bus>,
    http: reqwest::Client,
}

impl MusicPoller {
    pub fn new(config: MusicPollerConfig, bus: Arc<dyn Bus>) -> Arc<Self> {
        Arc::new(Self {
            config,
            bus,
            http: reqwest::Client::new(),
        })
    }

    pub async fn run(self: Arc<Self>) {
        let mut last_track: Option<Json> = None;
        let mut consecutive_failures: u32 = 0;

        loop {
            match self.poll_once().await {
                Ok(track) => {
                    consecutive_failures = 0;
                    if track != last_track {
                        if let Err(e) = self.publish_update(&track).await {
                            warn!(error = %e, "failed to publish music update");
                        }
                        if track.is_none() {
                            info!("music poller: tuned out");
                        }
                        last_track = track;
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    let delay = breaker_delay(consecutive_failures);
                    warn!(error = %e, failures = consecutive_failures, delay_secs = delay.as_secs(), "music poll failed");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn poll_once(&self) -> Result<Option<Json>> {
        let resp = self
            .http
            .get(&self.config.poll_url)
            .send()
            .await
            .map_err(|e| signalhub_core::Error::ExternalServiceDown(format!("music poll failed: {e}")))?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let body: Json = resp
            .json()
            .await
            .map_err(|e| signalhub_core::Error::ProtocolBroken(format!("music response not json: {e}")))?;
        if body.get("playing").and_then(Json::as_bool) == Some(false) {
            return Ok(None);
        }
        Ok(Some(body))
    }

    async fn publish_update(&self, track: &Option<Json>) -> Result<()> {
        let (event_type, payload) = match track {
            Some(t) => ("music.update", t.clone()),
            None => ("music.update", Json::Object(Default::default())),
        };
        let cached = serde_json::to_string(&payload).unwrap_or_default();
        let _ = self.bus.kv_set(channels::keys::MUSIC_CURRENT_TRACK, &cached).await;
        let envelope = Envelope::new(event_type, "music", payload);
        self.bus.publish(channels::MUSIC, &envelope).await
    }
}

/// Exponential backoff on consecutive failures, capped at `BREAKER_CAP`.
fn breaker_delay(failures: u32) -> Duration {
    let secs = 2u64.saturating_pow(failures.min(6)).min(BREAKER_CAP.as_secs());
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_caps_at_sixty_seconds() {
        assert_eq!(breaker_delay(1), Duration::from_secs(2));
        assert_eq!(breaker_delay(10), BREAKER_CAP);
    }
}
