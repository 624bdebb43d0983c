use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value as Json};
use sha2::{Digest, Sha256};
use signalhub_bus::{channels, Bus};
use signalhub_core::{Envelope, Error, Result};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const OBS_RPC_VERSION: u32 = 1;
const STATS_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct ObsConfig {
    pub websocket_url: String,
    pub password: Option<String>,
}

/// Long-lived WebSocket client to the scene compositor (§4.8). Reconnects
/// on any error with a fixed delay — unlike EventSub this isn't a platform
/// with rate limits to respect, so no backoff ladder is needed.
pub struct ObsAdapter {
    config: ObsConfig,
    bus: Arc<dyn Bus>,
}

impl ObsAdapter {
    pub fn new(config: ObsConfig, bus: Arc<dyn Bus>) -> Arc<Self> {
        Arc::new(Self { config, bus })
    }

    pub async fn run(self: Arc<Self>) {
        loop {
            if let Err(e) = self.connect_once().await {
                warn!(error = %e, "obs adapter connection lost, reconnecting");
                let _ = self
                    .bus
                    .kv_set(channels::keys::OBS_STREAMING_ACTIVE, "false")
                    .await;
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn connect_once(&self) -> Result<()> {
        let (mut ws, _) = tokio_tungstenite::connect_async(&self.config.websocket_url)
            .await
            .map_err(|e| Error::ExternalServiceDown(format!("obs connect failed: {e}")))?;
        info!("connected to obs websocket, awaiting hello");

        self.identify(&mut ws).await?;
        info!("obs websocket identified");

        let mut sampler = PerformanceSampler::default();
        let mut stats_tick = tokio::time::interval(STATS_POLL_INTERVAL);

        loop {
            tokio::select! {
                msg = ws.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            if let Err(e) = self.handle_op_message(&text, &mut sampler).await {
                                warn!(error = %e, "dropping malformed obs message");
                            }
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            let _ = ws.send(WsMessage::Pong(data)).await;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(Error::ExternalServiceDown(format!("obs ws error: {e}"))),
                    }
                }
                _ = stats_tick.tick() => {
                    let request = json!({
                        "op": 6,
                        "d": { "requestType": "GetStats", "requestId": "signalhub-stats" },
                    });
                    let _ = ws.send(WsMessage::Text(request.to_string())).await;
                }
            }
        }
    }

    /// OBS WebSocket v5 handshake: Hello (op 0) carries an optional
    /// challenge/salt pair when authentication is enabled; the response
    /// hash is `base64(sha256(base64(sha256(password+salt)) + challenge))`.
    async fn identify(
        &self,
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> Result<()> {
        let hello = loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let msg: OpMessage = serde_json::from_str(&text)?;
                    if msg.op == 0 {
                        break msg.d;
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(Error::ExternalServiceDown(format!("obs ws error: {e}"))),
                None => return Err(Error::ExternalServiceDown("obs closed before hello".into())),
            }
        };

        let mut identify = json!({ "rpcVersion": OBS_RPC_VERSION });
        if let Some(auth) = hello.get("authentication") {
            let challenge = auth.get("challenge").and_then(Json::as_str).unwrap_or_default();
            let salt = auth.get("salt").and_then(Json::as_str).unwrap_or_default();
            let password = self.config.password.as_deref().ok_or_else(|| {
                Error::Configuration("obs requires a password but none is configured".into())
            })?;
            let response = authentication_string(password, salt, challenge);
            identify["authentication"] = Json::String(response);
        }

        let frame = json!({ "op": 1, "d": identify });
        ws.send(WsMessage::Text(frame.to_string()))
            .await
            .map_err(|e| Error::ExternalServiceDown(format!("obs identify send failed: {e}")))?;

        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let msg: OpMessage = serde_json::from_str(&text)?;
                    match msg.op {
                        2 => return Ok(()),
                        _ => continue,
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(Error::ExternalServiceDown(format!("obs ws error: {e}"))),
                None => return Err(Error::ExternalServiceDown("obs closed before identified".into())),
            }
        }
    }

    async fn handle_op_message(&self, text: &str, sampler: &mut PerformanceSampler) -> Result<()> {
        let msg: OpMessage = serde_json::from_str(text)?;
        match msg.op {
            5 => self.handle_event(msg.d).await,
            7 => self.handle_request_response(msg.d, sampler).await,
            _ => Ok(()),
        }
    }

    async fn handle_event(&self, payload: Json) -> Result<()> {
        let event_type = payload
            .get("eventType")
            .and_then(Json::as_str)
            .unwrap_or("obs.unknown")
            .to_string();
        let event_data = payload.get("eventData").cloned().unwrap_or(Json::Null);

        match event_type.as_str() {
            "CurrentProgramSceneChanged" => {
                let scene = event_data.get("sceneName").and_then(Json::as_str).unwrap_or_default();
                let _ = self.bus.kv_set(channels::keys::OBS_SCENE_CURRENT, scene).await;
                self.publish("obs.scene.changed", event_data).await
            }
            "RecordStateChanged" => {
                let active = event_data.get("outputActive").and_then(Json::as_bool).unwrap_or(false);
                let _ = self
                    .bus
                    .kv_set(channels::keys::OBS_RECORDING_ACTIVE, &active.to_string())
                    .await;
                self.publish("obs.recording.changed", event_data).await
            }
            "StreamStateChanged" => {
                let active = event_data.get("outputActive").and_then(Json::as_bool).unwrap_or(false);
                let _ = self
                    .bus
                    .kv_set(channels::keys::OBS_STREAMING_ACTIVE, &active.to_string())
                    .await;
                self.publish("obs.streaming.changed", event_data).await
            }
            "InputMuteStateChanged" => self.publish("obs.input.muted", event_data).await,
            _ => Ok(()),
        }
    }

    async fn handle_request_response(&self, payload: Json, sampler: &mut PerformanceSampler) -> Result<()> {
        if payload.get("requestId").and_then(Json::as_str) != Some("signalhub-stats") {
            return Ok(());
        }
        let response_data = payload.get("responseData").cloned().unwrap_or(Json::Null);
        let output_skipped = response_data.get("outputSkippedFrames").and_then(Json::as_i64).unwrap_or(0);
        let output_total = response_data.get("outputTotalFrames").and_then(Json::as_i64).unwrap_or(0);
        let render_skipped = response_data.get("renderSkippedFrames").and_then(Json::as_i64).unwrap_or(0);
        let render_total = response_data.get("renderTotalFrames").and_then(Json::as_i64).unwrap_or(0);

        let sample = sampler.observe(output_skipped, output_total, render_skipped, render_total);
        self.bus
            .kv_set(channels::keys::OBS_PERF_PREV_OUTPUT_SKIPPED, &output_skipped.to_string())
            .await?;
        self.bus
            .kv_set(channels::keys::OBS_PERF_PREV_OUTPUT_TOTAL, &output_total.to_string())
            .await?;
        self.bus
            .kv_set(channels::keys::OBS_PERF_PREV_RENDER_SKIPPED, &render_skipped.to_string())
            .await?;
        self.bus
            .kv_set(channels::keys::OBS_PERF_PREV_RENDER_TOTAL, &render_total.to_string())
            .await?;
        self.bus
            .kv_set(
                channels::keys::OBS_PERF_WARNING_ACTIVE,
                &sample.warning.to_string(),
            )
            .await?;

        self.publish(
            "obs.performance",
            json!({
                "skippedOutputRatio": sample.skipped_output_ratio,
                "skippedRenderRatio": sample.skipped_render_ratio,
                "warning": sample.warning,
            }),
        )
        .await
    }

    async fn publish(&self, event_type: &str, payload: Json) -> Result<()> {
        let envelope = Envelope::new(event_type, "obs", payload);
        self.bus.publish(channels::OBS, &envelope).await
    }
}

fn authentication_string(password: &str, salt: &str, challenge: &str) -> String {
    let base64 = base64::engine::general_purpose::STANDARD;
    let secret = Sha256::digest([password.as_bytes(), salt.as_bytes()].concat());
    let secret_b64 = base64.encode(secret);
    let auth = Sha256::digest([secret_b64.as_bytes(), challenge.as_bytes()].concat());
    base64.encode(auth)
}

#[derive(serde::Deserialize)]
struct OpMessage {
    op: u8,
    d: Json,
}

/// Diffs consecutive `GetStats` samples into a warning flag; OBS reports
/// cumulative frame counts, not deltas, so the ratio over a window is
/// `(skipped_now - skipped_prev) / (total_now - total_prev)`.
#[derive(Default)]
struct PerformanceSampler {
    prev: Option<(i64, i64, i64, i64)>,
}

struct PerformanceSample {
    skipped_output_ratio: f64,
    skipped_render_ratio: f64,
    warning: bool,
}

const SKIPPED_FRAME_WARNING_RATIO: f64 = 0.05;

impl PerformanceSampler {
    fn observe(&mut self, output_skipped: i64, output_total: i64, render_skipped: i64, render_total: i64) -> PerformanceSample {
        let ratio = |skipped_prev: i64, skipped_now: i64, total_prev: i64, total_now: i64| -> f64 {
            let d_total = (total_now - total_prev).max(0);
            if d_total == 0 {
                return 0.0;
            }
            let d_skipped = (skipped_now - skipped_prev).max(0);
            d_skipped as f64 / d_total as f64
        };

        let (skipped_output_ratio, skipped_render_ratio) = match self.prev {
            Some((op, ot, rp, rt)) => (
                ratio(op, output_skipped, ot, output_total),
                ratio(rp, render_skipped, rt, render_total),
            ),
            None => (0.0, 0.0),
        };
        self.prev = Some((output_skipped, output_total, render_skipped, render_total));

        let warning = skipped_output_ratio >= SKIPPED_FRAME_WARNING_RATIO
            || skipped_render_ratio >= SKIPPED_FRAME_WARNING_RATIO;

        PerformanceSample {
            skipped_output_ratio,
            skipped_render_ratio,
            warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_string_is_deterministic_for_same_inputs() {
        let a = authentication_string("hunter2", "salt123", "challenge456");
        let b = authentication_string("hunter2", "salt123", "challenge456");
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn authentication_string_differs_with_password() {
        let a = authentication_string("hunter2", "salt123", "challenge456");
        let b = authentication_string("different", "salt123", "challenge456");
        assert_ne!(a, b);
    }

    #[test]
    fn sampler_is_quiet_on_first_observation() {
        let mut sampler = PerformanceSampler::default();
        let sample = sampler.observe(0, 1000, 0, 1000);
        assert_eq!(sample.skipped_output_ratio, 0.0);
        assert!(!sample.warning);
    }

    #[test]
    fn sampler_flags_warning_when_skip_ratio_crosses_threshold() {
        let mut sampler = PerformanceSampler::default();
        sampler.observe(0, 1000, 0, 1000);
        let sample = sampler.observe(100, 2000, 0, 2000); // 100/1000 = 10% skipped output
        assert!(sample.skipped_output_ratio >= SKIPPED_FRAME_WARNING_RATIO);
        assert!(sample.warning);
    }

    #[test]
    fn sampler_stays_quiet_below_threshold() {
        let mut sampler = PerformanceSampler::default();
        sampler.observe(0, 1000, 0, 1000);
        let sample = sampler.observe(1, 2000, 0, 2000); // 1/1000 = 0.1% skipped output
        assert!(!sample.warning);
    }
}
