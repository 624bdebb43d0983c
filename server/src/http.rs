//! HTTP and WebSocket surface (§4.6, §6, §9): the overlay multiplexer, three
//! thin forwarding sockets (events/ads/music), the binary audio intake, the
//! FFBot HTTP intake, and the `/metrics`/`/healthz` ambient endpoints.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value as Json_;
use signalhub_adapters::game_http;
use signalhub_bus::channels;
use signalhub_core::Envelope;
use signalhub_overlay::OverlaySession;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::state::Services;

pub fn create_router(services: Services) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws/overlay/", get(overlay_ws_handler))
        .route("/ws/events/", get(events_ws_handler))
        .route("/ws/ads/", get(ads_ws_handler))
        .route("/ws/music/", get(music_ws_handler))
        .route("/ws/audio/", get(audio_ws_handler))
        .route("/api/games/ffbot/", post(ffbot_intake_handler))
        .with_state(services)
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Prometheus text exposition, hand-rendered from `Services::metrics`.
async fn metrics_handler(State(services): State<Services>) -> impl IntoResponse {
    (StatusCode::OK, services.metrics.render_prometheus())
}

async fn overlay_ws_handler(
    ws: WebSocketUpgrade,
    State(services): State<Services>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_overlay_socket(socket, services))
}

async fn handle_overlay_socket(socket: WebSocket, services: Services) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel(256);

    let session = OverlaySession::new(services.store.clone(), services.bus.clone());
    let connection_id = session.connection_id;
    services.metrics.overlay_connection_opened();
    info!(%connection_id, "overlay connection opened");

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "failed to encode overlay frame");
                    continue;
                }
            };
            if sender.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let drain_inbound = tokio::spawn(async move {
        // The overlay protocol is server-push only; any client frame is a
        // keepalive we can discard, but we must drain the socket so a close
        // is observed promptly.
        while receiver.next().await.is_some() {}
    });

    if let Err(e) = session.run(tx).await {
        warn!(%connection_id, error = %e, "overlay session ended with error");
    }

    writer.abort();
    drain_inbound.abort();
    services.metrics.overlay_connection_closed();
    info!(%connection_id, "overlay connection closed");
}

async fn events_ws_handler(
    ws: WebSocketUpgrade,
    State(services): State<Services>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| forward_channel_socket(socket, services, channels::TWITCH))
}

async fn ads_ws_handler(
    ws: WebSocketUpgrade,
    State(services): State<Services>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ads_socket(socket, services))
}

/// Forwards a single bus channel verbatim to the socket, ignoring inbound
/// frames. Used for `/ws/events/`, the raw Twitch event tap.
async fn forward_channel_socket(socket: WebSocket, services: Services, channel: &'static str) {
    let (mut sender, mut receiver) = socket.split();

    let drain_inbound = tokio::spawn(async move {
        while receiver.next().await.is_some() {}
    });

    let mut subscription = match services.bus.subscribe(&[channel]).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, %channel, "failed to subscribe forwarding socket");
            drain_inbound.abort();
            return;
        }
    };

    while let Some(msg) = subscription.recv().await {
        services.metrics.record_event_ingested(channel);
        let text = match serde_json::to_string(&msg.envelope) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "failed to encode forwarded envelope");
                continue;
            }
        };
        if sender.send(WsMessage::Text(text)).await.is_err() {
            break;
        }
    }
    drain_inbound.abort();
}

/// `/ws/ads/`: forwards `events:ads`, and answers an inbound
/// `{"command":"status"}` frame with a one-shot `ads:status` snapshot read
/// from the shared KV state (§4.7).
async fn handle_ads_socket(socket: WebSocket, services: Services) {
    let (mut sender, mut receiver) = socket.split();

    let mut subscription = match services.bus.subscribe(&[channels::ADS]).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to subscribe ads socket");
            return;
        }
    };

    loop {
        tokio::select! {
            msg = subscription.recv() => {
                let Some(msg) = msg else { break };
                let text = match serde_json::to_string(&msg.envelope) {
                    Ok(t) => t,
                    Err(_) => continue,
                };
                if sender.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Ok(command) = serde_json::from_str::<Json_>(&text) {
                            if command.get("command").and_then(Json_::as_str) == Some("status") {
                                let snapshot = ads_status_snapshot(&services).await;
                                if let Ok(t) = serde_json::to_string(&snapshot) {
                                    if sender.send(WsMessage::Text(t)).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }
}

async fn ads_status_snapshot(services: &Services) -> Json_ {
    let enabled = services
        .bus
        .kv_get(channels::keys::ADS_ENABLED)
        .await
        .ok()
        .flatten();
    let next_time = services
        .bus
        .kv_get(channels::keys::ADS_NEXT_TIME)
        .await
        .ok()
        .flatten();
    let warning_active = services
        .bus
        .kv_get(channels::keys::ADS_WARNING_ACTIVE)
        .await
        .ok()
        .flatten();
    serde_json::json!({
        "type": "ads:status",
        "enabled": enabled.as_deref() == Some("true"),
        "next_time": next_time,
        "warning_active": warning_active.as_deref() == Some("true"),
    })
}

/// `/ws/music/`: inbound-only. The first frame determines `agent_type`
/// (which overlay/bot sent it); every frame is stamped with `source` and
/// `timestamp` if the sender omitted them, then republished on
/// `events:music` (§4.8).
async fn music_ws_handler(
    ws: WebSocketUpgrade,
    State(services): State<Services>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_music_socket(socket, services))
}

async fn handle_music_socket(socket: WebSocket, services: Services) {
    let (_sender, mut receiver) = socket.split();
    let mut agent_type: Option<String> = None;

    while let Some(Ok(WsMessage::Text(text))) = receiver.next().await {
        let mut payload: Json_ = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "dropping malformed music frame");
                continue;
            }
        };

        if agent_type.is_none() {
            agent_type = payload
                .get("agent_type")
                .and_then(Json_::as_str)
                .map(str::to_string);
            if let Some(agent) = &agent_type {
                info!(agent_type = %agent, "music socket identified");
            }
        }

        if let Json_::Object(map) = &mut payload {
            map.entry("source").or_insert(serde_json::json!("music"));
            map.entry("timestamp")
                .or_insert(serde_json::json!(chrono::Utc::now()));
        }

        let event_type = payload
            .get("type")
            .and_then(Json_::as_str)
            .unwrap_or("music.update")
            .to_string();
        let envelope = Envelope::new(event_type, "music", payload);
        if let Err(e) = services.bus.publish(channels::MUSIC, &envelope).await {
            warn!(error = %e, "failed to publish music socket frame");
        } else {
            services.metrics.record_event_ingested("music");
        }
    }
}

async fn audio_ws_handler(
    ws: WebSocketUpgrade,
    State(services): State<Services>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_audio_socket(socket, services))
}

async fn handle_audio_socket(socket: WebSocket, services: Services) {
    let (_sender, mut receiver) = socket.split();
    let mut rate_limiter = signalhub_adapters::AudioRateLimiter::new();

    while let Some(msg) = receiver.next().await {
        let chunk = match msg {
            Ok(WsMessage::Binary(b)) => match signalhub_adapters::parse_chunk(&b) {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "dropping malformed audio chunk");
                    continue;
                }
            },
            Ok(WsMessage::Text(text)) => {
                let value: Json_ = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed json audio frame");
                        continue;
                    }
                };
                match signalhub_adapters::parse_json_chunk(&value) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed audio chunk");
                        continue;
                    }
                }
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        if !rate_limiter.allow() {
            warn!("audio socket exceeded per-second chunk rate limit, dropping chunk");
            continue;
        }

        let payload = serde_json::json!({
            "timestamp_ns": chunk.header.timestamp_ns,
            "sample_rate": chunk.header.sample_rate,
            "channels": chunk.header.channels,
            "bit_depth": chunk.header.bit_depth,
            "source_id": chunk.header.source_id,
            "source_name": chunk.header.source_name,
            "sample_count": chunk.samples.len(),
        });
        let envelope = Envelope::new("audio.chunk", "audio", payload);
        if let Err(e) = services.bus.publish(channels::AUDIO, &envelope).await {
            warn!(error = %e, "failed to publish audio chunk metadata");
        } else {
            services.metrics.record_audio_chunk();
        }
    }
}

async fn ffbot_intake_handler(
    State(services): State<Services>,
    Json(body): Json<Json_>,
) -> impl IntoResponse {
    let members = services.store.members.clone();
    let bus = services.bus.clone();
    tokio::spawn(async move {
        game_http::process_ffbot_event(&members, bus.as_ref(), body).await;
    });
    StatusCode::ACCEPTED
}
