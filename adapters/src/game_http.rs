use serde_json::Value as Json;
use signalhub_bus::{channels, Bus};
use signalhub_core::{Envelope, Error, Result};
use signalhub_storage::{MemberRepository, Platform};
use tracing::warn;

/// Processes one FFBot HTTP intake event (§4.8, §6) after the HTTP handler
/// has already responded `202` — upserts the acting Member if one is named,
/// then republishes the event on the bus for the overlay's ffbot classifier.
/// Called from a spawned task; errors are logged, never surfaced back to
/// the original HTTP request.
pub async fn process_ffbot_event(members: &MemberRepository, bus: &dyn Bus, body: Json) {
    if let Err(e) = process(members, bus, body).await {
        warn!(error = %e, "failed to process ffbot http intake event");
    }
}

async fn process(members: &MemberRepository, bus: &dyn Bus, body: Json) -> Result<()> {
    let event_type = body
        .get("type")
        .and_then(Json::as_str)
        .ok_or_else(|| Error::ProtocolBroken("ffbot event missing type".into()))?
        .to_string();

    let mut payload = body.clone();
    if let Some(twitch_id) = body.get("twitch_id").and_then(Json::as_str) {
        let display_name = body
            .get("display_name")
            .and_then(Json::as_str)
            .unwrap_or(twitch_id);
        let member = members
            .upsert(Platform::Twitch, twitch_id, display_name, None)
            .await?;
        if let Json::Object(map) = &mut payload {
            map.insert("member".to_string(), serde_json::json!(member));
        }
    }

    let envelope = Envelope::new(event_type, "ffbot", payload);
    bus.publish(channels::GAMES_FFBOT, &envelope).await
}
