use serde_json::{json, Value as Json};
use signalhub_bus::{channels, Bus};
use signalhub_core::Result;
use signalhub_storage::Store;

/// Event types counted as viewer interactions for the `base`/`timeline`
/// snapshot queries (§4.6).
const VIEWER_INTERACTION_TYPES: &[&str] = &[
    "channel.chat.notification",
    "channel.follow",
    "channel.subscribe",
    "channel.subscription.gift",
    "channel.subscription.message",
    "channel.cheer",
    "channel.raid",
];

const TIMELINE_SYNC_LIMIT: i64 = 20;

pub struct Snapshots {
    pub base: Json,
    pub timeline: Json,
    pub ticker: Json,
    pub alerts: Json,
    pub obs: Json,
    pub audio_rme: Json,
    pub audio_channels: Json,
    pub campaign: Json,
    pub limitbreak: Json,
    pub music: Json,
    pub status: Json,
}

/// Builds every layer's initial sync payload. `session_id`, when known,
/// scopes the event queries to "today's" session; `None` falls back to an
/// empty snapshot for session-scoped layers (no stream currently live).
pub async fn build_all(store: &Store, bus: &dyn Bus) -> Result<Snapshots> {
    let recent_events = match store.sessions.find_by_date(chrono::Utc::now().date_naive()).await? {
        Some(session) => store.events.recent_for_session(session.id, 200).await?,
        None => Vec::new(),
    };

    let viewer_events: Vec<_> = recent_events
        .iter()
        .filter(|e| VIEWER_INTERACTION_TYPES.contains(&e.event_type.as_str()))
        .collect();

    let base = viewer_events
        .first()
        .map(|e| json!(e))
        .unwrap_or(Json::Null);

    let timeline = viewer_events
        .iter()
        .take(TIMELINE_SYNC_LIMIT as usize)
        .map(|e| json!(e))
        .collect::<Vec<_>>();

    let campaign = match store.campaigns.find_active().await? {
        Some(campaign) => {
            let metric = store.campaigns.find_metric(campaign.id).await?;
            let milestones = store.campaigns.milestones_for(campaign.id).await?;
            json!({ "campaign": campaign, "metric": metric, "milestones": milestones })
        }
        None => Json::Null,
    };

    let status = store.status.get().await?;

    let obs = json!({
        "scene": bus.kv_get(channels::keys::OBS_SCENE_CURRENT).await?,
        "recording": bus.kv_get(channels::keys::OBS_RECORDING_ACTIVE).await?,
        "streaming": bus.kv_get(channels::keys::OBS_STREAMING_ACTIVE).await?,
    });

    let audio_rme = match bus.kv_get(channels::keys::AUDIO_RME_STATE).await? {
        Some(raw) => serde_json::from_str(&raw).unwrap_or(Json::Null),
        None => Json::Null,
    };
    let audio_channels = match bus.kv_get(channels::keys::AUDIO_CHANNELS_STATE).await? {
        Some(raw) => serde_json::from_str(&raw).unwrap_or(Json::Null),
        None => Json::Null,
    };
    let music = match bus.kv_get(channels::keys::MUSIC_CURRENT_TRACK).await? {
        Some(raw) => serde_json::from_str(&raw).unwrap_or(Json::Null),
        None => Json::Null,
    };

    let limitbreak = build_limitbreak_snapshot(bus).await?;

    Ok(Snapshots {
        base,
        timeline: Json::Array(timeline),
        ticker: Json::Array(Vec::new()),
        alerts: Json::Array(Vec::new()),
        obs,
        audio_rme,
        audio_channels,
        campaign,
        limitbreak,
        music,
        status: json!(status),
    })
}

/// limitbreak: computed count + three bar fractions + `isMaxed`. The three
/// bars split a fixed capacity into thirds, matching the channel-points
/// reward ladder (bar 1 fills before bar 2 starts, etc.).
const LIMITBREAK_BAR_CAPACITY: i64 = 100;
const LIMITBREAK_MAX_COUNT: i64 = LIMITBREAK_BAR_CAPACITY * 3;

async fn build_limitbreak_snapshot(bus: &dyn Bus) -> Result<Json> {
    let count: i64 = bus
        .kv_get("limitbreak:count:total")
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    Ok(limitbreak_bars(count))
}

fn limitbreak_bars(count: i64) -> Json {
    let clamped = count.clamp(0, LIMITBREAK_MAX_COUNT);
    let bar = |bar_index: i64| -> f64 {
        let floor = bar_index * LIMITBREAK_BAR_CAPACITY;
        ((clamped - floor).clamp(0, LIMITBREAK_BAR_CAPACITY)) as f64 / LIMITBREAK_BAR_CAPACITY as f64
    };

    json!({
        "count": clamped,
        "bar1": bar(0),
        "bar2": bar(1),
        "bar3": bar(2),
        "isMaxed": clamped >= LIMITBREAK_MAX_COUNT,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bars_fill_in_order_as_count_rises() {
        let s = limitbreak_bars(0);
        assert_eq!(s["bar1"], 0.0);
        assert_eq!(s["isMaxed"], false);

        let s = limitbreak_bars(150);
        assert_eq!(s["bar1"], 1.0);
        assert_eq!(s["bar2"], 0.5);
        assert_eq!(s["bar3"], 0.0);
    }

    #[test]
    fn count_clamps_to_max_and_sets_is_maxed() {
        let s = limitbreak_bars(1000);
        assert_eq!(s["count"], 300);
        assert_eq!(s["bar3"], 1.0);
        assert_eq!(s["isMaxed"], true);
    }

    #[test]
    fn negative_count_clamps_to_zero() {
        let s = limitbreak_bars(-50);
        assert_eq!(s["count"], 0);
        assert_eq!(s["bar1"], 0.0);
    }
}
