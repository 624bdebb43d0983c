use serde_json::Value as Json;
use signalhub_core::Envelope;
use tracing::warn;

use crate::ffbot;
use crate::frame::layer;

/// Notice types inside `channel.chat.notification` that are timeline-worthy
/// (§4.6). Everything else — `announcement`, `unraid`, every
/// `shared_chat_*` variant — is excluded by simply not being in this list.
const TIMELINE_NOTICE_TYPES: &[&str] = &[
    "sub",
    "resub",
    "sub_gift",
    "community_sub_gift",
    "gift_paid_upgrade",
    "prime_paid_upgrade",
    "pay_it_forward",
    "raid",
    "bits_badge_tier",
    "charity_donation",
];

/// One classified output from a live bus envelope. A single envelope may
/// fan out into more than one frame (e.g. a follow both appends to the
/// timeline and to `base`/`alerts`).
pub enum Classified {
    Frame { frame_type: String, payload: Json },
    /// `source = "campaign"`, `event_type = "campaign:sync"`: the caller
    /// should rebuild and re-emit the campaign layer's sync snapshot.
    ResnapshotCampaign,
}

pub fn classify(envelope: &Envelope) -> Vec<Classified> {
    let mut out = Vec::new();

    match envelope.event_type.as_str() {
        "limitbreak.update" => out.push(frame("limitbreak:update", envelope.payload.clone())),
        "limitbreak.executed" => out.push(frame("limitbreak:executed", envelope.payload.clone())),
        "music.update" => out.push(frame("music:update", envelope.payload.clone())),
        "music.sync" => out.push(frame("music:sync", envelope.payload.clone())),
        "status.update" => out.push(frame("status:update", envelope.payload.clone())),
        "audio.mic.mute" => out.push(frame("audio:rme:update", envelope.payload.clone())),
        "audio.channels.update" => out.push(frame("audio:channels:update", envelope.payload.clone())),
        "channel.chat.message" => out.push(frame("chat:message", envelope.payload.clone())),
        "channel.follow" | "channel.cheer" => {
            out.push(frame(&format!("{}:append", layer::TIMELINE), envelope.payload.clone()));
            out.push(frame(&format!("{}:append", layer::BASE), envelope.payload.clone()));
            out.push(frame(&format!("{}:append", layer::ALERTS), envelope.payload.clone()));
        }
        "channel.chat.notification" => {
            if let Some(notice_type) = envelope.notice_type() {
                if TIMELINE_NOTICE_TYPES.contains(&notice_type) {
                    out.push(frame(&format!("{}:append", layer::TIMELINE), envelope.payload.clone()));
                    out.push(frame(&format!("{}:append", layer::BASE), envelope.payload.clone()));
                    out.push(frame(&format!("{}:append", layer::ALERTS), envelope.payload.clone()));
                }
            }
        }
        "campaign:sync" => out.push(Classified::ResnapshotCampaign),
        _ => {}
    }

    match envelope.source.as_str() {
        "campaign" if envelope.event_type != "campaign:sync" => {
            out.push(frame(&envelope.event_type, envelope.payload.clone()));
        }
        "obs" => {
            out.push(frame("obs:update", envelope.payload.clone()));
            if envelope.event_type == "obs.scene.changed" {
                out.push(frame("base:obs_scene_changed", envelope.payload.clone()));
            }
        }
        "ffbot" => {
            let sub_type = envelope.event_type.as_str();
            match ffbot::build_payload(sub_type, &envelope.payload, envelope.timestamp) {
                Some(payload) => out.push(frame(&format!("ffbot:{sub_type}"), payload)),
                None => warn!(sub_type, "dropping unrecognized ffbot sub-type"),
            }
        }
        _ => {}
    }

    out
}

fn frame(frame_type: &str, payload: Json) -> Classified {
    Classified::Frame {
        frame_type: frame_type.to_string(),
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(event_type: &str, source: &str, payload: Json) -> Envelope {
        Envelope::new(event_type, source, payload)
    }

    #[test]
    fn follow_fans_out_to_three_layers() {
        let outputs = classify(&env("channel.follow", "twitch", json!({"user": "a"})));
        assert_eq!(outputs.len(), 3);
    }

    #[test]
    fn chat_notification_with_excluded_notice_type_produces_nothing() {
        let payload = json!({"notice_type": "announcement"});
        let outputs = classify(&env("channel.chat.notification", "twitch", payload));
        assert!(outputs.is_empty());
    }

    #[test]
    fn chat_notification_with_included_notice_type_fans_out() {
        let payload = json!({"notice_type": "sub_gift"});
        let outputs = classify(&env("channel.chat.notification", "twitch", payload));
        assert_eq!(outputs.len(), 3);
    }

    #[test]
    fn campaign_source_forwards_as_sub_type_frame() {
        let outputs = classify(&env("campaign:update", "campaign", json!({"total_subs": 5})));
        assert_eq!(outputs.len(), 1);
        match &outputs[0] {
            Classified::Frame { frame_type, .. } => assert_eq!(frame_type, "campaign:update"),
            _ => panic!("expected Frame"),
        }
    }

    #[test]
    fn campaign_sync_triggers_resnapshot_not_forward() {
        let outputs = classify(&env("campaign:sync", "campaign", json!({})));
        assert_eq!(outputs.len(), 1);
        assert!(matches!(outputs[0], Classified::ResnapshotCampaign));
    }

    #[test]
    fn unknown_ffbot_sub_type_is_dropped() {
        let outputs = classify(&env("totally_unknown", "ffbot", json!({})));
        assert!(outputs.is_empty());
    }
}
