use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as Json;

/// The fixed layer set (§4.6). Kept as plain string constants rather than an
/// enum since frame `type` fields are `<layer>:<verb>` and verbs vary freely
/// per layer.
pub mod layer {
    pub const BASE: &str = "base";
    pub const TIMELINE: &str = "timeline";
    pub const TICKER: &str = "ticker";
    pub const ALERTS: &str = "alerts";
    pub const OBS: &str = "obs";
    pub const AUDIO_RME: &str = "audio:rme";
    pub const AUDIO_CHANNELS: &str = "audio:channels";
    pub const CAMPAIGN: &str = "campaign";
    pub const LIMITBREAK: &str = "limitbreak";
    pub const MUSIC: &str = "music";
    pub const STATUS: &str = "status";
    pub const FFBOT: &str = "ffbot";
    pub const CHAT: &str = "chat";

    pub const ALL: &[&str] = &[
        BASE, TIMELINE, TICKER, ALERTS, OBS, AUDIO_RME, AUDIO_CHANNELS, CAMPAIGN, LIMITBREAK,
        MUSIC, STATUS, FFBOT, CHAT,
    ];
}

/// One outgoing message on the overlay WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub payload: Json,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
}

/// Assigns the monotonically increasing `sequence` for one connection.
/// Starts at 0 per §4.6 framing rules.
pub struct SequenceCounter(u64);

impl SequenceCounter {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn next_frame(&mut self, frame_type: impl Into<String>, payload: Json) -> Frame {
        let sequence = self.0;
        self.0 += 1;
        Frame {
            frame_type: frame_type.into(),
            payload,
            timestamp: Utc::now(),
            sequence,
        }
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sequence_starts_at_zero_and_increments() {
        let mut counter = SequenceCounter::new();
        let f0 = counter.next_frame("base:sync", json!([]));
        let f1 = counter.next_frame("timeline:sync", json!([]));
        assert_eq!(f0.sequence, 0);
        assert_eq!(f1.sequence, 1);
    }
}
