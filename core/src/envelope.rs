//! The wire format carried on every bus channel (see `signalhub_bus` for the
//! channel taxonomy and transport). Kept here, rather than in the bus crate,
//! so any crate can construct/parse an envelope without depending on Redis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeMember {
    pub id: Option<String>,
    pub twitch_id: Option<String>,
    pub username: Option<String>,
    pub display_name: Option<String>,
}

/// Free-form JSON envelope published on a bus channel. The wire shape is
/// intentionally loose (`payload` is an opaque map) so new upstream event
/// types don't require a schema migration; strongly-typed views are built
/// at the consuming boundary (overlay classification, campaign aggregator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event_type: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(alias = "data")]
    pub payload: Json,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<EnvelopeMember>,
    /// Top-level stamp for community gift bursts (§4.3); absent otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_gift_id: Option<String>,
}

impl Envelope {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, payload: Json) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            timestamp: Utc::now(),
            payload,
            event_id: None,
            member: None,
            community_gift_id: None,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_member(mut self, member: EnvelopeMember) -> Self {
        self.member = Some(member);
        self
    }

    pub fn with_community_gift_id(mut self, id: impl Into<String>) -> Self {
        self.community_gift_id = Some(id.into());
        self
    }

    /// Extract a nested notice type from `channel.chat.notification`-shaped
    /// payloads (`payload.notice_type`), used by the overlay's timeline
    /// classifier.
    pub fn notice_type(&self) -> Option<&str> {
        self.payload.get("notice_type").and_then(Json::as_str)
    }
}
