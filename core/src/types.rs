//! Domain entities shared by the storage, campaign, eventsub, and overlay
//! crates. Field names follow the relational schema one-to-one so `sqlx`
//! query macros can map rows directly onto these structs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

/// A distinct human or bot identity, keyed internally but associated with
/// one or more platform-specific external ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: Uuid,
    pub twitch_id: Option<String>,
    pub youtube_id: Option<String>,
    pub discord_id: Option<String>,
    pub display_name: String,
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A day-scoped stream container. `is_live` is derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub date: chrono::NaiveDate,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
}

impl Session {
    pub fn is_live(&self) -> bool {
        self.started_at.is_some() && self.ended_at.is_none()
    }

    /// Wall-clock duration when both endpoints are known; `None` while the
    /// session is still live or hasn't started.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// An immutable, append-only record of an observed external fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub source: String,
    pub event_type: String,
    pub member_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub payload: Json,
    pub timestamp: DateTime<Utc>,
    pub source_event_id: Option<String>,
}

impl Event {
    /// Monetary amount embedded in the payload, if any (bits or a flat
    /// donation amount depending on source).
    pub fn amount(&self) -> i64 {
        match self.source.as_str() {
            "twitch" => self
                .payload
                .get("bits")
                .or_else(|| self.payload.get("amount"))
                .and_then(Json::as_i64)
                .unwrap_or(0),
            _ => self
                .payload
                .get("amount")
                .and_then(Json::as_i64)
                .unwrap_or(0),
        }
    }

    pub fn message(&self) -> &str {
        self.payload
            .get("message")
            .or_else(|| self.payload.get("text"))
            .and_then(Json::as_str)
            .unwrap_or("")
    }

    pub fn username(&self) -> &str {
        self.payload
            .get("user_login")
            .or_else(|| self.payload.get("user_name"))
            .or_else(|| self.payload.get("username"))
            .and_then(Json::as_str)
            .unwrap_or("")
    }
}

/// A named fundraising/goal period. At most one SHOULD be active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub timer_mode: bool,
    pub timer_initial_seconds: i64,
    pub seconds_per_sub: i64,
    pub seconds_per_tier2: i64,
    pub seconds_per_tier3: i64,
    pub max_timer_seconds: Option<i64>,
}

impl Campaign {
    pub fn seconds_for_tier(&self, tier: u8) -> i64 {
        match tier {
            1 => self.seconds_per_sub,
            2 => self.seconds_per_tier2,
            3 => self.seconds_per_tier3,
            _ => 0,
        }
    }
}

/// One-to-one with a Campaign; the counters and timer state the aggregator
/// mutates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub total_subs: i64,
    pub total_resubs: i64,
    pub total_bits: i64,
    pub total_donations: i64,
    pub timer_seconds_remaining: i64,
    pub timer_started_at: Option<DateTime<Utc>>,
    pub timer_paused_at: Option<DateTime<Utc>>,
    pub extra_data: Json,
}

/// A threshold within a campaign that unlocks exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub threshold: i64,
    pub title: String,
    pub description: String,
    pub is_unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
    pub announcement_text: Option<String>,
}

/// Per-gifter, per-campaign tally of community/targeted gift subs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gift {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub member_id: Uuid,
    pub tier1_count: i64,
    pub tier2_count: i64,
    pub tier3_count: i64,
    pub total_count: i64,
    pub first_gift_at: DateTime<Utc>,
    pub last_gift_at: DateTime<Utc>,
}

/// Opaque, encrypted platform credentials. `TokenStore` implementations
/// are the only code allowed to see plaintext `access_token`/`refresh_token`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub service: String,
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}

impl Token {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => Utc::now() >= exp,
            None => false,
        }
    }
}

/// Presence singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Online,
    Away,
    Busy,
    Brb,
    Focus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub state: PresenceState,
    pub message: Option<String>,
}

/// A single gifter's standing row in a leaderboard query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftLeaderboardEntry {
    pub member_id: Uuid,
    pub display_name: String,
    pub total_count: i64,
    pub last_gift_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn campaign(timer_mode: bool) -> Campaign {
        Campaign {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            slug: "test".to_string(),
            description: String::new(),
            start_date: Utc::now(),
            end_date: Utc::now(),
            is_active: true,
            timer_mode,
            timer_initial_seconds: 3600,
            seconds_per_sub: 60,
            seconds_per_tier2: 120,
            seconds_per_tier3: 300,
            max_timer_seconds: None,
        }
    }

    #[test]
    fn seconds_for_tier_maps_each_known_tier() {
        let c = campaign(true);
        assert_eq!(c.seconds_for_tier(1), 60);
        assert_eq!(c.seconds_for_tier(2), 120);
        assert_eq!(c.seconds_for_tier(3), 300);
        assert_eq!(c.seconds_for_tier(9), 0);
    }

    fn event(source: &str, payload: Json) -> Event {
        Event {
            id: Uuid::new_v4(),
            source: source.to_string(),
            event_type: "channel.cheer".to_string(),
            member_id: None,
            session_id: None,
            payload,
            timestamp: Utc::now(),
            source_event_id: None,
        }
    }

    #[test]
    fn amount_prefers_bits_over_amount_for_twitch_source() {
        let e = event("twitch", json!({"bits": 500, "amount": 100}));
        assert_eq!(e.amount(), 500);
    }

    #[test]
    fn amount_falls_back_to_flat_amount_field() {
        let e = event("twitch", json!({"amount": 100}));
        assert_eq!(e.amount(), 100);
        let e = event("donation", json!({"amount": 250}));
        assert_eq!(e.amount(), 250);
    }

    #[test]
    fn amount_defaults_to_zero_when_absent() {
        let e = event("twitch", json!({}));
        assert_eq!(e.amount(), 0);
    }

    #[test]
    fn username_checks_each_known_key_in_order() {
        assert_eq!(event("twitch", json!({"user_login": "a"})).username(), "a");
        assert_eq!(event("twitch", json!({"user_name": "b"})).username(), "b");
        assert_eq!(event("twitch", json!({"username": "c"})).username(), "c");
        assert_eq!(event("twitch", json!({})).username(), "");
    }

    #[test]
    fn session_is_live_only_between_start_and_end() {
        let mut s = Session {
            id: Uuid::new_v4(),
            date: Utc::now().date_naive(),
            started_at: None,
            ended_at: None,
            duration_seconds: 0,
        };
        assert!(!s.is_live());
        s.started_at = Some(Utc::now());
        assert!(s.is_live());
        s.ended_at = Some(Utc::now());
        assert!(!s.is_live());
        assert!(s.duration().is_some());
    }

    #[test]
    fn token_is_expired_when_past_expiry_or_never_when_none() {
        let mut t = Token {
            service: "twitch".to_string(),
            user_id: "1".to_string(),
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: None,
            scopes: vec![],
        };
        assert!(!t.is_expired());
        t.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(t.is_expired());
    }
}
