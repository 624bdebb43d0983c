use chrono::{DateTime, Utc};
use serde_json::{json, Value as Json};

/// Maps an `ffbot` event's `event_type` (the sub-type, e.g. `"stats"`,
/// `"hire"`) and its envelope payload into the client-shaped frame payload
/// (§4.6.1). Returns `None` for an unrecognized sub-type, which the caller
/// logs at WARN and drops rather than forwarding a shape clients don't
/// understand.
pub fn build_payload(sub_type: &str, payload: &Json, timestamp: DateTime<Utc>) -> Option<Json> {
    let player = payload.get("player").cloned().unwrap_or(Json::Null);
    let member = payload.get("member").cloned().unwrap_or(Json::Null);

    match sub_type {
        "stats" => Some(json!({
            "player": player,
            "member": member,
            "data": payload,
            "timestamp": timestamp,
        })),
        "hire" => Some(json!({
            "player": player,
            "member": member,
            "character": payload.get("character").cloned().unwrap_or(Json::Null),
            "cost": payload.get("cost").cloned().unwrap_or(Json::Null),
            "data": payload.get("stats").cloned().unwrap_or(Json::Null),
            "timestamp": timestamp,
        })),
        "change" => Some(json!({
            "player": player,
            "member": member,
            "from": payload.get("from").cloned().unwrap_or(Json::Null),
            "to": payload.get("to").cloned().unwrap_or(Json::Null),
            "data": payload.get("stats").cloned().unwrap_or(Json::Null),
            "timestamp": timestamp,
        })),
        "save" => Some(json!({
            "player_count": payload.get("player_count").cloned().unwrap_or(Json::Null),
            "metadata": payload.get("metadata").cloned().unwrap_or(Json::Null),
            "timestamp": timestamp,
        })),
        "preference" | "give" | "release" | "level_up" | "equip" => {
            pass_through(&player, &member, payload, timestamp)
        }
        _ => None,
    }
}

/// Known-but-unspecialized sub-types get the generic pass-through shape:
/// the fixed fields plus every key already in the envelope payload.
fn pass_through(player: &Json, member: &Json, payload: &Json, timestamp: DateTime<Utc>) -> Option<Json> {
    let mut out = serde_json::Map::new();
    if let Json::Object(map) = payload {
        out.extend(map.clone());
    }
    out.insert("player".to_string(), player.clone());
    out.insert("member".to_string(), member.clone());
    out.insert(
        "data".to_string(),
        payload.get("stats").cloned().unwrap_or(Json::Null),
    );
    out.insert("timestamp".to_string(), json!(timestamp));
    Some(Json::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_passes_whole_payload_as_data() {
        let payload = json!({"player": "p1", "member": {"id": "m1"}, "hp": 10});
        let out = build_payload("stats", &payload, Utc::now()).unwrap();
        assert_eq!(out["data"]["hp"], 10);
        assert_eq!(out["player"], "p1");
    }

    #[test]
    fn hire_pulls_character_cost_and_stats() {
        let payload = json!({
            "player": "p1", "member": {"id": "m1"},
            "character": "knight", "cost": 50, "stats": {"atk": 5}
        });
        let out = build_payload("hire", &payload, Utc::now()).unwrap();
        assert_eq!(out["character"], "knight");
        assert_eq!(out["cost"], 50);
        assert_eq!(out["data"]["atk"], 5);
    }

    #[test]
    fn unknown_sub_type_returns_none() {
        assert!(build_payload("totally_unknown", &json!({}), Utc::now()).is_none());
    }
}
