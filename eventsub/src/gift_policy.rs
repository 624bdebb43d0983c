use serde_json::Value as Json;

/// Outcome of applying the community-gift aggregation policy (§4.3) to one
/// `channel.chat.notification` payload.
pub enum GiftDecision {
    /// Publish as-is; stamp `community_gift_id` at the envelope's top level.
    PublishCommunity { community_gift_id: String },
    /// A per-recipient sub-gift event already accounted for by its
    /// community event. Drop it silently.
    Drop,
    /// A targeted (non-community) gift sub; publish normally.
    PublishTargeted,
    /// Not a gift notice at all; publish normally, no special handling.
    NotAGift,
}

/// `payload` is the inner `notice_type`-tagged body of a chat notification.
pub fn decide(payload: &Json) -> GiftDecision {
    let notice_type = payload.get("notice_type").and_then(Json::as_str).unwrap_or("");
    match notice_type {
        "community_sub_gift" => {
            let id = payload
                .get("community_sub_gift")
                .and_then(|v| v.get("id"))
                .and_then(Json::as_str)
                .unwrap_or_default()
                .to_string();
            GiftDecision::PublishCommunity {
                community_gift_id: id,
            }
        }
        "sub_gift" => {
            let community_id = payload
                .get("sub_gift")
                .and_then(|v| v.get("community_gift_id"))
                .and_then(Json::as_str);
            match community_id {
                Some(_) => GiftDecision::Drop,
                None => GiftDecision::PublishTargeted,
            }
        }
        _ => GiftDecision::NotAGift,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn community_sub_gift_publishes_with_id_stamped() {
        let payload = json!({
            "notice_type": "community_sub_gift",
            "community_sub_gift": {"id": "G1", "total": 5, "sub_tier": "1000"}
        });
        match decide(&payload) {
            GiftDecision::PublishCommunity { community_gift_id } => {
                assert_eq!(community_gift_id, "G1");
            }
            _ => panic!("expected PublishCommunity"),
        }
    }

    #[test]
    fn per_recipient_sub_gift_with_community_id_is_dropped() {
        let payload = json!({
            "notice_type": "sub_gift",
            "sub_gift": {"community_gift_id": "G1"}
        });
        assert!(matches!(decide(&payload), GiftDecision::Drop));
    }

    #[test]
    fn targeted_sub_gift_without_community_id_publishes() {
        let payload = json!({
            "notice_type": "sub_gift",
            "sub_gift": {}
        });
        assert!(matches!(decide(&payload), GiftDecision::PublishTargeted));
    }
}
