//! The fixed subscription catalogue from §4.2. Each entry is `(event_type,
//! version)`; `condition` is built by the caller from broadcaster id since
//! most topics share the same shape.

pub const CATALOGUE: &[(&str, &str)] = &[
    ("stream.online", "1"),
    ("stream.offline", "1"),
    ("channel.update", "2"),
    ("channel.follow", "2"),
    ("channel.subscribe", "1"),
    ("channel.subscription.end", "1"),
    ("channel.subscription.gift", "1"),
    ("channel.subscription.message", "1"),
    ("channel.cheer", "1"),
    ("channel.raid", "1"),
    ("channel.chat.clear", "1"),
    ("channel.chat.clear_user_messages", "1"),
    ("channel.chat.message", "1"),
    ("channel.chat.notification", "1"),
    ("channel.channel_points_custom_reward.add", "1"),
    ("channel.channel_points_custom_reward.update", "1"),
    ("channel.channel_points_custom_reward.remove", "1"),
    ("channel.channel_points_custom_reward_redemption.add", "1"),
    ("channel.channel_points_custom_reward_redemption.update", "1"),
    ("channel.poll.begin", "1"),
    ("channel.poll.progress", "1"),
    ("channel.poll.end", "1"),
    ("channel.prediction.begin", "1"),
    ("channel.prediction.progress", "1"),
    ("channel.prediction.lock", "1"),
    ("channel.prediction.end", "1"),
    ("channel.charity_campaign.donate", "1"),
    ("channel.goal.begin", "1"),
    ("channel.goal.progress", "1"),
    ("channel.goal.end", "1"),
    ("channel.shoutout.create", "1"),
    ("channel.shoutout.receive", "1"),
    ("channel.vip.add", "1"),
    ("channel.vip.remove", "1"),
    ("channel.ad_break.begin", "1"),
];

/// Bus channel that a given EventSub `event_type` normalises onto. Chat
/// notifications carry the community-gift policy so they're routed to
/// `events:chat` for the dedicated producer path (§4.3); everything else
/// lands on `events:twitch`.
pub fn channel_for(event_type: &str) -> &'static str {
    if event_type == "channel.chat.notification" || event_type == "channel.chat.message" {
        signalhub_bus::channels::CHAT
    } else {
        signalhub_bus::channels::TWITCH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_events_route_to_the_chat_channel() {
        assert_eq!(channel_for("channel.chat.notification"), signalhub_bus::channels::CHAT);
        assert_eq!(channel_for("channel.chat.message"), signalhub_bus::channels::CHAT);
    }

    #[test]
    fn everything_else_routes_to_twitch() {
        assert_eq!(channel_for("channel.subscribe"), signalhub_bus::channels::TWITCH);
        assert_eq!(channel_for("stream.online"), signalhub_bus::channels::TWITCH);
    }

    #[test]
    fn catalogue_has_no_duplicate_subscription_entries() {
        let mut seen = std::collections::HashSet::new();
        for (event_type, _version) in CATALOGUE {
            assert!(seen.insert(*event_type), "duplicate subscription for {event_type}");
        }
    }
}
