//! Reserved channel names and KV keys. Centralized so producers and
//! consumers never hand-type a channel string.

pub const TWITCH: &str = "events:twitch";
pub const OBS: &str = "events:obs";
pub const LIMITBREAK: &str = "events:limitbreak";
pub const MUSIC: &str = "events:music";
pub const STATUS: &str = "events:status";
pub const CHAT: &str = "events:chat";
pub const AUDIO: &str = "events:audio";
pub const CAMPAIGN: &str = "events:campaign";
pub const ADS: &str = "events:ads";
pub const GAMES_FFBOT: &str = "events:games:ffbot";
pub const GAMES_IRONMON: &str = "events:games:ironmon";
pub const BOT_ADS: &str = "bot:ads";

/// All channels the overlay multiplexer subscribes to on connect (§4.6).
pub const ALL: &[&str] = &[
    TWITCH,
    OBS,
    LIMITBREAK,
    MUSIC,
    STATUS,
    CHAT,
    AUDIO,
    CAMPAIGN,
    ADS,
    GAMES_FFBOT,
    GAMES_IRONMON,
];

pub mod keys {
    pub const ADS_ENABLED: &str = "ads:enabled";
    pub const ADS_NEXT_TIME: &str = "ads:next_time";
    pub const ADS_WARNING_ACTIVE: &str = "ads:warning_active";
    pub const ADS_WARNING_LOCK: &str = "ads:warning_lock";

    pub const EVENTSUB_CONNECTED: &str = "eventsub:connected";
    pub const EVENTSUB_LAST_EVENT_TIME: &str = "eventsub:last_event_time";
    pub const EVENTSUB_SECONDS_SINCE_LAST_EVENT: &str = "eventsub:seconds_since_last_event";
    pub const EVENTSUB_RECONNECT_ATTEMPTS: &str = "eventsub:reconnect_attempts";
    pub const EVENTSUB_RESTART_REQUESTED: &str = "eventsub:restart_requested";
    pub const EVENTSUB_RESTART_REQUESTED_AT: &str = "eventsub:restart_requested_at";

    pub const OBS_PERF_PREV_OUTPUT_SKIPPED: &str = "obs:performance:prev_output_skipped";
    pub const OBS_PERF_PREV_OUTPUT_TOTAL: &str = "obs:performance:prev_output_total";
    pub const OBS_PERF_PREV_RENDER_SKIPPED: &str = "obs:performance:prev_render_skipped";
    pub const OBS_PERF_PREV_RENDER_TOTAL: &str = "obs:performance:prev_render_total";
    pub const OBS_PERF_WARNING_ACTIVE: &str = "obs:performance:warning_active";

    pub fn limitbreak_count(reward_id: &str) -> String {
        format!("limitbreak:count:{reward_id}")
    }

    pub fn limitbreak_count_fallback(reward_id: &str) -> String {
        format!("limitbreak:count:{reward_id}:fallback")
    }

    pub const IRONMON_CURRENT_STATE: &str = "ironmon:current_state";
    pub const BROADCASTER_STATUS: &str = "broadcaster:status";

    pub const OBS_SCENE_CURRENT: &str = "obs:scene:current";
    pub const OBS_RECORDING_ACTIVE: &str = "obs:recording:active";
    pub const OBS_STREAMING_ACTIVE: &str = "obs:streaming:active";

    pub const AUDIO_RME_STATE: &str = "audio:rme:state";
    pub const AUDIO_CHANNELS_STATE: &str = "audio:channels:state";

    pub const MUSIC_CURRENT_TRACK: &str = "music:current_track";
}
