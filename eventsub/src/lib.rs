//! The EventSub adapter (§4.2): a single reconnecting WebSocket subscription
//! to the live-streaming platform's push channel, normalising notifications
//! into envelopes on the bus, deduplicating by `event_id`, and applying the
//! community-gift aggregation policy (§4.3) to chat notifications.

pub mod client;
pub mod dedup;
pub mod gift_policy;
pub mod restart;
pub mod state;
pub mod topics;

pub use client::{EventSubAdapter, EventSubConfig};
pub use state::AdapterState;
