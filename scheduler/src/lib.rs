//! Coarse, low-frequency background cycles that don't belong to any single
//! adapter: ad-break scheduling and EventSub liveness supervision (§4.7).
//! Both run as independent `tokio::spawn`ed loops driven by their own
//! interval timers; neither blocks server startup or the overlay path.

pub mod ads;
pub mod eventsub_health;

pub use ads::{AdScheduler, AdSchedulerConfig};
pub use eventsub_health::{EventSubHealthConfig, EventSubHealthProbe};
