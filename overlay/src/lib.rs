//! The overlay multiplexer (§4.6): one WebSocket per browser overlay,
//! synthesising an initial per-layer snapshot then streaming classified,
//! sequenced frames from the bus.

pub mod classify;
pub mod ffbot;
pub mod frame;
pub mod session;
pub mod snapshot;

pub use frame::{Frame, SequenceCounter};
pub use session::OverlaySession;
