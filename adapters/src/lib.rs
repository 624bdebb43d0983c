//! Auxiliary adapters (§4.8): OBS scene compositor, OSC mic control, music
//! poller, game TCP/HTTP intake, and the `/ws/audio/` binary frame codec.
//! Each adapter degrades independently — a dead OBS socket or music poll
//! failure never propagates into the overlay frame stream (§7).

pub mod audio;
pub mod game_http;
pub mod game_tcp;
pub mod music;
pub mod obs;
pub mod osc;

pub use audio::{parse_chunk, parse_json_chunk, AudioChunk, AudioChunkHeader, AudioRateLimiter};
pub use game_tcp::GameTcpServer;
pub use music::{MusicPoller, MusicPollerConfig};
pub use obs::{ObsAdapter, ObsConfig};
pub use osc::OscListener;
