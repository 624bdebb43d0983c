pub mod config;
pub mod envelope;
pub mod error;
pub mod types;

pub use config::Settings;
pub use envelope::{Envelope, EnvelopeMember};
pub use error::{Error, Result};
