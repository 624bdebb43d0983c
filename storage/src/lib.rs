//! Postgres-backed persistence for every entity in `signalhub_core::types`.
//! One repository struct per aggregate, plus a `Store` that wires them
//! together behind a single shared `PgPool`.

pub mod campaigns;
pub mod events;
pub mod members;
pub mod pool;
pub mod sessions;
pub mod status;
pub mod tokens;

use signalhub_core::Result;
use sqlx::PgPool;

pub use campaigns::{CampaignRepository, SubscriptionOutcome};
pub use events::EventRepository;
pub use members::{MemberRepository, Platform};
pub use sessions::SessionRepository;
pub use status::StatusRepository;
pub use tokens::TokenStore;

/// The full set of repositories, built once at startup and cloned (each
/// repository just wraps a `PgPool`, which is itself an `Arc`-backed handle)
/// into whichever task needs it.
#[derive(Clone)]
pub struct Store {
    pub members: MemberRepository,
    pub sessions: SessionRepository,
    pub events: EventRepository,
    pub campaigns: CampaignRepository,
    pub status: StatusRepository,
}

impl Store {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pg_pool = pool::connect(database_url, max_connections).await?;
        Ok(Self::from_pool(pg_pool))
    }

    pub fn from_pool(pg_pool: PgPool) -> Self {
        Self {
            members: MemberRepository::new(pg_pool.clone()),
            sessions: SessionRepository::new(pg_pool.clone()),
            events: EventRepository::new(pg_pool.clone()),
            campaigns: CampaignRepository::new(pg_pool.clone()),
            status: StatusRepository::new(pg_pool),
        }
    }

    /// A `TokenStore` needs its own encryption key, so it's built
    /// separately rather than folded into `Store`.
    pub fn token_store(&self, encryption_key: &[u8]) -> Result<TokenStore> {
        TokenStore::new(self.members.pool_handle(), encryption_key)
    }
}
