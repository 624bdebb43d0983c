use thiserror::Error;

/// Error taxonomy shared across every signalhub crate.
///
/// Variants map onto the kinds described in the system's error handling
/// design: transient conditions are retried by callers, `DomainNoOp` is
/// returned rather than propagated, and `Configuration`/`SubscriptionRevoked`
/// are fatal to the owning task.
#[derive(Error, Debug)]
pub enum Error {
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("platform auth expired: {0}")]
    AuthExpired(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("protocol broken: {0}")]
    ProtocolBroken(String),

    #[error("duplicate event: {0}")]
    DuplicateEvent(String),

    #[error("subscription revoked: {0}")]
    SubscriptionRevoked(String),

    #[error("persistence conflict: {0}")]
    PersistenceConflict(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("external service unreachable: {0}")]
    ExternalServiceDown(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// `DomainNoOp` isn't a distinct variant: callers that hit "no active
    /// campaign" or "no matching entity" return `Ok(None)`/an empty result
    /// directly rather than constructing an error. This helper exists for
    /// the handful of call sites that need to log the no-op without
    /// treating it as failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransientNetwork(_) | Error::RateLimited { .. } | Error::ExternalServiceDown(_)
        )
    }
}
