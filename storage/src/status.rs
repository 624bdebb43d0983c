use signalhub_core::{
    types::{PresenceState, Status},
    Error, Result,
};
use sqlx::PgPool;

/// Single-row presence table; the `CHECK (id)` constraint in the migration
/// enforces there is ever exactly one row.
#[derive(Clone)]
pub struct StatusRepository {
    pool: PgPool,
}

impl StatusRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self) -> Result<Status> {
        sqlx::query_as::<_, StatusRow>("SELECT state, message FROM status WHERE id = true")
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(Error::Database)
    }

    pub async fn set(&self, state: PresenceState, message: Option<&str>) -> Result<Status> {
        sqlx::query_as::<_, StatusRow>(
            "UPDATE status SET state = $1, message = $2 WHERE id = true RETURNING state, message",
        )
        .bind(presence_to_str(state))
        .bind(message)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(Error::Database)
    }
}

fn presence_to_str(state: PresenceState) -> &'static str {
    match state {
        PresenceState::Online => "online",
        PresenceState::Away => "away",
        PresenceState::Busy => "busy",
        PresenceState::Brb => "brb",
        PresenceState::Focus => "focus",
    }
}

fn presence_from_str(s: &str) -> PresenceState {
    match s {
        "away" => PresenceState::Away,
        "busy" => PresenceState::Busy,
        "brb" => PresenceState::Brb,
        "focus" => PresenceState::Focus,
        _ => PresenceState::Online,
    }
}

#[derive(sqlx::FromRow)]
struct StatusRow {
    state: String,
    message: Option<String>,
}

impl From<StatusRow> for Status {
    fn from(row: StatusRow) -> Self {
        Status {
            state: presence_from_str(&row.state),
            message: row.message,
        }
    }
}
