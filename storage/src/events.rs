use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use signalhub_core::{types::Event, Error, Result};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct EventRepository {
    pool: PgPool,
}

impl EventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a new event. `source_event_id` dedup is enforced by the
    /// partial unique index on `(source, source_event_id)`; a collision is
    /// reported as `Error::DuplicateEvent` rather than `PersistenceConflict`
    /// since it's an expected, not racy, condition (Twitch redelivers).
    #[allow(clippy::too_many_arguments)]
    pub async fn append(
        &self,
        source: &str,
        event_type: &str,
        member_id: Option<Uuid>,
        session_id: Option<Uuid>,
        payload: Json,
        timestamp: DateTime<Utc>,
        source_event_id: Option<&str>,
    ) -> Result<Event> {
        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, EventRow>(
            "INSERT INTO events (id, source, event_type, member_id, session_id, payload, timestamp, source_event_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id, source, event_type, member_id, session_id, payload, timestamp, source_event_id",
        )
        .bind(id)
        .bind(source)
        .bind(event_type)
        .bind(member_id)
        .bind(session_id)
        .bind(payload)
        .bind(timestamp)
        .bind(source_event_id)
        .fetch_one(&self.pool)
        .await;

        match row {
            Ok(row) => Ok(row.into()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(Error::DuplicateEvent(
                source_event_id.unwrap_or_default().to_string(),
            )),
            Err(e) => Err(Error::Database(e)),
        }
    }

    /// `true` if an event with this `(source, source_event_id)` has already
    /// been recorded. Adapters call this ahead of processing to short-circuit
    /// redeliveries before they touch aggregates.
    pub async fn is_duplicate(&self, source: &str, source_event_id: &str) -> Result<bool> {
        let exists: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM events WHERE source = $1 AND source_event_id = $2",
        )
        .bind(source)
        .bind(source_event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(exists.is_some())
    }

    pub async fn recent_for_session(&self, session_id: Uuid, limit: i64) -> Result<Vec<Event>> {
        sqlx::query_as::<_, EventRow>(
            "SELECT id, source, event_type, member_id, session_id, payload, timestamp, source_event_id \
             FROM events WHERE session_id = $1 ORDER BY timestamp DESC LIMIT $2",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map(|rows| rows.into_iter().map(Into::into).collect())
        .map_err(Error::Database)
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    source: String,
    event_type: String,
    member_id: Option<Uuid>,
    session_id: Option<Uuid>,
    payload: Json,
    timestamp: DateTime<Utc>,
    source_event_id: Option<String>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            id: row.id,
            source: row.source,
            event_type: row.event_type,
            member_id: row.member_id,
            session_id: row.session_id,
            payload: row.payload,
            timestamp: row.timestamp,
            source_event_id: row.source_event_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_with_no_source_event_id_uses_empty_string() {
        // append() reports an empty id rather than panicking on `unwrap_or_default`
        // when a unique violation somehow fires without one (shouldn't happen given
        // the partial index, but the mapping must stay total).
        let e = Error::DuplicateEvent(String::new());
        assert_eq!(e.to_string(), "duplicate event: ");
    }
}
