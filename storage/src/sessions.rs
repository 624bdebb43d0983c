use chrono::{DateTime, NaiveDate, Utc};
use signalhub_core::{types::Session, Error, Result};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get-or-create the session for `date`. Concurrent first references to
    /// the same date race on the `UNIQUE (date)` constraint; the loser
    /// re-reads the winner's row (`PersistenceConflict`, per spec §7).
    pub async fn get_or_create(&self, date: NaiveDate) -> Result<Session> {
        if let Some(existing) = self.find_by_date(date).await? {
            return Ok(existing);
        }

        let id = Uuid::new_v4();
        match sqlx::query_as::<_, SessionRow>(
            "INSERT INTO sessions (id, date) VALUES ($1, $2) \
             ON CONFLICT (date) DO NOTHING \
             RETURNING id, date, started_at, ended_at, duration_seconds",
        )
        .bind(id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        {
            Some(row) => Ok(row.into()),
            None => self.find_by_date(date).await?.ok_or_else(|| {
                Error::PersistenceConflict(format!("session for {date} vanished after insert race"))
            }),
        }
    }

    pub async fn find_by_date(&self, date: NaiveDate) -> Result<Option<Session>> {
        sqlx::query_as::<_, SessionRow>(
            "SELECT id, date, started_at, ended_at, duration_seconds FROM sessions WHERE date = $1",
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .map(|row| row.map(Into::into))
        .map_err(Error::Database)
    }

    /// Applied only in response to `stream.online`.
    pub async fn mark_started(&self, date: NaiveDate, started_at: DateTime<Utc>) -> Result<Session> {
        self.get_or_create(date).await?;
        sqlx::query_as::<_, SessionRow>(
            "UPDATE sessions SET started_at = $2, ended_at = NULL WHERE date = $1 \
             RETURNING id, date, started_at, ended_at, duration_seconds",
        )
        .bind(date)
        .bind(started_at)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(Error::Database)
    }

    /// Applied only in response to `stream.offline`. Accumulates
    /// `duration_seconds` from `started_at` rather than overwriting it, so
    /// a session that goes online/offline more than once in a day still
    /// totals correctly.
    pub async fn mark_ended(&self, date: NaiveDate, ended_at: DateTime<Utc>) -> Result<Session> {
        let session = self.get_or_create(date).await?;
        let added = match session.started_at {
            Some(started) => (ended_at - started).num_seconds().max(0),
            None => 0,
        };
        sqlx::query_as::<_, SessionRow>(
            "UPDATE sessions SET ended_at = $2, duration_seconds = duration_seconds + $3 \
             WHERE date = $1 \
             RETURNING id, date, started_at, ended_at, duration_seconds",
        )
        .bind(date)
        .bind(ended_at)
        .bind(added)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(Error::Database)
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    date: NaiveDate,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    duration_seconds: i64,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            date: row.date,
            started_at: row.started_at,
            ended_at: row.ended_at,
            duration_seconds: row.duration_seconds,
        }
    }
}
