use chrono::Utc;
use signalhub_core::{types::Member, Error, Result};
use sqlx::PgPool;
use uuid::Uuid;

/// Which platform tag identifies a member for upsert purposes.
#[derive(Debug, Clone, Copy)]
pub enum Platform {
    Twitch,
    Youtube,
    Discord,
}

impl Platform {
    fn column(self) -> &'static str {
        match self {
            Platform::Twitch => "twitch_id",
            Platform::Youtube => "youtube_id",
            Platform::Discord => "discord_id",
        }
    }
}

#[derive(Clone)]
pub struct MemberRepository {
    pool: PgPool,
}

impl MemberRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool_handle(&self) -> PgPool {
        self.pool.clone()
    }

    pub async fn find_by_platform_id(
        &self,
        platform: Platform,
        external_id: &str,
    ) -> Result<Option<Member>> {
        let sql = format!(
            "SELECT id, twitch_id, youtube_id, discord_id, display_name, username, created_at, updated_at \
             FROM members WHERE {} = $1",
            platform.column()
        );
        sqlx::query_as::<_, MemberRow>(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map(|row| row.map(Into::into))
            .map_err(Error::Database)
    }

    /// First-seen creation, display-name refresh on subsequent sightings
    /// (§4 supplement — mirrors the original's
    /// `_get_or_create_member_from_payload`). A unique-constraint race on
    /// concurrent first sightings is treated as `PersistenceConflict` and
    /// resolved by re-reading the now-existing row.
    pub async fn upsert(
        &self,
        platform: Platform,
        external_id: &str,
        display_name: &str,
        username: Option<&str>,
    ) -> Result<Member> {
        if let Some(existing) = self.find_by_platform_id(platform, external_id).await? {
            if existing.display_name != display_name || existing.username.as_deref() != username {
                return self.update_display(existing.id, display_name, username).await;
            }
            return Ok(existing);
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO members (id, {col}, display_name, username, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $5) \
             ON CONFLICT ({col}) DO UPDATE SET display_name = EXCLUDED.display_name, username = EXCLUDED.username, updated_at = EXCLUDED.updated_at \
             RETURNING id, twitch_id, youtube_id, discord_id, display_name, username, created_at, updated_at",
            col = platform.column()
        );
        match sqlx::query_as::<_, MemberRow>(&sql)
            .bind(id)
            .bind(external_id)
            .bind(display_name)
            .bind(username)
            .bind(now)
            .fetch_one(&self.pool)
            .await
        {
            Ok(row) => Ok(row.into()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                // PersistenceConflict: another writer won the race, read its row.
                self.find_by_platform_id(platform, external_id)
                    .await?
                    .ok_or_else(|| {
                        Error::PersistenceConflict(format!(
                            "member upsert conflict but no row found for {external_id}"
                        ))
                    })
            }
            Err(e) => Err(Error::Database(e)),
        }
    }

    async fn update_display(
        &self,
        id: Uuid,
        display_name: &str,
        username: Option<&str>,
    ) -> Result<Member> {
        sqlx::query_as::<_, MemberRow>(
            "UPDATE members SET display_name = $2, username = $3, updated_at = now() \
             WHERE id = $1 \
             RETURNING id, twitch_id, youtube_id, discord_id, display_name, username, created_at, updated_at",
        )
        .bind(id)
        .bind(display_name)
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(Error::Database)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Member>> {
        sqlx::query_as::<_, MemberRow>(
            "SELECT id, twitch_id, youtube_id, discord_id, display_name, username, created_at, updated_at \
             FROM members WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map(|row| row.map(Into::into))
        .map_err(Error::Database)
    }
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    id: Uuid,
    twitch_id: Option<String>,
    youtube_id: Option<String>,
    discord_id: Option<String>,
    display_name: String,
    username: Option<String>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

impl From<MemberRow> for Member {
    fn from(row: MemberRow) -> Self {
        Member {
            id: row.id,
            twitch_id: row.twitch_id,
            youtube_id: row.youtube_id,
            discord_id: row.discord_id,
            display_name: row.display_name,
            username: row.username,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
