use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use signalhub_core::{
    types::{Campaign, GiftLeaderboardEntry, Metric, Milestone},
    Error, Result,
};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Clone)]
pub struct CampaignRepository {
    pool: PgPool,
}

/// Outcome of a subscription mutation: the updated metric plus, if a
/// milestone crossed its threshold as a result, every milestone that
/// unlocked during the call (highest threshold last, per §4.4).
pub struct SubscriptionOutcome {
    pub metric: Metric,
    pub timer_seconds_added: i64,
    pub unlocked_milestones: Vec<Milestone>,
}

impl CampaignRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deterministic pick when more than one campaign is flagged active
    /// (tolerated per design notes): lowest `start_date`, ties broken by id.
    pub async fn find_active(&self) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, CampaignRow>(
            "SELECT id, name, slug, description, start_date, end_date, is_active, timer_mode, \
             timer_initial_seconds, seconds_per_sub, seconds_per_tier2, seconds_per_tier3, max_timer_seconds \
             FROM campaigns WHERE is_active = true ORDER BY start_date ASC, id ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map(|row| row.map(Into::into))
        .map_err(Error::Database)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, CampaignRow>(
            "SELECT id, name, slug, description, start_date, end_date, is_active, timer_mode, \
             timer_initial_seconds, seconds_per_sub, seconds_per_tier2, seconds_per_tier3, max_timer_seconds \
             FROM campaigns WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map(|row| row.map(Into::into))
        .map_err(Error::Database)
    }

    pub async fn find_metric(&self, campaign_id: Uuid) -> Result<Metric> {
        sqlx::query_as::<_, MetricRow>(
            "SELECT id, campaign_id, total_subs, total_resubs, total_bits, total_donations, \
             timer_seconds_remaining, timer_started_at, timer_paused_at, extra_data \
             FROM metrics WHERE campaign_id = $1",
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(Error::Database)
    }

    pub async fn milestones_for(&self, campaign_id: Uuid) -> Result<Vec<Milestone>> {
        sqlx::query_as::<_, MilestoneRow>(
            "SELECT id, campaign_id, threshold, title, description, is_unlocked, unlocked_at, \
             image_url, announcement_text FROM milestones WHERE campaign_id = $1 ORDER BY threshold ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
        .map(|rows| rows.into_iter().map(Into::into).collect())
        .map_err(Error::Database)
    }

    /// `process_subscription` per §4.4: bumps `total_subs`, accrues timer
    /// seconds when the timer is running, upserts the gifter's `Gift` row
    /// for gifted subs, and unlocks every milestone newly crossed. Takes a
    /// row lock on `metrics` for the duration so concurrent subscription
    /// events against the same campaign serialize rather than lose updates.
    #[allow(clippy::too_many_arguments)]
    pub async fn process_subscription(
        &self,
        campaign: &Campaign,
        tier: u8,
        is_gift: bool,
        gifter_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionOutcome> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let mut metric = lock_metric(&mut tx, campaign.id).await?;
        metric.total_subs += 1;

        let mut timer_seconds_added = 0;
        if campaign.timer_mode && metric.timer_started_at.is_some() {
            let mut added = campaign.seconds_for_tier(tier);
            if let Some(cap) = campaign.max_timer_seconds {
                let headroom = (cap - metric.timer_seconds_remaining).max(0);
                added = added.min(headroom);
            }
            metric.timer_seconds_remaining += added;
            timer_seconds_added = added;
        }

        save_metric(&mut tx, &metric).await?;

        if is_gift {
            if let Some(gifter) = gifter_id {
                upsert_gift(&mut tx, campaign.id, gifter, tier, now).await?;
            }
        }

        let unlocked_milestones = unlock_crossed_milestones(&mut tx, campaign.id, metric.total_subs, now).await?;

        tx.commit().await.map_err(Error::Database)?;

        Ok(SubscriptionOutcome {
            metric,
            timer_seconds_added,
            unlocked_milestones,
        })
    }

    pub async fn process_resub(&self, campaign_id: Uuid) -> Result<Metric> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut metric = lock_metric(&mut tx, campaign_id).await?;
        metric.total_resubs += 1;
        save_metric(&mut tx, &metric).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(metric)
    }

    pub async fn process_bits(&self, campaign_id: Uuid, bits: i64) -> Result<Metric> {
        if bits < 0 {
            return Err(Error::ProtocolBroken(format!("negative bits amount: {bits}")));
        }
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut metric = lock_metric(&mut tx, campaign_id).await?;
        metric.total_bits += bits;
        save_metric(&mut tx, &metric).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(metric)
    }

    pub async fn process_donation(&self, campaign_id: Uuid, amount: i64) -> Result<Metric> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut metric = lock_metric(&mut tx, campaign_id).await?;
        metric.total_donations += amount;
        save_metric(&mut tx, &metric).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(metric)
    }

    /// `update_vote`: additive accumulation into `extra_data.ffxiv_votes[option]`.
    /// Two interleaved calls for the same option sum rather than clobber,
    /// because the whole read-modify-write happens under the row lock.
    pub async fn update_vote(&self, campaign_id: Uuid, option: &str, votes: i64) -> Result<Metric> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut metric = lock_metric(&mut tx, campaign_id).await?;

        if !metric.extra_data.is_object() {
            metric.extra_data = Json::Object(Default::default());
        }
        let obj = metric.extra_data.as_object_mut().expect("just ensured object");
        let tally = obj
            .entry("ffxiv_votes")
            .or_insert_with(|| Json::Object(Default::default()));
        if !tally.is_object() {
            *tally = Json::Object(Default::default());
        }
        let tally_obj = tally.as_object_mut().expect("just ensured object");
        let current = tally_obj.get(option).and_then(Json::as_i64).unwrap_or(0);
        tally_obj.insert(option.to_string(), Json::from(current + votes));

        save_metric(&mut tx, &metric).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(metric)
    }

    /// `start_timer`: permitted even on an inactive campaign per the design
    /// note in §9 — callers that want to forbid it must check `is_active`
    /// themselves and log a warning, matching the source's documented quirk.
    pub async fn start_timer(&self, campaign: &Campaign, now: DateTime<Utc>) -> Result<Metric> {
        if !campaign.timer_mode {
            return Err(Error::ProtocolBroken(format!(
                "start_timer called on non-timer campaign {}",
                campaign.id
            )));
        }
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut metric = lock_metric(&mut tx, campaign.id).await?;

        if metric.timer_started_at.is_none() {
            metric.timer_seconds_remaining = campaign.timer_initial_seconds;
        } else {
            metric.timer_seconds_remaining += campaign.timer_initial_seconds;
        }
        metric.timer_started_at = Some(now);
        metric.timer_paused_at = None;

        save_metric(&mut tx, &metric).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(metric)
    }

    pub async fn pause_timer(&self, campaign_id: Uuid, now: DateTime<Utc>) -> Result<Metric> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut metric = lock_metric(&mut tx, campaign_id).await?;
        metric.timer_paused_at = Some(now);
        save_metric(&mut tx, &metric).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(metric)
    }

    /// `1 ≤ limit ≤ 100`, clamped rather than rejected.
    pub async fn get_gift_leaderboard(
        &self,
        campaign_id: Uuid,
        limit: i64,
    ) -> Result<Vec<GiftLeaderboardEntry>> {
        let limit = limit.clamp(1, 100);
        sqlx::query_as::<_, GiftLeaderboardRow>(
            "SELECT g.member_id, m.display_name, g.total_count, g.last_gift_at \
             FROM gifts g JOIN members m ON m.id = g.member_id \
             WHERE g.campaign_id = $1 \
             ORDER BY g.total_count DESC, g.last_gift_at ASC \
             LIMIT $2",
        )
        .bind(campaign_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map(|rows| rows.into_iter().map(Into::into).collect())
        .map_err(Error::Database)
    }
}

async fn lock_metric(tx: &mut Transaction<'_, Postgres>, campaign_id: Uuid) -> Result<Metric> {
    sqlx::query_as::<_, MetricRow>(
        "SELECT id, campaign_id, total_subs, total_resubs, total_bits, total_donations, \
         timer_seconds_remaining, timer_started_at, timer_paused_at, extra_data \
         FROM metrics WHERE campaign_id = $1 FOR UPDATE",
    )
    .bind(campaign_id)
    .fetch_one(&mut **tx)
    .await
    .map(Into::into)
    .map_err(Error::Database)
}

async fn save_metric(tx: &mut Transaction<'_, Postgres>, metric: &Metric) -> Result<()> {
    sqlx::query(
        "UPDATE metrics SET total_subs = $2, total_resubs = $3, total_bits = $4, total_donations = $5, \
         timer_seconds_remaining = $6, timer_started_at = $7, timer_paused_at = $8, extra_data = $9, \
         updated_at = now() WHERE campaign_id = $1",
    )
    .bind(metric.campaign_id)
    .bind(metric.total_subs)
    .bind(metric.total_resubs)
    .bind(metric.total_bits)
    .bind(metric.total_donations)
    .bind(metric.timer_seconds_remaining)
    .bind(metric.timer_started_at)
    .bind(metric.timer_paused_at)
    .bind(&metric.extra_data)
    .execute(&mut **tx)
    .await
    .map_err(Error::Database)?;
    Ok(())
}

async fn upsert_gift(
    tx: &mut Transaction<'_, Postgres>,
    campaign_id: Uuid,
    gifter_id: Uuid,
    tier: u8,
    now: DateTime<Utc>,
) -> Result<()> {
    let (t1, t2, t3) = match tier {
        1 => (1, 0, 0),
        2 => (0, 1, 0),
        3 => (0, 0, 1),
        _ => (0, 0, 0),
    };
    sqlx::query(
        "INSERT INTO gifts (id, campaign_id, member_id, tier1_count, tier2_count, tier3_count, total_count, first_gift_at, last_gift_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $4+$5+$6, $7, $7) \
         ON CONFLICT (campaign_id, member_id) DO UPDATE SET \
         tier1_count = gifts.tier1_count + EXCLUDED.tier1_count, \
         tier2_count = gifts.tier2_count + EXCLUDED.tier2_count, \
         tier3_count = gifts.tier3_count + EXCLUDED.tier3_count, \
         total_count = gifts.total_count + EXCLUDED.total_count, \
         last_gift_at = EXCLUDED.last_gift_at",
    )
    .bind(Uuid::new_v4())
    .bind(campaign_id)
    .bind(gifter_id)
    .bind(t1)
    .bind(t2)
    .bind(t3)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(Error::Database)?;
    Ok(())
}

/// Locks and unlocks every milestone whose threshold is now crossed,
/// lowest-to-highest, so the returned vec is already highest-last for
/// fan-out ordering (§9 Open Question: loop-to-unlock-all is permitted).
async fn unlock_crossed_milestones(
    tx: &mut Transaction<'_, Postgres>,
    campaign_id: Uuid,
    total_subs: i64,
    now: DateTime<Utc>,
) -> Result<Vec<Milestone>> {
    let rows = sqlx::query_as::<_, MilestoneRow>(
        "SELECT id, campaign_id, threshold, title, description, is_unlocked, unlocked_at, \
         image_url, announcement_text FROM milestones \
         WHERE campaign_id = $1 AND threshold <= $2 AND is_unlocked = false \
         ORDER BY threshold ASC FOR UPDATE",
    )
    .bind(campaign_id)
    .bind(total_subs)
    .fetch_all(&mut **tx)
    .await
    .map_err(Error::Database)?;

    let mut unlocked = Vec::with_capacity(rows.len());
    for row in rows {
        let mut milestone: Milestone = row.into();
        sqlx::query("UPDATE milestones SET is_unlocked = true, unlocked_at = $2 WHERE id = $1")
            .bind(milestone.id)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        milestone.is_unlocked = true;
        milestone.unlocked_at = Some(now);
        unlocked.push(milestone);
    }
    Ok(unlocked)
}

#[derive(sqlx::FromRow)]
struct CampaignRow {
    id: Uuid,
    name: String,
    slug: String,
    description: String,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    is_active: bool,
    timer_mode: bool,
    timer_initial_seconds: i64,
    seconds_per_sub: i64,
    seconds_per_tier2: i64,
    seconds_per_tier3: i64,
    max_timer_seconds: Option<i64>,
}

impl From<CampaignRow> for Campaign {
    fn from(row: CampaignRow) -> Self {
        Campaign {
            id: row.id,
            name: row.name,
            slug: row.slug,
            description: row.description,
            start_date: row.start_date,
            end_date: row.end_date,
            is_active: row.is_active,
            timer_mode: row.timer_mode,
            timer_initial_seconds: row.timer_initial_seconds,
            seconds_per_sub: row.seconds_per_sub,
            seconds_per_tier2: row.seconds_per_tier2,
            seconds_per_tier3: row.seconds_per_tier3,
            max_timer_seconds: row.max_timer_seconds,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MetricRow {
    id: Uuid,
    campaign_id: Uuid,
    total_subs: i64,
    total_resubs: i64,
    total_bits: i64,
    total_donations: i64,
    timer_seconds_remaining: i64,
    timer_started_at: Option<DateTime<Utc>>,
    timer_paused_at: Option<DateTime<Utc>>,
    extra_data: Json,
}

impl From<MetricRow> for Metric {
    fn from(row: MetricRow) -> Self {
        Metric {
            id: row.id,
            campaign_id: row.campaign_id,
            total_subs: row.total_subs,
            total_resubs: row.total_resubs,
            total_bits: row.total_bits,
            total_donations: row.total_donations,
            timer_seconds_remaining: row.timer_seconds_remaining,
            timer_started_at: row.timer_started_at,
            timer_paused_at: row.timer_paused_at,
            extra_data: row.extra_data,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MilestoneRow {
    id: Uuid,
    campaign_id: Uuid,
    threshold: i64,
    title: String,
    description: String,
    is_unlocked: bool,
    unlocked_at: Option<DateTime<Utc>>,
    image_url: Option<String>,
    announcement_text: Option<String>,
}

impl From<MilestoneRow> for Milestone {
    fn from(row: MilestoneRow) -> Self {
        Milestone {
            id: row.id,
            campaign_id: row.campaign_id,
            threshold: row.threshold,
            title: row.title,
            description: row.description,
            is_unlocked: row.is_unlocked,
            unlocked_at: row.unlocked_at,
            image_url: row.image_url,
            announcement_text: row.announcement_text,
        }
    }
}

#[derive(sqlx::FromRow)]
struct GiftLeaderboardRow {
    member_id: Uuid,
    display_name: String,
    total_count: i64,
    last_gift_at: DateTime<Utc>,
}

impl From<GiftLeaderboardRow> for GiftLeaderboardEntry {
    fn from(row: GiftLeaderboardRow) -> Self {
        GiftLeaderboardEntry {
            member_id: row.member_id,
            display_name: row.display_name,
            total_count: row.total_count,
            last_gift_at: row.last_gift_at,
        }
    }
}
