//! The campaign aggregator (§4.4): turns interaction events into campaign
//! state mutations under the storage crate's row-locked transactions, then
//! emits the corresponding bus envelopes. Every operation takes an
//! `Option<&Campaign>` rather than resolving one itself — when the caller
//! passes `None` (no active campaign), the aggregator no-ops per §4.4's
//! documented "stop counting" behavior instead of erroring.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use signalhub_bus::{channels, Bus};
use signalhub_core::{
    types::{Campaign, GiftLeaderboardEntry, Metric, Milestone},
    Envelope, Result,
};
use signalhub_storage::CampaignRepository;
use tracing::warn;
use uuid::Uuid;

pub struct Aggregator {
    repo: CampaignRepository,
    bus: Arc<dyn Bus>,
}

/// Result of a mutating operation; `None` signals the "no active campaign"
/// no-op path.
pub type MaybeMetric = Option<Metric>;

impl Aggregator {
    pub fn new(repo: CampaignRepository, bus: Arc<dyn Bus>) -> Self {
        Self { repo, bus }
    }

    pub async fn process_subscription(
        &self,
        campaign: Option<&Campaign>,
        tier: u8,
        is_gift: bool,
        gifter_id: Option<Uuid>,
    ) -> Result<MaybeMetric> {
        let Some(campaign) = campaign else {
            return Ok(None);
        };
        let now = Utc::now();
        let outcome = self
            .repo
            .process_subscription(campaign, tier, is_gift, gifter_id, now)
            .await?;

        self.emit_update(
            campaign.id,
            &outcome.metric,
            outcome.timer_seconds_added,
        )
        .await?;

        for milestone in &outcome.unlocked_milestones {
            self.emit_milestone(campaign.id, milestone).await?;
        }

        Ok(Some(outcome.metric))
    }

    pub async fn process_resub(&self, campaign: Option<&Campaign>) -> Result<MaybeMetric> {
        let Some(campaign) = campaign else {
            return Ok(None);
        };
        let metric = self.repo.process_resub(campaign.id).await?;
        self.emit_update(campaign.id, &metric, 0).await?;
        Ok(Some(metric))
    }

    pub async fn process_bits(&self, campaign: Option<&Campaign>, bits: i64) -> Result<MaybeMetric> {
        let Some(campaign) = campaign else {
            return Ok(None);
        };
        let metric = self.repo.process_bits(campaign.id, bits).await?;
        self.emit_update(campaign.id, &metric, 0).await?;
        Ok(Some(metric))
    }

    pub async fn process_donation(
        &self,
        campaign: Option<&Campaign>,
        amount: i64,
    ) -> Result<MaybeMetric> {
        let Some(campaign) = campaign else {
            return Ok(None);
        };
        let metric = self.repo.process_donation(campaign.id, amount).await?;
        self.emit_update(campaign.id, &metric, 0).await?;
        Ok(Some(metric))
    }

    pub async fn update_vote(
        &self,
        campaign: Option<&Campaign>,
        option: &str,
        votes: i64,
    ) -> Result<MaybeMetric> {
        let Some(campaign) = campaign else {
            return Ok(None);
        };
        let metric = self.repo.update_vote(campaign.id, option, votes).await?;
        self.emit_update(campaign.id, &metric, 0).await?;
        Ok(Some(metric))
    }

    /// Permitted even when `campaign.is_active` is false — matches the
    /// documented (if questionable) current behavior; callers that want to
    /// forbid it should check `is_active` themselves before calling and log
    /// a warning, as the source does.
    pub async fn start_timer(&self, campaign: &Campaign) -> Result<Metric> {
        if !campaign.is_active {
            warn!(campaign_id = %campaign.id, "start_timer called on inactive campaign");
        }
        let metric = self.repo.start_timer(campaign, Utc::now()).await?;
        let envelope = Envelope::new(
            "campaign:timer:started",
            "campaign",
            json!({ "campaign_id": campaign.id, "timer_seconds_remaining": metric.timer_seconds_remaining }),
        );
        self.bus.publish(channels::CAMPAIGN, &envelope).await?;
        Ok(metric)
    }

    pub async fn pause_timer(&self, campaign: &Campaign) -> Result<Metric> {
        let metric = self.repo.pause_timer(campaign.id, Utc::now()).await?;
        let envelope = Envelope::new(
            "campaign:timer:paused",
            "campaign",
            json!({ "campaign_id": campaign.id }),
        );
        self.bus.publish(channels::CAMPAIGN, &envelope).await?;
        Ok(metric)
    }

    pub async fn get_gift_leaderboard(
        &self,
        campaign_id: Uuid,
        limit: i64,
    ) -> Result<Vec<GiftLeaderboardEntry>> {
        self.repo.get_gift_leaderboard(campaign_id, limit).await
    }

    pub async fn find_active(&self) -> Result<Option<Campaign>> {
        self.repo.find_active().await
    }

    async fn emit_update(&self, campaign_id: Uuid, metric: &Metric, timer_seconds_added: i64) -> Result<()> {
        let envelope = Envelope::new(
            "campaign:update",
            "campaign",
            json!({
                "campaign_id": campaign_id,
                "total_subs": metric.total_subs,
                "total_resubs": metric.total_resubs,
                "total_bits": metric.total_bits,
                "total_donations": metric.total_donations,
                "timer_seconds_remaining": metric.timer_seconds_remaining,
                "timer_seconds_added": timer_seconds_added,
            }),
        );
        self.bus.publish(channels::CAMPAIGN, &envelope).await
    }

    async fn emit_milestone(&self, campaign_id: Uuid, milestone: &Milestone) -> Result<()> {
        let envelope = Envelope::new(
            "campaign:milestone",
            "campaign",
            json!({
                "campaign_id": campaign_id,
                "milestone_id": milestone.id,
                "threshold": milestone.threshold,
                "title": milestone.title,
                "unlocked_at": milestone.unlocked_at,
            }),
        );
        self.bus.publish(channels::CAMPAIGN, &envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use signalhub_bus::BusSubscription;
    use std::sync::Mutex;

    struct RecordingBus {
        published: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Bus for RecordingBus {
        async fn publish(&self, channel: &str, envelope: &Envelope) -> Result<()> {
            self.published
                .lock()
                .unwrap()
                .push((channel.to_string(), envelope.event_type.clone()));
            Ok(())
        }
        async fn subscribe(&self, _channels: &[&str]) -> Result<BusSubscription> {
            unimplemented!("not exercised in these tests")
        }
        async fn kv_get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn kv_set(&self, _key: &str, _value: &str) -> Result<()> {
            Ok(())
        }
        async fn kv_set_ex(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<()> {
            Ok(())
        }
        async fn kv_set_nx_ex(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<bool> {
            Ok(true)
        }
        async fn kv_del(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    fn aggregator_with_unreachable_pool(bus: Arc<dyn Bus>) -> Aggregator {
        // `PgPool::connect_lazy` never dials out, so this is safe to build
        // without a live database for the `None`-campaign no-op paths below,
        // which return before the repository touches the pool.
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/unused")
            .expect("lazy pool construction");
        Aggregator::new(CampaignRepository::new(pool), bus)
    }

    #[tokio::test]
    async fn no_active_campaign_is_a_silent_no_op() {
        let bus = Arc::new(RecordingBus {
            published: Mutex::new(Vec::new()),
        });
        let aggregator = aggregator_with_unreachable_pool(bus.clone());

        let result = aggregator
            .process_subscription(None, 1, false, None)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(bus.published.lock().unwrap().is_empty());

        assert!(aggregator.process_resub(None).await.unwrap().is_none());
        assert!(aggregator.process_bits(None, 100).await.unwrap().is_none());
        assert!(aggregator
            .update_vote(None, "option_a", 3)
            .await
            .unwrap()
            .is_none());
        assert!(bus.published.lock().unwrap().is_empty());
    }
}
