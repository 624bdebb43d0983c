use std::sync::Arc;

use signalhub_bus::{Bus, RedisBus};
use signalhub_campaign::Aggregator;
use signalhub_core::{Error, Result, Settings};
use signalhub_eventsub::{EventSubAdapter, EventSubConfig};
use signalhub_scheduler::{AdScheduler, AdSchedulerConfig};
use signalhub_storage::{Store, TokenStore};

use crate::metrics::Metrics;

/// Everything a request handler or background task needs, wired once at
/// startup and cloned (cheaply — every field is an `Arc` or a `Store`, whose
/// repositories just wrap a pooled `PgPool`) into each consumer. Chosen over
/// module-level globals so tests can build a `Services` with fakes.
#[derive(Clone)]
pub struct Services {
    pub store: Store,
    pub bus: Arc<dyn Bus>,
    pub tokens: Arc<TokenStore>,
    pub eventsub: Arc<EventSubAdapter>,
    pub aggregator: Arc<Aggregator>,
    pub ad_scheduler: Arc<AdScheduler>,
    pub metrics: Arc<Metrics>,
}

impl Services {
    pub async fn build(settings: &Settings, encryption_key: &[u8]) -> Result<Self> {
        let store = Store::connect(&settings.database.url, settings.database.max_connections).await?;
        let bus: Arc<dyn Bus> = Arc::new(RedisBus::connect(&settings.bus.redis_url).await?);
        let tokens = Arc::new(store.token_store(encryption_key)?);

        if settings.platform.client_id.is_empty() || settings.platform.broadcaster_user_id.is_empty() {
            return Err(Error::Configuration(
                "platform.client_id and platform.broadcaster_user_id must be set".into(),
            ));
        }

        let eventsub = EventSubAdapter::new(
            EventSubConfig {
                client_id: settings.platform.client_id.clone(),
                client_secret: settings.platform.client_secret.clone(),
                broadcaster_user_id: settings.platform.broadcaster_user_id.clone(),
            },
            bus.clone(),
            tokens.clone(),
        );

        let aggregator = Arc::new(Aggregator::new(store.campaigns.clone(), bus.clone()));

        let ad_scheduler = AdScheduler::new(
            AdSchedulerConfig {
                client_id: settings.platform.client_id.clone(),
                client_secret: settings.platform.client_secret.clone(),
                broadcaster_user_id: settings.platform.broadcaster_user_id.clone(),
            },
            bus.clone(),
            tokens.clone(),
        );

        Ok(Self {
            store,
            bus,
            tokens,
            eventsub,
            aggregator,
            ad_scheduler,
            metrics: Arc::new(Metrics::new()),
        })
    }
}
