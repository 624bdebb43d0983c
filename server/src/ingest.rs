//! Bridges raw Twitch notifications onto the campaign aggregator (§4.4):
//! subscribes to `events:twitch` and `events:chat`, maps the handful of
//! event types that move campaign metrics onto the matching `Aggregator`
//! call, and leaves everything else (the overlay already gets its own
//! subscription to the same channels) untouched.

use serde_json::Value as Json;
use signalhub_bus::channels;
use signalhub_storage::Platform;
use tracing::warn;

use crate::state::Services;

pub async fn run(services: Services) {
    let mut subscription = match services.bus.subscribe(&[channels::TWITCH, channels::CHAT]).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "campaign ingest failed to subscribe, campaign metrics will not update");
            return;
        }
    };

    while let Some(msg) = subscription.recv().await {
        if let Err(e) = handle(&services, &msg.envelope.event_type, &msg.envelope.payload).await {
            warn!(error = %e, event_type = %msg.envelope.event_type, "campaign ingest dropped an event");
        }
    }
}

async fn handle(services: &Services, event_type: &str, payload: &Json) -> signalhub_core::Result<()> {
    match event_type {
        "channel.subscribe" => handle_subscribe(services, payload).await,
        "channel.subscription.gift" => handle_subscription_gift(services, payload).await,
        "channel.subscription.message" => handle_resub(services, payload).await,
        "channel.cheer" => handle_cheer(services, payload).await,
        "channel.charity_campaign.donate" => handle_donation(services, payload).await,
        _ => Ok(()),
    }
}

fn tier_number(payload: &Json) -> u8 {
    match payload.get("tier").and_then(Json::as_str) {
        Some("2000") => 2,
        Some("3000") => 3,
        _ => 1,
    }
}

async fn handle_subscribe(services: &Services, payload: &Json) -> signalhub_core::Result<()> {
    let is_gift = payload.get("is_gift").and_then(Json::as_bool).unwrap_or(false);
    if is_gift {
        // The paired `channel.subscription.gift` event carries the gifter and
        // the batch total; this per-recipient notice would double count.
        return Ok(());
    }
    let campaign = services.aggregator.find_active().await?;
    services
        .aggregator
        .process_subscription(campaign.as_ref(), tier_number(payload), false, None)
        .await?;
    Ok(())
}

async fn handle_subscription_gift(services: &Services, payload: &Json) -> signalhub_core::Result<()> {
    let tier = tier_number(payload);
    let total = payload.get("total").and_then(Json::as_i64).unwrap_or(1).max(1);
    let is_anonymous = payload.get("is_anonymous").and_then(Json::as_bool).unwrap_or(false);

    let gifter_id = if is_anonymous {
        None
    } else {
        let twitch_id = payload.get("user_id").and_then(Json::as_str);
        match twitch_id {
            Some(id) => {
                let display_name = payload
                    .get("user_name")
                    .and_then(Json::as_str)
                    .unwrap_or(id);
                let member = services
                    .store
                    .members
                    .upsert(Platform::Twitch, id, display_name, None)
                    .await?;
                Some(member.id)
            }
            None => None,
        }
    };

    let campaign = services.aggregator.find_active().await?;
    for _ in 0..total {
        services
            .aggregator
            .process_subscription(campaign.as_ref(), tier, true, gifter_id)
            .await?;
    }
    Ok(())
}

async fn handle_resub(services: &Services, _payload: &Json) -> signalhub_core::Result<()> {
    let campaign = services.aggregator.find_active().await?;
    services.aggregator.process_resub(campaign.as_ref()).await?;
    Ok(())
}

async fn handle_cheer(services: &Services, payload: &Json) -> signalhub_core::Result<()> {
    let bits = payload.get("bits").and_then(Json::as_i64).unwrap_or(0);
    let campaign = services.aggregator.find_active().await?;
    services.aggregator.process_bits(campaign.as_ref(), bits).await?;
    Ok(())
}

async fn handle_donation(services: &Services, payload: &Json) -> signalhub_core::Result<()> {
    let amount = payload
        .get("charity_amount")
        .and_then(|a| a.get("value"))
        .and_then(Json::as_i64)
        .unwrap_or(0);
    let campaign = services.aggregator.find_active().await?;
    services.aggregator.process_donation(campaign.as_ref(), amount).await?;
    Ok(())
}
