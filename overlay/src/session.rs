use std::sync::Arc;

use signalhub_bus::{channels, Bus};
use signalhub_core::Result;
use signalhub_storage::Store;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::classify::{classify, Classified};
use crate::frame::{layer, Frame, SequenceCounter};
use crate::snapshot::{self, Snapshots};

/// One browser overlay connection. Synthesises the initial per-layer
/// snapshot, then streams classified, sequenced frames from the bus until
/// the subscription or outbound channel closes (§4.6 connect sequence).
pub struct OverlaySession {
    pub connection_id: Uuid,
    store: Store,
    bus: Arc<dyn Bus>,
    sequence: SequenceCounter,
}

impl OverlaySession {
    pub fn new(store: Store, bus: Arc<dyn Bus>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            store,
            bus,
            sequence: SequenceCounter::new(),
        }
    }

    /// Drives the session until the outbound sender is dropped (the socket
    /// closed) or the bus subscription ends. `outbound` is a plain
    /// `mpsc::Sender<Frame>`; the axum handler on the other end owns JSON
    /// encoding and the actual WebSocket write.
    pub async fn run(mut self, outbound: mpsc::Sender<Frame>) -> Result<()> {
        let mut subscription = self.bus.subscribe(channels::ALL).await?;

        self.emit_sync_frames(&outbound).await?;

        while let Some(msg) = subscription.recv().await {
            for classified in classify(&msg.envelope) {
                match classified {
                    Classified::Frame { frame_type, payload } => {
                        let frame = self.sequence.next_frame(frame_type, payload);
                        if outbound.send(frame).await.is_err() {
                            return Ok(());
                        }
                    }
                    Classified::ResnapshotCampaign => {
                        if let Err(e) = self.emit_campaign_resync(&outbound).await {
                            warn!(error = %e, "failed to rebuild campaign snapshot");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn emit_sync_frames(&mut self, outbound: &mpsc::Sender<Frame>) -> Result<()> {
        let snapshots = snapshot::build_all(&self.store, self.bus.as_ref()).await?;
        for (frame_type, payload) in sync_pairs(&snapshots) {
            let frame = self.sequence.next_frame(frame_type, payload);
            if outbound.send(frame).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn emit_campaign_resync(&mut self, outbound: &mpsc::Sender<Frame>) -> Result<()> {
        let snapshots = snapshot::build_all(&self.store, self.bus.as_ref()).await?;
        let frame = self
            .sequence
            .next_frame(format!("{}:sync", layer::CAMPAIGN), snapshots.campaign);
        let _ = outbound.send(frame).await;
        Ok(())
    }
}

fn sync_pairs(s: &Snapshots) -> Vec<(String, serde_json::Value)> {
    vec![
        (format!("{}:sync", layer::BASE), s.base.clone()),
        (format!("{}:sync", layer::TIMELINE), s.timeline.clone()),
        (format!("{}:sync", layer::TICKER), s.ticker.clone()),
        (format!("{}:sync", layer::ALERTS), s.alerts.clone()),
        (format!("{}:sync", layer::OBS), s.obs.clone()),
        (format!("{}:sync", layer::AUDIO_RME), s.audio_rme.clone()),
        (format!("{}:sync", layer::AUDIO_CHANNELS), s.audio_channels.clone()),
        (format!("{}:sync", layer::CAMPAIGN), s.campaign.clone()),
        (format!("{}:sync", layer::LIMITBREAK), s.limitbreak.clone()),
        (format!("{}:sync", layer::MUSIC), s.music.clone()),
        (format!("{}:sync", layer::STATUS), s.status.clone()),
    ]
}
