use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};

/// Local atomics for the hand-rolled `/metrics` render, plus `counter!`/
/// `gauge!` calls so a real Prometheus exporter can be wired in later
/// without touching call sites.
#[derive(Default)]
pub struct Metrics {
    events_ingested_total: AtomicU64,
    overlay_connections_active: AtomicU64,
    audio_chunks_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event_ingested(&self, source: &str) {
        self.events_ingested_total.fetch_add(1, Ordering::Relaxed);
        counter!("signalhub_events_ingested_total", "source" => source.to_string()).increment(1);
    }

    pub fn record_audio_chunk(&self) {
        self.audio_chunks_total.fetch_add(1, Ordering::Relaxed);
        counter!("signalhub_audio_chunks_total").increment(1);
    }

    pub fn overlay_connection_opened(&self) {
        let n = self.overlay_connections_active.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!("signalhub_overlay_connections_active").set(n as f64);
    }

    pub fn overlay_connection_closed(&self) {
        let prev = self.overlay_connections_active.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |n| Some(n.saturating_sub(1)),
        );
        let n = prev.unwrap_or(0).saturating_sub(1);
        gauge!("signalhub_overlay_connections_active").set(n as f64);
    }

    pub fn render_prometheus(&self) -> String {
        format!(
            "# HELP signalhub_events_ingested_total Total events ingested from all adapters\n\
             # TYPE signalhub_events_ingested_total counter\n\
             signalhub_events_ingested_total {}\n\
             # HELP signalhub_overlay_connections_active Currently open overlay WebSocket connections\n\
             # TYPE signalhub_overlay_connections_active gauge\n\
             signalhub_overlay_connections_active {}\n\
             # HELP signalhub_audio_chunks_total Total audio chunks accepted on /ws/audio/\n\
             # TYPE signalhub_audio_chunks_total counter\n\
             signalhub_audio_chunks_total {}\n",
            self.events_ingested_total.load(Ordering::Relaxed),
            self.overlay_connections_active.load(Ordering::Relaxed),
            self.audio_chunks_total.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_reflects_recorded_counts() {
        let m = Metrics::new();
        m.record_event_ingested("twitch");
        m.record_event_ingested("obs");
        m.record_audio_chunk();
        m.overlay_connection_opened();
        m.overlay_connection_opened();

        let rendered = m.render_prometheus();
        assert!(rendered.contains("signalhub_events_ingested_total 2"));
        assert!(rendered.contains("signalhub_audio_chunks_total 1"));
        assert!(rendered.contains("signalhub_overlay_connections_active 2"));
    }

    #[test]
    fn overlay_connection_count_never_underflows() {
        let m = Metrics::new();
        m.overlay_connection_closed();
        m.overlay_connection_closed();
        assert!(m.render_prometheus().contains("signalhub_overlay_connections_active 0"));
    }
}
