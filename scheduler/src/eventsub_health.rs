use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use signalhub_bus::{channels, Bus};
use signalhub_core::config::{PlatformSettings, EVENTSUB_MAX_SILENCE};
use signalhub_core::{Error, Result};
use tracing::{info, warn};

const TICK_INTERVAL: Duration = Duration::from_secs(120);
const RESTART_REQUEST_TTL_SECS: u64 = 600;

pub struct EventSubHealthConfig {
    /// Streaming-hours gate; outside this local window, prolonged silence
    /// is expected (stream is offline) and must not trigger a restart.
    pub streaming_hours_start: NaiveTime,
    pub streaming_hours_end: NaiveTime,
    pub timezone: Tz,
}

impl EventSubHealthConfig {
    pub fn from_settings(platform: &PlatformSettings) -> Result<Self> {
        let streaming_hours_start =
            NaiveTime::parse_from_str(&platform.streaming_hours_start, "%H:%M").map_err(|e| {
                Error::Configuration(format!("invalid platform.streaming_hours_start: {e}"))
            })?;
        let streaming_hours_end =
            NaiveTime::parse_from_str(&platform.streaming_hours_end, "%H:%M").map_err(|e| {
                Error::Configuration(format!("invalid platform.streaming_hours_end: {e}"))
            })?;
        let timezone: Tz = platform
            .timezone
            .parse()
            .map_err(|e| Error::Configuration(format!("invalid platform.timezone: {e}")))?;
        Ok(Self {
            streaming_hours_start,
            streaming_hours_end,
            timezone,
        })
    }
}

/// Watches `eventsub:last_event_time` and requests a supervisor restart
/// when the adapter has gone quiet for too long during streaming hours
/// (§4.7). Does not restart the process itself — it only writes the
/// request key; an external supervisor consumes it.
pub struct EventSubHealthProbe {
    config: EventSubHealthConfig,
    bus: Arc<dyn Bus>,
}

impl EventSubHealthProbe {
    pub fn new(config: EventSubHealthConfig, bus: Arc<dyn Bus>) -> Arc<Self> {
        Arc::new(Self { config, bus })
    }

    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                warn!(error = %e, "eventsub health probe tick failed");
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        let last_event_time = match self
            .bus
            .kv_get(channels::keys::EVENTSUB_LAST_EVENT_TIME)
            .await?
        {
            Some(raw) => raw,
            None => return Ok(()),
        };
        let last_event_time: DateTime<Utc> = match last_event_time.parse() {
            Ok(t) => t,
            Err(_) => return Ok(()),
        };

        let silence = Utc::now() - last_event_time;
        if silence.to_std().unwrap_or_default() <= EVENTSUB_MAX_SILENCE {
            return Ok(());
        }

        if !self.within_streaming_hours() {
            return Ok(());
        }

        info!(silence_secs = silence.num_seconds(), "eventsub silent too long, requesting restart");
        self.bus
            .kv_set_ex(
                channels::keys::EVENTSUB_RESTART_REQUESTED,
                "silence_timeout",
                RESTART_REQUEST_TTL_SECS,
            )
            .await?;
        self.bus
            .kv_set_ex(
                channels::keys::EVENTSUB_RESTART_REQUESTED_AT,
                &Utc::now().to_rfc3339(),
                RESTART_REQUEST_TTL_SECS,
            )
            .await
    }

    fn within_streaming_hours(&self) -> bool {
        let local_now = Utc::now().with_timezone(&self.config.timezone).time();
        time_in_window(local_now, self.config.streaming_hours_start, self.config.streaming_hours_end)
    }
}

fn time_in_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        now >= start && now <= end
    } else {
        // Window wraps past midnight (e.g. 22:00-02:00).
        now >= start || now <= end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_config(start: &str, end: &str) -> EventSubHealthConfig {
        EventSubHealthConfig {
            streaming_hours_start: NaiveTime::parse_from_str(start, "%H:%M").unwrap(),
            streaming_hours_end: NaiveTime::parse_from_str(end, "%H:%M").unwrap(),
            timezone: chrono_tz::UTC,
        }
    }

    fn at(hm: &str) -> NaiveTime {
        NaiveTime::parse_from_str(hm, "%H:%M").unwrap()
    }

    #[test]
    fn wrapping_window_includes_late_night_hours() {
        let cfg = probe_config("22:00", "02:00");
        // 23:30 and 01:00 both fall inside a 22:00-02:00 window; noon does not.
        assert!(time_in_window(at("23:30"), cfg.streaming_hours_start, cfg.streaming_hours_end));
        assert!(time_in_window(at("01:00"), cfg.streaming_hours_start, cfg.streaming_hours_end));
        assert!(!time_in_window(at("12:00"), cfg.streaming_hours_start, cfg.streaming_hours_end));
        // Exact boundaries are inclusive.
        assert!(time_in_window(at("22:00"), cfg.streaming_hours_start, cfg.streaming_hours_end));
        assert!(time_in_window(at("02:00"), cfg.streaming_hours_start, cfg.streaming_hours_end));
    }

    #[test]
    fn non_wrapping_window_excludes_outside_hours() {
        let cfg = probe_config("10:00", "23:00");
        assert!(time_in_window(at("15:00"), cfg.streaming_hours_start, cfg.streaming_hours_end));
        assert!(!time_in_window(at("05:00"), cfg.streaming_hours_start, cfg.streaming_hours_end));
        assert!(!time_in_window(at("23:30"), cfg.streaming_hours_start, cfg.streaming_hours_end));
    }

    #[test]
    fn from_settings_parses_platform_fields() {
        let mut platform = signalhub_core::config::PlatformSettings::default();
        platform.streaming_hours_start = "22:00".to_string();
        platform.streaming_hours_end = "02:00".to_string();
        platform.timezone = "America/Los_Angeles".to_string();
        let cfg = EventSubHealthConfig::from_settings(&platform).unwrap();
        assert_eq!(cfg.streaming_hours_start, at("22:00"));
        assert_eq!(cfg.timezone, chrono_tz::America::Los_Angeles);
    }

    #[test]
    fn from_settings_rejects_bad_timezone() {
        let mut platform = signalhub_core::config::PlatformSettings::default();
        platform.timezone = "Not/AZone".to_string();
        assert!(EventSubHealthConfig::from_settings(&platform).is_err());
    }

    #[tokio::test]
    async fn tick_is_noop_when_no_last_event_recorded() {
        let probe = EventSubHealthProbe {
            config: probe_config("00:00", "23:59"),
            bus: Arc::new(NoopBus),
        };
        probe.tick().await.unwrap();
    }

    struct NoopBus;

    #[async_trait::async_trait]
    impl Bus for NoopBus {
        async fn publish(&self, _channel: &str, _envelope: &signalhub_core::Envelope) -> Result<()> {
            Ok(())
        }
        async fn subscribe(&self, _channels: &[&str]) -> Result<signalhub_bus::BusSubscription> {
            unimplemented!()
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
}
