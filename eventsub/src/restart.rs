use chrono::{NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{error, info, warn};

/// Sleeps until the next occurrence of `local_time` in `timezone`, then exits
/// the process. An external supervisor is expected to restart it — this is
/// an intentional liveness measure to clear any residual bad state (§4.2).
pub async fn run_daily_restart(local_time: &str, timezone: &str) {
    let tz: Tz = match timezone.parse() {
        Ok(tz) => tz,
        Err(e) => {
            error!(%timezone, error = %e, "invalid eventsub restart timezone, disabling daily restart");
            return;
        }
    };
    let time = match NaiveTime::parse_from_str(local_time, "%H:%M") {
        Ok(t) => t,
        Err(e) => {
            error!(%local_time, error = %e, "invalid eventsub restart time, disabling daily restart");
            return;
        }
    };

    loop {
        let sleep_for = match next_occurrence(time, tz) {
            Some(d) => d,
            None => {
                warn!("could not compute next daily restart occurrence, retrying in 1h");
                std::time::Duration::from_secs(3600)
            }
        };
        info!(seconds = sleep_for.as_secs(), "eventsub daily restart scheduled");
        tokio::time::sleep(sleep_for).await;
        info!("eventsub daily restart firing, exiting process for supervisor restart");
        std::process::exit(0);
    }
}

fn next_occurrence(time: NaiveTime, tz: Tz) -> Option<std::time::Duration> {
    let now_utc = Utc::now();
    let now_local = now_utc.with_timezone(&tz);
    let today = now_local.date_naive();
    let mut candidate = tz.from_local_datetime(&today.and_time(time)).single()?;
    if candidate <= now_local {
        candidate = tz
            .from_local_datetime(&today.succ_opt()?.and_time(time))
            .single()?;
    }
    let delta = candidate.with_timezone(&Utc) - now_utc;
    delta.to_std().ok()
}
