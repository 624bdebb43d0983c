//! Process entry point: loads configuration, wires `Services`, starts the
//! HTTP/WebSocket listener and every background cycle (EventSub, campaign
//! ingest, ad scheduler, EventSub health probe, daily restart, OBS/OSC/music/
//! game-TCP adapters), then waits for a shutdown signal.

mod http;
mod ingest;
mod metrics;
mod state;

use std::net::SocketAddr;

use signalhub_adapters::{GameTcpServer, MusicPoller, MusicPollerConfig, ObsAdapter, ObsConfig, OscListener};
use signalhub_core::Settings;
use signalhub_eventsub::restart;
use signalhub_scheduler::{EventSubHealthConfig, EventSubHealthProbe};
use tokio::signal;
use tracing::{info, warn};

use crate::state::Services;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(tracing::Level::INFO)
        .init();

    let settings = Settings::load()?;
    let encryption_key = load_encryption_key()?;

    info!("connecting to storage, bus, and platform token store");
    let services = Services::build(&settings, &encryption_key).await?;

    let health_probe = EventSubHealthProbe::new(
        EventSubHealthConfig::from_settings(&settings.platform)?,
        services.bus.clone(),
    );
    let obs = ObsAdapter::new(
        ObsConfig {
            websocket_url: settings.obs.websocket_url.clone(),
            password: non_empty(&settings.obs.password),
        },
        services.bus.clone(),
    );
    let osc = OscListener::new(services.bus.clone());
    let music = MusicPoller::new(
        MusicPollerConfig {
            poll_url: settings.music.poll_url.clone(),
        },
        services.bus.clone(),
    );
    let game_tcp = GameTcpServer::new(services.bus.clone());

    let app = http::create_router(services.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "http server listening");
    let http_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "http server exited with error");
        }
    });

    tokio::spawn(services.eventsub.clone().run());
    tokio::spawn(services.ad_scheduler.clone().run());
    tokio::spawn(health_probe.run());
    tokio::spawn(ingest::run(services.clone()));

    let restart_local_time = settings.platform.daily_restart_local_time.clone();
    let restart_timezone = settings.platform.timezone.clone();
    tokio::spawn(async move {
        restart::run_daily_restart(&restart_local_time, &restart_timezone).await;
    });

    tokio::spawn(obs.run());
    tokio::spawn(music.run());

    let osc_bind = format!("0.0.0.0:{}", settings.server.osc_udp_port);
    tokio::spawn(async move {
        if let Err(e) = osc.run(&osc_bind).await {
            warn!(error = %e, "osc listener exited");
        }
    });

    let game_tcp_bind = format!("0.0.0.0:{}", settings.server.game_tcp_port);
    tokio::spawn(async move {
        if let Err(e) = game_tcp.run(&game_tcp_bind).await {
            warn!(error = %e, "game tcp server exited");
        }
    });

    wait_for_shutdown().await;
    info!("shutdown signal received, stopping http server");
    http_server.abort();
    Ok(())
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Reads and hex-decodes `SIGNALHUB_ENCRYPTION_KEY`, a 32-byte AES-256-GCM
/// key for `TokenStore`. Kept out of `Settings` (unlike everything else
/// config-driven) so it's never accidentally written to a config file.
fn load_encryption_key() -> anyhow::Result<Vec<u8>> {
    let hex_key = std::env::var("SIGNALHUB_ENCRYPTION_KEY")
        .map_err(|_| anyhow::anyhow!("SIGNALHUB_ENCRYPTION_KEY must be set to a 64-character hex string"))?;
    let key = hex::decode(hex_key.trim())
        .map_err(|e| anyhow::anyhow!("SIGNALHUB_ENCRYPTION_KEY is not valid hex: {e}"))?;
    if key.len() != 32 {
        anyhow::bail!("SIGNALHUB_ENCRYPTION_KEY must decode to exactly 32 bytes, got {}", key.len());
    }
    Ok(key)
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
