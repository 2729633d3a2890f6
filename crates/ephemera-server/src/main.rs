//! Ephemera server - audio that wears out as it is heard
//!
//! Binds the HTTP surface over the core store. On startup it:
//! 1. Reads configuration from the environment
//! 2. Scans the audio directory, ingesting new tracks to mono PCM
//! 3. Warms the waveform caches for everything it found
//! 4. Serves until terminated
//!
//! ## Environment
//!
//! - `AUDIO_DIR`, `METADATA_DIR`: storage locations (created if missing)
//! - `SEGMENT_DURATION`, `DEGRADATION_RATE`, `LOCK_TIMEOUT_SECS`: store tuning
//! - `PORT`: listen port (default 5000)
//! - `RUST_LOG`: log filter (default info)

mod routes;

use std::net::SocketAddr;

use anyhow::Context;

use ephemera_core::{waveform, StoreConfig};
use routes::{build_router, AppState};

const DEFAULT_PORT: u16 = 5000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config = StoreConfig::from_env();
    std::fs::create_dir_all(&config.audio_dir)
        .with_context(|| format!("creating audio dir {}", config.audio_dir.display()))?;
    std::fs::create_dir_all(&config.metadata_dir)
        .with_context(|| format!("creating metadata dir {}", config.metadata_dir.display()))?;

    log::info!(
        "ephemera starting: audio={} metadata={} segment={}s rate={}",
        config.audio_dir.display(),
        config.metadata_dir.display(),
        config.segment_duration,
        config.degradation_rate
    );

    let state = AppState::new(config);

    let initialized = state
        .metadata
        .scan_and_initialize()
        .context("scanning audio directory")?;
    if !initialized.is_empty() {
        log::info!("initialized {} new track(s): {:?}", initialized.len(), initialized);
    }

    // Warm waveform caches so first page loads don't pay the full-file read
    for record in state.metadata.list_tracks()? {
        if let Err(e) = waveform::load_or_generate(
            &state.frame_store,
            &state.config.metadata_dir,
            &record.filename,
        ) {
            log::warn!("waveform cache for '{}' failed: {}", record.filename, e);
        }
    }

    let port = std::env::var("PORT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    log::info!("listening on http://{}", addr);

    axum::serve(listener, build_router(state))
        .await
        .context("server terminated")?;
    Ok(())
}
