use anyhow::{Context, Result};
use lib_relay::SourceKind;
use lib_relay::codec_for;
use lib_relay::core::{Broadcaster, detector_for};
use lib_relay::stream::{EndpointState, serve};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::relay_logic::config::{self, RelaySettings};
use crate::relay_logic::{logger, signals};

/// Runs one relay on an already bound listener until `shutdown` fires.
pub async fn run(settings: &RelaySettings, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
    let broadcaster = Arc::new(Broadcaster::new(&settings.hardware_path, codec_for(settings.source)));
    let detector = detector_for(settings.detector, settings.poll_interval);
    log::info!(
        "Relaying {} from {} using the {} detector",
        settings.source,
        settings.hardware_path.display(),
        detector.name()
    );

    let (changes_tx, changes_rx) = mpsc::unbounded_channel();
    let detector_handle = detector.spawn(settings.hardware_path.clone(), changes_tx, shutdown.clone());
    let pump_handle = tokio::spawn(broadcaster.clone().run(changes_rx, shutdown.clone()));

    let state = EndpointState::new(broadcaster, shutdown.clone()).with_heartbeat_interval(settings.heartbeat_interval);
    let served = serve(listener, state).await.context("relay server failed");

    // Whatever ended the server, stop the rest too.
    shutdown.cancel();
    let _ = tokio::join!(detector_handle, pump_handle);
    served
}

/// Entry point shared by `server_radar` and `server_rt`.
pub async fn launch(source: SourceKind, app_name: &str) -> Result<()> {
    let settings = config::load_relay_config(source)?;
    logger::setup_logging(app_name, &settings.log_dir, &settings.log_level)?;

    let listener = TcpListener::bind(("0.0.0.0", settings.port))
        .await
        .with_context(|| format!("cannot listen on port {}", settings.port))?;

    let shutdown = CancellationToken::new();
    let signal_handle = signals::cancel_on_signal(shutdown.clone());

    run(&settings, listener, shutdown).await?;
    signal_handle.abort();

    log::info!("Shutdown complete.");
    Ok(())
}
