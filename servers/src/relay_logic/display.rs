use anyhow::Result;
use lib_relay::SourceKind;
use lib_relay::core::{DisplayCoordinator, SnapshotWriter};
use lib_relay::ingestors::{UpstreamClient, UpstreamConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::relay_logic::config::{self, DisplaySettings};
use crate::relay_logic::{logger, signals};

/// Runs the display pipeline until `shutdown` fires: one upstream client per
/// relay feeding a single coordinator.
pub async fn run(settings: &DisplaySettings, shutdown: CancellationToken) -> DisplayCoordinator {
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let clients = [(SourceKind::Radar, &settings.radar_url), (SourceKind::Rt, &settings.rt_url)]
        .into_iter()
        .map(|(source, url)| {
            let config = UpstreamConfig::new(url.clone())
                .with_reconnect_delay(settings.reconnect_delay)
                .with_silence_timeout(settings.silence_timeout);
            let client = UpstreamClient::new(source, config, events_tx.clone());
            tokio::spawn(client.run(shutdown.clone()))
        })
        .collect::<Vec<_>>();
    drop(events_tx);

    let writer = SnapshotWriter::new(&settings.output_path, settings.snapshot_period);
    log::info!(
        "Writing snapshots of {} + {} to {} every {}ms",
        settings.radar_url,
        settings.rt_url,
        settings.output_path.display(),
        settings.snapshot_period.as_millis()
    );
    let coordinator = DisplayCoordinator::new(writer).run(events_rx, shutdown.clone()).await;

    for client in clients {
        let _ = client.await;
    }
    coordinator
}

/// Entry point of `server_display`.
pub async fn launch(app_name: &str) -> Result<()> {
    let settings = config::load_display_config();
    logger::setup_logging(app_name, &settings.log_dir, &settings.log_level)?;

    let shutdown = CancellationToken::new();
    let signal_handle = signals::cancel_on_signal(shutdown.clone());

    run(&settings, shutdown).await;
    signal_handle.abort();

    log::info!("Shutdown complete.");
    Ok(())
}
