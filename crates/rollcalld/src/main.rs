use anyhow::{Context, Result};
use rollcall_core::{OnnxEmbedder, OnnxFaceDetector};
use rollcall_db::SqliteStore;
use rollcalld::dbus_interface::{AttendanceBus, BUS_NAME, OBJECT_PATH};
use rollcalld::{AttendanceService, BusKind, Config};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use zbus::object_server::SignalEmitter;

const FORWARDER_RETRY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env().context("invalid configuration")?;
    tracing::info!(
        dataset = %config.dataset_root.display(),
        db = %config.db_path.display(),
        models = %config.model_dir.display(),
        threshold = config.recognition_threshold,
        "configuration loaded"
    );

    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );

    let detector = OnnxFaceDetector::load(&config.detector_model_path()).context("failed to load face detector")?;
    let embedder = OnnxEmbedder::load(&config.embedder_model_path()).context("failed to load face embedder")?;

    let service = Arc::new(AttendanceService::new(
        &config,
        Arc::new(detector),
        Arc::new(embedder),
        store.clone(),
        store,
    ));

    {
        let service = Arc::clone(&service);
        match tokio::task::spawn_blocking(move || service.reload()).await? {
            Ok(count) => tracing::info!(identities = count, "loaded persisted embeddings"),
            Err(e) => tracing::warn!(error = %e, "could not load persisted embeddings; starting empty"),
        }
    }

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AttendanceBus::new(Arc::clone(&service)))?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    let forwarder = tokio::spawn(forward_events(Arc::clone(&service), conn.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    if service.cancel_training() {
        tracing::info!("cancelled running training");
    }
    forwarder.abort();

    Ok(())
}

/// Re-emit every observer event as a D-Bus `Event` signal.
///
/// The forwarder is an ordinary observer; if the broadcaster drops it for
/// falling behind, it reconnects.
async fn forward_events(service: Arc<AttendanceService>, conn: zbus::Connection) {
    loop {
        let mut observer = service.connect_observer();
        tracing::debug!(observer = %observer.id(), "signal forwarder connected");

        while let Some(event) = observer.recv().await {
            let emitter = match SignalEmitter::new(&conn, OBJECT_PATH) {
                Ok(emitter) => emitter,
                Err(e) => {
                    tracing::error!(error = %e, "invalid signal path");
                    return;
                }
            };
            if let Err(e) = AttendanceBus::event(&emitter, &event.to_json()).await {
                tracing::warn!(error = %e, "failed to emit event signal");
            }
        }

        tracing::warn!("signal forwarder disconnected; reconnecting");
        tokio::time::sleep(FORWARDER_RETRY).await;
    }
}
