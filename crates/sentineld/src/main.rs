use anyhow::{Context, Result};
use sentinel_core::{Annotator, FaceAnalyzer, FsEvidenceStore, FsUserStore, Matcher, OnnxFaceAnalyzer};
use sentinel_hw::SourceRegistry;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod monitor;
mod notifier;
mod telegram;

use config::Config;
use engine::{Engine, EngineParts};
use monitor::Monitor;
use notifier::NotifierWorker;

/// Pending notifications beyond this are dropped.
const NOTIFY_QUEUE: usize = 8;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("sentineld starting");

    let config = Config::load().context("failed to load configuration")?;

    let analyzer = OnnxFaceAnalyzer::load(&config.model_dir, config.detection_size)
        .with_context(|| format!("failed to load face models from {}", config.model_dir.display()))?;
    let analyzer: Arc<Mutex<dyn FaceAnalyzer + Send>> = Arc::new(Mutex::new(analyzer));
    tracing::info!(model_dir = %config.model_dir.display(), "face models loaded");

    let registry = Arc::new(SourceRegistry::default());
    let engine = Arc::new(Engine::new(EngineParts {
        registry: Arc::clone(&registry),
        camera: config.camera_key(),
        enrollment_camera: config.enrollment_key(),
        capture: config.capture_config(),
        analyzer,
        users: FsUserStore::new(&config.users_dir),
    }));

    let camera = engine.open_camera()?;
    tracing::info!(source = %camera.key(), "camera source started");

    {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || engine.retrain()).await?;
    }

    let notifier = if config.send_telegram {
        let token = config.telegram_token.clone();
        let chat_id = config.telegram_chat_id.clone();
        Some(NotifierWorker::spawn(
            move || telegram::TelegramNotifier::new(&token, &chat_id),
            NOTIFY_QUEUE,
        )?)
    } else {
        tracing::info!("telegram notifications disabled");
        None
    };

    let annotator = Annotator::with_font_file(&config.label_font);
    if !annotator.has_font() {
        tracing::warn!(font = %config.label_font.display(), "label font unavailable; drawing boxes only");
    }
    let monitor = Monitor::new(
        Arc::clone(&engine),
        Matcher::new(config.match_threshold, annotator),
        Box::new(FsEvidenceStore::new(&config.intruder_dir)),
        notifier.as_ref().map(NotifierWorker::handle),
        config.alert_policy(),
        config.frame_skip,
    );
    let monitor = monitor::spawn_monitor(monitor, camera)?;

    let builder = if system_bus() {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let connection = builder
        .name(dbus_interface::BUS_NAME)?
        .serve_at(
            dbus_interface::OBJECT_PATH,
            dbus_interface::SentinelService::new(Arc::clone(&engine)),
        )?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = dbus_interface::BUS_NAME, "sentineld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("sentineld shutting down");

    drop(connection);
    tokio::task::spawn_blocking(move || {
        monitor.stop();
        if let Some(notifier) = notifier {
            notifier.shutdown();
        }
        registry.stop_all();
    })
    .await?;

    tracing::info!("sentineld stopped");
    Ok(())
}

/// `SENTINEL_DBUS_SYSTEM=1` serves on the system bus instead of the session bus.
fn system_bus() -> bool {
    std::env::var("SENTINEL_DBUS_SYSTEM")
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
