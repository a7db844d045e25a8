use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod store;

pub const BUS_NAME: &str = "org.emosense.Emosense1";
pub const OBJECT_PATH: &str = "/org/emosense/Emosense1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("emosensed starting");

    let config = config::Config::from_env();
    tracing::info!(
        model_dir = %config.model_dir.display(),
        model = %config.model_path.display(),
        db = %config.db_path.display(),
        media_root = %config.media_root.display(),
        camera = %config.camera_device,
        "configuration loaded"
    );

    // Model loading failures are fatal; nothing is served without a classifier.
    let engine = engine::spawn_engine(engine::EngineSettings {
        model_path: config.model_path_str(),
        cascade_path: config.cascade_path_str(),
        onnx_layout: config.onnx_layout,
        min_face_size: config.min_face_size,
        camera_device: config.camera_device.clone(),
        warmup_frames: config.warmup_frames,
    })
    .context("failed to start inference engine")?;

    let results = store::ResultStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open {}", config.db_path.display()))?;
    let media = store::MediaStore::new(config.media_root.clone(), config.media_url.clone());

    let service =
        dbus_interface::EmosenseService::new(engine, results, media, config.model_path.clone());

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "emosensed ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("emosensed shutting down");

    Ok(())
}
