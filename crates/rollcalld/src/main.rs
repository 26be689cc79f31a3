use anyhow::{Context, Result};
use rollcall_core::{CommandAnalyzer, GalleryFile, GalleryService};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};
use dbus_interface::{GalleryInterface, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env()?;
    tracing::info!(
        gallery = %config.gallery_path.display(),
        threshold = config.similarity_threshold,
        policy = %config.match_policy,
        bus = ?config.bus,
        "configuration loaded"
    );

    let analyzer = CommandAnalyzer::new(
        config.analyzer_program.clone(),
        config.analyzer_args.clone(),
    );
    tracing::info!(program = analyzer.program(), "face analyzer configured");
    let service = GalleryService::new(GalleryFile::new(&config.gallery_path), analyzer)
        .with_threshold(config.similarity_threshold)
        .with_policy(config.match_policy);
    let engine = engine::spawn_engine(service)?;

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, GalleryInterface::new(engine))?
        .build()
        .await
        .with_context(|| format!("registering {BUS_NAME} on the {:?} bus", config.bus))?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
