use anyhow::Result;
use liveguard_core::{
    FrameGate, InferencePipeline, LoadError, MiniFasLiveness, ModelConfigSet, ModelRegistry,
    ScrfdDetector,
};
use liveguard_hw::DirectorySource;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::Config;
use engine::PipelineOptions;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("liveguardd starting");

    let config = Config::from_env();
    tracing::info!(
        model_dir = %config.model_dir.display(),
        detector = %config.detector_model_path().display(),
        liveness_config = %config.liveness_config.display(),
        face_selection = ?config.face_selection,
        "configuration loaded"
    );

    let pipeline = InferencePipeline::new(
        ScrfdDetector::new(config.detector_model_path()),
        MiniFasLiveness::new(&config.model_dir),
        Arc::new(ModelRegistry::new()),
        Arc::new(FrameGate::new()),
    )
    .with_selection(config.face_selection);

    // Models load on the pipeline thread; frames arriving meanwhile are skipped.
    let liveness_config = config.liveness_config.clone();
    let handle = engine::spawn_pipeline(
        pipeline,
        move |p| {
            p.load_models(
                || Ok(()),
                || ModelConfigSet::from_path(&liveness_config).map_err(LoadError::from),
            );
        },
        PipelineOptions {
            slow_pass: config.slow_pass,
        },
    )?;

    let _source_thread = match &config.frame_dir {
        Some(dir) => {
            let source = DirectorySource::open(
                dir,
                config.frame_format,
                config.frame_width,
                config.frame_height,
            )?;
            Some(engine::spawn_source(
                source,
                handle.clone(),
                config.frame_interval,
            )?)
        }
        None => {
            tracing::warn!("LIVEGUARD_FRAME_DIR not set; no frames will be delivered");
            None
        }
    };

    let _connection = if config.dbus_enabled {
        let conn = zbus::connection::Builder::session()?
            .name("org.freedesktop.Liveguard1")?
            .serve_at(
                "/org/freedesktop/Liveguard1",
                dbus_interface::LivenessService::new(handle.clone()),
            )?
            .build()
            .await?;
        tracing::info!("D-Bus service registered on session bus");
        Some(conn)
    } else {
        tracing::info!("D-Bus disabled via LIVEGUARD_DBUS=0");
        None
    };

    tracing::info!("liveguardd ready");

    let mut verdicts = handle.subscribe();
    loop {
        tokio::select! {
            changed = verdicts.changed() => {
                if changed.is_err() {
                    tracing::warn!("pipeline thread exited");
                    break;
                }
                if let Some(published) = verdicts.borrow_and_update().as_ref() {
                    tracing::info!(outcome = ?published, "published");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    let stats = handle.stats();
    tracing::info!(
        admitted = stats.admitted,
        dropped = stats.dropped,
        verdicts = stats.verdicts,
        failures = stats.failures,
        "liveguardd shutting down"
    );

    Ok(())
}
