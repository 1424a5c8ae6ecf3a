use crate::runtime::config::{ConfigError, RuntimeConfig};
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use sensor_core::{Pipeline, PipelineError};
use sensor_io::{open_store, resolve_location, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("pipeline: {0}")]
    Pipeline(#[from] PipelineError),
}

pub fn run_from_args() -> Result<(), AppError> {
    let config = RuntimeConfig::from_env()?;
    if config.show_help {
        RuntimeConfig::print_help();
        return Ok(());
    }
    run(config)
}

pub fn run(config: RuntimeConfig) -> Result<(), AppError> {
    let _log_guard = init_tracing(config.json_logs, config.log_dir.as_deref());

    telemetry::init();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    let store_path = resolve_location(&config.store_path);
    let store = open_store(config.store_kind, &store_path)?;
    info!(
        backend = store.name(),
        path = %store_path.display(),
        "Store ready"
    );

    let pipeline = Arc::new(
        Pipeline::builder(store)
            .config(config.pipeline_config())
            .devices(
                config
                    .devices
                    .iter()
                    .map(|d| (d.name.clone(), d.interval)),
            )
            .build()?,
    );

    for producer in pipeline.registry() {
        info!(
            device = %producer.name(),
            interval_ms = producer.interval().as_millis() as u64,
            "Device registered"
        );
    }

    pipeline.start()?;
    let not_started = pipeline
        .registry()
        .iter()
        .filter(|p| !p.is_running())
        .count();
    if not_started > 0 {
        warn!(not_started, "Some devices failed to start");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let updater = telemetry::start_metrics_updater(Arc::clone(&pipeline), Arc::clone(&stop));

    match config.run_seconds {
        Some(seconds) => {
            info!(seconds, "Running for limited duration");
            thread::sleep(Duration::from_secs(seconds));
        }
        None => {
            info!("Sensor bank running until the process is terminated");
            loop {
                thread::park();
            }
        }
    }

    pipeline.shutdown();
    stop.store(true, Ordering::Relaxed);
    let _ = updater.join();

    let hub = pipeline.hub().stats();
    let sink = pipeline.sink().stats();
    info!(
        enqueued = hub.enqueued,
        rejected = hub.rejected,
        batches = hub.batches,
        persisted = sink.messages_persisted,
        failed_batches = sink.batches_failed,
        path = %store_path.display(),
        "Run complete"
    );
    Ok(())
}

