//! Capture daemon
//!
//! Wires up:
//! - Settings and state stores (JSON files, or Redis when `REDIS_URL` is set)
//! - The pending-work ledger
//! - Background workers for encode, preview and backup jobs
//! - The capture loop, restarted whenever capture is re-enabled

use std::sync::Arc;
use std::time::Duration;
use timelapse::adapters::local::{
    events, BackupAdapter, CommandCamera, EventHub, FfmpegEncoder, JsonLedgerFile,
    JsonSettingsFile, JsonStateFile, LocalQueue, SysfsPower,
};
use timelapse::application::backup::BackupManager;
use timelapse::application::capture::{CaptureService, LoopExit};
use timelapse::application::encoder::SegmentEncoder;
use timelapse::application::ledger::SharedLedger;
use timelapse::application::power::PowerSaver;
use timelapse::application::worker::{defer_unstarted, WorkerService};
use timelapse::config::CaptureConfig;
use timelapse::error::StoreError;
use timelapse::ports::repository::StateRepository;
use timelapse::ports::settings::{load_settings, SettingsStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Back-off after a failed capture run before trying again.
const RETRY_DELAY: Duration = Duration::from_secs(5);

type Stores = (Arc<dyn SettingsStore>, Arc<dyn StateRepository>);

fn open_stores(config: &CaptureConfig) -> Result<Stores, StoreError> {
    #[cfg(feature = "redis")]
    if let Some(url) = &config.redis_url {
        let pool = timelapse::adapters::local::RedisPool::new(url)?;
        info!("Using Redis for settings and state");
        return Ok((Arc::new(pool.clone()), Arc::new(pool)));
    }
    #[cfg(not(feature = "redis"))]
    if config.redis_url.is_some() {
        warn!("REDIS_URL is set but Redis support is not compiled in, using JSON files");
    }

    Ok((
        Arc::new(JsonSettingsFile::new(&config.settings_path)),
        Arc::new(JsonStateFile::new(&config.state_path)),
    ))
}

/// Wait for SIGINT or SIGTERM.
async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Sleep unless shutdown is requested first. Returns `true` on shutdown.
async fn pause(shutdown: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(period) => false,
    }
}

#[tokio::main]
async fn main() {
    let config = CaptureConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1. Adapters (Local implementations)
    let (settings, state) = match open_stores(&config) {
        Ok(stores) => stores,
        Err(e) => {
            error!(error = %e, "Failed to open settings and state stores");
            std::process::exit(1);
        }
    };

    let ledger = match SharedLedger::load(Arc::new(JsonLedgerFile::new(&config.ledger_path))).await
    {
        Ok(ledger) => Arc::new(ledger),
        Err(e) => {
            error!(error = %e, path = %config.ledger_path.display(), "Failed to load pending-work ledger");
            std::process::exit(1);
        }
    };

    let storage = match BackupAdapter::new() {
        Ok(storage) => storage,
        Err(e) => {
            error!(error = %e, "Failed to create backup client");
            std::process::exit(1);
        }
    };

    let queue = Arc::new(LocalQueue::new());
    let event_hub = Arc::new(EventHub::new());
    events::listener::start(event_hub.clone());

    // 2. Application Services
    let backup = Arc::new(BackupManager::new(
        ledger.clone(),
        Arc::new(storage),
        queue.clone(),
        event_hub.clone(),
    ));

    let encoder = Arc::new(SegmentEncoder::new(Arc::new(FfmpegEncoder::new(
        &config.ffmpeg,
        &config.ffprobe,
        config.niceness,
    ))));

    if let Ok(current) = load_settings(settings.as_ref()).await {
        if let Some(video) = &current.video {
            if let Err(e) = encoder.recover(&video.dir).await {
                warn!(error = %e, "Could not clean up interrupted appends");
            }
        }
    }

    let worker_service = Arc::new(WorkerService::new(
        queue.clone(),
        encoder,
        backup.clone(),
        ledger.clone(),
        event_hub.clone(),
    ));

    let capture = CaptureService::new(
        settings,
        state,
        ledger.clone(),
        queue.clone(),
        backup,
        PowerSaver::new(Arc::new(SysfsPower::new(
            &config.tvservice,
            config.board_leds.clone(),
        ))),
        event_hub,
        config.poll_period,
    );

    // 3. Start Workers
    let workers: Vec<_> = (0..config.workers)
        .map(|i| {
            let w = worker_service.clone();
            tokio::spawn(async move {
                w.run_worker_loop(i).await;
            })
        })
        .collect();
    info!(workers = config.workers, "Started background workers");

    // 4. Termination signals
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            termination_signal().await;
            info!("Termination requested");
            shutdown.cancel();
        });
    }

    // 5. Capture until terminated
    let mut camera = CommandCamera::new(
        &config.camera_command,
        config.capture_timeout,
        config.camera_led_path.clone(),
    );
    while !shutdown.is_cancelled() {
        match capture.reinit_requested().await {
            Ok(true) => {
                if let Err(e) = capture.reinitialize().await {
                    error!(error = %e, "Reinitialisation failed");
                    if pause(&shutdown, RETRY_DELAY).await {
                        break;
                    }
                    continue;
                }
            }
            Ok(false) => {}
            Err(e) => {
                error!(error = %e, "Failed to read reinit flag");
                if pause(&shutdown, RETRY_DELAY).await {
                    break;
                }
                continue;
            }
        }

        let wait = match capture.run(&mut camera, &shutdown).await {
            Ok(LoopExit::Shutdown) => break,
            Ok(LoopExit::Reinit) => continue,
            Ok(LoopExit::Disabled) => config.poll_period,
            Err(_) => RETRY_DELAY,
        };
        if pause(&shutdown, wait).await {
            break;
        }
    }

    // 6. Shutdown: let in-flight jobs finish, keep the rest for the next start
    queue.close();
    let finished = tokio::time::timeout(
        config.shutdown_grace,
        futures::future::join_all(workers),
    )
    .await;
    if finished.is_err() {
        warn!(grace = ?config.shutdown_grace, "Workers still busy after grace period");
    }

    if let Err(e) = defer_unstarted(&ledger, queue.drain()).await {
        error!(error = %e, "Failed to record unstarted encodes");
    }
    if let Err(e) = ledger.persist().await {
        error!(error = %e, "Failed to persist pending-work ledger");
    }
    info!("cancelled");
    std::process::exit(1);
}
