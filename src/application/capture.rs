//! The capture loop: paces the camera, advances the counters and cuts segments.

use crate::adapters::local::EventHub;
use crate::application::backup::BackupManager;
use crate::application::ledger::SharedLedger;
use crate::application::power::PowerSaver;
use crate::domain::jobs::{Job, PipelineEvent, PreviewJob, SegmentJob};
use crate::domain::naming::{series_name, ImageLayout, SegmentSpan};
use crate::domain::pacing::Pacer;
use crate::domain::retention::RetentionPolicy;
use crate::domain::session::CaptureSession;
use crate::domain::settings::Settings;
use crate::error::PipelineError;
use crate::ports::camera::Camera;
use crate::ports::queue::JobQueuePort;
use crate::ports::repository::StateRepository;
use crate::ports::settings::{capture_enabled, load_settings, SettingsStore};
use chrono::{Local, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Why a capture run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Capture was switched off.
    Disabled,
    /// The reinit flag was raised; directories and series must be recreated.
    Reinit,
    /// The process is terminating.
    Shutdown,
}

impl LoopExit {
    fn session_note(&self) -> &'static str {
        match self {
            LoopExit::Disabled => "capture disabled",
            LoopExit::Reinit => "reinitialised",
            LoopExit::Shutdown => "process terminated",
        }
    }
}

pub struct CaptureService {
    settings: Arc<dyn SettingsStore>,
    state: Arc<dyn StateRepository>,
    ledger: Arc<SharedLedger>,
    queue: Arc<dyn JobQueuePort>,
    backup: Arc<BackupManager>,
    power: PowerSaver,
    events: Arc<EventHub>,
    poll_period: Duration,
}

impl CaptureService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        state: Arc<dyn StateRepository>,
        ledger: Arc<SharedLedger>,
        queue: Arc<dyn JobQueuePort>,
        backup: Arc<BackupManager>,
        power: PowerSaver,
        events: Arc<EventHub>,
        poll_period: Duration,
    ) -> Self {
        Self {
            settings,
            state,
            ledger,
            queue,
            backup,
            power,
            events,
            poll_period,
        }
    }

    pub async fn reinit_requested(&self) -> Result<bool, PipelineError> {
        Ok(self.state.reinit_requested().await?)
    }

    /// Recreate the output directories and start a new series.
    ///
    /// The unfinished segment of the old series is dispatched as it stands.
    pub async fn reinitialize(&self) -> Result<(), PipelineError> {
        let settings = load_settings(self.settings.as_ref()).await?;

        fs::create_dir_all(&settings.image_root).await?;
        if let Some(video) = &settings.video {
            fs::create_dir_all(&video.dir).await?;
        }
        if let Some(dir) = &settings.preview_dir {
            fs::create_dir_all(dir).await?;
        }

        let index = self.state.image_index().await?;
        if let (Some(open), Some(series)) = (
            self.state.open_segment().await?,
            self.state.current_series().await?,
        ) {
            let partial = open.truncated_to(index);
            if !partial.is_empty() {
                let layout = ImageLayout::new(&settings.image_root, series);
                info!(segment = partial.index, len = partial.len, "Dispatching unfinished segment of the previous series");
                self.dispatch_segment(partial, &layout, &settings).await?;
            }
        }

        let series = series_name(Local::now());
        self.state.set_current_series(&series).await?;
        self.state.set_open_segment(None).await?;
        self.state.set_reinit(false).await?;
        info!(%series, image_index = index, "Reinitialised capture");
        Ok(())
    }

    async fn ensure_series(&self) -> Result<String, PipelineError> {
        if let Some(series) = self.state.current_series().await? {
            return Ok(series);
        }
        let series = series_name(Local::now());
        self.state.set_current_series(&series).await?;
        info!(%series, "Started capture series");
        Ok(series)
    }

    pub async fn start_session(&self) -> Result<(), PipelineError> {
        if self.state.open_session().await?.is_some() {
            return Ok(());
        }
        let index = self.state.image_index().await?;
        self.state
            .set_open_session(Some(CaptureSession::open(index, Utc::now())))
            .await?;
        debug!(image_start = index, "Capture session opened");
        Ok(())
    }

    pub async fn end_session(&self, description: Option<String>) -> Result<(), PipelineError> {
        let Some(session) = self.state.open_session().await? else {
            return Ok(());
        };
        let index = self.state.image_index().await?;
        self.state.set_open_session(None).await?;
        match session.close(index, Utc::now(), description) {
            Some(closed) => {
                info!(
                    image_start = closed.image_start,
                    frames = closed.num_frames(index),
                    "Capture session closed"
                );
                self.state.append_closed_session(closed).await?;
            }
            None => debug!("Discarded capture session without images"),
        }
        Ok(())
    }

    /// One capture run, from camera set-up to release.
    ///
    /// Power state is restored, the camera closed and the session ended on every
    /// way out, errors included.
    pub async fn run(
        &self,
        camera: &mut dyn Camera,
        shutdown: &CancellationToken,
    ) -> Result<LoopExit, PipelineError> {
        let settings = load_settings(self.settings.as_ref()).await?;
        if !settings.capture_enabled {
            return Ok(LoopExit::Disabled);
        }
        let series = self.ensure_series().await?;

        camera.configure(&settings.camera).await?;
        self.power.apply(&settings.power, camera).await;
        self.start_session().await?;
        info!(
            %series,
            interval = ?settings.interval,
            segment_size = settings.segment_size,
            "Capture started"
        );

        let result = self
            .capture_loop(camera, settings.clone(), &series, shutdown)
            .await;

        self.power.restore(&settings.power, camera).await;
        if let Err(e) = camera.close().await {
            warn!(error = %e, "Failed to release camera");
        }
        let note = match &result {
            Ok(exit) => exit.session_note().to_string(),
            Err(e) => format!("capture failed: {e}"),
        };
        if let Err(e) = self.end_session(Some(note)).await {
            error!(error = %e, "Failed to close capture session");
        }

        match &result {
            Ok(exit) => info!(?exit, "Capture stopped"),
            Err(e) => error!(error = %e, "Capture aborted"),
        }
        result
    }

    async fn capture_loop(
        &self,
        camera: &mut dyn Camera,
        mut settings: Settings,
        series: &str,
        shutdown: &CancellationToken,
    ) -> Result<LoopExit, PipelineError> {
        let layout = ImageLayout::new(&settings.image_root, series);
        let mut index = self.state.image_index().await?;
        let mut span = self.recover_segments(index, &layout, &settings).await?;
        let mut pacer = Pacer::new(settings.interval);

        loop {
            if shutdown.is_cancelled() {
                return Ok(LoopExit::Shutdown);
            }
            if !capture_enabled(self.settings.as_ref()).await? {
                return Ok(LoopExit::Disabled);
            }
            if self.state.reinit_requested().await? {
                return Ok(LoopExit::Reinit);
            }

            let now = Instant::now();
            if !pacer.is_due(now) {
                if self.idle(shutdown).await {
                    return Ok(LoopExit::Shutdown);
                }
                continue;
            }

            let path = layout.image_path(span.index, index)?;
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir).await?;
            }
            match camera.capture(&path).await {
                Ok(()) => {}
                Err(e) if e.is_transient() => {
                    warn!(image_index = index, error = %e, "Capture failed, retrying");
                    if self.idle(shutdown).await {
                        return Ok(LoopExit::Shutdown);
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            pacer.record_capture(now);
            let captured = index;
            index = self.state.advance_image_index(captured).await?;
            debug!(image_index = captured, path = %path.display(), "Image captured");
            self.events.publish(PipelineEvent::ImageCaptured {
                index: captured,
                path: path.clone(),
            });

            self.after_capture(&path, index, &settings).await?;

            if index >= span.end() {
                self.redispatch_pending(&layout, &settings).await?;
                self.dispatch_segment(span, &layout, &settings).await?;
                settings = self.refresh_settings(settings, camera, &mut pacer).await?;
                span = SegmentSpan::containing(index, settings.segment_size).clipped_to(index);
                self.state.set_open_segment(Some(span)).await?;
            }
        }
    }

    /// Sleep one poll period. Returns `true` if shutdown was requested meanwhile.
    async fn idle(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => true,
            _ = tokio::time::sleep(self.poll_period) => false,
        }
    }

    async fn after_capture(
        &self,
        path: &Path,
        index: u64,
        settings: &Settings,
    ) -> Result<(), PipelineError> {
        self.backup.after_capture(path, settings).await?;
        if settings.image_cleanup {
            let policy = RetentionPolicy {
                backup_enabled: settings.backup_enabled(),
                needs_full_segments: settings.needs_full_segments(),
                current_image_index: index,
                segment_size: settings.segment_size,
            };
            self.backup.sweep(&policy).await?;
        }
        Ok(())
    }

    /// Take a new settings snapshot at a segment boundary.
    async fn refresh_settings(
        &self,
        current: Settings,
        camera: &mut dyn Camera,
        pacer: &mut Pacer,
    ) -> Result<Settings, PipelineError> {
        let fresh = load_settings(self.settings.as_ref()).await?;
        if fresh.interval != current.interval {
            info!(interval = ?fresh.interval, "Capture interval changed");
            pacer.set_interval(fresh.interval);
        }
        if fresh.camera != current.camera {
            info!("Camera options changed, reconfiguring");
            camera.configure(&fresh.camera).await?;
        }
        if fresh.segment_size != current.segment_size {
            info!(segment_size = fresh.segment_size, "Segment size changed");
        }
        Ok(fresh)
    }

    /// Dispatch again every segment whose encode failed or never started.
    async fn redispatch_pending(
        &self,
        layout: &ImageLayout,
        settings: &Settings,
    ) -> Result<(), PipelineError> {
        for pending in self.ledger.snapshot().await.idle_segments() {
            let pending_layout = ImageLayout::new(layout.root(), pending.series.as_str());
            if settings.video.is_none() {
                warn!(segment = pending.span.index, series = %pending.series, "Video output is off, dropping pending segment");
                self.ledger
                    .update(|l| l.resolve_segment(&pending.span, &pending.series))
                    .await?;
                continue;
            }
            info!(segment = pending.span.index, series = %pending.series, attempts = pending.attempts, "Re-dispatching pending segment");
            self.enqueue_encode(pending.span, &pending_layout, settings)
                .await?;
        }
        Ok(())
    }

    /// Bring segment bookkeeping up to date at loop entry and return the open span.
    async fn recover_segments(
        &self,
        index: u64,
        layout: &ImageLayout,
        settings: &Settings,
    ) -> Result<SegmentSpan, PipelineError> {
        self.redispatch_pending(layout, settings).await?;

        let fresh = SegmentSpan::containing(index, settings.segment_size).clipped_to(index);
        let Some(open) = self.state.open_segment().await? else {
            self.state.set_open_segment(Some(fresh)).await?;
            return Ok(fresh);
        };

        if open.start < index && index < open.end() && fresh.end() == open.end() {
            return Ok(open);
        }
        if open.start < index {
            // Completed but never dispatched, or cut short by a segment size change.
            let finished = open.truncated_to(index);
            info!(segment = finished.index, len = finished.len, "Dispatching segment left over from the previous run");
            self.dispatch_segment(finished, layout, settings).await?;
        }
        self.state.set_open_segment(Some(fresh)).await?;
        Ok(fresh)
    }

    /// Hand a finished segment to the workers without waiting for it.
    async fn dispatch_segment(
        &self,
        span: SegmentSpan,
        layout: &ImageLayout,
        settings: &Settings,
    ) -> Result<(), PipelineError> {
        if span.is_empty() {
            return Ok(());
        }
        if settings.video.is_some() {
            self.enqueue_encode(span, layout, settings).await?;
        }
        if let Some(output_dir) = &settings.preview_dir {
            let job = Job::Preview(PreviewJob {
                id: Uuid::new_v4().to_string(),
                span,
                image_dir: layout.segment_dir(span.index)?,
                output_dir: output_dir.clone(),
            });
            self.queue.enqueue_job(job).await?;
        }
        self.events.publish(PipelineEvent::SegmentDispatched { span });
        Ok(())
    }

    async fn enqueue_encode(
        &self,
        span: SegmentSpan,
        layout: &ImageLayout,
        settings: &Settings,
    ) -> Result<(), PipelineError> {
        let Some(video) = &settings.video else {
            return Ok(());
        };
        let series = layout.series().to_string();
        let tracked = self
            .ledger
            .update(|l| l.track_segment(span, &series))
            .await?;
        if !tracked {
            debug!(segment = span.index, "Segment already queued");
            return Ok(());
        }

        let job = Job::Encode(SegmentJob {
            id: Uuid::new_v4().to_string(),
            span,
            image_dir: layout.segment_dir(span.index)?,
            series: series.clone(),
            video: video.clone(),
        });
        if let Err(e) = self.queue.enqueue_job(job).await {
            self.ledger
                .update(|l| l.defer_segment(span, &series, false))
                .await?;
            return Err(e.into());
        }
        debug!(segment = span.index, start = span.start, len = span.len, "Segment queued for encoding");
        Ok(())
    }
}
