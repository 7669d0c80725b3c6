use super::hub::EventHub;
use crate::domain::jobs::PipelineEvent;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Log every pipeline event until the hub is dropped.
pub fn start(event_hub: Arc<EventHub>) -> JoinHandle<()> {
    let mut rx = event_hub.subscribe();
    drop(event_hub);

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event listener lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::ImageCaptured { index, path } => {
            debug!(image_index = index, path = %path.display(), "Image captured");
        }
        PipelineEvent::SegmentDispatched { span } => {
            info!(segment = span.index, start = span.start, len = span.len, "Segment dispatched");
        }
        PipelineEvent::SegmentAppended { span, master } => {
            info!(segment = span.index, master = %master.display(), "Segment appended to master video");
        }
        PipelineEvent::SegmentFailed { span, reason } => {
            error!(segment = span.index, %reason, "Segment encode failed");
        }
        PipelineEvent::PreviewRendered { span, output } => {
            info!(segment = span.index, output = %output.display(), "Preview rendered");
        }
        PipelineEvent::PreviewFailed { span, reason } => {
            warn!(segment = span.index, %reason, "Preview failed");
        }
        PipelineEvent::BackupFinished { uploaded, remaining } => {
            info!(uploaded, remaining, "Backup batch finished");
        }
        PipelineEvent::ImagesDeleted { count } => {
            info!(count, "Old images deleted");
        }
    }
}
