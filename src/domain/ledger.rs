//! Durable lists of work left to do on already captured images.

use super::naming::{parse_image_path, SegmentSpan};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const LEDGER_VERSION: u16 = 1;

/// A dispatched segment that has not been appended to the master video yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSegment {
    pub span: SegmentSpan,
    pub series: String,
    /// Failed encode attempts so far.
    pub attempts: u32,
    /// Sitting in the job queue or being encoded right now.
    #[serde(default)]
    pub queued: bool,
    /// Position in dispatch order, renewed on every (re)dispatch.
    #[serde(default)]
    pub dispatch: u64,
}

/// Last segment appended to the master video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendMark {
    pub series: String,
    pub start: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWorkLedger {
    pub version: u16,
    /// Images awaiting upload, in enqueue order.
    pub to_backup: Vec<PathBuf>,
    /// Images awaiting local deletion, oldest image first.
    pub to_delete: Vec<PathBuf>,
    #[serde(default)]
    pub pending_segments: Vec<PendingSegment>,
    #[serde(default)]
    pub next_dispatch: u64,
    #[serde(default)]
    pub last_appended: Option<AppendMark>,
}

impl Default for PendingWorkLedger {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            to_backup: Vec::new(),
            to_delete: Vec::new(),
            pending_segments: Vec::new(),
            next_dispatch: 0,
            last_appended: None,
        }
    }
}

impl PendingWorkLedger {
    pub fn enqueue_backup(&mut self, path: PathBuf) {
        if !self.to_backup.contains(&path) {
            self.to_backup.push(path);
        }
    }

    pub fn is_awaiting_backup(&self, path: &Path) -> bool {
        self.to_backup.iter().any(|p| p == path)
    }

    /// Queue an image for deletion, keeping `to_delete` ordered by image index.
    pub fn mark_for_deletion(&mut self, path: PathBuf) {
        if self.to_delete.contains(&path) {
            return;
        }
        let index = parse_image_path(&path);
        let out_of_order = match (self.to_delete.last().and_then(|p| parse_image_path(p)), index) {
            (Some(last), Some(new)) => new < last,
            _ => false,
        };
        self.to_delete.push(path);
        if out_of_order {
            // Unparsable names sort last; the sweep drops them anyway.
            self.to_delete
                .sort_by_key(|p| parse_image_path(p).unwrap_or(u64::MAX));
        }
    }

    /// Remove the given paths from `to_backup`, keeping everything enqueued meanwhile.
    pub fn complete_backups(&mut self, done: &[PathBuf]) {
        self.to_backup.retain(|p| !done.contains(p));
    }

    pub fn complete_deletions(&mut self, done: &[PathBuf]) {
        self.to_delete.retain(|p| !done.contains(p));
    }

    fn find_segment(&mut self, span: &SegmentSpan, series: &str) -> Option<&mut PendingSegment> {
        self.pending_segments
            .iter_mut()
            .find(|s| s.span.start == span.start && s.series == series)
    }

    /// Record a segment as handed to the encoder.
    ///
    /// Returns `false` when it is already queued, so nothing is dispatched twice.
    pub fn track_segment(&mut self, span: SegmentSpan, series: &str) -> bool {
        let dispatch = self.next_dispatch;
        if let Some(existing) = self.find_segment(&span, series) {
            if existing.queued {
                return false;
            }
            existing.queued = true;
            existing.dispatch = dispatch;
        } else {
            self.pending_segments.push(PendingSegment {
                span,
                series: series.to_string(),
                attempts: 0,
                queued: true,
                dispatch,
            });
        }
        self.next_dispatch += 1;
        true
    }

    /// Whether a clip of this segment may be appended now: no segment
    /// dispatched before it is still queued or encoding.
    pub fn is_turn_to_append(&self, span: &SegmentSpan, series: &str) -> bool {
        let Some(own) = self
            .pending_segments
            .iter()
            .find(|s| s.span.start == span.start && s.series == series && s.queued)
        else {
            return true;
        };
        !self
            .pending_segments
            .iter()
            .any(|s| s.queued && s.dispatch < own.dispatch)
    }

    /// Resolve a segment that made it into the master video.
    ///
    /// Returns `false` when a later segment of the series was appended before it.
    pub fn record_append(&mut self, span: &SegmentSpan, series: &str) -> bool {
        let in_order = match &self.last_appended {
            Some(last) => last.series.as_str() != series || last.start < span.start,
            None => true,
        };
        self.resolve_segment(span, series);
        if in_order {
            self.last_appended = Some(AppendMark {
                series: series.to_string(),
                start: span.start,
            });
        }
        in_order
    }

    /// Record a failed or unstarted encode. Returns the failed attempts so far.
    pub fn defer_segment(&mut self, span: SegmentSpan, series: &str, failed: bool) -> u32 {
        let increment = u32::from(failed);
        if let Some(existing) = self.find_segment(&span, series) {
            existing.attempts += increment;
            existing.queued = false;
            return existing.attempts;
        }
        self.pending_segments.push(PendingSegment {
            span,
            series: series.to_string(),
            attempts: increment,
            queued: false,
            dispatch: 0,
        });
        increment
    }

    pub fn resolve_segment(&mut self, span: &SegmentSpan, series: &str) {
        self.pending_segments
            .retain(|s| !(s.span.start == span.start && s.series == series));
    }

    /// After a restart nothing is in flight any more.
    pub fn requeue_all(&mut self) {
        for segment in &mut self.pending_segments {
            segment.queued = false;
        }
    }

    /// Segments waiting for a (re)dispatch, oldest series and image first.
    pub fn idle_segments(&self) -> Vec<PendingSegment> {
        let mut idle: Vec<PendingSegment> = self
            .pending_segments
            .iter()
            .filter(|s| !s.queued)
            .cloned()
            .collect();
        idle.sort_by(|a, b| (&a.series, a.span.start).cmp(&(&b.series, b.span.start)));
        idle
    }

    /// Whether the image belongs to a segment that still has to be encoded.
    pub fn is_held(&self, path: &Path) -> bool {
        let Some(index) = parse_image_path(path) else {
            return false;
        };
        self.pending_segments.iter().any(|s| {
            s.span.contains(index) && path.components().any(|c| c.as_os_str() == s.series.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn img(series: &str, index: u64) -> PathBuf {
        PathBuf::from(format!("/data/{series}/seg0000000/img{index:07}.jpg"))
    }

    #[test]
    fn test_enqueue_backup_ignores_duplicates() {
        let mut ledger = PendingWorkLedger::default();
        ledger.enqueue_backup(img("s", 1));
        ledger.enqueue_backup(img("s", 1));
        ledger.enqueue_backup(img("s", 2));
        assert_eq!(ledger.to_backup, vec![img("s", 1), img("s", 2)]);
    }

    #[test]
    fn test_mark_for_deletion_keeps_index_order() {
        let mut ledger = PendingWorkLedger::default();
        ledger.mark_for_deletion(img("s", 5));
        ledger.mark_for_deletion(img("s", 2));
        ledger.mark_for_deletion(img("s", 9));
        ledger.mark_for_deletion(img("s", 9));
        assert_eq!(ledger.to_delete, vec![img("s", 2), img("s", 5), img("s", 9)]);
    }

    #[test]
    fn test_complete_backups_keeps_new_entries() {
        let mut ledger = PendingWorkLedger::default();
        ledger.enqueue_backup(img("s", 1));
        ledger.enqueue_backup(img("s", 2));
        ledger.enqueue_backup(img("s", 3));
        ledger.complete_backups(&[img("s", 1), img("s", 2)]);
        assert_eq!(ledger.to_backup, vec![img("s", 3)]);
    }

    #[test]
    fn test_deferred_segments_count_failures() {
        let mut ledger = PendingWorkLedger::default();
        let span = SegmentSpan::containing(0, 5);
        assert!(ledger.track_segment(span, "s"));
        assert!(!ledger.track_segment(span, "s"));
        assert!(ledger.idle_segments().is_empty());

        assert_eq!(ledger.defer_segment(span, "s", false), 0);
        assert_eq!(ledger.idle_segments().len(), 1);
        assert!(ledger.track_segment(span, "s"));
        assert_eq!(ledger.defer_segment(span, "s", true), 1);
        assert_eq!(ledger.defer_segment(span, "s", true), 2);
        assert_eq!(ledger.pending_segments.len(), 1);

        assert!(ledger.is_held(&img("s", 3)));
        assert!(!ledger.is_held(&img("s", 5)));
        assert!(!ledger.is_held(&img("other", 3)));

        ledger.resolve_segment(&span, "s");
        assert!(ledger.pending_segments.is_empty());
        assert!(!ledger.is_held(&img("s", 3)));
    }

    #[test]
    fn test_requeue_all_after_restart() {
        let mut ledger = PendingWorkLedger::default();
        ledger.track_segment(SegmentSpan::containing(0, 5), "s");
        ledger.track_segment(SegmentSpan::containing(5, 5), "s");
        assert!(ledger.idle_segments().is_empty());
        ledger.requeue_all();
        assert_eq!(ledger.idle_segments().len(), 2);
    }

    #[test]
    fn test_append_turn_follows_dispatch_order() {
        let mut ledger = PendingWorkLedger::default();
        let first = SegmentSpan::containing(0, 3);
        let second = SegmentSpan::containing(3, 3);
        ledger.track_segment(first, "s");
        ledger.track_segment(second, "s");

        assert!(ledger.is_turn_to_append(&first, "s"));
        assert!(!ledger.is_turn_to_append(&second, "s"));

        // A failed encode steps aside until it is dispatched again.
        ledger.defer_segment(first, "s", true);
        assert!(ledger.is_turn_to_append(&second, "s"));

        ledger.track_segment(first, "s");
        assert!(ledger.is_turn_to_append(&second, "s"));
        assert!(!ledger.is_turn_to_append(&first, "s"));
    }

    #[test]
    fn test_record_append_reports_late_segments() {
        let mut ledger = PendingWorkLedger::default();
        let first = SegmentSpan::containing(0, 3);
        let second = SegmentSpan::containing(3, 3);
        ledger.track_segment(first, "s");
        ledger.track_segment(second, "s");

        assert!(ledger.record_append(&second, "s"));
        assert!(!ledger.record_append(&first, "s"));
        assert!(ledger.pending_segments.is_empty());
        assert_eq!(
            ledger.last_appended,
            Some(AppendMark {
                series: "s".to_string(),
                start: 3
            })
        );
        assert!(ledger.record_append(&SegmentSpan::containing(0, 3), "t"));
    }

    #[test]
    fn test_idle_segments_are_sorted() {
        let mut ledger = PendingWorkLedger::default();
        ledger.defer_segment(SegmentSpan::containing(6, 3), "b", true);
        ledger.defer_segment(SegmentSpan::containing(3, 3), "b", true);
        ledger.defer_segment(SegmentSpan::containing(9, 3), "a", true);
        let order: Vec<_> = ledger
            .idle_segments()
            .into_iter()
            .map(|s| (s.series, s.span.start))
            .collect();
        assert_eq!(
            order,
            [("a".to_string(), 9), ("b".to_string(), 3), ("b".to_string(), 6)]
        );
    }

    #[test]
    fn test_ledger_without_pending_segments_deserializes() {
        let json = r#"{"version":1,"to_backup":["/a/img0000001.jpg"],"to_delete":[]}"#;
        let ledger: PendingWorkLedger = serde_json::from_str(json).unwrap();
        assert_eq!(ledger.to_backup.len(), 1);
        assert!(ledger.pending_segments.is_empty());
    }
}
