//! Which queued images may be removed from local disk.

use super::ledger::PendingWorkLedger;
use super::naming::parse_image_path;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub backup_enabled: bool,
    /// Video or preview output is on, so images must outlive their segment's encode.
    pub needs_full_segments: bool,
    pub current_image_index: u64,
    pub segment_size: u64,
}

impl RetentionPolicy {
    /// Images strictly below this index have certainly been consumed by the encoder.
    pub fn age_cutoff(&self) -> u64 {
        self.current_image_index
            .saturating_sub(self.segment_size.saturating_mul(2))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepPlan {
    pub delete: Vec<PathBuf>,
    /// Entries whose name carries no image index. Dropped from the list, never deleted.
    pub invalid: Vec<PathBuf>,
}

/// Walk `to_delete` oldest first and pick what can go.
///
/// With full segments required, the walk stops at the first image that is too new:
/// `to_delete` is kept in index order, so everything behind it is too new as well.
pub fn plan_sweep(ledger: &PendingWorkLedger, policy: &RetentionPolicy) -> SweepPlan {
    let cutoff = policy.age_cutoff();
    let mut plan = SweepPlan::default();

    for path in &ledger.to_delete {
        let Some(index) = parse_image_path(path) else {
            plan.invalid.push(path.clone());
            continue;
        };

        if policy.needs_full_segments && index >= cutoff {
            break;
        }
        if policy.backup_enabled && ledger.is_awaiting_backup(path) {
            continue;
        }
        if ledger.is_held(path) {
            continue;
        }
        plan.delete.push(path.clone());
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::naming::SegmentSpan;

    fn img(index: u64) -> PathBuf {
        PathBuf::from(format!("/data/s/seg0000000/img{index:07}.jpg"))
    }

    fn policy(backup_enabled: bool, needs_full_segments: bool) -> RetentionPolicy {
        RetentionPolicy {
            backup_enabled,
            needs_full_segments,
            current_image_index: 100,
            segment_size: 10,
        }
    }

    #[test]
    fn test_only_images_older_than_two_segments_go() {
        let mut ledger = PendingWorkLedger::default();
        ledger.to_delete = vec![img(10), img(79), img(80), img(81)];
        let plan = plan_sweep(&ledger, &policy(false, true));
        assert_eq!(plan.delete, vec![img(10), img(79)]);
    }

    #[test]
    fn test_too_new_entry_stops_the_sweep() {
        let mut ledger = PendingWorkLedger::default();
        // Out of order on purpose: 85 blocks 20 behind it.
        ledger.to_delete = vec![img(10), img(85), img(20)];
        let plan = plan_sweep(&ledger, &policy(false, true));
        assert_eq!(plan.delete, vec![img(10)]);
    }

    #[test]
    fn test_age_is_ignored_without_video_or_preview() {
        let mut ledger = PendingWorkLedger::default();
        ledger.to_delete = vec![img(95), img(99)];
        let plan = plan_sweep(&ledger, &policy(false, false));
        assert_eq!(plan.delete, vec![img(95), img(99)]);
    }

    #[test]
    fn test_images_awaiting_backup_stay() {
        let mut ledger = PendingWorkLedger::default();
        ledger.to_delete = vec![img(1), img(2), img(3)];
        ledger.to_backup = vec![img(2)];
        let plan = plan_sweep(&ledger, &policy(true, true));
        assert_eq!(plan.delete, vec![img(1), img(3)]);

        // With backup off, the backup list is irrelevant.
        let plan = plan_sweep(&ledger, &policy(false, true));
        assert_eq!(plan.delete, vec![img(1), img(2), img(3)]);
    }

    #[test]
    fn test_images_of_pending_segments_stay() {
        let mut ledger = PendingWorkLedger::default();
        ledger.to_delete = vec![img(1), img(12)];
        ledger.defer_segment(SegmentSpan::containing(12, 10), "s", true);
        let plan = plan_sweep(&ledger, &policy(false, true));
        assert_eq!(plan.delete, vec![img(1)]);
    }

    #[test]
    fn test_invalid_names_are_reported() {
        let mut ledger = PendingWorkLedger::default();
        ledger.to_delete = vec![PathBuf::from("/data/notes.txt"), img(1)];
        let plan = plan_sweep(&ledger, &policy(false, true));
        assert_eq!(plan.invalid, vec![PathBuf::from("/data/notes.txt")]);
        assert_eq!(plan.delete, vec![img(1)]);
    }

    #[test]
    fn test_nothing_is_old_enough_early_on() {
        let mut ledger = PendingWorkLedger::default();
        ledger.to_delete = vec![img(0)];
        let early = RetentionPolicy {
            current_image_index: 15,
            ..policy(false, true)
        };
        assert!(plan_sweep(&ledger, &early).delete.is_empty());
    }
}
