//! Per-category admission control for upload candidates.
//!
//! Quota bounds the number of not-yet-uploaded items per category. Exceeding
//! it is not an error: surplus candidates are skipped this pass and become
//! eligible again once uploads move items off the pending count.

use serde::Serialize;

use crate::media::{MediaCategory, MediaRecord};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaLimits {
    pub images: usize,
    pub videos: usize,
    /// Fraction of a limit at which a category is reported as near capacity.
    pub warning_ratio: f64,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            images: 1000,
            videos: 100,
            warning_ratio: 0.8,
        }
    }
}

impl QuotaLimits {
    pub fn limit(&self, category: MediaCategory) -> usize {
        match category {
            MediaCategory::Image => self.images,
            MediaCategory::Video => self.videos,
        }
    }
}

/// Counts of local items not yet uploaded. Recomputed at each decision point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaState {
    pub pending_images: usize,
    pub pending_videos: usize,
}

impl QuotaState {
    pub fn pending(&self, category: MediaCategory) -> usize {
        match category {
            MediaCategory::Image => self.pending_images,
            MediaCategory::Video => self.pending_videos,
        }
    }

    pub fn within_limit(&self, limits: &QuotaLimits) -> bool {
        self.pending_images <= limits.images && self.pending_videos <= limits.videos
    }

    /// Categories at or above the warning threshold.
    pub fn warnings(&self, limits: &QuotaLimits) -> Vec<MediaCategory> {
        [MediaCategory::Image, MediaCategory::Video]
            .into_iter()
            .filter(|&cat| {
                let limit = limits.limit(cat);
                limit > 0 && self.pending(cat) as f64 >= limit as f64 * limits.warning_ratio
            })
            .collect()
    }
}

/// Outcome of quota admission. `skipped` is not a failure.
#[derive(Debug, Clone, Default)]
pub struct Admission {
    pub admitted: Vec<MediaRecord>,
    pub skipped: Vec<MediaRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct QuotaTracker {
    limits: QuotaLimits,
}

impl QuotaTracker {
    pub fn new(limits: QuotaLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &QuotaLimits {
        &self.limits
    }

    /// Count not-yet-uploaded items per category.
    pub fn current_pending(&self, pending: &[MediaRecord]) -> QuotaState {
        let videos = pending.iter().filter(|r| r.is_video).count();
        QuotaState {
            pending_images: pending.len() - videos,
            pending_videos: videos,
        }
    }

    /// Greedily admit `candidates`, newest first, while the category has headroom.
    ///
    /// Headroom per category is the limit minus the pending backlog that lies
    /// outside `candidates`, so candidates compete only for what the rest of
    /// the backlog leaves free.
    pub fn admissible(&self, candidates: &[MediaRecord], state: &QuotaState) -> Admission {
        let in_call = self.current_pending(candidates);
        let headroom = |cat: MediaCategory| {
            let outside = state.pending(cat).saturating_sub(in_call.pending(cat));
            self.limits.limit(cat).saturating_sub(outside)
        };
        let mut remaining_images = headroom(MediaCategory::Image);
        let mut remaining_videos = headroom(MediaCategory::Video);

        let mut ordered = candidates.to_vec();
        crate::media::sort_newest_first(&mut ordered);

        let mut admission = Admission::default();
        for record in ordered {
            let remaining = match record.category() {
                MediaCategory::Image => &mut remaining_images,
                MediaCategory::Video => &mut remaining_videos,
            };
            if *remaining > 0 {
                *remaining -= 1;
                admission.admitted.push(record);
            } else {
                admission.skipped.push(record);
            }
        }

        if !admission.skipped.is_empty() {
            tracing::info!(
                admitted = admission.admitted.len(),
                skipped = admission.skipped.len(),
                "Quota reached, deferring remaining items to a later pass"
            );
        }
        admission
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(n: i64) -> MediaRecord {
        MediaRecord::local(format!("/i/{n}"), format!("IMG_{n}.jpg"), 1, n, false)
    }

    fn video(n: i64) -> MediaRecord {
        MediaRecord::local(format!("/v/{n}"), format!("VID_{n}.mp4"), 1, n, true)
    }

    fn limits(images: usize, videos: usize) -> QuotaLimits {
        QuotaLimits {
            images,
            videos,
            warning_ratio: 0.8,
        }
    }

    #[test]
    fn test_current_pending_counts_categories() {
        let tracker = QuotaTracker::default();
        let items = vec![image(1), image(2), video(3)];
        let state = tracker.current_pending(&items);
        assert_eq!(state.pending_images, 2);
        assert_eq!(state.pending_videos, 1);
        assert!(state.within_limit(tracker.limits()));
    }

    #[test]
    fn test_admits_newest_up_to_limit() {
        let tracker = QuotaTracker::new(limits(3, 100));
        let candidates: Vec<_> = (1..=5).map(image).collect();
        let state = tracker.current_pending(&candidates);

        let admission = tracker.admissible(&candidates, &state);
        let admitted: Vec<_> = admission
            .admitted
            .iter()
            .map(|r| r.added_at_epoch_sec)
            .collect();
        assert_eq!(admitted, vec![5, 4, 3]);
        assert_eq!(admission.skipped.len(), 2);
        assert!(!state.within_limit(tracker.limits()));
    }

    #[test]
    fn test_categories_limited_independently() {
        let tracker = QuotaTracker::new(limits(10, 1));
        let candidates = vec![video(1), image(2), video(3), image(4)];
        let state = tracker.current_pending(&candidates);

        let admission = tracker.admissible(&candidates, &state);
        assert_eq!(admission.admitted.len(), 3);
        assert_eq!(admission.skipped.len(), 1);
        assert_eq!(admission.skipped[0].added_at_epoch_sec, 1);
    }

    #[test]
    fn test_backlog_outside_call_consumes_headroom() {
        let tracker = QuotaTracker::new(limits(5, 100));
        // 4 pending overall, only 2 offered in this call: 2 outside, 3 headroom
        let state = QuotaState {
            pending_images: 4,
            pending_videos: 0,
        };
        let admission = tracker.admissible(&[image(1), image(2)], &state);
        assert_eq!(admission.admitted.len(), 2);

        let state = QuotaState {
            pending_images: 9,
            pending_videos: 0,
        };
        let admission = tracker.admissible(&[image(1), image(2)], &state);
        assert!(admission.admitted.is_empty());
        assert_eq!(admission.skipped.len(), 2);
    }

    #[test]
    fn test_larger_limit_admits_superset() {
        let candidates: Vec<_> = (1..=20)
            .map(|n| if n % 3 == 0 { video(n) } else { image(n) })
            .collect();
        let small = QuotaTracker::new(limits(4, 2));
        let large = QuotaTracker::new(limits(8, 5));
        let state = small.current_pending(&candidates);

        let a = small.admissible(&candidates, &state).admitted;
        let b = large.admissible(&candidates, &state).admitted;
        assert!(a.iter().all(|r| b.contains(r)));
        assert!(b.len() >= a.len());
    }

    #[test]
    fn test_zero_limit_admits_nothing() {
        let tracker = QuotaTracker::new(limits(0, 0));
        let candidates = vec![image(1), video(2)];
        let state = tracker.current_pending(&candidates);
        let admission = tracker.admissible(&candidates, &state);
        assert!(admission.admitted.is_empty());
        assert!(state.warnings(tracker.limits()).is_empty());
    }

    #[test]
    fn test_warnings_at_threshold() {
        let l = limits(10, 5);
        let state = QuotaState {
            pending_images: 8,
            pending_videos: 3,
        };
        assert_eq!(state.warnings(&l), vec![MediaCategory::Image]);
        let state = QuotaState {
            pending_images: 7,
            pending_videos: 4,
        };
        assert_eq!(state.warnings(&l), vec![MediaCategory::Video]);
    }
}
