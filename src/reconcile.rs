//! Merge local and remote inventories into one gallery keyed by filename.

use std::collections::{HashMap, HashSet};

use crate::media::{MediaRecord, Origin};

/// Read-only view of the upload ledger's key set.
pub trait LedgerView {
    fn contains(&self, item_key: &str) -> bool;
}

impl LedgerView for HashSet<String> {
    fn contains(&self, item_key: &str) -> bool {
        HashSet::contains(self, item_key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryItem {
    pub record: MediaRecord,
    pub is_uploaded: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MergedView {
    /// Local records plus remote-only records, newest first.
    pub gallery: Vec<GalleryItem>,
    /// Local records not known to be uploaded, newest first.
    pub candidates: Vec<MediaRecord>,
    /// False when the remote listing was unavailable and the view is local-only.
    pub remote_available: bool,
}

impl MergedView {
    pub fn uploaded_count(&self) -> usize {
        self.gallery.iter().filter(|g| g.is_uploaded).count()
    }

    pub fn remote_only_count(&self) -> usize {
        self.gallery
            .iter()
            .filter(|g| g.record.origin == Origin::Remote)
            .count()
    }
}

/// Build the merged gallery and the upload candidate set.
///
/// Filename is the item identity. Local records sharing a filename collapse to
/// the newest one; the item counts as uploaded when the ledger holds the key of
/// any of them or a remote object shares the filename. Remote records whose
/// filename matches a local record are hidden behind the local one.
/// `remote = None` degrades to a local-only view.
pub fn reconcile(
    local: &[MediaRecord],
    remote: Option<&[MediaRecord]>,
    ledger: &impl LedgerView,
) -> MergedView {
    let remote_names: HashSet<&str> = remote
        .unwrap_or_default()
        .iter()
        .map(|r| r.filename.as_str())
        .collect();

    let mut newest: HashMap<&str, usize> = HashMap::new();
    let mut in_ledger: HashSet<&str> = HashSet::new();
    for (index, record) in local.iter().enumerate() {
        let name = record.filename.as_str();
        if record.item_key().is_some_and(|k| ledger.contains(k)) {
            in_ledger.insert(name);
        }
        newest
            .entry(name)
            .and_modify(|kept| {
                if record.added_at_epoch_sec > local[*kept].added_at_epoch_sec {
                    *kept = index;
                }
            })
            .or_insert(index);
    }

    let mut gallery = Vec::with_capacity(newest.len() + remote_names.len());
    let mut candidates = Vec::new();

    for (index, record) in local.iter().enumerate() {
        let name = record.filename.as_str();
        if newest.get(name) != Some(&index) {
            tracing::debug!(id = ?record.id, "Duplicate local filename {}, keeping newest", name);
            continue;
        }
        let is_uploaded = in_ledger.contains(name) || remote_names.contains(name);
        if !is_uploaded {
            candidates.push(record.clone());
        }
        gallery.push(GalleryItem {
            record: record.clone(),
            is_uploaded,
        });
    }

    let mut seen_remote: HashSet<&str> = HashSet::new();
    for record in remote.unwrap_or_default() {
        let name = record.filename.as_str();
        if newest.contains_key(name) || !seen_remote.insert(name) {
            continue;
        }
        gallery.push(GalleryItem {
            record: record.clone(),
            is_uploaded: true,
        });
    }

    gallery.sort_by(|a, b| b.record.added_at_epoch_sec.cmp(&a.record.added_at_epoch_sec));
    crate::media::sort_newest_first(&mut candidates);

    MergedView {
        gallery,
        candidates,
        remote_available: remote.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(n: u32) -> MediaRecord {
        MediaRecord::local(
            format!("/dcim/IMG_{n}.jpg"),
            format!("IMG_{n}.jpg"),
            100,
            1_000 + i64::from(n),
            false,
        )
    }

    fn remote(name: &str, added: i64) -> MediaRecord {
        MediaRecord::remote(name, format!("photos/{name}"), 100, added, false)
    }

    #[test]
    fn test_all_local_present_remotely() {
        let locals: Vec<_> = (1..=5).map(local).collect();
        let remotes: Vec<_> = locals.iter().map(|r| remote(&r.filename, 10)).collect();

        let view = reconcile(&locals, Some(remotes.as_slice()), &HashSet::<String>::new());
        assert!(view.candidates.is_empty());
        assert_eq!(view.gallery.len(), 5);
        assert!(view.gallery.iter().all(|g| g.is_uploaded));
        assert!(view.gallery.iter().all(|g| g.record.origin == Origin::Local));
    }

    #[test]
    fn test_ledger_marks_uploaded() {
        let locals = vec![local(1), local(2)];
        let ledger: HashSet<String> = ["/dcim/IMG_1.jpg".to_string()].into_iter().collect();

        let view = reconcile(&locals, Some(&[][..]), &ledger);
        assert_eq!(view.candidates.len(), 1);
        assert_eq!(view.candidates[0].filename, "IMG_2.jpg");
        assert_eq!(view.uploaded_count(), 1);
    }

    #[test]
    fn test_remote_only_entries_synthesized_once() {
        let locals = vec![local(1)];
        let remotes = vec![
            remote("IMG_1.jpg", 5),
            remote("beach.jpg", 2_000),
            remote("beach.jpg", 1_500),
        ];

        let view = reconcile(&locals, Some(remotes.as_slice()), &HashSet::<String>::new());
        assert_eq!(view.gallery.len(), 2);
        assert_eq!(view.remote_only_count(), 1);
        // newest first: beach.jpg (2000) before IMG_1.jpg (1001)
        assert_eq!(view.gallery[0].record.filename, "beach.jpg");
        assert_eq!(view.gallery[0].record.added_at_epoch_sec, 2_000);
        assert!(view.gallery[0].is_uploaded);
        assert_eq!(view.gallery[1].record.origin, Origin::Local);
    }

    #[test]
    fn test_gallery_filenames_unique() {
        let locals: Vec<_> = (1..=20).map(local).collect();
        let remotes: Vec<_> = (10..=30)
            .map(|n| remote(&format!("IMG_{n}.jpg"), i64::from(n)))
            .collect();

        let view = reconcile(&locals, Some(remotes.as_slice()), &HashSet::<String>::new());
        let names: HashSet<_> = view.gallery.iter().map(|g| &g.record.filename).collect();
        assert_eq!(names.len(), view.gallery.len());
        assert_eq!(view.gallery.len(), 30);
        assert_eq!(view.candidates.len(), 9);
    }

    #[test]
    fn test_remote_unavailable_degrades_to_local() {
        let locals = vec![local(1), local(2)];
        let view = reconcile(&locals, None, &HashSet::<String>::new());
        assert!(!view.remote_available);
        assert_eq!(view.candidates.len(), 2);
        assert_eq!(view.candidates[0].filename, "IMG_2.jpg");
        assert_eq!(view.remote_only_count(), 0);
    }

    #[test]
    fn test_filename_match_is_case_sensitive() {
        let locals = vec![local(1)];
        let remotes = vec![remote("img_1.jpg", 1)];
        let view = reconcile(&locals, Some(remotes.as_slice()), &HashSet::<String>::new());
        assert_eq!(view.candidates.len(), 1);
        assert_eq!(view.gallery.len(), 2);
    }

    #[test]
    fn test_duplicate_local_filenames_collapse_to_newest() {
        let older = MediaRecord::local("/Backup/IMG_1.jpg", "IMG_1.jpg", 100, 500, false);
        let newer = MediaRecord::local("/Camera/IMG_1.jpg", "IMG_1.jpg", 100, 900, false);
        let older_2 = MediaRecord::local("/Backup/IMG_2.jpg", "IMG_2.jpg", 100, 400, false);
        let newer_2 = MediaRecord::local("/Camera/IMG_2.jpg", "IMG_2.jpg", 100, 800, false);
        let locals = vec![older, newer, older_2, newer_2];
        let remotes = vec![remote("IMG_1.jpg", 10)];

        let view = reconcile(&locals, Some(remotes.as_slice()), &HashSet::<String>::new());
        let count = |name: &str| {
            view.gallery
                .iter()
                .filter(|g| g.record.filename == name)
                .count()
        };
        assert_eq!(count("IMG_1.jpg"), 1);
        assert_eq!(count("IMG_2.jpg"), 1);
        assert_eq!(view.candidates.len(), 1);
        assert_eq!(view.candidates[0].item_key(), Some("/Camera/IMG_2.jpg"));
    }

    #[test]
    fn test_duplicate_local_filename_uploaded_via_other_copy() {
        let locals = vec![
            MediaRecord::local("/Camera/IMG_1.jpg", "IMG_1.jpg", 100, 900, false),
            MediaRecord::local("/Backup/IMG_1.jpg", "IMG_1.jpg", 100, 500, false),
        ];
        let ledger: HashSet<String> = ["/Backup/IMG_1.jpg".to_string()].into_iter().collect();

        let view = reconcile(&locals, None, &ledger);
        assert_eq!(view.gallery.len(), 1);
        assert!(view.gallery[0].is_uploaded);
        assert!(view.candidates.is_empty());
    }
}
