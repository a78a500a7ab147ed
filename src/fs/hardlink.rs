use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// finds hardlinks while a directory is written into the store
///
/// the first path seen for a (dev, ino) pair becomes the stored regular
/// file; later paths with the same pair become `Hardlink` entries to it.
#[derive(Default)]
pub struct HardlinkTracker {
    seen: HashMap<(u64, u64), String>,
}

impl HardlinkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// record `path` for this inode, or return the path recorded before it
    pub fn check(&mut self, dev: u64, ino: u64, path: &str) -> Option<String> {
        match self.seen.get(&(dev, ino)) {
            Some(existing) => Some(existing.clone()),
            None => {
                self.seen.insert((dev, ino), path.to_string());
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// logical tree path -> checked out filesystem path, for one layer
///
/// `Hardlink` entries name their target by tree path and may come before
/// it in walk order, so they are resolved after the layer's first pass.
#[derive(Default)]
pub struct CheckoutHardlinkTracker {
    paths: HashMap<String, PathBuf>,
    pending: Vec<(PathBuf, String)>,
}

impl CheckoutHardlinkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, logical_path: &str, fs_path: PathBuf) {
        self.paths.insert(logical_path.to_string(), fs_path);
    }

    pub fn get(&self, logical_path: &str) -> Option<&Path> {
        self.paths.get(logical_path).map(|p| p.as_path())
    }

    /// queue a hardlink at `link_path` pointing at tree path `target`
    pub fn defer(&mut self, link_path: PathBuf, target: &str) {
        self.pending.push((link_path, target.to_string()));
    }

    /// the queued hardlinks, in the order they were deferred
    pub fn take_pending(&mut self) -> Vec<(PathBuf, String)> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_and_second_occurrence() {
        let mut tracker = HardlinkTracker::new();

        assert!(tracker.check(1, 12345, "usr/bin/first").is_none());
        assert_eq!(
            tracker.check(1, 12345, "usr/bin/second"),
            Some("usr/bin/first".to_string())
        );
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_same_ino_different_dev() {
        let mut tracker = HardlinkTracker::new();

        tracker.check(1, 12345, "file1");
        assert!(tracker.check(2, 12345, "file2").is_none());
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_checkout_tracker_defers_links() {
        let mut tracker = CheckoutHardlinkTracker::new();

        tracker.defer("/scratch/usr/bin/vi".into(), "usr/bin/vim");
        tracker.record("usr/bin/vim", "/scratch/usr/bin/vim".into());

        assert_eq!(tracker.get("usr/bin/vim"), Some(Path::new("/scratch/usr/bin/vim")));
        assert!(tracker.get("nonexistent").is_none());

        let pending = tracker.take_pending();
        assert_eq!(pending, vec![(PathBuf::from("/scratch/usr/bin/vi"), "usr/bin/vim".to_string())]);
        assert!(tracker.take_pending().is_empty());
    }
}
