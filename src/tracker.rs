//! Persistent record of removed hashes, used to propagate deletions to
//! peers that were offline when the removal happened. The record lives in
//! a small TOML file next to the settings and is rewritten on every change.

use crate::error::{HikupError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrackerFile {
    #[serde(rename = "toRemove", default)]
    to_remove: Vec<String>,
}

#[derive(Debug)]
pub struct RemovalTracker {
    path: PathBuf,
    removed: HashSet<String>,
}

impl RemovalTracker {
    /// Load the tracker file, or start empty when it does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        let removed = match std::fs::read_to_string(path) {
            Ok(text) => {
                let parsed: TrackerFile = toml::from_str(&text).map_err(|e| {
                    HikupError::Config(format!("bad tracker file {}: {e}", path.display()))
                })?;
                parsed.to_remove.into_iter().collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            removed,
        })
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.removed.contains(hash)
    }

    pub fn hashes(&self) -> &HashSet<String> {
        &self.removed
    }

    /// Record a removal and persist. A duplicate is a no-op.
    pub fn record(&mut self, hash: &str) -> Result<()> {
        if self.removed.insert(hash.to_string()) {
            self.save()?;
        }
        Ok(())
    }

    /// Drop a hash once its removal has been reconciled with every peer.
    pub fn clear(&mut self, hash: &str) -> Result<()> {
        if self.removed.remove(hash) {
            self.save()?;
        }
        Ok(())
    }

    /// Merge a peer's removal set into ours, persisting if anything was
    /// new. Returns the hashes we had not seen before.
    pub fn merge(&mut self, peer: &HashSet<String>) -> Result<Vec<String>> {
        let fresh: Vec<String> = peer
            .iter()
            .filter(|h| !self.removed.contains(*h))
            .cloned()
            .collect();
        if !fresh.is_empty() {
            self.removed.extend(fresh.iter().cloned());
            self.save()?;
        }
        Ok(fresh)
    }

    fn save(&self) -> Result<()> {
        let mut sorted: Vec<&String> = self.removed.iter().collect();
        sorted.sort();
        let file = TrackerFile {
            to_remove: sorted.into_iter().cloned().collect(),
        };
        let text = toml::to_string(&file)
            .map_err(|e| HikupError::Config(format!("serializing tracker: {e}")))?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_empty_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = RemovalTracker::load(&dir.path().join("tracker.toml")).unwrap();
        assert!(tracker.hashes().is_empty());
    }

    #[test]
    fn test_record_persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.toml");

        let mut tracker = RemovalTracker::load(&path).unwrap();
        tracker.record("aaaa").unwrap();
        tracker.record("bbbb").unwrap();
        tracker.record("aaaa").unwrap();

        let reloaded = RemovalTracker::load(&path).unwrap();
        assert_eq!(reloaded.hashes().len(), 2);
        assert!(reloaded.contains("aaaa"));
        assert!(reloaded.contains("bbbb"));
    }

    #[test]
    fn test_merge_returns_only_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.toml");

        let mut tracker = RemovalTracker::load(&path).unwrap();
        tracker.record("known").unwrap();

        let peer: HashSet<String> = ["known", "new1", "new2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut fresh = tracker.merge(&peer).unwrap();
        fresh.sort();
        assert_eq!(fresh, vec!["new1", "new2"]);

        // Second merge of the same set brings nothing.
        assert!(tracker.merge(&peer).unwrap().is_empty());
    }

    #[test]
    fn test_clear_drops_reconciled_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.toml");

        let mut tracker = RemovalTracker::load(&path).unwrap();
        tracker.record("done").unwrap();
        tracker.clear("done").unwrap();
        tracker.clear("never-there").unwrap();

        let reloaded = RemovalTracker::load(&path).unwrap();
        assert!(!reloaded.contains("done"));
    }

    #[test]
    fn test_reads_handwritten_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.toml");
        std::fs::write(&path, "toRemove = [\"cafe\", \"f00d\"]\n").unwrap();

        let tracker = RemovalTracker::load(&path).unwrap();
        assert!(tracker.contains("cafe"));
        assert!(tracker.contains("f00d"));
    }
}
