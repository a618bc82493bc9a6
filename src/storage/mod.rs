//! Content-addressed file store.
//!
//! Every stored file lives in `storage/` under a canonical name built from
//! the upload name and the file's hash: dots in the original name are
//! mangled to `<` so that the hash is always the single extension, and a
//! symlink under `links/` preserves the original name for direct serving.
//! Lookups are by hash and scan the storage directory linearly; the
//! directory is the index.
//!
//! There is no file-level locking. Two concurrent uploads of the same
//! name+hash can both pass the pre-existence check; they then race to an
//! identical rename target with identical bytes, so the outcome is the
//! same file either way.

pub mod file_info;

pub use file_info::FileInfo;

use crate::error::{HikupError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Replace every `.` with `<` so the hash extension is unambiguous.
pub fn mangle_name(name: &str) -> String {
    name.replace('.', "<")
}

/// Inverse of [`mangle_name`].
pub fn unmangle_name(mangled: &str) -> String {
    mangled.replace('<', ".")
}

#[derive(Debug, Clone)]
pub struct Storage {
    storage_dir: PathBuf,
    links_dir: PathBuf,
}

impl Storage {
    /// Open (and create if absent) the `storage/` and `links/` directories
    /// under `base`.
    pub fn open(base: &Path) -> Result<Self> {
        let storage_dir = base.join("storage");
        let links_dir = base.join("links");
        std::fs::create_dir_all(&storage_dir)?;
        std::fs::create_dir_all(&links_dir)?;
        Ok(Self {
            storage_dir,
            links_dir,
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn links_dir(&self) -> &Path {
        &self.links_dir
    }

    /// Canonical path a file with this name and hash is stored at.
    pub fn canonical_path(&self, name: &str, hash: &str) -> PathBuf {
        self.storage_dir.join(format!("{}.{}", mangle_name(name), hash))
    }

    /// Alias path under `links/` for this upload name.
    pub fn link_path(&self, name: &str) -> PathBuf {
        self.links_dir.join(name)
    }

    /// Linear scan for an entry whose hash extension matches.
    pub fn find_by_hash(&self, hash: &str) -> Result<Option<PathBuf>> {
        for entry in std::fs::read_dir(&self.storage_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(hash) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    pub fn contains(&self, hash: &str) -> Result<bool> {
        Ok(self.find_by_hash(hash)?.is_some())
    }

    /// Commit a received file: move the staged temporary into its canonical
    /// place and point the name alias at it. An existing alias for the same
    /// name is replaced, so a re-upload under the same name wins.
    pub fn commit(&self, staged: &Path, name: &str, hash: &str) -> Result<PathBuf> {
        let dest = self.canonical_path(name, hash);
        std::fs::rename(staged, &dest)?;

        let link = self.link_path(name);
        if link.symlink_metadata().is_ok() {
            std::fs::remove_file(&link)?;
        }
        std::os::unix::fs::symlink(&dest, &link)?;

        Ok(dest)
    }

    /// Remove the stored file and its name alias. Returns the original
    /// upload name, or `None` when no entry with this hash exists.
    pub fn remove(&self, hash: &str) -> Result<Option<String>> {
        let Some(path) = self.find_by_hash(hash)? else {
            return Ok(None);
        };
        let info = FileInfo::from_storage_path(&path)?;
        std::fs::remove_file(&path)?;

        let link = self.link_path(info.name());
        if link.symlink_metadata().is_ok() {
            std::fs::remove_file(&link)?;
        }
        Ok(Some(info.name().to_string()))
    }

    /// All stored entries, in directory order.
    pub fn list(&self) -> Result<Vec<FileInfo>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.storage_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) != Some("part") {
                out.push(FileInfo::from_storage_path(&path)?);
            }
        }
        Ok(out)
    }

    /// Set of every stored hash, for sync inventory exchange.
    pub fn inventory(&self) -> Result<HashSet<String>> {
        let mut hashes = HashSet::new();
        for entry in std::fs::read_dir(&self.storage_dir)? {
            let path = entry?.path();
            if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                if ext != "part" {
                    hashes.insert(ext.to_string());
                }
            }
        }
        Ok(hashes)
    }

    /// Recreate any missing name alias from the storage directory, for
    /// entries whose symlink was lost (manual cleanup, restored backup).
    pub fn repair_links(&self) -> Result<usize> {
        let mut repaired = 0;
        for info in self.list()? {
            let link = self.link_path(info.name());
            if link.symlink_metadata().is_err() {
                let target = self.canonical_path(info.name(), info.hash());
                std::os::unix::fs::symlink(&target, &link)?;
                repaired += 1;
            }
        }
        Ok(repaired)
    }

    /// Path for staging a partially received file before commit. Kept in
    /// the storage directory so the final rename never crosses filesystems.
    pub fn staging_path(&self, hash: &str) -> PathBuf {
        self.storage_dir.join(format!("{hash}.part"))
    }

    /// Delete a staging leftover, ignoring absence.
    pub fn discard_staged(&self, staged: &Path) {
        let _ = std::fs::remove_file(staged);
    }

    /// Resolve the name alias a served filename points at, refusing names
    /// that try to escape the links directory.
    pub fn resolve_link(&self, name: &str) -> Result<PathBuf> {
        if name.contains('/') || name.contains("..") {
            return Err(HikupError::Storage(format!("refusing path: {name}")));
        }
        Ok(self.link_path(name))
    }
}
