//! Listing/sync record for one stored file.
//!
//! Built either from filesystem metadata of a canonical storage entry or
//! decoded from the pipe-delimited wire encoding
//! `name|hash|size|epochSeconds|#`.

use crate::error::{HikupError, Result};
use crate::storage::unmangle_name;
use chrono::{DateTime, Local, TimeZone, Utc};
use std::cell::OnceCell;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct FileInfo {
    name: String,
    hash: String,
    size: u64,
    created: DateTime<Utc>,
    date_cache: OnceCell<String>,
}

impl FileInfo {
    pub fn new(name: String, hash: String, size: u64, created: DateTime<Utc>) -> Self {
        Self {
            name,
            hash,
            size,
            created,
            date_cache: OnceCell::new(),
        }
    }

    /// Derive from a canonical storage entry `<mangled>.<hash>`: the stem is
    /// unmangled back to the original name and the extension is the hash.
    pub fn from_storage_path(path: &Path) -> Result<Self> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| HikupError::Storage(format!("unreadable stem: {}", path.display())))?;
        let hash = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| HikupError::Storage(format!("entry has no hash extension: {}", path.display())))?;

        let meta = std::fs::metadata(path)?;
        let created = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Self::new(
            unmangle_name(stem),
            hash.to_string(),
            meta.len(),
            created,
        ))
    }

    /// Decode the wire form `name|hash|size|epochSeconds|#`.
    pub fn decode(encoded: &str) -> Result<Self> {
        let bad = |why: &str| HikupError::Protocol(format!("invalid FileInfo ({why}): {encoded}"));

        let mut fields = encoded.split('|');
        let name = fields.next().filter(|s| !s.is_empty()).ok_or_else(|| bad("missing name"))?;
        let hash = fields.next().ok_or_else(|| bad("missing hash"))?;
        let size: u64 = fields
            .next()
            .ok_or_else(|| bad("missing size"))?
            .parse()
            .map_err(|_| bad("size not a number"))?;
        let epoch: i64 = fields
            .next()
            .ok_or_else(|| bad("missing date"))?
            .parse()
            .map_err(|_| bad("date not a number"))?;

        match fields.next() {
            Some("#") => {}
            _ => return Err(bad("missing # terminator")),
        }
        if fields.next().is_some() {
            return Err(bad("extra data after terminator"));
        }

        let created = Utc
            .timestamp_opt(epoch, 0)
            .single()
            .ok_or_else(|| bad("date out of range"))?;

        Ok(Self::new(name.to_string(), hash.to_string(), size, created))
    }

    /// Wire form, `#`-terminated.
    pub fn encode(&self) -> String {
        format!(
            "{}|{}|{}|{}|#",
            self.name,
            self.hash,
            self.size,
            self.created.timestamp()
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Human-readable local date, computed lazily and cached.
    pub fn created_string(&self) -> &str {
        self.date_cache.get_or_init(|| {
            self.created
                .with_timezone(&Local)
                .format("%a %b %e %H:%M:%S %Y")
                .to_string()
        })
    }
}
