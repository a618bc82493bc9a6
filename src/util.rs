//! Small shared helpers: human-readable sizes and the free-memory probe
//! used to cap transfer buffers.

use std::fs;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Format a byte count as a decimal human-readable string ("3.25 MB").
pub fn human_size(size: u64) -> String {
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// Fallback ceiling when the available-memory probe fails: 256 MiB.
const DEFAULT_FREE_MEMORY: u64 = 256 * 1024 * 1024;

/// Available memory in bytes (MemAvailable from /proc/meminfo, with a
/// conservative fallback on platforms without procfs).
pub fn free_memory() -> u64 {
    let Ok(meminfo) = fs::read_to_string("/proc/meminfo") else {
        return DEFAULT_FREE_MEMORY;
    };

    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            let kib: u64 = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .unwrap_or(DEFAULT_FREE_MEMORY / 1024);
            return kib * 1024;
        }
    }

    DEFAULT_FREE_MEMORY
}

/// Buffer/chunk ceiling for a transfer of `file_size` bytes:
/// `min(available/4, file_size/16)`, floored at 64 KiB so tiny files still
/// get a workable buffer.
pub fn transfer_ceiling(file_size: u64) -> u64 {
    let ceiling = (free_memory() / 4).min(file_size / 16);
    ceiling.max(64 * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512.00 B");
        assert_eq!(human_size(1500), "1.50 KB");
        assert_eq!(human_size(3_250_000), "3.25 MB");
    }

    #[test]
    fn test_transfer_ceiling_floor() {
        // A 1-byte file must still get the 64 KiB floor.
        assert_eq!(transfer_ceiling(1), 64 * 1024);
    }

    #[test]
    fn test_free_memory_nonzero() {
        assert!(free_memory() > 0);
    }
}
