//! Chunked file transfer with adaptive sizing and per-chunk confirmation.
//!
//! Stop-and-wait flow control: every raw chunk must be confirmed by the
//! receiver before the next is sent. Throughput is adapted by varying the
//! chunk size from the observed round trip of the previous chunk, not by
//! pipelining. Integrity is verified end to end by a streaming hash over
//! the bytes actually written.

use crate::error::{HikupError, Result};
use crate::wire::Channel;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

/// Starting chunk size for client-initiated uploads.
pub const INITIAL_CHUNK_CLIENT: u64 = 1024 * 1024;

/// Starting chunk size for server-side sends (downloads, sync pushes).
pub const INITIAL_CHUNK_SERVER: u64 = 2 * 1024 * 1024;

/// Chunk size never drops below this, so the policy cannot be driven to
/// zero by a chain of slow round trips.
pub const MIN_CHUNK: u64 = 64 * 1024;

/// End-of-transfer marker as it appears on the wire after decryption.
const DONE_MARKER: &[u8] = b"INTERNAL::DONE";

const SHRINK_ABOVE: Duration = Duration::from_millis(1400);
const DOUBLE_BELOW: Duration = Duration::from_millis(300);
const GROW_BELOW: Duration = Duration::from_millis(600);

/// Throughput-probing chunk size heuristic. Reacts to one local round-trip
/// observation per chunk, with a memory-availability ceiling so growth is
/// bounded. The ceiling is computed once by the caller and passed in.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPolicy {
    size: u64,
    ceiling: u64,
}

impl ChunkPolicy {
    pub fn new(initial: u64, ceiling: u64) -> Self {
        let ceiling = ceiling.max(MIN_CHUNK);
        Self {
            size: initial.clamp(MIN_CHUNK, ceiling),
            ceiling,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Adjust from the last chunk's round trip: slow shrinks by 0.75x,
    /// fast doubles, middling grows by 1.25x. Growth requires twice the
    /// current size of headroom under the ceiling.
    pub fn adjust(&mut self, round_trip: Duration) {
        if round_trip > SHRINK_ABOVE {
            self.size = (self.size * 3 / 4).max(MIN_CHUNK);
        } else if round_trip < DOUBLE_BELOW && self.ceiling >= self.size * 2 {
            self.size *= 2;
        } else if round_trip < GROW_BELOW && self.ceiling >= self.size * 2 {
            self.size = self.size * 5 / 4;
        }
        self.size = self.size.clamp(MIN_CHUNK, self.ceiling);
    }
}

/// Strip a `tag:` prefix from an announcement field like `size:1024`.
pub fn field<'a>(message: &'a str, tag: &str) -> Result<&'a str> {
    message.strip_prefix(tag).ok_or_else(|| {
        HikupError::Protocol(format!("expected {tag}<value>, got: {message}"))
    })
}

/// Stream-hash a file in bounded chunks. Returns the lowercase hex digest.
pub async fn hash_file(path: &Path, chunk_size: u64) -> Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; chunk_size.max(MIN_CHUNK) as usize];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// Sender side: read and send `size` bytes in adaptively-sized chunks,
/// blocking on the receiver's `confirm` after each, then announce `DONE`.
/// `progress` observes cumulative bytes sent.
pub async fn send_chunks<C: Channel>(
    conn: &mut C,
    file: &mut File,
    size: u64,
    policy: &mut ChunkPolicy,
    mut progress: impl FnMut(u64),
) -> Result<()> {
    let mut sent: u64 = 0;

    while sent < size {
        let want = policy.size().min(size - sent) as usize;
        let mut buf = vec![0u8; want];
        file.read_exact(&mut buf).await?;

        let start = Instant::now();
        conn.send(&buf).await?;

        let confirm = conn.receive_internal().await?;
        if confirm != "confirm" {
            return Err(HikupError::Protocol(format!(
                "peer did not confirm chunk, got: {confirm}"
            )));
        }
        let round_trip = start.elapsed();

        sent += want as u64;
        progress(sent);

        if sent < size {
            policy.adjust(round_trip);
        }
    }

    conn.send_internal("DONE").await
}

/// Outcome of [`receive_chunks`]: bytes written and the hash computed over
/// them, for comparison against the sender's declared hash.
pub struct ReceivedFile {
    pub bytes: u64,
    pub hash: String,
}

/// Receiver side: write chunks to `file` until the `DONE` marker, replying
/// `confirm` after each and hashing every byte written. On a transport
/// error the caller is responsible for deleting the partial file.
pub async fn receive_chunks<C: Channel>(
    conn: &mut C,
    file: &mut File,
    mut progress: impl FnMut(u64, Duration),
) -> Result<ReceivedFile> {
    let mut hasher = blake3::Hasher::new();
    let mut written: u64 = 0;

    loop {
        let (chunk, took) = conn.receive_timed().await?;

        if chunk == DONE_MARKER {
            break;
        }

        file.write_all(&chunk).await?;
        hasher.update(&chunk);
        written += chunk.len() as u64;

        conn.send_internal("confirm").await?;
        progress(written, took);
    }

    file.flush().await?;

    Ok(ReceivedFile {
        bytes: written,
        hash: hasher.finalize().to_hex().to_string(),
    })
}
