//! Sentinel-delimited message framing.
//!
//! Messages are terminated by a fixed sentinel byte sequence rather than
//! length-prefixed. The framer accumulates raw reads, splits out every
//! complete message, and replays queued messages in FIFO order before any
//! new read is issued. A sentinel split across two reads is handled by
//! keeping the unterminated tail in the accumulator.

use bytes::BytesMut;
use std::collections::VecDeque;

/// Message delimiter. Cannot appear inside an encrypted payload because
/// sealed messages are hex-encoded before framing.
pub const SENTINEL: &[u8] = b"::--///--$$$";

/// Find `needle` in `haystack` starting at `from`.
fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if haystack.len() < from + needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

#[derive(Debug, Default)]
pub struct Framer {
    acc: BytesMut,
    pending: VecDeque<Vec<u8>>,
    /// Where to resume sentinel scanning in `acc`; avoids re-scanning the
    /// whole accumulator on every push of a large chunked payload.
    scan_from: usize,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one raw read and split out any completed messages.
    pub fn push(&mut self, chunk: &[u8]) {
        self.acc.extend_from_slice(chunk);

        loop {
            match find(&self.acc, SENTINEL, self.scan_from) {
                Some(pos) => {
                    let msg = self.acc[..pos].to_vec();
                    let _ = self.acc.split_to(pos + SENTINEL.len());
                    self.scan_from = 0;
                    self.pending.push_back(msg);
                }
                None => {
                    // Resume just before the tail in case the sentinel is
                    // split across this read and the next.
                    self.scan_from = self.acc.len().saturating_sub(SENTINEL.len() - 1);
                    break;
                }
            }
        }
    }

    /// Pop the oldest complete message, if any.
    pub fn next(&mut self) -> Option<Vec<u8>> {
        self.pending.pop_front()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Transform every queued message in place. Used to retroactively
    /// decrypt segments that were framed before the handshake completed.
    pub fn try_map_pending<F, E>(&mut self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&[u8]) -> Result<Vec<u8>, E>,
    {
        for msg in self.pending.iter_mut() {
            let opened = f(msg.as_slice())?;
            *msg = opened;
        }
        Ok(())
    }
}
