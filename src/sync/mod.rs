//! Multi-peer synchronization.
//!
//! Reconciles two nodes' storage directories over the ordinary wire
//! protocol: the initiating master and the responding slave exchange their
//! pending-removal sets, then their full hash inventories, then move the
//! set differences with the same chunked, confirmed, hash-verified
//! transfer an upload uses. The master speaks first in every phase.

use crate::config::{AuthSettings, Settings, SyncTarget};
use crate::error::{HikupError, Result};
use crate::server::NodeState;
use crate::storage::FileInfo;
use crate::transfer::{self, field, ChunkPolicy, INITIAL_CHUNK_SERVER};
use crate::util::transfer_ceiling;
use crate::wire::{Channel, ClientConnection};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::fs::File;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress of one sync round. Any error aborts the round to `Failed`;
/// individual transfers that already verified stay committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Authenticating,
    ExchangingDeletions,
    ExchangingInventory,
    TransferringOffered,
    TransferringRequested,
    Complete,
    Failed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Authenticating => "authenticating",
            SyncPhase::ExchangingDeletions => "exchanging-deletions",
            SyncPhase::ExchangingInventory => "exchanging-inventory",
            SyncPhase::TransferringOffered => "transferring-offered",
            SyncPhase::TransferringRequested => "transferring-requested",
            SyncPhase::Complete => "complete",
            SyncPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn enter(phase: SyncPhase, peer: &str) {
    debug!(%phase, peer, "sync phase");
}

/// Encode a hash set as `hash|hash|...|`. Every entry carries a trailing
/// separator; the empty set is the empty string.
pub fn encode_hash_set(hashes: &HashSet<String>) -> String {
    let mut sorted: Vec<&String> = hashes.iter().collect();
    sorted.sort();
    let mut out = String::new();
    for hash in sorted {
        out.push_str(hash);
        out.push('|');
    }
    out
}

/// Inverse of [`encode_hash_set`]. An entry without its terminating
/// separator is a protocol violation.
pub fn parse_hash_set(encoded: &str) -> Result<HashSet<String>> {
    let mut hashes = HashSet::new();
    let mut rest = encoded;
    while !rest.is_empty() {
        let Some(sep) = rest.find('|') else {
            return Err(HikupError::Protocol(format!(
                "hash set entry missing separator: {rest}"
            )));
        };
        hashes.insert(rest[..sep].to_string());
        rest = &rest[sep + 1..];
    }
    Ok(hashes)
}

/// Delete every local file whose hash the peer has marked removed, and
/// clear reconciled hashes from our own tracker.
fn apply_peer_removals(node: &mut NodeState, peer: &HashSet<String>) -> Result<()> {
    for hash in peer {
        if let Some(name) = node.storage.remove(hash)? {
            info!(%hash, %name, "removed by peer reconciliation");
        }
        node.tracker.clear(hash)?;
    }
    Ok(())
}

/// Push one stored file to the peer with the upload sub-protocol. A `NO`
/// means the peer already holds the hash and is not an error.
pub async fn send_offered<C: Channel>(
    conn: &mut C,
    node: &NodeState,
    hash: &str,
) -> Result<()> {
    let path = node
        .storage
        .find_by_hash(hash)?
        .ok_or_else(|| HikupError::Storage(format!("offered hash vanished: {hash}")))?;
    let info = FileInfo::from_storage_path(&path)?;

    conn.send_internal(&format!("size:{}", info.size())).await?;
    conn.send_internal(&format!("filename:{}", info.name())).await?;
    conn.send_internal(&format!("hash:{hash}")).await?;

    match conn.receive_internal().await?.as_str() {
        "OK" => {}
        "NO" => {
            debug!(hash, "peer already has offered file");
            return Ok(());
        }
        other => {
            return Err(HikupError::Protocol(format!(
                "unexpected reply to offer: {other}"
            )))
        }
    }

    let mut file = File::open(&path).await?;
    let mut policy = ChunkPolicy::new(INITIAL_CHUNK_SERVER, transfer_ceiling(info.size()));
    transfer::send_chunks(conn, &mut file, info.size(), &mut policy, |_| {}).await?;

    match conn.receive_internal().await?.as_str() {
        "OK" => Ok(()),
        other => Err(HikupError::Rejected(other.to_string())),
    }
}

/// Receive one offered file and commit it. Returns the stored hash, or
/// `None` when the offer was declined as a duplicate.
pub async fn receive_offered<C: Channel>(
    conn: &mut C,
    node: &NodeState,
) -> Result<Option<String>> {
    let size: u64 = field(&conn.receive_internal().await?, "size:")?
        .parse()
        .map_err(|_| HikupError::Protocol("offer size is not a number".into()))?;
    let name = field(&conn.receive_internal().await?, "filename:")?.to_string();
    let hash = field(&conn.receive_internal().await?, "hash:")?.to_string();

    if node.storage.contains(&hash)? {
        conn.send_internal("NO").await?;
        return Ok(None);
    }
    conn.send_internal("OK").await?;

    let ceiling = transfer_ceiling(size);
    conn.set_buffer_size(ceiling as usize);

    let staged = node.storage.staging_path(&hash);
    let mut file = File::create(&staged).await?;
    let received = match transfer::receive_chunks(conn, &mut file, |_, _| {}).await {
        Ok(received) => received,
        Err(e) => {
            node.storage.discard_staged(&staged);
            return Err(e);
        }
    };
    drop(file);

    if received.hash != hash {
        node.storage.discard_staged(&staged);
        conn.send_internal("hash mismatch").await?;
        return Err(HikupError::HashMismatch {
            declared: hash,
            computed: received.hash,
        });
    }

    node.storage.commit(&staged, &name, &hash)?;
    conn.send_internal("OK").await?;
    Ok(Some(hash))
}

/// One full round as the initiating master, over an established and
/// handshaken connection. The caller holds the node lock for the whole
/// round so it cannot overlap another sync touching the same directories.
pub async fn sync_as_master(
    conn: &mut ClientConnection,
    node: &mut NodeState,
    target: &SyncTarget,
) -> Result<()> {
    let peer = target.name.as_str();

    enter(SyncPhase::Authenticating, peer);
    conn.send_internal("command:SYNC").await?;
    conn.send_internal(&format!("user:{}", target.user)).await?;
    conn.send_internal(&format!("pass:{}", target.pass)).await?;
    match conn.receive_internal().await?.as_str() {
        "OK" => {}
        other => return Err(HikupError::Rejected(other.to_string())),
    }

    enter(SyncPhase::ExchangingDeletions, peer);
    let announced_removals = node.tracker.hashes().clone();
    conn.send_data(&encode_hash_set(&announced_removals)).await?;
    let peer_removals = parse_hash_set(&conn.receive_data().await?)?;
    apply_peer_removals(node, &peer_removals)?;

    enter(SyncPhase::ExchangingInventory, peer);
    let local = node.storage.inventory()?;
    conn.send_data(&encode_hash_set(&local)).await?;
    let remote = parse_hash_set(&conn.receive_data().await?)?;

    let mut to_offer: Vec<&String> = local.difference(&remote).collect();
    to_offer.sort();
    let to_request = remote.difference(&local).count();

    enter(SyncPhase::TransferringOffered, peer);
    for hash in &to_offer {
        send_offered(conn, node, hash).await?;
    }

    enter(SyncPhase::TransferringRequested, peer);
    for _ in 0..to_request {
        receive_offered(conn, node).await?;
    }

    // The peer has acted on our removal set; keeping those hashes around
    // would delete a legitimately re-uploaded file in a later round.
    for hash in &announced_removals {
        node.tracker.clear(hash)?;
    }

    enter(SyncPhase::Complete, peer);
    info!(
        peer,
        offered = to_offer.len(),
        requested = to_request,
        "sync round complete"
    );
    Ok(())
}

/// Slave-side credential check, run by the dispatcher before it takes the
/// node lock so an unauthenticated connection never blocks a sync round.
pub async fn authenticate_slave<C: Channel>(conn: &mut C, auth: &AuthSettings) -> Result<()> {
    enter(SyncPhase::Authenticating, "master");
    let user = field(&conn.receive_internal().await?, "user:")?.to_string();
    let pass = field(&conn.receive_internal().await?, "pass:")?.to_string();
    if user != auth.user || pass != auth.password {
        conn.send_internal("NOPE").await?;
        return Err(HikupError::Rejected("wrong sync credentials".into()));
    }
    conn.send_internal("OK").await
}

/// One full round as the responding slave. [`authenticate_slave`] has
/// already passed; the exchange starts at the deletion phase.
pub async fn sync_as_slave<C: Channel>(conn: &mut C, node: &mut NodeState) -> Result<()> {
    let peer = "master";

    enter(SyncPhase::ExchangingDeletions, peer);
    let peer_removals = parse_hash_set(&conn.receive_data().await?)?;
    let announced_removals = node.tracker.hashes().clone();
    conn.send_data(&encode_hash_set(&announced_removals)).await?;
    apply_peer_removals(node, &peer_removals)?;

    enter(SyncPhase::ExchangingInventory, peer);
    let remote = parse_hash_set(&conn.receive_data().await?)?;
    let local = node.storage.inventory()?;
    conn.send_data(&encode_hash_set(&local)).await?;

    let to_receive = remote.difference(&local).count();
    let mut to_send: Vec<&String> = local.difference(&remote).collect();
    to_send.sort();

    enter(SyncPhase::TransferringOffered, peer);
    for _ in 0..to_receive {
        receive_offered(conn, node).await?;
    }

    enter(SyncPhase::TransferringRequested, peer);
    for hash in &to_send {
        send_offered(conn, node, hash).await?;
    }

    for hash in &announced_removals {
        node.tracker.clear(hash)?;
    }

    enter(SyncPhase::Complete, peer);
    info!(
        received = to_receive,
        sent = to_send.len(),
        "slave sync round complete"
    );
    Ok(())
}

/// Background master loop: every period, run one round against each
/// configured target. Per-target failures are logged and never abort the
/// loop. The node lock serializes rounds against the slave handler.
pub async fn master_loop(
    node: Arc<Mutex<NodeState>>,
    settings: Arc<Settings>,
    shutdown: CancellationToken,
) {
    if settings.sync_targets.is_empty() {
        return;
    }

    let period = std::time::Duration::from_secs(settings.sync.period_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for target in &settings.sync_targets {
            if shutdown.is_cancelled() {
                return;
            }
            if let Err(e) = sync_with_target(&node, target).await {
                warn!(peer = %target.name, error = %e, "sync round failed");
            }
        }
    }
}

async fn sync_with_target(node: &Arc<Mutex<NodeState>>, target: &SyncTarget) -> Result<()> {
    let mut conn = ClientConnection::connect(&target.address).await?;
    let mut node = node.lock().await;
    let result = sync_as_master(&mut conn, &mut node, target).await;
    if result.is_err() {
        enter(SyncPhase::Failed, &target.name);
    }
    result
}
