//! Command handlers, one per wire command.

use crate::client;
use crate::config::Settings;
use crate::error::{HikupError, Result};
use crate::server::SharedNode;
use crate::storage::Storage;
use crate::transfer::{self, field, ChunkPolicy, INITIAL_CHUNK_SERVER};
use crate::util::{human_size, transfer_ceiling};
use crate::wire::Channel;
use tokio::fs::File;
use tracing::{debug, info, warn};

/// Upload: announcement, dedup check, chunk stream, integrity gate.
///
/// A hash-identical re-upload of the same name is refused before any bytes
/// move; the existing public link rides along with the `NO`. On a computed
/// hash differing from the declared one the staged file is deleted and the
/// uploader gets an explicit mismatch message instead of `OK`.
pub async fn handle_upload<C: Channel>(
    conn: &mut C,
    storage: &Storage,
    settings: &Settings,
) -> Result<()> {
    let size: u64 = field(&conn.receive_internal().await?, "size:")?
        .parse()
        .map_err(|_| HikupError::Protocol("upload size is not a number".into()))?;
    let name = field(&conn.receive_internal().await?, "filename:")?.to_string();
    let declared = field(&conn.receive_internal().await?, "hash:")?.to_string();

    if storage.canonical_path(&name, &declared).exists() {
        info!(%name, hash = %declared, "upload refused, already stored");
        conn.send_internal("NO").await?;
        conn.send_internal(&settings.public_link(&name).unwrap_or_default())
            .await?;
        return Ok(());
    }
    conn.send_internal("OK").await?;

    conn.set_buffer_size(transfer_ceiling(size) as usize);

    let staged = storage.staging_path(&declared);
    let mut file = File::create(&staged).await?;

    info!(%name, size = %human_size(size), "receiving upload");
    let received = match transfer::receive_chunks(conn, &mut file, |written, _| {
        debug!(written, size, "upload progress");
    })
    .await
    {
        Ok(received) => received,
        Err(e) => {
            storage.discard_staged(&staged);
            let _ = conn.send_internal("fail").await;
            return Err(e);
        }
    };
    drop(file);

    if received.hash != declared {
        storage.discard_staged(&staged);
        conn.send_internal("declared hash and computed hash do not match")
            .await?;
        return Err(HikupError::HashMismatch {
            declared,
            computed: received.hash,
        });
    }

    storage.commit(&staged, &name, &declared)?;
    info!(%name, hash = %declared, "upload stored");

    conn.send_internal("OK").await?;
    conn.send_internal(&received.hash).await?;
    match settings.public_link(&name) {
        Some(link) => {
            conn.send_internal("1").await?;
            conn.send_internal(&link).await?;
        }
        None => conn.send_internal("0").await?,
    }
    Ok(())
}

/// Download: locate by hash, send preamble, stream chunks.
pub async fn handle_download<C: Channel>(conn: &mut C, storage: &Storage) -> Result<()> {
    let hash = field(&conn.receive_internal().await?, "hash:")?.to_string();

    let Some(path) = storage.find_by_hash(&hash)? else {
        info!(%hash, "download refused, not found");
        conn.send_internal("NO").await?;
        return Ok(());
    };
    let mut file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            warn!(%hash, error = %e, "download refused, cannot open");
            conn.send_internal("NO").await?;
            return Ok(());
        }
    };

    let info = crate::storage::FileInfo::from_storage_path(&path)?;
    conn.send_internal("OK").await?;
    conn.send_internal(&format!("size:{}", info.size())).await?;
    conn.send_internal(&format!("filename:{}", info.name())).await?;

    info!(name = info.name(), size = %human_size(info.size()), "sending download");
    let mut policy = ChunkPolicy::new(INITIAL_CHUNK_SERVER, transfer_ceiling(info.size()));
    transfer::send_chunks(conn, &mut file, info.size(), &mut policy, |sent| {
        debug!(sent, "download progress");
    })
    .await
}

/// Remove: delete storage entry plus alias, record the hash for sync
/// propagation, and push the removal to every configured peer right away.
/// An unreachable peer is logged and skipped; the tracker catches it up on
/// the next sync round.
pub async fn handle_remove<C: Channel>(
    conn: &mut C,
    node: &SharedNode,
    settings: &Settings,
) -> Result<()> {
    let hash = field(&conn.receive_internal().await?, "hash:")?.to_string();

    let removed = {
        let mut node = node.lock().await;
        match node.storage.remove(&hash)? {
            Some(name) => {
                node.tracker.record(&hash)?;
                Some(name)
            }
            None => None,
        }
    };

    let Some(name) = removed else {
        info!(%hash, "remove refused, not found");
        conn.send_internal("NO").await?;
        return Ok(());
    };

    info!(%name, %hash, "removed");
    conn.send_internal("OK").await?;

    for target in &settings.sync_targets {
        match client::remove_remote(&target.address, &hash).await {
            Ok(_) => debug!(peer = %target.name, %hash, "removal propagated"),
            Err(e) => warn!(peer = %target.name, %hash, error = %e, "removal propagation failed"),
        }
    }
    Ok(())
}

/// List: auth gate, then one encoded record per stored file.
pub async fn handle_list<C: Channel>(
    conn: &mut C,
    storage: &Storage,
    settings: &Settings,
) -> Result<()> {
    conn.send_internal("OK").await?;

    let user = field(&conn.receive_internal().await?, "user:")?.to_string();
    let pass = field(&conn.receive_internal().await?, "pass:")?.to_string();

    if user != settings.auth.user || pass != settings.auth.password {
        info!(%user, "list refused, wrong credentials");
        conn.send_internal("NOPE").await?;
        return Ok(());
    }
    conn.send_internal("OK").await?;

    for info in storage.list()? {
        conn.send_data(&info.encode()).await?;
    }
    conn.send_internal("DONE").await
}
