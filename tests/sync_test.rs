//! Two-node synchronization: convergence, deletion propagation, auth.

#[cfg(test)]
mod tests {
    use hikup::config::{AuthSettings, ServerSettings, Settings, SyncSettings, SyncTarget};
    use hikup::error::HikupError;
    use hikup::server::{NodeState, Server, SharedNode};
    use hikup::storage::Storage;
    use hikup::sync;
    use hikup::tracker::RemovalTracker;
    use hikup::wire::ClientConnection;
    use std::net::SocketAddr;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    fn test_settings() -> Settings {
        Settings {
            server: ServerSettings {
                listen: "127.0.0.1:0".to_string(),
                ..ServerSettings::default()
            },
            auth: AuthSettings {
                user: "admin".to_string(),
                password: "hunter2".to_string(),
            },
            sync: SyncSettings::default(),
            sync_targets: Vec::new(),
        }
    }

    fn target(addr: SocketAddr, pass: &str) -> SyncTarget {
        SyncTarget {
            name: "peer".to_string(),
            address: addr.to_string(),
            user: "admin".to_string(),
            pass: pass.to_string(),
        }
    }

    /// Put a file straight into a storage directory with its real hash.
    fn seed(storage: &Storage, name: &str, content: &[u8]) -> anyhow::Result<String> {
        let hash = blake3::hash(content).to_hex().to_string();
        let staged = storage.staging_path(&hash);
        std::fs::write(&staged, content)?;
        storage.commit(&staged, name, &hash)?;
        Ok(hash)
    }

    fn make_node(base: &Path) -> anyhow::Result<(Storage, SharedNode)> {
        let storage = Storage::open(base)?;
        let tracker = RemovalTracker::load(&base.join("tracker.toml"))?;
        let node = Arc::new(Mutex::new(NodeState {
            storage: storage.clone(),
            tracker,
        }));
        Ok((storage, node))
    }

    async fn start_slave(base: &Path) -> anyhow::Result<(SocketAddr, SharedNode, CancellationToken)> {
        let (storage, node) = make_node(base)?;
        let shutdown = CancellationToken::new();
        let server = Server::bind(
            Arc::new(test_settings()),
            storage,
            Arc::clone(&node),
            shutdown.clone(),
        )
        .await?;
        let addr = server.local_addr()?;
        tokio::spawn(server.run());
        Ok((addr, node, shutdown))
    }

    async fn run_master_round(
        master: &SharedNode,
        slave_addr: SocketAddr,
        pass: &str,
    ) -> hikup::Result<()> {
        let mut conn = ClientConnection::connect(&slave_addr.to_string()).await?;
        let mut node = master.lock().await;
        sync::sync_as_master(&mut conn, &mut node, &target(slave_addr, pass)).await
    }

    #[tokio::test]
    async fn test_one_round_converges_both_inventories() -> anyhow::Result<()> {
        let temp_a = TempDir::new()?;
        let temp_b = TempDir::new()?;

        let (storage_a, node_a) = make_node(temp_a.path())?;
        let hash_only_a = seed(&storage_a, "only-a.txt", b"file living on a")?;

        let (addr_b, node_b, shutdown) = start_slave(temp_b.path()).await?;
        let hash_only_b = {
            let node = node_b.lock().await;
            seed(&node.storage, "only-b.txt", b"file living on b")?
        };

        run_master_round(&node_a, addr_b, "hunter2").await?;

        let inventory_a = storage_a.inventory()?;
        assert!(inventory_a.contains(&hash_only_a));
        assert!(inventory_a.contains(&hash_only_b));

        let node = node_b.lock().await;
        let inventory_b = node.storage.inventory()?;
        assert_eq!(inventory_a, inventory_b);

        // Pulled file keeps its name alias on the new node.
        assert_eq!(
            std::fs::read(temp_a.path().join("links").join("only-b.txt"))?,
            b"file living on b"
        );

        shutdown.cancel();
        Ok(())
    }

    #[tokio::test]
    async fn test_removal_propagates_through_tracker() -> anyhow::Result<()> {
        let temp_a = TempDir::new()?;
        let temp_b = TempDir::new()?;

        let (storage_a, node_a) = make_node(temp_a.path())?;
        let (addr_b, node_b, shutdown) = start_slave(temp_b.path()).await?;

        // Both nodes hold the file; A removed it while B was offline.
        let hash = {
            let node = node_b.lock().await;
            seed(&node.storage, "stale.txt", b"deleted on a, stale on b")?
        };
        node_a.lock().await.tracker.record(&hash)?;

        run_master_round(&node_a, addr_b, "hunter2").await?;

        // B deleted its stale copy instead of resurrecting it on A.
        let node = node_b.lock().await;
        assert!(!node.storage.contains(&hash)?);
        assert!(!storage_a.contains(&hash)?);
        assert!(temp_b.path().join("links").join("stale.txt").symlink_metadata().is_err());

        // The reconciled hash left A's tracker.
        assert!(!node_a.lock().await.tracker.contains(&hash));

        shutdown.cancel();
        Ok(())
    }

    #[tokio::test]
    async fn test_second_round_is_a_no_op() -> anyhow::Result<()> {
        let temp_a = TempDir::new()?;
        let temp_b = TempDir::new()?;

        let (storage_a, node_a) = make_node(temp_a.path())?;
        seed(&storage_a, "shared.txt", b"payload")?;
        let (addr_b, node_b, shutdown) = start_slave(temp_b.path()).await?;

        run_master_round(&node_a, addr_b, "hunter2").await?;
        run_master_round(&node_a, addr_b, "hunter2").await?;

        let node = node_b.lock().await;
        assert_eq!(storage_a.inventory()?, node.storage.inventory()?);
        assert_eq!(node.storage.list()?.len(), 1);

        shutdown.cancel();
        Ok(())
    }

    #[tokio::test]
    async fn test_wrong_credentials_abort_the_round() -> anyhow::Result<()> {
        let temp_a = TempDir::new()?;
        let temp_b = TempDir::new()?;

        let (storage_a, node_a) = make_node(temp_a.path())?;
        let hash = seed(&storage_a, "private.txt", b"should stay on a")?;
        let (addr_b, node_b, shutdown) = start_slave(temp_b.path()).await?;

        let result = run_master_round(&node_a, addr_b, "wrong").await;
        assert!(matches!(result, Err(HikupError::Rejected(_))));

        let node = node_b.lock().await;
        assert!(!node.storage.contains(&hash)?);

        shutdown.cancel();
        Ok(())
    }
}
