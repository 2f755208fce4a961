//! Filesystem and backing pool reconciliation
//!
//! A filesystem needs a metadata pool and a data pool before it can be
//! created. The pool pair reconciles as a single unit: presence means both
//! pools are listed, and applying creates both. A half-created pair (one
//! pool listed, one missing) therefore reads as absent and the create
//! commands run again; pool creation tolerates an existing pool of the
//! same name.

use crate::domain::ports::{ExecutorRef, Reconciler, ACTION_TIMEOUT, QUERY_TIMEOUT};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Names and placement-group sizing for the filesystem and its pools
#[derive(Debug, Clone)]
pub struct FilesystemConfig {
    /// Filesystem name
    pub fs_name: String,
    /// Metadata pool name
    pub meta_pool: String,
    /// Data pool name
    pub data_pool: String,
    /// Placement groups for the metadata pool
    pub meta_pg: u32,
    /// Placement groups for the data pool
    pub data_pg: u32,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            fs_name: "cephfs".into(),
            meta_pool: "cephfs_meta".into(),
            data_pool: "cephfs_data".into(),
            meta_pg: 64,
            data_pg: 128,
        }
    }
}

/// Reconciles the metadata/data pool pair backing the filesystem
pub struct PoolPairReconciler {
    executor: ExecutorRef,
    config: Arc<FilesystemConfig>,
}

impl PoolPairReconciler {
    pub fn new(executor: ExecutorRef, config: Arc<FilesystemConfig>) -> Self {
        Self { executor, config }
    }
}

#[async_trait]
impl Reconciler for PoolPairReconciler {
    fn resource(&self) -> &str {
        "storage pools"
    }

    async fn exists(&self, node: &str) -> bool {
        let output = self
            .executor
            .execute_captured(node, &["sudo", "ceph", "osd", "pool", "ls"], QUERY_TIMEOUT)
            .await
            .unwrap_or_default();

        let pools: BTreeSet<&str> = output.lines().map(str::trim).collect();
        pools.contains(self.config.meta_pool.as_str())
            && pools.contains(self.config.data_pool.as_str())
    }

    async fn apply(&self, node: &str) -> Result<()> {
        let meta_pg = self.config.meta_pg.to_string();
        let data_pg = self.config.data_pg.to_string();
        self.executor
            .execute(
                node,
                &[
                    "sudo",
                    "ceph",
                    "osd",
                    "pool",
                    "create",
                    &self.config.meta_pool,
                    &meta_pg,
                ],
                ACTION_TIMEOUT,
            )
            .await?;
        self.executor
            .execute(
                node,
                &[
                    "sudo",
                    "ceph",
                    "osd",
                    "pool",
                    "create",
                    &self.config.data_pool,
                    &data_pg,
                ],
                ACTION_TIMEOUT,
            )
            .await?;
        info!(
            meta = %self.config.meta_pool,
            data = %self.config.data_pool,
            "storage pools created"
        );
        Ok(())
    }
}

/// Reconciles the filesystem itself on top of the pool pair
pub struct FilesystemReconciler {
    executor: ExecutorRef,
    config: Arc<FilesystemConfig>,
}

impl FilesystemReconciler {
    pub fn new(executor: ExecutorRef, config: Arc<FilesystemConfig>) -> Self {
        Self { executor, config }
    }
}

#[async_trait]
impl Reconciler for FilesystemReconciler {
    fn resource(&self) -> &str {
        "filesystem"
    }

    async fn exists(&self, node: &str) -> bool {
        match self
            .executor
            .execute_captured(node, &["sudo", "ceph", "fs", "ls"], QUERY_TIMEOUT)
            .await
        {
            Some(output) => output.contains(&self.config.fs_name),
            None => false,
        }
    }

    async fn apply(&self, node: &str) -> Result<()> {
        self.executor
            .execute(
                node,
                &[
                    "sudo",
                    "ceph",
                    "fs",
                    "new",
                    &self.config.fs_name,
                    &self.config.meta_pool,
                    &self.config.data_pool,
                ],
                ACTION_TIMEOUT,
            )
            .await?;
        info!(fs = %self.config.fs_name, "filesystem created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRemote;

    const PRIMARY: &str = "ceph-node-1";

    fn config() -> Arc<FilesystemConfig> {
        Arc::new(FilesystemConfig::default())
    }

    #[test]
    fn test_default_config() {
        let config = FilesystemConfig::default();
        assert_eq!(config.fs_name, "cephfs");
        assert_eq!(config.meta_pool, "cephfs_meta");
        assert_eq!(config.data_pool, "cephfs_data");
        assert_eq!(config.meta_pg, 64);
        assert_eq!(config.data_pg, 128);
    }

    #[tokio::test]
    async fn test_pools_exist_when_both_listed() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.stub_captured(
            PRIMARY,
            &["sudo", "ceph", "osd", "pool", "ls"],
            Some(".mgr\ncephfs_meta\ncephfs_data\n"),
        );

        let pools = PoolPairReconciler::new(remote, config());
        assert!(pools.exists(PRIMARY).await);
    }

    #[tokio::test]
    async fn test_half_created_pair_reads_absent() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.stub_captured(
            PRIMARY,
            &["sudo", "ceph", "osd", "pool", "ls"],
            Some(".mgr\ncephfs_meta\n"),
        );

        let pools = PoolPairReconciler::new(remote, config());
        assert!(!pools.exists(PRIMARY).await);
    }

    #[tokio::test]
    async fn test_pool_names_match_whole_lines_only() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.stub_captured(
            PRIMARY,
            &["sudo", "ceph", "osd", "pool", "ls"],
            Some("cephfs_meta_old\ncephfs_data_old\n"),
        );

        let pools = PoolPairReconciler::new(remote, config());
        assert!(!pools.exists(PRIMARY).await);
    }

    #[tokio::test]
    async fn test_pool_apply_creates_meta_then_data() {
        let remote = Arc::new(ScriptedRemote::new());
        let pools = PoolPairReconciler::new(Arc::<ScriptedRemote>::clone(&remote), config());
        pools.apply(PRIMARY).await.unwrap();

        assert_eq!(
            remote.executed(),
            vec![
                "ceph-node-1: sudo ceph osd pool create cephfs_meta 64".to_string(),
                "ceph-node-1: sudo ceph osd pool create cephfs_data 128".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_filesystem_exists_by_listing() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.stub_captured(
            PRIMARY,
            &["sudo", "ceph", "fs", "ls"],
            Some("name: cephfs, metadata pool: cephfs_meta, data pools: [cephfs_data ]\n"),
        );

        let fs = FilesystemReconciler::new(remote, config());
        assert!(fs.exists(PRIMARY).await);
    }

    #[tokio::test]
    async fn test_filesystem_absent_on_empty_listing() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.stub_captured(
            PRIMARY,
            &["sudo", "ceph", "fs", "ls"],
            Some("No filesystems enabled\n"),
        );

        let fs = FilesystemReconciler::new(remote, config());
        assert!(!fs.exists(PRIMARY).await);
    }

    #[tokio::test]
    async fn test_filesystem_apply_names_both_pools() {
        let remote = Arc::new(ScriptedRemote::new());
        let fs = FilesystemReconciler::new(Arc::<ScriptedRemote>::clone(&remote), config());
        fs.apply(PRIMARY).await.unwrap();

        assert_eq!(
            remote.executed(),
            vec!["ceph-node-1: sudo ceph fs new cephfs cephfs_meta cephfs_data".to_string()]
        );
    }
}
