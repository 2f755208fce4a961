//! Filesystem mount reconciliation
//!
//! Mounting is the first step that needs a live metadata daemon, so `apply`
//! waits for the daemon to report active before invoking the FUSE client.
//! The daemon spends a while in a distinct "creating" state after the
//! filesystem is created, which gets the longer settle delay.

use crate::convergence::{poll_until_ready, PollConfig, Readiness};
use crate::domain::ports::{ExecutorRef, Reconciler, ACTION_TIMEOUT, QUERY_TIMEOUT};
use crate::error::Result;
use crate::reconcile::filesystem::FilesystemConfig;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

const CEPH_CONF: &str = "/var/snap/microceph/current/conf/ceph.conf";
const ADMIN_KEYRING: &str = "/var/snap/microceph/current/conf/ceph.client.admin.keyring";
const MEMBER_KEYRING: &str = "/var/snap/microceph/current/conf/ceph.keyring";

/// Reconciles the FUSE mount of the filesystem on a cluster member
pub struct MountReconciler {
    executor: ExecutorRef,
    config: Arc<FilesystemConfig>,
    /// Node whose daemon state is authoritative for the readiness wait
    primary: String,
    /// Directory the filesystem is mounted at
    mount_point: String,
    poll: PollConfig,
}

impl MountReconciler {
    pub fn new(
        executor: ExecutorRef,
        config: Arc<FilesystemConfig>,
        primary: &str,
        mount_point: &str,
        poll: PollConfig,
    ) -> Self {
        Self {
            executor,
            config,
            primary: primary.to_string(),
            mount_point: mount_point.to_string(),
            poll,
        }
    }

    /// Block until the metadata daemon reports active, within the poll budget
    async fn wait_for_mds_active(&self) -> Result<()> {
        let executor = Arc::clone(&self.executor);
        let primary = self.primary.clone();
        let fs_name = self.config.fs_name.clone();
        poll_until_ready("active mds daemon", &self.poll, move || {
            let executor = Arc::clone(&executor);
            let primary = primary.clone();
            let fs_name = fs_name.clone();
            async move {
                match executor
                    .execute_captured(&primary, &["sudo", "ceph", "mds", "stat"], QUERY_TIMEOUT)
                    .await
                {
                    Some(output) => mds_readiness(&output, &fs_name),
                    None => Readiness::Unknown,
                }
            }
        })
        .await
    }
}

/// Classify `ceph mds stat` output for the named filesystem
///
/// Active requires the filesystem's own rank line to carry `up:active`;
/// a bare `up:creating` anywhere keeps the longer settle delay even when
/// the daemon name is still missing from the output.
fn mds_readiness(output: &str, fs_name: &str) -> Readiness {
    let marker = format!("{}:", fs_name);
    if let Some(pos) = output.find(&marker) {
        let rest = &output[pos + marker.len()..];
        if rest.starts_with(|c: char| c.is_ascii_digit()) {
            let line_tail = rest.lines().next().unwrap_or("");
            if line_tail.contains("up:active") {
                return Readiness::Ready;
            }
        }
    }
    if output.contains("up:creating") {
        Readiness::Settling
    } else {
        Readiness::Unknown
    }
}

#[async_trait]
impl Reconciler for MountReconciler {
    fn resource(&self) -> &str {
        "filesystem mount"
    }

    async fn exists(&self, node: &str) -> bool {
        match self
            .executor
            .execute_captured(node, &["mount"], QUERY_TIMEOUT)
            .await
        {
            Some(output) => output
                .lines()
                .any(|line| line.contains(self.mount_point.as_str())),
            None => false,
        }
    }

    async fn apply(&self, node: &str) -> Result<()> {
        self.executor
            .execute(
                node,
                &["sudo", "mkdir", "-p", &self.mount_point],
                ACTION_TIMEOUT,
            )
            .await?;

        self.wait_for_mds_active().await?;

        // Only the primary holds the admin keyring; members get the plain
        // cluster keyring laid down by the join.
        let keyring = if node == self.primary {
            ADMIN_KEYRING
        } else {
            MEMBER_KEYRING
        };
        self.executor
            .execute(
                node,
                &[
                    "sudo",
                    "ceph-fuse",
                    "-n",
                    "client.admin",
                    "--keyring",
                    keyring,
                    "--conf",
                    CEPH_CONF,
                    &self.mount_point,
                ],
                ACTION_TIMEOUT,
            )
            .await?;
        info!(node, mount_point = %self.mount_point, "filesystem mounted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::ScriptedRemote;
    use std::time::Duration;

    const PRIMARY: &str = "ceph-node-1";
    const MDS_STAT: &[&str] = &["sudo", "ceph", "mds", "stat"];

    fn reconciler(remote: Arc<ScriptedRemote>, poll: PollConfig) -> MountReconciler {
        MountReconciler::new(
            remote,
            Arc::new(FilesystemConfig::default()),
            PRIMARY,
            "/mnt/cephfs",
            poll,
        )
    }

    #[test]
    fn test_mds_readiness_active() {
        let output = "cephfs:1 {0=ceph-node-1=up:active} 1 up:standby\n";
        assert_eq!(mds_readiness(output, "cephfs"), Readiness::Ready);
    }

    #[test]
    fn test_mds_readiness_creating() {
        let output = "cephfs:1 {0=ceph-node-1=up:creating}\n";
        assert_eq!(mds_readiness(output, "cephfs"), Readiness::Settling);
    }

    #[test]
    fn test_mds_readiness_unrecognized() {
        assert_eq!(mds_readiness("1 up:standby\n", "cephfs"), Readiness::Unknown);
        assert_eq!(mds_readiness("", "cephfs"), Readiness::Unknown);
    }

    #[test]
    fn test_mds_readiness_needs_rank_digit() {
        // A rank-less mention of the filesystem is not active yet
        assert_eq!(
            mds_readiness("cephfs:x up:active\n", "cephfs"),
            Readiness::Unknown
        );
    }

    #[tokio::test]
    async fn test_exists_reads_mount_table() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.stub_captured(
            "ceph-node-2",
            &["mount"],
            Some("ceph-fuse on /mnt/cephfs type fuse.ceph-fuse (rw,nosuid,nodev)\n"),
        );

        let mounts = reconciler(remote, PollConfig::default());
        assert!(mounts.exists("ceph-node-2").await);
        assert!(!mounts.exists("ceph-node-3").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_mounts_after_mds_settles() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.stub_captured(PRIMARY, MDS_STAT, Some("cephfs:1 {0=ceph-node-1=up:creating}"));
        remote.stub_captured(PRIMARY, MDS_STAT, Some("cephfs:1 {0=ceph-node-1=up:creating}"));
        remote.stub_captured(PRIMARY, MDS_STAT, Some("cephfs:1 {0=ceph-node-1=up:active}"));

        reconciler(Arc::clone(&remote), PollConfig::default())
            .apply(PRIMARY)
            .await
            .unwrap();

        assert_eq!(remote.queried_matching("ceph mds stat"), 3);
        let executed = remote.executed();
        assert_eq!(executed.len(), 2);
        assert_eq!(executed[0], "ceph-node-1: sudo mkdir -p /mnt/cephfs");
        assert!(executed[1].contains("sudo ceph-fuse"));
        assert!(executed[1].contains(ADMIN_KEYRING));
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_uses_member_keyring_off_primary() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.stub_captured(PRIMARY, MDS_STAT, Some("cephfs:1 {0=ceph-node-1=up:active}"));

        reconciler(Arc::clone(&remote), PollConfig::default())
            .apply("ceph-node-2")
            .await
            .unwrap();

        let executed = remote.executed();
        assert!(executed[1].starts_with("ceph-node-2: "));
        assert!(executed[1].contains(MEMBER_KEYRING));
        assert!(!executed[1].contains(ADMIN_KEYRING));
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_gives_up_when_mds_never_activates() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.stub_captured(PRIMARY, MDS_STAT, Some("cephfs:1 {0=ceph-node-1=up:creating}"));

        let poll = PollConfig {
            budget: Duration::from_secs(30),
            interval: Duration::from_secs(5),
            settle_interval: Duration::from_secs(10),
        };
        let err = reconciler(Arc::clone(&remote), poll)
            .apply(PRIMARY)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TimeoutExceeded { .. }));
        // Settling probes at 0s, 10s, 20s; the deadline stops the fourth.
        assert_eq!(remote.queried_matching("ceph mds stat"), 3);
        assert_eq!(remote.executed_matching("ceph-fuse"), 0);
    }
}
