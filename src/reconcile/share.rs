//! Network share reconciliation
//!
//! Two variants over the same share definition: `ShareReconciler` exports
//! the mounted filesystem from the primary, `ClientAccessReconciler` sets
//! up a consumer VM and mounts the export over CIFS. Both key presence on a
//! literal section marker in the Samba configuration, so a converged node
//! is recognized by a single read.
//!
//! Credentials and generated configuration text pass through `sh_quote`
//! before they reach a shell line. The section text is appended unindented,
//! which is what keeps the marker grep exact on later runs.

use crate::domain::ports::{ExecutorRef, Reconciler, ACTION_TIMEOUT, QUERY_TIMEOUT};
use crate::error::Result;
use crate::multipass::sh_quote;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SMB_CONF: &str = "/etc/samba/smb.conf";

/// Share identity and credentials
#[derive(Debug, Clone)]
pub struct ShareConfig {
    /// Samba share name, also the section marker in smb.conf
    pub share_name: String,
    /// Account the share is served and mounted as
    pub username: String,
    /// Password for the share account
    pub password: String,
    /// Directory exported by the share and used as the mount target
    pub mount_point: String,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            share_name: "CephFS".into(),
            username: "sambauser".into(),
            password: "samba123".into(),
            mount_point: "/mnt/cephfs".into(),
        }
    }
}

impl ShareConfig {
    /// The exact line that marks this share's section in smb.conf
    pub fn section_marker(&self) -> String {
        format!("[{}]", self.share_name)
    }

    /// Render the share's smb.conf section
    ///
    /// `guest_access` adds the public/guest directives used on consumer VMs.
    pub fn render_section(&self, guest_access: bool) -> String {
        let mut section = format!(
            "[{share}]\n\
             path = {path}\n\
             browseable = yes\n\
             read only = no\n\
             valid users = {user}\n\
             create mask = 0755\n\
             directory mask = 0755",
            share = self.share_name,
            path = self.mount_point,
            user = self.username,
        );
        if guest_access {
            section.push_str("\npublic = yes\nguest ok = yes");
        }
        section
    }

    /// CIFS source path for mounting this share from `host`
    pub fn mount_source(&self, host: &str) -> String {
        format!("//{}/{}", host, self.share_name)
    }

    /// Mount options carrying the share credentials
    pub fn mount_options(&self) -> String {
        format!("username={},password={},rw", self.username, self.password)
    }
}

/// Check for the share's section marker in smb.conf on a node
///
/// `grep -Fx` prints the marker line when present; absence and an
/// unreadable configuration both read as not configured.
async fn marker_present(executor: &ExecutorRef, node: &str, config: &ShareConfig) -> bool {
    let marker = config.section_marker();
    executor
        .execute_captured(node, &["grep", "-Fx", &marker, SMB_CONF], QUERY_TIMEOUT)
        .await
        .is_some()
}

/// Append a rendered section to smb.conf, separated by a blank line
async fn append_section(executor: &ExecutorRef, node: &str, section: &str) -> Result<()> {
    let append = format!(
        "printf '\\n%s\\n' {} | sudo tee -a {} >/dev/null",
        sh_quote(section),
        SMB_CONF
    );
    executor
        .execute(node, &["bash", "-c", &append], ACTION_TIMEOUT)
        .await
}

// =============================================================================
// Serving Side
// =============================================================================

/// Reconciles the Samba export of the mounted filesystem
pub struct ShareReconciler {
    executor: ExecutorRef,
    config: Arc<ShareConfig>,
}

impl ShareReconciler {
    pub fn new(executor: ExecutorRef, config: Arc<ShareConfig>) -> Self {
        Self { executor, config }
    }
}

#[async_trait]
impl Reconciler for ShareReconciler {
    fn resource(&self) -> &str {
        "samba share"
    }

    async fn exists(&self, node: &str) -> bool {
        marker_present(&self.executor, node, &self.config).await
    }

    async fn apply(&self, node: &str) -> Result<()> {
        let user = &self.config.username;

        let user_exists = self
            .executor
            .execute_captured(node, &["id", "-u", user], QUERY_TIMEOUT)
            .await
            .is_some();
        if user_exists {
            debug!(node, user = %user, "share account already present");
        } else {
            self.executor
                .execute(
                    node,
                    &["sudo", "adduser", "--disabled-password", "--gecos", "", user],
                    ACTION_TIMEOUT,
                )
                .await?;
        }

        // smbpasswd reads the password twice from stdin; -a only when the
        // account was just created.
        let set_password = format!(
            "PASS={}; printf '%s\\n%s\\n' \"$PASS\" \"$PASS\" | sudo smbpasswd -s {}{}",
            sh_quote(&self.config.password),
            if user_exists { "" } else { "-a " },
            sh_quote(user),
        );
        self.executor
            .execute(node, &["bash", "-c", &set_password], ACTION_TIMEOUT)
            .await?;

        let owner = format!("{}:{}", user, user);
        self.executor
            .execute(
                node,
                &["sudo", "chown", "-R", &owner, &self.config.mount_point],
                ACTION_TIMEOUT,
            )
            .await?;

        append_section(&self.executor, node, &self.config.render_section(false)).await?;

        self.executor
            .execute(node, &["sudo", "systemctl", "restart", "smbd"], ACTION_TIMEOUT)
            .await?;
        info!(node, share = %self.config.share_name, "samba share configured");
        Ok(())
    }
}

// =============================================================================
// Consumer Side
// =============================================================================

/// Reconciles share access on a consumer VM
///
/// The consumer gets its own share account and guest-enabled section, then
/// mounts the primary's export over CIFS. Account and ownership preparation
/// is best effort: a pre-existing account or a not-yet-mounted target only
/// logs a warning.
pub struct ClientAccessReconciler {
    executor: ExecutorRef,
    config: Arc<ShareConfig>,
    /// Address of the node serving the share
    server_address: String,
}

impl ClientAccessReconciler {
    pub fn new(executor: ExecutorRef, config: Arc<ShareConfig>, server_address: &str) -> Self {
        Self {
            executor,
            config,
            server_address: server_address.to_string(),
        }
    }

    async fn prepare_account(&self, node: &str) {
        let user = &self.config.username;
        let owner = format!("{}:{}", user, user);
        let prep: [&[&str]; 3] = [
            &["sudo", "useradd", "-m", user],
            &["sudo", "chown", "-R", &owner, &self.config.mount_point],
            &["sudo", "chmod", "-R", "755", &self.config.mount_point],
        ];
        for argv in prep {
            if let Err(err) = self.executor.execute(node, argv, ACTION_TIMEOUT).await {
                warn!(node, error = %err, "account preparation step failed, continuing");
            }
        }
    }

    async fn mounted(&self, node: &str, source: &str) -> bool {
        self.executor
            .execute_captured(
                node,
                &[
                    "findmnt",
                    "-rn",
                    "-t",
                    "cifs",
                    "-S",
                    source,
                    "-T",
                    &self.config.mount_point,
                ],
                QUERY_TIMEOUT,
            )
            .await
            .is_some()
    }
}

#[async_trait]
impl Reconciler for ClientAccessReconciler {
    fn resource(&self) -> &str {
        "share access"
    }

    async fn exists(&self, node: &str) -> bool {
        marker_present(&self.executor, node, &self.config).await
    }

    async fn apply(&self, node: &str) -> Result<()> {
        self.prepare_account(node).await;

        append_section(&self.executor, node, &self.config.render_section(true)).await?;

        self.executor
            .execute(node, &["sudo", "systemctl", "restart", "smbd"], ACTION_TIMEOUT)
            .await?;

        let source = self.config.mount_source(&self.server_address);
        if self.mounted(node, &source).await {
            info!(node, source = %source, "share already mounted");
            return Ok(());
        }

        self.executor
            .execute(
                node,
                &["sudo", "mkdir", "-p", &self.config.mount_point],
                ACTION_TIMEOUT,
            )
            .await?;
        let options = self.config.mount_options();
        self.executor
            .execute(
                node,
                &[
                    "sudo",
                    "mount",
                    "-t",
                    "cifs",
                    &source,
                    &self.config.mount_point,
                    "-o",
                    &options,
                ],
                ACTION_TIMEOUT,
            )
            .await?;
        info!(node, source = %source, "share mounted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRemote;

    const PRIMARY: &str = "ceph-node-1";
    const CLIENT: &str = "ceph-client";

    fn config() -> Arc<ShareConfig> {
        Arc::new(ShareConfig::default())
    }

    #[test]
    fn test_section_marker() {
        assert_eq!(config().section_marker(), "[CephFS]");
    }

    #[test]
    fn test_render_section_serving() {
        let section = config().render_section(false);
        assert!(section.starts_with("[CephFS]\n"));
        assert!(section.contains("path = /mnt/cephfs"));
        assert!(section.contains("valid users = sambauser"));
        assert!(section.ends_with("directory mask = 0755"));
        assert!(!section.contains("guest ok"));
    }

    #[test]
    fn test_render_section_guest_access() {
        let section = config().render_section(true);
        assert!(section.contains("public = yes"));
        assert!(section.ends_with("guest ok = yes"));
    }

    #[test]
    fn test_mount_source_and_options() {
        let config = config();
        assert_eq!(config.mount_source("10.64.104.2"), "//10.64.104.2/CephFS");
        assert_eq!(
            config.mount_options(),
            "username=sambauser,password=samba123,rw"
        );
    }

    #[tokio::test]
    async fn test_exists_reads_section_marker() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.stub_captured(
            PRIMARY,
            &["grep", "-Fx", "[CephFS]", "/etc/samba/smb.conf"],
            Some("[CephFS]\n"),
        );

        let share = ShareReconciler::new(Arc::<ScriptedRemote>::clone(&remote), config());
        assert!(share.exists(PRIMARY).await);
        assert!(!share.exists("ceph-node-2").await);
        assert!(remote.executed().is_empty());
    }

    #[tokio::test]
    async fn test_apply_creates_account_when_missing() {
        let remote = Arc::new(ScriptedRemote::new());

        ShareReconciler::new(Arc::<ScriptedRemote>::clone(&remote), config())
            .apply(PRIMARY)
            .await
            .unwrap();

        let executed = remote.executed();
        assert_eq!(executed.len(), 5);
        assert!(executed[0].contains("sudo adduser --disabled-password --gecos  sambauser"));
        assert!(executed[1].contains("sudo smbpasswd -s -a 'sambauser'"));
        assert!(executed[2].contains("sudo chown -R sambauser:sambauser /mnt/cephfs"));
        assert!(executed[3].contains("sudo tee -a /etc/samba/smb.conf"));
        assert!(executed[4].ends_with("sudo systemctl restart smbd"));
    }

    #[tokio::test]
    async fn test_apply_reuses_existing_account() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.stub_captured(PRIMARY, &["id", "-u", "sambauser"], Some("1001\n"));

        ShareReconciler::new(Arc::<ScriptedRemote>::clone(&remote), config())
            .apply(PRIMARY)
            .await
            .unwrap();

        assert_eq!(remote.executed_matching("adduser"), 0);
        assert_eq!(remote.executed_matching("smbpasswd -s 'sambauser'"), 1);
        assert_eq!(remote.executed_matching("smbpasswd -s -a"), 0);
    }

    #[tokio::test]
    async fn test_password_is_quoted_for_the_shell() {
        let remote = Arc::new(ScriptedRemote::new());
        let config = Arc::new(ShareConfig {
            password: "s3cr3t'$(reboot)".into(),
            ..ShareConfig::default()
        });

        ShareReconciler::new(Arc::<ScriptedRemote>::clone(&remote), config)
            .apply(PRIMARY)
            .await
            .unwrap();

        let executed = remote.executed();
        let set_password = executed
            .iter()
            .find(|key| key.contains("smbpasswd"))
            .unwrap();
        assert!(set_password.contains(r"PASS='s3cr3t'\''$(reboot)'"));
    }

    #[tokio::test]
    async fn test_client_apply_mounts_from_server_address() {
        let remote = Arc::new(ScriptedRemote::new());

        ClientAccessReconciler::new(Arc::<ScriptedRemote>::clone(&remote), config(), "10.64.104.2")
            .apply(CLIENT)
            .await
            .unwrap();

        assert_eq!(remote.executed_matching("useradd -m sambauser"), 1);
        assert_eq!(remote.executed_matching("tee -a /etc/samba/smb.conf"), 1);
        assert_eq!(remote.executed_matching("restart smbd"), 1);
        assert_eq!(
            remote.executed_matching(
                "sudo mount -t cifs //10.64.104.2/CephFS /mnt/cephfs -o \
                 username=sambauser,password=samba123,rw"
            ),
            1
        );
    }

    #[tokio::test]
    async fn test_client_skips_mount_when_already_mounted() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.stub_captured(
            CLIENT,
            &[
                "findmnt",
                "-rn",
                "-t",
                "cifs",
                "-S",
                "//10.64.104.2/CephFS",
                "-T",
                "/mnt/cephfs",
            ],
            Some("/mnt/cephfs //10.64.104.2/CephFS cifs rw\n"),
        );

        ClientAccessReconciler::new(Arc::<ScriptedRemote>::clone(&remote), config(), "10.64.104.2")
            .apply(CLIENT)
            .await
            .unwrap();

        assert_eq!(remote.executed_matching("mount -t cifs"), 0);
    }

    #[tokio::test]
    async fn test_client_account_prep_failures_are_not_fatal() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.fail_command(CLIENT, &["sudo", "useradd", "-m", "sambauser"]);

        ClientAccessReconciler::new(Arc::<ScriptedRemote>::clone(&remote), config(), "10.64.104.2")
            .apply(CLIENT)
            .await
            .unwrap();

        assert_eq!(remote.executed_matching("mount -t cifs"), 1);
    }
}
