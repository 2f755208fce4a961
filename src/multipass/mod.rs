//! Multipass Adapter
//!
//! Drives the `multipass` CLI on the virtualization host: the command
//! transport into instances (`multipass exec`), instance lifecycle
//! (launch/list/delete/purge), and post-launch static address pinning.

pub mod netplan;

use crate::domain::ports::{
    InstanceInfo, InstanceProvider, NodeSpec, RemoteExecutor, PROBE_TIMEOUT,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Multipass adapter configuration
#[derive(Debug, Clone)]
pub struct MultipassConfig {
    /// Budget for `multipass launch`, which may download an image first
    pub launch_timeout: Duration,
    /// Budget for host-side lifecycle commands (list, stop, delete, purge)
    pub lifecycle_timeout: Duration,
    /// Directory holding the per-role cloud-init files
    pub cloud_init_dir: PathBuf,
}

impl Default for MultipassConfig {
    fn default() -> Self {
        Self {
            launch_timeout: Duration::from_secs(600),
            lifecycle_timeout: Duration::from_secs(60),
            cloud_init_dir: PathBuf::from("cloud-init"),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Adapter for the `multipass` CLI
pub struct MultipassClient {
    config: MultipassConfig,
}

/// Envelope of `multipass list --format json`
#[derive(Debug, Deserialize)]
struct InstanceList {
    #[serde(default)]
    list: Vec<InstanceInfo>,
}

impl MultipassClient {
    pub fn new(config: MultipassConfig) -> Self {
        Self { config }
    }

    /// Run a host-side `multipass` command within a timeout
    ///
    /// The child is killed if the budget elapses, so a wedged multipass
    /// daemon cannot leave orphaned processes behind.
    async fn host_command(&self, args: &[&str], timeout: Duration) -> Result<Output> {
        debug!(?args, "running multipass");
        let mut cmd = Command::new("multipass");
        cmd.args(args).kill_on_drop(true);
        match tokio::time::timeout(timeout, cmd.output()).await {
            Err(_) => Err(Error::Transport {
                node: "host".into(),
                detail: format!(
                    "multipass {} timed out after {}s",
                    args.first().unwrap_or(&""),
                    timeout.as_secs()
                ),
            }),
            Ok(Err(e)) => Err(Error::Transport {
                node: "host".into(),
                detail: format!("failed to spawn multipass: {}", e),
            }),
            Ok(Ok(output)) => Ok(output),
        }
    }

    fn cloud_init_file(&self, spec: &NodeSpec) -> PathBuf {
        self.config
            .cloud_init_dir
            .join(format!("cloud-init-{}.yaml", spec.role))
    }
}

// =============================================================================
// Remote Executor Implementation
// =============================================================================

#[async_trait]
impl RemoteExecutor for MultipassClient {
    async fn execute(&self, node: &str, argv: &[&str], timeout: Duration) -> Result<()> {
        let mut cmd = Command::new("multipass");
        cmd.arg("exec").arg(node).arg("--").args(argv);
        cmd.kill_on_drop(true);
        debug!(node, ?argv, "executing remote command");

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Err(_) => {
                return Err(Error::Transport {
                    node: node.to_string(),
                    detail: format!("timed out after {}s", timeout.as_secs()),
                })
            }
            Ok(Err(e)) => {
                return Err(Error::Transport {
                    node: node.to_string(),
                    detail: format!("failed to spawn multipass: {}", e),
                })
            }
            Ok(Ok(output)) => output,
        };

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Transport {
                node: node.to_string(),
                detail: failure_detail(&output),
            })
        }
    }

    async fn execute_captured(
        &self,
        node: &str,
        argv: &[&str],
        timeout: Duration,
    ) -> Option<String> {
        let mut cmd = Command::new("multipass");
        cmd.arg("exec").arg(node).arg("--").args(argv);
        cmd.kill_on_drop(true);
        debug!(node, ?argv, "querying remote command output");

        match tokio::time::timeout(timeout, cmd.output()).await {
            Err(_) => {
                debug!(node, ?argv, "query timed out, treating as absent");
                None
            }
            Ok(Err(e)) => {
                debug!(node, error = %e, "query could not spawn, treating as absent");
                None
            }
            Ok(Ok(output)) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(Ok(output)) => {
                debug!(
                    node,
                    ?argv,
                    detail = %failure_detail(&output),
                    "query failed, treating as absent"
                );
                None
            }
        }
    }
}

// =============================================================================
// Instance Provider Implementation
// =============================================================================

#[async_trait]
impl InstanceProvider for MultipassClient {
    async fn is_available(&self) -> bool {
        match self.host_command(&["version"], PROBE_TIMEOUT).await {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }

    async fn launch(&self, spec: &NodeSpec) -> Result<()> {
        // A read failure here reads as "unknown, assume absent"; if the
        // instance does exist after all, the launch itself will say so.
        if matches!(self.instance_exists(&spec.name).await, Ok(true)) {
            warn!(name = %spec.name, "instance already exists, reusing it");
            return Ok(());
        }

        let cloud_init = self.cloud_init_file(spec).to_string_lossy().into_owned();
        let cpus = spec.cpus.to_string();
        info!(
            name = %spec.name,
            cpus = %cpus,
            memory = %spec.memory,
            disk = %spec.disk,
            "launching instance"
        );
        let output = self
            .host_command(
                &[
                    "launch",
                    "--name",
                    &spec.name,
                    "--cpus",
                    &cpus,
                    "--memory",
                    &spec.memory,
                    "--disk",
                    &spec.disk,
                    &spec.image,
                    "--cloud-init",
                    &cloud_init,
                ],
                self.config.launch_timeout,
            )
            .await
            .map_err(|e| Error::LaunchFailed {
                name: spec.name.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::LaunchFailed {
                name: spec.name.clone(),
                reason: failure_detail(&output),
            });
        }
        info!(name = %spec.name, "instance launched");

        // The DHCP lease can rotate across host restarts while the cluster
        // records concrete addresses, so pin the current one immediately.
        netplan::pin_current_address(self, &spec.name)
            .await
            .map_err(|e| Error::LaunchFailed {
                name: spec.name.clone(),
                reason: format!("static address pinning failed: {}", e),
            })?;

        Ok(())
    }

    async fn instances(&self) -> Result<Vec<InstanceInfo>> {
        let output = self
            .host_command(&["list", "--format", "json"], self.config.lifecycle_timeout)
            .await?;
        if !output.status.success() {
            return Err(Error::Transport {
                node: "host".into(),
                detail: format!("multipass list failed: {}", failure_detail(&output)),
            });
        }
        let parsed: InstanceList = serde_json::from_slice(&output.stdout)?;
        Ok(parsed.list)
    }

    async fn instance_ip(&self, name: &str) -> Option<String> {
        match self.instances().await {
            Ok(instances) => instances
                .into_iter()
                .find(|i| i.name == name)
                .and_then(|i| i.ipv4.into_iter().next()),
            Err(e) => {
                debug!(name, error = %e, "instance listing failed, no address known");
                None
            }
        }
    }

    async fn remove_instances(&self, names: &[String]) -> Result<()> {
        for name in names {
            // Stopping an already-stopped instance is routine, not fatal.
            match self.host_command(&["stop", name], self.config.lifecycle_timeout).await {
                Ok(output) if !output.status.success() => {
                    warn!(name = %name, detail = %failure_detail(&output), "stop failed, deleting anyway");
                }
                Err(e) => warn!(name = %name, error = %e, "stop failed, deleting anyway"),
                Ok(_) => {}
            }

            let output = self
                .host_command(&["delete", name], self.config.lifecycle_timeout)
                .await?;
            if !output.status.success() {
                return Err(Error::Transport {
                    node: "host".into(),
                    detail: format!("multipass delete {} failed: {}", name, failure_detail(&output)),
                });
            }
            info!(name = %name, "instance deleted");
        }

        let output = self
            .host_command(&["purge"], self.config.lifecycle_timeout)
            .await?;
        if !output.status.success() {
            return Err(Error::Transport {
                node: "host".into(),
                detail: format!("multipass purge failed: {}", failure_detail(&output)),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Condense a failed process output into a single log-friendly line
fn failure_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let first_line = stderr.lines().find(|l| !l.trim().is_empty());
    match first_line {
        Some(line) => format!("{} ({})", line.trim(), output.status),
        None => output.status.to_string(),
    }
}

/// Quote a string for safe embedding in a shell command line
///
/// Wraps in single quotes and escapes interior single quotes, so credentials
/// and generated configuration text survive the shell untouched.
pub fn sh_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}
