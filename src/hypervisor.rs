//! Host hypervisor detection
//!
//! VM launches need working hardware virtualization underneath the host
//! tooling, and a missing hypervisor surfaces as confusing launch failures
//! much later. Detection runs before any deploy: KVM via the loaded module
//! list, with a responding libvirt as the fallback.

use crate::domain::ports::PROBE_TIMEOUT;
use crate::error::{Error, Result};
use tokio::process::Command;
use tracing::debug;

/// Outcome of the hypervisor probe
#[derive(Debug, Clone)]
pub struct HypervisorReport {
    pub available: bool,
    /// Human-readable name of what was found, or why nothing was
    pub detail: String,
}

async fn probe(program: &str, args: &[&str]) -> Option<String> {
    let output = tokio::time::timeout(
        PROBE_TIMEOUT,
        Command::new(program).args(args).kill_on_drop(true).output(),
    )
    .await
    .ok()?
    .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Detect an available hypervisor on this host
pub async fn detect() -> HypervisorReport {
    if !cfg!(target_os = "linux") {
        return HypervisorReport {
            available: false,
            detail: "hypervisor detection is only supported on Linux hosts".into(),
        };
    }

    if let Some(modules) = probe("lsmod", &[]).await {
        if modules.to_lowercase().contains("kvm") {
            return HypervisorReport {
                available: true,
                detail: "KVM".into(),
            };
        }
    }

    if probe("virsh", &["--version"]).await.is_some() {
        debug!("kvm module not loaded, libvirt responded");
        return HypervisorReport {
            available: true,
            detail: "libvirt/QEMU".into(),
        };
    }

    HypervisorReport {
        available: false,
        detail: "no kvm module loaded and libvirt not responding".into(),
    }
}

/// Probe the host and fail when no hypervisor is found
pub async fn require() -> Result<String> {
    let report = detect().await;
    if report.available {
        Ok(report.detail)
    } else {
        Err(Error::HypervisorUnavailable(report.detail))
    }
}
