//! Static address pinning via netplan
//!
//! Freshly launched instances hold a DHCP lease that is not stable across
//! host restarts, while cluster membership records concrete addresses. After
//! a launch, the instance's current interface, address, and gateway are
//! detected and written back as static netplan configuration inside the
//! guest.

use super::sh_quote;
use crate::domain::ports::{RemoteExecutor, ACTION_TIMEOUT, QUERY_TIMEOUT};
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

const NETPLAN_FILE: &str = "/etc/netplan/50-cloud-init.yaml";

// =============================================================================
// Netplan Document
// =============================================================================

#[derive(Debug, Serialize)]
struct NetplanDoc {
    network: NetworkSection,
}

#[derive(Debug, Serialize)]
struct NetworkSection {
    version: u8,
    ethernets: BTreeMap<String, EthernetConfig>,
}

#[derive(Debug, Serialize)]
struct EthernetConfig {
    dhcp4: bool,
    addresses: Vec<String>,
    routes: Vec<Route>,
    nameservers: Nameservers,
}

#[derive(Debug, Serialize)]
struct Route {
    to: String,
    via: String,
}

#[derive(Debug, Serialize)]
struct Nameservers {
    addresses: Vec<String>,
}

/// Render the static-address netplan document for one interface
pub fn render_netplan(iface: &str, address_cidr: &str, gateway: &str) -> Result<String> {
    let mut ethernets = BTreeMap::new();
    ethernets.insert(
        iface.to_string(),
        EthernetConfig {
            dhcp4: false,
            addresses: vec![address_cidr.to_string()],
            routes: vec![Route {
                to: "0.0.0.0/0".to_string(),
                via: gateway.to_string(),
            }],
            nameservers: Nameservers {
                addresses: vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()],
            },
        },
    );
    let doc = NetplanDoc {
        network: NetworkSection {
            version: 2,
            ethernets,
        },
    };
    Ok(serde_yaml::to_string(&doc)?)
}

// =============================================================================
// Pinning
// =============================================================================

/// Detect the instance's current addressing and pin it as static config
///
/// Fails when detection, the configuration write, or an explicit apply
/// failure marker is seen; a launch that cannot pin its address is treated
/// as a failed launch by the caller.
pub async fn pin_current_address(exec: &dyn RemoteExecutor, node: &str) -> Result<()> {
    let iface = detect(
        exec,
        node,
        "ip route get 1.1.1.1 | awk '{print $5}' | head -n1",
        "default interface",
    )
    .await?;
    let address = detect(
        exec,
        node,
        &format!(
            "ip -o -4 addr show dev {} | awk '{{print $4}}' | head -n1",
            sh_quote(&iface)
        ),
        "instance address",
    )
    .await?;
    let gateway = detect(
        exec,
        node,
        "ip route | awk '/^default/ {print $3; exit}'",
        "default gateway",
    )
    .await?;
    debug!(node, %iface, %address, %gateway, "pinning current address");

    let doc = render_netplan(&iface, &address, &gateway)?;

    // Keep a restorable copy of whatever cloud-init wrote there.
    let backup = format!("sudo cp -f {f} {f}.bak 2>/dev/null || true", f = NETPLAN_FILE);
    let _ = exec
        .execute_captured(node, &["bash", "-lc", &backup], QUERY_TIMEOUT)
        .await;

    let write = format!(
        "printf '%s' {} | sudo tee {} >/dev/null",
        sh_quote(&doc),
        NETPLAN_FILE
    );
    if exec
        .execute_captured(node, &["bash", "-lc", &write], ACTION_TIMEOUT)
        .await
        .is_none()
    {
        return Err(Error::Transport {
            node: node.to_string(),
            detail: "writing netplan configuration failed".into(),
        });
    }

    // `netplan apply` reconfigures the very interface the exec transport
    // rides on, so a dropped reply is tolerated here; only the explicit
    // marker emitted by the guest counts as failure.
    let apply = exec
        .execute_captured(
            node,
            &[
                "bash",
                "-lc",
                "sudo netplan apply >/dev/null 2>&1 || echo FAIL",
            ],
            ACTION_TIMEOUT,
        )
        .await;
    if matches!(apply, Some(ref out) if out.contains("FAIL")) {
        return Err(Error::Transport {
            node: node.to_string(),
            detail: "netplan apply failed".into(),
        });
    }

    info!(node, %address, "static address pinned");
    Ok(())
}

/// Run a detection query and require a non-empty single value back
async fn detect(
    exec: &dyn RemoteExecutor,
    node: &str,
    script: &str,
    what: &str,
) -> Result<String> {
    let raw = exec
        .execute_captured(node, &["bash", "-lc", script], QUERY_TIMEOUT)
        .await;
    match raw.map(|s| s.trim().to_string()) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::Transport {
            node: node.to_string(),
            detail: format!("could not detect {}", what),
        }),
    }
}
