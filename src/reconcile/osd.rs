//! OSD attachment reconciliation
//!
//! Each cluster member contributes one loop-backed OSD. Presence is read
//! from the node's own disk table: a data row whose location column names
//! the node means its OSD is already attached.

use crate::domain::ports::{ExecutorRef, Reconciler, ACTION_TIMEOUT, QUERY_TIMEOUT};
use crate::error::Result;
use crate::table::{data_rows, parse_table};
use async_trait::async_trait;
use tracing::info;

/// Backing device spec for the attach command: a 4G loop file, one OSD
const LOOP_BACKING: &str = "loop,4G,1";

/// Reconciles a node's loop-backed OSD
pub struct OsdReconciler {
    executor: ExecutorRef,
}

impl OsdReconciler {
    pub fn new(executor: ExecutorRef) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Reconciler for OsdReconciler {
    fn resource(&self) -> &str {
        "osd"
    }

    async fn exists(&self, node: &str) -> bool {
        let output = self
            .executor
            .execute_captured(node, &["sudo", "microceph", "disk", "list"], QUERY_TIMEOUT)
            .await
            .unwrap_or_default();

        let rows = parse_table(&output);
        let attached = data_rows(&rows, "osd", 3).any(|row| row[1] == node);
        attached
    }

    async fn apply(&self, node: &str) -> Result<()> {
        self.executor
            .execute(
                node,
                &["sudo", "microceph", "disk", "add", LOOP_BACKING],
                ACTION_TIMEOUT,
            )
            .await?;
        info!(node, backing = LOOP_BACKING, "osd attached");
        Ok(())
    }
}
