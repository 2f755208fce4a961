//! Cluster membership reconciliation
//!
//! Membership is sponsored: the primary issues a one-time join token for a
//! named node, and that node redeems it. Both halves run through the remote
//! executor; the membership table itself is only ever read on the primary,
//! which is the single source of truth for who has joined.

use crate::domain::ports::{ExecutorRef, Reconciler, ACTION_TIMEOUT, QUERY_TIMEOUT};
use crate::error::{Error, Result};
use crate::table::parse_table;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Reconciles one node's membership in the storage cluster
pub struct MembershipReconciler {
    executor: ExecutorRef,
    /// Node that sponsors joins and holds the authoritative member table
    primary: String,
    /// Name prefix shared by all cluster members
    member_prefix: String,
}

impl MembershipReconciler {
    pub fn new(executor: ExecutorRef, primary: &str, member_prefix: &str) -> Self {
        Self {
            executor,
            primary: primary.to_string(),
            member_prefix: member_prefix.to_string(),
        }
    }

    /// Names of nodes the primary currently lists as members
    ///
    /// Reads the member table off the primary. An unreadable table yields an
    /// empty set, which makes every expected node look unjoined and drives
    /// reconciliation toward re-joining rather than silently skipping.
    pub async fn joined_nodes(&self) -> BTreeSet<String> {
        let output = self
            .executor
            .execute_captured(
                &self.primary,
                &["sudo", "microceph", "cluster", "list"],
                QUERY_TIMEOUT,
            )
            .await
            .unwrap_or_default();

        let rows = parse_table(&output);
        rows.iter()
            .filter_map(|row| row.first())
            .filter(|name| name.starts_with(&self.member_prefix))
            .cloned()
            .collect()
    }

    /// Ask the primary for a join token covering `node`
    async fn fetch_join_token(&self, node: &str) -> Result<String> {
        let output = self
            .executor
            .execute_captured(
                &self.primary,
                &["sudo", "microceph", "cluster", "add", node],
                QUERY_TIMEOUT,
            )
            .await
            .ok_or_else(|| Error::TokenUnavailable {
                node: node.to_string(),
            })?;

        let token = output.trim();
        if token.is_empty() {
            return Err(Error::TokenUnavailable {
                node: node.to_string(),
            });
        }
        Ok(token.to_string())
    }
}

#[async_trait]
impl Reconciler for MembershipReconciler {
    fn resource(&self) -> &str {
        "cluster membership"
    }

    async fn exists(&self, node: &str) -> bool {
        self.joined_nodes().await.contains(node)
    }

    async fn apply(&self, node: &str) -> Result<()> {
        let token = self.fetch_join_token(node).await?;
        debug!(node, "join token issued");
        self.executor
            .execute(
                node,
                &["sudo", "microceph", "cluster", "join", &token],
                ACTION_TIMEOUT,
            )
            .await?;
        info!(node, "joined cluster");
        Ok(())
    }
}
