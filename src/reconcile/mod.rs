//! Resource reconcilers
//!
//! One reconciler per cluster resource, each answering two questions: is the
//! resource already there, and how is it created. Orchestration checks
//! `exists` before `apply` on every run, which is what makes a second deploy
//! against a converged cluster a pure read.
//!
//! Presence checks read through `execute_captured`, so an unreachable node
//! or garbled output reads as "absent" and the creating action runs again.
//! Creating actions go through `execute` and surface real errors.

pub mod filesystem;
pub mod membership;
pub mod mount;
pub mod osd;
pub mod share;

pub use filesystem::{FilesystemConfig, FilesystemReconciler, PoolPairReconciler};
pub use membership::MembershipReconciler;
pub use mount::MountReconciler;
pub use osd::OsdReconciler;
pub use share::{ClientAccessReconciler, ShareConfig, ShareReconciler};
