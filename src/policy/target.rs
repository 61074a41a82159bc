//! Targeting: administrator rules that mark nodes for capture.
//!
//! Rules are keyed by namespace ids (for tasks) or security-context ids (for
//! inode-backed nodes), so an operator can capture an entire container or
//! label without touching individual call sites. A rule yields a small op
//! bitmask whose bits independently request the `tracked`, `propagate` and
//! `opaque` flags.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::BitOr;
use xxhash_rust::xxh64::xxh64;

use crate::types::{NamespaceIds, ProvNode};

/// Stable 64-bit id for a security-context label.
///
/// Hook-side code stores the id in node payloads once at node creation so
/// targeting lookups never touch the label string on the hot path.
pub fn secctx_id(label: &str) -> u64 {
    xxh64(label.as_bytes(), 0)
}

/// Flag operations requested by a targeting rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOps(u8);

impl TargetOps {
    /// No operation.
    pub const NONE: Self = Self(0);
    /// Set the `tracked` flag.
    pub const TRACKED: Self = Self(1);
    /// Set the `propagate` flag.
    pub const PROPAGATE: Self = Self(1 << 1);
    /// Set the `opaque` flag.
    pub const OPAQUE: Self = Self(1 << 2);

    /// True if no bits are set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for TargetOps {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Lookup tables consulted by targeting.
///
/// Implementations must be cheap: the lookup runs on every node argument of
/// every capture verb.
pub trait TargetPolicy: Send + Sync {
    /// Ops requested for a task with these namespace ids.
    fn namespace_ops(&self, ns: &NamespaceIds) -> TargetOps;

    /// Ops requested for a node with this security-context id.
    fn secctx_ops(&self, secctx: u64) -> TargetOps;
}

/// Targeting policy that never matches anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTargets;

impl TargetPolicy for NoTargets {
    fn namespace_ops(&self, _ns: &NamespaceIds) -> TargetOps {
        TargetOps::NONE
    }

    fn secctx_ops(&self, _secctx: u64) -> TargetOps {
        TargetOps::NONE
    }
}

/// Map-backed targeting tables with runtime add/remove.
///
/// A namespace rule matches when any of the six namespace ids of a task
/// equals the rule's id; matching rules are unioned.
#[derive(Debug, Default)]
pub struct TargetTable {
    namespaces: RwLock<HashMap<u32, TargetOps>>,
    secctx: RwLock<HashMap<u64, TargetOps>>,
}

impl TargetTable {
    /// Empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a rule for a namespace id.
    pub fn set_namespace(&self, ns_id: u32, ops: TargetOps) {
        self.namespaces.write().insert(ns_id, ops);
    }

    /// Drop the rule for a namespace id.
    pub fn clear_namespace(&self, ns_id: u32) {
        self.namespaces.write().remove(&ns_id);
    }

    /// Add or replace a rule for a security-context label.
    pub fn set_secctx(&self, label: &str, ops: TargetOps) {
        self.secctx.write().insert(secctx_id(label), ops);
    }

    /// Drop the rule for a security-context label.
    pub fn clear_secctx(&self, label: &str) {
        self.secctx.write().remove(&secctx_id(label));
    }
}

impl TargetPolicy for TargetTable {
    fn namespace_ops(&self, ns: &NamespaceIds) -> TargetOps {
        let table = self.namespaces.read();
        if table.is_empty() {
            return TargetOps::NONE;
        }
        let mut ops = TargetOps::NONE;
        for id in ns.as_array() {
            if let Some(rule) = table.get(&id) {
                ops = ops | *rule;
            }
        }
        ops
    }

    fn secctx_ops(&self, secctx: u64) -> TargetOps {
        self.secctx
            .read()
            .get(&secctx)
            .copied()
            .unwrap_or(TargetOps::NONE)
    }
}

/// Apply targeting rules to a node, mutating its capture flags in place.
///
/// This is the only side effect of the filtering layer.
pub fn apply_target(policy: &dyn TargetPolicy, node: &ProvNode) {
    if let Some(ns) = node.payload().namespaces() {
        let ops = policy.namespace_ops(ns);
        if !ops.is_empty() {
            tracing::debug!(node = %node.identifier(), ?ops, "namespace target hit");
            set_ops(node, ops);
        }
    }
    if let Some(secctx) = node.secctx() {
        let ops = policy.secctx_ops(secctx);
        if !ops.is_empty() {
            tracing::debug!(node = %node.identifier(), ?ops, "secctx target hit");
            set_ops(node, ops);
        }
    }
}

fn set_ops(node: &ProvNode, ops: TargetOps) {
    if ops.contains(TargetOps::TRACKED) {
        node.flags().set_tracked();
    }
    if ops.contains(TargetOps::PROPAGATE) {
        node.flags().set_propagate();
    }
    if ops.contains(TargetOps::OPAQUE) {
        node.flags().set_opaque();
    }
}
