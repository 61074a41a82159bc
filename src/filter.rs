//! Filter predicates consulted on every intercepted operation.
//!
//! Everything here is a pure function of node state and the shared filter
//! configuration: a couple of atomic loads and a mask test, no allocation,
//! no locking. `true` always means "drop".

use std::sync::Arc;

use crate::policy::{CapturePolicy, FilterSet};
use crate::types::{ProvNode, RelationType};

/// Relation classes whose destination must never be re-versioned: the
/// versioning algorithm's own bookkeeping edges.
const UPDATE_FILTER: u64 = RelationType::Version.mask()
    | RelationType::VersionTask.mask()
    | RelationType::Named.mask()
    | RelationType::NamedTask.mask();

#[inline]
fn hit(filter: u64, mask: u64) -> bool {
    filter & mask != 0
}

/// Accept/reject decisions over shared policy and filter state.
#[derive(Debug, Clone)]
pub struct FilterEngine {
    policy: Arc<CapturePolicy>,
    filters: Arc<FilterSet>,
}

impl FilterEngine {
    /// Filter engine over the given shared state.
    pub fn new(policy: Arc<CapturePolicy>, filters: Arc<FilterSet>) -> Self {
        Self { policy, filters }
    }

    /// True if the node must not appear in the record stream: capture
    /// disabled, node opaque, or node kind blacklisted.
    pub fn filter_node(&self, node: &ProvNode) -> bool {
        if !self.policy.is_enabled() {
            return true;
        }
        if node.flags().is_opaque() {
            return true;
        }
        hit(self.filters.node_filter(), node.node_type().mask())
    }

    /// True if the relation class is blacklisted.
    pub fn filter_relation(&self, relation_type: RelationType) -> bool {
        hit(self.filters.relation_filter(), relation_type.mask())
    }

    /// True if tracking must not propagate through this node.
    ///
    /// Consulted by external attribute-propagation logic, not by the
    /// recording protocol.
    pub fn filter_propagate_node(&self, node: &ProvNode) -> bool {
        if !self.policy.is_enabled() {
            return true;
        }
        if node.flags().is_opaque() {
            return true;
        }
        hit(self.filters.propagate_node_filter(), node.node_type().mask())
    }

    /// True if tracking must not propagate across this relation class.
    pub fn filter_propagate_relation(&self, relation_type: RelationType) -> bool {
        hit(
            self.filters.propagate_relation_filter(),
            relation_type.mask(),
        )
    }

    /// True if recording this relation class must not version its
    /// destination.
    pub fn filter_update_node(relation_type: RelationType) -> bool {
        hit(UPDATE_FILTER, relation_type.mask())
    }

    /// A relation is recorded only if its class is not blacklisted and
    /// neither endpoint is individually filtered.
    pub fn should_record_relation(
        &self,
        relation_type: RelationType,
        from: &ProvNode,
        to: &ProvNode,
    ) -> bool {
        if self.filter_relation(relation_type) {
            return false;
        }
        if self.filter_node(from) || self.filter_node(to) {
            return false;
        }
        true
    }
}
