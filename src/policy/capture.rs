//! Capture policy and filter state.
//!
//! All of this state is runtime-toggleable through atomics so an operator
//! surface can flip switches while hooks are firing. The engine itself only
//! ever reads it on the hot path.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::types::{NodeType, RelationType};

/// Global capture switches.
///
/// Defaults: capture enabled, record-all off, node and edge compression on.
#[derive(Debug)]
pub struct CapturePolicy {
    enabled: AtomicBool,
    record_all: AtomicBool,
    compress_node: AtomicBool,
    compress_edge: AtomicBool,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            record_all: AtomicBool::new(false),
            compress_node: AtomicBool::new(true),
            compress_edge: AtomicBool::new(true),
        }
    }
}

impl CapturePolicy {
    /// Policy with default switches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether capture is globally enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Toggle global capture.
    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
    }

    /// Whether every operation is recorded regardless of tracking flags.
    pub fn records_all(&self) -> bool {
        self.record_all.load(Ordering::Relaxed)
    }

    /// Toggle record-all.
    pub fn set_record_all(&self, on: bool) {
        self.record_all.store(on, Ordering::Relaxed);
    }

    /// Whether version bumps are deferred for nodes with no fan-out.
    pub fn compresses_node(&self) -> bool {
        self.compress_node.load(Ordering::Relaxed)
    }

    /// Toggle node compression.
    pub fn set_compress_node(&self, on: bool) {
        self.compress_node.store(on, Ordering::Relaxed);
    }

    /// Whether duplicate consecutive edges are collapsed.
    pub fn compresses_edge(&self) -> bool {
        self.compress_edge.load(Ordering::Relaxed)
    }

    /// Toggle edge compression.
    pub fn set_compress_edge(&self, on: bool) {
        self.compress_edge.store(on, Ordering::Relaxed);
    }
}

/// Type-bitmask blacklists applied to nodes and relations.
///
/// The first pair suppresses recording; the propagate pair only decides
/// whether the `tracked` attribute spreads across a relation, and is
/// consulted by external attribute-propagation logic.
#[derive(Debug, Default)]
pub struct FilterSet {
    node: AtomicU64,
    relation: AtomicU64,
    propagate_node: AtomicU64,
    propagate_relation: AtomicU64,
}

impl FilterSet {
    /// Empty filter set: nothing blacklisted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current node blacklist mask.
    pub fn node_filter(&self) -> u64 {
        self.node.load(Ordering::Relaxed)
    }

    /// Current relation blacklist mask.
    pub fn relation_filter(&self) -> u64 {
        self.relation.load(Ordering::Relaxed)
    }

    /// Current propagate-node mask.
    pub fn propagate_node_filter(&self) -> u64 {
        self.propagate_node.load(Ordering::Relaxed)
    }

    /// Current propagate-relation mask.
    pub fn propagate_relation_filter(&self) -> u64 {
        self.propagate_relation.load(Ordering::Relaxed)
    }

    /// Blacklist a node kind.
    pub fn add_node(&self, t: NodeType) {
        self.node.fetch_or(t.mask(), Ordering::Relaxed);
    }

    /// Remove a node kind from the blacklist.
    pub fn remove_node(&self, t: NodeType) {
        self.node.fetch_and(!t.mask(), Ordering::Relaxed);
    }

    /// Blacklist a relation class.
    pub fn add_relation(&self, t: RelationType) {
        self.relation.fetch_or(t.mask(), Ordering::Relaxed);
    }

    /// Remove a relation class from the blacklist.
    pub fn remove_relation(&self, t: RelationType) {
        self.relation.fetch_and(!t.mask(), Ordering::Relaxed);
    }

    /// Stop tracking propagation through a node kind.
    pub fn add_propagate_node(&self, t: NodeType) {
        self.propagate_node.fetch_or(t.mask(), Ordering::Relaxed);
    }

    /// Allow tracking propagation through a node kind again.
    pub fn remove_propagate_node(&self, t: NodeType) {
        self.propagate_node.fetch_and(!t.mask(), Ordering::Relaxed);
    }

    /// Stop tracking propagation across a relation class.
    pub fn add_propagate_relation(&self, t: RelationType) {
        self.propagate_relation.fetch_or(t.mask(), Ordering::Relaxed);
    }

    /// Allow tracking propagation across a relation class again.
    pub fn remove_propagate_relation(&self, t: RelationType) {
        self.propagate_relation.fetch_and(!t.mask(), Ordering::Relaxed);
    }
}

fn default_true() -> bool {
    true
}

/// Declarative engine configuration.
///
/// Deserializable so deployments can ship capture policy as data. Applied
/// once at engine construction; the resulting [`CapturePolicy`] and
/// [`FilterSet`] stay adjustable at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Global capture switch.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Record every operation regardless of tracking flags.
    #[serde(default)]
    pub record_all: bool,
    /// Defer version bumps for nodes with no fan-out.
    #[serde(default = "default_true")]
    pub compress_node: bool,
    /// Collapse duplicate consecutive edges.
    #[serde(default = "default_true")]
    pub compress_edge: bool,
    /// Host id stamped into every identifier minted by the engine.
    #[serde(default)]
    pub machine_id: u32,
    /// Boot instance id stamped into every identifier minted by the engine.
    #[serde(default)]
    pub boot_id: u32,
    /// Node kinds excluded from recording.
    #[serde(default)]
    pub node_filter: Vec<NodeType>,
    /// Relation classes excluded from recording.
    #[serde(default)]
    pub relation_filter: Vec<RelationType>,
    /// Node kinds tracking does not propagate through.
    #[serde(default)]
    pub propagate_node_filter: Vec<NodeType>,
    /// Relation classes tracking does not propagate across.
    #[serde(default)]
    pub propagate_relation_filter: Vec<RelationType>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            record_all: false,
            compress_node: true,
            compress_edge: true,
            machine_id: 0,
            boot_id: 0,
            node_filter: Vec::new(),
            relation_filter: Vec::new(),
            propagate_node_filter: Vec::new(),
            propagate_relation_filter: Vec::new(),
        }
    }
}

impl CaptureConfig {
    /// Build the runtime policy switches from this config.
    pub fn policy(&self) -> CapturePolicy {
        let policy = CapturePolicy::new();
        policy.set_enabled(self.enabled);
        policy.set_record_all(self.record_all);
        policy.set_compress_node(self.compress_node);
        policy.set_compress_edge(self.compress_edge);
        policy
    }

    /// Build the runtime filter masks from this config.
    pub fn filters(&self) -> FilterSet {
        let filters = FilterSet::new();
        for t in &self.node_filter {
            filters.add_node(*t);
        }
        for t in &self.relation_filter {
            filters.add_relation(*t);
        }
        for t in &self.propagate_node_filter {
            filters.add_propagate_node(*t);
        }
        for t in &self.propagate_relation_filter {
            filters.add_propagate_relation(*t);
        }
        filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = CapturePolicy::new();
        assert!(policy.is_enabled());
        assert!(!policy.records_all());
        assert!(policy.compresses_node());
        assert!(policy.compresses_edge());
    }

    #[test]
    fn test_filter_add_remove() {
        let filters = FilterSet::new();
        filters.add_node(NodeType::InodeFifo);
        filters.add_node(NodeType::Message);
        assert_ne!(filters.node_filter() & NodeType::InodeFifo.mask(), 0);

        filters.remove_node(NodeType::InodeFifo);
        assert_eq!(filters.node_filter() & NodeType::InodeFifo.mask(), 0);
        assert_ne!(filters.node_filter() & NodeType::Message.mask(), 0);
    }

    #[test]
    fn test_propagate_filters_are_independent() {
        let filters = FilterSet::new();
        filters.add_propagate_relation(RelationType::Read);
        assert_eq!(filters.relation_filter(), 0);
        assert_ne!(
            filters.propagate_relation_filter() & RelationType::Read.mask(),
            0
        );
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "record_all": true,
            "machine_id": 7,
            "relation_filter": ["Read", "MmapExec"]
        }"#;
        let config: CaptureConfig = serde_json::from_str(json).unwrap();
        assert!(config.enabled, "enabled defaults on");
        assert!(config.record_all);
        assert_eq!(config.machine_id, 7);

        let filters = config.filters();
        assert_ne!(filters.relation_filter() & RelationType::Read.mask(), 0);
        assert_ne!(filters.relation_filter() & RelationType::MmapExec.mask(), 0);
        assert_eq!(filters.relation_filter() & RelationType::Write.mask(), 0);
    }
}
