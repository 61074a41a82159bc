//! The capture engine and its typed entry points.
//!
//! An external hook classifies each intercepted kernel operation and calls
//! one capture verb with the participating nodes. The verb applies targeting
//! policy, checks filters, and drives the recording protocol in
//! [`crate::record`].
//!
//! ```text
//! hook ──▶ verb (uses/generates/...) ──▶ record_relation ──▶ update_version
//!                 │                                │
//!           apply_target + filters          RecordWriter ──▶ OutputChannel
//! ```
//!
//! ## Concurrency contract
//!
//! Entry points are synchronous and may be called from many threads at
//! once. Flags, version counters and sequence numbers are individually
//! atomic, and name attachment takes a per-node lock, so the engine is
//! memory-safe under any interleaving. Cross-field consistency for a single
//! node (e.g. a version bump observing a coherent flag set) is however only
//! guaranteed when concurrent mutation of that node's capture state is
//! serialized by the caller, normally by the locking discipline of the
//! kernel object the node shadows.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use crate::alloc::{HeapAllocator, TransientAllocator};
use crate::channel::{OutputChannel, RecordWriter};
use crate::error::CaptureError;
use crate::filter::FilterEngine;
use crate::policy::{apply_target, CaptureConfig, CapturePolicy, FilterSet, NoTargets, TargetPolicy};
use crate::types::{ProvNode, RelationContext, RelationType};

/// Hook invoked when an activity's address-space state changes.
///
/// `uses` and `generates` call it after/before their primary edge so the
/// mapped-file relations of the address space stay current. The default
/// implementation does nothing.
pub trait MemoryState: Send + Sync {
    /// Refresh the state of an address-space node.
    ///
    /// `read` is true when the activity is about to produce data (its
    /// address space is being read), false when it consumed data.
    fn update(&self, memory: &ProvNode, read: bool) -> Result<(), CaptureError>;
}

/// Memory-state hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMemoryState;

impl MemoryState for NoMemoryState {
    fn update(&self, _memory: &ProvNode, _read: bool) -> Result<(), CaptureError> {
        Ok(())
    }
}

/// Provenance capture engine.
///
/// Owns the policy switches, filter masks, targeting tables, transient
/// allocator and record writer shared by every call site. Construct once at
/// startup and share behind an `Arc`.
pub struct CaptureEngine<C: OutputChannel> {
    pub(crate) policy: Arc<CapturePolicy>,
    pub(crate) filters: Arc<FilterSet>,
    pub(crate) filter: FilterEngine,
    pub(crate) targets: Box<dyn TargetPolicy>,
    pub(crate) alloc: Box<dyn TransientAllocator>,
    pub(crate) memory_state: Box<dyn MemoryState>,
    pub(crate) writer: RecordWriter<C>,
    pub(crate) relation_ids: AtomicU64,
    pub(crate) boot_id: u32,
    pub(crate) machine_id: u32,
}

impl<C: OutputChannel> CaptureEngine<C> {
    /// Engine over the given channel, with default collaborators.
    pub fn new(config: CaptureConfig, channel: Arc<C>) -> Self {
        let policy = Arc::new(config.policy());
        let filters = Arc::new(config.filters());
        let filter = FilterEngine::new(policy.clone(), filters.clone());
        Self {
            policy,
            filters,
            filter,
            targets: Box::new(NoTargets),
            alloc: Box::new(HeapAllocator::new(config.boot_id, config.machine_id)),
            memory_state: Box::new(NoMemoryState),
            writer: RecordWriter::new(channel),
            relation_ids: AtomicU64::new(0),
            boot_id: config.boot_id,
            machine_id: config.machine_id,
        }
    }

    /// Replace the targeting tables.
    pub fn with_targets(mut self, targets: Box<dyn TargetPolicy>) -> Self {
        self.targets = targets;
        self
    }

    /// Replace the transient allocator.
    pub fn with_allocator(mut self, alloc: Box<dyn TransientAllocator>) -> Self {
        self.alloc = alloc;
        self
    }

    /// Replace the memory-state hook.
    pub fn with_memory_state(mut self, memory_state: Box<dyn MemoryState>) -> Self {
        self.memory_state = memory_state;
        self
    }

    /// Runtime policy switches.
    pub fn policy(&self) -> &CapturePolicy {
        &self.policy
    }

    /// Runtime filter masks.
    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    /// Filter predicates over this engine's policy and masks.
    pub fn filter(&self) -> &FilterEngine {
        &self.filter
    }

    /// The output channel records are handed to.
    pub fn channel(&self) -> &Arc<C> {
        self.writer.channel()
    }

    fn apply_targets(&self, nodes: &[&ProvNode]) {
        for node in nodes {
            apply_target(self.targets.as_ref(), node);
        }
    }

    fn none_tracked(&self, nodes: &[&ProvNode]) -> bool {
        !self.policy.records_all() && nodes.iter().all(|n| !n.flags().is_tracked())
    }

    /// Record an entity flowing into an activity, together with the
    /// activity's address-space update.
    ///
    /// Emits `entity -> activity`, then `activity -> memory`
    /// ([`RelationType::MemoryWrite`]), then triggers the memory-state hook.
    pub fn uses(
        &self,
        relation_type: RelationType,
        entity: &ProvNode,
        activity: &ProvNode,
        activity_memory: &ProvNode,
        ctx: RelationContext,
    ) -> Result<(), CaptureError> {
        debug_assert!(relation_type.is_used());
        self.apply_targets(&[entity, activity, activity_memory]);
        if self.none_tracked(&[entity, activity, activity_memory]) {
            return Ok(());
        }
        if !self
            .filter
            .should_record_relation(relation_type, entity, activity)
        {
            return Ok(());
        }
        self.record_relation(relation_type, entity, activity, ctx)?;
        self.record_relation(
            RelationType::MemoryWrite,
            activity,
            activity_memory,
            RelationContext::default(),
        )?;
        self.memory_state.update(activity_memory, false)
    }

    /// Record an entity flowing into an activity, without address-space
    /// bookkeeping.
    pub fn uses_two(
        &self,
        relation_type: RelationType,
        entity: &ProvNode,
        activity: &ProvNode,
        ctx: RelationContext,
    ) -> Result<(), CaptureError> {
        debug_assert!(relation_type.is_used());
        self.apply_targets(&[entity, activity]);
        if self.none_tracked(&[entity, activity]) {
            return Ok(());
        }
        if !self
            .filter
            .should_record_relation(relation_type, entity, activity)
        {
            return Ok(());
        }
        self.record_relation(relation_type, entity, activity, ctx)
    }

    /// Record an activity producing an entity.
    ///
    /// Triggers the memory-state hook (read side), emits
    /// `memory -> activity` ([`RelationType::MemoryRead`]), then the primary
    /// `activity -> entity` edge.
    pub fn generates(
        &self,
        relation_type: RelationType,
        activity_memory: &ProvNode,
        activity: &ProvNode,
        entity: &ProvNode,
        ctx: RelationContext,
    ) -> Result<(), CaptureError> {
        debug_assert!(relation_type.is_generated());
        self.apply_targets(&[activity_memory, activity, entity]);
        if self.none_tracked(&[activity_memory, activity, entity]) {
            return Ok(());
        }
        if !self
            .filter
            .should_record_relation(relation_type, activity, entity)
        {
            return Ok(());
        }
        self.memory_state.update(activity_memory, true)?;
        self.record_relation(
            RelationType::MemoryRead,
            activity_memory,
            activity,
            RelationContext::default(),
        )?;
        self.record_relation(relation_type, activity, entity, ctx)
    }

    /// Record an entity derived from another entity.
    pub fn derives(
        &self,
        relation_type: RelationType,
        from: &ProvNode,
        to: &ProvNode,
        ctx: RelationContext,
    ) -> Result<(), CaptureError> {
        debug_assert!(relation_type.is_derived());
        self.apply_targets(&[from, to]);
        if self.none_tracked(&[from, to]) {
            return Ok(());
        }
        if !self.filter.should_record_relation(relation_type, from, to) {
            return Ok(());
        }
        self.record_relation(relation_type, from, to, ctx)
    }

    /// Record an activity influencing another activity.
    pub fn informs(
        &self,
        relation_type: RelationType,
        from: &ProvNode,
        to: &ProvNode,
        ctx: RelationContext,
    ) -> Result<(), CaptureError> {
        debug_assert!(relation_type.is_informed());
        self.apply_targets(&[from, to]);
        if self.none_tracked(&[from, to]) {
            return Ok(());
        }
        if !self.filter.should_record_relation(relation_type, from, to) {
            return Ok(());
        }
        self.record_relation(relation_type, from, to, ctx)
    }
}
