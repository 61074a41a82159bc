//! The relation recording protocol: versioning, compression, naming,
//! annotation and termination.
//!
//! Versioning keeps the captured graph acyclic: a relation into a node that
//! already fanned out targets a freshly versioned copy instead, with an
//! explicit version edge recording identity continuity. Node compression
//! defers the bump while a node has no outgoing edge (it cannot close a
//! cycle yet); edge compression collapses a relation identical to the
//! immediately preceding one into the same destination.

use std::sync::atomic::Ordering;

use crate::alloc::TransientNode;
use crate::capture::CaptureEngine;
use crate::channel::OutputChannel;
use crate::error::CaptureError;
use crate::filter::FilterEngine;
use crate::types::node::{FileNameInfo, StrInfo};
use crate::types::{
    AddressInfo, NodeIdentifier, NodePayload, NodeRecord, NodeType, PreviousEdge, ProvNode,
    ProvRecord, RelationContext, RelationIdentifier, RelationRecord, RelationType, STR_CAPACITY,
};

/// Source of caller-supplied annotation bytes.
///
/// Models a user-space buffer: reading can fault, in which case the
/// annotation is not recorded and [`CaptureError::CopyFault`] propagates.
pub trait UserBuffer {
    /// Fill `dst` from the buffer. Must either fill it completely or fail.
    fn copy_to(&self, dst: &mut [u8]) -> Result<(), CaptureError>;
}

impl UserBuffer for [u8] {
    fn copy_to(&self, dst: &mut [u8]) -> Result<(), CaptureError> {
        if dst.len() > self.len() {
            return Err(CaptureError::CopyFault);
        }
        dst.copy_from_slice(&self[..dst.len()]);
        Ok(())
    }
}

/// Endpoint of a relation being serialized: either a live node or a frozen
/// snapshot (the pre-bump side of a version edge).
pub(crate) enum Endpoint<'a> {
    /// A live node; its header is emitted and `recorded` set if needed.
    Live(&'a ProvNode),
    /// A frozen snapshot; emitted as-is if its version was never recorded.
    Snapshot(&'a NodeRecord),
}

impl Endpoint<'_> {
    fn identifier(&self) -> NodeIdentifier {
        match self {
            Endpoint::Live(node) => node.identifier(),
            Endpoint::Snapshot(record) => record.identifier,
        }
    }
}

impl<C: OutputChannel> CaptureEngine<C> {
    fn next_relation_identifier(&self, relation_type: RelationType) -> RelationIdentifier {
        RelationIdentifier {
            relation_type,
            id: self.relation_ids.fetch_add(1, Ordering::Relaxed) + 1,
            boot_id: self.boot_id,
            machine_id: self.machine_id,
        }
    }

    /// Emit a node header if the endpoint's current version was never
    /// serialized.
    fn emit_endpoint(&self, endpoint: &Endpoint<'_>) -> Result<(), CaptureError> {
        match endpoint {
            Endpoint::Live(node) => {
                if !node.flags().is_recorded() {
                    self.writer.write(ProvRecord::Node(node.to_record()))?;
                    node.flags().set_recorded();
                }
            }
            Endpoint::Snapshot(record) => {
                if !record.flags.recorded {
                    self.writer.write(ProvRecord::Node((*record).clone()))?;
                }
            }
        }
        Ok(())
    }

    /// Serialize one relation: unrecorded endpoint headers first, then the
    /// relation itself, every record sequence-stamped by the writer.
    pub(crate) fn write_relation(
        &self,
        relation_type: RelationType,
        from: Endpoint<'_>,
        to: Endpoint<'_>,
        ctx: RelationContext,
    ) -> Result<(), CaptureError> {
        self.emit_endpoint(&from)?;
        self.emit_endpoint(&to)?;
        let record = RelationRecord {
            identifier: self.next_relation_identifier(relation_type),
            relation_type,
            allowed: ctx.allowed,
            from: from.identifier(),
            to: to.identifier(),
            flags: ctx.flags,
        };
        self.writer.write(ProvRecord::Relation(record))?;
        Ok(())
    }

    /// Advance a node's version ahead of an incoming relation, emitting the
    /// version edge `old -> node`.
    ///
    /// Skipped when node compression is on and the node has not fanned out
    /// yet, and for version/naming relation classes (which must not recurse
    /// on their own bookkeeping). A fresh version starts unrecorded, with no
    /// name, no fan-out and no persistence hint; the flags are reset even if
    /// the version-edge write fails.
    pub(crate) fn update_version(
        &self,
        relation_type: RelationType,
        node: &ProvNode,
    ) -> Result<(), CaptureError> {
        if self.policy.compresses_node() && !node.flags().has_outgoing() {
            return Ok(());
        }
        if FilterEngine::filter_update_node(relation_type) {
            return Ok(());
        }

        let old = node.to_record();
        node.bump_version();
        node.flags().clear_recorded();
        node.flags().clear_name_recorded();

        let version_type = if node.node_type().is_activity() {
            RelationType::VersionTask
        } else {
            RelationType::Version
        };
        let result = self.write_relation(
            version_type,
            Endpoint::Snapshot(&old),
            Endpoint::Live(node),
            RelationContext::default(),
        );
        node.flags().clear_has_outgoing();
        node.flags().clear_saved();
        result
    }

    /// Record one relation between two live nodes.
    ///
    /// Applies edge compression, re-versions the destination, marks the
    /// source as fanned out, then serializes. Preconditions on the relation
    /// class are enforced by the capture verbs; any [`RelationType`] is a
    /// relation by construction.
    pub fn record_relation(
        &self,
        relation_type: RelationType,
        from: &ProvNode,
        to: &ProvNode,
        ctx: RelationContext,
    ) -> Result<(), CaptureError> {
        if self.policy.compresses_edge() {
            let mut previous = to.previous_edge().lock();
            let current = PreviousEdge {
                id: from.id(),
                relation_type,
            };
            if *previous == Some(current) {
                // Duplicate of the immediately preceding edge into `to`.
                return Ok(());
            }
            *previous = Some(current);
        }

        self.update_version(relation_type, to)?;
        from.flags().set_has_outgoing();
        self.write_relation(relation_type, Endpoint::Live(from), Endpoint::Live(to), ctx)
    }

    /// Record the end of a node's life.
    ///
    /// Termination must always be observable, so the version bump bypasses
    /// node compression. Nothing is emitted for nodes that never made it
    /// into the stream (unless record-all is on) or are filtered.
    pub fn record_terminate(
        &self,
        relation_type: RelationType,
        node: &ProvNode,
    ) -> Result<(), CaptureError> {
        debug_assert!(relation_type.is_close());
        if !node.flags().is_recorded() && !self.policy.records_all() {
            return Ok(());
        }
        if self.filter.filter_node(node) {
            return Ok(());
        }

        let old = node.to_record();
        node.bump_version();
        node.flags().clear_recorded();
        node.flags().clear_name_recorded();
        self.write_relation(
            relation_type,
            Endpoint::Snapshot(&old),
            Endpoint::Live(node),
            RelationContext::default(),
        )
    }

    /// Attach a name to a node, at most once per node version.
    ///
    /// The per-node critical section makes check/attach/set atomic against
    /// concurrent namers: exactly one of them records the naming edge, the
    /// rest observe `name_recorded` and back off.
    pub fn record_node_name(&self, node: &ProvNode, name: &str) -> Result<(), CaptureError> {
        if node.flags().is_name_recorded() || !node.flags().is_recorded() {
            return Ok(());
        }

        let payload = NodePayload::FileName(FileNameInfo::new(name));
        let name_node = TransientNode::acquire(self.alloc.as_ref(), NodeType::FileName, payload)?;

        let section = node.name_section();
        if node.flags().is_name_recorded() {
            // Lost the race to a concurrent namer.
            return Ok(());
        }
        let relation_type = if node.node_type().is_activity() {
            RelationType::NamedTask
        } else {
            RelationType::Named
        };
        let result = self.record_relation(relation_type, &name_node, node, RelationContext::default());
        node.flags().set_name_recorded();
        drop(section);
        result
    }

    /// Attach a socket address to a node, at most once per node version.
    ///
    /// Shares the naming slot and critical section with
    /// [`Self::record_node_name`]: a version carries either a name or an
    /// address, whichever was attached first.
    pub fn record_address(&self, node: &ProvNode, addr: &[u8]) -> Result<(), CaptureError> {
        if node.flags().is_name_recorded() || !node.flags().is_recorded() {
            return Ok(());
        }

        let payload = NodePayload::Address(AddressInfo {
            addr: addr.to_vec(),
        });
        let addr_node = TransientNode::acquire(self.alloc.as_ref(), NodeType::Address, payload)?;

        let section = node.name_section();
        if node.flags().is_name_recorded() {
            return Ok(());
        }
        let result = self.record_relation(
            RelationType::Named,
            &addr_node,
            node,
            RelationContext::default(),
        );
        node.flags().set_name_recorded();
        drop(section);
        result
    }

    /// Attach a caller-supplied annotation to a node.
    ///
    /// Copies at most [`STR_CAPACITY`] bytes out of `buf`, serializes the
    /// annotation directly (no versioning of the target), and returns the
    /// number of bytes recorded. Callers guarantee non-concurrent use of
    /// `node` for this call; no lock is taken.
    pub fn record_log<B: UserBuffer + ?Sized>(
        &self,
        node: &ProvNode,
        buf: &B,
        count: usize,
    ) -> Result<usize, CaptureError> {
        let len = count.min(STR_CAPACITY);
        let mut bytes = vec![0u8; len];
        buf.copy_to(&mut bytes)?;

        let payload = NodePayload::Str(StrInfo {
            value: String::from_utf8_lossy(&bytes).into_owned(),
            length: len,
        });
        let annotation = TransientNode::acquire(self.alloc.as_ref(), NodeType::Str, payload)?;
        self.write_relation(
            RelationType::Log,
            Endpoint::Live(&annotation),
            Endpoint::Live(node),
            RelationContext::default(),
        )?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::TransientAllocator;
    use crate::channel::InMemoryChannel;
    use crate::policy::CaptureConfig;
    use crate::types::node::{InodeInfo, TaskInfo};
    use std::sync::Arc;

    fn engine() -> CaptureEngine<InMemoryChannel> {
        CaptureEngine::new(CaptureConfig::default(), Arc::new(InMemoryChannel::new()))
    }

    fn file(id: u64) -> ProvNode {
        ProvNode::inode(NodeType::InodeFile, id, 1, 7, InodeInfo::default())
    }

    fn task(id: u64) -> ProvNode {
        ProvNode::task(id, 1, 7, TaskInfo::default())
    }

    #[test]
    fn test_node_compression_defers_version_bump() {
        // A destination that never fanned out keeps its version; once it
        // has, the next incoming relation re-versions it.
        let engine = engine();
        let a = file(1);
        let b = file(2);
        let c = file(3);

        engine
            .record_relation(RelationType::Pass, &a, &c, RelationContext::default())
            .unwrap();
        assert_eq!(c.version(), 0);
        assert!(a.flags().has_outgoing());
        assert!(engine.channel().relations_of(RelationType::Version).is_empty());

        // Fan `c` out, then record into it again: now it must re-version.
        engine
            .record_relation(RelationType::Pass, &c, &b, RelationContext::default())
            .unwrap();
        assert!(c.flags().has_outgoing());

        engine
            .record_relation(RelationType::Change, &a, &c, RelationContext::default())
            .unwrap();
        assert_eq!(c.version(), 1);

        let version_edges = engine.channel().relations_of(RelationType::Version);
        assert_eq!(version_edges.len(), 1);
        assert_eq!(version_edges[0].from.version, 0);
        assert_eq!(version_edges[0].to.version, 1);
        assert!(version_edges[0].from.same_entity(&version_edges[0].to));
        // The new version starts with a clean fan-out.
        assert!(!c.flags().has_outgoing());
    }

    #[test]
    fn test_version_advances_every_time_without_node_compression() {
        let engine = engine();
        engine.policy().set_compress_node(false);
        engine.policy().set_compress_edge(false);
        let a = file(1);
        let b = file(2);

        for expected in 1..=4u32 {
            engine
                .record_relation(RelationType::Pass, &a, &b, RelationContext::default())
                .unwrap();
            assert_eq!(b.version(), expected);
        }
        assert_eq!(engine.channel().relations_of(RelationType::Version).len(), 4);
    }

    #[test]
    fn test_task_version_edge_uses_task_tag() {
        let engine = engine();
        engine.policy().set_compress_node(false);
        let entity = file(1);
        let activity = task(2);

        engine
            .record_relation(
                RelationType::Read,
                &entity,
                &activity,
                RelationContext::default(),
            )
            .unwrap();
        assert_eq!(activity.version(), 1);
        assert_eq!(
            engine.channel().relations_of(RelationType::VersionTask).len(),
            1
        );
        assert!(engine.channel().relations_of(RelationType::Version).is_empty());
    }

    #[test]
    fn test_edge_compression_collapses_duplicates() {
        let engine = engine();
        let a = file(1);
        let b = file(2);

        engine
            .record_relation(RelationType::Pass, &a, &b, RelationContext::default())
            .unwrap();
        engine
            .record_relation(RelationType::Pass, &a, &b, RelationContext::default())
            .unwrap();
        assert_eq!(engine.channel().relations_of(RelationType::Pass).len(), 1);

        // A different class into the same destination is not a duplicate.
        engine
            .record_relation(RelationType::Change, &a, &b, RelationContext::default())
            .unwrap();
        // Nor is the original class after something else intervened.
        engine
            .record_relation(RelationType::Pass, &a, &b, RelationContext::default())
            .unwrap();
        assert_eq!(engine.channel().relations_of(RelationType::Pass).len(), 2);
        assert_eq!(engine.channel().relations_of(RelationType::Change).len(), 1);
    }

    #[test]
    fn test_duplicates_recorded_with_compression_off() {
        let engine = engine();
        engine.policy().set_compress_edge(false);
        let a = file(1);
        let b = file(2);

        engine
            .record_relation(RelationType::Pass, &a, &b, RelationContext::default())
            .unwrap();
        engine
            .record_relation(RelationType::Pass, &a, &b, RelationContext::default())
            .unwrap();
        assert_eq!(engine.channel().relations_of(RelationType::Pass).len(), 2);
    }

    #[test]
    fn test_endpoints_serialized_before_relation() {
        let engine = engine();
        let a = file(1);
        let b = file(2);

        engine
            .record_relation(RelationType::Pass, &a, &b, RelationContext::default())
            .unwrap();

        let events = engine.channel().events();
        assert_eq!(events.len(), 3);
        assert!(events[0].record.as_node().is_some());
        assert!(events[1].record.as_node().is_some());
        assert!(events[2].record.as_relation().is_some());
        assert!(a.flags().is_recorded());
        assert!(b.flags().is_recorded());

        // Already-recorded endpoints are not re-emitted.
        engine
            .record_relation(RelationType::Change, &a, &b, RelationContext::default())
            .unwrap();
        let events = engine.channel().events();
        assert_eq!(events.len(), 4);
        assert!(events[3].record.as_relation().is_some());
    }

    #[test]
    fn test_terminate_bypasses_node_compression() {
        let engine = engine();
        engine.policy().set_record_all(true);
        let node = task(1);

        // Never fanned out, yet termination still bumps the version.
        engine
            .record_terminate(RelationType::Terminate, &node)
            .unwrap();
        assert_eq!(node.version(), 1);

        let edges = engine.channel().relations_of(RelationType::Terminate);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from.version, 0);
        assert_eq!(edges[0].to.version, 1);
    }

    #[test]
    fn test_terminate_skips_unrecorded_node() {
        let engine = engine();
        let node = task(1);
        engine
            .record_terminate(RelationType::Terminate, &node)
            .unwrap();
        assert!(engine.channel().is_empty());
        assert_eq!(node.version(), 0);
    }

    #[test]
    fn test_terminate_skips_filtered_node() {
        let engine = engine();
        engine.policy().set_record_all(true);
        let node = task(1);
        node.flags().set_opaque();
        engine
            .record_terminate(RelationType::Terminate, &node)
            .unwrap();
        assert!(engine.channel().is_empty());
    }

    #[test]
    fn test_name_attached_once_per_version() {
        let engine = engine();
        let node = file(1);
        node.flags().set_recorded();

        engine.record_node_name(&node, "/etc/passwd").unwrap();
        assert!(node.flags().is_name_recorded());
        assert_eq!(engine.channel().relations_of(RelationType::Named).len(), 1);

        // Second attempt on the same version is a no-op.
        engine.record_node_name(&node, "/etc/passwd").unwrap();
        assert_eq!(engine.channel().relations_of(RelationType::Named).len(), 1);
        assert!(node.flags().is_name_recorded());
    }

    #[test]
    fn test_name_skipped_for_unrecorded_node() {
        let engine = engine();
        let node = file(1);
        engine.record_node_name(&node, "/etc/passwd").unwrap();
        assert!(engine.channel().is_empty());
        assert!(!node.flags().is_name_recorded());
    }

    #[test]
    fn test_task_name_uses_task_tag() {
        let engine = engine();
        let node = task(1);
        node.flags().set_recorded();
        engine.record_node_name(&node, "sshd").unwrap();
        assert_eq!(
            engine.channel().relations_of(RelationType::NamedTask).len(),
            1
        );
    }

    #[test]
    fn test_new_version_can_be_renamed() {
        let engine = engine();
        let node = file(1);
        node.flags().set_recorded();
        engine.record_node_name(&node, "/tmp/a").unwrap();

        // Force a re-version; the naming slot frees up.
        node.flags().set_has_outgoing();
        engine
            .record_relation(
                RelationType::Pass,
                &file(2),
                &node,
                RelationContext::default(),
            )
            .unwrap();
        assert!(!node.flags().is_name_recorded());

        engine.record_node_name(&node, "/tmp/b").unwrap();
        assert_eq!(engine.channel().relations_of(RelationType::Named).len(), 2);
    }

    #[test]
    fn test_address_shares_naming_slot() {
        let engine = engine();
        let sock = ProvNode::socket(1, 1, 7, Default::default());
        sock.flags().set_recorded();

        engine.record_address(&sock, &[2, 0, 0, 80]).unwrap();
        assert!(sock.flags().is_name_recorded());
        assert_eq!(engine.channel().relations_of(RelationType::Named).len(), 1);

        engine.record_address(&sock, &[2, 0, 0, 80]).unwrap();
        engine.record_node_name(&sock, "ignored").unwrap();
        assert_eq!(engine.channel().relations_of(RelationType::Named).len(), 1);
    }

    #[test]
    fn test_log_records_annotation() {
        let engine = engine();
        let node = task(1);
        node.flags().set_recorded();

        let message = b"container breakout attempt";
        let n = engine
            .record_log(&node, &message[..], message.len())
            .unwrap();
        assert_eq!(n, message.len());

        let logs = engine.channel().relations_of(RelationType::Log);
        assert_eq!(logs.len(), 1);
        assert!(logs[0].to.same_entity(&node.identifier()));

        // The annotation node itself was serialized.
        let annotation = engine
            .channel()
            .nodes()
            .into_iter()
            .find(|r| r.identifier.node_type == NodeType::Str)
            .unwrap();
        match annotation.payload {
            NodePayload::Str(ref info) => {
                assert_eq!(info.value, "container breakout attempt");
                assert_eq!(info.length, message.len());
            }
            ref other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_log_truncates_to_capacity() {
        let engine = engine();
        let node = task(1);
        let big = vec![b'x'; STR_CAPACITY + 500];
        let n = engine.record_log(&node, &big[..], big.len()).unwrap();
        assert_eq!(n, STR_CAPACITY);
    }

    #[test]
    fn test_log_copy_fault_propagates() {
        let engine = engine();
        let node = task(1);
        // Asking for more bytes than the buffer holds faults the copy.
        let short = b"abc";
        let err = engine.record_log(&node, &short[..], 10).unwrap_err();
        assert!(matches!(err, CaptureError::CopyFault));
        assert!(engine.channel().is_empty());
    }

    #[test]
    fn test_allocation_failure_propagates() {
        struct FailingAllocator;
        impl TransientAllocator for FailingAllocator {
            fn allocate(
                &self,
                _node_type: NodeType,
                _payload: NodePayload,
            ) -> Result<ProvNode, CaptureError> {
                Err(CaptureError::OutOfMemory)
            }
            fn release(&self, _node: ProvNode) {}
        }

        let engine = engine().with_allocator(Box::new(FailingAllocator));
        let node = file(1);
        node.flags().set_recorded();

        let err = engine.record_node_name(&node, "/tmp/x").unwrap_err();
        assert!(matches!(err, CaptureError::OutOfMemory));
        // The failure happened before the critical section; the slot is
        // still free.
        assert!(!node.flags().is_name_recorded());

        let err = engine.record_log(&node, &b"abc"[..], 3).unwrap_err();
        assert!(matches!(err, CaptureError::OutOfMemory));
    }

    #[test]
    fn test_channel_failure_leaves_partial_effects() {
        // Two node headers fit, the relation itself does not.
        let channel = Arc::new(InMemoryChannel::failing_after(2));
        let engine = CaptureEngine::new(CaptureConfig::default(), channel);
        let a = file(1);
        let b = file(2);

        let err = engine
            .record_relation(RelationType::Pass, &a, &b, RelationContext::default())
            .unwrap_err();
        assert!(matches!(err, CaptureError::Channel(_)));
        // Headers stay emitted; nothing is rolled back.
        assert_eq!(engine.channel().nodes().len(), 2);
        assert!(engine.channel().relations().is_empty());
        assert!(a.flags().is_recorded());
    }

    #[test]
    fn test_sequence_numbers_strictly_increase() {
        let engine = engine();
        engine.policy().set_record_all(true);
        let a = file(1);
        let b = file(2);
        let t = task(3);

        engine
            .record_relation(RelationType::Pass, &a, &b, RelationContext::default())
            .unwrap();
        engine
            .record_relation(RelationType::Read, &b, &t, RelationContext::default())
            .unwrap();
        engine.record_terminate(RelationType::Terminate, &t).unwrap();

        let events = engine.channel().events();
        for pair in events.windows(2) {
            assert!(pair[0].seq < pair[1].seq);
        }
    }
}
