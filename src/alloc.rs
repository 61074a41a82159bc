//! Transient node allocation.
//!
//! Name, annotation and address nodes exist for exactly one recording call.
//! [`TransientNode`] is a scoped acquisition: the node is returned to its
//! allocator when the guard drops, on every exit path.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::CaptureError;
use crate::types::{NodePayload, NodeType, ProvNode};

/// Allocator for transient nodes.
///
/// `allocate` mints a fresh identity for the node; failure maps to
/// [`CaptureError::OutOfMemory`] and is propagated without retry.
pub trait TransientAllocator: Send + Sync {
    /// Allocate a transient node of the given kind.
    fn allocate(&self, node_type: NodeType, payload: NodePayload)
        -> Result<ProvNode, CaptureError>;

    /// Return a node to the allocator.
    fn release(&self, node: ProvNode);
}

/// Heap-backed allocator; ids come from a per-allocator counter.
#[derive(Debug)]
pub struct HeapAllocator {
    next_id: AtomicU64,
    boot_id: u32,
    machine_id: u32,
}

impl HeapAllocator {
    /// Allocator stamping the given boot and machine ids.
    pub fn new(boot_id: u32, machine_id: u32) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            boot_id,
            machine_id,
        }
    }
}

impl TransientAllocator for HeapAllocator {
    fn allocate(
        &self,
        node_type: NodeType,
        payload: NodePayload,
    ) -> Result<ProvNode, CaptureError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(ProvNode::new(
            node_type,
            id,
            self.boot_id,
            self.machine_id,
            payload,
        ))
    }

    fn release(&self, node: ProvNode) {
        drop(node);
    }
}

/// Scoped transient node, released on drop.
pub struct TransientNode<'a> {
    node: Option<ProvNode>,
    alloc: &'a dyn TransientAllocator,
}

impl<'a> TransientNode<'a> {
    /// Acquire a transient node from the allocator.
    pub fn acquire(
        alloc: &'a dyn TransientAllocator,
        node_type: NodeType,
        payload: NodePayload,
    ) -> Result<Self, CaptureError> {
        let node = alloc.allocate(node_type, payload)?;
        Ok(Self {
            node: Some(node),
            alloc,
        })
    }
}

impl Deref for TransientNode<'_> {
    type Target = ProvNode;

    fn deref(&self) -> &ProvNode {
        self.node.as_ref().expect("released only on drop")
    }
}

impl Drop for TransientNode<'_> {
    fn drop(&mut self) {
        if let Some(node) = self.node.take() {
            self.alloc.release(node);
        }
    }
}
