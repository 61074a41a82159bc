//! # provenance-kernel
//!
//! Whole-system provenance graph capture.
//!
//! Every security-relevant kernel operation becomes a node/edge record
//! describing *what acted on what*. This crate is the recording engine:
//! it decides whether an observed operation is turned into a graph record,
//! versions nodes to keep the captured graph acyclic, compresses redundant
//! edges and versions, and hands finished records to an output channel
//! under concurrent access from many call sites.
//!
//! ## Architecture
//!
//! ```text
//! hook ──▶ CaptureEngine::{uses, uses_two, generates, derives, informs}
//!                │
//!          targeting (TargetPolicy) + filters (FilterEngine)
//!                │
//!          record_relation ──▶ update_version ──▶ version edge
//!                │
//!          RecordWriter (sequence numbers) ──▶ OutputChannel
//! ```
//!
//! ## Core guarantees
//!
//! - A node's version only ever advances, and every advance is recorded by
//!   an explicit version edge from the old snapshot to the new one.
//! - Duplicate consecutive edges into a destination collapse to one
//!   (edge compression); nodes with no fan-out defer re-versioning
//!   (node compression).
//! - At most one name edge attaches per node version, enforced under a
//!   per-node critical section.
//! - Every emitted record carries a globally unique, strictly increasing
//!   sequence number.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alloc;
pub mod capture;
pub mod channel;
pub mod error;
pub mod filter;
pub mod policy;
pub mod record;
pub mod types;

// Re-exports
pub use alloc::{HeapAllocator, TransientAllocator, TransientNode};
pub use capture::{CaptureEngine, MemoryState, NoMemoryState};
pub use channel::{InMemoryChannel, OutputChannel, RecordWriter};
pub use error::CaptureError;
pub use filter::FilterEngine;
pub use policy::{
    apply_target, secctx_id, CaptureConfig, CapturePolicy, FilterSet, NoTargets, TargetOps,
    TargetPolicy, TargetTable,
};
pub use record::UserBuffer;
pub use types::{
    FlagsSnapshot, NodeFlags, NodeIdentifier, NodePayload, NodeRecord, NodeType, ProvEvent,
    ProvNode, ProvRecord, RelationContext, RelationIdentifier, RelationRecord, RelationType,
    NAME_CAPACITY, STR_CAPACITY,
};

/// Schema version for all capture record types.
/// Increment on breaking changes to any record layout.
pub const CAPTURE_SCHEMA_VERSION: &str = "1.0.0";
