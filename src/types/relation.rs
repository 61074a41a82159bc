//! Relation records and the serialized event stream.

use serde::{Deserialize, Serialize};

use super::identifier::{NodeIdentifier, RelationIdentifier, RelationType};
use super::node::NodeRecord;

/// Call-site context handed down by the hook that intercepted the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationContext {
    /// Hook flags (open mode, mmap protection, ...), opaque to the engine.
    pub flags: u64,
    /// Whether the intercepted operation was permitted.
    pub allowed: bool,
}

impl Default for RelationContext {
    fn default() -> Self {
        Self {
            flags: 0,
            allowed: true,
        }
    }
}

impl RelationContext {
    /// Context with the given hook flags, operation allowed.
    pub fn with_flags(flags: u64) -> Self {
        Self {
            flags,
            allowed: true,
        }
    }

    /// Context for an operation the kernel denied.
    pub fn disallowed() -> Self {
        Self {
            flags: 0,
            allowed: false,
        }
    }
}

/// An emitted relation: a directed, immutable edge between two node
/// snapshots.
///
/// Endpoint identifiers are frozen at emission time; re-versioning an
/// endpoint later does not change edges already emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRecord {
    /// Identifier of this relation.
    pub identifier: RelationIdentifier,
    /// Information-flow class.
    pub relation_type: RelationType,
    /// Whether the underlying operation was permitted.
    pub allowed: bool,
    /// Source endpoint snapshot.
    pub from: NodeIdentifier,
    /// Destination endpoint snapshot.
    pub to: NodeIdentifier,
    /// Hook flags from the call site.
    pub flags: u64,
}

/// One record handed to the output channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProvRecord {
    /// A node header.
    Node(NodeRecord),
    /// A relation.
    Relation(RelationRecord),
}

impl ProvRecord {
    /// The relation inside, if this is a relation record.
    pub fn as_relation(&self) -> Option<&RelationRecord> {
        match self {
            Self::Relation(rel) => Some(rel),
            Self::Node(_) => None,
        }
    }

    /// The node inside, if this is a node record.
    pub fn as_node(&self) -> Option<&NodeRecord> {
        match self {
            Self::Node(node) => Some(node),
            Self::Relation(_) => None,
        }
    }
}

/// A record stamped with its global sequence number.
///
/// The sequence number is assigned by the writer at the moment of
/// serialization and is the only total order guaranteed across records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvEvent {
    /// Globally unique, strictly increasing sequence number.
    pub seq: u64,
    /// The record itself.
    pub record: ProvRecord,
}
