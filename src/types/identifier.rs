//! Node and relation identifiers.
//!
//! Every graph record is keyed by an identifier. Node identifiers carry a
//! version number that only advances through the versioning algorithm in
//! [`crate::record`]; relation identifiers are unversioned because relations
//! are immutable once emitted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a provenance node.
///
/// The set is closed and each kind owns one bit in the 64-bit node filter
/// mask, so membership tests against a blacklist are a single AND.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// Kernel task (the only activity kind).
    Task,
    /// Address-space snapshot of a process (entity).
    Memory,
    /// Inode of unknown kind.
    InodeUnknown,
    /// Regular file.
    InodeFile,
    /// Directory.
    InodeDirectory,
    /// Symbolic link.
    InodeLink,
    /// Character device.
    InodeChar,
    /// Block device.
    InodeBlock,
    /// FIFO / pipe.
    InodeFifo,
    /// Socket inode.
    InodeSocket,
    /// Memory-mapped file view.
    InodeMmap,
    /// System V message.
    Message,
    /// Shared memory segment.
    Shm,
    /// Semaphore set.
    Sem,
    /// Superblock (mounted filesystem).
    Superblock,
    /// Transient string annotation.
    Str,
    /// Transient file name.
    FileName,
    /// Transient socket address.
    Address,
    /// Discretionary entity declared from user space.
    DiscEntity,
    /// Discretionary activity declared from user space.
    DiscActivity,
}

impl NodeType {
    /// Bit of this kind in a node filter mask.
    pub const fn mask(self) -> u64 {
        1u64 << (self as u32)
    }

    /// True for activity kinds (active agents).
    pub fn is_activity(self) -> bool {
        matches!(self, Self::Task | Self::DiscActivity)
    }

    /// True for kinds allocated for a single recording call.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Str | Self::FileName | Self::Address | Self::DiscEntity | Self::DiscActivity
        )
    }

    /// True for kinds that carry a security-context id.
    pub fn has_secctx(self) -> bool {
        matches!(
            self,
            Self::InodeUnknown
                | Self::InodeFile
                | Self::InodeDirectory
                | Self::InodeLink
                | Self::InodeChar
                | Self::InodeBlock
                | Self::InodeFifo
                | Self::InodeSocket
                | Self::InodeMmap
        )
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Task => "task",
            Self::Memory => "memory",
            Self::InodeUnknown => "inode_unknown",
            Self::InodeFile => "file",
            Self::InodeDirectory => "directory",
            Self::InodeLink => "link",
            Self::InodeChar => "char_device",
            Self::InodeBlock => "block_device",
            Self::InodeFifo => "fifo",
            Self::InodeSocket => "socket",
            Self::InodeMmap => "mmap",
            Self::Message => "message",
            Self::Shm => "shm",
            Self::Sem => "sem",
            Self::Superblock => "superblock",
            Self::Str => "string",
            Self::FileName => "file_name",
            Self::Address => "address",
            Self::DiscEntity => "disc_entity",
            Self::DiscActivity => "disc_activity",
        };
        write!(f, "{}", name)
    }
}

/// Information-flow class of a relation.
///
/// Like [`NodeType`], each variant owns one bit in the 64-bit relation
/// filter mask. The classification predicates partition the vocabulary into
/// the shapes accepted by the capture verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RelationType {
    /// Entity content read by an activity.
    Read,
    /// Entity content written by an activity.
    Write,
    /// Entity created by an activity.
    Create,
    /// Entity attributes changed.
    Change,
    /// Entity handed from one entity to another (fd passing).
    Pass,
    /// Entity opened.
    Open,
    /// Directory searched.
    Search,
    /// Executable image loaded.
    Exec,
    /// Task forked.
    Fork,
    /// Task cloned.
    CloneTask,
    /// Parent/child task link.
    Parent,
    /// Hard link created.
    Link,
    /// Socket bound.
    Bind,
    /// Socket connected.
    Connect,
    /// Socket listening.
    Listen,
    /// Connection accepted.
    Accept,
    /// Socket associated with an address family.
    Associate,
    /// Shared memory attached.
    Attach,
    /// Mapped pages read.
    MmapRead,
    /// Mapped pages written.
    MmapWrite,
    /// Mapped pages executed.
    MmapExec,
    /// Address space consumed by its task.
    MemoryRead,
    /// Address space updated by its task.
    MemoryWrite,
    /// Version edge between two snapshots of an entity.
    Version,
    /// Version edge between two snapshots of an activity.
    VersionTask,
    /// Name attached to an entity.
    Named,
    /// Name attached to an activity.
    NamedTask,
    /// User-supplied annotation.
    Log,
    /// Entity closed.
    Closed,
    /// Activity terminated.
    Terminate,
    /// Unclassified flow.
    Unknown,
}

impl RelationType {
    /// Bit of this class in a relation filter mask.
    pub const fn mask(self) -> u64 {
        1u64 << (self as u32)
    }

    /// Entity-to-activity flows accepted by `uses`/`uses_two`.
    pub fn is_used(self) -> bool {
        matches!(
            self,
            Self::Read
                | Self::Open
                | Self::Search
                | Self::Accept
                | Self::Exec
                | Self::Attach
                | Self::MmapRead
                | Self::MmapExec
        )
    }

    /// Activity-to-entity flows accepted by `generates`.
    pub fn is_generated(self) -> bool {
        matches!(
            self,
            Self::Write
                | Self::Create
                | Self::Bind
                | Self::Connect
                | Self::Listen
                | Self::Associate
                | Self::MmapWrite
        )
    }

    /// Entity-to-entity flows accepted by `derives`.
    pub fn is_derived(self) -> bool {
        matches!(self, Self::Change | Self::Pass | Self::Link | Self::Unknown)
    }

    /// Activity-to-activity flows accepted by `informs`.
    pub fn is_informed(self) -> bool {
        matches!(self, Self::Fork | Self::CloneTask | Self::Parent)
    }

    /// Terminal flows accepted by `record_terminate`.
    pub fn is_close(self) -> bool {
        matches!(self, Self::Closed | Self::Terminate)
    }

    /// Version or naming bookkeeping edges.
    ///
    /// These must never trigger re-versioning of their destination, or the
    /// versioning algorithm would recurse on its own output.
    pub fn is_version_or_name(self) -> bool {
        matches!(
            self,
            Self::Version | Self::VersionTask | Self::Named | Self::NamedTask
        )
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Create => "create",
            Self::Change => "change",
            Self::Pass => "pass",
            Self::Open => "open",
            Self::Search => "search",
            Self::Exec => "exec",
            Self::Fork => "fork",
            Self::CloneTask => "clone",
            Self::Parent => "parent",
            Self::Link => "link",
            Self::Bind => "bind",
            Self::Connect => "connect",
            Self::Listen => "listen",
            Self::Accept => "accept",
            Self::Associate => "associate",
            Self::Attach => "attach",
            Self::MmapRead => "mmap_read",
            Self::MmapWrite => "mmap_write",
            Self::MmapExec => "mmap_exec",
            Self::MemoryRead => "memory_read",
            Self::MemoryWrite => "memory_write",
            Self::Version => "version",
            Self::VersionTask => "version_task",
            Self::Named => "named",
            Self::NamedTask => "named_task",
            Self::Log => "log",
            Self::Closed => "closed",
            Self::Terminate => "terminate",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Identifier of one graph-visible node snapshot.
///
/// Two identifiers denote the same logical entity iff `node_type`, `id`,
/// `boot_id` and `machine_id` all match; `version` distinguishes successive
/// snapshots of that entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentifier {
    /// Kind of the node.
    pub node_type: NodeType,
    /// Kernel-object id, unique within a boot.
    pub id: u64,
    /// Boot instance the node was observed in.
    pub boot_id: u32,
    /// Host the node was observed on.
    pub machine_id: u32,
    /// Snapshot version, advanced only by the versioning algorithm.
    pub version: u32,
}

impl NodeIdentifier {
    /// True if both identifiers denote the same logical entity,
    /// regardless of version.
    pub fn same_entity(&self, other: &Self) -> bool {
        self.node_type == other.node_type
            && self.id == other.id
            && self.boot_id == other.boot_id
            && self.machine_id == other.machine_id
    }
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}.{}v{}",
            self.node_type, self.id, self.machine_id, self.boot_id, self.version
        )
    }
}

/// Identifier of an emitted relation. Relations are never versioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationIdentifier {
    /// Information-flow class of the relation.
    pub relation_type: RelationType,
    /// Relation id, unique within a boot.
    pub id: u64,
    /// Boot instance the relation was emitted in.
    pub boot_id: u32,
    /// Host the relation was emitted on.
    pub machine_id: u32,
}

impl fmt::Display for RelationIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}.{}",
            self.relation_type, self.id, self.machine_id, self.boot_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_masks_are_distinct() {
        let all = [
            NodeType::Task,
            NodeType::Memory,
            NodeType::InodeUnknown,
            NodeType::InodeFile,
            NodeType::InodeDirectory,
            NodeType::InodeLink,
            NodeType::InodeChar,
            NodeType::InodeBlock,
            NodeType::InodeFifo,
            NodeType::InodeSocket,
            NodeType::InodeMmap,
            NodeType::Message,
            NodeType::Shm,
            NodeType::Sem,
            NodeType::Superblock,
            NodeType::Str,
            NodeType::FileName,
            NodeType::Address,
            NodeType::DiscEntity,
            NodeType::DiscActivity,
        ];
        let mut seen = 0u64;
        for t in all {
            assert_eq!(seen & t.mask(), 0, "mask collision for {}", t);
            seen |= t.mask();
        }
    }

    #[test]
    fn test_relation_classes_are_disjoint() {
        let classes: [(&str, fn(RelationType) -> bool); 5] = [
            ("used", RelationType::is_used),
            ("generated", RelationType::is_generated),
            ("derived", RelationType::is_derived),
            ("informed", RelationType::is_informed),
            ("close", RelationType::is_close),
        ];
        let all = [
            RelationType::Read,
            RelationType::Write,
            RelationType::Create,
            RelationType::Change,
            RelationType::Pass,
            RelationType::Open,
            RelationType::Search,
            RelationType::Exec,
            RelationType::Fork,
            RelationType::CloneTask,
            RelationType::Parent,
            RelationType::Link,
            RelationType::Bind,
            RelationType::Connect,
            RelationType::Listen,
            RelationType::Accept,
            RelationType::Associate,
            RelationType::Attach,
            RelationType::MmapRead,
            RelationType::MmapWrite,
            RelationType::MmapExec,
            RelationType::Closed,
            RelationType::Terminate,
            RelationType::Unknown,
        ];
        for t in all {
            let hits: Vec<_> = classes
                .iter()
                .filter(|(_, pred)| pred(t))
                .map(|(name, _)| *name)
                .collect();
            assert!(hits.len() <= 1, "{} in multiple classes: {:?}", t, hits);
        }
    }

    #[test]
    fn test_version_and_name_edges_never_reclassified() {
        for t in [
            RelationType::Version,
            RelationType::VersionTask,
            RelationType::Named,
            RelationType::NamedTask,
        ] {
            assert!(t.is_version_or_name());
            assert!(!t.is_used());
            assert!(!t.is_generated());
        }
        assert!(!RelationType::Read.is_version_or_name());
    }

    #[test]
    fn test_same_entity_ignores_version() {
        let a = NodeIdentifier {
            node_type: NodeType::InodeFile,
            id: 42,
            boot_id: 1,
            machine_id: 7,
            version: 0,
        };
        let mut b = a;
        b.version = 5;
        assert!(a.same_entity(&b));
        assert_ne!(a, b);

        let mut c = a;
        c.id = 43;
        assert!(!a.same_entity(&c));
    }
}
