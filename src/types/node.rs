//! Provenance nodes: payload variants, live node state, and serializable
//! snapshots.
//!
//! Live nodes ([`ProvNode`]) are created by hook-side code when a kernel
//! object is first observed and live as long as that object does. The engine
//! never owns their allocation; it only mutates flags and the version
//! counter. A [`NodeRecord`] freezes one node at a point in time for
//! serialization — later re-versioning of the live node does not change
//! records already emitted.

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

use super::flags::{FlagsSnapshot, NodeFlags, PreviousEdge};
use super::identifier::{NodeIdentifier, NodeType};

/// Capacity of a transient string annotation, in bytes.
pub const STR_CAPACITY: usize = 4096;

/// Capacity of a transient file name, in bytes.
pub const NAME_CAPACITY: usize = 4096;

/// Namespace ids of a task, consulted by the targeting policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceIds {
    /// UTS namespace.
    pub uts: u32,
    /// IPC namespace.
    pub ipc: u32,
    /// Mount namespace.
    pub mnt: u32,
    /// PID namespace.
    pub pid: u32,
    /// Network namespace.
    pub net: u32,
    /// Cgroup namespace.
    pub cgroup: u32,
}

impl NamespaceIds {
    /// The six ids in a fixed order, for policy lookups.
    pub fn as_array(&self) -> [u32; 6] {
        [self.uts, self.ipc, self.mnt, self.pid, self.net, self.cgroup]
    }
}

/// Attributes of a task node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Kernel pid.
    pub pid: u32,
    /// Namespace membership.
    pub namespaces: NamespaceIds,
}

/// Attributes of a process address-space node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
}

/// Attributes common to inode-backed nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeInfo {
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Permission bits.
    pub mode: u16,
    /// Security-context id, see [`crate::policy::secctx_id`].
    pub secctx: u64,
    /// UUID of the containing superblock.
    pub sb_uuid: Uuid,
}

/// Attributes of a socket node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketInfo {
    /// Address family.
    pub family: u16,
    /// Socket type.
    pub sock_type: u16,
    /// Transport protocol.
    pub protocol: u8,
    /// Security-context id.
    pub secctx: u64,
}

/// Attributes of a superblock node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperblockInfo {
    /// Filesystem UUID.
    pub uuid: Uuid,
}

/// Attributes of a System V message node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    /// Message type as declared by the sender.
    pub mtype: i64,
}

/// Attributes of a shared memory segment node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShmInfo {
    /// Permission bits.
    pub mode: u16,
}

/// Attributes of a semaphore set node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemInfo {
    /// Permission bits.
    pub mode: u16,
}

/// Transient string annotation, bounded by [`STR_CAPACITY`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrInfo {
    /// Annotation text.
    pub value: String,
    /// Number of annotation bytes recorded.
    pub length: usize,
}

/// Transient file name, bounded by [`NAME_CAPACITY`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNameInfo {
    /// The name, truncated to capacity.
    pub name: String,
    /// Number of name bytes recorded.
    pub length: usize,
}

impl FileNameInfo {
    /// Build a file-name payload, truncating to [`NAME_CAPACITY`] at a
    /// character boundary.
    pub fn new(name: &str) -> Self {
        let truncated = truncate_to_capacity(name, NAME_CAPACITY);
        Self {
            length: truncated.len(),
            name: truncated,
        }
    }
}

/// Transient socket address (raw sockaddr bytes).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    /// Raw address bytes as supplied by the hook.
    pub addr: Vec<u8>,
}

/// Discretionary node declared from user space.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscInfo {
    /// Caller-supplied content.
    pub content: String,
    /// Identifier of the node this one is attached to, if any.
    pub parent: Option<NodeIdentifier>,
}

/// Kind-specific attributes of a node, discriminated by [`NodeType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodePayload {
    /// Task attributes.
    Task(TaskInfo),
    /// Address-space attributes.
    Memory(MemoryInfo),
    /// Inode attributes (all inode kinds except sockets).
    Inode(InodeInfo),
    /// Socket attributes.
    Socket(SocketInfo),
    /// Superblock attributes.
    Superblock(SuperblockInfo),
    /// Message attributes.
    Message(MessageInfo),
    /// Shared memory attributes.
    Shm(ShmInfo),
    /// Semaphore attributes.
    Sem(SemInfo),
    /// Transient annotation.
    Str(StrInfo),
    /// Transient file name.
    FileName(FileNameInfo),
    /// Transient socket address.
    Address(AddressInfo),
    /// Discretionary node.
    Disc(DiscInfo),
}

impl NodePayload {
    /// Security-context id carried by the payload, if any.
    pub fn secctx(&self) -> Option<u64> {
        match self {
            Self::Inode(info) => Some(info.secctx),
            Self::Socket(info) => Some(info.secctx),
            _ => None,
        }
    }

    /// Namespace ids carried by the payload, if any.
    pub fn namespaces(&self) -> Option<&NamespaceIds> {
        match self {
            Self::Task(info) => Some(&info.namespaces),
            _ => None,
        }
    }
}

/// Truncate a string to at most `capacity` bytes without splitting a
/// character.
fn truncate_to_capacity(s: &str, capacity: usize) -> String {
    if s.len() <= capacity {
        return s.to_string();
    }
    let mut end = capacity;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// A live provenance node.
///
/// Identity fields are immutable for the node's lifetime; the version
/// counter and flags mutate through the recording protocol. Nodes are shared
/// across every call site that references the underlying kernel object,
/// typically behind an `Arc`.
#[derive(Debug)]
pub struct ProvNode {
    node_type: NodeType,
    id: u64,
    boot_id: u32,
    machine_id: u32,
    version: AtomicU32,
    flags: NodeFlags,
    previous: Mutex<Option<PreviousEdge>>,
    // Name-attachment critical section; see record_node_name.
    lock: Mutex<()>,
    payload: NodePayload,
}

impl ProvNode {
    /// Create a node of the given kind.
    pub fn new(node_type: NodeType, id: u64, boot_id: u32, machine_id: u32, payload: NodePayload) -> Self {
        Self {
            node_type,
            id,
            boot_id,
            machine_id,
            version: AtomicU32::new(0),
            flags: NodeFlags::new(),
            previous: Mutex::new(None),
            lock: Mutex::new(()),
            payload,
        }
    }

    /// Create a task node.
    pub fn task(id: u64, boot_id: u32, machine_id: u32, info: TaskInfo) -> Self {
        Self::new(NodeType::Task, id, boot_id, machine_id, NodePayload::Task(info))
    }

    /// Create an address-space node.
    pub fn memory(id: u64, boot_id: u32, machine_id: u32, info: MemoryInfo) -> Self {
        Self::new(NodeType::Memory, id, boot_id, machine_id, NodePayload::Memory(info))
    }

    /// Create an inode node of a specific inode kind.
    pub fn inode(kind: NodeType, id: u64, boot_id: u32, machine_id: u32, info: InodeInfo) -> Self {
        debug_assert!(kind.has_secctx() && kind != NodeType::InodeSocket);
        Self::new(kind, id, boot_id, machine_id, NodePayload::Inode(info))
    }

    /// Create a socket node.
    pub fn socket(id: u64, boot_id: u32, machine_id: u32, info: SocketInfo) -> Self {
        Self::new(NodeType::InodeSocket, id, boot_id, machine_id, NodePayload::Socket(info))
    }

    /// Create a superblock node.
    pub fn superblock(id: u64, boot_id: u32, machine_id: u32, info: SuperblockInfo) -> Self {
        Self::new(NodeType::Superblock, id, boot_id, machine_id, NodePayload::Superblock(info))
    }

    /// Kind of the node.
    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    /// Kernel-object id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current version.
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Relaxed)
    }

    /// Advance the version by one, returning the new value.
    pub(crate) fn bump_version(&self) -> u32 {
        self.version.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Capture state of the node.
    pub fn flags(&self) -> &NodeFlags {
        &self.flags
    }

    /// Kind-specific attributes.
    pub fn payload(&self) -> &NodePayload {
        &self.payload
    }

    /// Security-context id, if the node kind carries one.
    pub fn secctx(&self) -> Option<u64> {
        self.payload.secctx()
    }

    /// Previous-edge cache, guarded for edge compression.
    pub(crate) fn previous_edge(&self) -> &Mutex<Option<PreviousEdge>> {
        &self.previous
    }

    /// Enter the per-node critical section used for name attachment.
    pub(crate) fn name_section(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Identifier of the node's current snapshot.
    pub fn identifier(&self) -> NodeIdentifier {
        NodeIdentifier {
            node_type: self.node_type,
            id: self.id,
            boot_id: self.boot_id,
            machine_id: self.machine_id,
            version: self.version(),
        }
    }

    /// Freeze the node into a serializable record.
    pub fn to_record(&self) -> NodeRecord {
        NodeRecord {
            identifier: self.identifier(),
            flags: self.flags.snapshot(),
            payload: self.payload.clone(),
        }
    }
}

/// Serializable snapshot of one node version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Identifier, version included, frozen at snapshot time.
    pub identifier: NodeIdentifier,
    /// Flag values frozen at snapshot time.
    pub flags: FlagsSnapshot,
    /// Kind-specific attributes.
    pub payload: NodePayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_node(id: u64) -> ProvNode {
        ProvNode::inode(NodeType::InodeFile, id, 1, 7, InodeInfo::default())
    }

    #[test]
    fn test_new_node_starts_at_version_zero() {
        let node = file_node(1);
        assert_eq!(node.version(), 0);
        assert!(!node.flags().is_recorded());
    }

    #[test]
    fn test_bump_version_is_strictly_increasing() {
        let node = file_node(1);
        assert_eq!(node.bump_version(), 1);
        assert_eq!(node.bump_version(), 2);
        assert_eq!(node.version(), 2);
    }

    #[test]
    fn test_record_freezes_version() {
        let node = file_node(1);
        let record = node.to_record();
        node.bump_version();
        assert_eq!(record.identifier.version, 0);
        assert_eq!(node.identifier().version, 1);
        assert!(record.identifier.same_entity(&node.identifier()));
    }

    #[test]
    fn test_secctx_only_on_inode_kinds() {
        let file = file_node(1);
        assert!(file.secctx().is_some());

        let task = ProvNode::task(2, 1, 7, TaskInfo::default());
        assert!(task.secctx().is_none());

        let sock = ProvNode::socket(3, 1, 7, SocketInfo { secctx: 9, ..Default::default() });
        assert_eq!(sock.secctx(), Some(9));
    }

    #[test]
    fn test_superblock_carries_uuid() {
        let uuid = Uuid::new_v4();
        let sb = ProvNode::superblock(5, 1, 7, SuperblockInfo { uuid });
        match sb.payload() {
            NodePayload::Superblock(info) => assert_eq!(info.uuid, uuid),
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(sb.node_type(), NodeType::Superblock);
    }

    #[test]
    fn test_file_name_truncation() {
        let long = "x".repeat(NAME_CAPACITY + 100);
        let info = FileNameInfo::new(&long);
        assert_eq!(info.name.len(), NAME_CAPACITY);
        assert_eq!(info.length, NAME_CAPACITY);

        let short = FileNameInfo::new("/tmp/a");
        assert_eq!(short.name, "/tmp/a");
        assert_eq!(short.length, 6);
    }
}
