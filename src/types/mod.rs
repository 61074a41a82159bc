//! Core types for the capture engine.

pub mod flags;
pub mod identifier;
pub mod node;
pub mod relation;

pub use flags::{FlagsSnapshot, NodeFlags, PreviousEdge};
pub use identifier::{NodeIdentifier, NodeType, RelationIdentifier, RelationType};
pub use node::{
    AddressInfo, DiscInfo, FileNameInfo, InodeInfo, MemoryInfo, MessageInfo, NamespaceIds,
    NodePayload, NodeRecord, ProvNode, SemInfo, ShmInfo, SocketInfo, StrInfo, SuperblockInfo,
    TaskInfo, NAME_CAPACITY, STR_CAPACITY,
};
pub use relation::{ProvEvent, ProvRecord, RelationContext, RelationRecord};
