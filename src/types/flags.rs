//! Per-node capture state.
//!
//! Flags are individually atomic so that hot-path reads never take a lock.
//! Consistency across several flags of the same node is not provided here;
//! see the concurrency contract on [`crate::capture::CaptureEngine`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

use super::identifier::RelationType;

/// Mutable capture state attached to every node instance.
///
/// `recorded` tracks whether the node header for the current version has been
/// serialized; `name_recorded` whether a name edge is attached to the current
/// version; `tracked`/`opaque`/`propagate` are capture-policy flags set by
/// targeting; `has_outgoing` drives node compression; `saved` is a
/// persistence hint for externally backed nodes.
#[derive(Debug, Default)]
pub struct NodeFlags {
    recorded: AtomicBool,
    name_recorded: AtomicBool,
    tracked: AtomicBool,
    opaque: AtomicBool,
    propagate: AtomicBool,
    initialized: AtomicBool,
    has_outgoing: AtomicBool,
    saved: AtomicBool,
}

macro_rules! flag_accessors {
    ($get:ident, $set:ident, $clear:ident, $field:ident) => {
        /// Read the flag.
        pub fn $get(&self) -> bool {
            self.$field.load(Ordering::Relaxed)
        }

        /// Set the flag.
        pub fn $set(&self) {
            self.$field.store(true, Ordering::Relaxed);
        }

        /// Clear the flag.
        pub fn $clear(&self) {
            self.$field.store(false, Ordering::Relaxed);
        }
    };
}

impl NodeFlags {
    /// Fresh state: every flag unset.
    pub fn new() -> Self {
        Self::default()
    }

    flag_accessors!(is_recorded, set_recorded, clear_recorded, recorded);
    flag_accessors!(
        is_name_recorded,
        set_name_recorded,
        clear_name_recorded,
        name_recorded
    );
    flag_accessors!(is_tracked, set_tracked, clear_tracked, tracked);
    flag_accessors!(is_opaque, set_opaque, clear_opaque, opaque);
    flag_accessors!(is_propagate, set_propagate, clear_propagate, propagate);
    flag_accessors!(
        is_initialized,
        set_initialized,
        clear_initialized,
        initialized
    );
    flag_accessors!(has_outgoing, set_has_outgoing, clear_has_outgoing, has_outgoing);
    flag_accessors!(is_saved, set_saved, clear_saved, saved);

    /// Freeze the current flag values for serialization.
    pub fn snapshot(&self) -> FlagsSnapshot {
        FlagsSnapshot {
            recorded: self.is_recorded(),
            name_recorded: self.is_name_recorded(),
            tracked: self.is_tracked(),
            opaque: self.is_opaque(),
            propagate: self.is_propagate(),
            initialized: self.is_initialized(),
            has_outgoing: self.has_outgoing(),
            saved: self.is_saved(),
        }
    }
}

/// Plain-value copy of [`NodeFlags`] embedded in serialized node records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagsSnapshot {
    /// Node header serialized for the snapshot version.
    pub recorded: bool,
    /// Name edge attached to the snapshot version.
    pub name_recorded: bool,
    /// Marked for capture.
    pub tracked: bool,
    /// Excluded from capture.
    pub opaque: bool,
    /// Tracking spreads across relations.
    pub propagate: bool,
    /// Hook-side initialization completed.
    pub initialized: bool,
    /// Snapshot version has emitted at least one outgoing edge.
    pub has_outgoing: bool,
    /// Persisted externally (e.g. as an extended attribute).
    pub saved: bool,
}

/// Last edge recorded into a node: source id and relation class.
///
/// Used by edge compression to collapse a relation identical to the
/// immediately preceding one into the same destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviousEdge {
    /// Source node id of the last recorded edge.
    pub id: u64,
    /// Relation class of the last recorded edge.
    pub relation_type: RelationType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_default_unset() {
        let flags = NodeFlags::new();
        assert!(!flags.is_recorded());
        assert!(!flags.is_name_recorded());
        assert!(!flags.is_tracked());
        assert!(!flags.is_opaque());
        assert!(!flags.is_propagate());
        assert!(!flags.is_initialized());
        assert!(!flags.has_outgoing());
        assert!(!flags.is_saved());
    }

    #[test]
    fn test_set_clear_roundtrip() {
        let flags = NodeFlags::new();
        flags.set_tracked();
        assert!(flags.is_tracked());
        flags.clear_tracked();
        assert!(!flags.is_tracked());
    }

    #[test]
    fn test_snapshot_freezes_values() {
        let flags = NodeFlags::new();
        flags.set_recorded();
        flags.set_has_outgoing();
        let snap = flags.snapshot();
        flags.clear_recorded();
        flags.clear_has_outgoing();
        assert!(snap.recorded);
        assert!(snap.has_outgoing);
        assert!(!flags.is_recorded());
    }
}
