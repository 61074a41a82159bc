//! In-memory output channel for tests and tooling.

use parking_lot::Mutex;

use super::OutputChannel;
use crate::types::{NodeRecord, ProvEvent, RelationRecord, RelationType};

/// Error type for the in-memory channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InMemoryChannelError {
    /// The channel's injected write budget was exhausted.
    #[error("channel saturated after {0} writes")]
    Saturated(usize),
}

/// Channel that buffers every event, with optional fault injection.
///
/// `failing_after(n)` accepts `n` writes and rejects the rest, which is how
/// the tests exercise partial-failure behavior of multi-edge sequences.
#[derive(Debug, Default)]
pub struct InMemoryChannel {
    events: Mutex<Vec<ProvEvent>>,
    fail_after: Option<usize>,
}

impl InMemoryChannel {
    /// Channel that accepts every write.
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel that rejects every write after the first `n`.
    pub fn failing_after(n: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail_after: Some(n),
        }
    }

    /// All buffered events, in write order.
    pub fn events(&self) -> Vec<ProvEvent> {
        self.events.lock().clone()
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// True if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Buffered relation records, in write order.
    pub fn relations(&self) -> Vec<RelationRecord> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| e.record.as_relation().cloned())
            .collect()
    }

    /// Buffered relations of one class, in write order.
    pub fn relations_of(&self, relation_type: RelationType) -> Vec<RelationRecord> {
        self.relations()
            .into_iter()
            .filter(|r| r.relation_type == relation_type)
            .collect()
    }

    /// Buffered node records, in write order.
    pub fn nodes(&self) -> Vec<NodeRecord> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| e.record.as_node().cloned())
            .collect()
    }

    /// Drop all buffered events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Export the buffered events as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*self.events.lock())
    }
}

impl OutputChannel for InMemoryChannel {
    type Error = InMemoryChannelError;

    fn write(&self, event: ProvEvent) -> Result<(), Self::Error> {
        let mut events = self.events.lock();
        if let Some(limit) = self.fail_after {
            if events.len() >= limit {
                return Err(InMemoryChannelError::Saturated(limit));
            }
        }
        events.push(event);
        Ok(())
    }
}
