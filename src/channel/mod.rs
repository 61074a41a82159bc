//! Output channel boundary.
//!
//! The engine's only obligation toward the transport is to stamp a fresh
//! sequence number on every record before handing it off. The binary layout
//! and delivery semantics belong to the channel implementation.

pub mod memory;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::CaptureError;
use crate::types::{ProvEvent, ProvRecord};

pub use memory::InMemoryChannel;

/// Sink for finished records.
///
/// Implementations are expected to be non-blocking or only briefly
/// blocking: writes happen on the latency-sensitive path of every
/// intercepted operation.
pub trait OutputChannel: Send + Sync {
    /// Error type for channel writes.
    type Error: std::error::Error + Send + Sync;

    /// Hand one sequence-stamped record to the transport.
    fn write(&self, event: ProvEvent) -> Result<(), Self::Error>;
}

/// Stamps sequence numbers and forwards records to the channel.
///
/// The counter is process-wide state shared by every call site of one
/// engine; sequence numbers are globally unique and strictly increasing,
/// the only total order guaranteed across records.
#[derive(Debug)]
pub struct RecordWriter<C: OutputChannel> {
    channel: Arc<C>,
    seq: AtomicU64,
}

impl<C: OutputChannel> RecordWriter<C> {
    /// Writer over the given channel, sequence starting at 1.
    pub fn new(channel: Arc<C>) -> Self {
        Self {
            channel,
            seq: AtomicU64::new(0),
        }
    }

    /// The channel this writer forwards to.
    pub fn channel(&self) -> &Arc<C> {
        &self.channel
    }

    /// Stamp and write one record, returning its sequence number.
    pub fn write(&self, record: ProvRecord) -> Result<u64, CaptureError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.channel
            .write(ProvEvent { seq, record })
            .map_err(CaptureError::from_channel)?;
        Ok(seq)
    }
}
