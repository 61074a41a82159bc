//! Error taxonomy for the capture engine.
//!
//! There is no retry policy: every failure propagates to the calling capture
//! verb, which aborts the remaining steps of its sequence and returns the
//! first failure. Records emitted before the failure stay emitted — the
//! graph favors forward progress over all-or-nothing semantics.

/// Error returned by capture operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    /// Transient node allocation failed.
    #[error("transient provenance allocation failed")]
    OutOfMemory,
    /// Copying annotation bytes from the caller's buffer failed.
    #[error("failed to copy annotation from caller buffer")]
    CopyFault,
    /// The output channel rejected a record. Opaque to the engine.
    #[error("output channel error: {0}")]
    Channel(String),
}

impl CaptureError {
    /// Wrap a channel error, keeping only its message.
    pub fn from_channel<E: std::error::Error>(e: E) -> Self {
        Self::Channel(e.to_string())
    }
}
