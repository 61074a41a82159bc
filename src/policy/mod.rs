//! Capture policy, filter state, and targeting rules.

pub mod capture;
pub mod target;

pub use capture::{CaptureConfig, CapturePolicy, FilterSet};
pub use target::{apply_target, secctx_id, NoTargets, TargetOps, TargetPolicy, TargetTable};
