//! Slide tracking: the per-frame matcher and its cost model.
//!
//! The tracker locates the projected slide inside each processed frame,
//! detects slide changes, maintains a reference keyframe for differential
//! matching, and emits the synchronization instructions.

pub mod cost;
pub mod state;
pub mod tracker;

pub use cost::CostConfig;
pub use state::TrackerPhase;
pub use tracker::{SyncTracker, TrackerConfig, TrackerEvent};
