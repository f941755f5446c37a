//! Synchronization script: instruction stream and timestamp text format.

pub mod instructions;
pub mod timecode;

pub use instructions::{ParseError, SyncCode, SyncError, SyncInstruction, SyncInstructions};
