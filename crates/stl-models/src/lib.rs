//! Shared data models for the STL render worker.
//!
//! This crate provides Serde-serializable types for:
//! - Print jobs and their workflow/render states
//! - Partial job updates applied after a render attempt
//! - Render parameters derived from a job's custom text and colours

pub mod job;
pub mod params;
pub mod patch;

// Re-export common types
pub use job::{JobId, ParseStateError, PrintJob, RenderState, TaskStatus};
pub use params::{RenderParams, DEFAULT_COLOR_1, DEFAULT_COLOR_2, TEXT_LINES};
pub use patch::JobPatch;
