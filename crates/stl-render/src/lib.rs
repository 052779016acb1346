//! OpenSCAD CLI wrapper for STL rendering.
//!
//! This crate provides:
//! - Type-safe OpenSCAD command building (argument vector, no shell)
//! - Subprocess execution with captured output and a timeout
//! - Deterministic output file naming
//! - The [`Renderer`] seam used by the worker

pub mod command;
pub mod error;
pub mod renderer;
pub mod slug;

pub use command::{check_renderer, OpenScadCommand, OpenScadRunner, ProcessOutput};
pub use error::{RenderError, RenderResult};
pub use renderer::{
    truncate_diagnostics, OpenScadRenderer, RenderAttempt, RenderSettings, Renderer,
    MAX_DIAGNOSTIC_CHARS,
};
pub use slug::{output_file_name, slugify, UNTITLED_SLUG};
