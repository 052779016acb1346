//! Error types for render operations.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for render operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors that can occur while preparing or running a render.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("OpenSCAD not found: {0}")]
    RendererNotFound(PathBuf),

    #[error("Template not found: {0}")]
    TemplateNotFound(PathBuf),

    #[error("OpenSCAD exit {}", .exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    RendererFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("OpenSCAD timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    /// Create a renderer failure error.
    pub fn renderer_failed(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::RendererFailed {
            exit_code,
            stderr: stderr.into(),
        }
    }
}
