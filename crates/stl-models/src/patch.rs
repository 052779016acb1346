//! Partial updates applied to a job record.

use serde::{Deserialize, Serialize};

use crate::{PrintJob, RenderState, TaskStatus};

/// Partial update of a print job.
///
/// `None` leaves a column untouched. For the nullable columns the inner
/// `Option` is the new value, so `Some(None)` writes NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPatch {
    pub status: Option<TaskStatus>,
    pub render_state: Option<RenderState>,
    pub render_retries: Option<u32>,
    pub stl_path: Option<Option<String>>,
    pub annotation: Option<Option<String>>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn render_state(mut self, state: RenderState) -> Self {
        self.render_state = Some(state);
        self
    }

    pub fn render_retries(mut self, retries: u32) -> Self {
        self.render_retries = Some(retries);
        self
    }

    pub fn stl_path(mut self, path: Option<String>) -> Self {
        self.stl_path = Some(path);
        self
    }

    pub fn annotation(mut self, annotation: Option<String>) -> Self {
        self.annotation = Some(annotation);
        self
    }

    /// Whether applying this patch would change nothing.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply the patch to an in-memory record.
    pub fn apply_to(&self, job: &mut PrintJob) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(state) = self.render_state {
            job.render_state = state;
        }
        if let Some(retries) = self.render_retries {
            job.render_retries = retries;
        }
        if let Some(path) = &self.stl_path {
            job.stl_path = path.clone();
        }
        if let Some(annotation) = &self.annotation {
            job.annotation = annotation.clone();
        }
    }
}
