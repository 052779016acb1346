//! Classify a render attempt into the job's next persisted state.

use stl_models::{JobPatch, PrintJob, RenderState, TaskStatus};
use stl_render::RenderAttempt;

/// Next state of a job after one render attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Artifact written; the job is done.
    Completed { stl_path: String },
    /// Attempt failed with budget left; the job re-enters the eligible pool.
    Retry { retries: u32, annotation: String },
    /// Attempt failed and the retry budget is spent.
    Failed { retries: u32, annotation: String },
}

impl Outcome {
    /// Decide the outcome of `attempt` for `job`.
    ///
    /// `job` is the snapshot taken at claim time. A job fails permanently
    /// on its `max_retries`-th failed attempt, never before.
    pub fn decide(job: &PrintJob, attempt: &RenderAttempt, max_retries: u32) -> Self {
        if attempt.success {
            return Self::Completed {
                stl_path: attempt.output_path.clone(),
            };
        }

        let retries = job.render_retries.saturating_add(1);
        let annotation = failure_annotation(retries, max_retries, &attempt.diagnostics);

        if retries >= max_retries {
            Self::Failed {
                retries,
                annotation,
            }
        } else {
            Self::Retry {
                retries,
                annotation,
            }
        }
    }

    /// Short label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Retry { .. } => "retry",
            Self::Failed { .. } => "failed",
        }
    }

    /// The update that persists this outcome.
    ///
    /// `stl_path` is written on every outcome so that it is set exactly
    /// when the render state is `completed`.
    pub fn to_patch(&self) -> JobPatch {
        match self {
            Self::Completed { stl_path } => JobPatch::new()
                .status(TaskStatus::Completed)
                .render_state(RenderState::Completed)
                .stl_path(Some(stl_path.clone()))
                .render_retries(0)
                .annotation(None),
            Self::Retry {
                retries,
                annotation,
            } => JobPatch::new()
                .status(TaskStatus::Pending)
                .render_state(RenderState::Pending)
                .stl_path(None)
                .render_retries(*retries)
                .annotation(Some(annotation.clone())),
            Self::Failed {
                retries,
                annotation,
            } => JobPatch::new()
                .status(TaskStatus::Completed)
                .render_state(RenderState::Failed)
                .stl_path(None)
                .render_retries(*retries)
                .annotation(Some(annotation.clone())),
        }
    }
}

fn failure_annotation(retries: u32, max_retries: u32, diagnostics: &str) -> String {
    format!("STL render error ({retries}/{max_retries}): {diagnostics}")
}
