//! Print job records as stored in the shared job table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    /// Create from a raw database id.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw database id.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Error returned when a stored state string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} `{value}`")]
pub struct ParseStateError {
    kind: &'static str,
    value: String,
}

/// Coarse workflow status of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a worker
    #[default]
    Pending,
    /// Claimed by a worker
    InProgress,
    /// No further work expected (rendered or permanently failed)
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(ParseStateError {
                kind: "task status",
                value: other.to_string(),
            }),
        }
    }
}

/// Fine-grained STL render state of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenderState {
    /// Eligible for rendering
    #[default]
    Pending,
    /// A worker holds the claim and is rendering
    Running,
    /// STL written, `stl_path` set
    Completed,
    /// Retries exhausted; never claimed again
    Failed,
}

impl RenderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderState::Pending => "pending",
            RenderState::Running => "running",
            RenderState::Completed => "completed",
            RenderState::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more render attempts expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, RenderState::Completed | RenderState::Failed)
    }
}

impl fmt::Display for RenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RenderState::Pending),
            "running" => Ok(RenderState::Running),
            "completed" => Ok(RenderState::Completed),
            "failed" => Ok(RenderState::Failed),
            other => Err(ParseStateError {
                kind: "render state",
                value: other.to_string(),
            }),
        }
    }
}

/// One print/render request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintJob {
    /// Unique job ID
    pub id: JobId,

    /// Workflow status
    #[serde(default)]
    pub status: TaskStatus,

    /// Render status
    #[serde(default)]
    pub render_state: RenderState,

    /// Product type; only jobs for the configured SKU are claimed
    pub product_sku: String,

    /// Free-form personalisation text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_text: Option<String>,

    /// Primary colour
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_1: Option<String>,

    /// Secondary colour
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_2: Option<String>,

    /// Failed render attempts so far
    #[serde(default)]
    pub render_retries: u32,

    /// Rendered STL location, relative to the public root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stl_path: Option<String>,

    /// Last render error, cleared on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,

    /// Creation timestamp, the claim ordering key
    pub created_at: DateTime<Utc>,
}

impl PrintJob {
    /// Create a new job in the `(pending, pending)` state.
    pub fn new(id: JobId, product_sku: impl Into<String>) -> Self {
        Self {
            id,
            status: TaskStatus::Pending,
            render_state: RenderState::Pending,
            product_sku: product_sku.into(),
            custom_text: None,
            color_1: None,
            color_2: None,
            render_retries: 0,
            stl_path: None,
            annotation: None,
            created_at: Utc::now(),
        }
    }

    /// Set the custom text.
    pub fn with_custom_text(mut self, text: impl Into<String>) -> Self {
        self.custom_text = Some(text.into());
        self
    }

    /// Set both colours.
    pub fn with_colors(mut self, color_1: impl Into<String>, color_2: impl Into<String>) -> Self {
        self.color_1 = Some(color_1.into());
        self.color_2 = Some(color_2.into());
        self
    }

    /// Set the creation timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Whether a worker filtering on `target_sku` may claim this job.
    pub fn is_claimable(&self, target_sku: &str) -> bool {
        self.status == TaskStatus::Pending
            && self.render_state == RenderState::Pending
            && self.product_sku == target_sku
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip_through_strings() {
        for state in [
            RenderState::Pending,
            RenderState::Running,
            RenderState::Completed,
            RenderState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<RenderState>().unwrap(), state);
        }
        assert_eq!("in_progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
    }

    #[test]
    fn test_unknown_state_is_rejected() {
        let err = "queued".parse::<RenderState>().unwrap_err();
        assert_eq!(err.to_string(), "unknown render state `queued`");
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_claimable_requires_pending_pair_and_sku() {
        let job = PrintJob::new(JobId::new(1), "SKU-A");
        assert!(job.is_claimable("SKU-A"));
        assert!(!job.is_claimable("SKU-B"));

        let mut failed = job.clone();
        failed.status = TaskStatus::Completed;
        failed.render_state = RenderState::Failed;
        assert!(!failed.is_claimable("SKU-A"));

        let mut half = job;
        half.render_state = RenderState::Running;
        assert!(!half.is_claimable("SKU-A"));
    }
}
