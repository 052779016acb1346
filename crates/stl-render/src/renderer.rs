//! Render a claimed job into an STL file.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use stl_models::{PrintJob, RenderParams};

use crate::command::{OpenScadCommand, OpenScadRunner};
use crate::error::{RenderError, RenderResult};
use crate::slug::output_file_name;

/// Longest diagnostic text kept from a failed attempt.
pub const MAX_DIAGNOSTIC_CHARS: usize = 1000;

/// Template variable names, in line order.
const TEXT_LINE_VARS: [&str; 3] = ["text_line1", "text_line2", "text_line3"];

/// Renderer settings.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// OpenSCAD executable
    pub openscad_path: PathBuf,
    /// Template .scad file
    pub template_path: PathBuf,
    /// Directory STL files are written to
    pub output_dir_abs: PathBuf,
    /// Prefix of the path persisted on the job
    pub output_dir_relative: String,
    /// Kill a render after this long (zero disables)
    pub timeout: Duration,
}

/// Result of one render attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderAttempt {
    pub success: bool,
    /// Path persisted as `stl_path` (relative prefix + file name)
    pub output_path: String,
    /// Error text on failure, bounded by [`MAX_DIAGNOSTIC_CHARS`]
    pub diagnostics: String,
}

impl RenderAttempt {
    pub fn succeeded(output_path: impl Into<String>) -> Self {
        Self {
            success: true,
            output_path: output_path.into(),
            diagnostics: String::new(),
        }
    }

    pub fn failed(output_path: impl Into<String>, diagnostics: impl AsRef<str>) -> Self {
        Self {
            success: false,
            output_path: output_path.into(),
            diagnostics: truncate_diagnostics(diagnostics.as_ref()),
        }
    }
}

/// Something that turns a job into an artifact.
///
/// Implementations never retry and never return an error: every failure is
/// reported through [`RenderAttempt::success`].
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, job: &PrintJob) -> RenderAttempt;
}

/// Renders jobs with the OpenSCAD CLI.
#[derive(Debug, Clone)]
pub struct OpenScadRenderer {
    settings: RenderSettings,
    runner: OpenScadRunner,
}

impl OpenScadRenderer {
    pub fn new(settings: RenderSettings) -> Self {
        let runner = OpenScadRunner::new().with_timeout(settings.timeout);
        Self { settings, runner }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Build the command for a job, returning it with the persisted path.
    pub fn prepare(&self, job: &PrintJob) -> (OpenScadCommand, String) {
        let params = RenderParams::from_job(job);
        let file_name = output_file_name(job.id, params.first_line());
        let output_abs = self.settings.output_dir_abs.join(&file_name);
        let output_rel = format!(
            "{}/{}",
            self.settings.output_dir_relative.trim_end_matches('/'),
            file_name
        );

        let cmd = OpenScadCommand::new(
            &self.settings.openscad_path,
            &self.settings.template_path,
            output_abs,
        )
        .define_strings(TEXT_LINE_VARS.iter().zip(params.text_lines.iter()).map(|(k, v)| (*k, v)))
        .define_string("color1", &params.color_1)
        .define_string("color2", &params.color_2);

        (cmd, output_rel)
    }

    async fn try_render(&self, job: &PrintJob, cmd: &OpenScadCommand) -> RenderResult<()> {
        tokio::fs::create_dir_all(&self.settings.output_dir_abs).await?;

        info!(job_id = %job.id, "Exec {} {}", cmd.executable().display(), cmd.build_args().join(" "));
        let output = self.runner.run(cmd).await?;

        if !output.stdout.is_empty() {
            debug!(job_id = %job.id, "stdout: {}", output.stdout.trim_end());
        }
        if !output.stderr.is_empty() {
            warn!(job_id = %job.id, "stderr: {}", output.stderr.trim_end());
        }
        Ok(())
    }
}

#[async_trait]
impl Renderer for OpenScadRenderer {
    async fn render(&self, job: &PrintJob) -> RenderAttempt {
        let (cmd, output_rel) = self.prepare(job);
        let started = Instant::now();

        match self.try_render(job, &cmd).await {
            Ok(()) => {
                debug!(job_id = %job.id, elapsed_ms = started.elapsed().as_millis() as u64, "Render finished");
                RenderAttempt::succeeded(output_rel)
            }
            Err(e) => {
                let mut diagnostics = e.to_string();
                if let RenderError::RendererFailed { stderr, .. } = &e {
                    if !stderr.trim().is_empty() {
                        warn!(job_id = %job.id, "stderr: {}", stderr.trim_end());
                        diagnostics.push_str(": ");
                        diagnostics.push_str(stderr.trim());
                    }
                }
                RenderAttempt::failed(output_rel, diagnostics)
            }
        }
    }
}

/// Truncate text to [`MAX_DIAGNOSTIC_CHARS`] characters.
pub fn truncate_diagnostics(text: &str) -> String {
    match text.char_indices().nth(MAX_DIAGNOSTIC_CHARS) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
