//! OpenSCAD command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{RenderError, RenderResult};

/// Builder for OpenSCAD commands.
#[derive(Debug, Clone)]
pub struct OpenScadCommand {
    /// OpenSCAD executable
    executable: PathBuf,
    /// Template (.scad) file
    template: PathBuf,
    /// Output (.stl) file
    output: PathBuf,
    /// Named `-D` definitions, in insertion order
    definitions: Vec<(String, String)>,
}

impl OpenScadCommand {
    /// Create a new OpenSCAD command.
    pub fn new(
        executable: impl AsRef<Path>,
        template: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Self {
        Self {
            executable: executable.as_ref().to_path_buf(),
            template: template.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            definitions: Vec::new(),
        }
    }

    /// Define a string variable for the template.
    pub fn define_string(mut self, name: impl Into<String>, value: &str) -> Self {
        self.definitions.push((name.into(), string_literal(value)));
        self
    }

    /// Define multiple string variables.
    pub fn define_strings<I, K, V>(self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        pairs
            .into_iter()
            .fold(self, |cmd, (name, value)| cmd.define_string(name, value.as_ref()))
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(3 + self.definitions.len() * 2);

        args.push("-o".to_string());
        args.push(self.output.to_string_lossy().to_string());
        args.push(self.template.to_string_lossy().to_string());

        for (name, literal) in &self.definitions {
            args.push("-D".to_string());
            args.push(format!("{}={}", name, literal));
        }

        args
    }
}

/// Quote a value as an OpenSCAD string literal.
///
/// Arguments reach OpenSCAD without a shell, so only the literal syntax
/// itself needs escaping.
fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Captured output of a finished renderer process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runner for OpenSCAD commands with a timeout.
#[derive(Debug, Clone, Default)]
pub struct OpenScadRunner {
    /// Kill the process after this long
    timeout: Option<Duration>,
}

impl OpenScadRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self { timeout: None }
    }

    /// Set timeout. A zero duration disables it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Run an OpenSCAD command to completion.
    ///
    /// Returns the captured output on exit status 0, otherwise
    /// [`RenderError::RendererFailed`] carrying the exit code and stderr.
    pub async fn run(&self, cmd: &OpenScadCommand) -> RenderResult<ProcessOutput> {
        let args = cmd.build_args();
        debug!("Running OpenSCAD: {} {}", cmd.executable().display(), args.join(" "));

        let child = Command::new(cmd.executable())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    RenderError::RendererNotFound(cmd.executable().to_path_buf())
                }
                _ => RenderError::Io(e),
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!("OpenSCAD timed out after {:?}, killing process", timeout);
                    return Err(RenderError::Timeout(timeout));
                }
            },
            None => child.wait_with_output().await?,
        };

        let captured = ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if output.status.success() {
            Ok(captured)
        } else {
            Err(RenderError::renderer_failed(output.status.code(), captured.stderr))
        }
    }
}

/// Check that the renderer executable can be resolved.
///
/// Accepts either a path or a bare program name looked up on `PATH`.
pub fn check_renderer(executable: impl AsRef<Path>) -> RenderResult<PathBuf> {
    let executable = executable.as_ref();
    which::which(executable).map_err(|_| RenderError::RendererNotFound(executable.to_path_buf()))
}
