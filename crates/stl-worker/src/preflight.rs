//! Startup checks run before the first claim.

use std::path::PathBuf;

use tracing::info;

use stl_render::{check_renderer, RenderError};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;

/// What the preflight resolved.
#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub renderer: PathBuf,
    pub template: PathBuf,
    pub output_dir: PathBuf,
}

/// Verify the renderer and template exist and the output directory is writable.
///
/// Creates the output directory if missing. Any failure here is fatal: the
/// worker must not claim jobs it cannot render.
pub async fn run_preflight(config: &WorkerConfig) -> WorkerResult<PreflightReport> {
    let renderer = check_renderer(&config.openscad_path)?;

    if !tokio::fs::try_exists(&config.template_path).await? {
        return Err(RenderError::TemplateNotFound(config.template_path.clone()).into());
    }

    tokio::fs::create_dir_all(&config.output_dir_abs).await?;
    let probe = config.output_dir_abs.join(".preflight");
    tokio::fs::write(&probe, b"ok").await?;
    tokio::fs::remove_file(&probe).await?;

    info!(
        renderer = %renderer.display(),
        template = %config.template_path.display(),
        output_dir = %config.output_dir_abs.display(),
        "Preflight ok"
    );

    Ok(PreflightReport {
        renderer,
        template: config.template_path.clone(),
        output_dir: config.output_dir_abs.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir, openscad: PathBuf) -> WorkerConfig {
        let template = dir.path().join("DualColour.scad");
        std::fs::write(&template, "// template").unwrap();
        WorkerConfig {
            openscad_path: openscad,
            template_path: template,
            output_dir_abs: dir.path().join("out/stl"),
            ..WorkerConfig::default()
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_preflight_creates_output_dir() {
        let Ok(true_bin) = which::which("true") else {
            return;
        };
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, true_bin);

        let report = run_preflight(&config).await.unwrap();

        assert!(report.output_dir.is_dir());
        assert!(!report.output_dir.join(".preflight").exists());
    }

    #[tokio::test]
    async fn test_missing_renderer_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, PathBuf::from("/nonexistent/openscad"));

        let err = run_preflight(&config).await.unwrap_err();

        assert!(matches!(
            err,
            WorkerError::Render(RenderError::RendererNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_template_is_fatal() {
        let Ok(true_bin) = which::which("true") else {
            return;
        };
        let dir = TempDir::new().unwrap();
        let config = WorkerConfig {
            template_path: dir.path().join("missing.scad"),
            ..config_in(&dir, true_bin)
        };

        let err = run_preflight(&config).await.unwrap_err();

        assert!(matches!(
            err,
            WorkerError::Render(RenderError::TemplateNotFound(_))
        ));
    }
}
