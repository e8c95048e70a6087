//! Adapter for an installed COLMAP-style multi-view stereo tool.
//!
//! The tool is driven through six blocking invocations, in order. The first
//! non-zero exit aborts the run; no stage is retried. The fused dense cloud
//! (`dense/fused.ply`) is then loaded back in process.

use crate::{Result, SfmError};
use recon_core::PointCloud;
use recon_3d::TriangleMesh;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

pub const DEFAULT_EXECUTABLE: &str = "colmap";
pub const WORKSPACE_DIR: &str = "external_workspace";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalStage {
    FeatureExtraction,
    ExhaustiveMatching,
    SparseMapping,
    ImageUndistortion,
    PatchMatchStereo,
    StereoFusion,
}

impl ExternalStage {
    pub const ALL: [ExternalStage; 6] = [
        ExternalStage::FeatureExtraction,
        ExternalStage::ExhaustiveMatching,
        ExternalStage::SparseMapping,
        ExternalStage::ImageUndistortion,
        ExternalStage::PatchMatchStereo,
        ExternalStage::StereoFusion,
    ];

    pub fn subcommand(self) -> &'static str {
        match self {
            ExternalStage::FeatureExtraction => "feature_extractor",
            ExternalStage::ExhaustiveMatching => "exhaustive_matcher",
            ExternalStage::SparseMapping => "mapper",
            ExternalStage::ImageUndistortion => "image_undistorter",
            ExternalStage::PatchMatchStereo => "patch_match_stereo",
            ExternalStage::StereoFusion => "stereo_fusion",
        }
    }

    pub fn next(self) -> Option<ExternalStage> {
        let i = Self::ALL.iter().position(|&s| s == self)?;
        Self::ALL.get(i + 1).copied()
    }

    /// Full argument list (subcommand first) for this stage in `ws`.
    pub fn args(self, ws: &ExternalWorkspace) -> Vec<OsString> {
        let mut args = vec![OsString::from(self.subcommand())];
        let mut flag = |name: &str, value: &Path| {
            args.push(OsString::from(name));
            args.push(value.as_os_str().to_owned());
        };
        match self {
            ExternalStage::FeatureExtraction => {
                flag("--database_path", &ws.database);
                flag("--image_path", &ws.images);
            }
            ExternalStage::ExhaustiveMatching => {
                flag("--database_path", &ws.database);
            }
            ExternalStage::SparseMapping => {
                flag("--database_path", &ws.database);
                flag("--image_path", &ws.images);
                flag("--output_path", &ws.sparse);
            }
            ExternalStage::ImageUndistortion => {
                flag("--image_path", &ws.images);
                flag("--input_path", &ws.sparse.join("0"));
                flag("--output_path", &ws.dense);
            }
            ExternalStage::PatchMatchStereo => {
                flag("--workspace_path", &ws.dense);
            }
            ExternalStage::StereoFusion => {
                flag("--workspace_path", &ws.dense);
                flag("--output_path", &ws.fused_ply());
            }
        }
        args
    }
}

impl fmt::Display for ExternalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subcommand())
    }
}

/// Intermediate layout of one external run, rooted inside the job directory.
#[derive(Debug, Clone)]
pub struct ExternalWorkspace {
    pub root: PathBuf,
    pub images: PathBuf,
    pub database: PathBuf,
    pub sparse: PathBuf,
    pub dense: PathBuf,
}

impl ExternalWorkspace {
    pub fn new(job_dir: &Path, images_dir: &Path) -> Self {
        let root = job_dir.join(WORKSPACE_DIR);
        Self {
            images: images_dir.to_path_buf(),
            database: root.join("database.db"),
            sparse: root.join("sparse"),
            dense: root.join("dense"),
            root,
        }
    }

    pub fn create(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.sparse)?;
        std::fs::create_dir_all(&self.dense)
    }

    pub fn fused_ply(&self) -> PathBuf {
        self.dense.join("fused.ply")
    }
}

/// Exit code and captured stderr of one tool invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn status_description(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Process-spawning seam, so the stage machine can run against a scripted tool.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &Path, args: &[OsString]) -> io::Result<CommandOutput>;

    /// Resolve `program` to an executable file, if installed.
    fn locate(&self, program: &Path) -> Option<PathBuf> {
        find_executable(program)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &Path, args: &[OsString]) -> io::Result<CommandOutput> {
        let output = Command::new(program).args(args).output()?;
        Ok(CommandOutput {
            code: output.status.code(),
            stderr: output.stderr,
        })
    }
}

/// Look `program` up as a path (when it has more than one component) or on `PATH`.
pub fn find_executable(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return is_executable(program).then(|| program.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

#[derive(Debug, Clone)]
pub struct ExternalToolConfig {
    pub executable: PathBuf,
    /// Bytes of stderr kept in a stage failure.
    pub stderr_tail: usize,
}

impl Default for ExternalToolConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(DEFAULT_EXECUTABLE),
            stderr_tail: 2048,
        }
    }
}

impl ExternalToolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }
}

/// What the external tool produced: a mesh, or a fused cloud still to be surfaced.
#[derive(Debug, Clone)]
pub enum ExternalModel {
    Mesh(TriangleMesh),
    PointCloud(PointCloud),
}

impl ExternalModel {
    pub fn num_points(&self) -> usize {
        match self {
            ExternalModel::Mesh(mesh) => mesh.num_vertices(),
            ExternalModel::PointCloud(cloud) => cloud.len(),
        }
    }
}

/// High-quality reconstruction path as seen by the pipeline selector.
pub trait ExternalPipeline: Send + Sync {
    fn is_available(&self) -> bool;

    fn reconstruct(&self, images_dir: &Path, job_dir: &Path) -> Result<ExternalModel>;
}

pub struct ExternalPipelineAdapter<R: CommandRunner = SystemCommandRunner> {
    config: ExternalToolConfig,
    runner: R,
}

impl ExternalPipelineAdapter<SystemCommandRunner> {
    pub fn new(config: ExternalToolConfig) -> Self {
        Self::with_runner(config, SystemCommandRunner)
    }
}

impl<R: CommandRunner> ExternalPipelineAdapter<R> {
    pub fn with_runner(config: ExternalToolConfig, runner: R) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &ExternalToolConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run every stage in order, stopping at the first failure.
    pub fn run_stages(&self, ws: &ExternalWorkspace) -> Result<()> {
        let mut next = ExternalStage::ALL.first().copied();
        while let Some(stage) = next {
            self.run_stage(stage, ws)?;
            next = stage.next();
        }
        Ok(())
    }

    fn run_stage(&self, stage: ExternalStage, ws: &ExternalWorkspace) -> Result<()> {
        tracing::info!(stage = %stage, "external stage started");
        let started = Instant::now();

        let output = self
            .runner
            .run(&self.config.executable, &stage.args(ws))
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    SfmError::ToolNotInstalled(self.config.executable.display().to_string())
                }
                _ => SfmError::Io(e),
            })?;

        if !output.success() {
            return Err(SfmError::StageFailed {
                stage,
                status: output.status_description(),
                stderr: stderr_tail(&output.stderr, self.config.stderr_tail),
            });
        }

        tracing::debug!(
            stage = %stage,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "external stage finished"
        );
        Ok(())
    }

    /// Load the fused output of a completed run.
    pub fn load_output(&self, ws: &ExternalWorkspace) -> Result<ExternalModel> {
        let fused = ws.fused_ply();
        if !fused.is_file() {
            return Err(SfmError::MissingOutput(fused));
        }

        let mesh = recon_io::load_ply_mesh(&fused)?;
        if mesh.vertices.is_empty() {
            return Err(SfmError::EmptyPointCloud);
        }
        tracing::debug!(
            vertices = mesh.num_vertices(),
            faces = mesh.num_faces(),
            "external output loaded"
        );

        if mesh.faces.is_empty() {
            Ok(ExternalModel::PointCloud(PointCloud {
                points: mesh.vertices,
                colors: mesh.colors,
                normals: mesh.normals,
            }))
        } else {
            Ok(ExternalModel::Mesh(mesh))
        }
    }
}

impl<R: CommandRunner> ExternalPipeline for ExternalPipelineAdapter<R> {
    fn is_available(&self) -> bool {
        self.runner.locate(&self.config.executable).is_some()
    }

    fn reconstruct(&self, images_dir: &Path, job_dir: &Path) -> Result<ExternalModel> {
        let ws = ExternalWorkspace::new(job_dir, images_dir);
        ws.create()?;
        self.run_stages(&ws)?;
        self.load_output(&ws)
    }
}

/// Last `max_bytes` of `stderr`, trimmed to a char boundary.
fn stderr_tail(stderr: &[u8], max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim_end();
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        let mut stage = ExternalStage::FeatureExtraction;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen, ExternalStage::ALL);
    }

    #[test]
    fn test_stage_arguments() {
        let ws = ExternalWorkspace::new(Path::new("/job"), Path::new("/job/images"));
        let args = |stage: ExternalStage| -> Vec<String> {
            stage
                .args(&ws)
                .into_iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect()
        };

        assert_eq!(
            args(ExternalStage::FeatureExtraction),
            [
                "feature_extractor",
                "--database_path",
                "/job/external_workspace/database.db",
                "--image_path",
                "/job/images"
            ]
        );
        assert_eq!(
            args(ExternalStage::ImageUndistortion),
            [
                "image_undistorter",
                "--image_path",
                "/job/images",
                "--input_path",
                "/job/external_workspace/sparse/0",
                "--output_path",
                "/job/external_workspace/dense"
            ]
        );
        assert_eq!(
            args(ExternalStage::StereoFusion).last().map(String::as_str),
            Some("/job/external_workspace/dense/fused.ply")
        );
    }

    #[test]
    fn test_stderr_tail() {
        assert_eq!(stderr_tail(b"short\n", 100), "short");
        assert_eq!(stderr_tail(b"0123456789", 4), "6789");
        // multi-byte char straddling the cut is dropped whole
        assert_eq!(stderr_tail("aé".as_bytes(), 1), "");
    }

    #[test]
    fn test_missing_executable_not_found() {
        assert!(find_executable(Path::new("definitely-not-an-installed-tool-7f3a")).is_none());
        assert!(find_executable(Path::new("/nonexistent/dir/colmap")).is_none());
    }

    #[test]
    fn test_status_description() {
        let out = CommandOutput {
            code: Some(3),
            stderr: Vec::new(),
        };
        assert!(!out.success());
        assert_eq!(out.status_description(), "exit code 3");
        assert_eq!(CommandOutput::default().status_description(), "terminated by signal");
    }
}
