use nalgebra::{Point3, Vector3};
use recon_core::PointCloud;
use recon_sfm::*;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Scripted stand-in for the external tool.
#[derive(Default)]
struct FakeRunner {
    /// Stage at which the tool exits non-zero.
    fail_at: Option<ExternalStage>,
    missing: bool,
    calls: Mutex<Vec<String>>,
}

impl CommandRunner for FakeRunner {
    fn run(&self, _program: &Path, args: &[OsString]) -> io::Result<CommandOutput> {
        if self.missing {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
        }
        let subcommand = args[0].to_string_lossy().into_owned();
        self.calls.lock().unwrap().push(subcommand.clone());

        if self.fail_at.map(|s| s.subcommand()) == Some(subcommand.as_str()) {
            return Ok(CommandOutput {
                code: Some(1),
                stderr: b"E: not enough images for reconstruction\n".to_vec(),
            });
        }

        if subcommand == "stereo_fusion" {
            let output = PathBuf::from(&args[args.len() - 1]);
            let cloud = PointCloud::new(vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ])
            .with_normals(vec![Vector3::z(); 3])
            .unwrap();
            let mut file = std::fs::File::create(output)?;
            recon_io::write_ply(&mut file, &cloud).map_err(|e| io::Error::other(e.to_string()))?;
        }

        Ok(CommandOutput {
            code: Some(0),
            stderr: Vec::new(),
        })
    }

    fn locate(&self, program: &Path) -> Option<PathBuf> {
        (!self.missing).then(|| program.to_path_buf())
    }
}

fn adapter(runner: FakeRunner) -> ExternalPipelineAdapter<FakeRunner> {
    ExternalPipelineAdapter::with_runner(ExternalToolConfig::default(), runner)
}

#[test]
fn test_full_run_loads_fused_cloud() {
    let job = tempfile::tempdir().unwrap();
    let images = job.path().join("images");
    std::fs::create_dir_all(&images).unwrap();

    let adapter = adapter(FakeRunner::default());
    assert!(adapter.is_available());

    let model = adapter.reconstruct(&images, job.path()).unwrap();
    match model {
        ExternalModel::PointCloud(cloud) => {
            assert_eq!(cloud.len(), 3);
            assert!(cloud.normals.is_some());
        }
        ExternalModel::Mesh(_) => panic!("fused output has no faces"),
    }

    let calls = adapter.runner().calls.lock().unwrap().clone();
    let expected: Vec<&str> = ExternalStage::ALL.iter().map(|s| s.subcommand()).collect();
    assert_eq!(calls, expected);
    assert!(job.path().join(WORKSPACE_DIR).join("sparse").is_dir());
}

#[test]
fn test_first_failure_aborts() {
    let job = tempfile::tempdir().unwrap();
    let adapter = adapter(FakeRunner {
        fail_at: Some(ExternalStage::SparseMapping),
        ..Default::default()
    });

    let err = adapter.reconstruct(&job.path().join("images"), job.path()).unwrap_err();
    match err {
        SfmError::StageFailed {
            stage,
            status,
            stderr,
        } => {
            assert_eq!(stage, ExternalStage::SparseMapping);
            assert_eq!(status, "exit code 1");
            assert!(stderr.contains("not enough images"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let calls = adapter.runner().calls.lock().unwrap().clone();
    assert_eq!(calls, ["feature_extractor", "exhaustive_matcher", "mapper"]);
}

#[test]
fn test_missing_tool_is_distinguishable() {
    let job = tempfile::tempdir().unwrap();
    let adapter = adapter(FakeRunner {
        missing: true,
        ..Default::default()
    });
    assert!(!adapter.is_available());

    let err = adapter.reconstruct(job.path(), job.path()).unwrap_err();
    assert!(matches!(err, SfmError::ToolNotInstalled(ref tool) if tool == "colmap"));
}

#[test]
fn test_fusion_without_output_file() {
    let job = tempfile::tempdir().unwrap();
    let ws = ExternalWorkspace::new(job.path(), &job.path().join("images"));
    ws.create().unwrap();

    let err = adapter(FakeRunner::default()).load_output(&ws).unwrap_err();
    assert!(matches!(err, SfmError::MissingOutput(_)));
}

#[test]
fn test_meshed_output_kept_as_mesh() {
    let job = tempfile::tempdir().unwrap();
    let ws = ExternalWorkspace::new(job.path(), &job.path().join("images"));
    ws.create().unwrap();
    std::fs::write(
        ws.fused_ply(),
        "ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\nproperty float y\n\
         property float z\nelement face 1\nproperty list uchar int vertex_indices\n\
         end_header\n0 0 0\n1 0 0\n0 1 0\n3 0 1 2\n",
    )
    .unwrap();

    let model = adapter(FakeRunner::default()).load_output(&ws).unwrap();
    assert_eq!(model.num_points(), 3);
    assert!(matches!(model, ExternalModel::Mesh(ref m) if m.num_faces() == 1));
}
