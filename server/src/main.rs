//! Reconstruction server: accepts image uploads and answers with a `.glb` model.

mod routes;

use clap::Parser;
use recon_pipeline::{JobOrchestrator, PipelineConfig, WorkspacePolicy};
use recon_sfm::ExternalToolConfig;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "recon-server")]
#[command(about = "Reconstruct textured 3D meshes from uploaded photo sets")]
#[command(version)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "RECON_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "RECON_PORT", default_value_t = 5000)]
    port: u16,

    /// Root for job workspaces (defaults to the system temp dir).
    #[arg(long, env = "RECON_TEMP_ROOT")]
    temp_root: Option<PathBuf>,

    /// External multi-view stereo executable, as a name on PATH or a path.
    #[arg(long, env = "RECON_COLMAP", default_value = "colmap")]
    colmap: PathBuf,

    /// Keep job directories after the response is sent.
    #[arg(long, env = "RECON_RETAIN_WORKSPACES")]
    retain_workspaces: bool,

    /// Worker threads for CPU-parallel stages (defaults to RECON_CPU_THREADS, then all cores).
    #[arg(long)]
    threads: Option<usize>,

    /// Largest accepted request body, in megabytes.
    #[arg(long, env = "RECON_MAX_UPLOAD_MB", default_value_t = 512)]
    max_upload_mb: usize,
}

impl Cli {
    fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default()
            .with_external(ExternalToolConfig::default().with_executable(&self.colmap))
            .with_workspace_policy(if self.retain_workspaces {
                WorkspacePolicy::Retain
            } else {
                WorkspacePolicy::Delete
            });
        if let Some(root) = &self.temp_root {
            config = config.with_temp_root(root);
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    recon_core::init_global_thread_pool(cli.threads).map_err(anyhow::Error::msg)?;

    let config = cli.pipeline_config();
    std::fs::create_dir_all(config.jobs_root())?;
    let orchestrator = Arc::new(JobOrchestrator::new(config));

    let health = orchestrator.health();
    tracing::info!(
        colmap_available = health.external_tool_available,
        temp_root = %health.temp_root.display(),
        threads = recon_core::current_cpu_threads(),
        "pipeline ready"
    );

    let app = routes::router(orchestrator, cli.max_upload_mb * 1024 * 1024);
    let bind_addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
