//! The `aicg` operational binary.
//!
//! Exit codes: 0 success, 1 generic failure, 2 configuration error,
//! 3 dependency unreachable.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use aicg_engine::{
    parse_kinds, EngineConfig, EngineContext, Executor, SubmitOptions, Sweeper, VideoSpec,
};
use aicg_models::{ChapterId, JobState, ModelSelection, Stage};
use aicg_queue::{ProgressChannel, TaskQueue};

const EXIT_GENERIC: i32 = 1;
const EXIT_CONFIG: i32 = 2;
const EXIT_DEPENDENCY: i32 = 3;

#[derive(Parser)]
#[command(name = "aicg", about = "AI video production pipeline core", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP controller.
    Serve {
        #[arg(long, default_value_t = 8080, env = "PORT")]
        port: u16,
    },
    /// Run a task worker process.
    Worker {
        /// Comma-separated task kinds to consume (default: all).
        #[arg(long)]
        kinds: Option<String>,
        /// Blanket concurrency override for provider-bound kinds.
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Run the polling sweeper.
    Sweeper,
    /// Apply schema migrations.
    Migrate,
    /// One-shot chapter assembly, for debugging.
    Compose {
        #[arg(long)]
        chapter: String,
    },
}

fn init_tracing() {
    // LOG_LEVEL is the documented knob; RUST_LOG still wins when set.
    let filter = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("LOG_LEVEL").map(|level| format!("aicg={level}")))
        .unwrap_or_else(|_| "aicg=info".to_string());
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::new(filter))
        .init();
}

#[tokio::main]
async fn main() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let code = run(cli).await;
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    match cli.command {
        Command::Migrate => migrate().await,
        Command::Serve { port } => serve(port).await,
        Command::Worker { kinds, concurrency } => worker(kinds, concurrency).await,
        Command::Sweeper => sweeper().await,
        Command::Compose { chapter } => compose(&chapter).await,
    }
}

/// Build the shared context, mapping failures to the documented exit
/// codes via `Err(code)`.
async fn build_context(config: EngineConfig) -> Result<EngineContext, i32> {
    let pool = match aicg_repo::connect_from_env().await {
        Ok(pool) => pool,
        Err(aicg_repo::RepoError::Validation(msg)) => {
            error!("configuration error: {msg}");
            return Err(EXIT_CONFIG);
        }
        Err(e) => {
            error!("database unreachable: {e}");
            return Err(EXIT_DEPENDENCY);
        }
    };

    let blob = match aicg_storage::BlobStore::from_env().await {
        Ok(blob) => blob,
        Err(aicg_storage::StorageError::Config(msg)) => {
            error!("configuration error: {msg}");
            return Err(EXIT_CONFIG);
        }
        Err(e) => {
            error!("blob store client failed: {e}");
            return Err(EXIT_DEPENDENCY);
        }
    };

    let queue = match TaskQueue::from_env() {
        Ok(queue) => Arc::new(queue),
        Err(e) => {
            error!("queue client failed: {e}");
            return Err(EXIT_CONFIG);
        }
    };

    let progress = match ProgressChannel::from_env() {
        Ok(progress) => progress,
        Err(e) => {
            error!("progress channel failed: {e}");
            return Err(EXIT_CONFIG);
        }
    };

    let ctx = EngineContext::new(pool, blob, queue, progress, config);

    // Fail fast when a dependency is down rather than limping along.
    if let Err(e) = aicg_repo::check_connectivity(&ctx.pool).await {
        error!("database unreachable: {e}");
        return Err(EXIT_DEPENDENCY);
    }
    if let Err(e) = ctx.queue.check_connectivity().await {
        error!("queue unreachable: {e}");
        return Err(EXIT_DEPENDENCY);
    }
    if let Err(e) = ctx.blob.check_connectivity().await {
        error!("blob store unreachable: {e}");
        return Err(EXIT_DEPENDENCY);
    }

    Ok(ctx)
}

async fn migrate() -> i32 {
    let pool = match aicg_repo::connect_from_env().await {
        Ok(pool) => pool,
        Err(aicg_repo::RepoError::Validation(msg)) => {
            error!("configuration error: {msg}");
            return EXIT_CONFIG;
        }
        Err(e) => {
            error!("database unreachable: {e}");
            return EXIT_DEPENDENCY;
        }
    };
    match aicg_repo::migrate(&pool).await {
        Ok(()) => {
            info!("migrations applied");
            0
        }
        Err(e) => {
            error!("migration failed: {e}");
            EXIT_GENERIC
        }
    }
}

async fn serve(port: u16) -> i32 {
    let ctx = match build_context(EngineConfig::from_env()).await {
        Ok(ctx) => ctx,
        Err(code) => return code,
    };

    let service: aicg_api::SharedService = Arc::new(ctx);
    let app = aicg_api::router(service);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "serving HTTP controller");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            return EXIT_GENERIC;
        }
    };

    match axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
        })
        .await
    {
        Ok(()) => 0,
        Err(e) => {
            error!("server error: {e}");
            EXIT_GENERIC
        }
    }
}

async fn worker(kinds: Option<String>, concurrency: Option<usize>) -> i32 {
    let kinds = match kinds.as_deref().map(parse_kinds).transpose() {
        Ok(kinds) => kinds.unwrap_or_default(),
        Err(e) => {
            error!("configuration error: {e}");
            return EXIT_CONFIG;
        }
    };
    let config = EngineConfig::from_env()
        .with_kinds(kinds)
        .with_concurrency_override(concurrency);

    let ctx = match build_context(config).await {
        Ok(ctx) => ctx,
        Err(code) => return code,
    };

    // Prometheus metrics for the worker fleet.
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new().install() {
        error!("failed to install metrics exporter: {e}");
    }

    let executor = Executor::new(ctx);
    let shutdown = executor.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        let _ = shutdown.send(true);
    });

    match executor.run().await {
        Ok(()) => 0,
        Err(e) => {
            error!("executor error: {e}");
            EXIT_GENERIC
        }
    }
}

async fn sweeper() -> i32 {
    let ctx = match build_context(EngineConfig::from_env()).await {
        Ok(ctx) => ctx,
        Err(code) => return code,
    };
    Sweeper::new(ctx).run().await;
    0
}

/// One-shot assembly: submit a compose job and follow it to the end.
async fn compose(chapter: &str) -> i32 {
    let chapter_id = match ChapterId::parse(chapter) {
        Ok(id) => id,
        Err(_) => {
            error!("invalid chapter id: {chapter}");
            return EXIT_CONFIG;
        }
    };

    let ctx = match build_context(EngineConfig::from_env()).await {
        Ok(ctx) => ctx,
        Err(code) => return code,
    };

    let job = match aicg_engine::submit_job(
        &ctx,
        chapter_id,
        Stage::ComposeVideo,
        ModelSelection::default(),
        SubmitOptions {
            video_spec: Some(VideoSpec::default()),
            ..Default::default()
        },
    )
    .await
    {
        Ok(job) => job,
        Err(e) => {
            error!("failed to submit compose job: {e}");
            return EXIT_GENERIC;
        }
    };
    info!(job_id = %job.id, "compose job submitted");

    // The assembly task still needs a worker; run one scoped to this
    // process so `compose` works standalone.
    let worker_ctx = ctx.clone();
    let executor = Executor::new(worker_ctx);
    let shutdown = executor.shutdown_handle();
    let worker = tokio::spawn(async move { executor.run().await });

    let code = loop {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let job = match ctx.repos.jobs.get(job.id).await {
            Ok(job) => job,
            Err(e) => {
                error!("failed to poll job: {e}");
                break EXIT_GENERIC;
            }
        };
        if job.state.is_terminal() {
            match job.state {
                JobState::Success => {
                    info!(result = ?job.result_ref, "compose finished");
                    break 0;
                }
                _ => {
                    error!(
                        state = %job.state,
                        error = job.error.as_deref().unwrap_or("unknown"),
                        "compose did not succeed"
                    );
                    break EXIT_GENERIC;
                }
            }
        }
    };

    let _ = shutdown.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(30), worker).await;
    code
}
