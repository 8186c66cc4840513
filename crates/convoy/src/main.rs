use clap::{Parser, Subcommand};
use convoy_controllers::{
    GarbageCollector, JobController, JobControllerConfig, JobHandler, MockClient,
    PodGroupController,
};
use convoy_scheduler::cache::fake::{FakeBinder, FakeEvictor, FakeRecorder, FakeStatusUpdater};
use convoy_scheduler::{
    DispatchConfig, Scheduler, SchedulerCache, SchedulerConf, SchedulerConfig, SchedulerOpts,
};
use convoy_webhook::{Config as WebhookConfig, WebhookServer};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Grace period for draining in-flight work at shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "convoy", about = "Convoy batch-workload scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler engine
    Scheduler {
        /// Seconds between scheduling passes
        #[arg(long, default_value_t = 1)]
        period: u64,
        /// Path to a YAML scheduler configuration (actions + tiers)
        #[arg(long)]
        config: Option<String>,
        /// Width of the bind dispatcher worker pool (default: CPU count)
        #[arg(long)]
        bind_workers: Option<usize>,
        /// Lower bound on the sampled node count per task
        #[arg(long, default_value_t = 100)]
        min_nodes_to_find: usize,
        /// Target node sample percentage (1-100)
        #[arg(long, default_value_t = 100)]
        percentage_of_nodes_to_find: usize,
        /// Lower bound on the sample percentage
        #[arg(long, default_value_t = 5)]
        min_percentage_of_nodes_to_find: usize,
    },
    /// Run the admission webhook manager
    Webhook {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:8443")]
        bind: String,
    },
    /// Run the lifecycle controllers (job, pod group, garbage collector)
    Controllers {
        /// Width of the job controller worker pool (default: CPU count)
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scheduler {
            period,
            config,
            bind_workers,
            min_nodes_to_find,
            percentage_of_nodes_to_find,
            min_percentage_of_nodes_to_find,
        } => {
            let conf = match config {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path).map_err(|e| {
                        miette::miette!("failed to read scheduler config '{}': {}", path, e)
                    })?;
                    SchedulerConf::parse(&raw)?
                }
                None => SchedulerConf::default(),
            };
            let opts = SchedulerOpts {
                min_nodes_to_find,
                percentage_of_nodes_to_find,
                min_percentage_of_nodes_to_find,
            };
            run_scheduler(period, conf, opts, bind_workers).await
        }
        Commands::Webhook { bind } => run_webhook(&bind).await,
        Commands::Controllers { workers } => run_controllers(workers).await,
    }
}

/// Wait for either SIGINT (ctrl-c) or SIGTERM, returning which one fired.
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

async fn run_scheduler(
    period: u64,
    conf: SchedulerConf,
    opts: SchedulerOpts,
    bind_workers: Option<usize>,
) -> miette::Result<()> {
    info!("starting convoy scheduler");
    warn!("no external cluster client configured; running against in-memory fakes");

    let (binder, _binds) = FakeBinder::new();
    let (evictor, _evictions) = FakeEvictor::new();
    let mut dispatch = DispatchConfig::default();
    if let Some(workers) = bind_workers {
        dispatch.workers = workers.max(1);
    }

    let cache = Arc::new(SchedulerCache::new(
        binder,
        evictor,
        FakeStatusUpdater::new(),
        FakeRecorder::new(),
        dispatch,
    ));

    let token = CancellationToken::new();
    let dispatcher_handles = cache.run(token.clone());

    let config = SchedulerConfig {
        schedule_period: Duration::from_secs(period.max(1)),
        conf,
        opts,
    };
    let mut scheduler = Scheduler::new(cache, config)?;

    let scheduler_token = token.clone();
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler.run(scheduler_token).await {
            error!("scheduler error: {}", e);
        }
    });

    let sig = shutdown_signal().await;
    info!("received {}, shutting down gracefully...", sig);
    token.cancel();

    let _ = tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = scheduler_handle.await;
        for handle in dispatcher_handles {
            let _ = handle.await;
        }
    })
    .await;

    info!("shutdown complete");
    Ok(())
}

async fn run_webhook(bind: &str) -> miette::Result<()> {
    info!("starting convoy webhook manager");

    let listen_addr = bind
        .parse()
        .map_err(|e| miette::miette!("invalid bind address '{}': {}", bind, e))?;

    let token = CancellationToken::new();
    let server = WebhookServer::new(WebhookConfig { listen_addr });
    let server_token = token.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run(server_token).await {
            error!("webhook server error: {}", e);
        }
    });

    let sig = shutdown_signal().await;
    info!("received {}, shutting down gracefully...", sig);
    token.cancel();

    let _ = tokio::time::timeout(SHUTDOWN_GRACE, server_handle).await;
    info!("shutdown complete");
    Ok(())
}

/// Logs the lifecycle transitions it is asked to perform. The pod-creating
/// handler belongs to the cluster integration, which is wired in separately.
struct LoggingJobHandler;

#[async_trait::async_trait]
impl JobHandler for LoggingJobHandler {
    async fn sync_job(&self, job: &convoy_core::Job) -> convoy_controllers::Result<()> {
        info!(
            job = %format!("{}/{}", job.metadata.namespace, job.metadata.name),
            "sync job"
        );
        Ok(())
    }

    async fn kill_job(&self, job: &convoy_core::Job) -> convoy_controllers::Result<()> {
        info!(
            job = %format!("{}/{}", job.metadata.namespace, job.metadata.name),
            "kill job"
        );
        Ok(())
    }
}

async fn run_controllers(workers: Option<usize>) -> miette::Result<()> {
    info!("starting convoy controllers");
    warn!("no external cluster client configured; running against in-memory fakes");

    let client = MockClient::new();
    let token = CancellationToken::new();

    let mut config = JobControllerConfig::default();
    if let Some(workers) = workers {
        config.workers = workers.max(1);
    }
    let job_controller = Arc::new(JobController::new(
        client.clone(),
        Arc::new(LoggingJobHandler),
        config,
    ));
    let mut handles = job_controller.run(token.clone());

    let pg_controller = Arc::new(PodGroupController::new(client.clone()));
    handles.push(pg_controller.run(token.clone()));

    let gc = Arc::new(GarbageCollector::new(client));
    handles.push(gc.run(token.clone()));

    let sig = shutdown_signal().await;
    info!("received {}, shutting down gracefully...", sig);
    token.cancel();

    let _ = tokio::time::timeout(SHUTDOWN_GRACE, async {
        for handle in handles {
            let _ = handle.await;
        }
    })
    .await;

    info!("shutdown complete");
    Ok(())
}
