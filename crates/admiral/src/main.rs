use admiral_cache::{Cache, ClusterQueueConfig};
use admiral_core::{
    from_yaml_documents, ClusterEvent, ClusterQueue, LocalQueue, Resource, ResourceFlavor,
    Workload, WorkloadInfo,
};
use admiral_queue::Manager;
use admiral_scheduler::{
    event_channel, send_event, EventBusConfig, EventHandler, InMemoryApplier, Scheduler,
    SchedulerConfig, StatusReport,
};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "admiral", about = "Admiral workload admission and quota scheduler")]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Admit the workloads of a manifest and print the resulting status
    Run {
        /// Multi-document YAML manifest
        #[arg(long)]
        manifest: PathBuf,
        /// Longest wait between scheduling rounds in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        /// Stop after this many seconds even if workloads are still pending
        #[arg(long, env = "ADMIRAL_TIMEOUT_SECS")]
        timeout_secs: Option<u64>,
    },
    /// Validate a manifest without scheduling
    Check {
        /// Multi-document YAML manifest
        #[arg(long)]
        manifest: PathBuf,
    },
}

/// One document of a manifest
#[derive(Deserialize)]
#[serde(tag = "kind")]
enum ManifestObject {
    ResourceFlavor(ResourceFlavor),
    ClusterQueue(ClusterQueue),
    LocalQueue(LocalQueue),
    Workload(Workload),
}

#[derive(Default)]
struct Manifest {
    flavors: Vec<ResourceFlavor>,
    cluster_queues: Vec<ClusterQueue>,
    local_queues: Vec<LocalQueue>,
    workloads: Vec<Workload>,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Run {
            manifest,
            interval_ms,
            timeout_secs,
        } => run(&manifest, interval_ms, timeout_secs).await,
        Commands::Check { manifest } => check(&manifest),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Read a manifest, filling in uids and creation timestamps in document order
fn load_manifest(path: &Path) -> miette::Result<Manifest> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("Failed to read manifest '{}': {}", path.display(), e))?;
    let objects: Vec<ManifestObject> = from_yaml_documents(&data)?;

    let mut manifest = Manifest::default();
    let base = Utc::now();
    for object in objects {
        match object {
            ManifestObject::ResourceFlavor(f) => manifest.flavors.push(f),
            ManifestObject::ClusterQueue(cq) => manifest.cluster_queues.push(cq),
            ManifestObject::LocalQueue(lq) => manifest.local_queues.push(lq),
            ManifestObject::Workload(mut wl) => {
                let metadata = wl.metadata_mut();
                if metadata.uid.is_none() {
                    metadata.uid = Some(uuid::Uuid::new_v4().to_string());
                }
                if metadata.creation_timestamp.is_none() {
                    let offset = chrono::Duration::milliseconds(manifest.workloads.len() as i64);
                    wl = wl.with_creation_timestamp(base + offset);
                }
                manifest.workloads.push(wl);
            }
        }
    }
    Ok(manifest)
}

/// Validate every object of a manifest
fn check(path: &Path) -> miette::Result<()> {
    let manifest = load_manifest(path)?;

    for flavor in &manifest.flavors {
        flavor.validate()?;
    }
    for cq in &manifest.cluster_queues {
        ClusterQueueConfig::compile(cq, 0)?;
    }
    for lq in &manifest.local_queues {
        lq.validate()?;
    }
    for wl in &manifest.workloads {
        wl.validate()?;
        WorkloadInfo::new(wl)?;
    }

    info!(
        "Manifest '{}' is valid: {} flavors, {} cluster queues, {} local queues, {} workloads",
        path.display(),
        manifest.flavors.len(),
        manifest.cluster_queues.len(),
        manifest.local_queues.len(),
        manifest.workloads.len()
    );
    Ok(())
}

/// Run the handler and the scheduler over a manifest until every workload
/// is admitted, the timeout passes, or Ctrl-C
async fn run(path: &Path, interval_ms: u64, timeout_secs: Option<u64>) -> miette::Result<()> {
    let manifest = load_manifest(path)?;
    info!(
        "Loaded manifest '{}' with {} workloads",
        path.display(),
        manifest.workloads.len()
    );

    let cache = Arc::new(Cache::new());
    let queues = Arc::new(Manager::new());
    let applier = Arc::new(InMemoryApplier::new());
    for wl in &manifest.workloads {
        applier.insert(wl.clone()).await;
    }

    let token = CancellationToken::new();
    let (tx, rx) = event_channel(&EventBusConfig::default());

    // 1. Spawn event handler
    let mut handler = EventHandler::new(cache.clone(), queues.clone());
    let handler_token = token.clone();
    let handler_handle = tokio::spawn(async move {
        if let Err(e) = handler.run(rx, handler_token).await {
            error!("Event handler error: {}", e);
        }
        handler
    });

    // 2. Spawn scheduler
    let config = SchedulerConfig {
        schedule_interval: Duration::from_millis(interval_ms),
        ..Default::default()
    };
    let scheduler = Scheduler::new(cache.clone(), queues.clone(), applier.clone(), config);
    let scheduler_token = token.clone();
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler.run(scheduler_token).await {
            error!("Scheduler error: {}", e);
        }
    });

    // 3. Feed the manifest, queues before the workloads that use them
    let events = manifest
        .flavors
        .into_iter()
        .map(ClusterEvent::flavor_applied)
        .chain(manifest.cluster_queues.into_iter().map(ClusterEvent::cluster_queue_applied))
        .chain(manifest.local_queues.into_iter().map(ClusterEvent::local_queue_applied))
        .chain(manifest.workloads.into_iter().map(ClusterEvent::workload_applied));
    for event in events {
        send_event(&tx, event).await?;
    }

    // 4. Wait for all workloads to be admitted
    let deadline = timeout_secs.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));
    loop {
        if applier.pending_count().await == 0 {
            info!("All workloads admitted");
            break;
        }
        if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
            warn!(
                "Timed out with {} workloads still pending",
                applier.pending_count().await
            );
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    info!("Shutting down gracefully...");
    drop(tx);
    token.cancel();

    let shutdown_timeout = Duration::from_secs(5);
    let (handler, _) = tokio::time::timeout(shutdown_timeout, async {
        tokio::join!(handler_handle, scheduler_handle)
    })
    .await
    .map_err(|_| miette::miette!("Timed out waiting for tasks to stop"))?;
    let unqueued = handler
        .map(|h| h.unqueued_count())
        .map_err(|e| miette::miette!("Event handler task failed: {}", e))?;

    let report = StatusReport::collect(&cache, &queues, unqueued);
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| miette::miette!("Failed to serialize status report: {}", e))?;
    println!("{}", json);

    info!("Shutdown complete");
    Ok(())
}
