use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use loadrelay::config::{load_config, Config, TenantRegistry};
use loadrelay::storage::JobBackend;
use loadrelay::{
    init_tracing, JobEventBroadcaster, LoadRelayError, LocalExportProcessor, LogFormat,
    MonitoringService, Pipeline, ServiceContext, SessionStore, SharedStorageBridge,
    SpoolDirectorySource, UnifiedStorage,
};

const EVENT_CAPACITY: usize = 256;

/// Watches per-tenant mail spools and turns freight shipment attachments
/// into tracked processing jobs.
#[derive(Parser, Debug)]
#[command(name = "loadrelay", version, about)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long, env = "LOADRELAY_CONFIG", default_value = "loadrelay.json")]
    config: PathBuf,

    #[arg(long, value_enum, default_value_t = LogFormat::Plain)]
    log_format: LogFormat,

    /// Run a single pass over all enabled tenants and exit.
    #[arg(long)]
    once: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting loadrelay v{}", env!("CARGO_PKG_VERSION"));

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), LoadRelayError> {
    let config = load_config(&args.config)?;
    info!(
        "Loaded configuration from {:?} ({} tenants)",
        args.config,
        config.tenants.len()
    );

    let events = JobEventBroadcaster::new(EVENT_CAPACITY);
    log_job_events(&events);

    let storage = Arc::new(build_storage(&config).with_events(events));
    let health = storage.storage_health(true);
    if !health.is_healthy() {
        warn!(
            "Shared storage unavailable at startup: {}",
            health.primary.last_error.as_deref().unwrap_or("unknown error")
        );
    }

    let processor = LocalExportProcessor::new(config.output_dir())
        .with_required_columns(config.required_columns.clone());
    let pipeline = Arc::new(Pipeline::new(storage, Arc::new(processor)));

    let service = MonitoringService::new(ServiceContext {
        tenants: Arc::new(TenantRegistry::from_config(&config)),
        attachments: Arc::new(SpoolDirectorySource::new(config.spool_dir())),
        pipeline,
        settings: config.service.settings(),
    });

    if args.once {
        let summary = service.run_once()?;
        info!(
            "Pass finished: {} tenants checked, {} failed, {} attachments, {} jobs succeeded, {} jobs failed",
            summary.tenants_checked,
            summary.tenants_failed,
            summary.attachments_found,
            summary.jobs_succeeded,
            summary.jobs_failed
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    }) {
        warn!("Failed to install signal handler: {}", e);
    }

    service.start()?;
    let _ = shutdown_rx.recv();

    info!("Shutdown requested");
    if !service.stop() {
        warn!("Monitoring worker was still busy at shutdown");
    }
    Ok(())
}

/// Shared storage as primary with the session store behind it. When the
/// shared directory cannot be opened the session store serves alone.
fn build_storage(config: &Config) -> UnifiedStorage {
    let storage = &config.storage;
    let session: Arc<dyn JobBackend> = Arc::new(SessionStore::new(storage.retention()));

    match SharedStorageBridge::open(storage.directory(), storage.bridge_options()) {
        Ok(bridge) => {
            info!("Shared storage at {:?}", bridge.dir());
            let fallback = storage.session_fallback.then_some(session);
            UnifiedStorage::new(Arc::new(bridge), fallback, storage.settings())
        }
        Err(e) => {
            warn!("Shared storage unavailable, keeping jobs in memory: {}", e);
            UnifiedStorage::new(session, None, storage.settings())
        }
    }
}

fn log_job_events(events: &JobEventBroadcaster) {
    let mut receiver = events.subscribe();
    let spawned = thread::Builder::new()
        .name("loadrelay-events".into())
        .spawn(move || loop {
            match receiver.blocking_recv() {
                Ok(event) => debug!(
                    job_id = %event.job_id,
                    tenant = %event.tenant_key,
                    kind = ?event.kind,
                    step = ?event.step,
                    progress = event.progress_percent,
                    "job event"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Job event log lagged, skipped {} events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to start job event logger: {}", e);
    }
}
