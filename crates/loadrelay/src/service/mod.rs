//! Background monitoring loop.
//!
//! One worker thread walks the enabled tenants, discovers new attachments
//! and drives each through the pipeline. Stopping sets a flag, wakes the
//! worker out of any sleep, waits a bounded time for it to exit and then
//! cancels whatever it left in flight.

pub mod collaborators;

use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use crate::error::ServiceError;
use crate::inbox::{Attachment, AttachmentSource};
use crate::model::{JobUpdate, ResultStatus};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::tenant;

pub use collaborators::{MonitorStatus, TenantConfigSource, TenantProfile};

/// Message written to jobs that were in flight when the service stopped.
pub const STOPPED_MESSAGE: &str = "Service stopped";

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Sleep when no tenant has monitoring enabled.
    pub idle_delay: Duration,
    /// Sleep after the tenant list could not be loaded.
    pub retry_delay: Duration,
    /// Interval for tenants that do not set one.
    pub default_interval: Duration,
    /// How long `stop` waits for the worker to exit.
    pub join_timeout: Duration,
    /// Age after which the daily maintenance drops stored jobs and results.
    pub retention_days: i64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            idle_delay: Duration::from_secs(30),
            retry_delay: Duration::from_secs(60),
            default_interval: Duration::from_secs(5 * 60),
            join_timeout: Duration::from_secs(10),
            retention_days: 7,
        }
    }
}

/// Everything the service works with, injected at construction.
pub struct ServiceContext {
    pub tenants: Arc<dyn TenantConfigSource>,
    pub attachments: Arc<dyn AttachmentSource>,
    pub pipeline: Arc<Pipeline>,
    pub settings: ServiceSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_pass_at: Option<DateTime<Utc>>,
    pub passes_completed: u64,
    pub tenants_monitored: Vec<String>,
    pub last_maintenance_at: Option<DateTime<Utc>>,
}

/// Outcome of one pass over the enabled tenants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub tenants_checked: usize,
    pub tenants_failed: usize,
    pub attachments_found: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    /// How long to sleep before the next pass.
    pub next_delay: Duration,
}

#[derive(Debug, Default)]
struct TenantPass {
    attachments: usize,
    succeeded: usize,
    failed: usize,
}

struct Shared {
    ctx: ServiceContext,
    status: Mutex<ServiceStatus>,
    /// Every tenant seen by a pass since start.
    monitored: Mutex<BTreeSet<String>>,
    /// UTC day of the last successful storage maintenance.
    maintained_on: Mutex<Option<NaiveDate>>,
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
    /// Dropped on stop; the disconnect wakes a sleeping worker.
    wake: Sender<()>,
    done: Receiver<()>,
}

pub struct MonitoringService {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("{} lock poisoned, recovering", what);
            poisoned.into_inner()
        }
    }
}

impl MonitoringService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            shared: Arc::new(Shared {
                ctx,
                status: Mutex::new(ServiceStatus::default()),
                monitored: Mutex::new(BTreeSet::new()),
                maintained_on: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Starts the worker thread. Returns `Ok(false)` if it was already
    /// running.
    pub fn start(&self) -> Result<bool, ServiceError> {
        let mut worker = lock(&self.worker, "worker");
        if worker.is_some() {
            warn!("Monitoring service already running");
            return Ok(false);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let (wake_tx, wake_rx) = bounded::<()>(0);
        let (done_tx, done_rx) = bounded::<()>(1);

        let shared = Arc::clone(&self.shared);
        let worker_cancel = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name("loadrelay-monitor".into())
            .spawn(move || {
                shared.run_loop(&worker_cancel, &wake_rx);
                let _ = done_tx.send(());
            })
            .map_err(|e| ServiceError::SpawnFailed(e.to_string()))?;

        {
            let mut status = lock(&self.shared.status, "status");
            status.running = true;
            status.started_at = Some(Utc::now());
        }
        *worker = Some(Worker {
            handle,
            cancel,
            wake: wake_tx,
            done: done_rx,
        });
        info!("Monitoring service started");
        Ok(true)
    }

    /// Stops the worker and cancels in-flight jobs of every monitored tenant.
    /// Returns whether the worker exited within the join timeout.
    pub fn stop(&self) -> bool {
        let Some(worker) = lock(&self.worker, "worker").take() else {
            warn!("Monitoring service is not running");
            return true;
        };

        info!("Stopping monitoring service...");
        worker.cancel.store(true, Ordering::Release);
        drop(worker.wake);

        let timeout = self.shared.ctx.settings.join_timeout;
        let exited = match worker.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        };
        if exited {
            if worker.handle.join().is_err() {
                error!("Monitoring worker panicked");
            }
        } else {
            warn!(
                "Monitoring worker did not exit within {:?}, detaching it",
                timeout
            );
        }

        self.shared.cancel_in_flight();
        lock(&self.shared.status, "status").running = false;
        info!("Monitoring service stopped");
        exited
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker, "worker").is_some()
    }

    pub fn status(&self) -> ServiceStatus {
        lock(&self.shared.status, "status").clone()
    }

    /// Runs a single pass on the calling thread.
    pub fn run_once(&self) -> Result<PassSummary, ServiceError> {
        self.shared.run_pass(&AtomicBool::new(false))
    }
}

impl Drop for MonitoringService {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

impl Shared {
    fn settings(&self) -> &ServiceSettings {
        &self.ctx.settings
    }

    fn run_loop(&self, cancel: &AtomicBool, wake: &Receiver<()>) {
        info!("Monitoring loop started");
        while !cancel.load(Ordering::Acquire) {
            let delay = match self.run_pass(cancel) {
                Ok(summary) => summary.next_delay,
                Err(e) => {
                    error!("Monitoring pass failed: {}", e);
                    self.settings().retry_delay
                }
            };
            if !sleep(cancel, wake, delay) {
                break;
            }
        }
        info!("Monitoring loop stopped");
    }

    fn run_pass(&self, cancel: &AtomicBool) -> Result<PassSummary, ServiceError> {
        let _pass = info_span!("monitor_pass").entered();
        let tenants = self.ctx.tenants.list_enabled_tenants()?;
        let settings = self.settings();

        self.maintain_storage();
        self.recover_session_jobs(&tenants);

        let mut summary = PassSummary {
            next_delay: settings.idle_delay,
            ..PassSummary::default()
        };
        if tenants.is_empty() {
            debug!("No tenants have monitoring enabled");
            self.finish_pass(&tenants);
            return Ok(summary);
        }

        let now = Utc::now();
        for profile in &tenants {
            if cancel.load(Ordering::Acquire) {
                break;
            }
            if !profile.is_due(now, settings.default_interval) {
                debug!("Skipping {}: checked recently", profile.tenant_key);
                continue;
            }

            summary.tenants_checked += 1;
            let key = tenant::storage_key(&profile.tenant_key);
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| self.process_tenant(&key, profile, cancel)));
            match outcome {
                Ok(Ok(pass)) => {
                    summary.attachments_found += pass.attachments;
                    summary.jobs_succeeded += pass.succeeded;
                    summary.jobs_failed += pass.failed;
                }
                Ok(Err(e)) => {
                    error!("Tenant {} failed: {}", key, e);
                    summary.tenants_failed += 1;
                    self.record(&key, MonitorStatus::Error);
                }
                Err(_) => {
                    error!("Tenant {} panicked during processing", key);
                    summary.tenants_failed += 1;
                    self.record(&key, MonitorStatus::Error);
                }
            }
        }

        self.finish_pass(&tenants);
        summary.next_delay = tenants
            .iter()
            .map(|t| t.check_interval(settings.default_interval))
            .min()
            .unwrap_or(settings.default_interval);
        Ok(summary)
    }

    fn process_tenant(
        &self,
        key: &str,
        profile: &TenantProfile,
        cancel: &AtomicBool,
    ) -> Result<TenantPass, ServiceError> {
        let _tenant = info_span!("tenant", tenant = %key).entered();
        self.record(key, MonitorStatus::Active);

        let attachments = self
            .ctx
            .attachments
            .find_new_attachments(key, &profile.filter)
            .map_err(|source| ServiceError::Discovery {
                tenant: key.to_string(),
                source,
            })?;
        let mut pass = TenantPass {
            attachments: attachments.len(),
            ..TenantPass::default()
        };
        if attachments.is_empty() {
            debug!("No new attachments");
            return Ok(pass);
        }
        info!("{} new attachments", attachments.len());

        // One pending job per attachment before any processing starts, so
        // readers see the whole batch queued.
        let storage = self.ctx.pipeline.storage();
        let mut queued = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            match storage.create_job(
                &attachment.filename,
                key,
                &attachment.sender,
                attachment.size(),
                &attachment.mime_type,
            ) {
                Some(job) => queued.push((job, attachment)),
                None => warn!(
                    "Could not store a job for {}, leaving it for the next pass",
                    attachment.filename
                ),
            }
        }

        let config = PipelineConfig::from_profile(profile);
        for (job, attachment) in queued {
            if cancel.load(Ordering::Acquire) {
                info!("Stop requested, leaving remaining attachments queued");
                break;
            }
            let result = self.ctx.pipeline.run(job, &attachment, &config);
            match result.overall_status {
                ResultStatus::Success | ResultStatus::PartialSuccess => pass.succeeded += 1,
                ResultStatus::Failed | ResultStatus::Cancelled => pass.failed += 1,
            }
            self.acknowledge(key, &attachment);
        }
        Ok(pass)
    }

    /// Consolidates tenant keys and drops expired records, at most once per
    /// UTC day. A failed run is retried on the next pass.
    fn maintain_storage(&self) {
        let today = Utc::now().date_naive();
        let mut maintained_on = lock(&self.maintained_on, "maintenance");
        if *maintained_on == Some(today) {
            return;
        }

        let storage = self.ctx.pipeline.storage();
        let Some(report) = storage.run_maintenance(self.settings().retention_days) else {
            return;
        };
        info!(
            merged = report.tenant_keys_merged,
            jobs_removed = report.cleanup.jobs_removed,
            results_removed = report.cleanup.results_removed,
            "Storage maintenance finished"
        );
        *maintained_on = Some(today);
        lock(&self.status, "status").last_maintenance_at = Some(Utc::now());
    }

    /// Moves jobs written to the fallback store during an outage back into
    /// shared storage once it is healthy again.
    fn recover_session_jobs(&self, tenants: &[TenantProfile]) {
        let storage = self.ctx.pipeline.storage();
        if !storage.storage_health(false).is_healthy() {
            return;
        }
        for profile in tenants {
            let key = tenant::storage_key(&profile.tenant_key);
            if !storage.migrate_session_to_shared(&key) {
                warn!("Session jobs for {} stay in the fallback store", key);
            }
        }
    }

    fn acknowledge(&self, key: &str, attachment: &Attachment) {
        if let Err(e) = self.ctx.attachments.acknowledge(key, attachment) {
            warn!("Failed to acknowledge {}: {}", attachment.filename, e);
        }
    }

    fn record(&self, key: &str, status: MonitorStatus) {
        if let Err(e) = self.ctx.tenants.record_check(key, status) {
            warn!("Failed to record {} for {}: {}", status, key, e);
        }
    }

    fn finish_pass(&self, tenants: &[TenantProfile]) {
        let mut monitored = lock(&self.monitored, "monitored tenants");
        monitored.extend(tenants.iter().map(|t| tenant::storage_key(&t.tenant_key)));

        let mut status = lock(&self.status, "status");
        status.last_pass_at = Some(Utc::now());
        status.passes_completed += 1;
        status.tenants_monitored = monitored.iter().cloned().collect();
    }

    /// Marks every active job of every monitored tenant cancelled and
    /// records the tenants as stopped.
    fn cancel_in_flight(&self) {
        let mut tenants = lock(&self.monitored, "monitored tenants").clone();
        match self.ctx.tenants.list_enabled_tenants() {
            Ok(enabled) => {
                tenants.extend(enabled.iter().map(|t| tenant::storage_key(&t.tenant_key)))
            }
            Err(e) => warn!("Could not list tenants while stopping: {}", e),
        }

        let storage = self.ctx.pipeline.storage();
        let update = JobUpdate::cancelled(STOPPED_MESSAGE);
        for key in &tenants {
            let active = storage.get_active_jobs(key);
            if !active.is_empty() {
                info!("Cancelling {} in-flight jobs for {}", active.len(), key);
            }
            for job in active {
                if !storage.update_job(&job.job_id, key, &update) {
                    warn!("Could not cancel job {}", job.job_id);
                }
            }
            self.record(key, MonitorStatus::Stopped);
        }
    }
}

/// Sleeps for `duration` unless stopped first. Returns whether to continue.
fn sleep(cancel: &AtomicBool, wake: &Receiver<()>, duration: Duration) -> bool {
    if cancel.load(Ordering::Acquire) {
        return false;
    }
    match wake.recv_timeout(duration) {
        Ok(()) | Err(RecvTimeoutError::Timeout) => !cancel.load(Ordering::Acquire),
        Err(RecvTimeoutError::Disconnected) => false,
    }
}
