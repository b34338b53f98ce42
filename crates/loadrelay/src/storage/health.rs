//! Rolling health records for the storage backends.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Primary,
    Fallback,
}

/// Health of one backend. Available exactly when `error_count` is zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageHealthStatus {
    pub backend: String,
    pub available: bool,
    pub last_check: Option<DateTime<Utc>>,
    /// Consecutive failures since the last success.
    pub error_count: u32,
    pub last_error: Option<String>,
    pub performance_ms: Option<f64>,
    pub data_count: Option<usize>,
}

impl StorageHealthStatus {
    fn new(backend: &str) -> Self {
        Self {
            backend: backend.to_string(),
            available: true,
            last_check: None,
            error_count: 0,
            last_error: None,
            performance_ms: None,
            data_count: None,
        }
    }

    fn succeed(&mut self) {
        self.available = true;
        self.error_count = 0;
    }

    fn fail(&mut self, error: &StorageError) {
        self.available = false;
        self.error_count = self.error_count.saturating_add(1);
        self.last_error = Some(error.to_string());
    }
}

/// Outcome of probing a backend once.
#[derive(Debug)]
pub(crate) struct ProbeOutcome {
    pub result: Result<usize, StorageError>,
    pub elapsed: Duration,
}

/// Whole-report copy handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub primary: StorageHealthStatus,
    pub fallback: Option<StorageHealthStatus>,
    pub checked_at: Option<DateTime<Utc>>,
}

impl HealthReport {
    /// At least one backend can serve requests.
    pub fn is_operational(&self) -> bool {
        self.primary.available || self.fallback.as_ref().is_some_and(|f| f.available)
    }

    /// The primary backend is serving requests.
    pub fn is_healthy(&self) -> bool {
        self.primary.available
    }
}

#[derive(Debug)]
struct HealthState {
    primary: StorageHealthStatus,
    fallback: Option<StorageHealthStatus>,
    last_probe: Option<Instant>,
    checked_at: Option<DateTime<Utc>>,
    probing: bool,
}

impl HealthState {
    fn status_mut(&mut self, role: Role) -> Option<&mut StorageHealthStatus> {
        match role {
            Role::Primary => Some(&mut self.primary),
            Role::Fallback => self.fallback.as_mut(),
        }
    }
}

/// Health records for both backends behind one mutex.
///
/// Every mutation is a single critical section, and readers only ever get a
/// full copy of the report. Probes themselves run outside the lock: a caller
/// first claims the probe, runs it, then commits the outcome.
#[derive(Debug)]
pub(crate) struct HealthMonitor {
    state: Mutex<HealthState>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(primary: &str, fallback: Option<&str>, interval: Duration) -> Self {
        Self {
            state: Mutex::new(HealthState {
                primary: StorageHealthStatus::new(primary),
                fallback: fallback.map(StorageHealthStatus::new),
                last_probe: None,
                checked_at: None,
                probing: false,
            }),
            interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HealthState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Storage health lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn is_available(&self, role: Role) -> bool {
        let mut state = self.lock();
        state.status_mut(role).is_some_and(|s| s.available)
    }

    pub fn record_success(&self, role: Role) {
        if let Some(status) = self.lock().status_mut(role) {
            status.succeed();
        }
    }

    pub fn record_failure(&self, role: Role, error: &StorageError) {
        if let Some(status) = self.lock().status_mut(role) {
            status.fail(error);
        }
    }

    /// Claims the right to run a probe. Fails while another probe is in
    /// flight, and (unless forced) until the interval has elapsed. The claim
    /// is released when the returned guard is committed or dropped.
    pub fn claim_probe(&self, force: bool) -> Option<ProbeClaim<'_>> {
        let mut state = self.lock();
        if state.probing {
            return None;
        }
        let due = state
            .last_probe
            .map_or(true, |at| at.elapsed() >= self.interval);
        if !force && !due {
            return None;
        }
        state.probing = true;
        Some(ProbeClaim { monitor: self })
    }

    fn commit_probe(&self, primary: ProbeOutcome, fallback: Option<ProbeOutcome>) {
        let now = Utc::now();
        let mut state = self.lock();
        apply_probe(&mut state.primary, primary, now);
        if let (Some(status), Some(outcome)) = (state.fallback.as_mut(), fallback) {
            apply_probe(status, outcome, now);
        }
        state.last_probe = Some(Instant::now());
        state.checked_at = Some(now);
        state.probing = false;
    }

    pub fn report(&self) -> HealthReport {
        let state = self.lock();
        HealthReport {
            primary: state.primary.clone(),
            fallback: state.fallback.clone(),
            checked_at: state.checked_at,
        }
    }
}

/// An in-flight probe. Dropping it without committing, e.g. while
/// unwinding, frees the slot for the next check.
#[derive(Debug)]
pub(crate) struct ProbeClaim<'a> {
    monitor: &'a HealthMonitor,
}

impl ProbeClaim<'_> {
    pub fn commit(self, primary: ProbeOutcome, fallback: Option<ProbeOutcome>) {
        self.monitor.commit_probe(primary, fallback);
    }
}

impl Drop for ProbeClaim<'_> {
    fn drop(&mut self) {
        self.monitor.lock().probing = false;
    }
}

fn apply_probe(status: &mut StorageHealthStatus, outcome: ProbeOutcome, now: DateTime<Utc>) {
    status.last_check = Some(now);
    status.performance_ms = Some(outcome.elapsed.as_secs_f64() * 1000.0);
    match outcome.result {
        Ok(count) => {
            if !status.available {
                log::info!("Storage backend {} is available again", status.backend);
            }
            status.succeed();
            status.data_count = Some(count);
        }
        Err(e) => {
            log::warn!("Storage backend {} failed health check: {}", status.backend, e);
            status.fail(&e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(count: usize) -> ProbeOutcome {
        ProbeOutcome {
            result: Ok(count),
            elapsed: Duration::from_millis(3),
        }
    }

    fn err() -> ProbeOutcome {
        ProbeOutcome {
            result: Err(StorageError::Unavailable("down".into())),
            elapsed: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_claim_respects_interval() {
        let monitor = HealthMonitor::new("p", None, Duration::from_secs(60));
        let claim = monitor.claim_probe(false).unwrap();
        assert!(monitor.claim_probe(true).is_none(), "probe already in flight");
        claim.commit(ok(1), None);

        assert!(monitor.claim_probe(false).is_none());
        monitor.claim_probe(true).unwrap().commit(ok(1), None);
    }

    #[test]
    fn test_abandoned_claim_is_released() {
        let monitor = HealthMonitor::new("p", None, Duration::from_secs(60));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _claim = monitor.claim_probe(true).unwrap();
            panic!("probe blew up");
        }));
        assert!(result.is_err());

        let claim = monitor.claim_probe(true).expect("slot freed after unwind");
        claim.commit(ok(2), None);
        assert!(monitor.report().checked_at.is_some());
        assert_eq!(monitor.report().primary.data_count, Some(2));
    }

    #[test]
    fn test_probe_results_recorded() {
        let monitor = HealthMonitor::new("p", Some("f"), Duration::ZERO);
        monitor.claim_probe(false).unwrap().commit(err(), Some(ok(7)));

        let report = monitor.report();
        assert!(!report.primary.available);
        assert_eq!(report.primary.error_count, 1);
        assert_eq!(report.primary.last_error.as_deref(), Some("Backend unavailable: down"));
        let fallback = report.fallback.clone().unwrap();
        assert!(fallback.available);
        assert_eq!(fallback.data_count, Some(7));
        assert!(fallback.performance_ms.unwrap() > 0.0);
        assert!(report.is_operational());
        assert!(!report.is_healthy());
    }

    #[test]
    fn test_success_resets_error_count() {
        let monitor = HealthMonitor::new("p", None, Duration::ZERO);
        let e = StorageError::Unavailable("x".into());
        monitor.record_failure(Role::Primary, &e);
        monitor.record_failure(Role::Primary, &e);
        assert_eq!(monitor.report().primary.error_count, 2);
        assert!(!monitor.is_available(Role::Primary));

        monitor.record_success(Role::Primary);
        let report = monitor.report();
        assert!(report.primary.available);
        assert_eq!(report.primary.error_count, 0);
        assert!(!monitor.is_available(Role::Fallback));
    }
}
