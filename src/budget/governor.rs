//! Circuit breaker around a [`CostBackend`].
//!
//! Accounting problems must never stop the pipeline. After
//! `failure_threshold` consecutive backend errors the circuit opens and every
//! check is answered with a degraded allow until `recovery_timeout` elapses.
//! The next call then probes the backend once (half-open): success closes the
//! circuit, failure opens it again.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::ledger::{BudgetStatus, CostBackend, CostTotals};
use crate::errors::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Answer to "may the next phase run?".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetDecision {
    pub allowed: bool,
    /// The backend was not consulted or failed; `allowed` is a fail-open default.
    pub degraded: bool,
    pub status: Option<BudgetStatus>,
}

impl BudgetDecision {
    fn degraded() -> Self {
        Self {
            allowed: true,
            degraded: true,
            status: None,
        }
    }
}

pub struct BudgetGovernor {
    backend: Box<dyn CostBackend>,
    config: GovernorConfig,
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

impl BudgetGovernor {
    pub fn new(backend: Box<dyn CostBackend>, config: GovernorConfig) -> Self {
        Self {
            backend,
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn cost(&self, worker: &str, input_units: u64, output_units: u64) -> f64 {
        self.backend.cost(worker, input_units, output_units)
    }

    pub fn check(&mut self, project: &str) -> BudgetDecision {
        self.check_at(project, Instant::now())
    }

    /// Gate the next expensive call. Never fails.
    pub fn check_at(&mut self, project: &str, now: Instant) -> BudgetDecision {
        if !self.admit(now) {
            debug!(project, "Budget circuit open, allowing in degraded mode");
            return BudgetDecision::degraded();
        }

        match self.backend.check(project) {
            Ok(status) => {
                self.on_success();
                BudgetDecision {
                    allowed: status.allowed,
                    degraded: false,
                    status: Some(status),
                }
            }
            Err(e) => {
                self.on_failure(now, &e);
                BudgetDecision::degraded()
            }
        }
    }

    pub fn record(&mut self, project: &str, worker: &str, cost: f64) -> Option<CostTotals> {
        self.record_at(project, worker, cost, Instant::now())
    }

    /// Record spend through the breaker. Returns `None` when the circuit is
    /// open or the backend failed; the spend is then lost.
    pub fn record_at(
        &mut self,
        project: &str,
        worker: &str,
        cost: f64,
        now: Instant,
    ) -> Option<CostTotals> {
        if !self.admit(now) {
            warn!(project, worker, cost, "Budget circuit open, cost not recorded");
            return None;
        }

        match self.backend.record(project, worker, cost) {
            Ok(totals) => {
                self.on_success();
                Some(totals)
            }
            Err(e) => {
                self.on_failure(now, &e);
                None
            }
        }
    }

    /// Whether the backend may be called now. Moves `Open` to `HalfOpen`
    /// once the recovery timeout has passed.
    fn admit(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|opened| now.saturating_duration_since(opened))
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.recovery_timeout {
                    self.set_state(CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn on_success(&mut self) {
        self.failure_count = 0;
        if self.state == CircuitState::HalfOpen {
            self.set_state(CircuitState::Closed);
            self.opened_at = None;
        }
    }

    fn on_failure(&mut self, now: Instant, error: &LedgerError) {
        self.failure_count += 1;
        warn!(
            error = %error,
            failures = self.failure_count,
            state = %self.state,
            "Cost backend call failed"
        );
        if self.state == CircuitState::HalfOpen
            || self.failure_count >= self.config.failure_threshold
        {
            self.set_state(CircuitState::Open);
            self.opened_at = Some(now);
        }
    }

    fn set_state(&mut self, state: CircuitState) {
        if self.state != state {
            warn!(from = %self.state, to = %state, "Budget circuit state change");
            self.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::ledger::{BudgetLimits, CostLedger};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Backend whose availability is controlled from the test.
    struct FlakyBackend {
        inner: CostLedger,
        failing: Arc<AtomicBool>,
        calls: Arc<AtomicU32>,
    }

    impl CostBackend for FlakyBackend {
        fn cost(&self, worker: &str, input_units: u64, output_units: u64) -> f64 {
            self.inner.cost(worker, input_units, output_units)
        }

        fn record(
            &mut self,
            project: &str,
            worker: &str,
            cost: f64,
        ) -> Result<CostTotals, LedgerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(LedgerError::Unavailable("down".into()));
            }
            self.inner.record(project, worker, cost)
        }

        fn check(&self, project: &str) -> Result<BudgetStatus, LedgerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(LedgerError::Unavailable("down".into()));
            }
            self.inner.check(project)
        }
    }

    fn governor() -> (BudgetGovernor, Arc<AtomicBool>, Arc<AtomicU32>) {
        let failing = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicU32::new(0));
        let backend = FlakyBackend {
            inner: CostLedger::new(BudgetLimits {
                project_limit: 1.0,
                hourly_limit: 1.0,
                alert_threshold: 0.8,
            }),
            failing: failing.clone(),
            calls: calls.clone(),
        };
        (
            BudgetGovernor::new(Box::new(backend), GovernorConfig::default()),
            failing,
            calls,
        )
    }

    #[test]
    fn test_closed_circuit_passes_ledger_verdict() {
        let (mut gov, _, _) = governor();
        let decision = gov.check("shop");
        assert!(decision.allowed);
        assert!(!decision.degraded);

        gov.record("shop", "claude", 1.5).unwrap();
        let decision = gov.check("shop");
        assert!(!decision.allowed);
        assert!(!decision.degraded);
        assert!(decision.status.unwrap().project_exceeded);
    }

    #[test]
    fn test_opens_after_threshold_and_skips_backend() {
        let (mut gov, failing, calls) = governor();
        let t0 = Instant::now();
        failing.store(true, Ordering::SeqCst);

        for _ in 0..3 {
            let d = gov.check_at("shop", t0);
            assert!(d.allowed && d.degraded);
        }
        assert_eq!(gov.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let d = gov.check_at("shop", t0 + Duration::from_secs(10));
        assert!(d.allowed && d.degraded);
        assert_eq!(calls.load(Ordering::SeqCst), 3, "open circuit must not call backend");
    }

    #[test]
    fn test_half_open_success_closes() {
        let (mut gov, failing, calls) = governor();
        let t0 = Instant::now();
        failing.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            gov.check_at("shop", t0);
        }
        failing.store(false, Ordering::SeqCst);

        let d = gov.check_at("shop", t0 + Duration::from_secs(30));
        assert!(!d.degraded);
        assert_eq!(gov.state(), CircuitState::Closed);
        assert_eq!(gov.failure_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let (mut gov, failing, calls) = governor();
        let t0 = Instant::now();
        failing.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            gov.check_at("shop", t0);
        }

        let probe_time = t0 + Duration::from_secs(31);
        let d = gov.check_at("shop", probe_time);
        assert!(d.degraded);
        assert_eq!(gov.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        // Timer restarted at the failed probe
        gov.check_at("shop", probe_time + Duration::from_secs(5));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_success_resets_failure_counter() {
        let (mut gov, failing, _) = governor();
        failing.store(true, Ordering::SeqCst);
        gov.check("shop");
        gov.check("shop");
        failing.store(false, Ordering::SeqCst);
        gov.check("shop");
        assert_eq!(gov.failure_count(), 0);
        failing.store(true, Ordering::SeqCst);
        gov.check("shop");
        gov.check("shop");
        assert_eq!(gov.state(), CircuitState::Closed);
    }

    #[test]
    fn test_record_failures_trip_the_same_breaker() {
        let (mut gov, failing, _) = governor();
        failing.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            assert!(gov.record("shop", "claude", 0.1).is_none());
        }
        assert_eq!(gov.state(), CircuitState::Open);
        assert!(gov.check("shop").degraded);
    }
}
