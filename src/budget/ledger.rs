//! In-memory cost accounting.
//!
//! [`CostLedger`] turns usage into money with a per-worker price table and
//! keeps running totals by project, by calendar hour and by worker. Totals live
//! for the lifetime of the ledger; hour buckets older than the retention window
//! are dropped on every `record`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::errors::LedgerError;

/// Format of hour bucket keys. Lexicographic order matches time order.
const HOUR_BUCKET_FORMAT: &str = "%Y-%m-%dT%H";

pub fn hour_bucket(at: DateTime<Utc>) -> String {
    at.format(HOUR_BUCKET_FORMAT).to_string()
}

/// Price of a worker's usage, per million units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Pricing {
    pub fn cost(&self, input_units: u64, output_units: u64) -> f64 {
        (input_units as f64 / 1_000_000.0) * self.input_per_million
            + (output_units as f64 / 1_000_000.0) * self.output_per_million
    }
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_per_million: 3.0,
            output_per_million: 15.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetLimits {
    pub project_limit: f64,
    pub hourly_limit: f64,
    /// Fraction of a limit at which a warning is raised.
    pub alert_threshold: f64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            project_limit: 25.0,
            hourly_limit: 5.0,
            alert_threshold: 0.8,
        }
    }
}

/// Running totals after a `record` call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostTotals {
    pub project_total: f64,
    pub hourly_total: f64,
    pub worker_total: f64,
}

/// Result of comparing running totals with the configured limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub allowed: bool,
    pub project_exceeded: bool,
    pub hourly_exceeded: bool,
    pub project_warning: bool,
    pub hourly_warning: bool,
    pub project_spent: f64,
    pub project_limit: f64,
    pub hourly_spent: f64,
    pub hourly_limit: f64,
}

impl BudgetStatus {
    /// The spent/limit pair that caused a denial, project limit first.
    pub fn exceeded_amounts(&self) -> Option<(f64, f64)> {
        if self.project_exceeded {
            Some((self.project_spent, self.project_limit))
        } else if self.hourly_exceeded {
            Some((self.hourly_spent, self.hourly_limit))
        } else {
            None
        }
    }
}

/// Accounting backend consulted by the budget governor.
pub trait CostBackend: Send {
    /// Price `input_units`/`output_units` for `worker`. Never fails.
    fn cost(&self, worker: &str, input_units: u64, output_units: u64) -> f64;

    fn record(&mut self, project: &str, worker: &str, cost: f64)
    -> Result<CostTotals, LedgerError>;

    fn check(&self, project: &str) -> Result<BudgetStatus, LedgerError>;
}

#[derive(Debug, Clone)]
pub struct CostLedger {
    limits: BudgetLimits,
    pricing: HashMap<String, Pricing>,
    default_pricing: Pricing,
    retention_hours: i64,
    project_totals: HashMap<String, f64>,
    hourly_totals: HashMap<String, f64>,
    worker_totals: HashMap<String, f64>,
}

impl CostLedger {
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            pricing: HashMap::new(),
            default_pricing: Pricing::default(),
            retention_hours: 48,
            project_totals: HashMap::new(),
            hourly_totals: HashMap::new(),
            worker_totals: HashMap::new(),
        }
    }

    pub fn with_pricing(mut self, pricing: HashMap<String, Pricing>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_default_pricing(mut self, pricing: Pricing) -> Self {
        self.default_pricing = pricing;
        self
    }

    pub fn with_retention_hours(mut self, hours: u32) -> Self {
        self.retention_hours = i64::from(hours.max(1));
        self
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    pub fn record_at(
        &mut self,
        project: &str,
        worker: &str,
        cost: f64,
        now: DateTime<Utc>,
    ) -> Result<CostTotals, LedgerError> {
        if !cost.is_finite() || cost < 0.0 {
            return Err(LedgerError::InvalidAmount {
                worker: worker.to_string(),
                amount: cost,
            });
        }

        let bucket = hour_bucket(now);
        let project_total = add(&mut self.project_totals, project, cost);
        let hourly_total = add(&mut self.hourly_totals, &bucket, cost);
        let worker_total = add(&mut self.worker_totals, worker, cost);

        let cutoff = now - ChronoDuration::hours(self.retention_hours);
        self.prune_hours_before(cutoff);

        debug!(project, worker, cost, project_total, hourly_total, "Recorded cost");
        Ok(CostTotals {
            project_total,
            hourly_total,
            worker_total,
        })
    }

    pub fn check_at(&self, project: &str, now: DateTime<Utc>) -> BudgetStatus {
        let project_spent = self.project_total(project);
        let hourly_spent = self
            .hourly_totals
            .get(&hour_bucket(now))
            .copied()
            .unwrap_or(0.0);

        let limits = &self.limits;
        let project_exceeded = project_spent >= limits.project_limit;
        let hourly_exceeded = hourly_spent >= limits.hourly_limit;
        let status = BudgetStatus {
            allowed: !project_exceeded && !hourly_exceeded,
            project_exceeded,
            hourly_exceeded,
            project_warning: project_spent >= limits.project_limit * limits.alert_threshold,
            hourly_warning: hourly_spent >= limits.hourly_limit * limits.alert_threshold,
            project_spent,
            project_limit: limits.project_limit,
            hourly_spent,
            hourly_limit: limits.hourly_limit,
        };

        if status.project_warning || status.hourly_warning {
            warn!(
                project,
                project_spent,
                hourly_spent,
                allowed = status.allowed,
                "Budget alert threshold reached"
            );
        }
        status
    }

    /// Drop hour buckets that started before `cutoff`. Returns how many were removed.
    pub fn prune_hours_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let cutoff = hour_bucket(cutoff);
        let before = self.hourly_totals.len();
        self.hourly_totals.retain(|bucket, _| *bucket >= cutoff);
        let removed = before - self.hourly_totals.len();
        if removed > 0 {
            debug!(removed, cutoff = %cutoff, "Pruned hour buckets");
        }
        removed
    }

    pub fn project_total(&self, project: &str) -> f64 {
        self.project_totals.get(project).copied().unwrap_or(0.0)
    }

    pub fn worker_total(&self, worker: &str) -> f64 {
        self.worker_totals.get(worker).copied().unwrap_or(0.0)
    }

    pub fn hour_total(&self, bucket: &str) -> f64 {
        self.hourly_totals.get(bucket).copied().unwrap_or(0.0)
    }

    pub fn hour_bucket_count(&self) -> usize {
        self.hourly_totals.len()
    }
}

fn add(map: &mut HashMap<String, f64>, key: &str, amount: f64) -> f64 {
    let total = map.entry(key.to_string()).or_insert(0.0);
    *total += amount;
    *total
}

impl CostBackend for CostLedger {
    fn cost(&self, worker: &str, input_units: u64, output_units: u64) -> f64 {
        self.pricing
            .get(worker)
            .unwrap_or(&self.default_pricing)
            .cost(input_units, output_units)
    }

    fn record(
        &mut self,
        project: &str,
        worker: &str,
        cost: f64,
    ) -> Result<CostTotals, LedgerError> {
        self.record_at(project, worker, cost, Utc::now())
    }

    fn check(&self, project: &str) -> Result<BudgetStatus, LedgerError> {
        Ok(self.check_at(project, Utc::now()))
    }
}
