//! Cost accounting and the budget gate in front of every phase.

pub mod governor;
pub mod ledger;

pub use governor::{BudgetDecision, BudgetGovernor, CircuitState, GovernorConfig};
pub use ledger::{BudgetLimits, BudgetStatus, CostBackend, CostLedger, CostTotals, Pricing};
