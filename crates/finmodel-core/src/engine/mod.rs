//! The unified calculation kernel and its orchestration.

pub mod period_runner;
pub mod unified;
pub mod validation;

pub use period_runner::{initial_balance_sheet, MultiPeriodResults, PeriodRunner};
pub use unified::{UnifiedEngine, UnifiedResult};
pub use validation::{
    RuleSeverity, RuleType, ValidationRule, ValidationRuleEngine, ValidationRuleResult,
};
