//! Multi-period orchestration.
//!
//! Periods within a scenario are strictly sequential: period t consumes
//! period t-1's closing balance sheet. Scenarios are independent and each
//! gets its own engine state.

use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::engine::unified::{UnifiedEngine, UnifiedResult};
use crate::store::ModelStore;
use crate::types::{BalanceSheet, CashFlowView, PeriodId, PlView, ScenarioId};

/// Results of a multi-period run: one `UnifiedResult` per period plus the
/// period-tagged error and warning accumulation.
#[derive(Debug, Clone, Default)]
pub struct MultiPeriodResults {
    pub results: Vec<UnifiedResult>,
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl MultiPeriodResults {
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.success = false;
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn extract_balance_sheets(&self) -> Vec<BalanceSheet> {
        self.results.iter().map(|r| r.extract_balance_sheet()).collect()
    }

    pub fn extract_pl_views(&self) -> Vec<PlView> {
        self.results.iter().map(|r| r.extract_pl_view()).collect()
    }

    pub fn extract_cash_flow_views(&self) -> Vec<CashFlowView> {
        self.results.iter().map(|r| r.extract_cash_flow_view()).collect()
    }
}

/// Runs unified calculations across periods and scenarios, rolling the
/// closing balance sheet into the next period's opening.
pub struct PeriodRunner {
    store: Rc<dyn ModelStore>,
    fail_fast: bool,
}

impl PeriodRunner {
    pub fn new(store: Rc<dyn ModelStore>) -> Self {
        Self {
            store,
            fail_fast: false,
        }
    }

    /// Stop at the first failing period instead of collecting all errors.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Run the given periods in order for one scenario.
    pub fn run_periods(
        &self,
        entity_id: &str,
        scenario_id: ScenarioId,
        period_ids: &[PeriodId],
        initial_bs: &BalanceSheet,
        template_code: &str,
    ) -> MultiPeriodResults {
        let mut results = MultiPeriodResults {
            success: true,
            ..Default::default()
        };

        let mut engine = match UnifiedEngine::new(self.store.clone()) {
            Ok(engine) => engine,
            Err(e) => {
                results.add_error(format!("PeriodRunner: failed to create engine: {e}"));
                return results;
            }
        };

        let mut current_bs = initial_bs.clone();

        for &period_id in period_ids {
            let unified_result =
                engine.calculate(entity_id, scenario_id, period_id, &current_bs, template_code);

            if !unified_result.success {
                results.success = false;
                for error in &unified_result.errors {
                    results.errors.push(format!("Period {period_id}: {error}"));
                }
                warn!(scenario_id, period_id, "period calculation failed");
            }
            for warning in &unified_result.warnings {
                results.warnings.push(format!("Period {period_id}: {warning}"));
            }

            // Closing balance sheet becomes the next opening
            current_bs = unified_result.extract_balance_sheet();
            let stop = self.fail_fast && !unified_result.success;
            results.results.push(unified_result);
            if stop {
                break;
            }
        }

        debug!(
            scenario_id,
            periods = results.results.len(),
            success = results.success,
            "multi-period run finished"
        );
        results
    }

    /// Run several scenarios over the same periods and initial balance
    /// sheet. Each scenario gets independent engine state.
    pub fn run_multiple_scenarios(
        &self,
        entity_id: &str,
        scenario_ids: &[ScenarioId],
        period_ids: &[PeriodId],
        initial_bs: &BalanceSheet,
        template_code: &str,
    ) -> BTreeMap<ScenarioId, MultiPeriodResults> {
        let mut all_results = BTreeMap::new();
        for &scenario_id in scenario_ids {
            let results =
                self.run_periods(entity_id, scenario_id, period_ids, initial_bs, template_code);
            all_results.insert(scenario_id, results);
        }
        all_results
    }
}

/// Minimal opening balance sheet: cash and retained earnings.
pub fn initial_balance_sheet(cash: f64, retained_earnings: f64) -> BalanceSheet {
    BalanceSheet::from_line_items(BTreeMap::from([
        ("CASH".to_string(), cash),
        ("RETAINED_EARNINGS".to_string(), retained_earnings),
        ("TOTAL_ASSETS".to_string(), cash),
        ("TOTAL_EQUITY".to_string(), retained_earnings),
        ("TOTAL_LIABILITIES".to_string(), 0.0),
    ]))
}
