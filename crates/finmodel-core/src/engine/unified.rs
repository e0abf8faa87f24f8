//! Unified calculation engine.
//!
//! All statements (P&L, BS, CF, carbon) are calculated in a single pass
//! over one template: the unified dependency graph determines the order,
//! so formulas may reference any other line item as long as no intra-period
//! cycle forms. Working-capital deltas and cash roll-ups fall out of the
//! ordering naturally instead of being staged across separate engines.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::engine::validation::{RuleSeverity, ValidationRuleEngine};
use crate::formula::FormulaEvaluator;
use crate::providers::statement::SharedValues;
use crate::providers::{
    DriverValueProvider, FxValueProvider, StatementValueProvider, TaxStrategyRegistry,
    TaxValueProvider, ValueProvider,
};
use crate::store::ModelStore;
use crate::template::StatementTemplate;
use crate::types::{
    BalanceSheet, CashFlowView, PeriodId, PlView, ScenarioId, UnitDefinition, ValuationContext,
};
use crate::units::{FxRateProvider, UnitConverter};
use crate::FinModelResult;

/// Result of one unified calculation: every line item's value plus the
/// collected errors and warnings.
#[derive(Debug, Clone, Default)]
pub struct UnifiedResult {
    pub values: BTreeMap<String, f64>,
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl UnifiedResult {
    /// Value for a line item, 0.0 when absent.
    pub fn get_value(&self, code: &str) -> f64 {
        self.values.get(code).copied().unwrap_or(0.0)
    }

    pub fn has_value(&self, code: &str) -> bool {
        self.values.contains_key(code)
    }

    /// Balance sheet view: all line items plus the canonical total slots.
    pub fn extract_balance_sheet(&self) -> BalanceSheet {
        BalanceSheet::from_line_items(self.values.clone())
    }

    /// P&L view (presentational).
    pub fn extract_pl_view(&self) -> PlView {
        PlView {
            revenue: self.get_value("REVENUE"),
            ebitda: self.get_value("EBITDA"),
            ebit: self.get_value("EBIT"),
            ebt: self.get_value("EBT"),
            net_income: self.get_value("NET_INCOME"),
            line_items: self.values.clone(),
        }
    }

    /// Cash flow view (presentational).
    pub fn extract_cash_flow_view(&self) -> CashFlowView {
        CashFlowView {
            cf_operating: self.get_value("CASH_FLOW_OPERATING"),
            cf_investing: self.get_value("CASH_FLOW_INVESTING"),
            cf_financing: self.get_value("CASH_FLOW_FINANCING"),
            cf_net: self.get_value("CASH_FLOW_NET"),
            cash_beginning: self.get_value("CASH_BEGINNING"),
            cash_ending: self.get_value("CASH_ENDING"),
            line_items: self.values.clone(),
        }
    }

    /// Carbon line items: the well-known scope/emission codes plus any
    /// code mentioning SCOPE, EMISSIONS or CARBON.
    pub fn extract_carbon_values(&self) -> BTreeMap<String, f64> {
        const CARBON_CODES: &[&str] = &[
            "SCOPE1_TOTAL",
            "SCOPE1_STATIONARY",
            "SCOPE1_MOBILE",
            "SCOPE1_PROCESS",
            "SCOPE1_FUGITIVE",
            "SCOPE2_TOTAL",
            "SCOPE2_ELECTRICITY",
            "SCOPE2_STEAM",
            "SCOPE3_TOTAL",
            "SCOPE3_UPSTREAM",
            "SCOPE3_DOWNSTREAM",
            "SCOPE3_OTHER",
            "GROSS_EMISSIONS",
            "CARBON_REMOVALS",
            "CARBON_OFFSETS",
            "NET_EMISSIONS",
            "EMISSIONS_INTENSITY_REVENUE",
            "BIOGENIC_EMISSIONS",
        ];

        let mut carbon = BTreeMap::new();
        for code in CARBON_CODES {
            if let Some(&value) = self.values.get(*code) {
                carbon.insert(code.to_string(), value);
            }
        }
        for (code, &value) in &self.values {
            if code.contains("SCOPE") || code.contains("EMISSIONS") || code.contains("CARBON") {
                carbon.insert(code.clone(), value);
            }
        }
        carbon
    }
}

/// The calculation kernel for one scenario.
///
/// Holds the provider set and shared current-period map; not meant to be
/// shared across scenarios running concurrently (construct one engine per
/// scenario).
pub struct UnifiedEngine {
    store: Rc<dyn ModelStore>,
    evaluator: FormulaEvaluator,
    current_values: SharedValues,
    statement_provider: StatementValueProvider,
    fx_provider: FxValueProvider,
    tax_provider: TaxValueProvider,
    validation_engine: ValidationRuleEngine,
    unit_definitions: Vec<UnitDefinition>,
}

impl UnifiedEngine {
    pub fn new(store: Rc<dyn ModelStore>) -> FinModelResult<Self> {
        let current_values: SharedValues = Rc::new(RefCell::new(BTreeMap::new()));
        let statement_provider =
            StatementValueProvider::new(current_values.clone()).with_history(store.clone());
        let fx_provider = FxValueProvider::new(store.clone());
        let tax_provider =
            TaxValueProvider::new(TaxStrategyRegistry::with_defaults(), current_values.clone());
        let validation_engine = ValidationRuleEngine::new(store.clone());
        let unit_definitions = store.unit_definitions()?;

        Ok(Self {
            store,
            evaluator: FormulaEvaluator::new(),
            current_values,
            statement_provider,
            fx_provider,
            tax_provider,
            validation_engine,
            unit_definitions,
        })
    }

    /// Replace the default tax strategy registry.
    pub fn set_tax_registry(&mut self, registry: TaxStrategyRegistry) {
        self.tax_provider = TaxValueProvider::new(registry, self.current_values.clone());
    }

    /// Calculate all line items of a template for one period.
    ///
    /// Failures are reported through the result: `success` is false and
    /// the error list names the failing component and code, while the
    /// value map retains everything computed up to the failure.
    pub fn calculate(
        &mut self,
        entity_id: &str,
        scenario_id: ScenarioId,
        period_id: PeriodId,
        opening_bs: &BalanceSheet,
        template_code: &str,
    ) -> UnifiedResult {
        let mut result = UnifiedResult {
            success: true,
            ..Default::default()
        };

        debug!(template_code, scenario_id, period_id, "unified calculation start");

        // Bind context and prime the opening map
        self.statement_provider.set_context(entity_id, scenario_id);
        self.statement_provider.clear_current_values();
        self.statement_provider
            .set_opening_values(opening_bs.line_items.clone());

        // Load the template and compute its calculation order
        let mut template = match self.store.load_template(template_code) {
            Ok(Some(template)) => template,
            Ok(None) => {
                result.success = false;
                result
                    .errors
                    .push(format!("UnifiedEngine: template not found: {template_code}"));
                return result;
            }
            Err(e) => {
                result.success = false;
                result
                    .errors
                    .push(format!("UnifiedEngine: failed to load template {template_code}: {e}"));
                return result;
            }
        };

        if let Err(e) = template.compute_calculation_order() {
            result.success = false;
            result
                .errors
                .push(format!("UnifiedEngine: failed to compute calculation order: {e}"));
            return result;
        }

        if template.line_items.is_empty() {
            result.success = false;
            result
                .errors
                .push(format!("UnifiedEngine: template {template_code} has no line items"));
            return result;
        }

        // Scenario-scoped conversion stack for the driver provider
        let driver_provider = match self.build_driver_provider(entity_id, scenario_id, period_id) {
            Ok(provider) => provider,
            Err(e) => {
                result.success = false;
                result
                    .errors
                    .push(format!("UnifiedEngine: failed to initialise providers: {e}"));
                return result;
            }
        };
        driver_provider.load_template_mappings(&template);

        let ctx = ValuationContext::new(scenario_id, period_id, entity_id);
        let providers: [&dyn ValueProvider; 4] = [
            &driver_provider,
            &self.statement_provider,
            &self.fx_provider,
            &self.tax_provider,
        ];

        // Sweep in dependency order, publishing as we go so later
        // formulas see earlier results
        for code in template.calculation_order.clone() {
            let Some(item) = template.line_item(&code) else {
                result.success = false;
                result
                    .errors
                    .push(format!("UnifiedEngine: line item '{code}' not found in template"));
                return result;
            };

            let value = match &item.formula {
                Some(formula) => {
                    match self.evaluator.evaluate(formula, &providers, &ctx) {
                        Ok(value) => value,
                        Err(e) => {
                            warn!(code = %code, error = %e, "line item evaluation failed");
                            result.success = false;
                            result.errors.push(format!(
                                "UnifiedEngine: failed to calculate '{code}': {e}"
                            ));
                            return result;
                        }
                    }
                }
                // Unformulated: first claiming provider wins, default 0.0.
                // Values arrive already signed; the sign convention is
                // presentation metadata and is not applied here.
                None => {
                    let mut resolved = None;
                    for provider in &providers {
                        if provider.has_value(&code) {
                            match provider.get_value(&code, &ctx) {
                                Ok(value) => resolved = Some(value),
                                Err(e) => {
                                    result.success = false;
                                    result.errors.push(format!(
                                        "UnifiedEngine: failed to resolve '{code}': {e}"
                                    ));
                                    return result;
                                }
                            }
                            break;
                        }
                    }
                    resolved.unwrap_or(0.0)
                }
            };

            result.values.insert(code.clone(), value);
            self.statement_provider.publish(&code, value);
        }

        // Data-driven validation over the same provider chain and context
        if let Err(e) = self.validation_engine.load_rules_for_template(template_code) {
            result.success = false;
            result
                .errors
                .push(format!("ValidationRuleEngine: failed to load rules: {e}"));
            return result;
        }

        let rule_results = self.validation_engine.execute_rules(
            &result.values,
            &self.evaluator,
            &providers,
            &ctx,
        );
        for rule_result in &rule_results {
            if rule_result.passed {
                continue;
            }
            match rule_result.severity {
                RuleSeverity::Error => result.errors.push(rule_result.message.clone()),
                RuleSeverity::Warning => result.warnings.push(rule_result.message.clone()),
            }
        }
        if ValidationRuleEngine::has_errors(&rule_results) {
            result.success = false;
        }

        debug!(
            template_code,
            scenario_id,
            period_id,
            line_items = result.values.len(),
            success = result.success,
            "unified calculation finished"
        );
        result
    }

    fn build_driver_provider(
        &self,
        entity_id: &str,
        scenario_id: ScenarioId,
        period_id: PeriodId,
    ) -> FinModelResult<DriverValueProvider> {
        let converter = if self.unit_definitions.is_empty() {
            None
        } else {
            let fx = Rc::new(FxRateProvider::from_store(self.store.as_ref(), scenario_id)?);
            Some(Rc::new(UnitConverter::new(
                self.unit_definitions.clone(),
                Some(fx),
            )?))
        };

        let provider = DriverValueProvider::new(self.store.clone(), converter);
        provider.set_context(entity_id, scenario_id, period_id);
        Ok(provider)
    }
}
