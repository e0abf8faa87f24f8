//! Data-driven validation rule engine.
//!
//! Rules live in the store's rule catalog and are bound to templates
//! through a join table. After each calculation the engine evaluates every
//! bound rule's formula through the same provider chain and context as the
//! calculation itself, so rules may reference time-shifted values like
//! `CASH[t-1]`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::formula::FormulaEvaluator;
use crate::providers::ValueProvider;
use crate::store::ModelStore;
use crate::types::ValuationContext;
use crate::FinModelResult;

/// Rule check semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    /// Formula must evaluate to ~0 within tolerance
    Equation,
    /// Same check as `Equation`; tags cross-statement ties
    Reconciliation,
    /// Formula encodes `lhs - rhs >= 0`; values below `-tolerance` fail
    Boundary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverity {
    #[serde(alias = "WARNING")]
    Warning,
    #[serde(alias = "ERROR")]
    Error,
}

/// A validation rule from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    pub rule_code: String,
    #[serde(default)]
    pub rule_name: String,
    pub rule_type: RuleType,
    #[serde(default)]
    pub description: String,
    pub formula: String,
    /// Line items that must be present in the result for the rule to
    /// apply; `[t-...]` suffixes are ignored for the presence check
    #[serde(default)]
    pub required_line_items: Vec<String>,
    #[serde(default)]
    pub tolerance: f64,
    pub severity: RuleSeverity,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Outcome of one rule execution.
#[derive(Debug, Clone)]
pub struct ValidationRuleResult {
    pub rule_code: String,
    pub rule_name: String,
    pub passed: bool,
    pub severity: RuleSeverity,
    pub message: String,
    pub calculated_value: f64,
    pub tolerance: f64,
}

/// Executes the rule catalog against calculation results.
pub struct ValidationRuleEngine {
    store: Rc<dyn ModelStore>,
    rules: Vec<ValidationRule>,
}

impl ValidationRuleEngine {
    pub fn new(store: Rc<dyn ModelStore>) -> Self {
        Self {
            store,
            rules: Vec::new(),
        }
    }

    /// Load the enabled, active rules bound to a template.
    pub fn load_rules_for_template(&mut self, template_code: &str) -> FinModelResult<()> {
        self.rules = self.store.rules_for_template(template_code)?;
        Ok(())
    }

    pub fn rules(&self) -> &[ValidationRule] {
        &self.rules
    }

    /// Run every loaded rule. Rules whose required line items are missing
    /// from the result are skipped entirely (no pass, no fail).
    pub fn execute_rules(
        &self,
        result_values: &BTreeMap<String, f64>,
        evaluator: &FormulaEvaluator,
        providers: &[&dyn ValueProvider],
        ctx: &ValuationContext,
    ) -> Vec<ValidationRuleResult> {
        let mut results = Vec::new();

        for rule in &self.rules {
            if !has_required_items(result_values, &rule.required_line_items) {
                continue;
            }

            let mut rule_result = ValidationRuleResult {
                rule_code: rule.rule_code.clone(),
                rule_name: rule.rule_name.clone(),
                passed: true,
                severity: rule.severity,
                message: String::new(),
                calculated_value: 0.0,
                tolerance: rule.tolerance,
            };

            match evaluator.evaluate(&rule.formula, providers, ctx) {
                Ok(value) => {
                    rule_result.calculated_value = value;
                    match rule.rule_type {
                        RuleType::Equation | RuleType::Reconciliation => {
                            if value.abs() > rule.tolerance {
                                rule_result.passed = false;
                                rule_result.message = format!(
                                    "rule {} failed: {} (residual: {}, tolerance: {})",
                                    rule.rule_code, rule.description, value, rule.tolerance
                                );
                            }
                        }
                        RuleType::Boundary => {
                            if value < -rule.tolerance {
                                rule_result.passed = false;
                                rule_result.message = format!(
                                    "rule {} failed: {} (value: {})",
                                    rule.rule_code, rule.description, value
                                );
                            }
                        }
                    }
                }
                Err(e) => {
                    rule_result.passed = false;
                    rule_result.message = format!(
                        "rule {} failed: unable to evaluate formula: {e}",
                        rule.rule_code
                    );
                }
            }

            results.push(rule_result);
        }

        results
    }

    /// Whether any ERROR-severity rule failed.
    pub fn has_errors(rule_results: &[ValidationRuleResult]) -> bool {
        rule_results
            .iter()
            .any(|r| !r.passed && r.severity == RuleSeverity::Error)
    }
}

fn has_required_items(values: &BTreeMap<String, f64>, required: &[String]) -> bool {
    required.iter().all(|item| {
        let base = item.split('[').next().unwrap_or(item);
        values.contains_key(base)
    })
}
