//! Management actions: formula rewrites gated by triggers.
//!
//! An action carries transformations (multiply / add / reduce /
//! formula_override) against template line items plus a trigger and an
//! execution window. Applying an action rewrites the target's formula and
//! clears its `base_value_source`, so the driver provider no longer
//! shadows the override; the template recomputes its calculation order on
//! every rewrite and rolls back when a cycle would form.

pub mod scenario_generator;

pub use scenario_generator::{ScenarioConfig, ScenarioGenerator};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::debug;

use crate::error::FinModelError;
use crate::store::ModelStore;
use crate::template::StatementTemplate;
use crate::types::{PeriodId, ScenarioId};
use crate::FinModelResult;

/// When an action becomes active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    /// Active from `start_period` onward (always, when `start_period <= 0`)
    #[default]
    Unconditional,
    /// Active when `trigger_condition` evaluates truthy
    Conditional,
    /// Active exactly at `trigger_period` (or `start_period` as fallback)
    Timed,
}

/// Transformation semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationKind {
    Multiply,
    Add,
    Reduce,
    FormulaOverride,
}

/// A single rewrite against one line item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transformation {
    pub line_item_code: String,
    pub kind: TransformationKind,
    /// For `multiply`
    #[serde(default = "default_factor")]
    pub factor: f64,
    /// For `add` and `reduce`
    #[serde(default)]
    pub amount: f64,
    /// For `formula_override`
    #[serde(default)]
    pub new_formula: String,
    #[serde(default)]
    pub comment: String,
}

fn default_factor() -> f64 {
    1.0
}

/// A scenario-bound management action joined with its metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagementAction {
    pub scenario_id: ScenarioId,
    pub action_code: String,
    #[serde(default)]
    pub action_name: String,
    #[serde(default)]
    pub action_category: String,
    #[serde(default)]
    pub trigger_type: TriggerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_period: Option<PeriodId>,
    #[serde(default)]
    pub start_period: PeriodId,
    /// None = permanent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_period: Option<PeriodId>,
    #[serde(default)]
    pub capex: f64,
    #[serde(default)]
    pub opex_annual: f64,
    #[serde(default)]
    pub emission_reduction_annual: f64,
    #[serde(default)]
    pub financial_transformations: Vec<Transformation>,
    #[serde(default)]
    pub carbon_transformations: Vec<Transformation>,
    #[serde(default)]
    pub notes: String,
}

impl ManagementAction {
    /// Whether the execution window covers the period. Trigger conditions
    /// are evaluated separately via `ActionEngine::should_trigger`.
    pub fn is_active_in_period(&self, period_id: PeriodId) -> bool {
        if self.start_period > 0 && period_id < self.start_period {
            return false;
        }
        match self.end_period {
            Some(end) if end > 0 && period_id > end => false,
            _ => true,
        }
    }
}

/// Parse transformation JSON in either of the two supported dialects:
///
/// - array: `[{"line_item": "X", "type": "multiply", "factor": 0.9}, ...]`
/// - object: `{"X": {"type": "multiply", "factor": 0.9}, ...}`
///
/// Entries without a line item code or a recognised type are skipped.
pub fn parse_transformations(json_str: &str) -> FinModelResult<Vec<Transformation>> {
    if json_str.trim().is_empty() {
        return Ok(Vec::new());
    }

    let value: serde_json::Value = serde_json::from_str(json_str)?;
    let mut transformations = Vec::new();

    match value {
        serde_json::Value::Array(entries) => {
            for entry in entries {
                let line_item = entry
                    .get("line_item")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                if line_item.is_empty() {
                    continue;
                }
                if let Some(t) = parse_transformation_body(line_item, &entry) {
                    transformations.push(t);
                }
            }
        }
        serde_json::Value::Object(entries) => {
            for (line_item, body) in entries {
                if let Some(t) = parse_transformation_body(line_item, &body) {
                    transformations.push(t);
                }
            }
        }
        _ => {
            return Err(FinModelError::InvalidInput {
                field: "transformations".to_string(),
                reason: "expected a JSON array or object".to_string(),
            })
        }
    }

    Ok(transformations)
}

fn parse_transformation_body(
    line_item_code: String,
    body: &serde_json::Value,
) -> Option<Transformation> {
    let kind = match body.get("type").and_then(|v| v.as_str())? {
        "multiply" => TransformationKind::Multiply,
        "add" => TransformationKind::Add,
        "reduce" => TransformationKind::Reduce,
        "formula_override" => TransformationKind::FormulaOverride,
        _ => return None,
    };

    Some(Transformation {
        line_item_code,
        kind,
        factor: body.get("factor").and_then(|v| v.as_f64()).unwrap_or(1.0),
        amount: body.get("amount").and_then(|v| v.as_f64()).unwrap_or(0.0),
        new_formula: body
            .get("new_formula")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        comment: body
            .get("comment")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

/// Applies management actions to templates.
pub struct ActionEngine {
    store: Rc<dyn ModelStore>,
}

impl ActionEngine {
    pub fn new(store: Rc<dyn ModelStore>) -> Self {
        Self { store }
    }

    /// Load the scenario's actions from the store.
    pub fn load_actions(&self, scenario_id: ScenarioId) -> FinModelResult<Vec<ManagementAction>> {
        self.store.actions_for_scenario(scenario_id)
    }

    /// Clone a base template under a new code and persist the clone. All
    /// subsequent mutations operate on the clone; the base is untouched.
    pub fn clone_template(
        &self,
        base_template_code: &str,
        new_template_code: &str,
    ) -> FinModelResult<StatementTemplate> {
        let base = self
            .store
            .load_template(base_template_code)?
            .ok_or_else(|| FinModelError::InvalidInput {
                field: "template_code".to_string(),
                reason: format!("base template not found: {base_template_code}"),
            })?;

        let clone = base.clone_with_code(new_template_code);
        clone.save_to_store(self.store.as_ref())?;
        Ok(clone)
    }

    /// Apply every transformation of every action active in the period.
    /// Returns the number of transformations applied. A transformation
    /// that would create a cycle rolls the template back and surfaces the
    /// cycle error.
    pub fn apply_actions_to_template(
        &self,
        template: &mut StatementTemplate,
        actions: &[ManagementAction],
        period_id: PeriodId,
    ) -> FinModelResult<usize> {
        let mut applied = 0;

        for action in actions {
            if !action.is_active_in_period(period_id) {
                continue;
            }

            for transformation in action
                .financial_transformations
                .iter()
                .chain(&action.carbon_transformations)
            {
                if self.apply_transformation(template, transformation)? {
                    applied += 1;
                }
            }
        }

        debug!(period_id, applied, "applied action transformations");
        Ok(applied)
    }

    /// Apply one transformation. Returns `Ok(false)` when the target line
    /// item does not exist in the template.
    pub fn apply_transformation(
        &self,
        template: &mut StatementTemplate,
        transformation: &Transformation,
    ) -> FinModelResult<bool> {
        let code = &transformation.line_item_code;
        let Some(item) = template.line_item(code) else {
            return Ok(false);
        };

        let old_formula = item.formula.clone().filter(|f| !f.is_empty());
        let new_formula = match transformation.kind {
            TransformationKind::FormulaOverride => transformation.new_formula.clone(),
            TransformationKind::Multiply => match &old_formula {
                Some(old) => format!("({old}) * {}", transformation.factor),
                None => format!("{code} * {}", transformation.factor),
            },
            TransformationKind::Add => match &old_formula {
                Some(old) => format!("({old}) + ({})", transformation.amount),
                None => format!("{code} + ({})", transformation.amount),
            },
            TransformationKind::Reduce => match &old_formula {
                Some(old) => format!("({old}) - ({})", transformation.amount),
                None => format!("{code} - ({})", transformation.amount),
            },
        };

        template.update_line_item_formula(code, &new_formula)?;
        template.clear_base_value_source(code);
        Ok(true)
    }

    /// Whether an action triggers in the given period.
    ///
    /// UNCONDITIONAL: period at or past `start_period`. TIMED: exactly at
    /// `trigger_period` (or `start_period` when unset). CONDITIONAL: not
    /// yet evaluated, always false.
    // TODO: evaluate trigger_condition through the formula evaluator once
    // the period runner passes its value map through here.
    pub fn should_trigger(
        &self,
        action: &ManagementAction,
        period_id: PeriodId,
        _available_values: &BTreeMap<String, f64>,
    ) -> bool {
        match action.trigger_type {
            TriggerType::Unconditional => {
                action.start_period <= 0 || period_id >= action.start_period
            }
            TriggerType::Timed => match action.trigger_period {
                Some(trigger_period) if trigger_period > 0 => period_id == trigger_period,
                _ => action.start_period > 0 && period_id == action.start_period,
            },
            TriggerType::Conditional => false,
        }
    }
}
