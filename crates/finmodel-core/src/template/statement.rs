//! Statement template model and loader.
//!
//! Templates are immutable after load except through the two mutation
//! operations used by the management-action pipeline, both of which keep
//! the calculation order consistent (recompute after every formula change,
//! roll back on cycles).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::FinModelError;
use crate::formula::FormulaEvaluator;
use crate::formula::DependencyGraph;
use crate::store::ModelStore;
use crate::types::{SignConvention, StatementType};
use crate::FinModelResult;

/// A single named row of a financial statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    /// Unique code within the template (e.g. "REVENUE")
    pub code: String,
    #[serde(default)]
    pub display_name: String,
    /// Outline depth (1 = main item, 2 = sub-item)
    #[serde(default = "default_level")]
    pub level: i32,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub sign_convention: SignConvention,
    /// Formula expression; absent for provider-resolved items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    /// `driver:<DRIVER_CODE>` source for unformulated items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_value_source: Option<String>,
    #[serde(default, alias = "driver_mapping", skip_serializing_if = "Option::is_none")]
    pub driver_code: Option<String>,
    #[serde(default)]
    pub is_computed: bool,
    /// Authoring hint; authoritative dependencies are re-extracted from
    /// the formula
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl LineItem {
    /// Driver code named by `base_value_source`, if the source is a
    /// `driver:` reference.
    pub fn driver_source_code(&self) -> Option<&str> {
        self.base_value_source
            .as_deref()
            .and_then(|s| s.strip_prefix("driver:"))
    }
}

fn default_level() -> i32 {
    1
}

/// Validation rule embedded in a template document (distinct from the
/// data-driven rule catalog, which is bound through the store).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateRule {
    #[serde(default)]
    pub rule_id: String,
    #[serde(default)]
    pub rule: String,
    #[serde(default = "default_rule_severity")]
    pub severity: String,
    #[serde(default)]
    pub message: String,
}

fn default_rule_severity() -> String {
    "error".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateMetadata {
    #[serde(default)]
    pub supports_consolidation: bool,
    #[serde(default = "default_frequency")]
    pub default_frequency: String,
}

impl Default for TemplateMetadata {
    fn default() -> Self {
        Self {
            supports_consolidation: false,
            default_frequency: default_frequency(),
        }
    }
}

fn default_frequency() -> String {
    "monthly".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// A statement template: ordered line items plus computed calculation
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementTemplate {
    #[serde(default)]
    pub template_code: String,
    #[serde(default)]
    pub template_name: String,
    #[serde(default)]
    pub statement_type: StatementType,
    #[serde(default)]
    pub industry: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    /// File-provided order is a hint only; `compute_calculation_order`
    /// always rebuilds it from the formulas.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calculation_order: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_rules: Vec<TemplateRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denormalized_columns: Vec<String>,
    #[serde(default)]
    pub metadata: TemplateMetadata,

    #[serde(skip)]
    index: BTreeMap<String, usize>,
}

impl StatementTemplate {
    /// Parse a template from its JSON document.
    pub fn from_json(json_content: &str) -> FinModelResult<Self> {
        let mut template: StatementTemplate = serde_json::from_str(json_content)?;
        template.rebuild_index()?;
        Ok(template)
    }

    /// Serialise back to the JSON document form.
    pub fn to_json(&self) -> FinModelResult<String> {
        serde_json::to_string_pretty(self).map_err(Into::into)
    }

    /// Load a template from the store by code.
    pub fn load_from_store(
        store: &dyn ModelStore,
        template_code: &str,
    ) -> FinModelResult<Option<Self>> {
        store.load_template(template_code)
    }

    /// Upsert this template into the store, keyed by `template_code`.
    pub fn save_to_store(&self, store: &dyn ModelStore) -> FinModelResult<()> {
        store.upsert_template(self)
    }

    pub fn line_item(&self, code: &str) -> Option<&LineItem> {
        self.index.get(code).map(|&i| &self.line_items[i])
    }

    pub fn has_line_item(&self, code: &str) -> bool {
        self.index.contains_key(code)
    }

    /// Mapping `line_item_code -> driver_code` for unformulated items,
    /// from `base_value_source` (primary) and explicit `driver_code`
    /// fields.
    pub fn driver_mappings(&self) -> BTreeMap<String, String> {
        let mut mappings = BTreeMap::new();
        for item in &self.line_items {
            if let Some(driver) = item.driver_source_code() {
                mappings.insert(item.code.clone(), driver.to_string());
            } else if let Some(driver) = &item.driver_code {
                mappings.insert(item.code.clone(), driver.clone());
            }
        }
        mappings
    }

    /// Recompute the calculation order from formula-extracted
    /// dependencies.
    ///
    /// Time-shifted references (offset != 0) cross period boundaries and
    /// never form intra-period edges; identifiers not present in the
    /// template are provider-resolved at runtime and are not edges either.
    pub fn compute_calculation_order(&mut self) -> FinModelResult<()> {
        let evaluator = FormulaEvaluator::new();
        let mut graph = DependencyGraph::new();

        for item in &self.line_items {
            graph.add_node(&item.code);
        }

        for item in &self.line_items {
            let Some(formula) = &item.formula else {
                continue;
            };
            for dep in evaluator.extract_dependencies(formula)? {
                if dep.is_time_shifted() {
                    continue;
                }
                if self.index.contains_key(&dep.code) {
                    graph.add_edge(&item.code, &dep.code);
                }
            }
        }

        self.calculation_order = graph.topological_sort()?;
        Ok(())
    }

    /// Replace a line item's formula and recompute the calculation order.
    ///
    /// Returns `Ok(false)` when the code is unknown. If the new formula
    /// induces a cycle the previous formula state is restored and the
    /// cycle error is returned.
    pub fn update_line_item_formula(
        &mut self,
        code: &str,
        new_formula: &str,
    ) -> FinModelResult<bool> {
        let Some(&idx) = self.index.get(code) else {
            return Ok(false);
        };

        let previous_formula = self.line_items[idx].formula.clone();
        let previous_is_computed = self.line_items[idx].is_computed;

        self.line_items[idx].formula = Some(new_formula.to_string());
        self.line_items[idx].is_computed = true;

        if let Err(e) = self.compute_calculation_order() {
            self.line_items[idx].formula = previous_formula;
            self.line_items[idx].is_computed = previous_is_computed;
            // Restore a consistent order before surfacing the failure
            self.compute_calculation_order()?;
            return Err(e);
        }
        Ok(true)
    }

    /// Clear a line item's `base_value_source` (used after an action
    /// overrides its formula, so the driver provider no longer claims it).
    pub fn clear_base_value_source(&mut self, code: &str) -> bool {
        match self.index.get(code) {
            Some(&idx) => {
                self.line_items[idx].base_value_source = None;
                true
            }
            None => false,
        }
    }

    /// Deep copy under a new template code. All action mutations operate
    /// on the clone; the base template is never shared.
    pub fn clone_with_code(&self, new_code: &str) -> Self {
        let mut clone = self.clone();
        clone.template_code = new_code.to_string();
        if !clone.template_name.is_empty() {
            clone.template_name = format!("{} (Clone: {})", clone.template_name, new_code);
        }
        clone
    }

    fn rebuild_index(&mut self) -> FinModelResult<()> {
        self.index.clear();
        for (i, item) in self.line_items.iter_mut().enumerate() {
            // A present formula implies a computed item
            if item.formula.is_some() {
                item.is_computed = true;
            }
            if self.index.insert(item.code.clone(), i).is_some() {
                return Err(FinModelError::InvalidInput {
                    field: "line_items".to_string(),
                    reason: format!("duplicate line item code '{}'", item.code),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_json() -> &'static str {
        r#"{
            "template_code": "TEST_PL",
            "template_name": "Test P&L",
            "statement_type": "pl",
            "industry": "CORPORATE",
            "version": "1.0.0",
            "line_items": [
                {"code": "REVENUE", "display_name": "Revenue", "base_value_source": "driver:REVENUE_BASE"},
                {"code": "EXPENSES", "display_name": "Expenses", "driver_mapping": "OPEX"},
                {"code": "NET_INCOME", "display_name": "Net income", "formula": "REVENUE + EXPENSES"}
            ],
            "metadata": {"supports_consolidation": true, "default_frequency": "quarterly"}
        }"#
    }

    #[test]
    fn test_parse_and_index() {
        let template = StatementTemplate::from_json(sample_json()).unwrap();
        assert_eq!(template.template_code, "TEST_PL");
        assert_eq!(template.statement_type, StatementType::Pl);
        assert!(template.has_line_item("REVENUE"));
        assert!(template.metadata.supports_consolidation);

        // Formula presence implies is_computed
        assert!(template.line_item("NET_INCOME").unwrap().is_computed);
    }

    #[test]
    fn test_driver_mappings_with_alias() {
        let template = StatementTemplate::from_json(sample_json()).unwrap();
        let mappings = template.driver_mappings();
        assert_eq!(mappings.get("REVENUE").unwrap(), "REVENUE_BASE");
        // driver_mapping is a legacy alias for driver_code
        assert_eq!(mappings.get("EXPENSES").unwrap(), "OPEX");
        assert!(!mappings.contains_key("NET_INCOME"));
    }

    #[test]
    fn test_calculation_order_respects_dependencies() {
        let mut template = StatementTemplate::from_json(sample_json()).unwrap();
        template.compute_calculation_order().unwrap();
        let order = &template.calculation_order;
        let pos = |code: &str| order.iter().position(|c| c == code).unwrap();
        assert!(pos("REVENUE") < pos("NET_INCOME"));
        assert!(pos("EXPENSES") < pos("NET_INCOME"));
    }

    #[test]
    fn test_time_shifted_self_reference_is_not_a_cycle() {
        let json = r#"{
            "template_code": "TEST_BS",
            "statement_type": "bs",
            "line_items": [
                {"code": "NET_INCOME", "base_value_source": "driver:NET_INCOME"},
                {"code": "RETAINED_EARNINGS", "formula": "RETAINED_EARNINGS[t-1] + NET_INCOME"}
            ]
        }"#;
        let mut template = StatementTemplate::from_json(json).unwrap();
        template.compute_calculation_order().unwrap();
        assert_eq!(template.calculation_order.len(), 2);
    }

    #[test]
    fn test_external_identifiers_are_not_edges() {
        let json = r#"{
            "template_code": "TEST",
            "line_items": [
                {"code": "TAXED", "formula": "EBT_FROM_ELSEWHERE * 0.75"}
            ]
        }"#;
        let mut template = StatementTemplate::from_json(json).unwrap();
        template.compute_calculation_order().unwrap();
        assert_eq!(template.calculation_order, vec!["TAXED"]);
    }

    #[test]
    fn test_file_order_is_only_a_hint() {
        let json = r#"{
            "template_code": "TEST",
            "calculation_order": ["B", "A"],
            "line_items": [
                {"code": "A", "base_value_source": "driver:A"},
                {"code": "B", "formula": "A * 2"}
            ]
        }"#;
        let mut template = StatementTemplate::from_json(json).unwrap();
        assert_eq!(template.calculation_order, vec!["B", "A"]);
        template.compute_calculation_order().unwrap();
        assert_eq!(template.calculation_order, vec!["A", "B"]);
    }

    #[test]
    fn test_update_formula_rolls_back_on_cycle() {
        let json = r#"{
            "template_code": "TEST",
            "line_items": [
                {"code": "A", "formula": "B + 1"},
                {"code": "B", "base_value_source": "driver:B"}
            ]
        }"#;
        let mut template = StatementTemplate::from_json(json).unwrap();
        template.compute_calculation_order().unwrap();

        let err = template.update_line_item_formula("B", "A * 2").unwrap_err();
        assert!(matches!(err, FinModelError::CircularDependency { .. }));

        // Previous state restored and order still valid
        let b = template.line_item("B").unwrap();
        assert!(b.formula.is_none());
        assert!(!b.is_computed);
        assert_eq!(template.calculation_order, vec!["B", "A"]);
    }

    #[test]
    fn test_update_formula_unknown_code() {
        let mut template = StatementTemplate::from_json(sample_json()).unwrap();
        assert!(!template.update_line_item_formula("NOPE", "1").unwrap());
    }

    #[test]
    fn test_clone_with_code_is_independent() {
        let template = StatementTemplate::from_json(sample_json()).unwrap();
        let mut clone = template.clone_with_code("TEST_PL_S5");
        assert_eq!(clone.template_code, "TEST_PL_S5");
        assert!(clone.template_name.contains("Clone: TEST_PL_S5"));

        clone.update_line_item_formula("REVENUE", "1000").unwrap();
        assert!(template.line_item("REVENUE").unwrap().formula.is_none());
    }

    #[test]
    fn test_json_round_trip() {
        let template = StatementTemplate::from_json(sample_json()).unwrap();
        let json = template.to_json().unwrap();
        let reparsed = StatementTemplate::from_json(&json).unwrap();
        assert_eq!(reparsed.template_code, template.template_code);
        assert_eq!(reparsed.line_items.len(), template.line_items.len());
    }

    #[test]
    fn test_duplicate_codes_rejected() {
        let json = r#"{
            "template_code": "DUP",
            "line_items": [
                {"code": "X"},
                {"code": "X"}
            ]
        }"#;
        let err = StatementTemplate::from_json(json).unwrap_err();
        assert!(matches!(err, FinModelError::InvalidInput { .. }));
    }
}
