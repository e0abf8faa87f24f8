//! Abstract persistent state consumed by the engine.
//!
//! The relational store itself (SQLite or otherwise) is outside this
//! crate; the engine sees only the `ModelStore` trait, a synchronous
//! typed facade over the template, driver, rule, FX, unit, peril, asset,
//! damage-function and MAC tables. `InMemoryStore` is the reference
//! implementation used by tests and embedded runs.

use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::actions::ManagementAction;
use crate::engine::validation::ValidationRule;
use crate::template::StatementTemplate;
use crate::types::{
    AssetExposure, DamageFunctionDefinition, DriverRecord, FxRate, MacCurvePoint, PeriodId,
    PhysicalPeril, ScenarioId, UnitDefinition,
};
use crate::FinModelResult;

/// Synchronous facade over the persistent model state.
///
/// Implementations may batch queries internally but must present these
/// calls synchronously. Replacement operations (`replace_*`,
/// `delete_physical_risk_drivers` + `insert_drivers`) are expected to be
/// atomic per scenario run: a failed run must not leave partial rows.
pub trait ModelStore {
    // -- templates ---------------------------------------------------------

    fn load_template(&self, template_code: &str) -> FinModelResult<Option<StatementTemplate>>;

    /// Upsert by `template_code`.
    fn upsert_template(&self, template: &StatementTemplate) -> FinModelResult<()>;

    // -- drivers -----------------------------------------------------------

    fn drivers_for(
        &self,
        entity_id: &str,
        scenario_id: ScenarioId,
        period_id: PeriodId,
    ) -> FinModelResult<Vec<DriverRecord>>;

    fn insert_drivers(&self, records: &[DriverRecord]) -> FinModelResult<()>;

    /// Remove all physical-risk drivers for a scenario (driver codes
    /// containing a `_PPE_`, `_INVENTORY_` or `_BI_` segment). Returns the
    /// number of rows removed.
    fn delete_physical_risk_drivers(&self, scenario_id: ScenarioId) -> FinModelResult<usize>;

    // -- validation rules --------------------------------------------------

    /// Active rules bound and enabled for a template, ordered by rule code.
    fn rules_for_template(&self, template_code: &str) -> FinModelResult<Vec<ValidationRule>>;

    // -- FX ----------------------------------------------------------------

    fn fx_rates_for_scenario(&self, scenario_id: ScenarioId) -> FinModelResult<Vec<FxRate>>;

    // -- units -------------------------------------------------------------

    fn unit_definitions(&self) -> FinModelResult<Vec<UnitDefinition>>;

    // -- physical risk -----------------------------------------------------

    fn perils_for_scenario(&self, scenario_id: ScenarioId) -> FinModelResult<Vec<PhysicalPeril>>;

    fn active_assets(&self) -> FinModelResult<Vec<AssetExposure>>;

    fn damage_function_definitions(&self) -> FinModelResult<Vec<DamageFunctionDefinition>>;

    // -- management actions ------------------------------------------------

    /// Scenario-bound actions joined with action metadata, ordered by
    /// start period then action code.
    fn actions_for_scenario(&self, scenario_id: ScenarioId) -> FinModelResult<Vec<ManagementAction>>;

    // -- MAC curves --------------------------------------------------------

    /// Replace all MAC points under (scenario, period) with the given set.
    fn replace_mac_curve_points(
        &self,
        scenario_id: ScenarioId,
        period_id: PeriodId,
        points: &[MacCurvePoint],
    ) -> FinModelResult<()>;

    fn mac_curve_points(
        &self,
        scenario_id: ScenarioId,
        period_id: PeriodId,
    ) -> FinModelResult<Vec<MacCurvePoint>>;

    // -- statement history -------------------------------------------------

    /// Persisted statement value for deep time references (`[t-2]` and
    /// beyond).
    fn statement_value(
        &self,
        entity_id: &str,
        scenario_id: ScenarioId,
        period_id: PeriodId,
        code: &str,
    ) -> FinModelResult<Option<f64>>;

    fn store_statement_values(
        &self,
        entity_id: &str,
        scenario_id: ScenarioId,
        period_id: PeriodId,
        values: &BTreeMap<String, f64>,
    ) -> FinModelResult<()>;
}

/// In-memory `ModelStore` backed by `RefCell`ed collections.
///
/// Each mutating call holds a single borrow, so replacement operations are
/// atomic by construction. Seeding methods mirror the table rows the
/// relational schema would hold.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    templates: RefCell<BTreeMap<String, StatementTemplate>>,
    drivers: RefCell<Vec<DriverRecord>>,
    rules: RefCell<Vec<ValidationRule>>,
    /// (template_code, rule_code, is_enabled)
    template_rules: RefCell<Vec<(String, String, bool)>>,
    fx_rates: RefCell<Vec<FxRate>>,
    units: RefCell<Vec<UnitDefinition>>,
    perils: RefCell<Vec<PhysicalPeril>>,
    /// (asset, is_active)
    assets: RefCell<Vec<(AssetExposure, bool)>>,
    damage_functions: RefCell<Vec<DamageFunctionDefinition>>,
    actions: RefCell<Vec<ManagementAction>>,
    mac_points: RefCell<Vec<MacCurvePoint>>,
    history: RefCell<BTreeMap<(String, ScenarioId, PeriodId, String), f64>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- seeding -----------------------------------------------------------

    pub fn add_template(&self, template: StatementTemplate) {
        self.templates
            .borrow_mut()
            .insert(template.template_code.clone(), template);
    }

    pub fn add_driver(&self, record: DriverRecord) {
        self.drivers.borrow_mut().push(record);
    }

    pub fn add_drivers(&self, records: impl IntoIterator<Item = DriverRecord>) {
        self.drivers.borrow_mut().extend(records);
    }

    pub fn add_rule(&self, rule: ValidationRule) {
        self.rules.borrow_mut().push(rule);
    }

    /// Bind a rule to a template (the template_validation_rule join row).
    pub fn bind_rule(&self, template_code: &str, rule_code: &str, enabled: bool) {
        self.template_rules.borrow_mut().push((
            template_code.to_string(),
            rule_code.to_string(),
            enabled,
        ));
    }

    pub fn add_fx_rate(&self, rate: FxRate) {
        self.fx_rates.borrow_mut().push(rate);
    }

    pub fn add_unit(&self, unit: UnitDefinition) {
        self.units.borrow_mut().push(unit);
    }

    pub fn add_peril(&self, peril: PhysicalPeril) {
        self.perils.borrow_mut().push(peril);
    }

    pub fn add_asset(&self, asset: AssetExposure, is_active: bool) {
        self.assets.borrow_mut().push((asset, is_active));
    }

    pub fn add_damage_function(&self, definition: DamageFunctionDefinition) {
        self.damage_functions.borrow_mut().push(definition);
    }

    pub fn add_action(&self, action: ManagementAction) {
        self.actions.borrow_mut().push(action);
    }

    /// All drivers currently held, for test inspection.
    pub fn all_drivers(&self) -> Vec<DriverRecord> {
        self.drivers.borrow().clone()
    }
}

fn is_physical_risk_code(code: &str) -> bool {
    code.contains("_PPE_") || code.contains("_INVENTORY_") || code.contains("_BI_")
}

impl ModelStore for InMemoryStore {
    fn load_template(&self, template_code: &str) -> FinModelResult<Option<StatementTemplate>> {
        Ok(self.templates.borrow().get(template_code).cloned())
    }

    fn upsert_template(&self, template: &StatementTemplate) -> FinModelResult<()> {
        self.templates
            .borrow_mut()
            .insert(template.template_code.clone(), template.clone());
        Ok(())
    }

    fn drivers_for(
        &self,
        entity_id: &str,
        scenario_id: ScenarioId,
        period_id: PeriodId,
    ) -> FinModelResult<Vec<DriverRecord>> {
        Ok(self
            .drivers
            .borrow()
            .iter()
            .filter(|d| {
                d.entity_id == entity_id
                    && d.scenario_id == scenario_id
                    && d.period_id == period_id
            })
            .cloned()
            .collect())
    }

    fn insert_drivers(&self, records: &[DriverRecord]) -> FinModelResult<()> {
        self.drivers.borrow_mut().extend_from_slice(records);
        Ok(())
    }

    fn delete_physical_risk_drivers(&self, scenario_id: ScenarioId) -> FinModelResult<usize> {
        let mut drivers = self.drivers.borrow_mut();
        let before = drivers.len();
        drivers.retain(|d| {
            !(d.scenario_id == scenario_id && is_physical_risk_code(&d.driver_code))
        });
        Ok(before - drivers.len())
    }

    fn rules_for_template(&self, template_code: &str) -> FinModelResult<Vec<ValidationRule>> {
        let bindings = self.template_rules.borrow();
        let rules = self.rules.borrow();
        let mut bound: Vec<ValidationRule> = bindings
            .iter()
            .filter(|(tpl, _, enabled)| tpl == template_code && *enabled)
            .filter_map(|(_, rule_code, _)| {
                rules
                    .iter()
                    .find(|r| &r.rule_code == rule_code && r.is_active)
                    .cloned()
            })
            .collect();
        bound.sort_by(|a, b| a.rule_code.cmp(&b.rule_code));
        Ok(bound)
    }

    fn fx_rates_for_scenario(&self, scenario_id: ScenarioId) -> FinModelResult<Vec<FxRate>> {
        Ok(self
            .fx_rates
            .borrow()
            .iter()
            .filter(|r| r.scenario_id == scenario_id)
            .cloned()
            .collect())
    }

    fn unit_definitions(&self) -> FinModelResult<Vec<UnitDefinition>> {
        Ok(self.units.borrow().clone())
    }

    fn perils_for_scenario(&self, scenario_id: ScenarioId) -> FinModelResult<Vec<PhysicalPeril>> {
        let mut perils: Vec<PhysicalPeril> = self
            .perils
            .borrow()
            .iter()
            .filter(|p| p.scenario_id == scenario_id)
            .cloned()
            .collect();
        perils.sort_by_key(|p| (p.start_period, p.peril_id));
        Ok(perils)
    }

    fn active_assets(&self) -> FinModelResult<Vec<AssetExposure>> {
        Ok(self
            .assets
            .borrow()
            .iter()
            .filter(|(_, active)| *active)
            .map(|(asset, _)| asset.clone())
            .collect())
    }

    fn damage_function_definitions(&self) -> FinModelResult<Vec<DamageFunctionDefinition>> {
        Ok(self.damage_functions.borrow().clone())
    }

    fn actions_for_scenario(&self, scenario_id: ScenarioId) -> FinModelResult<Vec<ManagementAction>> {
        let mut actions: Vec<ManagementAction> = self
            .actions
            .borrow()
            .iter()
            .filter(|a| a.scenario_id == scenario_id)
            .cloned()
            .collect();
        actions.sort_by(|a, b| {
            a.start_period
                .cmp(&b.start_period)
                .then_with(|| a.action_code.cmp(&b.action_code))
        });
        Ok(actions)
    }

    fn replace_mac_curve_points(
        &self,
        scenario_id: ScenarioId,
        period_id: PeriodId,
        points: &[MacCurvePoint],
    ) -> FinModelResult<()> {
        let mut stored = self.mac_points.borrow_mut();
        stored.retain(|p| !(p.scenario_id == scenario_id && p.period_id == period_id));
        stored.extend_from_slice(points);
        Ok(())
    }

    fn mac_curve_points(
        &self,
        scenario_id: ScenarioId,
        period_id: PeriodId,
    ) -> FinModelResult<Vec<MacCurvePoint>> {
        let mut points: Vec<MacCurvePoint> = self
            .mac_points
            .borrow()
            .iter()
            .filter(|p| p.scenario_id == scenario_id && p.period_id == period_id)
            .cloned()
            .collect();
        points.sort_by(|a, b| {
            a.cumulative_reduction_tco2e
                .partial_cmp(&b.cumulative_reduction_tco2e)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(points)
    }

    fn statement_value(
        &self,
        entity_id: &str,
        scenario_id: ScenarioId,
        period_id: PeriodId,
        code: &str,
    ) -> FinModelResult<Option<f64>> {
        Ok(self
            .history
            .borrow()
            .get(&(
                entity_id.to_string(),
                scenario_id,
                period_id,
                code.to_string(),
            ))
            .copied())
    }

    fn store_statement_values(
        &self,
        entity_id: &str,
        scenario_id: ScenarioId,
        period_id: PeriodId,
        values: &BTreeMap<String, f64>,
    ) -> FinModelResult<()> {
        let mut history = self.history.borrow_mut();
        for (code, value) in values {
            history.insert(
                (
                    entity_id.to_string(),
                    scenario_id,
                    period_id,
                    code.clone(),
                ),
                *value,
            );
        }
        Ok(())
    }
}
