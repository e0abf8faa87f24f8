//! Driver value provider: per-(entity, scenario, period) inputs from the
//! store.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use tracing::{debug, warn};

use crate::error::FinModelError;
use crate::providers::ValueProvider;
use crate::store::ModelStore;
use crate::template::StatementTemplate;
use crate::types::{PeriodId, ScenarioId, ValuationContext};
use crate::units::UnitConverter;
use crate::FinModelResult;

/// Resolves line item codes to scenario driver values.
///
/// Lookup is by (entity, scenario, `ctx.effective_period()`). A template
/// mapping translates line item codes to driver codes (populated from
/// `base_value_source`); the `driver:` prefix forces driver-scoped
/// resolution. Driver values are converted to the base unit of their
/// category on read (currency amounts to the scenario's base currency at
/// the period's average rate, physical units through their static factor).
///
/// Loaded drivers are cached per period; `set_context` invalidates the
/// cache.
pub struct DriverValueProvider {
    store: Rc<dyn ModelStore>,
    converter: Option<Rc<UnitConverter>>,
    entity_id: RefCell<String>,
    scenario_id: Cell<ScenarioId>,
    period_id: Cell<PeriodId>,
    /// line_item_code -> driver_code
    mappings: RefCell<BTreeMap<String, String>>,
    /// period -> (driver_code -> base-unit value)
    cache: RefCell<HashMap<PeriodId, BTreeMap<String, f64>>>,
}

impl DriverValueProvider {
    pub fn new(store: Rc<dyn ModelStore>, converter: Option<Rc<UnitConverter>>) -> Self {
        Self {
            store,
            converter,
            entity_id: RefCell::new(String::new()),
            scenario_id: Cell::new(0),
            period_id: Cell::new(0),
            mappings: RefCell::new(BTreeMap::new()),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Bind the provider to an (entity, scenario, period) and drop any
    /// cached drivers from the previous context.
    pub fn set_context(&self, entity_id: &str, scenario_id: ScenarioId, period_id: PeriodId) {
        *self.entity_id.borrow_mut() = entity_id.to_string();
        self.scenario_id.set(scenario_id);
        self.period_id.set(period_id);
        self.cache.borrow_mut().clear();
    }

    /// Load the `line_item_code -> driver_code` mapping from a template's
    /// `base_value_source` fields.
    pub fn load_template_mappings(&self, template: &StatementTemplate) {
        *self.mappings.borrow_mut() = template.driver_mappings();
    }

    fn resolve_driver_code(&self, code: &str) -> String {
        let bare = code.strip_prefix("driver:").unwrap_or(code);
        self.mappings
            .borrow()
            .get(bare)
            .cloned()
            .unwrap_or_else(|| bare.to_string())
    }

    fn ensure_period_loaded(&self, period_id: PeriodId) -> FinModelResult<()> {
        if self.cache.borrow().contains_key(&period_id) {
            return Ok(());
        }

        let entity_id = self.entity_id.borrow().clone();
        let scenario_id = self.scenario_id.get();
        let records = self.store.drivers_for(&entity_id, scenario_id, period_id)?;

        let mut values = BTreeMap::new();
        for record in records {
            let value = match &self.converter {
                Some(converter) if !record.unit_code.is_empty() => {
                    converter.to_base_unit(record.value, &record.unit_code, Some(period_id))?
                }
                // No catalog loaded, or unitless driver: use the raw value
                _ => record.value,
            };
            values.insert(record.driver_code, value);
        }

        debug!(
            scenario_id,
            period_id,
            count = values.len(),
            "loaded scenario drivers"
        );
        self.cache.borrow_mut().insert(period_id, values);
        Ok(())
    }

    fn lookup(&self, code: &str, period_id: PeriodId) -> FinModelResult<Option<f64>> {
        self.ensure_period_loaded(period_id)?;
        let driver_code = self.resolve_driver_code(code);
        Ok(self
            .cache
            .borrow()
            .get(&period_id)
            .and_then(|values| values.get(&driver_code))
            .copied())
    }
}

impl ValueProvider for DriverValueProvider {
    fn has_value(&self, code: &str) -> bool {
        match self.lookup(code, self.period_id.get()) {
            Ok(found) => found.is_some(),
            Err(e) => {
                warn!(code, error = %e, "driver lookup failed during claim check");
                false
            }
        }
    }

    fn get_value(&self, code: &str, ctx: &ValuationContext) -> FinModelResult<f64> {
        let period_id = ctx.effective_period();
        self.lookup(code, period_id)?
            .ok_or_else(|| FinModelError::MissingDriver {
                driver_code: self.resolve_driver_code(code),
                entity_id: self.entity_id.borrow().clone(),
                scenario_id: self.scenario_id.get(),
                period_id,
            })
    }
}
