//! FX value provider: exchange rates as formula variables.

use std::cell::RefCell;
use std::rc::Rc;

use crate::providers::ValueProvider;
use crate::store::ModelStore;
use crate::types::{FxRateType, ScenarioId, ValuationContext};
use crate::units::FxRateProvider;
use crate::FinModelResult;

/// Handles identifiers of the form `FX_<FROM>_<TO>` and
/// `FX_<FROM>_<TO>_<AVERAGE|CLOSING|OPENING>` (default average).
///
/// Rates come from the active (scenario, effective period) context. The
/// claim is pattern-based: any well-formed FX key is claimed and a missing
/// rate surfaces from `get_value`. The per-scenario rate cache is rebuilt
/// whenever the context scenario changes.
pub struct FxValueProvider {
    store: Rc<dyn ModelStore>,
    cached: RefCell<Option<(ScenarioId, FxRateProvider)>>,
}

struct FxReference {
    from: String,
    to: String,
    rate_type: FxRateType,
}

impl FxValueProvider {
    pub fn new(store: Rc<dyn ModelStore>) -> Self {
        Self {
            store,
            cached: RefCell::new(None),
        }
    }

    fn parse_fx_key(key: &str) -> Option<FxReference> {
        let remainder = key.strip_prefix("FX_")?;
        let parts: Vec<&str> = remainder.split('_').collect();

        let (from, to, rate_type) = match parts.as_slice() {
            [from, to] => (*from, *to, FxRateType::Average),
            [from, to, rate_type] => (*from, *to, FxRateType::parse_token(rate_type)?),
            _ => return None,
        };

        if from.len() != 3 || to.len() != 3 {
            return None;
        }
        if !from.bytes().all(|c| c.is_ascii_uppercase())
            || !to.bytes().all(|c| c.is_ascii_uppercase())
        {
            return None;
        }

        Some(FxReference {
            from: from.to_string(),
            to: to.to_string(),
            rate_type,
        })
    }

    fn rate_for(
        &self,
        fx_ref: &FxReference,
        scenario_id: ScenarioId,
        period_id: i32,
    ) -> FinModelResult<f64> {
        let mut cached = self.cached.borrow_mut();
        match &*cached {
            Some((cached_scenario, provider)) if *cached_scenario == scenario_id => {
                provider.rate_of_type(&fx_ref.from, &fx_ref.to, fx_ref.rate_type, period_id)
            }
            _ => {
                let provider = FxRateProvider::from_store(self.store.as_ref(), scenario_id)?;
                let rate =
                    provider.rate_of_type(&fx_ref.from, &fx_ref.to, fx_ref.rate_type, period_id);
                *cached = Some((scenario_id, provider));
                rate
            }
        }
    }
}

impl ValueProvider for FxValueProvider {
    fn has_value(&self, code: &str) -> bool {
        Self::parse_fx_key(code).is_some()
    }

    fn get_value(&self, code: &str, ctx: &ValuationContext) -> FinModelResult<f64> {
        let fx_ref = Self::parse_fx_key(code).ok_or_else(|| {
            crate::error::FinModelError::UnresolvedIdentifier {
                code: code.to_string(),
            }
        })?;
        self.rate_for(&fx_ref, ctx.scenario_id, ctx.effective_period())
    }
}
