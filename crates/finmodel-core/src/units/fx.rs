//! FX rate provider for time-varying currency conversions.

use std::collections::HashMap;

use crate::error::FinModelError;
use crate::store::ModelStore;
use crate::types::{FxRateType, PeriodId, ScenarioId};
use crate::FinModelResult;

type RateKey = (String, String, FxRateType, PeriodId);

/// Period-specific exchange rates for one scenario.
///
/// All rows for the scenario are cached on construction. Lookup order is
/// direct rate, then the inverse (reciprocal of the opposite direction
/// when present and non-zero), then failure. `from == to` is always 1.
#[derive(Debug, Clone)]
pub struct FxRateProvider {
    scenario_id: ScenarioId,
    rates: HashMap<RateKey, f64>,
    available_currencies: Vec<String>,
}

impl FxRateProvider {
    /// Load and cache all FX rows for a scenario.
    pub fn from_store(store: &dyn ModelStore, scenario_id: ScenarioId) -> FinModelResult<Self> {
        let mut provider = Self {
            scenario_id,
            rates: HashMap::new(),
            available_currencies: Vec::new(),
        };
        provider.reload(store)?;
        Ok(provider)
    }

    /// Clear the cache and reload from the store.
    pub fn reload(&mut self, store: &dyn ModelStore) -> FinModelResult<()> {
        self.rates.clear();
        let mut currencies: Vec<String> = Vec::new();

        for row in store.fx_rates_for_scenario(self.scenario_id)? {
            let key = (
                row.from_currency.clone(),
                row.to_currency.clone(),
                row.rate_type,
                row.period_id,
            );
            self.rates.insert(key, row.rate);
            for ccy in [row.from_currency, row.to_currency] {
                if !currencies.contains(&ccy) {
                    currencies.push(ccy);
                }
            }
        }

        currencies.sort();
        self.available_currencies = currencies;
        Ok(())
    }

    pub fn scenario_id(&self) -> ScenarioId {
        self.scenario_id
    }

    /// Average rate for the period. Multiply a `from` amount by this to
    /// obtain the `to` amount.
    pub fn rate(&self, from: &str, to: &str, period_id: PeriodId) -> FinModelResult<f64> {
        self.rate_of_type(from, to, FxRateType::Average, period_id)
    }

    pub fn rate_of_type(
        &self,
        from: &str,
        to: &str,
        rate_type: FxRateType,
        period_id: PeriodId,
    ) -> FinModelResult<f64> {
        if from == to {
            return Ok(1.0);
        }
        self.lookup(from, to, rate_type, period_id)
            .ok_or_else(|| FinModelError::MissingFxRate {
                from: from.to_string(),
                to: to.to_string(),
                rate_type: rate_type.as_str().to_string(),
                scenario_id: self.scenario_id,
                period_id,
            })
    }

    pub fn has_rate(&self, from: &str, to: &str, period_id: PeriodId) -> bool {
        from == to || self.lookup(from, to, FxRateType::Average, period_id).is_some()
    }

    /// Currencies appearing in at least one cached rate, sorted.
    pub fn available_currencies(&self) -> &[String] {
        &self.available_currencies
    }

    fn lookup(
        &self,
        from: &str,
        to: &str,
        rate_type: FxRateType,
        period_id: PeriodId,
    ) -> Option<f64> {
        let direct = (from.to_string(), to.to_string(), rate_type, period_id);
        if let Some(&rate) = self.rates.get(&direct) {
            return Some(rate);
        }

        // Inverse: synthesise from the opposite direction when non-zero
        let inverse = (to.to_string(), from.to_string(), rate_type, period_id);
        match self.rates.get(&inverse) {
            Some(&rate) if rate != 0.0 => Some(1.0 / rate),
            _ => None,
        }
    }
}
