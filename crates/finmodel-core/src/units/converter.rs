//! Unit conversion with static and time-varying factors.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::FinModelError;
use crate::store::ModelStore;
use crate::types::{ConversionType, PeriodId, UnitDefinition};
use crate::units::FxRateProvider;
use crate::FinModelResult;

/// Converts values between units of measure.
///
/// The unit catalog is loaded eagerly. Static units convert with a cached
/// constant factor to their category base; time-varying units (currencies)
/// require a period and delegate to the FX provider, converting to the
/// category's base currency at that period's average rate.
#[derive(Debug, Clone)]
pub struct UnitConverter {
    definitions: HashMap<String, UnitDefinition>,
    category_base: HashMap<String, String>,
    fx: Option<Rc<FxRateProvider>>,
}

impl UnitConverter {
    /// Build from an explicit catalog.
    pub fn new(
        units: Vec<UnitDefinition>,
        fx: Option<Rc<FxRateProvider>>,
    ) -> FinModelResult<Self> {
        if units.is_empty() {
            return Err(FinModelError::InvalidInput {
                field: "unit_definitions".to_string(),
                reason: "unit catalog is empty".to_string(),
            });
        }

        let mut definitions = HashMap::new();
        let mut category_base = HashMap::new();
        for unit in units {
            category_base
                .entry(unit.unit_category.clone())
                .or_insert_with(|| unit.base_unit_code.clone());
            definitions.insert(unit.unit_code.clone(), unit);
        }

        Ok(Self {
            definitions,
            category_base,
            fx,
        })
    }

    /// Load the catalog from the store.
    pub fn from_store(
        store: &dyn ModelStore,
        fx: Option<Rc<FxRateProvider>>,
    ) -> FinModelResult<Self> {
        Self::new(store.unit_definitions()?, fx)
    }

    /// Convert a value to the base unit of its category.
    pub fn to_base_unit(
        &self,
        value: f64,
        unit_code: &str,
        period_id: Option<PeriodId>,
    ) -> FinModelResult<f64> {
        let def = self.definition(unit_code)?;
        if unit_code == def.base_unit_code {
            return Ok(value);
        }
        Ok(value * self.factor_to_base(def, period_id)?)
    }

    /// Convert a value from the base unit of the target unit's category.
    pub fn from_base_unit(
        &self,
        value: f64,
        unit_code: &str,
        period_id: Option<PeriodId>,
    ) -> FinModelResult<f64> {
        let def = self.definition(unit_code)?;
        if unit_code == def.base_unit_code {
            return Ok(value);
        }
        let factor = self.factor_to_base(def, period_id)?;
        if factor == 0.0 {
            return Err(FinModelError::DivisionByZero {
                context: format!("conversion factor for unit '{unit_code}'"),
            });
        }
        Ok(value / factor)
    }

    /// Convert between any two units of the same category
    /// (from -> base -> to). Cross-category conversions are rejected.
    pub fn convert(
        &self,
        value: f64,
        from_unit: &str,
        to_unit: &str,
        period_id: Option<PeriodId>,
    ) -> FinModelResult<f64> {
        let from_def = self.definition(from_unit)?;
        let to_def = self.definition(to_unit)?;

        if from_def.unit_category != to_def.unit_category {
            return Err(FinModelError::CrossCategoryConversion {
                from: from_def.unit_category.clone(),
                to: to_def.unit_category.clone(),
            });
        }

        let in_base = self.to_base_unit(value, from_unit, period_id)?;
        self.from_base_unit(in_base, to_unit, period_id)
    }

    pub fn is_time_varying(&self, unit_code: &str) -> bool {
        self.definitions
            .get(unit_code)
            .is_some_and(|d| d.conversion_type == ConversionType::TimeVarying)
    }

    pub fn is_valid_unit(&self, unit_code: &str) -> bool {
        self.definitions.contains_key(unit_code)
    }

    /// Display symbol, falling back to the code itself.
    pub fn display_symbol(&self, unit_code: &str) -> String {
        self.definitions
            .get(unit_code)
            .map(|d| d.display_symbol.clone())
            .unwrap_or_else(|| unit_code.to_string())
    }

    pub fn base_unit(&self, category: &str) -> FinModelResult<&str> {
        self.category_base
            .get(category)
            .map(String::as_str)
            .ok_or_else(|| FinModelError::InvalidInput {
                field: "unit_category".to_string(),
                reason: format!("unknown unit category '{category}'"),
            })
    }

    pub fn category(&self, unit_code: &str) -> FinModelResult<&str> {
        Ok(&self.definition(unit_code)?.unit_category)
    }

    fn definition(&self, unit_code: &str) -> FinModelResult<&UnitDefinition> {
        self.definitions
            .get(unit_code)
            .ok_or_else(|| FinModelError::UnknownUnit {
                unit: unit_code.to_string(),
            })
    }

    fn factor_to_base(
        &self,
        def: &UnitDefinition,
        period_id: Option<PeriodId>,
    ) -> FinModelResult<f64> {
        match def.conversion_type {
            ConversionType::Static => {
                def.static_conversion_factor
                    .ok_or_else(|| FinModelError::InvalidInput {
                        field: "static_conversion_factor".to_string(),
                        reason: format!("missing for static unit '{}'", def.unit_code),
                    })
            }
            ConversionType::TimeVarying => {
                let period = period_id.ok_or_else(|| FinModelError::InvalidInput {
                    field: "period_id".to_string(),
                    reason: format!("required for time-varying unit '{}'", def.unit_code),
                })?;
                let fx = self.fx.as_ref().ok_or_else(|| FinModelError::InvalidInput {
                    field: "fx_provider".to_string(),
                    reason: format!(
                        "required for time-varying unit '{}'",
                        def.unit_code
                    ),
                })?;
                fx.rate(&def.unit_code, &def.base_unit_code, period)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::{FxRate, FxRateType};
    use pretty_assertions::assert_eq;

    fn carbon_units() -> Vec<UnitDefinition> {
        let unit = |code: &str, factor: Option<f64>, conversion_type| UnitDefinition {
            unit_code: code.to_string(),
            unit_name: code.to_string(),
            unit_category: "CARBON".to_string(),
            conversion_type,
            static_conversion_factor: factor,
            base_unit_code: "tCO2e".to_string(),
            display_symbol: code.to_string(),
            description: String::new(),
        };
        vec![
            unit("tCO2e", Some(1.0), ConversionType::Static),
            unit("kgCO2e", Some(0.001), ConversionType::Static),
            unit("MtCO2e", Some(1_000_000.0), ConversionType::Static),
        ]
    }

    fn currency_units() -> Vec<UnitDefinition> {
        let unit = |code: &str| UnitDefinition {
            unit_code: code.to_string(),
            unit_name: code.to_string(),
            unit_category: "CURRENCY".to_string(),
            conversion_type: ConversionType::TimeVarying,
            static_conversion_factor: None,
            base_unit_code: "CHF".to_string(),
            display_symbol: code.to_string(),
            description: String::new(),
        };
        vec![unit("CHF"), unit("USD"), unit("EUR")]
    }

    #[test]
    fn test_static_conversion() {
        let converter = UnitConverter::new(carbon_units(), None).unwrap();
        assert_eq!(converter.to_base_unit(500_000.0, "kgCO2e", None).unwrap(), 500.0);
        assert_eq!(converter.to_base_unit(0.3, "MtCO2e", None).unwrap(), 300_000.0);
        assert_eq!(converter.to_base_unit(200.0, "tCO2e", None).unwrap(), 200.0);
    }

    #[test]
    fn test_round_trip() {
        let converter = UnitConverter::new(carbon_units(), None).unwrap();
        let v = 123.456;
        let base = converter.to_base_unit(v, "kgCO2e", None).unwrap();
        let back = converter.from_base_unit(base, "kgCO2e", None).unwrap();
        assert!((back - v).abs() / v < 1e-6);
    }

    #[test]
    fn test_convert_within_category() {
        let converter = UnitConverter::new(carbon_units(), None).unwrap();
        // 1 MtCO2e = 1e9 kgCO2e
        let kg = converter.convert(1.0, "MtCO2e", "kgCO2e", None).unwrap();
        assert_eq!(kg, 1e9);
    }

    #[test]
    fn test_cross_category_rejected() {
        let mut units = carbon_units();
        units.extend(currency_units());
        let converter = UnitConverter::new(units, None).unwrap();
        let err = converter.convert(1.0, "kgCO2e", "USD", Some(1)).unwrap_err();
        assert!(matches!(err, FinModelError::CrossCategoryConversion { .. }));
    }

    #[test]
    fn test_time_varying_requires_period_and_fx() {
        let store = InMemoryStore::new();
        store.add_fx_rate(FxRate {
            scenario_id: 1,
            period_id: 3,
            from_currency: "USD".into(),
            to_currency: "CHF".into(),
            rate_type: FxRateType::Average,
            rate: 0.9,
        });
        let fx = Rc::new(FxRateProvider::from_store(&store, 1).unwrap());
        let converter = UnitConverter::new(currency_units(), Some(fx)).unwrap();

        assert_eq!(converter.to_base_unit(100.0, "USD", Some(3)).unwrap(), 90.0);

        let err = converter.to_base_unit(100.0, "USD", None).unwrap_err();
        assert!(matches!(err, FinModelError::InvalidInput { .. }));
    }

    #[test]
    fn test_unknown_unit() {
        let converter = UnitConverter::new(carbon_units(), None).unwrap();
        let err = converter.to_base_unit(1.0, "FURLONG", None).unwrap_err();
        assert!(matches!(err, FinModelError::UnknownUnit { .. }));
    }

    #[test]
    fn test_helper_accessors() {
        let converter = UnitConverter::new(carbon_units(), None).unwrap();
        assert!(converter.is_valid_unit("kgCO2e"));
        assert!(!converter.is_time_varying("kgCO2e"));
        assert_eq!(converter.base_unit("CARBON").unwrap(), "tCO2e");
        assert_eq!(converter.category("MtCO2e").unwrap(), "CARBON");
        assert_eq!(converter.display_symbol("NOT_A_UNIT"), "NOT_A_UNIT");
    }
}
