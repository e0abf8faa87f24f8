//! Tax strategies and the `tax:` value provider.

use std::collections::BTreeMap;

use crate::error::FinModelError;
use crate::providers::statement::SharedValues;
use crate::providers::ValueProvider;
use crate::types::ValuationContext;
use crate::FinModelResult;

/// Pluggable tax computation.
///
/// Strategies receive the pre-tax income, the calculation context and a
/// parameter map; they return a non-negative tax amount.
pub trait TaxStrategy {
    fn calculate_tax(
        &self,
        pre_tax_income: f64,
        ctx: &ValuationContext,
        params: &BTreeMap<String, f64>,
    ) -> f64;

    /// Strategy identifier (e.g. "FLAT_RATE")
    fn name(&self) -> &str;
}

/// Constant-rate tax: `max(0, pre_tax_income * rate)`.
///
/// A `rate` entry in the parameter map overrides the configured rate.
pub struct FlatRateStrategy {
    rate: f64,
}

impl FlatRateStrategy {
    pub fn new(rate: f64) -> Self {
        Self { rate }
    }
}

impl TaxStrategy for FlatRateStrategy {
    fn calculate_tax(
        &self,
        pre_tax_income: f64,
        _ctx: &ValuationContext,
        params: &BTreeMap<String, f64>,
    ) -> f64 {
        let rate = params.get("rate").copied().unwrap_or(self.rate);
        (pre_tax_income * rate).max(0.0)
    }

    fn name(&self) -> &str {
        "FLAT_RATE"
    }
}

/// One marginal tax bracket: income above `threshold` is taxed at `rate`
/// until the next bracket's threshold.
#[derive(Debug, Clone, Copy)]
pub struct TaxBracket {
    pub threshold: f64,
    pub rate: f64,
}

/// Marginal bracket tax. Brackets are sorted by threshold at
/// construction.
pub struct ProgressiveStrategy {
    brackets: Vec<TaxBracket>,
}

impl ProgressiveStrategy {
    pub fn new(mut brackets: Vec<TaxBracket>) -> Self {
        brackets.sort_by(|a, b| {
            a.threshold
                .partial_cmp(&b.threshold)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Self { brackets }
    }
}

impl TaxStrategy for ProgressiveStrategy {
    fn calculate_tax(
        &self,
        pre_tax_income: f64,
        _ctx: &ValuationContext,
        _params: &BTreeMap<String, f64>,
    ) -> f64 {
        if pre_tax_income <= 0.0 {
            return 0.0;
        }

        let mut tax = 0.0;
        for (i, bracket) in self.brackets.iter().enumerate() {
            if pre_tax_income <= bracket.threshold {
                break;
            }
            let upper = self
                .brackets
                .get(i + 1)
                .map(|b| b.threshold)
                .unwrap_or(f64::INFINITY);
            let taxable = pre_tax_income.min(upper) - bracket.threshold;
            tax += taxable * bracket.rate;
        }
        tax
    }

    fn name(&self) -> &str {
        "PROGRESSIVE"
    }
}

/// AMT-style minimum tax: the larger of two strategies' results.
pub struct MinimumTaxStrategy {
    regular: Box<dyn TaxStrategy>,
    alternative: Box<dyn TaxStrategy>,
}

impl MinimumTaxStrategy {
    pub fn new(regular: Box<dyn TaxStrategy>, alternative: Box<dyn TaxStrategy>) -> Self {
        Self {
            regular,
            alternative,
        }
    }
}

impl TaxStrategy for MinimumTaxStrategy {
    fn calculate_tax(
        &self,
        pre_tax_income: f64,
        ctx: &ValuationContext,
        params: &BTreeMap<String, f64>,
    ) -> f64 {
        let regular = self.regular.calculate_tax(pre_tax_income, ctx, params);
        let alternative = self.alternative.calculate_tax(pre_tax_income, ctx, params);
        regular.max(alternative)
    }

    fn name(&self) -> &str {
        "MINIMUM_TAX"
    }
}

/// Registry of named tax strategies.
///
/// Kept on the evaluating provider rather than in any global state so
/// evaluations stay deterministic given their inputs.
#[derive(Default)]
pub struct TaxStrategyRegistry {
    strategies: BTreeMap<String, Box<dyn TaxStrategy>>,
}

impl TaxStrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in strategies: a 21% flat rate,
    /// a three-bracket progressive schedule, and a minimum tax taking the
    /// larger of the 21% regular and a 15% alternative computation.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("FLAT_RATE", Box::new(FlatRateStrategy::new(0.21)));
        registry.register(
            "PROGRESSIVE",
            Box::new(ProgressiveStrategy::new(vec![
                TaxBracket {
                    threshold: 0.0,
                    rate: 0.10,
                },
                TaxBracket {
                    threshold: 50_000.0,
                    rate: 0.20,
                },
                TaxBracket {
                    threshold: 100_000.0,
                    rate: 0.30,
                },
            ])),
        );
        registry.register(
            "MINIMUM_TAX",
            Box::new(MinimumTaxStrategy::new(
                Box::new(FlatRateStrategy::new(0.21)),
                Box::new(FlatRateStrategy::new(0.15)),
            )),
        );
        registry
    }

    pub fn register(&mut self, name: &str, strategy: Box<dyn TaxStrategy>) {
        self.strategies.insert(name.to_string(), strategy);
    }

    pub fn has_strategy(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    pub fn compute_tax(
        &self,
        strategy_name: &str,
        pre_tax_income: f64,
        ctx: &ValuationContext,
        params: &BTreeMap<String, f64>,
    ) -> FinModelResult<f64> {
        let strategy =
            self.strategies
                .get(strategy_name)
                .ok_or_else(|| FinModelError::InvalidInput {
                    field: "tax_strategy".to_string(),
                    reason: format!("unknown strategy '{strategy_name}'"),
                })?;
        Ok(strategy.calculate_tax(pre_tax_income, ctx, params))
    }

    /// Effective rate: tax / pre-tax income (zero for non-positive income).
    pub fn effective_rate(
        &self,
        strategy_name: &str,
        pre_tax_income: f64,
        ctx: &ValuationContext,
        params: &BTreeMap<String, f64>,
    ) -> FinModelResult<f64> {
        if pre_tax_income <= 0.0 {
            return Ok(0.0);
        }
        Ok(self.compute_tax(strategy_name, pre_tax_income, ctx, params)? / pre_tax_income)
    }
}

/// Resolves `tax:<STRATEGY>` references by computing tax on the
/// current-period pre-tax income.
///
/// Pre-tax income is read from the shared current-period map under the
/// canonical keys `PRE_TAX_INCOME`, then `EBT`.
pub struct TaxValueProvider {
    registry: TaxStrategyRegistry,
    current_values: SharedValues,
    params: BTreeMap<String, f64>,
}

impl TaxValueProvider {
    pub fn new(registry: TaxStrategyRegistry, current_values: SharedValues) -> Self {
        Self {
            registry,
            current_values,
            params: BTreeMap::new(),
        }
    }

    pub fn set_params(&mut self, params: BTreeMap<String, f64>) {
        self.params = params;
    }

    pub fn registry_mut(&mut self) -> &mut TaxStrategyRegistry {
        &mut self.registry
    }

    fn pre_tax_income(&self) -> FinModelResult<f64> {
        let values = self.current_values.borrow();
        values
            .get("PRE_TAX_INCOME")
            .or_else(|| values.get("EBT"))
            .copied()
            .ok_or_else(|| FinModelError::UnresolvedIdentifier {
                code: "PRE_TAX_INCOME (or EBT) required for tax computation".to_string(),
            })
    }
}

impl ValueProvider for TaxValueProvider {
    fn has_value(&self, code: &str) -> bool {
        code.strip_prefix("tax:").is_some_and(|s| !s.is_empty())
    }

    fn get_value(&self, code: &str, ctx: &ValuationContext) -> FinModelResult<f64> {
        let strategy_name =
            code.strip_prefix("tax:")
                .ok_or_else(|| FinModelError::UnresolvedIdentifier {
                    code: code.to_string(),
                })?;
        let income = self.pre_tax_income()?;
        self.registry
            .compute_tax(strategy_name, income, ctx, &self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ctx() -> ValuationContext {
        ValuationContext::new(1, 1, "E")
    }

    #[test]
    fn test_flat_rate() {
        let strategy = FlatRateStrategy::new(0.21);
        assert_eq!(
            strategy.calculate_tax(100_000.0, &ctx(), &BTreeMap::new()),
            21_000.0
        );
        // Losses produce zero tax, not a credit
        assert_eq!(strategy.calculate_tax(-50_000.0, &ctx(), &BTreeMap::new()), 0.0);
    }

    #[test]
    fn test_flat_rate_param_override() {
        let strategy = FlatRateStrategy::new(0.21);
        let params = BTreeMap::from([("rate".to_string(), 0.30)]);
        assert_eq!(strategy.calculate_tax(100.0, &ctx(), &params), 30.0);
    }

    #[test]
    fn test_progressive_marginal() {
        let strategy = ProgressiveStrategy::new(vec![
            TaxBracket {
                threshold: 0.0,
                rate: 0.10,
            },
            TaxBracket {
                threshold: 50_000.0,
                rate: 0.20,
            },
            TaxBracket {
                threshold: 100_000.0,
                rate: 0.30,
            },
        ]);
        // 75k: 50k at 10% + 25k at 20% = 10k
        assert_eq!(
            strategy.calculate_tax(75_000.0, &ctx(), &BTreeMap::new()),
            10_000.0
        );
        // 150k: 5k + 10k + 15k = 30k
        assert_eq!(
            strategy.calculate_tax(150_000.0, &ctx(), &BTreeMap::new()),
            30_000.0
        );
        assert_eq!(strategy.calculate_tax(-1.0, &ctx(), &BTreeMap::new()), 0.0);
    }

    #[test]
    fn test_progressive_sorts_brackets() {
        let strategy = ProgressiveStrategy::new(vec![
            TaxBracket {
                threshold: 50_000.0,
                rate: 0.20,
            },
            TaxBracket {
                threshold: 0.0,
                rate: 0.10,
            },
        ]);
        assert_eq!(
            strategy.calculate_tax(60_000.0, &ctx(), &BTreeMap::new()),
            5_000.0 + 2_000.0
        );
    }

    #[test]
    fn test_minimum_tax_takes_maximum() {
        let strategy = MinimumTaxStrategy::new(
            Box::new(FlatRateStrategy::new(0.10)),
            Box::new(FlatRateStrategy::new(0.15)),
        );
        assert_eq!(
            strategy.calculate_tax(1_000.0, &ctx(), &BTreeMap::new()),
            150.0
        );
    }

    #[test]
    fn test_provider_reads_pre_tax_income() {
        let current: SharedValues = Rc::new(RefCell::new(BTreeMap::from([(
            "PRE_TAX_INCOME".to_string(),
            100_000.0,
        )])));
        let provider = TaxValueProvider::new(TaxStrategyRegistry::with_defaults(), current);

        assert!(provider.has_value("tax:FLAT_RATE"));
        assert!(!provider.has_value("tax:"));
        assert!(!provider.has_value("REVENUE"));
        assert_eq!(provider.get_value("tax:FLAT_RATE", &ctx()).unwrap(), 21_000.0);
    }

    #[test]
    fn test_provider_falls_back_to_ebt() {
        let current: SharedValues =
            Rc::new(RefCell::new(BTreeMap::from([("EBT".to_string(), 50_000.0)])));
        let provider = TaxValueProvider::new(TaxStrategyRegistry::with_defaults(), current);
        assert_eq!(provider.get_value("tax:FLAT_RATE", &ctx()).unwrap(), 10_500.0);
    }

    #[test]
    fn test_unknown_strategy_fails() {
        let current: SharedValues = Rc::new(RefCell::new(BTreeMap::from([(
            "EBT".to_string(),
            1.0,
        )])));
        let provider = TaxValueProvider::new(TaxStrategyRegistry::with_defaults(), current);
        let err = provider.get_value("tax:KLINGON", &ctx()).unwrap_err();
        assert!(matches!(err, FinModelError::InvalidInput { .. }));
    }

    #[test]
    fn test_effective_rate() {
        let registry = TaxStrategyRegistry::with_defaults();
        let rate = registry
            .effective_rate("PROGRESSIVE", 75_000.0, &ctx(), &BTreeMap::new())
            .unwrap();
        assert!((rate - 10_000.0 / 75_000.0).abs() < 1e-12);
    }
}
