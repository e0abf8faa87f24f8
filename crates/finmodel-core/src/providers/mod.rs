//! Value providers: the pluggable resolution chain behind the formula
//! evaluator.
//!
//! A provider claims codes via `has_value` and serves them via `get_value`.
//! The engine passes an ordered slice of providers for each evaluation and
//! the first claimant wins. `has_value` may be optimistic: the FX and
//! statement providers claim whole naming patterns and can still fail in
//! `get_value`.
//!
//! Providers are per-scenario objects with `RefCell` caches; construct one
//! set per scenario rather than sharing across concurrently running
//! scenarios.

pub mod driver;
pub mod fx;
pub mod statement;
pub mod tax;

pub use driver::DriverValueProvider;
pub use fx::FxValueProvider;
pub use statement::StatementValueProvider;
pub use tax::{
    FlatRateStrategy, MinimumTaxStrategy, ProgressiveStrategy, TaxBracket, TaxStrategy,
    TaxStrategyRegistry, TaxValueProvider,
};

use crate::types::ValuationContext;
use crate::FinModelResult;

/// A source of variable values for formula evaluation.
pub trait ValueProvider {
    /// Whether this provider claims the given code. May be optimistic for
    /// pattern-based providers; resolution errors surface in `get_value`.
    fn has_value(&self, code: &str) -> bool;

    /// Resolve the code under the given context.
    fn get_value(&self, code: &str, ctx: &ValuationContext) -> FinModelResult<f64>;
}
