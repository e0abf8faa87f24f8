//! Statement value provider: current-period and opening balance values.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::FinModelError;
use crate::providers::ValueProvider;
use crate::store::ModelStore;
use crate::types::{ScenarioId, ValuationContext};
use crate::FinModelResult;

/// Shared current-period value map. The engine publishes each computed
/// line item here so later formulas (and the tax provider) can see it.
pub type SharedValues = Rc<RefCell<BTreeMap<String, f64>>>;

/// Resolves statement line items against the current-period map, the
/// opening (prior closing) map, and optionally a historical store for deep
/// time references.
///
/// Resolution policy for simple (non-bracketed) references follows the
/// original engine:
/// - `time_index == 0`: current map, then opening map;
/// - `time_index == -1`: opening map, then current map;
/// - `time_index <= -2`: the historical store at the effective period when
///   one is configured, else current map then opening map.
///
/// Bracketed keys (`CASH[t-1]`) are also accepted literally: the target
/// index is `ctx.time_index + offset` and resolves against current /
/// opening / history relative to the context.
pub struct StatementValueProvider {
    current_values: SharedValues,
    opening_values: RefCell<BTreeMap<String, f64>>,
    history: Option<Rc<dyn ModelStore>>,
    entity_id: RefCell<String>,
    scenario_id: Cell<ScenarioId>,
}

impl StatementValueProvider {
    pub fn new(current_values: SharedValues) -> Self {
        Self {
            current_values,
            opening_values: RefCell::new(BTreeMap::new()),
            history: None,
            entity_id: RefCell::new(String::new()),
            scenario_id: Cell::new(0),
        }
    }

    /// Attach a historical store serving `[t-2]` and deeper references.
    pub fn with_history(mut self, store: Rc<dyn ModelStore>) -> Self {
        self.history = Some(store);
        self
    }

    pub fn set_context(&self, entity_id: &str, scenario_id: ScenarioId) {
        *self.entity_id.borrow_mut() = entity_id.to_string();
        self.scenario_id.set(scenario_id);
    }

    /// Prime the opening map with the prior period's closing values.
    pub fn set_opening_values(&self, values: BTreeMap<String, f64>) {
        *self.opening_values.borrow_mut() = values;
    }

    /// Publish a computed value into the current-period map.
    pub fn publish(&self, code: &str, value: f64) {
        self.current_values
            .borrow_mut()
            .insert(code.to_string(), value);
    }

    /// Reset the current-period map (start of a new calculation).
    pub fn clear_current_values(&self) {
        self.current_values.borrow_mut().clear();
    }

    fn current(&self, code: &str) -> Option<f64> {
        self.current_values.borrow().get(code).copied()
    }

    fn opening(&self, code: &str) -> Option<f64> {
        self.opening_values.borrow().get(code).copied()
    }

    fn fetch_history(&self, code: &str, period_id: i32) -> FinModelResult<f64> {
        let store = self
            .history
            .as_ref()
            .ok_or_else(|| FinModelError::UnresolvedIdentifier {
                code: format!("{code} (no historical store for period {period_id})"),
            })?;
        store
            .statement_value(&self.entity_id.borrow(), self.scenario_id.get(), period_id, code)?
            .ok_or_else(|| FinModelError::UnresolvedIdentifier {
                code: format!("{code} (no persisted value for period {period_id})"),
            })
    }

    fn missing(code: &str) -> FinModelError {
        FinModelError::UnresolvedIdentifier {
            code: code.to_string(),
        }
    }
}

impl ValueProvider for StatementValueProvider {
    fn has_value(&self, code: &str) -> bool {
        // Any well-formed time-series reference is claimed; resolution may
        // still fail in get_value.
        if parse_time_series(code).is_some() {
            return true;
        }
        self.current(code).is_some() || self.opening(code).is_some()
    }

    fn get_value(&self, code: &str, ctx: &ValuationContext) -> FinModelResult<f64> {
        if let Some((base, offset)) = parse_time_series(code) {
            let target_index = ctx.time_index + offset;
            return if target_index == ctx.time_index {
                self.current(&base).ok_or_else(|| Self::missing(&base))
            } else if target_index == ctx.time_index - 1 {
                self.opening(&base).ok_or_else(|| Self::missing(&base))
            } else {
                self.fetch_history(&base, ctx.period_id + target_index)
            };
        }

        match ctx.time_index {
            0 => self
                .current(code)
                .or_else(|| self.opening(code))
                .ok_or_else(|| Self::missing(code)),
            -1 => self
                .opening(code)
                .or_else(|| self.current(code))
                .ok_or_else(|| Self::missing(code)),
            _ => {
                if self.history.is_some() {
                    self.fetch_history(code, ctx.effective_period())
                } else {
                    self.current(code)
                        .or_else(|| self.opening(code))
                        .ok_or_else(|| Self::missing(code))
                }
            }
        }
    }
}

/// Parse `VARIABLE[t]`, `VARIABLE[t-1]`, `VARIABLE[t+2]` into the base
/// name and offset. Returns `None` for anything else.
fn parse_time_series(key: &str) -> Option<(String, i32)> {
    let open = key.find('[')?;
    if !key.ends_with(']') || open == 0 {
        return None;
    }

    let base = &key[..open];
    if !base
        .bytes()
        .all(|c| c.is_ascii_alphanumeric() || c == b'_')
    {
        return None;
    }

    let inner = &key[open + 1..key.len() - 1];
    let rest = inner.strip_prefix('t')?;
    if rest.is_empty() {
        return Some((base.to_string(), 0));
    }

    let (sign, digits) = match rest.as_bytes()[0] {
        b'+' => (1, &rest[1..]),
        b'-' => (-1, &rest[1..]),
        _ => return None,
    };
    if digits.is_empty() || !digits.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let magnitude: i32 = digits.parse().ok()?;
    Some((base.to_string(), sign * magnitude))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use pretty_assertions::assert_eq;

    fn provider() -> StatementValueProvider {
        let current: SharedValues = Rc::new(RefCell::new(BTreeMap::new()));
        let p = StatementValueProvider::new(current);
        p.set_context("ENTITY_1", 1);
        p.publish("CASH", 500.0);
        p.set_opening_values(BTreeMap::from([
            ("CASH".to_string(), 400.0),
            ("RETAINED_EARNINGS".to_string(), 1000.0),
        ]));
        p
    }

    #[test]
    fn test_parse_time_series() {
        assert_eq!(parse_time_series("CASH[t-1]"), Some(("CASH".into(), -1)));
        assert_eq!(parse_time_series("CASH[t]"), Some(("CASH".into(), 0)));
        assert_eq!(parse_time_series("X[t+2]"), Some(("X".into(), 2)));
        assert_eq!(parse_time_series("CASH"), None);
        assert_eq!(parse_time_series("CASH[x]"), None);
        assert_eq!(parse_time_series("[t-1]"), None);
    }

    #[test]
    fn test_simple_reference_current_context() {
        let p = provider();
        let ctx = ValuationContext::new(1, 3, "ENTITY_1");
        // Current map wins at time_index 0
        assert_eq!(p.get_value("CASH", &ctx).unwrap(), 500.0);
        // Falls back to opening for codes only there
        assert_eq!(p.get_value("RETAINED_EARNINGS", &ctx).unwrap(), 1000.0);
    }

    #[test]
    fn test_simple_reference_prior_context_prefers_opening() {
        let p = provider();
        let ctx = ValuationContext::new(1, 3, "ENTITY_1").with_prior_period();
        assert_eq!(p.get_value("CASH", &ctx).unwrap(), 400.0);
    }

    #[test]
    fn test_bracketed_key_resolution() {
        let p = provider();
        let ctx = ValuationContext::new(1, 3, "ENTITY_1");
        assert_eq!(p.get_value("CASH[t]", &ctx).unwrap(), 500.0);
        assert_eq!(p.get_value("CASH[t-1]", &ctx).unwrap(), 400.0);
    }

    #[test]
    fn test_deep_history_through_store() {
        let store = Rc::new(InMemoryStore::new());
        store
            .store_statement_values(
                "ENTITY_1",
                1,
                1,
                &BTreeMap::from([("CASH".to_string(), 250.0)]),
            )
            .unwrap();

        let current: SharedValues = Rc::new(RefCell::new(BTreeMap::new()));
        let p = StatementValueProvider::new(current).with_history(store);
        p.set_context("ENTITY_1", 1);

        let ctx = ValuationContext::new(1, 3, "ENTITY_1");
        // [t-2] from period 3 resolves period 1
        assert_eq!(p.get_value("CASH[t-2]", &ctx).unwrap(), 250.0);
        // Simple reference with a deep time_index takes the same path
        let deep = ctx.with_time_offset(-2);
        assert_eq!(p.get_value("CASH", &deep).unwrap(), 250.0);
    }

    #[test]
    fn test_deep_history_without_store_falls_back() {
        let p = provider();
        let deep = ValuationContext::new(1, 3, "ENTITY_1").with_time_offset(-2);
        // No history store: consult current then opening
        assert_eq!(p.get_value("CASH", &deep).unwrap(), 500.0);
    }

    #[test]
    fn test_optimistic_claim_can_still_fail() {
        let p = provider();
        assert!(p.has_value("UNKNOWN[t-1]"));
        let ctx = ValuationContext::new(1, 3, "ENTITY_1");
        let err = p.get_value("UNKNOWN[t-1]", &ctx).unwrap_err();
        assert!(matches!(err, FinModelError::UnresolvedIdentifier { .. }));
    }

    #[test]
    fn test_clear_current_values() {
        let p = provider();
        p.clear_current_values();
        assert!(!p.has_value("CASH") || p.opening("CASH").is_some());
        let ctx = ValuationContext::new(1, 3, "ENTITY_1");
        // Current gone, opening still serves the simple reference
        assert_eq!(p.get_value("CASH", &ctx).unwrap(), 400.0);
    }
}
