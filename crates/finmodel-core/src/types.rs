use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entity identifier (opaque string, e.g. "GROUP" or "SUBSIDIARY_DE")
pub type EntityId = String;

/// Scenario identifier
pub type ScenarioId = i32;

/// Period identifier
pub type PeriodId = i32;

/// Line item code (uppercase, unique within a template)
pub type LineItemCode = String;

/// Driver code (uppercase)
pub type DriverCode = String;

/// Unit code (e.g. "tCO2e", "USD")
pub type UnitCode = String;

/// Three-letter ISO currency code
pub type CurrencyCode = String;

/// Statement kind a template describes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementType {
    Pl,
    Bs,
    Cf,
    Carbon,
    #[default]
    Unified,
}

/// Presentation hint for a line item.
///
/// Informational only: driver values are stored already signed and formula
/// results are used verbatim. The engine never re-applies the sign
/// convention on read, and callers must not either.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignConvention {
    Positive,
    Negative,
    #[default]
    Neutral,
}

/// FX rate flavour within a period
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FxRateType {
    #[default]
    Average,
    Closing,
    Opening,
}

impl FxRateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FxRateType::Average => "average",
            FxRateType::Closing => "closing",
            FxRateType::Opening => "opening",
        }
    }

    /// Parse a rate-type token as it appears in FX identifiers
    /// (case-insensitive). Returns `None` for unknown tokens.
    pub fn parse_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "average" => Some(FxRateType::Average),
            "closing" => Some(FxRateType::Closing),
            "opening" => Some(FxRateType::Opening),
            _ => None,
        }
    }
}

/// Context carried through a single calculation.
///
/// `time_index` expresses the offset of the value being resolved relative
/// to the period under calculation: 0 = current `[t]`, -1 = prior `[t-1]`,
/// -2 and below = deeper history served from persisted state.
#[derive(Debug, Clone)]
pub struct ValuationContext {
    pub scenario_id: ScenarioId,
    pub period_id: PeriodId,
    pub entity_id: EntityId,
    pub time_index: i32,
    /// Nesting level for future nested-scenario runs (0 = top level)
    pub recursion_depth: u32,
    /// Per-run cache of already-calculated values
    cached_values: BTreeMap<String, f64>,
}

impl ValuationContext {
    pub fn new(scenario_id: ScenarioId, period_id: PeriodId, entity_id: impl Into<EntityId>) -> Self {
        Self {
            scenario_id,
            period_id,
            entity_id: entity_id.into(),
            time_index: 0,
            recursion_depth: 0,
            cached_values: BTreeMap::new(),
        }
    }

    /// Derive a context with the given absolute time offset
    pub fn with_time_offset(&self, offset: i32) -> Self {
        let mut ctx = self.clone();
        ctx.time_index = offset;
        ctx
    }

    /// Derive a context for the prior period (`[t-1]`)
    pub fn with_prior_period(&self) -> Self {
        self.with_time_offset(-1)
    }

    /// Period actually addressed by this context: `period_id + time_index`
    pub fn effective_period(&self) -> PeriodId {
        self.period_id + self.time_index
    }

    pub fn cache_value(&mut self, code: impl Into<String>, value: f64) {
        self.cached_values.insert(code.into(), value);
    }

    pub fn cached_value(&self, code: &str) -> Option<f64> {
        self.cached_values.get(code).copied()
    }

    pub fn clear_cache(&mut self) {
        self.cached_values.clear();
    }
}

/// Balance sheet view carried between periods.
///
/// All line items are kept in `line_items`; the canonical totals are
/// additionally lifted into named slots for quick access.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub cash: f64,
    pub total_assets: f64,
    pub total_liabilities: f64,
    pub total_equity: f64,
    pub line_items: BTreeMap<LineItemCode, f64>,
}

impl BalanceSheet {
    /// Build a view from raw line items, lifting the canonical totals.
    pub fn from_line_items(line_items: BTreeMap<LineItemCode, f64>) -> Self {
        let get = |code: &str| line_items.get(code).copied().unwrap_or(0.0);
        Self {
            cash: get("CASH"),
            total_assets: get("TOTAL_ASSETS"),
            total_liabilities: get("TOTAL_LIABILITIES"),
            total_equity: get("TOTAL_EQUITY"),
            line_items,
        }
    }
}

/// P&L view extracted from a unified result (presentational)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlView {
    pub revenue: f64,
    pub ebitda: f64,
    pub ebit: f64,
    pub ebt: f64,
    pub net_income: f64,
    pub line_items: BTreeMap<LineItemCode, f64>,
}

/// Cash flow view extracted from a unified result (presentational)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CashFlowView {
    pub cf_operating: f64,
    pub cf_investing: f64,
    pub cf_financing: f64,
    pub cf_net: f64,
    pub cash_beginning: f64,
    pub cash_ending: f64,
    pub line_items: BTreeMap<LineItemCode, f64>,
}

/// A single per-(entity, scenario, period) input driver.
///
/// Values are stored already signed; negative categories (expenses,
/// losses) are negative numbers at rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverRecord {
    pub entity_id: EntityId,
    pub scenario_id: ScenarioId,
    pub period_id: PeriodId,
    pub driver_code: DriverCode,
    pub value: f64,
    pub unit_code: UnitCode,
}

/// One FX rate row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FxRate {
    pub scenario_id: ScenarioId,
    pub period_id: PeriodId,
    pub from_currency: CurrencyCode,
    pub to_currency: CurrencyCode,
    pub rate_type: FxRateType,
    pub rate: f64,
}

/// How a unit converts to its category base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversionType {
    Static,
    TimeVarying,
}

/// Catalog entry for one unit of measure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitDefinition {
    pub unit_code: UnitCode,
    pub unit_name: String,
    pub unit_category: String,
    pub conversion_type: ConversionType,
    /// Factor to the category base; only meaningful for static units
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_conversion_factor: Option<f64>,
    pub base_unit_code: UnitCode,
    pub display_symbol: String,
    #[serde(default)]
    pub description: String,
}

/// A physical-risk event with location, intensity and time window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalPeril {
    pub peril_id: i32,
    pub scenario_id: ScenarioId,
    pub peril_type: String,
    pub peril_code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub intensity: f64,
    pub intensity_unit: UnitCode,
    pub start_period: PeriodId,
    /// None = single-period event at `start_period`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_period: Option<PeriodId>,
    /// Zero or negative radius marks a point peril
    pub radius_km: f64,
    #[serde(default)]
    pub description: String,
}

impl PhysicalPeril {
    /// Periods this peril affects, in order
    pub fn affected_periods(&self) -> Vec<PeriodId> {
        match self.end_period {
            Some(end) => (self.start_period..=end).collect(),
            None => vec![self.start_period],
        }
    }
}

/// An asset and its exposure values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetExposure {
    pub asset_id: i32,
    pub asset_code: String,
    pub asset_name: String,
    pub asset_type: String,
    pub latitude: f64,
    pub longitude: f64,
    pub entity_code: String,
    pub replacement_value: f64,
    pub replacement_currency: CurrencyCode,
    pub inventory_value: f64,
    pub inventory_currency: CurrencyCode,
    pub annual_revenue: f64,
    pub revenue_currency: CurrencyCode,
}

/// Stored damage-function definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DamageFunctionDefinition {
    pub function_code: String,
    /// e.g. "PIECEWISE_LINEAR"
    pub function_type: String,
    /// Type-specific payload (JSON curve for piecewise-linear)
    pub curve_definition: String,
    #[serde(default)]
    pub description: String,
    pub peril_type: String,
    /// "PPE", "INVENTORY" or "BI"
    pub damage_target: String,
}

/// One point on a persisted MAC curve
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacCurvePoint {
    pub scenario_id: ScenarioId,
    pub period_id: PeriodId,
    pub action_code: String,
    pub cumulative_reduction_tco2e: f64,
    pub marginal_cost_per_tco2e: f64,
    pub annual_reduction_tco2e: f64,
    pub annual_cost: f64,
}
