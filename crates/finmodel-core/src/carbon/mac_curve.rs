//! Marginal abatement cost (MAC) curve aggregation.
//!
//! A MAC sweep runs a base scenario plus one scenario per candidate
//! action. For each action the builder computes the emission reduction
//! against the base and the annualised cost per tonne, sorts the actions
//! from cheapest to most expensive, and attaches cumulative reductions.
//! The persisted curve replaces any previous points for the same
//! (scenario, period).

use serde::{Deserialize, Serialize};
use std::rc::Rc;

use tracing::debug;

use crate::actions::ManagementAction;
use crate::error::FinModelError;
use crate::store::ModelStore;
use crate::types::{MacCurvePoint, PeriodId, ScenarioId};
use crate::FinModelResult;

/// Marginal cost reported when an action reduces nothing.
const ZERO_REDUCTION_SENTINEL: f64 = 1e9;

const ZERO_REDUCTION_EPSILON: f64 = 1e-6;

/// Per-action result of a MAC sweep: the action's costs plus the
/// emissions its single-action scenario produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_code: String,
    #[serde(default)]
    pub action_name: String,
    #[serde(default)]
    pub action_category: String,
    pub capex: f64,
    pub opex_annual: f64,
    /// Emissions of the scenario where only this action is active
    pub emissions: f64,
}

impl ActionOutcome {
    /// Outcome from an action row plus its scenario's measured emissions.
    pub fn from_action(action: &ManagementAction, emissions: f64) -> Self {
        Self {
            action_code: action.action_code.clone(),
            action_name: action.action_name.clone(),
            action_category: action.action_category.clone(),
            capex: action.capex,
            opex_annual: action.opex_annual,
            emissions,
        }
    }
}

/// One point on the curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacPoint {
    pub action_code: String,
    pub action_name: String,
    pub action_category: String,
    pub capex: f64,
    pub opex_annual: f64,
    /// Amortised capex plus annual opex
    pub total_annual_cost: f64,
    pub annual_reduction_tco2e: f64,
    pub marginal_cost_per_tco2e: f64,
    pub cumulative_reduction_tco2e: f64,
}

/// A complete curve with summary statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacCurve {
    pub scenario_id: ScenarioId,
    pub period_id: PeriodId,
    /// Sorted ascending by marginal cost
    pub points: Vec<MacPoint>,
    pub total_reduction_potential: f64,
    pub total_annual_cost: f64,
    pub total_capex: f64,
    pub total_opex: f64,
    pub weighted_average_cost: f64,
    /// cost < 0 (net savings)
    pub negative_cost_count: usize,
    /// 0 <= cost < 50 per tonne
    pub low_cost_count: usize,
    /// 50 <= cost < 100 per tonne
    pub medium_cost_count: usize,
    /// cost >= 100 per tonne
    pub high_cost_count: usize,
}

impl MacCurve {
    fn empty(scenario_id: ScenarioId, period_id: PeriodId) -> Self {
        Self {
            scenario_id,
            period_id,
            points: Vec::new(),
            total_reduction_potential: 0.0,
            total_annual_cost: 0.0,
            total_capex: 0.0,
            total_opex: 0.0,
            weighted_average_cost: 0.0,
            negative_cost_count: 0,
            low_cost_count: 0,
            medium_cost_count: 0,
            high_cost_count: 0,
        }
    }

    fn categorize(&mut self, marginal_cost: f64) {
        if marginal_cost < 0.0 {
            self.negative_cost_count += 1;
        } else if marginal_cost < 50.0 {
            self.low_cost_count += 1;
        } else if marginal_cost < 100.0 {
            self.medium_cost_count += 1;
        } else {
            self.high_cost_count += 1;
        }
    }

    fn finalise(&mut self) {
        self.points.sort_by(|a, b| {
            a.marginal_cost_per_tco2e
                .partial_cmp(&b.marginal_cost_per_tco2e)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut cumulative = 0.0;
        for point in &mut self.points {
            cumulative += point.annual_reduction_tco2e;
            point.cumulative_reduction_tco2e = cumulative;
        }

        self.weighted_average_cost = if self.total_reduction_potential > ZERO_REDUCTION_EPSILON {
            self.total_annual_cost / self.total_reduction_potential
        } else {
            0.0
        };
    }
}

/// Builds and persists MAC curves from sweep results.
pub struct MacCurveBuilder {
    store: Rc<dyn ModelStore>,
    capex_amortization_years: i32,
}

impl MacCurveBuilder {
    /// Default capex amortisation horizon is 10 years.
    pub fn new(store: Rc<dyn ModelStore>) -> Self {
        Self {
            store,
            capex_amortization_years: 10,
        }
    }

    pub fn with_amortization_years(mut self, years: i32) -> FinModelResult<Self> {
        if years <= 0 {
            return Err(FinModelError::InvalidInput {
                field: "capex_amortization_years".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        self.capex_amortization_years = years;
        Ok(self)
    }

    /// Cost per tonne: `(capex / amortisation_years + opex) / reduction`,
    /// with a large sentinel when the reduction is (near) zero.
    pub fn marginal_cost(&self, capex: f64, opex_annual: f64, reduction_annual: f64) -> f64 {
        if reduction_annual.abs() < ZERO_REDUCTION_EPSILON {
            return ZERO_REDUCTION_SENTINEL;
        }
        let capex_annual = capex / f64::from(self.capex_amortization_years);
        (capex_annual + opex_annual) / reduction_annual
    }

    /// Aggregate a MAC sweep into a curve: each action's reduction is the
    /// base scenario's emissions minus its own scenario's emissions.
    pub fn build_curve(
        &self,
        scenario_id: ScenarioId,
        period_id: PeriodId,
        base_emissions: f64,
        outcomes: &[ActionOutcome],
    ) -> MacCurve {
        let mut curve = MacCurve::empty(scenario_id, period_id);

        for outcome in outcomes {
            let reduction = base_emissions - outcome.emissions;
            let capex_annual = outcome.capex / f64::from(self.capex_amortization_years);
            let total_annual_cost = capex_annual + outcome.opex_annual;
            let marginal_cost = self.marginal_cost(outcome.capex, outcome.opex_annual, reduction);

            curve.total_reduction_potential += reduction;
            curve.total_annual_cost += total_annual_cost;
            curve.total_capex += outcome.capex;
            curve.total_opex += outcome.opex_annual;
            curve.categorize(marginal_cost);

            curve.points.push(MacPoint {
                action_code: outcome.action_code.clone(),
                action_name: outcome.action_name.clone(),
                action_category: outcome.action_category.clone(),
                capex: outcome.capex,
                opex_annual: outcome.opex_annual,
                total_annual_cost,
                annual_reduction_tco2e: reduction,
                marginal_cost_per_tco2e: marginal_cost,
                cumulative_reduction_tco2e: 0.0,
            });
        }

        curve.finalise();
        debug!(
            scenario_id,
            period_id,
            points = curve.points.len(),
            "built MAC curve"
        );
        curve
    }

    /// Persist the curve, replacing any previous points under
    /// (scenario, period).
    pub fn store_curve(&self, curve: &MacCurve) -> FinModelResult<()> {
        let points: Vec<MacCurvePoint> = curve
            .points
            .iter()
            .map(|p| MacCurvePoint {
                scenario_id: curve.scenario_id,
                period_id: curve.period_id,
                action_code: p.action_code.clone(),
                cumulative_reduction_tco2e: p.cumulative_reduction_tco2e,
                marginal_cost_per_tco2e: p.marginal_cost_per_tco2e,
                annual_reduction_tco2e: p.annual_reduction_tco2e,
                annual_cost: p.total_annual_cost,
            })
            .collect();
        self.store
            .replace_mac_curve_points(curve.scenario_id, curve.period_id, &points)
    }

    /// Read a persisted curve back, recomputing the summary statistics.
    pub fn load_curve(
        &self,
        scenario_id: ScenarioId,
        period_id: PeriodId,
    ) -> FinModelResult<MacCurve> {
        let mut curve = MacCurve::empty(scenario_id, period_id);

        for stored in self.store.mac_curve_points(scenario_id, period_id)? {
            curve.total_reduction_potential += stored.annual_reduction_tco2e;
            curve.total_annual_cost += stored.annual_cost;
            curve.categorize(stored.marginal_cost_per_tco2e);
            curve.points.push(MacPoint {
                action_code: stored.action_code,
                action_name: String::new(),
                action_category: String::new(),
                capex: 0.0,
                opex_annual: 0.0,
                total_annual_cost: stored.annual_cost,
                annual_reduction_tco2e: stored.annual_reduction_tco2e,
                marginal_cost_per_tco2e: stored.marginal_cost_per_tco2e,
                cumulative_reduction_tco2e: stored.cumulative_reduction_tco2e,
            });
        }

        curve.weighted_average_cost = if curve.total_reduction_potential > ZERO_REDUCTION_EPSILON {
            curve.total_annual_cost / curve.total_reduction_potential
        } else {
            0.0
        };
        Ok(curve)
    }
}
