//! Physical-risk engine: perils into scenario drivers.

use std::rc::Rc;

use tracing::{debug, info};

use crate::physical_risk::damage::DamageFunctionRegistry;
use crate::physical_risk::geo;
use crate::store::ModelStore;
use crate::types::{AssetExposure, DriverRecord, PeriodId, PhysicalPeril, ScenarioId};
use crate::FinModelResult;

/// Point perils (radius <= 0) only affect assets within this distance.
const POINT_PERIL_RANGE_KM: f64 = 1.0;

const DAYS_IN_YEAR: f64 = 365.0;

/// Entity under which synthesized physical-risk drivers are stored.
pub const PHYSICAL_RISK_ENTITY: &str = "PHYSICAL_RISK";

/// Damage assessment for one (asset, peril, period) combination.
#[derive(Debug, Clone)]
pub struct DamageAssessment {
    pub asset_id: i32,
    pub asset_code: String,
    pub peril_id: i32,
    pub peril_code: String,
    pub peril_type: String,
    pub period: PeriodId,
    pub distance_km: f64,
    /// Intensity after distance decay
    pub adjusted_intensity: f64,
    pub ppe_damage_pct: f64,
    pub inventory_damage_pct: f64,
    pub bi_downtime_days: f64,
    pub ppe_loss_amount: f64,
    pub inventory_loss_amount: f64,
    pub bi_loss_amount: f64,
    pub currency: String,
}

impl DamageAssessment {
    fn has_loss(&self) -> bool {
        self.ppe_loss_amount > 0.0 || self.inventory_loss_amount > 0.0 || self.bi_loss_amount > 0.0
    }
}

/// Processes a scenario's perils into loss drivers.
///
/// For each (peril, asset, affected period): great-circle distance, radius
/// gating with linear intensity decay, one damage function per target
/// (PPE / INVENTORY / BI), monetisation against the asset's exposure
/// values, and finally driver emission. Losses are stored negated under
/// the `PHYSICAL_RISK` entity, replacing any prior physical-risk drivers
/// for the scenario.
pub struct PhysicalRiskEngine {
    store: Rc<dyn ModelStore>,
    registry: DamageFunctionRegistry,
}

impl PhysicalRiskEngine {
    pub fn new(store: Rc<dyn ModelStore>) -> FinModelResult<Self> {
        let registry = DamageFunctionRegistry::from_store(store.as_ref())?;
        Ok(Self { store, registry })
    }

    pub fn registry(&self) -> &DamageFunctionRegistry {
        &self.registry
    }

    /// Main entry point: assess damages and replace the scenario's
    /// physical-risk drivers. Returns the number of drivers written.
    pub fn process_scenario(&self, scenario_id: ScenarioId) -> FinModelResult<usize> {
        let assessments = self.assess_damages(scenario_id)?;
        self.write_drivers(scenario_id, &assessments)
    }

    /// Damage assessments for every (peril, asset, period) with a loss.
    pub fn assess_damages(&self, scenario_id: ScenarioId) -> FinModelResult<Vec<DamageAssessment>> {
        let perils = self.store.perils_for_scenario(scenario_id)?;
        let assets = self.store.active_assets()?;
        debug!(
            scenario_id,
            perils = perils.len(),
            assets = assets.len(),
            "assessing physical-risk damages"
        );

        let mut assessments = Vec::new();
        for peril in &perils {
            for period in peril.affected_periods() {
                for asset in &assets {
                    let assessment = self.assess(asset, peril, period);
                    if assessment.has_loss() {
                        assessments.push(assessment);
                    }
                }
            }
        }
        Ok(assessments)
    }

    fn assess(&self, asset: &AssetExposure, peril: &PhysicalPeril, period: PeriodId) -> DamageAssessment {
        let distance_km = geo::haversine_distance(
            asset.latitude,
            asset.longitude,
            peril.latitude,
            peril.longitude,
        );

        // Point perils carry full intensity within a 1 km range; area
        // perils decay linearly to zero at the radius
        let (is_affected, adjusted_intensity) = if peril.radius_km <= 0.0 {
            let affected = distance_km <= POINT_PERIL_RANGE_KM;
            (affected, if affected { peril.intensity } else { 0.0 })
        } else {
            let affected = distance_km <= peril.radius_km;
            (
                affected,
                geo::intensity_with_decay(peril.intensity, distance_km, peril.radius_km),
            )
        };

        let mut assessment = DamageAssessment {
            asset_id: asset.asset_id,
            asset_code: asset.asset_code.clone(),
            peril_id: peril.peril_id,
            peril_code: peril.peril_code.clone(),
            peril_type: peril.peril_type.clone(),
            period,
            distance_km,
            adjusted_intensity,
            ppe_damage_pct: 0.0,
            inventory_damage_pct: 0.0,
            bi_downtime_days: 0.0,
            ppe_loss_amount: 0.0,
            inventory_loss_amount: 0.0,
            bi_loss_amount: 0.0,
            currency: asset.replacement_currency.clone(),
        };

        if !is_affected || adjusted_intensity <= 0.0 {
            return assessment;
        }

        // Missing damage function means zero damage for that target
        if let Some(f) = self.registry.function_for_peril(&peril.peril_type, "PPE") {
            assessment.ppe_damage_pct = f.evaluate(adjusted_intensity);
            assessment.ppe_loss_amount = asset.replacement_value * assessment.ppe_damage_pct;
        }
        if let Some(f) = self.registry.function_for_peril(&peril.peril_type, "INVENTORY") {
            assessment.inventory_damage_pct = f.evaluate(adjusted_intensity);
            assessment.inventory_loss_amount =
                asset.inventory_value * assessment.inventory_damage_pct;
        }
        if let Some(f) = self.registry.function_for_peril(&peril.peril_type, "BI") {
            assessment.bi_downtime_days = f.evaluate(adjusted_intensity);
            if asset.annual_revenue > 0.0 {
                assessment.bi_loss_amount =
                    (asset.annual_revenue / DAYS_IN_YEAR) * assessment.bi_downtime_days;
            }
        }

        assessment
    }

    /// Replace the scenario's physical-risk drivers with the assessed
    /// losses: `<PERIL_TYPE>_<TARGET>_<ASSET>` codes, negated values, unit
    /// = asset currency.
    fn write_drivers(
        &self,
        scenario_id: ScenarioId,
        assessments: &[DamageAssessment],
    ) -> FinModelResult<usize> {
        let deleted = self.store.delete_physical_risk_drivers(scenario_id)?;
        debug!(scenario_id, deleted, "cleared previous physical-risk drivers");

        let mut records = Vec::new();
        for assessment in assessments {
            let mut push = |target: &str, loss: f64| {
                if loss > 0.0 {
                    records.push(DriverRecord {
                        entity_id: PHYSICAL_RISK_ENTITY.to_string(),
                        scenario_id,
                        period_id: assessment.period,
                        driver_code: format!(
                            "{}_{target}_{}",
                            assessment.peril_type, assessment.asset_code
                        ),
                        value: -loss,
                        unit_code: assessment.currency.clone(),
                    });
                }
            };
            push("PPE", assessment.ppe_loss_amount);
            push("INVENTORY", assessment.inventory_loss_amount);
            push("BI", assessment.bi_loss_amount);
        }

        self.store.insert_drivers(&records)?;
        info!(
            scenario_id,
            drivers = records.len(),
            "physical-risk drivers generated"
        );
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::DamageFunctionDefinition;
    use pretty_assertions::assert_eq;

    fn asset(code: &str, lat: f64, lon: f64) -> AssetExposure {
        AssetExposure {
            asset_id: 1,
            asset_code: code.to_string(),
            asset_name: code.to_string(),
            asset_type: "PLANT".to_string(),
            latitude: lat,
            longitude: lon,
            entity_code: "ENTITY_1".to_string(),
            replacement_value: 1_000_000.0,
            replacement_currency: "CHF".to_string(),
            inventory_value: 200_000.0,
            inventory_currency: "CHF".to_string(),
            annual_revenue: 365_000.0,
            revenue_currency: "CHF".to_string(),
        }
    }

    fn peril(scenario: ScenarioId, lat: f64, lon: f64, radius_km: f64) -> PhysicalPeril {
        PhysicalPeril {
            peril_id: 1,
            scenario_id: scenario,
            peril_type: "FLOOD".to_string(),
            peril_code: "FLOOD_2030".to_string(),
            latitude: lat,
            longitude: lon,
            intensity: 2.0,
            intensity_unit: "m".to_string(),
            start_period: 3,
            end_period: None,
            radius_km,
            description: String::new(),
        }
    }

    fn seed_functions(store: &InMemoryStore) {
        let def = |code: &str, target: &str, curve: &str| DamageFunctionDefinition {
            function_code: code.to_string(),
            function_type: "PIECEWISE_LINEAR".to_string(),
            curve_definition: curve.to_string(),
            description: String::new(),
            peril_type: "FLOOD".to_string(),
            damage_target: target.to_string(),
        };
        store.add_damage_function(def("FLOOD_PPE", "PPE", "[[0,0],[2,0.5]]"));
        store.add_damage_function(def("FLOOD_INV", "INVENTORY", "[[0,0],[2,0.25]]"));
        store.add_damage_function(def("FLOOD_BI", "BI", "[[0,0],[2,30]]"));
    }

    #[test]
    fn test_colocated_asset_full_intensity() {
        let store = Rc::new(InMemoryStore::new());
        seed_functions(&store);
        store.add_asset(asset("ZRH", 47.37, 8.54), true);
        store.add_peril(peril(1, 47.37, 8.54, 50.0));

        let engine = PhysicalRiskEngine::new(store.clone()).unwrap();
        let assessments = engine.assess_damages(1).unwrap();
        assert_eq!(assessments.len(), 1);

        let a = &assessments[0];
        assert_eq!(a.adjusted_intensity, 2.0);
        assert_eq!(a.ppe_damage_pct, 0.5);
        assert_eq!(a.ppe_loss_amount, 500_000.0);
        assert_eq!(a.inventory_loss_amount, 50_000.0);
        // 365k / 365 days * 30 days downtime
        assert_eq!(a.bi_loss_amount, 30_000.0);
    }

    #[test]
    fn test_driver_emission_negated_and_replacing() {
        let store = Rc::new(InMemoryStore::new());
        seed_functions(&store);
        store.add_asset(asset("ZRH", 47.37, 8.54), true);
        store.add_peril(peril(1, 47.37, 8.54, 50.0));
        // A stale physical-risk driver from an earlier run
        store.add_driver(DriverRecord {
            entity_id: PHYSICAL_RISK_ENTITY.to_string(),
            scenario_id: 1,
            period_id: 1,
            driver_code: "FLOOD_PPE_OLD".to_string(),
            value: -1.0,
            unit_code: "CHF".to_string(),
        });

        let engine = PhysicalRiskEngine::new(store.clone()).unwrap();
        let count = engine.process_scenario(1).unwrap();
        assert_eq!(count, 3);

        let drivers = store.all_drivers();
        assert!(!drivers.iter().any(|d| d.driver_code == "FLOOD_PPE_OLD"));

        let ppe = drivers
            .iter()
            .find(|d| d.driver_code == "FLOOD_PPE_ZRH")
            .unwrap();
        assert_eq!(ppe.value, -500_000.0);
        assert_eq!(ppe.entity_id, PHYSICAL_RISK_ENTITY);
        assert_eq!(ppe.period_id, 3);
        assert_eq!(ppe.unit_code, "CHF");
    }

    #[test]
    fn test_out_of_radius_asset_untouched() {
        let store = Rc::new(InMemoryStore::new());
        seed_functions(&store);
        // Paris asset, Zurich flood with 50 km radius
        store.add_asset(asset("PAR", 48.85, 2.35), true);
        store.add_peril(peril(1, 47.37, 8.54, 50.0));

        let engine = PhysicalRiskEngine::new(store.clone()).unwrap();
        assert!(engine.assess_damages(1).unwrap().is_empty());
    }

    #[test]
    fn test_point_peril_one_km_rule() {
        let store = Rc::new(InMemoryStore::new());
        seed_functions(&store);
        store.add_asset(asset("ZRH", 47.37, 8.54), true);
        // ~1.1 km north of the asset, point peril
        store.add_peril(peril(1, 47.38, 8.54, 0.0));

        let engine = PhysicalRiskEngine::new(store.clone()).unwrap();
        assert!(engine.assess_damages(1).unwrap().is_empty());

        // Exactly at the asset: full intensity, no decay
        store.add_peril(PhysicalPeril {
            peril_id: 2,
            ..peril(1, 47.37, 8.54, 0.0)
        });
        let assessments = engine.assess_damages(1).unwrap();
        assert_eq!(assessments.len(), 1);
        assert_eq!(assessments[0].adjusted_intensity, 2.0);
    }

    #[test]
    fn test_multi_period_peril() {
        let store = Rc::new(InMemoryStore::new());
        seed_functions(&store);
        store.add_asset(asset("ZRH", 47.37, 8.54), true);
        store.add_peril(PhysicalPeril {
            end_period: Some(5),
            ..peril(1, 47.37, 8.54, 50.0)
        });

        let engine = PhysicalRiskEngine::new(store.clone()).unwrap();
        let assessments = engine.assess_damages(1).unwrap();
        // Periods 3, 4, 5
        assert_eq!(assessments.len(), 3);
        let periods: Vec<PeriodId> = assessments.iter().map(|a| a.period).collect();
        assert_eq!(periods, vec![3, 4, 5]);
    }

    #[test]
    fn test_inactive_assets_ignored() {
        let store = Rc::new(InMemoryStore::new());
        seed_functions(&store);
        store.add_asset(asset("ZRH", 47.37, 8.54), false);
        store.add_peril(peril(1, 47.37, 8.54, 50.0));

        let engine = PhysicalRiskEngine::new(store.clone()).unwrap();
        assert!(engine.assess_damages(1).unwrap().is_empty());
    }

    #[test]
    fn test_missing_damage_function_means_zero_damage() {
        let store = Rc::new(InMemoryStore::new());
        // Only a PPE function; INVENTORY and BI undefined
        store.add_damage_function(DamageFunctionDefinition {
            function_code: "FLOOD_PPE".to_string(),
            function_type: "PIECEWISE_LINEAR".to_string(),
            curve_definition: "[[0,0],[2,0.5]]".to_string(),
            description: String::new(),
            peril_type: "FLOOD".to_string(),
            damage_target: "PPE".to_string(),
        });
        store.add_asset(asset("ZRH", 47.37, 8.54), true);
        store.add_peril(peril(1, 47.37, 8.54, 50.0));

        let engine = PhysicalRiskEngine::new(store.clone()).unwrap();
        let assessments = engine.assess_damages(1).unwrap();
        assert_eq!(assessments.len(), 1);
        assert_eq!(assessments[0].inventory_loss_amount, 0.0);
        assert_eq!(assessments[0].bi_loss_amount, 0.0);
        assert!(assessments[0].ppe_loss_amount > 0.0);
    }
}
