//! Damage functions: peril intensity to damage metric.
//!
//! For PPE and INVENTORY targets the output is a damage fraction in
//! [0, 1]; for BI targets it is downtime in days.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::FinModelError;
use crate::store::ModelStore;
use crate::types::DamageFunctionDefinition;
use crate::FinModelResult;

/// Maps peril intensity to a damage metric.
pub trait DamageFunction {
    /// Damage fraction (PPE/INVENTORY) or downtime days (BI) for the
    /// given intensity.
    fn evaluate(&self, intensity: f64) -> f64;

    /// Type tag (e.g. "PIECEWISE_LINEAR")
    fn function_type(&self) -> &str;

    fn description(&self) -> &str;
}

/// Monotone piecewise-linear curve over (intensity, damage) samples.
///
/// Constant extrapolation before the first and after the last sample,
/// linear interpolation between consecutive samples.
pub struct PiecewiseLinearDamageFunction {
    points: Vec<(f64, f64)>,
    description: String,
}

impl PiecewiseLinearDamageFunction {
    /// Build from samples sorted ascending in x with non-negative y.
    pub fn new(points: Vec<(f64, f64)>, description: impl Into<String>) -> FinModelResult<Self> {
        if points.is_empty() {
            return Err(FinModelError::InvalidInput {
                field: "curve_points".to_string(),
                reason: "at least one sample required".to_string(),
            });
        }
        for window in points.windows(2) {
            if window[1].0 < window[0].0 {
                return Err(FinModelError::InvalidInput {
                    field: "curve_points".to_string(),
                    reason: format!(
                        "samples must be non-decreasing in x ({} after {})",
                        window[1].0, window[0].0
                    ),
                });
            }
        }
        if let Some((x, y)) = points.iter().find(|(_, y)| *y < 0.0) {
            return Err(FinModelError::InvalidInput {
                field: "curve_points".to_string(),
                reason: format!("negative damage value {y} at intensity {x}"),
            });
        }

        Ok(Self {
            points,
            description: description.into(),
        })
    }

    /// Parse the JSON array form `[[x1,y1], [x2,y2], ...]`.
    pub fn from_json(json_curve: &str, description: impl Into<String>) -> FinModelResult<Self> {
        let points: Vec<(f64, f64)> = serde_json::from_str(json_curve)?;
        Self::new(points, description)
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }
}

impl DamageFunction for PiecewiseLinearDamageFunction {
    fn evaluate(&self, intensity: f64) -> f64 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];

        if intensity <= first.0 {
            return first.1;
        }
        if intensity >= last.0 {
            return last.1;
        }

        for window in self.points.windows(2) {
            let (x0, y0) = window[0];
            let (x1, y1) = window[1];
            if intensity <= x1 {
                if x1 == x0 {
                    return y1;
                }
                let t = (intensity - x0) / (x1 - x0);
                return y0 + t * (y1 - y0);
            }
        }
        last.1
    }

    fn function_type(&self) -> &str {
        "PIECEWISE_LINEAR"
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Build a damage function from a stored definition. Unknown function
/// types are an error.
pub fn damage_function_from_definition(
    definition: &DamageFunctionDefinition,
) -> FinModelResult<Rc<dyn DamageFunction>> {
    match definition.function_type.as_str() {
        "PIECEWISE_LINEAR" => Ok(Rc::new(PiecewiseLinearDamageFunction::from_json(
            &definition.curve_definition,
            definition.description.clone(),
        )?)),
        other => Err(FinModelError::InvalidInput {
            field: "function_type".to_string(),
            reason: format!(
                "unknown damage function type '{other}' for '{}'",
                definition.function_code
            ),
        }),
    }
}

/// Store-backed registry of damage functions, keyed by function code and
/// by (peril_type, damage_target).
pub struct DamageFunctionRegistry {
    by_code: HashMap<String, Rc<dyn DamageFunction>>,
    by_peril_target: HashMap<(String, String), Rc<dyn DamageFunction>>,
}

impl DamageFunctionRegistry {
    /// Load every stored definition. The first definition for each
    /// (peril_type, target) pair wins.
    pub fn from_store(store: &dyn ModelStore) -> FinModelResult<Self> {
        let mut by_code = HashMap::new();
        let mut by_peril_target: HashMap<(String, String), Rc<dyn DamageFunction>> = HashMap::new();

        for definition in store.damage_function_definitions()? {
            let function = damage_function_from_definition(&definition)?;
            by_code.insert(definition.function_code.clone(), function.clone());
            by_peril_target
                .entry((definition.peril_type.clone(), definition.damage_target.clone()))
                .or_insert(function);
        }

        Ok(Self {
            by_code,
            by_peril_target,
        })
    }

    pub fn function(&self, function_code: &str) -> Option<&Rc<dyn DamageFunction>> {
        self.by_code.get(function_code)
    }

    /// Function for a peril type and target ("PPE", "INVENTORY", "BI").
    /// `None` means zero damage for that target.
    pub fn function_for_peril(
        &self,
        peril_type: &str,
        damage_target: &str,
    ) -> Option<&Rc<dyn DamageFunction>> {
        self.by_peril_target
            .get(&(peril_type.to_string(), damage_target.to_string()))
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn curve() -> PiecewiseLinearDamageFunction {
        PiecewiseLinearDamageFunction::from_json("[[0,0],[1,0.3],[2,0.7],[3,1.0]]", "flood PPE")
            .unwrap()
    }

    #[test]
    fn test_interpolation_and_extrapolation() {
        let f = curve();
        assert_eq!(f.evaluate(0.0), 0.0);
        assert!((f.evaluate(0.5) - 0.15).abs() < 1e-12);
        assert_eq!(f.evaluate(1.0), 0.3);
        assert_eq!(f.evaluate(2.0), 0.7);
        assert_eq!(f.evaluate(3.0), 1.0);
        // Constant extrapolation beyond the samples
        assert_eq!(f.evaluate(-1.0), 0.0);
        assert_eq!(f.evaluate(5.0), 1.0);
    }

    #[test]
    fn test_single_sample_is_constant() {
        let f = PiecewiseLinearDamageFunction::new(vec![(2.0, 0.4)], "").unwrap();
        assert_eq!(f.evaluate(-10.0), 0.4);
        assert_eq!(f.evaluate(2.0), 0.4);
        assert_eq!(f.evaluate(100.0), 0.4);
    }

    #[test]
    fn test_rejects_unsorted_and_negative() {
        assert!(PiecewiseLinearDamageFunction::new(vec![(1.0, 0.1), (0.0, 0.2)], "").is_err());
        assert!(PiecewiseLinearDamageFunction::new(vec![(0.0, -0.1)], "").is_err());
        assert!(PiecewiseLinearDamageFunction::new(vec![], "").is_err());
    }

    #[test]
    fn test_invalid_json() {
        assert!(PiecewiseLinearDamageFunction::from_json("not json", "").is_err());
        assert!(PiecewiseLinearDamageFunction::from_json("[[1]]", "").is_err());
    }

    #[test]
    fn test_registry_lookup() {
        use crate::store::InMemoryStore;
        use crate::types::DamageFunctionDefinition;

        let store = InMemoryStore::new();
        store.add_damage_function(DamageFunctionDefinition {
            function_code: "FLOOD_PPE_STANDARD".into(),
            function_type: "PIECEWISE_LINEAR".into(),
            curve_definition: "[[0,0],[3,1.0]]".into(),
            description: String::new(),
            peril_type: "FLOOD".into(),
            damage_target: "PPE".into(),
        });

        let registry = DamageFunctionRegistry::from_store(&store).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.function("FLOOD_PPE_STANDARD").is_some());
        assert!(registry.function_for_peril("FLOOD", "PPE").is_some());
        assert!(registry.function_for_peril("FLOOD", "BI").is_none());
        assert!(registry.function_for_peril("HURRICANE", "PPE").is_none());
    }
}
