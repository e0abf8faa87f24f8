//! Scenario combination generator.
//!
//! Enumerates action combinations for sweeps: the full 2^N lattice for
//! portfolio analysis, or the N+1 set (base plus each action alone) that
//! MAC analysis needs.

use std::collections::BTreeMap;

use crate::types::ScenarioId;

/// Configuration of one generated scenario.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub scenario_id: ScenarioId,
    pub code: String,
    pub name: String,
    pub description: String,
    /// action_code -> is_active
    pub action_flags: BTreeMap<String, bool>,
}

pub struct ScenarioGenerator;

impl ScenarioGenerator {
    /// All 2^N combinations of the given actions, in bitmask order
    /// starting with the base (no actions) at `base_scenario_id`.
    pub fn generate_all_combinations(
        action_codes: &[String],
        base_scenario_id: ScenarioId,
        base_code_prefix: &str,
    ) -> Vec<ScenarioConfig> {
        let n = action_codes.len();
        let combinations = 1usize << n;
        let mut scenarios = Vec::with_capacity(combinations);

        for mask in 0..combinations {
            let mut action_flags = BTreeMap::new();
            let mut active_actions = Vec::new();
            for (bit, code) in action_codes.iter().enumerate() {
                let is_active = mask & (1 << bit) != 0;
                action_flags.insert(code.clone(), is_active);
                if is_active {
                    active_actions.push(code.clone());
                }
            }

            let name = generate_name(&active_actions);
            let code = if active_actions.is_empty() {
                format!("{base_code_prefix}_BASE")
            } else {
                format!("{base_code_prefix}_{}", name.replace(['+', ' '], "_"))
            };

            scenarios.push(ScenarioConfig {
                scenario_id: base_scenario_id + mask as ScenarioId,
                code,
                name,
                description: generate_description(&active_actions),
                action_flags,
            });
        }

        scenarios
    }

    /// The N+1 configurations MAC analysis needs: one base scenario with
    /// no actions, then one scenario per action with only that action
    /// active. Callers seed the corresponding action rows with
    /// `start_period = 1` so every action is live from the first period.
    pub fn generate_for_mac_analysis(
        action_codes: &[String],
        base_scenario_id: ScenarioId,
        base_code_prefix: &str,
    ) -> Vec<ScenarioConfig> {
        let mut scenarios = Vec::with_capacity(action_codes.len() + 1);

        scenarios.push(ScenarioConfig {
            scenario_id: base_scenario_id,
            code: format!("{base_code_prefix}_BASE"),
            name: "Base".to_string(),
            description: "Baseline scenario with no actions (MAC reference)".to_string(),
            action_flags: action_codes.iter().map(|c| (c.clone(), false)).collect(),
        });

        for (i, action_code) in action_codes.iter().enumerate() {
            scenarios.push(ScenarioConfig {
                scenario_id: base_scenario_id + 1 + i as ScenarioId,
                code: format!("{base_code_prefix}_{action_code}"),
                name: action_code.clone(),
                description: format!("MAC analysis: {action_code} only"),
                action_flags: action_codes
                    .iter()
                    .map(|c| (c.clone(), c == action_code))
                    .collect(),
            });
        }

        scenarios
    }

    pub fn is_action_active(config: &ScenarioConfig, action_code: &str) -> bool {
        config.action_flags.get(action_code).copied().unwrap_or(false)
    }

    pub fn active_actions(config: &ScenarioConfig) -> Vec<String> {
        config
            .action_flags
            .iter()
            .filter(|(_, &active)| active)
            .map(|(code, _)| code.clone())
            .collect()
    }

    pub fn count_scenarios(num_actions: usize) -> usize {
        1 << num_actions
    }
}

fn generate_name(active_actions: &[String]) -> String {
    if active_actions.is_empty() {
        "Base".to_string()
    } else {
        active_actions.join("+")
    }
}

fn generate_description(active_actions: &[String]) -> String {
    if active_actions.is_empty() {
        "Base scenario with no actions".to_string()
    } else {
        format!("Combination: {}", active_actions.join(" + "))
    }
}
