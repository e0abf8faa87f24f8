use std::rc::Rc;

use finmodel_core::engine::{
    initial_balance_sheet, PeriodRunner, RuleSeverity, RuleType, ValidationRule,
};
use finmodel_core::store::InMemoryStore;
use finmodel_core::template::StatementTemplate;
use finmodel_core::types::DriverRecord;
use pretty_assertions::assert_eq;

fn net_income_driver(scenario: i32, period: i32, value: f64) -> DriverRecord {
    DriverRecord {
        entity_id: "GROUP".to_string(),
        scenario_id: scenario,
        period_id: period,
        driver_code: "NET_INCOME".to_string(),
        value,
        unit_code: String::new(),
    }
}

const NET_INCOMES: [f64; 5] = [40_000.0, 45_000.0, 50_000.0, 55_000.0, 60_000.0];

fn seed_rollforward_store() -> Rc<InMemoryStore> {
    let store = Rc::new(InMemoryStore::new());
    store.add_template(
        StatementTemplate::from_json(
            r#"{
                "template_code": "RE_ROLL",
                "statement_type": "unified",
                "line_items": [
                    {"code": "NET_INCOME", "base_value_source": "driver:NET_INCOME"},
                    {"code": "RETAINED_EARNINGS", "formula": "RETAINED_EARNINGS[t-1] + NET_INCOME"}
                ]
            }"#,
        )
        .unwrap(),
    );
    for (i, ni) in NET_INCOMES.iter().enumerate() {
        store.add_driver(net_income_driver(1, i as i32 + 1, *ni));
    }
    store
}

// ===========================================================================
// E2: retained-earnings rollforward over 5 periods
// ===========================================================================

#[test]
fn test_retained_earnings_rollforward() {
    let store = seed_rollforward_store();
    let runner = PeriodRunner::new(store);
    let initial = initial_balance_sheet(0.0, 1_000_000.0);

    let results = runner.run_periods("GROUP", 1, &[1, 2, 3, 4, 5], &initial, "RE_ROLL");
    assert!(results.success, "errors: {:?}", results.errors);
    assert_eq!(results.results.len(), 5);

    let expected = [1_040_000.0, 1_085_000.0, 1_135_000.0, 1_190_000.0, 1_250_000.0];
    for (i, expected_re) in expected.iter().enumerate() {
        assert_eq!(
            results.results[i].get_value("RETAINED_EARNINGS"),
            *expected_re,
            "period {}",
            i + 1
        );
    }

    // Total change from opening equals the sum of net incomes
    let total_ni: f64 = NET_INCOMES.iter().sum();
    let final_re = results.results[4].get_value("RETAINED_EARNINGS");
    assert_eq!(final_re - 1_000_000.0, total_ni);
}

#[test]
fn test_prior_period_reference_sees_exact_closing_value() {
    let store = seed_rollforward_store();
    let runner = PeriodRunner::new(store);
    let initial = initial_balance_sheet(0.0, 1_000_000.0);

    let results = runner.run_periods("GROUP", 1, &[1, 2, 3, 4, 5], &initial, "RE_ROLL");

    // RETAINED_EARNINGS[t-1] in period p equals RETAINED_EARNINGS in the
    // period p-1 result: closing(p) - net_income(p) == closing(p-1)
    for p in 1..5 {
        let closing_prev = results.results[p - 1].get_value("RETAINED_EARNINGS");
        let closing = results.results[p].get_value("RETAINED_EARNINGS");
        assert_eq!(closing - NET_INCOMES[p], closing_prev, "period {}", p + 1);
    }
}

// ===========================================================================
// E3: three-statement balancing
// ===========================================================================

#[test]
fn test_three_statement_balance_invariant() {
    let store = Rc::new(InMemoryStore::new());
    store.add_template(
        StatementTemplate::from_json(
            r#"{
                "template_code": "THREE_STMT",
                "statement_type": "unified",
                "line_items": [
                    {"code": "NET_INCOME", "base_value_source": "driver:NET_INCOME"},
                    {"code": "RETAINED_EARNINGS", "formula": "RETAINED_EARNINGS[t-1] + NET_INCOME"},
                    {"code": "CF_NET", "formula": "NET_INCOME"},
                    {"code": "CASH", "formula": "CASH[t-1] + CF_NET"},
                    {"code": "TOTAL_ASSETS", "formula": "CASH"},
                    {"code": "TOTAL_LIABILITIES", "formula": "0"},
                    {"code": "TOTAL_EQUITY", "formula": "RETAINED_EARNINGS"}
                ]
            }"#,
        )
        .unwrap(),
    );
    for (i, ni) in NET_INCOMES.iter().enumerate() {
        store.add_driver(net_income_driver(1, i as i32 + 1, *ni));
    }
    store.add_rule(ValidationRule {
        rule_code: "BS_BALANCE".to_string(),
        rule_name: "Balance sheet balances".to_string(),
        rule_type: RuleType::Reconciliation,
        description: "assets = liabilities + equity".to_string(),
        formula: "TOTAL_ASSETS - TOTAL_LIABILITIES - TOTAL_EQUITY".to_string(),
        required_line_items: vec![
            "TOTAL_ASSETS".to_string(),
            "TOTAL_LIABILITIES".to_string(),
            "TOTAL_EQUITY".to_string(),
        ],
        tolerance: 0.01,
        severity: RuleSeverity::Error,
        is_active: true,
    });
    store.bind_rule("THREE_STMT", "BS_BALANCE", true);

    let runner = PeriodRunner::new(store);
    let initial = initial_balance_sheet(1_000_000.0, 1_000_000.0);
    let results = runner.run_periods("GROUP", 1, &[1, 2, 3, 4, 5], &initial, "THREE_STMT");

    assert!(results.success, "errors: {:?}", results.errors);
    for (i, result) in results.results.iter().enumerate() {
        let residual = result.get_value("TOTAL_ASSETS")
            - result.get_value("TOTAL_LIABILITIES")
            - result.get_value("TOTAL_EQUITY");
        assert!(residual.abs() <= 0.01, "period {} residual {residual}", i + 1);
    }

    // Cash rolls in lockstep with retained earnings
    let last = &results.results[4];
    assert_eq!(last.get_value("CASH"), 1_250_000.0);
    assert_eq!(last.get_value("RETAINED_EARNINGS"), 1_250_000.0);

    let bs = last.extract_balance_sheet();
    assert_eq!(bs.cash, 1_250_000.0);
    assert_eq!(bs.total_assets, 1_250_000.0);
    assert_eq!(bs.total_equity, 1_250_000.0);
}

// ===========================================================================
// Error accumulation and fail-fast
// ===========================================================================

#[test]
fn test_errors_are_collected_across_periods() {
    let store = Rc::new(InMemoryStore::new());
    store.add_template(
        StatementTemplate::from_json(
            r#"{
                "template_code": "DIVIDER",
                "line_items": [
                    {"code": "INPUT", "base_value_source": "driver:INPUT"},
                    {"code": "RATIO", "formula": "100 / INPUT"}
                ]
            }"#,
        )
        .unwrap(),
    );
    // Period 2 divides by zero; periods 1 and 3 are fine
    for (period, value) in [(1, 10.0), (2, 0.0), (3, 4.0)] {
        store.add_driver(DriverRecord {
            entity_id: "GROUP".to_string(),
            scenario_id: 1,
            period_id: period,
            driver_code: "INPUT".to_string(),
            value,
            unit_code: String::new(),
        });
    }

    let runner = PeriodRunner::new(store.clone());
    let initial = initial_balance_sheet(0.0, 0.0);
    let results = runner.run_periods("GROUP", 1, &[1, 2, 3], &initial, "DIVIDER");

    // Collect-all semantics: all three periods ran
    assert!(!results.success);
    assert_eq!(results.results.len(), 3);
    assert!(results.errors.iter().any(|e| e.starts_with("Period 2:")));
    assert_eq!(results.results[2].get_value("RATIO"), 25.0);

    // Fail-fast stops after the failing period
    let fail_fast = PeriodRunner::new(store).with_fail_fast(true);
    let results = fail_fast.run_periods("GROUP", 1, &[1, 2, 3], &initial, "DIVIDER");
    assert_eq!(results.results.len(), 2);
}

// ===========================================================================
// Multi-scenario batch
// ===========================================================================

#[test]
fn test_run_multiple_scenarios_independent_state() {
    let store = Rc::new(InMemoryStore::new());
    store.add_template(
        StatementTemplate::from_json(
            r#"{
                "template_code": "RE_ROLL",
                "line_items": [
                    {"code": "NET_INCOME", "base_value_source": "driver:NET_INCOME"},
                    {"code": "RETAINED_EARNINGS", "formula": "RETAINED_EARNINGS[t-1] + NET_INCOME"}
                ]
            }"#,
        )
        .unwrap(),
    );
    for period in 1..=2 {
        store.add_driver(net_income_driver(1, period, 10_000.0));
        store.add_driver(net_income_driver(2, period, 20_000.0));
    }

    let runner = PeriodRunner::new(store);
    let initial = initial_balance_sheet(0.0, 100_000.0);
    let all = runner.run_multiple_scenarios("GROUP", &[1, 2], &[1, 2], &initial, "RE_ROLL");

    assert_eq!(all.len(), 2);
    assert_eq!(all[&1].results[1].get_value("RETAINED_EARNINGS"), 120_000.0);
    assert_eq!(all[&2].results[1].get_value("RETAINED_EARNINGS"), 140_000.0);
}
