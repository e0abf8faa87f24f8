use thiserror::Error;

#[derive(Debug, Error)]
pub enum FinModelError {
    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("Circular dependency detected: {}", path.join(" -> "))]
    CircularDependency { path: Vec<String> },

    #[error("Unresolved identifier '{code}': no value provider claims it")]
    UnresolvedIdentifier { code: String },

    #[error("Function {function} expects {expected} arguments, got {actual}")]
    ArityMismatch {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("Division by zero in {context}")]
    DivisionByZero { context: String },

    #[error("Custom function '{name}' not handled")]
    CustomFunctionNotHandled { name: String },

    #[error("Driver '{driver_code}' not found for entity {entity_id}, scenario {scenario_id}, period {period_id}")]
    MissingDriver {
        driver_code: String,
        entity_id: String,
        scenario_id: i32,
        period_id: i32,
    },

    #[error("Unknown unit code: {unit}")]
    UnknownUnit { unit: String },

    #[error("Cannot convert between unit categories: {from} vs {to}")]
    CrossCategoryConversion { from: String, to: String },

    #[error("FX rate not found: {from} -> {to} ({rate_type}) for scenario {scenario_id}, period {period_id}")]
    MissingFxRate {
        from: String,
        to: String,
        rate_type: String,
        scenario_id: i32,
        period_id: i32,
    },

    #[error("Invalid input: {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for FinModelError {
    fn from(e: serde_json::Error) -> Self {
        FinModelError::Serialization(e.to_string())
    }
}
