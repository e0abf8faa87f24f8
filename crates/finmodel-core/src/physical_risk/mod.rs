//! Physical-risk pipeline: perils hit assets, damage functions turn
//! intensity into losses, and losses become scenario drivers the
//! calculation kernel consumes like any other input.

pub mod damage;
pub mod engine;
pub mod geo;

pub use damage::{
    DamageFunction, DamageFunctionRegistry, PiecewiseLinearDamageFunction, damage_function_from_definition,
};
pub use engine::{DamageAssessment, PhysicalRiskEngine};
