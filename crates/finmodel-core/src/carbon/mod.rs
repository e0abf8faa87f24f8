//! Carbon economics: marginal abatement cost curves.

pub mod mac_curve;

pub use mac_curve::{ActionOutcome, MacCurve, MacCurveBuilder, MacPoint};
