//! Risk controls: the pre-trade gate and the config validator.

mod gate;
pub mod validator;

pub use gate::{FollowerRiskSnapshot, RiskDecision, RiskGate, RiskLimits};
