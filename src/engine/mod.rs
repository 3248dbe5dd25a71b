pub mod pricing;
pub mod value;

pub use value::{Estimate, FixedEstimates, ProbabilityModel, SpreadModel, ValueBet};
