//! Domain models for rainfall tracking and watering decisions

mod features;
mod rainfall;

pub use features::*;
pub use rainfall::*;
