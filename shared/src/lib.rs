//! Shared types and models for the rainfall watering advisor
//!
//! Record shapes, feature rows and query filters used by the backend store,
//! feature builder and decision policies. No I/O happens here.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
