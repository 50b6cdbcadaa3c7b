//! Rainfall watering advisor
//!
//! Collects rainfall forecasts and observations, stores them locally and
//! decides each day whether the garden needs watering.

pub mod config;
pub mod error;
pub mod external;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};
