//! External service integrations
//!
//! - BOM pages for rainfall forecasts and observations
//! - Gmail API for notifications

pub mod bom;
pub mod gmail;
