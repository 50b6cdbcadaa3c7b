//! Business logic services
//!
//! This module contains the record store, the feature-row builder, the
//! decision policies and the jobs built on top of them.

pub mod chart;
pub mod decision;
pub mod features;
pub mod pipeline;
pub mod store;
pub mod training;
