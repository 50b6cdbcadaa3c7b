//! Validation utilities for rainfall records
//!
//! Every record passes these checks before it is written to the store.

use rust_decimal::Decimal;

use crate::models::{ForecastRecord, HistoricalRecord};

// ============================================================================
// Quantity Validations
// ============================================================================

/// Validate a probability is within 0-1
pub fn validate_rain_chance(chance: Decimal) -> Result<(), &'static str> {
    if chance < Decimal::ZERO || chance > Decimal::ONE {
        return Err("Rain chance must be between 0 and 1");
    }
    Ok(())
}

/// Validate a rainfall amount is not negative
pub fn validate_rainfall_mm(mm: Decimal) -> Result<(), &'static str> {
    if mm < Decimal::ZERO {
        return Err("Rainfall cannot be negative");
    }
    Ok(())
}

/// Validate a forecast rainfall range
pub fn validate_rain_range(low: Decimal, high: Decimal) -> Result<(), &'static str> {
    validate_rainfall_mm(low)?;
    if high < low {
        return Err("Rainfall upper estimate must not be below the lower estimate");
    }
    Ok(())
}

// ============================================================================
// Record Validations
// ============================================================================

/// Validate a forecast record, returning the offending field on failure
pub fn validate_forecast_record(
    record: &ForecastRecord,
) -> Result<(), (&'static str, &'static str)> {
    validate_rain_chance(record.rain_chance).map_err(|e| ("rain_chance", e))?;
    validate_rain_range(record.rain_mm_low, record.rain_mm_high).map_err(|e| ("rain_mm", e))?;
    if record.applies_to_date < record.issue_date {
        return Err((
            "applies_to_date",
            "Forecast cannot apply to a date before it was issued",
        ));
    }
    Ok(())
}

/// Validate a historical record, returning the offending field on failure
pub fn validate_historical_record(
    record: &HistoricalRecord,
) -> Result<(), (&'static str, &'static str)> {
    validate_rainfall_mm(record.rainfall_mm).map_err(|e| ("rainfall_mm", e))
}

/// Validate a model name used as a decision key
pub fn validate_model_name(name: &str) -> Result<(), &'static str> {
    if name.trim().is_empty() {
        return Err("Model name cannot be empty");
    }
    if name.len() > 64 {
        return Err("Model name must be at most 64 characters");
    }
    Ok(())
}
