//! Decision policies
//!
//! A policy maps a feature row to a water / no-water action. Policies are
//! looked up by model name so several can run side by side and be compared.

use chrono::NaiveDate;
use rainfall_shared::{Action, DecisionRecord, FeatureRow};
use rust_decimal::Decimal;

use crate::error::{AppError, AppResult};
use crate::services::store::RainfallStore;

/// Thresholds used by the rainfall-total rule
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionConfig {
    /// Rainfall needed over the trailing window plus today
    pub watering_target_mm: Decimal,
    /// Today's forecast counts only when its chance is strictly above this
    pub rain_chance_threshold: Decimal,
    /// Historical offsets `1..=trailing_days` are summed
    pub trailing_days: i64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            watering_target_mm: Decimal::from(20),
            rain_chance_threshold: Decimal::new(5, 1),
            trailing_days: 6,
        }
    }
}

/// A named decision procedure
pub trait DecisionPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Decide from a complete row, failing with `InsufficientData` when
    /// required inputs are absent
    fn decide(&self, row: &FeatureRow) -> AppResult<Action>;

    /// Decide from whatever inputs the row has
    fn decide_with_available(&self, row: &FeatureRow) -> Action;
}

/// Names accepted by [`policy_for_name`]
pub const POLICY_NAMES: &[&str] = &[LogicPolicy::NAME];

/// Resolve a policy by model name
pub fn policy_for_name(name: &str, config: DecisionConfig) -> AppResult<Box<dyn DecisionPolicy>> {
    match name {
        LogicPolicy::NAME => Ok(Box::new(LogicPolicy::new(config))),
        other => Err(AppError::Configuration(format!(
            "Unknown decision policy '{}' (known: {})",
            other,
            POLICY_NAMES.join(", ")
        ))),
    }
}

/// Water when the trailing rainfall plus a likely same-day forecast falls
/// short of the watering target
#[derive(Debug, Clone)]
pub struct LogicPolicy {
    config: DecisionConfig,
}

impl LogicPolicy {
    pub const NAME: &'static str = "logic";

    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Trailing offsets the rule needs but the row lacks
    pub fn missing_offsets(&self, row: &FeatureRow) -> Vec<i64> {
        (1..=self.config.trailing_days)
            .filter(|k| row.historical(*k).is_none())
            .collect()
    }

    /// Trailing rainfall plus today's high estimate when rain is likely
    pub fn total_rainfall(&self, row: &FeatureRow) -> Decimal {
        let trailing: Decimal = (1..=self.config.trailing_days)
            .filter_map(|k| row.historical(k))
            .sum();

        let likely_today = row
            .forecast_chance(0)
            .map_or(false, |chance| chance > self.config.rain_chance_threshold);

        let today = if likely_today {
            row.forecast_high_mm(0).unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        trailing + today
    }
}

impl DecisionPolicy for LogicPolicy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn decide(&self, row: &FeatureRow) -> AppResult<Action> {
        let missing_offsets = self.missing_offsets(row);
        if !missing_offsets.is_empty() {
            return Err(AppError::InsufficientData {
                decision_date: row.decision_date,
                missing_offsets,
            });
        }
        Ok(self.decide_with_available(row))
    }

    fn decide_with_available(&self, row: &FeatureRow) -> Action {
        let total = self.total_rainfall(row);
        tracing::debug!(
            "Rainfall total for {} is {}mm against a {}mm target",
            row.decision_date,
            total,
            self.config.watering_target_mm
        );
        Action::from(total < self.config.watering_target_mm)
    }
}

/// Persist a decision so later feature rows can replay it
pub async fn record_decision(
    store: &RainfallStore,
    model_name: &str,
    date: NaiveDate,
    action: Action,
) -> AppResult<DecisionRecord> {
    let record = store.upsert_decision(model_name, date, action).await?;
    tracing::info!("Recorded decision '{}' for {} by model {}", action, date, model_name);
    Ok(record)
}
