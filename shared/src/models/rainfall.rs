//! Rainfall record models
//!
//! The three persisted streams: forecasts keyed by issue date and target date,
//! observed daily rainfall keyed by date, and decisions keyed by model and date.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A daily rainfall forecast as published on `issue_date` for `applies_to_date`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub issue_date: NaiveDate,
    pub applies_to_date: NaiveDate,
    /// Chance of any rain, 0-1
    pub rain_chance: Decimal,
    pub rain_mm_low: Decimal,
    pub rain_mm_high: Decimal,
}

impl ForecastRecord {
    pub fn new(
        issue_date: NaiveDate,
        applies_to_date: NaiveDate,
        rain_chance: Decimal,
        rain_mm_low: Decimal,
        rain_mm_high: Decimal,
    ) -> Self {
        Self {
            issue_date,
            applies_to_date,
            rain_chance,
            rain_mm_low,
            rain_mm_high,
        }
    }

    /// Days between issuance and the date the forecast applies to
    pub fn lead_days(&self) -> i64 {
        (self.applies_to_date - self.issue_date).num_days()
    }
}

/// Observed rainfall for a single calendar date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRecord {
    pub date: NaiveDate,
    pub rainfall_mm: Decimal,
}

impl HistoricalRecord {
    pub fn new(date: NaiveDate, rainfall_mm: Decimal) -> Self {
        Self { date, rainfall_mm }
    }
}

/// Recommended action for a day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Rainfall is expected to cover the watering target
    NoAction,
    /// Water manually today
    Water,
}

impl Action {
    /// Stored integer form (0 or 1)
    pub fn as_i64(self) -> i64 {
        match self {
            Action::NoAction => 0,
            Action::Water => 1,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Action::NoAction),
            1 => Some(Action::Water),
            _ => None,
        }
    }

    pub fn is_water(self) -> bool {
        self == Action::Water
    }
}

impl From<bool> for Action {
    fn from(water: bool) -> Self {
        if water {
            Action::Water
        } else {
            Action::NoAction
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::NoAction => write!(f, "no action"),
            Action::Water => write!(f, "water"),
        }
    }
}

/// The action a named decision procedure recommended for a date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub model_name: String,
    pub date: NaiveDate,
    pub action: Action,
}

impl DecisionRecord {
    pub fn new(model_name: impl Into<String>, date: NaiveDate, action: Action) -> Self {
        Self {
            model_name: model_name.into(),
            date,
            action,
        }
    }
}
