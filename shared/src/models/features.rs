//! Feature row models
//!
//! A feature row is a sparse set of values keyed by kind and day offset
//! relative to the decision date. Absent keys mean the data was missing,
//! never zero.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Feature key: what the value measures and its offset from the decision date
///
/// Historical offset `k` is the date `decision_date - k` (1 = yesterday).
/// Forecast offset `k` is the date `decision_date + k` (0 = today).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureKey {
    Historical(i64),
    ForecastChance(i64),
    ForecastHighMm(i64),
}

impl FeatureKey {
    /// Column name used in exported tables, e.g. `hist_3` or `chance_0`
    pub fn column_name(&self) -> String {
        match self {
            FeatureKey::Historical(k) => format!("hist_{}", k),
            FeatureKey::ForecastChance(k) => format!("chance_{}", k),
            FeatureKey::ForecastHighMm(k) => format!("mm_high_{}", k),
        }
    }
}

impl std::fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.column_name())
    }
}

/// One derived feature row for a decision date
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub decision_date: NaiveDate,
    values: BTreeMap<FeatureKey, Decimal>,
}

impl FeatureRow {
    pub fn new(decision_date: NaiveDate) -> Self {
        Self {
            decision_date,
            values: BTreeMap::new(),
        }
    }

    /// Set a value, replacing any previous value for the key
    pub fn insert(&mut self, key: FeatureKey, value: Decimal) {
        self.values.insert(key, value);
    }

    pub fn with(mut self, key: FeatureKey, value: Decimal) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: FeatureKey) -> Option<Decimal> {
        self.values.get(&key).copied()
    }

    pub fn historical(&self, offset: i64) -> Option<Decimal> {
        self.get(FeatureKey::Historical(offset))
    }

    pub fn forecast_chance(&self, offset: i64) -> Option<Decimal> {
        self.get(FeatureKey::ForecastChance(offset))
    }

    pub fn forecast_high_mm(&self, offset: i64) -> Option<Decimal> {
        self.get(FeatureKey::ForecastHighMm(offset))
    }

    pub fn contains(&self, key: FeatureKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = FeatureKey> + '_ {
        self.values.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureKey, Decimal)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }

    /// Historical offsets present in the row, ascending
    pub fn historical_offsets(&self) -> Vec<i64> {
        self.values
            .keys()
            .filter_map(|k| match k {
                FeatureKey::Historical(offset) => Some(*offset),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values keyed by column name
    pub fn to_columns(&self) -> BTreeMap<String, Decimal> {
        self.values
            .iter()
            .map(|(k, v)| (k.column_name(), *v))
            .collect()
    }
}
