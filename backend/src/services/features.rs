//! Feature-row builder
//!
//! Reads bounded windows from the store and aligns them onto day offsets
//! relative to the decision date:
//! - historical offset `k` is `decision_date - k` days, `1..=hist_days`
//! - forecast offset `k` is `decision_date + k` days, `1..=forecast_days`
//!   from the forecast issued on the decision date
//! - forecast offset `0` comes from the forecast issued the day before,
//!   since a same-day issuance never covers the decision date itself
//!
//! Observed rainfall on days where the replay model advised watering is
//! replaced by the assumed watering amount before it is indexed.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use rainfall_shared::{
    Action, DateFilter, DecisionFilter, FeatureKey, FeatureRow, ForecastFilter, HistoricalFilter,
    HistoricalRecord,
};
use rust_decimal::Decimal;

use crate::error::AppResult;
use crate::services::store::RainfallStore;

/// Window sizes and replay settings for one feature row
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureWindow {
    pub hist_days: i64,
    pub forecast_days: i64,
    pub include_same_day_forecast: bool,
    pub replay_water_mm: Decimal,
}

impl Default for FeatureWindow {
    fn default() -> Self {
        Self {
            hist_days: 7,
            forecast_days: 7,
            include_same_day_forecast: true,
            replay_water_mm: Decimal::from(20),
        }
    }
}

/// Overwrite rainfall on every watered date with the assumed watering amount
///
/// Only dates that already have an observation are touched.
pub fn apply_replay(
    records: &mut [HistoricalRecord],
    watered_dates: &BTreeSet<NaiveDate>,
    replay_water_mm: Decimal,
) -> usize {
    let mut replaced = 0;
    for record in records.iter_mut() {
        if watered_dates.contains(&record.date) {
            record.rainfall_mm = replay_water_mm;
            replaced += 1;
        }
    }
    replaced
}

/// Dates within `filter` on which `replay_model` advised watering
pub async fn watered_dates(
    store: &RainfallStore,
    replay_model: &str,
    filter: DateFilter,
) -> AppResult<BTreeSet<NaiveDate>> {
    let decisions = store
        .query_decisions(
            &DecisionFilter::for_model(replay_model)
                .dated(filter)
                .with_action(Action::Water),
        )
        .await?;

    Ok(decisions.into_iter().map(|d| d.date).collect())
}

/// Builds feature rows from the record store. Read-only.
#[derive(Clone)]
pub struct FeatureRowBuilder {
    store: RainfallStore,
    window: FeatureWindow,
}

impl FeatureRowBuilder {
    pub fn new(store: RainfallStore, window: FeatureWindow) -> Self {
        Self { store, window }
    }

    pub fn window(&self) -> &FeatureWindow {
        &self.window
    }

    /// Build the feature row for `decision_date`, replaying decisions made
    /// by `replay_model`
    pub async fn build(&self, decision_date: NaiveDate, replay_model: &str) -> AppResult<FeatureRow> {
        let window = &self.window;
        let mut row = FeatureRow::new(decision_date);

        // Historical window [decision_date - hist_days, decision_date)
        let hist_start = decision_date - Duration::days(window.hist_days.max(0));
        let hist_filter = DateFilter::half_open(hist_start, decision_date);

        let mut historical = self
            .store
            .query_historical(&HistoricalFilter::dated(hist_filter))
            .await?;
        let watered = watered_dates(&self.store, replay_model, hist_filter).await?;
        let replaced = apply_replay(&mut historical, &watered, window.replay_water_mm);
        if replaced > 0 {
            tracing::debug!(
                "Replayed {} watered day(s) from model {} before {}",
                replaced,
                replay_model,
                decision_date
            );
        }

        for record in &historical {
            let offset = (decision_date - record.date).num_days();
            row.insert(FeatureKey::Historical(offset), record.rainfall_mm);
        }

        // Forecasts issued on the decision date for (decision_date, decision_date + forecast_days]
        let forecast_end = decision_date + Duration::days(window.forecast_days.max(0));
        let forecasts = self
            .store
            .query_forecasts(
                &ForecastFilter::all()
                    .issued(DateFilter::On(decision_date))
                    .applying_to(DateFilter::Range {
                        start: std::ops::Bound::Excluded(decision_date),
                        end: std::ops::Bound::Included(forecast_end),
                    }),
            )
            .await?;

        for record in &forecasts {
            let offset = (record.applies_to_date - decision_date).num_days();
            row.insert(FeatureKey::ForecastChance(offset), record.rain_chance);
            row.insert(FeatureKey::ForecastHighMm(offset), record.rain_mm_high);
        }

        if window.include_same_day_forecast {
            let previous_day = decision_date - Duration::days(1);
            let same_day = self
                .store
                .query_forecasts(
                    &ForecastFilter::all()
                        .issued(DateFilter::On(previous_day))
                        .applying_to(DateFilter::On(decision_date)),
                )
                .await?;

            if let Some(record) = same_day.first() {
                row.insert(FeatureKey::ForecastChance(0), record.rain_chance);
                row.insert(FeatureKey::ForecastHighMm(0), record.rain_mm_high);
            }
        }

        tracing::debug!("Feature row for {}: {:?}", decision_date, row.to_columns());
        Ok(row)
    }
}
