//! Feature-row builder integration tests
//!
//! Tests for deriving decision-date-relative rows from stored records:
//! - Property 4: Offset Correctness
//! - Property 5: Replay Adjustment
//! - Property 6: Sparse Rows (absent data is an absent key, never zero)

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use rainfall_backend::services::features::{FeatureRowBuilder, FeatureWindow};
use rainfall_backend::services::store::RainfallStore;
use rainfall_shared::{Action, FeatureKey, ForecastRecord, HistoricalRecord};
use rust_decimal::Decimal;
use std::str::FromStr;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

async fn builder_with(window: FeatureWindow) -> (RainfallStore, FeatureRowBuilder) {
    let store = RainfallStore::in_memory().await.unwrap();
    let builder = FeatureRowBuilder::new(store.clone(), window);
    (store, builder)
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Historical and forecast records land on the documented offsets
    #[tokio::test]
    async fn test_offsets_relative_to_decision_date() {
        let (store, builder) = builder_with(FeatureWindow::default()).await;
        store
            .upsert_historical(&[HistoricalRecord::new(date("2025-03-17"), dec("4.2"))])
            .await
            .unwrap();
        store
            .upsert_forecasts(&[ForecastRecord::new(
                date("2025-03-20"),
                date("2025-03-22"),
                dec("0.7"),
                dec("1"),
                dec("8"),
            )])
            .await
            .unwrap();

        let row = builder.build(date("2025-03-20"), "logic").await.unwrap();

        assert_eq!(row.decision_date, date("2025-03-20"));
        assert_eq!(row.historical(3), Some(dec("4.2")));
        assert_eq!(row.forecast_chance(2), Some(dec("0.7")));
        assert_eq!(row.forecast_high_mm(2), Some(dec("8")));
        assert_eq!(row.len(), 3);
    }

    /// A watered day counts as the replay constant for the replayed model
    #[tokio::test]
    async fn test_replay_replaces_observed_rainfall() {
        let (store, builder) = builder_with(FeatureWindow::default()).await;
        store
            .upsert_historical(&[HistoricalRecord::new(date("2025-03-18"), dec("1.0"))])
            .await
            .unwrap();
        store
            .upsert_decision("m", date("2025-03-18"), Action::Water)
            .await
            .unwrap();

        let replayed = builder.build(date("2025-03-20"), "m").await.unwrap();
        assert_eq!(replayed.historical(2), Some(dec("20")));

        let other_model = builder.build(date("2025-03-20"), "other").await.unwrap();
        assert_eq!(other_model.historical(2), Some(dec("1.0")));
    }

    /// A no-action decision leaves the observation as recorded
    #[tokio::test]
    async fn test_no_action_decision_is_not_replayed() {
        let (store, builder) = builder_with(FeatureWindow::default()).await;
        store
            .upsert_historical(&[HistoricalRecord::new(date("2025-03-18"), dec("1.0"))])
            .await
            .unwrap();
        store
            .upsert_decision("m", date("2025-03-18"), Action::NoAction)
            .await
            .unwrap();

        let row = builder.build(date("2025-03-20"), "m").await.unwrap();
        assert_eq!(row.historical(2), Some(dec("1.0")));
    }

    /// The replay amount comes from the window configuration
    #[tokio::test]
    async fn test_replay_amount_is_configurable() {
        let window = FeatureWindow {
            replay_water_mm: dec("12.5"),
            ..FeatureWindow::default()
        };
        let (store, builder) = builder_with(window).await;
        store
            .upsert_historical(&[HistoricalRecord::new(date("2025-03-19"), dec("0"))])
            .await
            .unwrap();
        store
            .upsert_decision("m", date("2025-03-19"), Action::Water)
            .await
            .unwrap();

        let row = builder.build(date("2025-03-20"), "m").await.unwrap();
        assert_eq!(row.historical(1), Some(dec("12.5")));
    }

    /// The same-day forecast comes from the previous day's issuance
    #[tokio::test]
    async fn test_same_day_forecast_uses_prior_issuance() {
        let (store, builder) = builder_with(FeatureWindow::default()).await;
        store
            .upsert_forecasts(&[
                ForecastRecord::new(date("2025-03-19"), date("2025-03-20"), dec("0.6"), dec("1"), dec("5")),
                ForecastRecord::new(date("2025-03-20"), date("2025-03-20"), dec("0.9"), dec("10"), dec("30")),
            ])
            .await
            .unwrap();

        let row = builder.build(date("2025-03-20"), "logic").await.unwrap();
        assert_eq!(row.forecast_chance(0), Some(dec("0.6")));
        assert_eq!(row.forecast_high_mm(0), Some(dec("5")));
    }

    /// Disabling the same-day forecast drops offset 0
    #[tokio::test]
    async fn test_same_day_forecast_can_be_disabled() {
        let window = FeatureWindow {
            include_same_day_forecast: false,
            ..FeatureWindow::default()
        };
        let (store, builder) = builder_with(window).await;
        store
            .upsert_forecasts(&[ForecastRecord::new(
                date("2025-03-19"),
                date("2025-03-20"),
                dec("0.6"),
                dec("1"),
                dec("5"),
            )])
            .await
            .unwrap();

        let row = builder.build(date("2025-03-20"), "logic").await.unwrap();
        assert!(!row.contains(FeatureKey::ForecastChance(0)));
    }

    /// Records outside the windows are ignored
    #[tokio::test]
    async fn test_window_bounds() {
        let (store, builder) = builder_with(FeatureWindow::default()).await;
        store
            .upsert_historical(&[
                HistoricalRecord::new(date("2025-03-12"), dec("9")),
                HistoricalRecord::new(date("2025-03-13"), dec("7")),
                HistoricalRecord::new(date("2025-03-20"), dec("5")),
            ])
            .await
            .unwrap();
        store
            .upsert_forecasts(&[
                ForecastRecord::new(date("2025-03-20"), date("2025-03-27"), dec("0.2"), dec("0"), dec("1")),
                ForecastRecord::new(date("2025-03-20"), date("2025-03-28"), dec("0.2"), dec("0"), dec("1")),
                ForecastRecord::new(date("2025-03-19"), date("2025-03-21"), dec("0.2"), dec("0"), dec("1")),
            ])
            .await
            .unwrap();

        let row = builder.build(date("2025-03-20"), "logic").await.unwrap();

        assert_eq!(row.historical_offsets(), vec![7]);
        assert_eq!(row.historical(7), Some(dec("7")));
        assert!(row.contains(FeatureKey::ForecastChance(7)));
        assert!(!row.contains(FeatureKey::ForecastChance(8)));
        assert!(!row.contains(FeatureKey::ForecastChance(1)));
    }

    /// Missing days stay missing
    #[tokio::test]
    async fn test_sparse_history_has_absent_keys() {
        let (store, builder) = builder_with(FeatureWindow::default()).await;
        store
            .upsert_historical(&[
                HistoricalRecord::new(date("2025-03-19"), dec("0")),
                HistoricalRecord::new(date("2025-03-16"), dec("2")),
            ])
            .await
            .unwrap();

        let row = builder.build(date("2025-03-20"), "logic").await.unwrap();

        assert_eq!(row.historical_offsets(), vec![1, 4]);
        assert_eq!(row.historical(1), Some(Decimal::ZERO));
        assert_eq!(row.historical(2), None);
    }

    /// An empty store yields an empty row, not an error
    #[tokio::test]
    async fn test_empty_store_builds_empty_row() {
        let (_store, builder) = builder_with(FeatureWindow::default()).await;

        let row = builder.build(date("2025-03-20"), "logic").await.unwrap();
        assert!(row.is_empty());
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// Property 4: Offset Correctness
    /// Every stored observation inside the window appears at offset
    /// `decision_date - date` with its value, and nothing else appears.
    #[test]
    fn prop_historical_offsets(
        observations in prop::collection::btree_map(-3i64..12, 0u32..400, 0..15)
    ) {
        let decision_date = date("2025-06-15");
        let records: Vec<_> = observations
            .iter()
            .map(|(back, mm)| HistoricalRecord::new(decision_date - Duration::days(*back), Decimal::from(*mm)))
            .collect();

        let row = tokio_test::block_on(async {
            let (store, builder) = builder_with(FeatureWindow::default()).await;
            store.upsert_historical(&records).await.unwrap();
            builder.build(decision_date, "logic").await.unwrap()
        });

        let expected: Vec<i64> = observations.keys().copied().filter(|k| (1..=7).contains(k)).collect();
        prop_assert_eq!(row.historical_offsets(), expected);
        for (back, mm) in &observations {
            if (1..=7).contains(back) {
                prop_assert_eq!(row.historical(*back), Some(Decimal::from(*mm)));
            }
        }
    }
}
