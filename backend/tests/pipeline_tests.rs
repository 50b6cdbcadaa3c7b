//! Daily run tests
//!
//! End-to-end tests for ingest → decide → write-back → notify:
//! - Property 13: Closed Feedback Loop (a watering decision is replayed later)
//! - Property 14: Best-Effort Notification (send failures never undo a decision)

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use rainfall_backend::config::{Config, InsufficientDataPolicy};
use rainfall_backend::error::{AppError, AppResult};
use rainfall_backend::external::bom::RainfallSource;
use rainfall_backend::external::gmail::{EmailMessage, Notifier, INLINE_IMAGE_PLACEHOLDER};
use rainfall_backend::services::features::{FeatureRowBuilder, FeatureWindow};
use rainfall_backend::services::pipeline::{compose_message, DailyRun};
use rainfall_backend::services::store::RainfallStore;
use rainfall_shared::{Action, DecisionFilter, FeatureKey, FeatureRow, ForecastRecord, HistoricalRecord};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Dry days ending on `last`
fn dry_days(last: &str, count: i64) -> Vec<HistoricalRecord> {
    let last = date(last);
    (0..count)
        .map(|back| HistoricalRecord::new(last - Duration::days(back), Decimal::ZERO))
        .collect()
}

/// Source returning fixed batches
struct FixedSource {
    forecasts: Vec<ForecastRecord>,
    historical: Vec<HistoricalRecord>,
}

#[async_trait]
impl RainfallSource for FixedSource {
    async fn fetch_forecasts(&self, _today: NaiveDate) -> AppResult<Vec<ForecastRecord>> {
        Ok(self.forecasts.clone())
    }

    async fn fetch_historical(&self) -> AppResult<Vec<HistoricalRecord>> {
        Ok(self.historical.clone())
    }
}

/// Notifier that keeps every message it is given
#[derive(Clone, Default)]
struct RecordingNotifier {
    sent: Arc<Mutex<Vec<EmailMessage>>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &EmailMessage) -> AppResult<()> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _message: &EmailMessage) -> AppResult<()> {
        Err(AppError::NotificationFailure("smtp down".to_string()))
    }
}

fn test_config(chart_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.chart.output_dir = chart_dir.to_path_buf();
    config
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Six dry days leave offset 6 empty: the default still decides to water
    #[tokio::test]
    async fn test_six_dry_days_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let store = RainfallStore::in_memory().await.unwrap();
        store.upsert_historical(&dry_days("2025-03-20", 6)).await.unwrap();
        store
            .upsert_forecasts(&[ForecastRecord::new(
                date("2025-03-20"),
                date("2025-03-20"),
                dec("0.6"),
                dec("0"),
                dec("5"),
            )])
            .await
            .unwrap();

        let notifier = RecordingNotifier::default();
        let report = DailyRun::new(store.clone(), &test_config(dir.path()), None, Box::new(notifier.clone()))
            .execute(date("2025-03-20"))
            .await
            .unwrap();

        assert_eq!(report.action, Some(Action::Water));
        assert!(report.notified);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);

        let decisions = store.query_decisions(&DecisionFilter::all()).await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].date, date("2025-03-20"));
        assert_eq!(decisions[0].action, Action::Water);
    }

    /// Short history can instead skip the day or fail the run
    #[tokio::test]
    async fn test_short_history_skip_and_fail() {
        let dir = tempfile::tempdir().unwrap();
        let store = RainfallStore::in_memory().await.unwrap();
        store.upsert_historical(&dry_days("2025-03-20", 6)).await.unwrap();

        let mut config = test_config(dir.path());
        config.model.insufficient_data = InsufficientDataPolicy::Skip;
        let skipped = DailyRun::new(store.clone(), &config, None, Box::new(RecordingNotifier::default()))
            .execute(date("2025-03-20"))
            .await
            .unwrap();
        assert_eq!(skipped.action, None);
        assert!(!skipped.notified);
        assert!(store.query_decisions(&DecisionFilter::all()).await.unwrap().is_empty());

        config.model.insufficient_data = InsufficientDataPolicy::Fail;
        let failed = DailyRun::new(store.clone(), &config, None, Box::new(RecordingNotifier::default()))
            .execute(date("2025-03-20"))
            .await;
        match failed {
            Err(AppError::InsufficientData { missing_offsets, .. }) => assert_eq!(missing_offsets, vec![6]),
            other => panic!("expected InsufficientData, got {:?}", other),
        }
        assert!(store.query_decisions(&DecisionFilter::all()).await.unwrap().is_empty());
    }

    /// The shipped default decides from whatever history is present
    #[test]
    fn test_default_insufficient_data_policy_is_proceed() {
        assert_eq!(Config::default().model.insufficient_data, InsufficientDataPolicy::Proceed);
    }

    /// Full week: decide, write back, then replay the decision a week later
    #[tokio::test]
    async fn test_decision_is_replayed_next_week() {
        let dir = tempfile::tempdir().unwrap();
        let store = RainfallStore::in_memory().await.unwrap();
        let source = FixedSource {
            forecasts: vec![ForecastRecord::new(
                date("2025-03-20"),
                date("2025-03-21"),
                dec("0.6"),
                dec("0"),
                dec("5"),
            )],
            historical: dry_days("2025-03-20", 7),
        };
        let notifier = RecordingNotifier::default();
        let config = test_config(dir.path());

        let report = DailyRun::new(store.clone(), &config, Some(Box::new(source)), Box::new(notifier.clone()))
            .execute(date("2025-03-20"))
            .await
            .unwrap();

        assert_eq!(report.action, Some(Action::Water));
        let ingested = report.ingested.unwrap();
        assert_eq!(ingested.forecasts, 1);
        assert_eq!(ingested.historical, 7);

        let decisions = store
            .query_decisions(&DecisionFilter::for_model("logic"))
            .await
            .unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].date, date("2025-03-20"));
        assert_eq!(decisions[0].action, Action::Water);

        let builder = FeatureRowBuilder::new(store.clone(), FeatureWindow::default());
        let next_week = builder.build(date("2025-03-27"), "logic").await.unwrap();
        assert_eq!(next_week.historical(7), Some(dec("20")));
    }

    /// The message carries the chart and the inline placeholder
    #[tokio::test]
    async fn test_notification_includes_chart() {
        let dir = tempfile::tempdir().unwrap();
        let store = RainfallStore::in_memory().await.unwrap();
        store.upsert_historical(&dry_days("2025-03-19", 7)).await.unwrap();
        let notifier = RecordingNotifier::default();

        DailyRun::new(store, &test_config(dir.path()), None, Box::new(notifier.clone()))
            .execute(date("2025-03-20"))
            .await
            .unwrap();

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.starts_with("Water the garden"));
        assert!(sent[0].body.contains(INLINE_IMAGE_PLACEHOLDER));

        let chart = sent[0].attachment.clone().unwrap();
        assert_eq!(chart, dir.path().join("forecast.svg"));
        assert!(std::fs::read_to_string(chart).unwrap().starts_with("<svg"));
    }

    /// A failed send is reported but the decision stays recorded
    #[tokio::test]
    async fn test_notification_failure_keeps_decision() {
        let dir = tempfile::tempdir().unwrap();
        let store = RainfallStore::in_memory().await.unwrap();
        store.upsert_historical(&dry_days("2025-03-19", 7)).await.unwrap();

        let report = DailyRun::new(store.clone(), &test_config(dir.path()), None, Box::new(FailingNotifier))
            .execute(date("2025-03-20"))
            .await
            .unwrap();

        assert_eq!(report.action, Some(Action::Water));
        assert!(!report.notified);
        assert_eq!(store.query_decisions(&DecisionFilter::all()).await.unwrap().len(), 1);
    }

    /// No notification when watering is not needed unless configured
    #[tokio::test]
    async fn test_no_action_is_silent_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = RainfallStore::in_memory().await.unwrap();
        let wet: Vec<_> = dry_days("2025-03-19", 7)
            .into_iter()
            .map(|r| HistoricalRecord::new(r.date, dec("10")))
            .collect();
        store.upsert_historical(&wet).await.unwrap();

        let mut config = test_config(dir.path());
        let notifier = RecordingNotifier::default();
        let report = DailyRun::new(store.clone(), &config, None, Box::new(notifier.clone()))
            .execute(date("2025-03-20"))
            .await
            .unwrap();
        assert_eq!(report.action, Some(Action::NoAction));
        assert!(!report.notified);
        assert!(notifier.sent.lock().unwrap().is_empty());

        config.email.notify_always = true;
        let report = DailyRun::new(store, &config, None, Box::new(notifier.clone()))
            .execute(date("2025-03-20"))
            .await
            .unwrap();
        assert!(report.notified);
        assert!(notifier.sent.lock().unwrap()[0].subject.starts_with("No watering"));
    }

    /// Rerunning a day overwrites rather than duplicates the decision
    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = RainfallStore::in_memory().await.unwrap();
        store.upsert_historical(&dry_days("2025-03-19", 7)).await.unwrap();
        let config = test_config(dir.path());

        for _ in 0..2 {
            DailyRun::new(store.clone(), &config, None, Box::new(RecordingNotifier::default()))
                .execute(date("2025-03-20"))
                .await
                .unwrap();
        }

        assert_eq!(store.query_decisions(&DecisionFilter::all()).await.unwrap().len(), 1);
    }

    /// Unknown policies fail before anything is written
    #[tokio::test]
    async fn test_unknown_policy_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = RainfallStore::in_memory().await.unwrap();
        let mut config = test_config(dir.path());
        config.model.name = "neural".to_string();

        let result = DailyRun::new(store, &config, None, Box::new(RecordingNotifier::default()))
            .execute(date("2025-03-20"))
            .await;
        match result {
            Err(e @ AppError::Configuration(_)) => assert_eq!(e.code(), "CONFIGURATION_ERROR"),
            other => panic!("expected Configuration, got {:?}", other),
        }
    }

    /// Collecting without a source is a configuration error
    #[tokio::test]
    async fn test_collect_requires_source() {
        let store = RainfallStore::in_memory().await.unwrap();
        let run = DailyRun::new(store, &Config::default(), None, Box::new(RecordingNotifier::default()));

        assert!(matches!(
            run.collect(date("2025-03-20")).await,
            Err(AppError::Configuration(_))
        ));
    }

    /// The message body summarises the trailing rain and today's forecast
    #[test]
    fn test_compose_message() {
        let config = Config::default();
        let row = FeatureRow::new(date("2025-03-20"))
            .with(FeatureKey::Historical(1), dec("3"))
            .with(FeatureKey::Historical(2), dec("4.5"))
            .with(FeatureKey::ForecastChance(0), dec("0.6"))
            .with(FeatureKey::ForecastHighMm(0), dec("5"));

        let message = compose_message(&row, Action::Water, &config.model);

        assert_eq!(message.subject, "Water the garden today (Thu 20 Mar)");
        assert!(message.body.contains("last 2 days: 7.5mm"));
        assert!(message.body.contains("60% chance of rain, up to 5mm"));
        assert!(message.body.ends_with(INLINE_IMAGE_PLACEHOLDER));
        assert!(message.attachment.is_none());
    }
}
