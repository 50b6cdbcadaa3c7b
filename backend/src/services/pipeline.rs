//! Daily run orchestration
//!
//! ingest → store → feature row → decision → write-back → chart + email.
//! Every write is an idempotent upsert so a failed run can simply be rerun.
//! Notification is best effort and never undoes a recorded decision.

use chrono::NaiveDate;
use rainfall_shared::{Action, FeatureRow};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::{ChartConfig, Config, InsufficientDataPolicy, ModelConfig};
use crate::error::{AppError, AppResult};
use crate::external::bom::RainfallSource;
use crate::external::gmail::{EmailMessage, Notifier, INLINE_IMAGE_PLACEHOLDER};
use crate::services::chart::write_forecast_chart;
use crate::services::decision::{policy_for_name, record_decision};
use crate::services::features::FeatureRowBuilder;
use crate::services::store::RainfallStore;

/// Counts from one ingestion pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub forecasts: usize,
    pub historical: usize,
}

/// Outcome of a daily run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub decision_date: NaiveDate,
    /// `None` when the decision was skipped for lack of history
    pub action: Option<Action>,
    pub ingested: Option<IngestSummary>,
    pub notified: bool,
}

/// One end-to-end daily run
pub struct DailyRun {
    store: RainfallStore,
    model: ModelConfig,
    chart: ChartConfig,
    notify_always: bool,
    source: Option<Box<dyn RainfallSource>>,
    notifier: Box<dyn Notifier>,
}

impl DailyRun {
    pub fn new(
        store: RainfallStore,
        config: &Config,
        source: Option<Box<dyn RainfallSource>>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            model: config.model.clone(),
            chart: config.chart.clone(),
            notify_always: config.email.notify_always,
            source,
            notifier,
        }
    }

    /// Fetch today's forecasts and the observation table and upsert both
    pub async fn collect(&self, today: NaiveDate) -> AppResult<IngestSummary> {
        let Some(source) = &self.source else {
            return Err(AppError::Configuration(
                "No rainfall source configured".to_string(),
            ));
        };

        let forecasts = source.fetch_forecasts(today).await?;
        let historical = source.fetch_historical().await?;

        let summary = IngestSummary {
            forecasts: self.store.upsert_forecasts(&forecasts).await?,
            historical: self.store.upsert_historical(&historical).await?,
        };

        tracing::info!(
            "Stored {} forecast and {} historical records",
            summary.forecasts,
            summary.historical
        );
        Ok(summary)
    }

    /// Run the whole pipeline for `today`
    pub async fn execute(&self, today: NaiveDate) -> AppResult<RunReport> {
        let policy = policy_for_name(&self.model.name, self.model.decision_config())?;

        let ingested = if self.source.is_some() {
            Some(self.collect(today).await?)
        } else {
            None
        };

        let builder = FeatureRowBuilder::new(self.store.clone(), self.model.feature_window());
        let row = builder.build(today, &self.model.replay_model).await?;

        let action = match policy.decide(&row) {
            Ok(action) => action,
            Err(AppError::InsufficientData {
                decision_date,
                missing_offsets,
            }) => match self.model.insufficient_data {
                InsufficientDataPolicy::Skip => {
                    tracing::warn!(
                        "Skipping decision for {}: missing historical offsets {:?}",
                        decision_date,
                        missing_offsets
                    );
                    return Ok(RunReport {
                        decision_date: today,
                        action: None,
                        ingested,
                        notified: false,
                    });
                }
                InsufficientDataPolicy::Proceed => {
                    tracing::warn!(
                        "Deciding for {} without historical offsets {:?}",
                        decision_date,
                        missing_offsets
                    );
                    policy.decide_with_available(&row)
                }
                InsufficientDataPolicy::Fail => {
                    return Err(AppError::InsufficientData {
                        decision_date,
                        missing_offsets,
                    })
                }
            },
            Err(e) => return Err(e),
        };

        record_decision(&self.store, &self.model.name, today, action).await?;

        let notified = if action.is_water() || self.notify_always {
            self.notify(&row, action).await
        } else {
            tracing::debug!("No watering needed, so no notification for {}", today);
            false
        };

        Ok(RunReport {
            decision_date: today,
            action: Some(action),
            ingested,
            notified,
        })
    }

    /// Render the chart and send the message. Failures are logged only.
    async fn notify(&self, row: &FeatureRow, action: Action) -> bool {
        let chart = match write_forecast_chart(&self.store, &self.chart, self.model.watering_target_mm).await {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!("Forecast chart not produced: {}", e);
                None
            }
        };

        let mut message = compose_message(row, action, &self.model);
        if chart.is_none() {
            message.body = message.body.replace(INLINE_IMAGE_PLACEHOLDER, "");
        }
        message.attachment = chart;

        match self.notifier.send(&message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Notification for {} not delivered: {}", row.decision_date, e);
                false
            }
        }
    }
}

/// Subject and body describing a decision
pub fn compose_message(row: &FeatureRow, action: Action, model: &ModelConfig) -> EmailMessage {
    let trailing: Decimal = (1..=model.trailing_days)
        .filter_map(|k| row.historical(k))
        .sum();
    let days_present = (1..=model.trailing_days)
        .filter(|k| row.historical(*k).is_some())
        .count();

    let subject = match action {
        Action::Water => format!("Water the garden today ({})", row.decision_date.format("%a %d %b")),
        Action::NoAction => format!("No watering needed today ({})", row.decision_date.format("%a %d %b")),
    };

    let mut body = format!(
        "Rainfall over the last {} days: {}mm (target {}mm per week).\n",
        days_present,
        trailing.normalize(),
        model.watering_target_mm.normalize()
    );
    match (row.forecast_chance(0), row.forecast_high_mm(0)) {
        (Some(chance), Some(mm)) => body.push_str(&format!(
            "Today's forecast: {}% chance of rain, up to {}mm.\n",
            (chance * Decimal::from(100)).normalize(),
            mm.normalize()
        )),
        _ => body.push_str("No forecast for today was available.\n"),
    }
    body.push_str(&format!("Model {} recommends: {}.\n\n", model.name, action));
    body.push_str(INLINE_IMAGE_PLACEHOLDER);

    EmailMessage {
        subject,
        body,
        attachment: None,
    }
}
