//! Training-set assembler
//!
//! Builds one feature row per forecast issue date and labels each row from
//! the observed (replay-adjusted) rainfall, for offline evaluation of the
//! decision policies.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use chrono::{Duration, NaiveDate};
use rainfall_shared::{Action, DateFilter, FeatureKey, FeatureRow, HistoricalFilter, HistoricalRecord};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::services::decision::DecisionPolicy;
use crate::services::features::{apply_replay, watered_dates, FeatureRowBuilder};
use crate::services::store::RainfallStore;

/// Ground-truth label settings
#[derive(Debug, Clone, PartialEq)]
pub struct LabelConfig {
    /// Trailing days summed for each label, ending on the labelled date
    pub window_days: i64,
    pub watering_target_mm: Decimal,
    pub replay_water_mm: Decimal,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            watering_target_mm: Decimal::from(20),
            replay_water_mm: Decimal::from(20),
        }
    }
}

/// Feature rows keyed by decision date
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    rows: BTreeMap<NaiveDate, FeatureRow>,
}

impl FeatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row, replacing any row for the same date
    pub fn insert(&mut self, row: FeatureRow) {
        self.rows.insert(row.decision_date, row);
    }

    pub fn get(&self, date: NaiveDate) -> Option<&FeatureRow> {
        self.rows.get(&date)
    }

    pub fn rows(&self) -> impl Iterator<Item = &FeatureRow> {
        self.rows.values()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.rows.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Union of keys across all rows
    pub fn columns(&self) -> BTreeSet<FeatureKey> {
        self.rows.values().flat_map(|row| row.keys()).collect()
    }
}

/// Label each date that has a complete trailing window of observations
///
/// A date is labelled `Water` when the replay-adjusted rainfall over the
/// `window_days` days ending on it is below the watering target.
pub fn compute_labels(
    historical: &[HistoricalRecord],
    watered: &BTreeSet<NaiveDate>,
    config: &LabelConfig,
) -> BTreeMap<NaiveDate, Action> {
    let mut adjusted = historical.to_vec();
    apply_replay(&mut adjusted, watered, config.replay_water_mm);

    let by_date: BTreeMap<NaiveDate, Decimal> =
        adjusted.into_iter().map(|r| (r.date, r.rainfall_mm)).collect();

    let mut labels = BTreeMap::new();
    if config.window_days <= 0 {
        return labels;
    }

    for date in by_date.keys() {
        let window: Option<Vec<Decimal>> = (0..config.window_days)
            .map(|back| by_date.get(&(*date - Duration::days(back))).copied())
            .collect();

        if let Some(values) = window {
            let total: Decimal = values.into_iter().sum();
            labels.insert(*date, Action::from(total < config.watering_target_mm));
        }
    }

    labels
}

/// Attach labels to the rows of `table` by decision date
pub fn join_labels(
    table: &FeatureTable,
    labels: &BTreeMap<NaiveDate, Action>,
) -> BTreeMap<NaiveDate, Option<Action>> {
    table
        .dates()
        .map(|date| (date, labels.get(&date).copied()))
        .collect()
}

/// Confusion summary of a policy against ground-truth labels
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationSummary {
    pub policy: String,
    pub evaluated: usize,
    pub unlabelled: usize,
    pub insufficient_data: usize,
    /// Rows where the policy returned any other error
    pub failed: usize,
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl EvaluationSummary {
    /// Share of evaluated rows where the policy matched the label
    pub fn accuracy(&self) -> Option<Decimal> {
        if self.evaluated == 0 {
            return None;
        }
        let correct = Decimal::from(self.true_positive + self.true_negative);
        Some((correct / Decimal::from(self.evaluated)).round_dp(4))
    }
}

/// Replay a policy over every labelled row
pub fn evaluate_policy(
    table: &FeatureTable,
    labels: &BTreeMap<NaiveDate, Option<Action>>,
    policy: &dyn DecisionPolicy,
) -> EvaluationSummary {
    let mut summary = EvaluationSummary {
        policy: policy.name().to_string(),
        ..EvaluationSummary::default()
    };

    for row in table.rows() {
        let Some(label) = labels.get(&row.decision_date).copied().flatten() else {
            summary.unlabelled += 1;
            continue;
        };

        let predicted = match policy.decide(row) {
            Ok(action) => action,
            Err(AppError::InsufficientData { .. }) => {
                summary.insufficient_data += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!("Policy {} failed on {}: {}", policy.name(), row.decision_date, e);
                summary.failed += 1;
                continue;
            }
        };

        summary.evaluated += 1;
        match (predicted, label) {
            (Action::Water, Action::Water) => summary.true_positive += 1,
            (Action::Water, Action::NoAction) => summary.false_positive += 1,
            (Action::NoAction, Action::NoAction) => summary.true_negative += 1,
            (Action::NoAction, Action::Water) => summary.false_negative += 1,
        }
    }

    summary
}

/// Export a labelled feature table as CSV
///
/// Columns: `date`, one per feature key in key order, `label`. Absent
/// values are written as empty cells.
pub fn write_csv<W: Write>(
    table: &FeatureTable,
    labels: &BTreeMap<NaiveDate, Option<Action>>,
    writer: W,
) -> AppResult<()> {
    let columns: Vec<FeatureKey> = table.columns().into_iter().collect();
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header = vec!["date".to_string()];
    header.extend(columns.iter().map(FeatureKey::column_name));
    header.push("label".to_string());
    wtr.write_record(&header)
        .map_err(|e| AppError::Internal(format!("CSV serialization error: {}", e)))?;

    for row in table.rows() {
        let mut record = vec![row.decision_date.format("%Y-%m-%d").to_string()];
        record.extend(
            columns
                .iter()
                .map(|key| row.get(*key).map(|v| v.normalize().to_string()).unwrap_or_default()),
        );
        record.push(
            labels
                .get(&row.decision_date)
                .copied()
                .flatten()
                .map(|label| label.as_i64().to_string())
                .unwrap_or_default(),
        );
        wtr.write_record(&record)
            .map_err(|e| AppError::Internal(format!("CSV serialization error: {}", e)))?;
    }

    wtr.flush()?;
    Ok(())
}

/// Drives the feature-row builder across every known decision date
#[derive(Clone)]
pub struct TrainingSetAssembler {
    store: RainfallStore,
    builder: FeatureRowBuilder,
}

impl TrainingSetAssembler {
    pub fn new(store: RainfallStore, builder: FeatureRowBuilder) -> Self {
        Self { store, builder }
    }

    /// One row per distinct forecast issue date
    pub async fn build_feature_table(&self, replay_model: &str) -> AppResult<FeatureTable> {
        let mut table = FeatureTable::new();
        for issue_date in self.store.forecast_issue_dates().await? {
            table.insert(self.builder.build(issue_date, replay_model).await?);
        }

        tracing::info!(
            "Built feature table with {} rows and {} columns",
            table.len(),
            table.columns().len()
        );
        Ok(table)
    }

    /// Labels for every row of `table`, `None` where history is too short
    pub async fn build_labels(
        &self,
        table: &FeatureTable,
        replay_model: &str,
        config: &LabelConfig,
    ) -> AppResult<BTreeMap<NaiveDate, Option<Action>>> {
        let historical = self.store.query_historical(&HistoricalFilter::all()).await?;
        let watered = watered_dates(&self.store, replay_model, DateFilter::Any).await?;
        let labels = compute_labels(&historical, &watered, config);

        Ok(join_labels(table, &labels))
    }
}
