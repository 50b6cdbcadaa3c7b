//! Structured query predicates for the record store
//!
//! Filters are plain data. The storage layer turns them into bound
//! parameters; caller text never reaches the query string.

use std::ops::Bound;

use chrono::NaiveDate;

use crate::models::{Action, DecisionRecord, ForecastRecord, HistoricalRecord};

/// Predicate on a date column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateFilter {
    #[default]
    Any,
    On(NaiveDate),
    Range {
        start: Bound<NaiveDate>,
        end: Bound<NaiveDate>,
    },
}

impl DateFilter {
    /// `start <= date <= end`
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        DateFilter::Range {
            start: Bound::Included(start),
            end: Bound::Included(end),
        }
    }

    /// `start <= date < end`
    pub fn half_open(start: NaiveDate, end: NaiveDate) -> Self {
        DateFilter::Range {
            start: Bound::Included(start),
            end: Bound::Excluded(end),
        }
    }

    /// `date > start`
    pub fn after(start: NaiveDate) -> Self {
        DateFilter::Range {
            start: Bound::Excluded(start),
            end: Bound::Unbounded,
        }
    }

    /// `date < end`
    pub fn before(end: NaiveDate) -> Self {
        DateFilter::Range {
            start: Bound::Unbounded,
            end: Bound::Excluded(end),
        }
    }

    pub fn matches(&self, date: NaiveDate) -> bool {
        match self {
            DateFilter::Any => true,
            DateFilter::On(d) => date == *d,
            DateFilter::Range { start, end } => {
                let lower = match start {
                    Bound::Included(s) => date >= *s,
                    Bound::Excluded(s) => date > *s,
                    Bound::Unbounded => true,
                };
                let upper = match end {
                    Bound::Included(e) => date <= *e,
                    Bound::Excluded(e) => date < *e,
                    Bound::Unbounded => true,
                };
                lower && upper
            }
        }
    }
}

/// Filter over forecast records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForecastFilter {
    pub issue_date: DateFilter,
    pub applies_to_date: DateFilter,
}

impl ForecastFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn issued(mut self, filter: DateFilter) -> Self {
        self.issue_date = filter;
        self
    }

    pub fn applying_to(mut self, filter: DateFilter) -> Self {
        self.applies_to_date = filter;
        self
    }

    pub fn matches(&self, record: &ForecastRecord) -> bool {
        self.issue_date.matches(record.issue_date) && self.applies_to_date.matches(record.applies_to_date)
    }
}

/// Filter over historical records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoricalFilter {
    pub date: DateFilter,
}

impl HistoricalFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn dated(filter: DateFilter) -> Self {
        Self { date: filter }
    }

    pub fn matches(&self, record: &HistoricalRecord) -> bool {
        self.date.matches(record.date)
    }
}

/// Filter over decision records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionFilter {
    pub model_name: Option<String>,
    pub date: DateFilter,
    pub action: Option<Action>,
}

impl DecisionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_model(model_name: impl Into<String>) -> Self {
        Self {
            model_name: Some(model_name.into()),
            ..Self::default()
        }
    }

    pub fn dated(mut self, filter: DateFilter) -> Self {
        self.date = filter;
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn matches(&self, record: &DecisionRecord) -> bool {
        self.model_name
            .as_deref()
            .map_or(true, |name| name == record.model_name)
            && self.date.matches(record.date)
            && self.action.map_or(true, |action| action == record.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_half_open_excludes_end() {
        let filter = DateFilter::half_open(date("2025-03-13"), date("2025-03-20"));
        assert!(filter.matches(date("2025-03-13")));
        assert!(filter.matches(date("2025-03-19")));
        assert!(!filter.matches(date("2025-03-20")));
        assert!(!filter.matches(date("2025-03-12")));
    }

    #[test]
    fn test_between_is_inclusive() {
        let filter = DateFilter::between(date("2025-03-01"), date("2025-03-02"));
        assert!(filter.matches(date("2025-03-01")));
        assert!(filter.matches(date("2025-03-02")));
        assert!(!filter.matches(date("2025-03-03")));
    }

    #[test]
    fn test_after_and_before() {
        assert!(DateFilter::after(date("2025-03-19")).matches(date("2025-03-20")));
        assert!(!DateFilter::after(date("2025-03-19")).matches(date("2025-03-19")));
        assert!(DateFilter::before(date("2025-03-19")).matches(date("2025-03-18")));
        assert!(!DateFilter::before(date("2025-03-19")).matches(date("2025-03-19")));
    }

    #[test]
    fn test_decision_filter_matches_all_clauses() {
        let record = DecisionRecord::new("logic", date("2025-03-18"), Action::Water);
        let filter = DecisionFilter::for_model("logic")
            .dated(DateFilter::On(date("2025-03-18")))
            .with_action(Action::Water);
        assert!(filter.matches(&record));
        assert!(!DecisionFilter::for_model("other").matches(&record));
        assert!(!DecisionFilter::all().with_action(Action::NoAction).matches(&record));
    }
}
