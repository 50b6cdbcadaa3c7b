//! Time-series record store
//!
//! Three independent SQLite tables: forecasts keyed by (issue date, target
//! date), historical observations keyed by date, and decisions keyed by
//! (model, date). Upsert is the only mutation apart from an explicit reset.

use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;
use rainfall_shared::{
    validate_forecast_record, validate_historical_record, validate_model_name, Action, DateFilter,
    DecisionFilter, DecisionRecord, ForecastFilter, ForecastRecord, HistoricalFilter,
    HistoricalRecord,
};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};

/// Record store backed by a SQLite pool
#[derive(Clone)]
pub struct RainfallStore {
    db: SqlitePool,
}

/// Persisted tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Forecast,
    Historical,
    Decisions,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Forecast, Table::Historical, Table::Decisions];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Forecast => "forecast",
            Table::Historical => "historical",
            Table::Decisions => "decisions",
        }
    }

    fn create_sql(&self) -> &'static str {
        match self {
            Table::Forecast => {
                r#"
                CREATE TABLE IF NOT EXISTS forecast (
                    issue_date TEXT NOT NULL,
                    applies_to_date TEXT NOT NULL,
                    rain_chance TEXT NOT NULL,
                    rain_mm_low TEXT NOT NULL,
                    rain_mm_high TEXT NOT NULL,
                    PRIMARY KEY (issue_date, applies_to_date)
                )
                "#
            }
            Table::Historical => {
                r#"
                CREATE TABLE IF NOT EXISTS historical (
                    date TEXT PRIMARY KEY,
                    rainfall_mm TEXT NOT NULL
                )
                "#
            }
            Table::Decisions => {
                r#"
                CREATE TABLE IF NOT EXISTS decisions (
                    model_name TEXT NOT NULL,
                    date TEXT NOT NULL,
                    action INTEGER NOT NULL CHECK (action IN (0, 1)),
                    PRIMARY KEY (model_name, date)
                )
                "#
            }
        }
    }
}

impl FromStr for Table {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| AppError::Configuration(format!("Unknown table: {}", s)))
    }
}

/// One column of a table schema
#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub table_name: String,
    pub column_index: i64,
    pub column_name: String,
    pub data_type: String,
    pub not_null: bool,
    /// Position within the primary key, 0 when not part of it
    pub primary_key: i64,
}

#[derive(Debug, FromRow)]
struct PragmaColumn {
    cid: i64,
    name: String,
    data_type: String,
    not_null: i64,
    pk: i64,
}

#[derive(Debug, FromRow)]
struct ForecastRow {
    issue_date: NaiveDate,
    applies_to_date: NaiveDate,
    rain_chance: String,
    rain_mm_low: String,
    rain_mm_high: String,
}

#[derive(Debug, FromRow)]
struct HistoricalRow {
    date: NaiveDate,
    rainfall_mm: String,
}

#[derive(Debug, FromRow)]
struct DecisionRow {
    model_name: String,
    date: NaiveDate,
    action: i64,
}

fn parse_decimal(field: &str, text: &str) -> AppResult<Decimal> {
    Decimal::from_str(text)
        .map_err(|e| AppError::malformed(field, format!("stored value {:?}: {}", text, e)))
}

fn decimal_text(value: Decimal) -> String {
    value.normalize().to_string()
}

impl ForecastRow {
    fn into_record(self) -> AppResult<ForecastRecord> {
        Ok(ForecastRecord {
            issue_date: self.issue_date,
            applies_to_date: self.applies_to_date,
            rain_chance: parse_decimal("rain_chance", &self.rain_chance)?,
            rain_mm_low: parse_decimal("rain_mm_low", &self.rain_mm_low)?,
            rain_mm_high: parse_decimal("rain_mm_high", &self.rain_mm_high)?,
        })
    }
}

impl HistoricalRow {
    fn into_record(self) -> AppResult<HistoricalRecord> {
        Ok(HistoricalRecord {
            date: self.date,
            rainfall_mm: parse_decimal("rainfall_mm", &self.rainfall_mm)?,
        })
    }
}

impl DecisionRow {
    fn into_record(self) -> AppResult<DecisionRecord> {
        let action = Action::from_i64(self.action).ok_or_else(|| {
            AppError::malformed("action", format!("stored value {} is not 0 or 1", self.action))
        })?;
        Ok(DecisionRecord {
            model_name: self.model_name,
            date: self.date,
            action,
        })
    }
}

/// Append `AND column <op> ?` clauses for a date filter
fn push_date_filter(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, filter: &DateFilter) {
    use std::ops::Bound;

    match filter {
        DateFilter::Any => {}
        DateFilter::On(date) => {
            qb.push(format!(" AND {} = ", column)).push_bind(*date);
        }
        DateFilter::Range { start, end } => {
            match start {
                Bound::Included(d) => {
                    qb.push(format!(" AND {} >= ", column)).push_bind(*d);
                }
                Bound::Excluded(d) => {
                    qb.push(format!(" AND {} > ", column)).push_bind(*d);
                }
                Bound::Unbounded => {}
            }
            match end {
                Bound::Included(d) => {
                    qb.push(format!(" AND {} <= ", column)).push_bind(*d);
                }
                Bound::Excluded(d) => {
                    qb.push(format!(" AND {} < ", column)).push_bind(*d);
                }
                Bound::Unbounded => {}
            }
        }
    }
}

impl RainfallStore {
    /// Wrap an existing pool. The schema is not touched.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Open the configured database and ensure the tables exist
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| AppError::StorageUnavailable(format!("{}: {}", config.url, e)))?
            .create_if_missing(config.create_if_missing);

        let db = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("{}: {}", config.url, e)))?;

        tracing::debug!("Connected to record store at {}", config.url);

        let store = Self::new(db);
        store.init_schema().await?;
        Ok(store)
    }

    /// Private in-memory database, mainly for tests and dry runs
    pub async fn in_memory() -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        // A memory database lives and dies with its connection
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        let store = Self::new(db);
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Create any missing tables
    pub async fn init_schema(&self) -> AppResult<()> {
        for table in Table::ALL {
            sqlx::query(table.create_sql()).execute(&self.db).await?;
        }
        Ok(())
    }

    /// Drop and recreate one table, discarding its records
    pub async fn reset_table(&self, table: Table) -> AppResult<()> {
        tracing::info!("Resetting {} table", table.name());

        let mut tx = self.db.begin().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table.name()))
            .execute(&mut *tx)
            .await?;
        sqlx::query(table.create_sql()).execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(())
    }

    /// Drop and recreate every table
    pub async fn reset_all(&self) -> AppResult<()> {
        for table in Table::ALL {
            self.reset_table(table).await?;
        }
        Ok(())
    }

    /// Schema of every table
    pub async fn table_info(&self) -> AppResult<Vec<ColumnInfo>> {
        let mut columns = Vec::new();

        for table in Table::ALL {
            let rows = sqlx::query_as::<_, PragmaColumn>(
                r#"
                SELECT cid, name, type AS data_type, "notnull" AS not_null, pk
                FROM pragma_table_info(?)
                ORDER BY cid
                "#,
            )
            .bind(table.name())
            .fetch_all(&self.db)
            .await?;

            columns.extend(rows.into_iter().map(|row| ColumnInfo {
                table_name: table.name().to_string(),
                column_index: row.cid,
                column_name: row.name,
                data_type: row.data_type,
                not_null: row.not_null != 0,
                primary_key: row.pk,
            }));
        }

        Ok(columns)
    }

    // ========================================================================
    // Upserts
    // ========================================================================

    /// Insert or replace forecasts. The whole batch is rejected if any
    /// record is malformed.
    pub async fn upsert_forecasts(&self, records: &[ForecastRecord]) -> AppResult<usize> {
        for (index, record) in records.iter().enumerate() {
            validate_forecast_record(record).map_err(|(field, message)| {
                AppError::malformed(
                    field,
                    format!(
                        "{} (record {}, issued {} for {})",
                        message, index, record.issue_date, record.applies_to_date
                    ),
                )
            })?;
        }

        let mut tx = self.db.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO forecast (issue_date, applies_to_date, rain_chance, rain_mm_low, rain_mm_high)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (issue_date, applies_to_date) DO UPDATE SET
                    rain_chance = excluded.rain_chance,
                    rain_mm_low = excluded.rain_mm_low,
                    rain_mm_high = excluded.rain_mm_high
                "#,
            )
            .bind(record.issue_date)
            .bind(record.applies_to_date)
            .bind(decimal_text(record.rain_chance))
            .bind(decimal_text(record.rain_mm_low))
            .bind(decimal_text(record.rain_mm_high))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!("Upserted {} forecast records", records.len());
        Ok(records.len())
    }

    /// Insert or replace historical observations. All-or-nothing per call.
    pub async fn upsert_historical(&self, records: &[HistoricalRecord]) -> AppResult<usize> {
        for (index, record) in records.iter().enumerate() {
            validate_historical_record(record).map_err(|(field, message)| {
                AppError::malformed(
                    field,
                    format!("{} (record {}, dated {})", message, index, record.date),
                )
            })?;
        }

        let mut tx = self.db.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO historical (date, rainfall_mm)
                VALUES (?, ?)
                ON CONFLICT (date) DO UPDATE SET rainfall_mm = excluded.rainfall_mm
                "#,
            )
            .bind(record.date)
            .bind(decimal_text(record.rainfall_mm))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!("Upserted {} historical records", records.len());
        Ok(records.len())
    }

    /// Insert or replace the decision for (model, date)
    pub async fn upsert_decision(
        &self,
        model_name: &str,
        date: NaiveDate,
        action: Action,
    ) -> AppResult<DecisionRecord> {
        validate_model_name(model_name).map_err(|e| AppError::malformed("model_name", e))?;

        sqlx::query(
            r#"
            INSERT INTO decisions (model_name, date, action)
            VALUES (?, ?, ?)
            ON CONFLICT (model_name, date) DO UPDATE SET action = excluded.action
            "#,
        )
        .bind(model_name)
        .bind(date)
        .bind(action.as_i64())
        .execute(&self.db)
        .await?;

        Ok(DecisionRecord::new(model_name, date, action))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn query_forecasts(&self, filter: &ForecastFilter) -> AppResult<Vec<ForecastRecord>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT issue_date, applies_to_date, rain_chance, rain_mm_low, rain_mm_high FROM forecast WHERE 1 = 1",
        );
        push_date_filter(&mut qb, "issue_date", &filter.issue_date);
        push_date_filter(&mut qb, "applies_to_date", &filter.applies_to_date);
        qb.push(" ORDER BY issue_date, applies_to_date");

        qb.build_query_as::<ForecastRow>()
            .fetch_all(&self.db)
            .await?
            .into_iter()
            .map(ForecastRow::into_record)
            .collect()
    }

    pub async fn query_historical(&self, filter: &HistoricalFilter) -> AppResult<Vec<HistoricalRecord>> {
        let mut qb =
            QueryBuilder::<Sqlite>::new("SELECT date, rainfall_mm FROM historical WHERE 1 = 1");
        push_date_filter(&mut qb, "date", &filter.date);
        qb.push(" ORDER BY date");

        qb.build_query_as::<HistoricalRow>()
            .fetch_all(&self.db)
            .await?
            .into_iter()
            .map(HistoricalRow::into_record)
            .collect()
    }

    pub async fn query_decisions(&self, filter: &DecisionFilter) -> AppResult<Vec<DecisionRecord>> {
        let mut qb =
            QueryBuilder::<Sqlite>::new("SELECT model_name, date, action FROM decisions WHERE 1 = 1");
        if let Some(model_name) = &filter.model_name {
            qb.push(" AND model_name = ").push_bind(model_name.clone());
        }
        push_date_filter(&mut qb, "date", &filter.date);
        if let Some(action) = filter.action {
            qb.push(" AND action = ").push_bind(action.as_i64());
        }
        qb.push(" ORDER BY model_name, date");

        qb.build_query_as::<DecisionRow>()
            .fetch_all(&self.db)
            .await?
            .into_iter()
            .map(DecisionRow::into_record)
            .collect()
    }

    /// Distinct forecast issue dates, ascending
    pub async fn forecast_issue_dates(&self) -> AppResult<Vec<NaiveDate>> {
        let dates = sqlx::query_scalar::<_, NaiveDate>(
            "SELECT DISTINCT issue_date FROM forecast ORDER BY issue_date",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(dates)
    }

    /// Most recent forecast issue date, if any forecast is stored
    pub async fn latest_forecast_issue_date(&self) -> AppResult<Option<NaiveDate>> {
        let date = sqlx::query_scalar::<_, NaiveDate>(
            "SELECT issue_date FROM forecast ORDER BY issue_date DESC LIMIT 1",
        )
        .fetch_optional(&self.db)
        .await?;

        Ok(date)
    }

    /// Most recent observation date, if any observation is stored
    pub async fn latest_historical_date(&self) -> AppResult<Option<NaiveDate>> {
        let date = sqlx::query_scalar::<_, NaiveDate>(
            "SELECT date FROM historical ORDER BY date DESC LIMIT 1",
        )
        .fetch_optional(&self.db)
        .await?;

        Ok(date)
    }
}
