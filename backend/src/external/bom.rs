//! Bureau of Meteorology page client for rainfall forecasts and observations
//!
//! Scrapes the public seven-day town forecast page and the daily rainfall
//! observations page. Page layout is not versioned; anything that cannot be
//! read is skipped and the store's validation rejects nonsense values.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use rainfall_shared::{ForecastRecord, HistoricalRecord};
use regex::Regex;
use reqwest::Client;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

use crate::config::SourcesConfig;
use crate::error::{AppError, AppResult};

/// Supplier of forecast and historical rainfall batches
#[async_trait]
pub trait RainfallSource: Send + Sync {
    /// Forecasts published today
    async fn fetch_forecasts(&self, today: NaiveDate) -> AppResult<Vec<ForecastRecord>>;

    /// Observed daily rainfall for the current year
    async fn fetch_historical(&self) -> AppResult<Vec<HistoricalRecord>>;
}

/// BOM web page client
#[derive(Clone)]
pub struct BomClient {
    client: Client,
    forecast_url: String,
    historical_url: String,
}

impl BomClient {
    /// Create a client with the configured URLs, user agent and timeout
    pub fn new(config: &SourcesConfig) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::ExternalService(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            forecast_url: config.forecast_url.clone(),
            historical_url: config.historical_url.clone(),
        })
    }

    async fn get_page(&self, url: &str) -> AppResult<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalService(format!(
                "Failed to fetch page {}: {}",
                url,
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::ExternalService(format!("Failed to read page {}: {}", url, e)))
    }
}

#[async_trait]
impl RainfallSource for BomClient {
    async fn fetch_forecasts(&self, today: NaiveDate) -> AppResult<Vec<ForecastRecord>> {
        let html = self.get_page(&self.forecast_url).await?;
        let records = parse_forecast_page(&html, today)?;
        tracing::info!("Fetched {} forecast days", records.len());
        Ok(records)
    }

    async fn fetch_historical(&self) -> AppResult<Vec<HistoricalRecord>> {
        let html = self.get_page(&self.historical_url).await?;
        let records = parse_historical_page(&html)?;
        tracing::info!("Fetched {} daily observations", records.len());
        Ok(records)
    }
}

fn regex(pattern: &str) -> AppResult<Regex> {
    Regex::new(pattern).map_err(|e| AppError::Internal(format!("Invalid pattern {}: {}", pattern, e)))
}

/// Inner text of an HTML fragment with tags removed and whitespace collapsed
fn text_content(tags: &Regex, fragment: &str) -> String {
    let stripped = tags.replace_all(fragment, " ");
    stripped
        .replace("&nbsp;", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Map a forecast heading to the date it applies to
///
/// "Forecast for the rest of Friday" is today. "Saturday 22 March" is the
/// next 22 March on or after `today`.
pub fn resolve_forecast_heading(heading: &str, today: NaiveDate) -> Option<NaiveDate> {
    if heading.contains("Forecast") {
        return Some(today);
    }

    let (_weekday, day_month) = heading.trim().split_once(' ')?;
    let date = NaiveDate::parse_from_str(&format!("{} {}", day_month.trim(), today.year()), "%d %B %Y").ok()?;

    if date < today {
        date.with_year(today.year() + 1)
    } else {
        Some(date)
    }
}

/// Parse the seven-day forecast page into records issued `today`
pub fn parse_forecast_page(html: &str, today: NaiveDate) -> AppResult<Vec<ForecastRecord>> {
    let section_start = regex(r#"<div[^>]*class="day[\s"]"#)?;
    let heading = regex(r"(?s)<h2[^>]*>(.*?)</h2>")?;
    let rain_range = regex(r#"(?s)<em class="rain">\s*(\d+(?:\.\d+)?)\s*to\s*(\d+(?:\.\d+)?)\s*mm"#)?;
    let chance = regex(r#"(?s)<em class="pop">\s*(\d+)\s*%"#)?;
    let tags = regex(r"<[^>]+>")?;

    let starts: Vec<usize> = section_start.find_iter(html).map(|m| m.start()).collect();
    let mut records = Vec::new();

    for (i, start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(html.len());
        let section = &html[*start..end];

        let Some(title) = heading.captures(section).map(|c| text_content(&tags, &c[1])) else {
            tracing::debug!("Forecast section {} has no heading", i);
            continue;
        };
        let Some(applies_to_date) = resolve_forecast_heading(&title, today) else {
            tracing::warn!("Unrecognised forecast heading: {}", title);
            continue;
        };
        let Some(percent) = chance.captures(section).and_then(|c| Decimal::from_str(&c[1]).ok()) else {
            tracing::debug!("No rain chance for {}", applies_to_date);
            continue;
        };

        // rainfall amounts are only shown above some chance of rain
        let (low, high) = rain_range
            .captures(section)
            .and_then(|c| Some((Decimal::from_str(&c[1]).ok()?, Decimal::from_str(&c[2]).ok()?)))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));

        records.push(ForecastRecord::new(
            today,
            applies_to_date,
            percent / Decimal::from(100),
            low,
            high,
        ));
    }

    Ok(records)
}

/// Parse the daily observations table (days down, months across)
pub fn parse_historical_page(html: &str) -> AppResult<Vec<HistoricalRecord>> {
    let year_header = regex(r#"<th[^>]*scope="col"[^>]*>\s*(\d{4})\s*</th>"#)?;
    let row_pattern = regex(r"(?s)<tr[^>]*>(.*?)</tr>")?;
    let day_header = regex(r#"(?s)<th[^>]*scope="row"[^>]*>\s*(\d{1,2})(?:st|nd|rd|th)\s*</th>"#)?;
    let cell = regex(r"(?s)<td[^>]*>(.*?)</td>")?;
    let tags = regex(r"<[^>]+>")?;

    let year: i32 = year_header
        .captures(html)
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| AppError::ExternalService("Observation page has no year header".to_string()))?;

    let mut records = Vec::new();

    for row in row_pattern.captures_iter(html) {
        let body = &row[1];
        let Some(day) = day_header.captures(body).and_then(|c| c[1].parse::<u32>().ok()) else {
            continue;
        };

        for (month_index, value) in cell.captures_iter(body).take(12).enumerate() {
            let text = text_content(&tags, &value[1]);
            if text.is_empty() {
                continue;
            }
            let Ok(rainfall_mm) = Decimal::from_str(&text) else {
                tracing::debug!("Skipping non-numeric observation {:?}", text);
                continue;
            };
            let month = month_index as u32 + 1;
            match NaiveDate::from_ymd_opt(year, month, day) {
                Some(date) => records.push(HistoricalRecord::new(date, rainfall_mm)),
                None => tracing::debug!("Unable to process date {}-{}-{}", year, month, day),
            }
        }
    }

    records.sort_by_key(|r| r.date);
    Ok(records)
}
