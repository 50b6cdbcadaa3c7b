//! Forecast chart rendering
//!
//! Produces an SVG with three stacked bar panels: observed rainfall for the
//! last seven days, maximum forecast rainfall from the latest issuance, and
//! the forecast chance of any rain.

use std::fmt::{self, Write as _};
use std::path::PathBuf;

use chrono::{Duration, NaiveDate};
use rainfall_shared::{DateFilter, ForecastFilter, ForecastRecord, HistoricalFilter, HistoricalRecord};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::config::ChartConfig;
use crate::error::{AppError, AppResult};
use crate::services::store::RainfallStore;

const WIDTH: f64 = 800.0;
const PANEL_HEIGHT: f64 = 260.0;
const MARGIN_LEFT: f64 = 60.0;
const MARGIN_RIGHT: f64 = 20.0;
const TITLE_SPACE: f64 = 30.0;
const AXIS_SPACE: f64 = 40.0;

struct Panel<'a> {
    title: &'a str,
    y_label: &'a str,
    bars: Vec<(NaiveDate, f64)>,
    colour: &'a str,
    /// Upper end of the y axis
    y_max: f64,
    target: Option<f64>,
    percent: bool,
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Headroom above the larger of the tallest bar and the target line
fn mm_axis_max(bars: &[(NaiveDate, f64)], target: f64) -> f64 {
    bars.iter().map(|(_, v)| *v).fold(target, f64::max) * 1.1
}

fn draw_panel(svg: &mut String, top: f64, panel: &Panel<'_>) -> fmt::Result {
    let plot_top = top + TITLE_SPACE;
    let plot_height = PANEL_HEIGHT - TITLE_SPACE - AXIS_SPACE;
    let plot_width = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let baseline = plot_top + plot_height;
    let y_max = if panel.y_max > 0.0 { panel.y_max } else { 1.0 };
    let scale = |v: f64| baseline - (v.min(y_max) / y_max) * plot_height;

    writeln!(
        svg,
        r#"<text x="{:.1}" y="{:.1}" font-size="16" text-anchor="middle">{}</text>"#,
        WIDTH / 2.0,
        top + 20.0,
        panel.title
    )?;
    writeln!(
        svg,
        r#"<text x="15" y="{:.1}" font-size="12" transform="rotate(-90 15 {:.1})" text-anchor="middle">{}</text>"#,
        plot_top + plot_height / 2.0,
        plot_top + plot_height / 2.0,
        panel.y_label
    )?;
    writeln!(
        svg,
        r#"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="black"/>"#,
        MARGIN_LEFT,
        baseline,
        WIDTH - MARGIN_RIGHT,
        baseline
    )?;

    // y axis ticks at 0, half and max
    for fraction in [0.0, 0.5, 1.0] {
        let value = y_max * fraction;
        let label = if panel.percent {
            format!("{:.0}%", value * 100.0)
        } else {
            format!("{:.0}", value)
        };
        writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" font-size="11" text-anchor="end">{}</text>"#,
            MARGIN_LEFT - 6.0,
            scale(value) + 4.0,
            label
        )?;
    }

    if !panel.bars.is_empty() {
        let slot = plot_width / panel.bars.len() as f64;
        for (i, (date, value)) in panel.bars.iter().enumerate() {
            let x = MARGIN_LEFT + slot * i as f64 + slot * 0.15;
            let y = scale(*value);
            writeln!(
                svg,
                r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"/>"#,
                x,
                y,
                slot * 0.7,
                baseline - y,
                panel.colour
            )?;
            writeln!(
                svg,
                r#"<text x="{:.1}" y="{:.1}" font-size="11" text-anchor="middle">{}</text>"#,
                x + slot * 0.35,
                baseline + 16.0,
                date.format("%a %d %b")
            )?;
        }
    }

    if let Some(target) = panel.target {
        let y = scale(target);
        writeln!(
            svg,
            r#"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="red" stroke-width="2" stroke-dasharray="2,4"/>"#,
            MARGIN_LEFT,
            y,
            WIDTH - MARGIN_RIGHT,
            y
        )?;
    }

    Ok(())
}

/// Render the three-panel chart as an SVG document
pub fn render_forecast_chart(
    historical: &[HistoricalRecord],
    forecasts: &[ForecastRecord],
    target_mm: Decimal,
) -> AppResult<String> {
    let target = to_f64(target_mm);
    let hist_bars: Vec<_> = historical.iter().map(|r| (r.date, to_f64(r.rainfall_mm))).collect();
    let mm_bars: Vec<_> = forecasts
        .iter()
        .map(|r| (r.applies_to_date, to_f64(r.rain_mm_high)))
        .collect();
    let chance_bars: Vec<_> = forecasts
        .iter()
        .map(|r| (r.applies_to_date, to_f64(r.rain_chance)))
        .collect();

    let panels = [
        Panel {
            title: "Historical Rainfall (Last 7 Days)",
            y_label: "Rain amount (mm)",
            y_max: mm_axis_max(&hist_bars, target),
            bars: hist_bars,
            colour: "royalblue",
            target: Some(target),
            percent: false,
        },
        Panel {
            title: "Forecast Maximum Rainfall (Next 7 Days)",
            y_label: "Rain amount (mm)",
            y_max: mm_axis_max(&mm_bars, target),
            bars: mm_bars,
            colour: "cornflowerblue",
            target: Some(target),
            percent: false,
        },
        Panel {
            title: "Forecast Likelihood of Any Rain (Next 7 Days)",
            y_label: "Rain chance (%)",
            y_max: 1.0,
            bars: chance_bars,
            colour: "lightsteelblue",
            target: None,
            percent: true,
        },
    ];

    let mut svg = String::new();
    write_chart(&mut svg, &panels)
        .map_err(|e| AppError::Internal(format!("Chart rendering failed: {}", e)))?;
    Ok(svg)
}

fn write_chart(svg: &mut String, panels: &[Panel<'_>]) -> fmt::Result {
    let height = PANEL_HEIGHT * panels.len() as f64;
    writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{:.0}" height="{:.0}" viewBox="0 0 {:.0} {:.0}" font-family="sans-serif">"#,
        WIDTH, height, WIDTH, height
    )?;
    writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#)?;
    for (i, panel) in panels.iter().enumerate() {
        draw_panel(svg, PANEL_HEIGHT * i as f64, panel)?;
    }
    svg.push_str("</svg>\n");
    Ok(())
}

/// Read the last week of observations and the latest forecast batch from
/// the store, render them and write the chart to disk
pub async fn write_forecast_chart(
    store: &RainfallStore,
    config: &ChartConfig,
    target_mm: Decimal,
) -> AppResult<PathBuf> {
    let historical = match store.latest_historical_date().await? {
        Some(latest) => {
            store
                .query_historical(&HistoricalFilter::dated(DateFilter::between(
                    latest - Duration::days(6),
                    latest,
                )))
                .await?
        }
        None => Vec::new(),
    };

    let forecasts = match store.latest_forecast_issue_date().await? {
        Some(latest) => {
            store
                .query_forecasts(&ForecastFilter::all().issued(DateFilter::On(latest)))
                .await?
        }
        None => Vec::new(),
    };

    let svg = render_forecast_chart(&historical, &forecasts, target_mm)?;

    tokio::fs::create_dir_all(&config.output_dir).await?;
    let path = config.output_dir.join(&config.file_name);
    tokio::fs::write(&path, svg).await?;

    tracing::info!("Forecast chart saved as {}", path.display());
    Ok(path)
}
