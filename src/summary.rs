// Post-refresh summary report
//
// After a successful refresh the boundary layer schedules a summary of the
// catalog - totals, last refresh time, and the top entries by estimated GDP.
// This module only assembles and persists the data; rendering is someone
// else's job.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::{catalog_stats, top_countries_by_gdp};
use crate::error::CatalogError;

/// How many top-GDP entries the summary carries.
pub const TOP_GDP_COUNT: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GdpRanking {
    pub name: String,
    pub estimated_gdp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    pub generated_at: DateTime<Utc>,
    pub total_countries: i64,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub top_by_gdp: Vec<GdpRanking>,
}

/// Assemble the report from the current catalog state.
pub fn build_report(conn: &Connection) -> Result<SummaryReport, CatalogError> {
    let stats = catalog_stats(conn)?;
    let top_by_gdp = top_countries_by_gdp(conn, TOP_GDP_COUNT)?
        .into_iter()
        .filter_map(|entry| {
            entry.estimated_gdp.map(|gdp| GdpRanking {
                name: entry.name,
                estimated_gdp: gdp,
            })
        })
        .collect();

    Ok(SummaryReport {
        generated_at: Utc::now(),
        total_countries: stats.total_countries,
        last_refreshed_at: stats.last_refreshed_at,
        top_by_gdp,
    })
}

/// Persist the report as pretty-printed JSON.
pub fn write_report(report: &SummaryReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write summary report to {}", path.display()))?;

    Ok(())
}

/// Load the most recently written report, if one exists yet.
pub fn read_report(path: &Path) -> Result<Option<SummaryReport>> {
    if !path.exists() {
        return Ok(None);
    }

    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read summary report from {}", path.display()))?;
    let report = serde_json::from_str(&json).context("Failed to parse summary report")?;

    Ok(Some(report))
}
