use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// Hard ceiling for one page of list results.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Default page size when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Persisted catalog row. Identity is the case-insensitive name; the store
/// assigns the surrogate id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: i64,
    pub name: String,
    pub capital: Option<String>,
    pub region: Option<String>,
    pub population: i64,
    pub currency_code: Option<String>,
    /// Rate resolved during the most recent refresh that touched this entry.
    /// Stale rates are overwritten, never merged.
    pub exchange_rate: Option<f64>,
    /// Derived, never user-supplied. Non-null only when population > 0 and a
    /// positive exchange rate resolved for this entry's currency.
    pub estimated_gdp: Option<f64>,
    pub flag_url: Option<String>,
    pub last_refreshed_at: DateTime<Utc>,
}

/// One pending write in a refresh batch. The engine builds these; the store
/// decides insert-vs-update by case-folded name.
#[derive(Debug, Clone)]
pub struct CatalogUpsert {
    pub name: String,
    pub capital: Option<String>,
    pub region: Option<String>,
    pub population: i64,
    pub currency_code: Option<String>,
    pub exchange_rate: Option<f64>,
    pub estimated_gdp: Option<f64>,
    pub flag_url: Option<String>,
    pub refreshed_at: DateTime<Utc>,
}

/// Counters from one applied upsert batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub added: usize,
    pub updated: usize,
}

/// Aggregate catalog stats, consumed by the status endpoint and the
/// summary-report collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogStats {
    pub total_countries: i64,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Countries Table
    // NOCASE collation on name enforces one entry per case-folded name.
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS countries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            capital TEXT,
            region TEXT,
            population INTEGER NOT NULL DEFAULT 0 CHECK (population >= 0),
            currency_code TEXT,
            exchange_rate REAL,
            estimated_gdp REAL,
            flag_url TEXT,
            last_refreshed_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_countries_region ON countries(region)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_countries_currency ON countries(currency_code)",
        [],
    )?;

    Ok(())
}

const ENTRY_COLUMNS: &str = "id, name, capital, region, population, currency_code, \
     exchange_rate, estimated_gdp, flag_url, last_refreshed_at";

fn map_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CatalogEntry> {
    let refreshed_str: String = row.get(9)?;
    let last_refreshed_at = DateTime::parse_from_rfc3339(&refreshed_str)
        .map_err(|_| rusqlite::Error::InvalidQuery)?
        .with_timezone(&Utc);

    Ok(CatalogEntry {
        id: row.get(0)?,
        name: row.get(1)?,
        capital: row.get(2)?,
        region: row.get(3)?,
        population: row.get(4)?,
        currency_code: row.get(5)?,
        exchange_rate: row.get(6)?,
        estimated_gdp: row.get(7)?,
        flag_url: row.get(8)?,
        last_refreshed_at,
    })
}

// ============================================================================
// UPSERT BATCH
// ============================================================================

/// Apply a whole refresh batch inside one transaction.
///
/// For each pending row: case-insensitive lookup by name, then update the
/// mutable fields in place (the stored name casing is kept) or insert a new
/// entry. Either every row commits or none do - any write failure rolls the
/// transaction back and surfaces as `Persistence`.
pub fn apply_batch(
    conn: &mut Connection,
    batch: &[CatalogUpsert],
) -> Result<RefreshOutcome, CatalogError> {
    let tx = conn.transaction()?;
    let mut outcome = RefreshOutcome::default();

    for row in batch {
        // name is COLLATE NOCASE, so equality here is case-folded
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM countries WHERE name = ?1",
                params![row.name],
                |r| r.get(0),
            )
            .optional()?;

        let refreshed_str = row.refreshed_at.to_rfc3339();

        match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE countries
                     SET capital = ?1, region = ?2, population = ?3,
                         currency_code = ?4, exchange_rate = ?5,
                         estimated_gdp = ?6, flag_url = ?7,
                         last_refreshed_at = ?8
                     WHERE id = ?9",
                    params![
                        row.capital,
                        row.region,
                        row.population,
                        row.currency_code,
                        row.exchange_rate,
                        row.estimated_gdp,
                        row.flag_url,
                        refreshed_str,
                        id,
                    ],
                )?;
                outcome.updated += 1;
            }
            None => {
                tx.execute(
                    "INSERT INTO countries (
                        name, capital, region, population, currency_code,
                        exchange_rate, estimated_gdp, flag_url, last_refreshed_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        row.name,
                        row.capital,
                        row.region,
                        row.population,
                        row.currency_code,
                        row.exchange_rate,
                        row.estimated_gdp,
                        row.flag_url,
                        refreshed_str,
                    ],
                )?;
                outcome.added += 1;
            }
        }
    }

    tx.commit()?;

    Ok(outcome)
}

// ============================================================================
// READS
// ============================================================================

/// Sort order for catalog listings. Unknown sort strings fall back to the
/// store's natural order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    NameAsc,
    NameDesc,
    PopulationAsc,
    PopulationDesc,
    GdpAsc,
    GdpDesc,
}

impl SortKey {
    pub fn parse(raw: &str) -> Option<SortKey> {
        match raw.to_lowercase().as_str() {
            "name_asc" => Some(SortKey::NameAsc),
            "name_desc" => Some(SortKey::NameDesc),
            "population_asc" => Some(SortKey::PopulationAsc),
            "population_desc" => Some(SortKey::PopulationDesc),
            "gdp_asc" => Some(SortKey::GdpAsc),
            "gdp_desc" => Some(SortKey::GdpDesc),
            _ => None,
        }
    }

    fn order_clause(&self) -> &'static str {
        match self {
            SortKey::NameAsc => " ORDER BY name ASC",
            SortKey::NameDesc => " ORDER BY name DESC",
            SortKey::PopulationAsc => " ORDER BY population ASC",
            SortKey::PopulationDesc => " ORDER BY population DESC",
            SortKey::GdpAsc => " ORDER BY estimated_gdp ASC",
            SortKey::GdpDesc => " ORDER BY estimated_gdp DESC",
        }
    }
}

/// Filter/sort/paging parameters for [`list_countries`].
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Exact case-insensitive region match.
    pub region: Option<String>,
    /// Exact case-insensitive currency-code match.
    pub currency: Option<String>,
    pub sort: Option<SortKey>,
    pub offset: u32,
    /// Clamped to [1, MAX_PAGE_SIZE]; 0 means "use the default page size".
    pub limit: u32,
}

pub fn list_countries(
    conn: &Connection,
    query: &ListQuery,
) -> Result<Vec<CatalogEntry>, CatalogError> {
    let limit = match query.limit {
        0 => DEFAULT_PAGE_SIZE,
        n => n.min(MAX_PAGE_SIZE),
    };

    let order = query.sort.map(|s| s.order_clause()).unwrap_or("");
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM countries
         WHERE (?1 IS NULL OR region = ?1 COLLATE NOCASE)
           AND (?2 IS NULL OR currency_code = ?2 COLLATE NOCASE)\
         {order} LIMIT ?3 OFFSET ?4"
    );

    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(
            params![query.region, query.currency, limit, query.offset],
            map_entry,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

/// Case-insensitive exact lookup by name.
pub fn get_country_by_name(conn: &Connection, name: &str) -> Result<CatalogEntry, CatalogError> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM countries WHERE name = ?1");

    conn.query_row(&sql, params![name], map_entry)
        .optional()?
        .ok_or_else(|| CatalogError::NotFound(name.to_string()))
}

/// Case-insensitive delete by name. Returns whether an entry was removed.
/// This is the only way entries leave the catalog - refresh never deletes.
pub fn delete_country_by_name(conn: &Connection, name: &str) -> Result<bool, CatalogError> {
    let removed = conn.execute("DELETE FROM countries WHERE name = ?1", params![name])?;

    Ok(removed > 0)
}

pub fn catalog_stats(conn: &Connection) -> Result<CatalogStats, CatalogError> {
    let (total_countries, last_refreshed): (i64, Option<String>) = conn.query_row(
        "SELECT COUNT(*), MAX(last_refreshed_at) FROM countries",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let last_refreshed_at = last_refreshed
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(CatalogStats {
        total_countries,
        last_refreshed_at,
    })
}

/// Entries with a derived GDP, richest first. Feeds the summary report.
pub fn top_countries_by_gdp(
    conn: &Connection,
    limit: u32,
) -> Result<Vec<CatalogEntry>, CatalogError> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM countries
         WHERE estimated_gdp IS NOT NULL
         ORDER BY estimated_gdp DESC LIMIT ?1"
    );

    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(params![limit], map_entry)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}
