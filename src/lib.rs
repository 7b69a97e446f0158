// Country Catalog - Core Library
// Refresh-and-reconcile pipeline over two external feeds plus a persisted
// country catalog. Exposed for use in the CLI, the API server, and tests.

pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod normalize;
pub mod reconcile;
pub mod summary;

// Re-export commonly used types
pub use config::SourceConfig;
pub use db::{
    apply_batch, catalog_stats, delete_country_by_name, get_country_by_name, list_countries,
    setup_database, top_countries_by_gdp, CatalogEntry, CatalogStats, CatalogUpsert, ListQuery,
    RefreshOutcome, SortKey, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use error::{CatalogError, SourceKind};
pub use fetch::{CountriesClient, CountrySource, ExchangeRateClient, RateSource};
pub use normalize::{normalize_country, MalformedRecord, NormalizedCountry};
pub use reconcile::{
    MultiplierSource, RefreshEngine, SequenceMultiplier, SourceSnapshot, UniformMultiplier,
};
pub use summary::{build_report, read_report, write_report, SummaryReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
