// Reconciliation Engine - join country feed with rate table, upsert catalog
//
// The engine owns the whole refresh: both remote fetches run concurrently,
// and if either fails the refresh aborts before the store is touched. The
// join itself is simple - resolve a rate per country, derive a GDP estimate,
// and hand the batch to the store as one transaction.

use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use rusqlite::Connection;

use crate::config::SourceConfig;
use crate::db::{self, CatalogUpsert, RefreshOutcome};
use crate::error::CatalogError;
use crate::fetch::{CountriesClient, CountrySource, ExchangeRateClient, RateSource};
use crate::normalize::NormalizedCountry;

// ============================================================================
// MULTIPLIER SOURCE - injected randomness
// ============================================================================

/// Source of the GDP scaling multiplier. The estimate is intentionally
/// re-drawn on every refresh; tests substitute a fixed sequence.
pub trait MultiplierSource: Send + Sync {
    fn draw(&mut self) -> f64;
}

/// Production source: uniform draw over [min, max).
pub struct UniformMultiplier {
    min: f64,
    max: f64,
}

impl UniformMultiplier {
    pub fn new(min: f64, max: f64) -> Self {
        UniformMultiplier { min, max }
    }
}

impl MultiplierSource for UniformMultiplier {
    fn draw(&mut self) -> f64 {
        rand::thread_rng().gen_range(self.min..self.max)
    }
}

/// Fixed-sequence source for reproducible runs. Cycles when exhausted.
pub struct SequenceMultiplier {
    values: Vec<f64>,
    next: usize,
}

impl SequenceMultiplier {
    pub fn new(values: Vec<f64>) -> Self {
        assert!(!values.is_empty(), "sequence must not be empty");
        SequenceMultiplier { values, next: 0 }
    }
}

impl MultiplierSource for SequenceMultiplier {
    fn draw(&mut self) -> f64 {
        let value = self.values[self.next % self.values.len()];
        self.next += 1;
        value
    }
}

// ============================================================================
// REFRESH ENGINE
// ============================================================================

/// Both feeds, fetched and ready to join. Produced by [`RefreshEngine::fetch`]
/// before any store interaction begins.
pub struct SourceSnapshot {
    pub countries: Vec<NormalizedCountry>,
    pub rates: HashMap<String, f64>,
}

pub struct RefreshEngine {
    countries: Box<dyn CountrySource>,
    rates: Box<dyn RateSource>,
    multiplier: Box<dyn MultiplierSource>,
}

impl RefreshEngine {
    pub fn new(
        countries: Box<dyn CountrySource>,
        rates: Box<dyn RateSource>,
        multiplier: Box<dyn MultiplierSource>,
    ) -> Self {
        RefreshEngine {
            countries,
            rates,
            multiplier,
        }
    }

    /// Wire up the HTTP clients and the uniform multiplier from config.
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        Ok(RefreshEngine::new(
            Box::new(CountriesClient::new(config)?),
            Box::new(ExchangeRateClient::new(config)?),
            Box::new(UniformMultiplier::new(
                config.gdp_multiplier_min,
                config.gdp_multiplier_max,
            )),
        ))
    }

    /// Fetch both feeds concurrently. Either failure aborts the refresh
    /// here, tagged with its source, with the store untouched.
    pub async fn fetch(&self) -> Result<SourceSnapshot, CatalogError> {
        let (countries, rates) =
            tokio::join!(self.countries.fetch_countries(), self.rates.fetch_rates());

        Ok(SourceSnapshot {
            countries: countries?,
            rates: rates?,
        })
    }

    /// Join the snapshot and apply the result as one transactional batch.
    pub fn apply(
        &mut self,
        conn: &mut Connection,
        snapshot: SourceSnapshot,
    ) -> Result<RefreshOutcome, CatalogError> {
        let batch = self.reconcile(snapshot);
        let outcome = db::apply_batch(conn, &batch)?;

        tracing::info!(
            added = outcome.added,
            updated = outcome.updated,
            "refresh applied"
        );

        Ok(outcome)
    }

    /// Full refresh: fetch, reconcile, upsert.
    pub async fn refresh(&mut self, conn: &mut Connection) -> Result<RefreshOutcome, CatalogError> {
        let snapshot = self.fetch().await?;
        self.apply(conn, snapshot)
    }

    fn reconcile(&mut self, snapshot: SourceSnapshot) -> Vec<CatalogUpsert> {
        let SourceSnapshot { countries, rates } = snapshot;

        countries
            .into_iter()
            .map(|country| self.reconcile_one(country, &rates))
            .collect()
    }

    /// Resolve the rate and derive the GDP estimate for one country.
    ///
    /// The rate resolves only when the currency is known, present in the
    /// table, and positive. The multiplier is drawn only when a rate
    /// resolved; a non-positive estimate (population 0) stays absent.
    fn reconcile_one(
        &mut self,
        country: NormalizedCountry,
        rates: &HashMap<String, f64>,
    ) -> CatalogUpsert {
        let exchange_rate = country
            .currency_code
            .as_deref()
            .and_then(|code| rates.get(code))
            .copied()
            .filter(|rate| *rate > 0.0);

        let estimated_gdp = exchange_rate.and_then(|rate| {
            let multiplier = self.multiplier.draw();
            let estimate = (country.population as f64 * multiplier) / rate;
            (estimate > 0.0).then_some(estimate)
        });

        CatalogUpsert {
            name: country.name,
            capital: country.capital,
            region: country.region,
            population: country.population as i64,
            currency_code: country.currency_code,
            exchange_rate,
            estimated_gdp,
            flag_url: country.flag_url,
            refreshed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{catalog_stats, get_country_by_name, setup_database};
    use crate::error::SourceKind;

    struct StaticCountries(Vec<NormalizedCountry>);

    #[async_trait::async_trait]
    impl CountrySource for StaticCountries {
        async fn fetch_countries(&self) -> Result<Vec<NormalizedCountry>, CatalogError> {
            Ok(self.0.clone())
        }
    }

    struct StaticRates(HashMap<String, f64>);

    #[async_trait::async_trait]
    impl RateSource for StaticRates {
        async fn fetch_rates(&self) -> Result<HashMap<String, f64>, CatalogError> {
            Ok(self.0.clone())
        }
    }

    struct UnavailableSource(SourceKind);

    #[async_trait::async_trait]
    impl CountrySource for UnavailableSource {
        async fn fetch_countries(&self) -> Result<Vec<NormalizedCountry>, CatalogError> {
            Err(CatalogError::external(self.0, "connection refused"))
        }
    }

    #[async_trait::async_trait]
    impl RateSource for UnavailableSource {
        async fn fetch_rates(&self) -> Result<HashMap<String, f64>, CatalogError> {
            Err(CatalogError::external(self.0, "connection refused"))
        }
    }

    fn country(name: &str, population: u64, currency: Option<&str>) -> NormalizedCountry {
        NormalizedCountry {
            name: name.to_string(),
            capital: Some("Capital".to_string()),
            region: Some("Africa".to_string()),
            population,
            currency_code: currency.map(str::to_string),
            flag_url: None,
        }
    }

    fn rates(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs
            .iter()
            .map(|(code, rate)| (code.to_string(), *rate))
            .collect()
    }

    fn engine_with(
        countries: Vec<NormalizedCountry>,
        table: HashMap<String, f64>,
        multiplier: Box<dyn MultiplierSource>,
    ) -> RefreshEngine {
        RefreshEngine::new(
            Box::new(StaticCountries(countries)),
            Box::new(StaticRates(table)),
            multiplier,
        )
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_gdp_with_fixed_multiplier() {
        let mut engine = engine_with(
            vec![],
            rates(&[]),
            Box::new(SequenceMultiplier::new(vec![1500.0])),
        );

        let row = engine.reconcile_one(
            country("Testland", 1_000_000, Some("NGN")),
            &rates(&[("NGN", 2.0)]),
        );

        assert_eq!(row.exchange_rate, Some(2.0));
        // 1,000,000 * 1500 / 2.0
        assert_eq!(row.estimated_gdp, Some(750_000_000.0));
    }

    #[test]
    fn test_gdp_uniform_bounds() {
        let mut engine = engine_with(
            vec![],
            rates(&[]),
            Box::new(UniformMultiplier::new(1000.0, 2000.0)),
        );

        let row = engine.reconcile_one(
            country("Testland", 1_000_000, Some("NGN")),
            &rates(&[("NGN", 2.0)]),
        );

        let gdp = row.estimated_gdp.unwrap();
        assert!((500_000_000.0..1_000_000_000.0).contains(&gdp));
    }

    #[test]
    fn test_gdp_null_without_resolvable_rate() {
        let mut engine = engine_with(
            vec![],
            rates(&[]),
            Box::new(SequenceMultiplier::new(vec![1500.0])),
        );
        let table = rates(&[("NGN", 1600.0), ("BAD", 0.0), ("NEG", -2.0)]);

        // No currency at all
        let row = engine.reconcile_one(country("A", 100, None), &table);
        assert_eq!(row.exchange_rate, None);
        assert_eq!(row.estimated_gdp, None);

        // Currency missing from the table
        let row = engine.reconcile_one(country("B", 100, Some("XXX")), &table);
        assert_eq!(row.exchange_rate, None);
        assert_eq!(row.estimated_gdp, None);

        // Non-positive rates never resolve
        let row = engine.reconcile_one(country("C", 100, Some("BAD")), &table);
        assert_eq!(row.exchange_rate, None);
        let row = engine.reconcile_one(country("D", 100, Some("NEG")), &table);
        assert_eq!(row.exchange_rate, None);
    }

    #[test]
    fn test_gdp_null_for_zero_population() {
        let mut engine = engine_with(
            vec![],
            rates(&[]),
            Box::new(SequenceMultiplier::new(vec![1500.0])),
        );

        let row = engine.reconcile_one(
            country("Empty", 0, Some("NGN")),
            &rates(&[("NGN", 2.0)]),
        );

        assert_eq!(row.exchange_rate, Some(2.0));
        assert_eq!(row.estimated_gdp, None);
    }

    #[test]
    fn test_multiplier_drawn_only_when_rate_resolves() {
        let mut engine = engine_with(
            vec![],
            rates(&[]),
            Box::new(SequenceMultiplier::new(vec![1500.0, 1000.0])),
        );
        let table = rates(&[("NGN", 1.0)]);

        // First country has no rate, so the first draw must go to the second
        let row = engine.reconcile_one(country("A", 100, None), &table);
        assert_eq!(row.estimated_gdp, None);

        let row = engine.reconcile_one(country("B", 100, Some("NGN")), &table);
        assert_eq!(row.estimated_gdp, Some(100.0 * 1500.0));
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent_on_identity() {
        let feed = vec![
            country("Nigeria", 200, Some("NGN")),
            country("Ghana", 100, Some("GHS")),
        ];
        let table = rates(&[("NGN", 1600.0), ("GHS", 15.0)]);
        let mut engine = engine_with(
            feed,
            table,
            Box::new(SequenceMultiplier::new(vec![1500.0])),
        );
        let mut conn = test_conn();

        let first = engine.refresh(&mut conn).await.unwrap();
        assert_eq!(first, RefreshOutcome { added: 2, updated: 0 });

        let second = engine.refresh(&mut conn).await.unwrap();
        assert_eq!(second, RefreshOutcome { added: 0, updated: 2 });

        assert_eq!(catalog_stats(&conn).unwrap().total_countries, 2);

        println!("✅ Idempotence test PASSED: second refresh added 0 entries");
    }

    #[tokio::test]
    async fn test_same_feed_casing_variants_join_to_one_entry() {
        let feed = vec![
            country("Nigeria", 200, None),
            country("NIGERIA", 300, None),
        ];
        let mut engine = engine_with(
            feed,
            rates(&[]),
            Box::new(SequenceMultiplier::new(vec![1500.0])),
        );
        let mut conn = test_conn();

        let outcome = engine.refresh(&mut conn).await.unwrap();

        assert_eq!(outcome, RefreshOutcome { added: 1, updated: 1 });
        assert_eq!(catalog_stats(&conn).unwrap().total_countries, 1);
        // Last sighting in the batch wins the mutable fields
        assert_eq!(get_country_by_name(&conn, "nigeria").unwrap().population, 300);
    }

    #[tokio::test]
    async fn test_rate_failure_aborts_without_writes() {
        let feed = vec![country("Nigeria", 200, Some("NGN"))];
        let mut engine = RefreshEngine::new(
            Box::new(StaticCountries(feed)),
            Box::new(UnavailableSource(SourceKind::Rates)),
            Box::new(SequenceMultiplier::new(vec![1500.0])),
        );
        let mut conn = test_conn();

        let err = engine.refresh(&mut conn).await.unwrap_err();

        match err {
            CatalogError::ExternalSource { source, .. } => {
                assert_eq!(source, SourceKind::Rates)
            }
            other => panic!("expected ExternalSource, got {other:?}"),
        }
        assert_eq!(catalog_stats(&conn).unwrap().total_countries, 0);
    }

    #[tokio::test]
    async fn test_country_failure_aborts_without_writes() {
        let mut engine = RefreshEngine::new(
            Box::new(UnavailableSource(SourceKind::Countries)),
            Box::new(StaticRates(rates(&[("NGN", 1600.0)]))),
            Box::new(SequenceMultiplier::new(vec![1500.0])),
        );
        let mut conn = test_conn();

        let err = engine.refresh(&mut conn).await.unwrap_err();

        assert!(matches!(
            err,
            CatalogError::ExternalSource {
                source: SourceKind::Countries,
                ..
            }
        ));
        assert_eq!(catalog_stats(&conn).unwrap().total_countries, 0);
    }

    #[tokio::test]
    async fn test_refresh_never_tombstones_absent_entries() {
        let mut conn = test_conn();

        // Atlantis is already in the catalog but absent from today's feed
        let mut seed_engine = engine_with(
            vec![country("Atlantis", 1, None)],
            rates(&[]),
            Box::new(SequenceMultiplier::new(vec![1500.0])),
        );
        seed_engine.refresh(&mut conn).await.unwrap();
        let before = get_country_by_name(&conn, "Atlantis").unwrap();

        let mut engine = engine_with(
            vec![country("Nigeria", 200, None)],
            rates(&[]),
            Box::new(SequenceMultiplier::new(vec![1500.0])),
        );
        let outcome = engine.refresh(&mut conn).await.unwrap();

        assert_eq!(outcome, RefreshOutcome { added: 1, updated: 0 });
        let after = get_country_by_name(&conn, "Atlantis").unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_missing_rates_degrade_gracefully() {
        // Empty rate table: everything lands with null rate and GDP,
        // the refresh itself succeeds
        let feed = vec![country("Nigeria", 200, Some("NGN"))];
        let mut engine = engine_with(
            feed,
            rates(&[]),
            Box::new(SequenceMultiplier::new(vec![1500.0])),
        );
        let mut conn = test_conn();

        let outcome = engine.refresh(&mut conn).await.unwrap();
        assert_eq!(outcome.added, 1);

        let entry = get_country_by_name(&conn, "Nigeria").unwrap();
        assert_eq!(entry.exchange_rate, None);
        assert_eq!(entry.estimated_gdp, None);
    }
}
