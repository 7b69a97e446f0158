// Remote source clients - country feed and exchange-rate feed
//
// Both clients share the same failure shape: transport errors, timeouts and
// non-2xx responses surface as `ExternalSource` tagged with the feed that
// failed, and the whole refresh aborts. Inside a successful country fetch,
// individual malformed records are dropped and logged instead - partial
// success beats total failure at that stage.

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;

use crate::config::SourceConfig;
use crate::error::{CatalogError, SourceKind};
use crate::normalize::{normalize_country, NormalizedCountry};

/// Something that can produce the normalized country list.
#[async_trait::async_trait]
pub trait CountrySource: Send + Sync {
    async fn fetch_countries(&self) -> Result<Vec<NormalizedCountry>, CatalogError>;
}

/// Something that can produce the currency-code → rate table (USD base).
#[async_trait::async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_rates(&self) -> Result<HashMap<String, f64>, CatalogError>;
}

fn build_client(config: &SourceConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.timeout)
        .build()
        .context("Failed to create HTTP client")
}

// ============================================================================
// COUNTRY FETCHER
// ============================================================================

/// HTTP client for the country reference feed.
pub struct CountriesClient {
    http: Client,
    url: String,
}

impl CountriesClient {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        Ok(CountriesClient {
            http: build_client(config)?,
            url: config.countries_url.clone(),
        })
    }
}

#[async_trait::async_trait]
impl CountrySource for CountriesClient {
    async fn fetch_countries(&self) -> Result<Vec<NormalizedCountry>, CatalogError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CatalogError::external(SourceKind::Countries, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::external(
                SourceKind::Countries,
                format!("unexpected status {}", status),
            ));
        }

        let payload: Vec<Value> = response
            .json()
            .await
            .map_err(|e| CatalogError::external(SourceKind::Countries, e))?;

        let mut countries = Vec::with_capacity(payload.len());
        let mut dropped = 0usize;

        for raw in &payload {
            match normalize_country(raw) {
                Ok(country) => countries.push(country),
                Err(reason) => {
                    dropped += 1;
                    tracing::warn!(reason = %reason, "dropping malformed country record");
                }
            }
        }

        tracing::info!(
            kept = countries.len(),
            dropped,
            "fetched country feed"
        );

        Ok(countries)
    }
}

// ============================================================================
// RATE FETCHER
// ============================================================================

/// HTTP client for the exchange-rate feed.
pub struct ExchangeRateClient {
    http: Client,
    url: String,
}

impl ExchangeRateClient {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        Ok(ExchangeRateClient {
            http: build_client(config)?,
            url: config.rates_url.clone(),
        })
    }
}

#[async_trait::async_trait]
impl RateSource for ExchangeRateClient {
    async fn fetch_rates(&self) -> Result<HashMap<String, f64>, CatalogError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CatalogError::external(SourceKind::Rates, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::external(
                SourceKind::Rates,
                format!("unexpected status {}", status),
            ));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| CatalogError::external(SourceKind::Rates, e))?;

        let rates = rates_from_payload(&payload);
        tracing::info!(currencies = rates.len(), "fetched exchange-rate feed");

        Ok(rates)
    }
}

/// Pull the `rates` object out of the feed payload. A payload without one
/// yields an empty table: missing rates degrade GDP estimation instead of
/// aborting the refresh. Non-numeric rate values are skipped.
pub(crate) fn rates_from_payload(payload: &Value) -> HashMap<String, f64> {
    payload
        .get("rates")
        .and_then(Value::as_object)
        .map(|rates| {
            rates
                .iter()
                .filter_map(|(code, value)| value.as_f64().map(|rate| (code.clone(), rate)))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rates_from_payload() {
        let payload = json!({
            "result": "success",
            "base_code": "USD",
            "rates": {"USD": 1.0, "NGN": 1600.5, "EUR": 0.92}
        });

        let rates = rates_from_payload(&payload);

        assert_eq!(rates.len(), 3);
        assert_eq!(rates.get("NGN"), Some(&1600.5));
        assert_eq!(rates.get("EUR"), Some(&0.92));
    }

    #[test]
    fn test_rates_missing_field_degrades_to_empty() {
        let payload = json!({"result": "success"});
        assert!(rates_from_payload(&payload).is_empty());

        // Wrong shape is treated the same as absent
        let payload = json!({"rates": [1.0, 2.0]});
        assert!(rates_from_payload(&payload).is_empty());
    }

    #[test]
    fn test_rates_skip_non_numeric_values() {
        let payload = json!({"rates": {"USD": 1.0, "XXX": "broken"}});

        let rates = rates_from_payload(&payload);

        assert_eq!(rates.len(), 1);
        assert_eq!(rates.get("USD"), Some(&1.0));
        assert!(!rates.contains_key("XXX"));
    }
}
