// Source configuration for the refresh pipeline
// URLs, timeout and the GDP multiplier range travel together so fetchers
// and the engine never reach for process-wide state.

use std::env;
use std::time::Duration;

/// Default country feed (restcountries v2, trimmed to the fields we consume).
pub const DEFAULT_COUNTRIES_URL: &str =
    "https://restcountries.com/v2/all?fields=name,capital,region,population,flag,currencies";

/// Default exchange-rate feed, all rates relative to USD.
pub const DEFAULT_RATES_URL: &str = "https://open.er-api.com/v6/latest/USD";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration handed to the fetchers and the reconciliation engine.
///
/// The multiplier range is an arbitrary scaling constant for the estimated
/// GDP, not a domain law; it is kept configurable for that reason.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub countries_url: String,
    pub rates_url: String,
    /// Ceiling for every remote call; on timeout the whole refresh aborts.
    pub timeout: Duration,
    pub gdp_multiplier_min: f64,
    pub gdp_multiplier_max: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            countries_url: DEFAULT_COUNTRIES_URL.to_string(),
            rates_url: DEFAULT_RATES_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            gdp_multiplier_min: 1000.0,
            gdp_multiplier_max: 2000.0,
        }
    }
}

impl SourceConfig {
    /// Build a config from the environment, falling back to the defaults.
    ///
    /// Recognized variables: `COUNTRIES_API_URL`, `EXCHANGE_API_URL`,
    /// `FETCH_TIMEOUT_SECS`, `GDP_MULTIPLIER_MIN`, `GDP_MULTIPLIER_MAX`.
    pub fn from_env() -> Self {
        let defaults = SourceConfig::default();

        SourceConfig {
            countries_url: env::var("COUNTRIES_API_URL")
                .unwrap_or(defaults.countries_url),
            rates_url: env::var("EXCHANGE_API_URL").unwrap_or(defaults.rates_url),
            timeout: env::var("FETCH_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            gdp_multiplier_min: env::var("GDP_MULTIPLIER_MIN")
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(defaults.gdp_multiplier_min),
            gdp_multiplier_max: env::var("GDP_MULTIPLIER_MAX")
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(defaults.gdp_multiplier_max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SourceConfig::default();

        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.gdp_multiplier_min, 1000.0);
        assert_eq!(config.gdp_multiplier_max, 2000.0);
        assert!(config.countries_url.contains("restcountries.com"));
        assert!(config.rates_url.contains("open.er-api.com"));
    }
}
