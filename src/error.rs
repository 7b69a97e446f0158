// Failure taxonomy for the refresh pipeline
//
// Source-level and persistence-level failures propagate with the failing
// stage tagged so the boundary layer can map them to distinct statuses
// (upstream-unavailable vs internal-error). Record-level malformation never
// reaches this level: it is absorbed inside the country fetcher.

use std::fmt;
use thiserror::Error;

/// Which remote feed a fetch failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Countries,
    Rates,
}

impl SourceKind {
    /// Human-readable service name for boundary-layer error bodies.
    pub fn service_name(&self) -> &'static str {
        match self {
            SourceKind::Countries => "Countries API",
            SourceKind::Rates => "Exchange Rates API",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Countries => write!(f, "countries"),
            SourceKind::Rates => write!(f, "rates"),
        }
    }
}

impl std::error::Error for SourceKind {}

#[derive(Debug, Error)]
pub enum CatalogError {
    /// A remote feed was unavailable, timed out, or answered non-2xx.
    /// The refresh aborts without touching the store.
    #[error("external source '{source}' unavailable: {reason}")]
    ExternalSource { source: SourceKind, reason: String },

    /// The transactional commit failed; the whole batch was rolled back.
    #[error("persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// Read or delete aimed at a name the catalog does not hold.
    /// A normal negative result, not a pipeline failure.
    #[error("no catalog entry named '{0}'")]
    NotFound(String),
}

impl CatalogError {
    pub fn external(source: SourceKind, reason: impl fmt::Display) -> Self {
        CatalogError::ExternalSource {
            source,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_source_tagging() {
        let err = CatalogError::external(SourceKind::Rates, "connection refused");

        match err {
            CatalogError::ExternalSource { source, .. } => {
                assert_eq!(source, SourceKind::Rates);
            }
            _ => panic!("expected ExternalSource"),
        }
    }

    #[test]
    fn test_display_messages() {
        let err = CatalogError::external(SourceKind::Countries, "timed out");
        assert_eq!(
            err.to_string(),
            "external source 'countries' unavailable: timed out"
        );

        let err = CatalogError::NotFound("Atlantis".to_string());
        assert_eq!(err.to_string(), "no catalog entry named 'Atlantis'");

        assert_eq!(SourceKind::Rates.service_name(), "Exchange Rates API");
    }
}
