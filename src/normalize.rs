// Source Normalizer - raw country records to canonical shape
//
// The country feed is heterogeneous: fields come and go, and the currency
// field shows up as a bare code, a list of codes, or a list of objects.
// Normalization is tolerant everywhere except the name, which is the
// identity key for the whole catalog.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Canonical country record produced per fetch. Ephemeral: lives only for
/// the duration of one refresh, never persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedCountry {
    /// Join/identity key. Required; records without one are rejected.
    pub name: String,
    pub capital: Option<String>,
    pub region: Option<String>,
    /// Defaults to 0 when absent or non-numeric.
    pub population: u64,
    /// Uppercase-normalized ISO-style code, first currency wins.
    pub currency_code: Option<String>,
    pub flag_url: Option<String>,
}

/// A single record the normalizer refuses to process. Counted and skipped
/// by the fetcher; never aborts the batch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedRecord {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record has no usable name")]
    MissingName,
}

// ============================================================================
// CURRENCY FIELD - tagged-variant parse
// ============================================================================

/// The currency field as the feed actually ships it: a scalar code or an
/// ordered list of descriptors. Decision rule: the first element's code.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CurrencyField {
    One(CurrencyDescriptor),
    Many(Vec<CurrencyDescriptor>),
}

/// One currency descriptor: a bare code string, or an object carrying a
/// `code` field (other keys ignored).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CurrencyDescriptor {
    Code(String),
    Object {
        #[serde(default)]
        code: Option<String>,
    },
}

impl CurrencyDescriptor {
    fn into_code(self) -> Option<String> {
        match self {
            CurrencyDescriptor::Code(code) => Some(code),
            CurrencyDescriptor::Object { code } => code,
        }
    }
}

impl CurrencyField {
    /// First element wins; an empty list yields nothing. No attempt is made
    /// to reconcile multiple currencies per country.
    fn first_code(self) -> Option<String> {
        match self {
            CurrencyField::One(descriptor) => descriptor.into_code(),
            CurrencyField::Many(list) => list.into_iter().next()?.into_code(),
        }
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Convert one raw country record into a [`NormalizedCountry`].
///
/// Rules:
/// - `name`: required; absent, empty, or non-string rejects the record.
/// - `population`: non-numeric or missing coerces to 0, never rejects.
/// - `currencies`: first element's code, uppercased; absent or empty ⇒ None.
/// - `capital`/`region`/`flag`: optional pass-through.
pub fn normalize_country(raw: &Value) -> Result<NormalizedCountry, MalformedRecord> {
    let record = raw.as_object().ok_or(MalformedRecord::NotAnObject)?;

    let name = record
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(MalformedRecord::MissingName)?
        .to_string();

    let population = record
        .get("population")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let currency_code = record
        .get("currencies")
        .and_then(|field| serde_json::from_value::<CurrencyField>(field.clone()).ok())
        .and_then(CurrencyField::first_code)
        .map(|code| code.trim().to_uppercase())
        .filter(|code| !code.is_empty());

    Ok(NormalizedCountry {
        name,
        capital: optional_string(record.get("capital")),
        region: optional_string(record.get("region")),
        population,
        currency_code,
        flag_url: optional_string(record.get("flag")),
    })
}

fn optional_string(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}
