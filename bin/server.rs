// Country Catalog - API Server
// REST surface over the refresh pipeline and catalog reads

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use country_catalog::{
    build_report, catalog_stats, delete_country_by_name, get_country_by_name, list_countries,
    read_report, setup_database, write_report, CatalogEntry, CatalogError, ListQuery,
    RefreshEngine, SortKey, SourceConfig,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    config: SourceConfig,
    summary_path: Arc<PathBuf>,
}

/// Country response (catalog entry without the surrogate id)
#[derive(Serialize)]
struct CountryResponse {
    name: String,
    capital: Option<String>,
    region: Option<String>,
    population: i64,
    currency_code: Option<String>,
    exchange_rate: Option<f64>,
    estimated_gdp: Option<f64>,
    flag_url: Option<String>,
    last_refreshed_at: DateTime<Utc>,
}

impl From<CatalogEntry> for CountryResponse {
    fn from(entry: CatalogEntry) -> Self {
        Self {
            name: entry.name,
            capital: entry.capital,
            region: entry.region,
            population: entry.population,
            currency_code: entry.currency_code,
            exchange_rate: entry.exchange_rate,
            estimated_gdp: entry.estimated_gdp,
            flag_url: entry.flag_url,
            last_refreshed_at: entry.last_refreshed_at,
        }
    }
}

#[derive(Serialize)]
struct RefreshResponse {
    message: String,
    countries_added: usize,
    countries_updated: usize,
    last_refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct StatusResponse {
    total_countries: i64,
    last_refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ListParams {
    region: Option<String>,
    currency: Option<String>,
    sort: Option<String>,
    skip: Option<u32>,
    limit: Option<u32>,
}

/// Map pipeline failures to distinct user-visible statuses:
/// upstream-unavailable (503) vs not-found (404) vs internal (500).
fn error_response(err: &CatalogError) -> (StatusCode, Json<serde_json::Value>) {
    match err {
        CatalogError::ExternalSource { source, .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "External data source unavailable",
                "details": format!("Could not fetch data from {}", source.service_name()),
            })),
        ),
        CatalogError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Country not found"})),
        ),
        CatalogError::Persistence(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Internal server error"})),
        ),
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET / - Endpoint overview
async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "Country Currency & Exchange API",
        "version": country_catalog::VERSION,
        "endpoints": {
            "refresh": "POST /countries/refresh",
            "countries": "GET /countries",
            "country_by_name": "GET /countries/{name}",
            "delete_country": "DELETE /countries/{name}",
            "status": "GET /status",
            "summary": "GET /countries/summary",
        }
    }))
}

/// GET /health - Health check
async fn health_check() -> impl IntoResponse {
    Json(json!({"status": "healthy"}))
}

/// POST /countries/refresh - Fetch both feeds and reconcile the catalog
async fn refresh_countries(State(state): State<AppState>) -> impl IntoResponse {
    let mut engine = match RefreshEngine::from_config(&state.config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "failed to build refresh engine");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Internal server error"})),
            )
                .into_response();
        }
    };

    // Both remote fetches complete before the store lock is taken
    let snapshot = match engine.fetch().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::error!(error = %e, "refresh aborted during fetch");
            return error_response(&e).into_response();
        }
    };

    let applied = {
        let mut conn = state.db.lock().unwrap();
        engine.apply(&mut conn, snapshot)
    };

    let outcome = match applied {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "refresh aborted during apply");
            return error_response(&e).into_response();
        }
    };

    let last_refreshed_at = {
        let conn = state.db.lock().unwrap();
        catalog_stats(&conn)
            .ok()
            .and_then(|stats| stats.last_refreshed_at)
    };

    // Summary generation is scheduled out-of-band; refresh does not wait
    let db = state.db.clone();
    let summary_path = state.summary_path.clone();
    tokio::spawn(async move {
        let report = {
            let conn = db.lock().unwrap();
            build_report(&conn)
        };
        match report {
            Ok(report) => {
                if let Err(e) = write_report(&report, &summary_path) {
                    tracing::warn!(error = %e, "failed to write summary report");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to build summary report"),
        }
    });

    (
        StatusCode::OK,
        Json(RefreshResponse {
            message: "Countries data refreshed successfully".to_string(),
            countries_added: outcome.added,
            countries_updated: outcome.updated,
            last_refreshed_at,
        }),
    )
        .into_response()
}

/// GET /countries - List with optional filters, sort and paging
async fn get_countries(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let query = ListQuery {
        region: params.region,
        currency: params.currency,
        // Unknown sort strings fall back to natural order
        sort: params.sort.as_deref().and_then(SortKey::parse),
        offset: params.skip.unwrap_or(0),
        limit: params.limit.unwrap_or(0),
    };

    let conn = state.db.lock().unwrap();

    match list_countries(&conn, &query) {
        Ok(entries) => {
            let response: Vec<CountryResponse> =
                entries.into_iter().map(|entry| entry.into()).collect();

            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to list countries");
            error_response(&e).into_response()
        }
    }
}

/// GET /countries/summary - Latest post-refresh summary report
async fn get_summary(State(state): State<AppState>) -> impl IntoResponse {
    match read_report(&state.summary_path) {
        Ok(Some(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Summary not found"})),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to read summary report");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Internal server error"})),
            )
                .into_response()
        }
    }
}

/// GET /countries/:name - One country, case-insensitive lookup
async fn get_country(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match get_country_by_name(&conn, &name) {
        Ok(entry) => (StatusCode::OK, Json(CountryResponse::from(entry))).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// DELETE /countries/:name - Remove a country record
async fn delete_country(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match delete_country_by_name(&conn, &name) {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({"message": format!("Country '{}' deleted successfully", name)})),
        )
            .into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Country not found"})),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to delete country");
            error_response(&e).into_response()
        }
    }
}

/// GET /status - Catalog totals and last refresh timestamp
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match catalog_stats(&conn) {
        Ok(stats) => (
            StatusCode::OK,
            Json(StatusResponse {
                total_countries: stats.total_countries,
                last_refreshed_at: stats.last_refreshed_at,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to read catalog stats");
            error_response(&e).into_response()
        }
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let db_path =
        std::env::var("CATALOG_DB").unwrap_or_else(|_| "countries.db".to_string());
    let summary_path =
        std::env::var("SUMMARY_PATH").unwrap_or_else(|_| "summary.json".to_string());

    let conn = Connection::open(&db_path)?;
    setup_database(&conn)?;
    tracing::info!(path = %db_path, "database ready");

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        config: SourceConfig::from_env(),
        summary_path: Arc::new(PathBuf::from(summary_path)),
    };

    // Build router
    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/countries", get(get_countries))
        .route("/countries/refresh", post(refresh_countries))
        .route("/countries/summary", get(get_summary))
        .route("/countries/:name", get(get_country).delete(delete_country))
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Start server
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "8000".to_string());
    let addr = format!("{}:{}", host, port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
