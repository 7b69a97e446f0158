use anyhow::Result;
use rusqlite::Connection;
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

// Use library instead of local modules
use country_catalog::{
    build_report, catalog_stats, setup_database, write_report, RefreshEngine, SourceConfig,
};

fn db_path() -> PathBuf {
    PathBuf::from(env::var("CATALOG_DB").unwrap_or_else(|_| "countries.db".to_string()))
}

fn summary_path() -> PathBuf {
    PathBuf::from(env::var("SUMMARY_PATH").unwrap_or_else(|_| "summary.json".to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("refresh") => run_refresh().await?,
        Some("status") => run_status()?,
        _ => print_usage(),
    }

    Ok(())
}

async fn run_refresh() -> Result<()> {
    println!("🌍 Country Catalog - Refresh");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Open database
    let path = db_path();
    let mut conn = Connection::open(&path)?;
    setup_database(&conn)?;
    println!("✓ Database ready: {}", path.display());

    // 2. Fetch both feeds and reconcile
    println!("\n📡 Fetching country and exchange-rate feeds...");
    let config = SourceConfig::from_env();
    let mut engine = RefreshEngine::from_config(&config)?;
    let outcome = engine.refresh(&mut conn).await?;

    println!("✓ Added: {} countries", outcome.added);
    println!("✓ Updated: {} countries", outcome.updated);

    // 3. Write summary report
    let report = build_report(&conn)?;
    let summary = summary_path();
    write_report(&report, &summary)?;
    println!("✓ Summary written: {}", summary.display());

    let stats = catalog_stats(&conn)?;
    println!("\n✅ Catalog holds {} countries", stats.total_countries);

    Ok(())
}

fn run_status() -> Result<()> {
    let path = db_path();

    if !path.exists() {
        eprintln!("❌ Database not found at {}", path.display());
        eprintln!("   Run: country-catalog refresh");
        eprintln!("   to populate the catalog first.");
        std::process::exit(1);
    }

    let conn = Connection::open(&path)?;
    setup_database(&conn)?;
    let stats = catalog_stats(&conn)?;

    println!("Total countries: {}", stats.total_countries);
    match stats.last_refreshed_at {
        Some(ts) => println!("Last refreshed:  {}", ts.to_rfc3339()),
        None => println!("Last refreshed:  never"),
    }

    Ok(())
}

fn print_usage() {
    println!("country-catalog {}", country_catalog::VERSION);
    println!();
    println!("Usage:");
    println!("  country-catalog refresh   Fetch feeds and reconcile the catalog");
    println!("  country-catalog status    Show catalog totals and last refresh");
    println!();
    println!("Environment:");
    println!("  CATALOG_DB           Database path (default: countries.db)");
    println!("  SUMMARY_PATH         Summary report path (default: summary.json)");
    println!("  COUNTRIES_API_URL    Override the country feed URL");
    println!("  EXCHANGE_API_URL     Override the exchange-rate feed URL");
}
