//! Process-wide wiring example for `refresh-cache`.
//!
//! A process entry point that initializes logging, builds one process-wide
//! [`Cache`], registers a couple of computations, and reads from it. A real
//! embedder would plug its own remote lookup or expensive aggregation in
//! where `fetch_exchange_rate` and `slow_report` are below.

use std::time::Duration;

use refresh_cache::Cache;

async fn fetch_exchange_rate() -> anyhow::Result<f64> {
    // Stand-in for a remote call; a real embedder would hit a price feed.
    Ok(1.08)
}

async fn slow_report() -> anyhow::Result<String> {
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok("report generated".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cache: Cache<&'static str, f64> = Cache::new();
    cache.register_function(
        "eur_usd",
        fetch_exchange_rate,
        Duration::from_secs(60),
        Duration::from_secs(15),
    )?;

    let reports: Cache<&'static str, String> = Cache::new();
    reports.register_function(
        "daily_report",
        slow_report,
        Duration::from_secs(3600),
        Duration::from_secs(600),
    )?;

    // The first reads race the worker's startup delay; give it a moment.
    tokio::time::sleep(Duration::from_millis(1_200)).await;

    match cache.get_default(&"eur_usd").await {
        Ok(rate) => tracing::info!(rate, "got exchange rate"),
        Err(err) => tracing::warn!(%err, "exchange rate not ready yet"),
    }

    match reports.get(&"daily_report", Duration::from_secs(5)).await {
        Ok(report) => tracing::info!(%report, "got report"),
        Err(err) => tracing::warn!(%err, "report not ready yet"),
    }

    Ok(())
}
