use anyhow::Result;
use salespipe::{config::EtlConfig, ingest, store, transform};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Full pipeline: ingest the source file into the raw table, then rebuild the
/// clean table. Each stage is also available as its own binary.
fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    // ─── 2) resolve config & open the store ──────────────────────────
    let cfg = EtlConfig::from_env()?;
    info!(db = %cfg.db_path, source = %cfg.source_path.display(), "configured");
    let conn = store::open_with_retry(&cfg.db_path, 3, Duration::from_secs(2))?;

    // ─── 3) stage 1: chunked ingestion ───────────────────────────────
    let rows = ingest::load(&conn, &cfg)?;
    info!(rows, table = %cfg.raw_table, "raw load done");

    // ─── 4) stage 2: transform raw → clean ───────────────────────────
    let summary = transform::transform(&conn, &cfg)?;
    println!("{}", serde_json::to_string(&summary)?);

    info!("all done");
    Ok(())
}
