use anyhow::Result;
use salespipe::{config::EtlConfig, ingest, store};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Stage 1 only: load the source file into the raw table.
fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let cfg = EtlConfig::from_env()?;
    let conn = store::open_with_retry(&cfg.db_path, 3, Duration::from_secs(2))?;

    let rows = ingest::load(&conn, &cfg)?;
    info!(rows, table = %cfg.raw_table, "raw load done");
    println!("{}", rows);
    Ok(())
}
