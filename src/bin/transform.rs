use anyhow::Result;
use salespipe::{config::EtlConfig, store, transform};
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

/// Stage 2 only: rebuild the clean table from the raw table.
fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let cfg = EtlConfig::from_env()?;
    let conn = store::open_with_retry(&cfg.db_path, 3, Duration::from_secs(2))?;

    let summary = transform::transform(&conn, &cfg)?;
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}
