use anyhow::{anyhow, bail, Context, Result};
use encoding_rs::Encoding;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Destination table for the 1:1 copy of the source file.
pub const RAW_TABLE: &str = "sales_data";
/// Destination table for the normalized, validated output.
pub const CLEAN_TABLE: &str = "clean_sales_data";

const DEFAULT_SOURCE_PATH: &str = "data/Superstore.csv";
const DEFAULT_ENCODING: &str = "latin1";
const DEFAULT_CHUNK_SIZE: usize = 10_000;
const DEFAULT_DB_PATH: &str = "sales.duckdb";

/// What to do with a row whose order/ship date cannot be parsed.
///
/// `Fatal` aborts the whole transform run; `Drop` rejects the row and counts
/// it, the same treatment an unparseable `sales` value gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePolicy {
    Fatal,
    Drop,
}

impl FromStr for DatePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fatal" => Ok(DatePolicy::Fatal),
            "drop" => Ok(DatePolicy::Drop),
            other => Err(anyhow!(
                "invalid date policy {:?}; expected \"fatal\" or \"drop\"",
                other
            )),
        }
    }
}

/// Everything the two pipeline stages need, resolved up front so the stages
/// themselves never touch the environment.
#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub source_path: PathBuf,
    pub encoding: &'static Encoding,
    pub chunk_size: usize,
    pub date_policy: DatePolicy,
    pub db_path: String,
    pub raw_table: String,
    pub clean_table: String,
}

impl EtlConfig {
    pub fn new(
        source_path: impl Into<PathBuf>,
        encoding_label: &str,
        chunk_size: usize,
        date_policy: DatePolicy,
        db_path: impl Into<String>,
    ) -> Result<Self> {
        let encoding = Encoding::for_label(encoding_label.as_bytes())
            .ok_or_else(|| anyhow!("unknown encoding label {:?}", encoding_label))?;
        if chunk_size == 0 {
            bail!("chunk size must be a positive integer");
        }
        Ok(EtlConfig {
            source_path: source_path.into(),
            encoding,
            chunk_size,
            date_policy,
            db_path: db_path.into(),
            raw_table: RAW_TABLE.to_string(),
            clean_table: CLEAN_TABLE.to_string(),
        })
    }

    /// Build the config from `SALES_*` environment variables, falling back to
    /// the defaults of the original pipeline.
    pub fn from_env() -> Result<Self> {
        let source_path =
            env::var("SALES_SOURCE_PATH").unwrap_or_else(|_| DEFAULT_SOURCE_PATH.to_string());
        let encoding_label =
            env::var("SALES_SOURCE_ENCODING").unwrap_or_else(|_| DEFAULT_ENCODING.to_string());
        let chunk_size = match env::var("SALES_CHUNK_SIZE") {
            Ok(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("SALES_CHUNK_SIZE {:?} is not a valid integer", raw))?,
            Err(_) => DEFAULT_CHUNK_SIZE,
        };
        let date_policy = match env::var("SALES_DATE_POLICY") {
            Ok(raw) => raw.parse::<DatePolicy>()?,
            Err(_) => DatePolicy::Drop,
        };
        let db_path = env::var("SALES_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

        EtlConfig::new(source_path, &encoding_label, chunk_size, date_policy, db_path)
    }
}
