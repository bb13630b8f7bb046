use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use duckdb::types::Value;
use duckdb::Connection;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

pub mod dates;
pub mod normalize;

use crate::config::{DatePolicy, EtlConfig};
use crate::store::{self, quote_ident};
use normalize::normalize_column;

/// Row counters for one transform run. `rows_dropped` covers every row-level
/// rejection: null `sales` after coercion, plus unparseable dates when the
/// date policy is `drop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransformSummary {
    pub rows_in: u64,
    pub rows_out: u64,
    pub rows_dropped: u64,
}

static EPOCH: Lazy<NaiveDate> = Lazy::new(|| NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());

fn date_value(date: NaiveDate) -> Value {
    Value::Date32(date.signed_duration_since(*EPOCH).num_days() as i32)
}

/// `sales` coercion: failures become `None`, never errors. The validation
/// filter then drops `None` rows.
fn coerce_sales(raw: Option<&str>) -> Option<f64> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Rebuild the clean table from the raw table.
///
/// Fixed step order: normalize column names, parse `order_date`/`ship_date`,
/// derive `order_year_month`, coerce `sales`, drop rows with null `sales`,
/// then materialize. Materialization stages into a shadow table and swaps it
/// in, so a reader of the clean table never sees a half-written result.
#[tracing::instrument(level = "info", skip(conn, cfg), fields(raw = %cfg.raw_table, clean = %cfg.clean_table))]
pub fn transform(conn: &Connection, cfg: &EtlConfig) -> Result<TransformSummary> {
    if !store::table_exists(conn, &cfg.raw_table)? {
        bail!(
            "raw table {:?} does not exist; run ingestion first",
            cfg.raw_table
        );
    }
    let (raw_columns, raw_rows) = store::read_table(conn, &cfg.raw_table)
        .with_context(|| format!("reading raw table {:?}", cfg.raw_table))?;
    if raw_rows.is_empty() {
        bail!("raw table {:?} is empty; nothing to transform", cfg.raw_table);
    }
    let rows_in = raw_rows.len() as u64;
    info!(rows = rows_in, "read raw table");

    // 1) schema normalization, before any column is referenced by name
    let columns: Vec<String> = raw_columns.iter().map(|c| normalize_column(c)).collect();
    let mut seen = HashSet::new();
    for name in &columns {
        if !seen.insert(name.as_str()) {
            bail!("column name {:?} is not unique after normalization", name);
        }
    }
    let order_date_idx = required_column(&columns, "order_date")?;
    let ship_date_idx = required_column(&columns, "ship_date")?;
    let sales_idx = required_column(&columns, "sales")?;

    // 2–5) row rules: parse dates, derive the period, coerce sales, filter
    let mut clean_rows: Vec<Vec<Value>> = Vec::with_capacity(raw_rows.len());
    let mut rows_dropped = 0u64;
    'rows: for (idx, row) in raw_rows.iter().enumerate() {
        let mut parsed_dates = Vec::with_capacity(2);
        for &(col_idx, name) in &[(order_date_idx, "order_date"), (ship_date_idx, "ship_date")] {
            let raw_value = row[col_idx].as_deref().unwrap_or_default();
            match dates::parse_flexible(raw_value) {
                Some(date) => parsed_dates.push(date),
                None => match cfg.date_policy {
                    DatePolicy::Fatal => bail!(
                        "unparseable {} {:?} at raw row {}",
                        name,
                        raw_value,
                        idx + 1
                    ),
                    DatePolicy::Drop => {
                        debug!(row = idx + 1, column = name, value = raw_value, "dropping row: unparseable date");
                        rows_dropped += 1;
                        continue 'rows;
                    }
                },
            }
        }
        let (order_date, ship_date) = (parsed_dates[0], parsed_dates[1]);

        let sales = match coerce_sales(row[sales_idx].as_deref()) {
            Some(v) => v,
            None => {
                debug!(row = idx + 1, "dropping row: sales is not numeric");
                rows_dropped += 1;
                continue;
            }
        };

        let mut values: Vec<Value> = Vec::with_capacity(columns.len() + 1);
        for (col_idx, raw_value) in row.iter().enumerate() {
            if col_idx == order_date_idx {
                values.push(date_value(order_date));
            } else if col_idx == ship_date_idx {
                values.push(date_value(ship_date));
            } else if col_idx == sales_idx {
                values.push(Value::Double(sales));
            } else {
                values.push(match raw_value {
                    Some(text) => Value::Text(text.clone()),
                    None => Value::Null,
                });
            }
        }
        // 3) derived period label, always recomputed, appended as last column
        values.push(Value::Text(dates::year_month_label(order_date)));
        clean_rows.push(values);
    }
    let rows_out = clean_rows.len() as u64;

    // 6) materialize via shadow table + transactional swap
    materialize(conn, cfg, &columns, order_date_idx, ship_date_idx, sales_idx, clean_rows)?;

    let summary = TransformSummary {
        rows_in,
        rows_out,
        rows_dropped,
    };
    info!(
        rows_in = summary.rows_in,
        rows_out = summary.rows_out,
        rows_dropped = summary.rows_dropped,
        "transform complete"
    );
    Ok(summary)
}

fn required_column(columns: &[String], name: &str) -> Result<usize> {
    columns.iter().position(|c| c == name).ok_or_else(|| {
        anyhow::anyhow!(
            "required column {:?} absent after normalization (have: {})",
            name,
            columns.join(", ")
        )
    })
}

fn materialize(
    conn: &Connection,
    cfg: &EtlConfig,
    columns: &[String],
    order_date_idx: usize,
    ship_date_idx: usize,
    sales_idx: usize,
    clean_rows: Vec<Vec<Value>>,
) -> Result<()> {
    let staging = format!("{}__staging", cfg.clean_table);

    let mut column_defs: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let sql_type = if idx == order_date_idx || idx == ship_date_idx {
                "DATE"
            } else if idx == sales_idx {
                "DOUBLE"
            } else {
                "VARCHAR"
            };
            format!("{} {}", quote_ident(name), sql_type)
        })
        .collect();
    column_defs.push(format!("{} VARCHAR", quote_ident("order_year_month")));

    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {staging};\nCREATE TABLE {staging} ({defs});",
        staging = quote_ident(&staging),
        defs = column_defs.join(", "),
    ))
    .with_context(|| format!("creating staging table {:?}", staging))?;

    let mut appender = conn
        .appender(&staging)
        .with_context(|| format!("opening appender for {:?}", staging))?;
    for row in clean_rows {
        appender.append_row(duckdb::appender_params_from_iter(row))?;
    }
    appender.flush()?;
    drop(appender);

    store::swap_table(conn, &staging, &cfg.clean_table)
}
