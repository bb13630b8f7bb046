use anyhow::{Context, Result};
use duckdb::Connection;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Open the DuckDB database at `path`, creating the file if it doesn't exist.
/// `":memory:"` opens a transient in-memory database.
pub fn open(path: &str) -> Result<Connection> {
    let conn = if path == ":memory:" {
        Connection::open_in_memory()?
    } else {
        Connection::open(path)?
    };
    Ok(conn)
}

/// Open with a bounded retry around connection acquisition.
///
/// DuckDB holds a single-writer lock on the database file, so a concurrent
/// pipeline run shows up here as a failed open. Retrying with backoff is done
/// at this boundary only; the ingest/transform stages never retry internally.
pub fn open_with_retry(path: &str, attempts: u32, backoff: Duration) -> Result<Connection> {
    let mut last_err = None;
    for attempt in 1..=attempts.max(1) {
        match open(path) {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(attempt, path, "store open failed: {e}");
                last_err = Some(e);
                if attempt < attempts {
                    thread::sleep(backoff * attempt);
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("store open failed")))
        .with_context(|| format!("could not open store at {:?} after {} attempts", path, attempts))
}

/// Quote an identifier that may contain spaces, hyphens or mixed case
/// (raw column names are taken verbatim from the source header).
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM information_schema.tables WHERE table_name = ?",
        [table],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

pub fn row_count(conn: &Connection, table: &str) -> Result<i64> {
    let n: i64 = conn.query_row(
        &format!("SELECT count(*) FROM {}", quote_ident(table)),
        [],
        |r| r.get(0),
    )?;
    Ok(n)
}

/// Column names of `table`, in declaration order.
pub fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT column_name FROM information_schema.columns
         WHERE table_name = ? ORDER BY ordinal_position",
    )?;
    let names = stmt
        .query_map([table], |r| r.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Full read of `table`: column names plus every row's values as text.
pub fn read_table(conn: &Connection, table: &str) -> Result<(Vec<String>, Vec<Vec<Option<String>>>)> {
    let columns = column_names(conn, table)?;
    let width = columns.len();

    let mut stmt = conn.prepare(&format!("SELECT * FROM {}", quote_ident(table)))?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(row.get::<_, Option<String>>(i)?);
        }
        out.push(values);
    }
    Ok((columns, out))
}

/// Swap `staging` into place as `target` in one transaction, so readers of
/// `target` see either the previous contents or the new ones, never a
/// half-written table.
pub fn swap_table(conn: &Connection, staging: &str, target: &str) -> Result<()> {
    let sql = format!(
        "BEGIN TRANSACTION;\n\
         DROP TABLE IF EXISTS {target};\n\
         ALTER TABLE {staging} RENAME TO {target};\n\
         COMMIT;",
        staging = quote_ident(staging),
        target = quote_ident(target),
    );
    conn.execute_batch(&sql)
        .with_context(|| format!("swapping {} into {}", staging, target))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_ident("Order ID"), "\"Order ID\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn swap_replaces_target_atomically() -> Result<()> {
        let conn = open(":memory:")?;
        conn.execute_batch(
            "CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);
             CREATE TABLE t__staging (x INTEGER); INSERT INTO t__staging VALUES (2), (3);",
        )?;
        swap_table(&conn, "t__staging", "t")?;
        assert_eq!(row_count(&conn, "t")?, 2);
        assert!(!table_exists(&conn, "t__staging")?);
        Ok(())
    }

    #[test]
    fn reads_columns_and_rows_in_order() -> Result<()> {
        let conn = open(":memory:")?;
        conn.execute_batch(
            "CREATE TABLE s (\"Order ID\" VARCHAR, \"Sales\" VARCHAR);
             INSERT INTO s VALUES ('a', '1.5'), ('b', NULL);",
        )?;
        let (cols, rows) = read_table(&conn, "s")?;
        assert_eq!(cols, vec!["Order ID", "Sales"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1].as_deref(), Some("1.5"));
        assert_eq!(rows[1][1], None);
        Ok(())
    }
}
