use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, StringRecord};
use duckdb::Connection;
use encoding_rs_io::DecodeReaderBytesBuilder;
use std::fs::File;
use std::io::BufReader;
use tracing::info;

use crate::config::EtlConfig;
use crate::store::quote_ident;

/// Groups decoded CSV records into bounded chunks and writes each chunk to the
/// raw table: the first flush replaces the table (drop + recreate), every
/// later flush appends. Raw columns are all VARCHAR with the source header
/// names preserved verbatim; typing is the Transformer's job.
struct ChunkLoader<'conn> {
    conn: &'conn Connection,
    table: String,
    headers: StringRecord,
    chunk_size: usize,
    buf: Vec<StringRecord>,
    chunks_flushed: usize,
    total_rows: u64,
}

impl<'conn> ChunkLoader<'conn> {
    fn new(conn: &'conn Connection, table: &str, headers: StringRecord, chunk_size: usize) -> Self {
        ChunkLoader {
            conn,
            table: table.to_string(),
            headers,
            chunk_size,
            buf: Vec::with_capacity(chunk_size),
            chunks_flushed: 0,
            total_rows: 0,
        }
    }

    /// Feed one data record; flushes when the chunk reaches `chunk_size`.
    fn push(&mut self, record: StringRecord) -> Result<()> {
        self.buf.push(record);
        if self.buf.len() >= self.chunk_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Write the buffered chunk. The first chunk replaces the table; from
    /// that point the previous run's contents are gone even if a later chunk
    /// fails.
    fn flush(&mut self) -> Result<()> {
        if self.chunks_flushed == 0 {
            self.replace_table()?;
        }

        let mut appender = self
            .conn
            .appender(&self.table)
            .with_context(|| format!("opening appender for table {:?}", self.table))?;
        for record in &self.buf {
            appender.append_row(duckdb::appender_params_from_iter(record.iter()))?;
        }
        appender.flush()?;

        self.total_rows += self.buf.len() as u64;
        self.chunks_flushed += 1;
        info!(
            chunk = self.chunks_flushed,
            rows = self.buf.len(),
            total = self.total_rows,
            "loaded chunk"
        );
        self.buf.clear();
        Ok(())
    }

    fn replace_table(&self) -> Result<()> {
        let columns = self
            .headers
            .iter()
            .map(|h| format!("{} VARCHAR", quote_ident(h)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "DROP TABLE IF EXISTS {table};\nCREATE TABLE {table} ({columns});",
            table = quote_ident(&self.table),
            columns = columns,
        );
        self.conn
            .execute_batch(&sql)
            .with_context(|| format!("replacing table {:?}", self.table))?;
        Ok(())
    }

    /// Flush any leftover partial chunk. A header-only source still replaces
    /// the table, so a re-run against a now-empty file leaves an empty raw
    /// table rather than last run's rows.
    fn finish(mut self) -> Result<u64> {
        if !self.buf.is_empty() {
            self.flush()?;
        }
        if self.chunks_flushed == 0 {
            self.replace_table()?;
        }
        Ok(self.total_rows)
    }
}

/// A decoder that hits undecodable input emits U+FFFD; the source declares its
/// encoding, so any replacement character means the declaration is wrong.
fn has_decode_errors(record: &StringRecord) -> bool {
    record.iter().any(|field| field.contains('\u{FFFD}'))
}

/// Load the source file into the raw table in chunks of at most
/// `cfg.chunk_size` rows, preserving source row order. Returns the total
/// number of data rows written.
///
/// Any input fault is fatal for the whole run: raw ingestion is schema-blind
/// and must not silently drop rows the transform stage may need to diagnose.
#[tracing::instrument(level = "info", skip(conn, cfg), fields(source = %cfg.source_path.display()))]
pub fn load(conn: &Connection, cfg: &EtlConfig) -> Result<u64> {
    let file = File::open(&cfg.source_path)
        .with_context(|| format!("opening source file {:?}", cfg.source_path))?;
    let decoder = DecodeReaderBytesBuilder::new()
        .encoding(Some(cfg.encoding))
        .build(BufReader::new(file));
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(decoder);

    let headers = rdr
        .headers()
        .with_context(|| format!("reading header row of {:?}", cfg.source_path))?
        .clone();
    if headers.is_empty() {
        bail!("source file {:?} has no header row", cfg.source_path);
    }
    if has_decode_errors(&headers) {
        bail!("undecodable bytes in header row: source is not valid for the declared encoding");
    }
    info!(columns = headers.len(), "read source header");

    let mut loader = ChunkLoader::new(conn, &cfg.raw_table, headers, cfg.chunk_size);
    for (idx, result) in rdr.records().enumerate() {
        // data row 1 is file line 2
        let record =
            result.with_context(|| format!("malformed CSV record at data row {}", idx + 1))?;
        if has_decode_errors(&record) {
            bail!(
                "undecodable bytes at data row {}: source is not valid for the declared encoding",
                idx + 1
            );
        }
        loader.push(record)?;
    }

    let total = loader.finish()?;
    info!(rows = total, table = %cfg.raw_table, "ingestion complete");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatePolicy;
    use crate::store;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cfg_for(path: &std::path::Path, encoding: &str, chunk_size: usize) -> EtlConfig {
        EtlConfig::new(path, encoding, chunk_size, DatePolicy::Drop, ":memory:").unwrap()
    }

    fn write_source(bytes: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn loads_all_rows_and_preserves_header_names() -> Result<()> {
        let src = write_source(b"Order ID,Sub-Category,Sales\n1,Chairs,10.5\n2,Tables,20\n");
        let conn = store::open(":memory:")?;
        let cfg = cfg_for(src.path(), "utf-8", 100);

        let n = load(&conn, &cfg)?;
        assert_eq!(n, 2);
        assert_eq!(store::row_count(&conn, "sales_data")?, 2);
        // original header spelling survives in the raw table
        assert_eq!(
            store::column_names(&conn, "sales_data")?,
            vec!["Order ID", "Sub-Category", "Sales"]
        );
        Ok(())
    }

    #[test]
    fn chunking_preserves_source_order() -> Result<()> {
        let mut text = String::from("id,val\n");
        for i in 0..25 {
            text.push_str(&format!("{},v{}\n", i, i));
        }
        let src = write_source(text.as_bytes());
        let conn = store::open(":memory:")?;
        // chunk size 10 → chunks of 10 / 10 / 5
        let cfg = cfg_for(src.path(), "utf-8", 10);

        assert_eq!(load(&conn, &cfg)?, 25);
        let (_, rows) = store::read_table(&conn, "sales_data")?;
        let ids: Vec<String> = rows.iter().map(|r| r[0].clone().unwrap()).collect();
        let expected: Vec<String> = (0..25).map(|i| i.to_string()).collect();
        assert_eq!(ids, expected);
        Ok(())
    }

    #[test]
    fn rerun_replaces_rather_than_accumulates() -> Result<()> {
        let src = write_source(b"id,val\n1,a\n2,b\n3,c\n");
        let conn = store::open(":memory:")?;
        let cfg = cfg_for(src.path(), "utf-8", 2);

        assert_eq!(load(&conn, &cfg)?, 3);
        assert_eq!(load(&conn, &cfg)?, 3);
        assert_eq!(store::row_count(&conn, "sales_data")?, 3);
        Ok(())
    }

    #[test]
    fn decodes_latin1_sources() -> Result<()> {
        // "São Paulo" with an ISO-8859-1 0xE3 byte
        let src = write_source(b"city,val\nS\xe3o Paulo,1\n");
        let conn = store::open(":memory:")?;
        let cfg = cfg_for(src.path(), "latin1", 100);

        assert_eq!(load(&conn, &cfg)?, 1);
        let (_, rows) = store::read_table(&conn, "sales_data")?;
        assert_eq!(rows[0][0].as_deref(), Some("São Paulo"));
        Ok(())
    }

    #[test]
    fn encoding_mismatch_is_fatal() {
        // latin1 bytes read as strict UTF-8 decode to U+FFFD
        let src = write_source(b"city,val\nS\xe3o Paulo,1\n");
        let conn = store::open(":memory:").unwrap();
        let cfg = cfg_for(src.path(), "utf-8", 100);

        let err = load(&conn, &cfg).unwrap_err();
        assert!(err.to_string().contains("undecodable bytes"));
    }

    #[test]
    fn ragged_row_is_fatal() {
        let src = write_source(b"id,val\n1,a\n2,a,extra\n");
        let conn = store::open(":memory:").unwrap();
        let cfg = cfg_for(src.path(), "utf-8", 100);

        let err = load(&conn, &cfg).unwrap_err();
        assert!(err.to_string().contains("malformed CSV record"));
    }

    #[test]
    fn missing_file_is_fatal_before_any_write() {
        let conn = store::open(":memory:").unwrap();
        let cfg = cfg_for(std::path::Path::new("no/such/file.csv"), "utf-8", 100);

        assert!(load(&conn, &cfg).is_err());
        assert!(!store::table_exists(&conn, "sales_data").unwrap());
    }

    #[test]
    fn header_only_source_leaves_empty_raw_table() -> Result<()> {
        let populated = write_source(b"id,val\n1,a\n");
        let conn = store::open(":memory:")?;
        assert_eq!(load(&conn, &cfg_for(populated.path(), "utf-8", 100))?, 1);

        let empty = write_source(b"id,val\n");
        assert_eq!(load(&conn, &cfg_for(empty.path(), "utf-8", 100))?, 0);
        assert_eq!(store::row_count(&conn, "sales_data")?, 0);
        Ok(())
    }
}
