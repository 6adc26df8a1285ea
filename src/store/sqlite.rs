//! SQLite backend.
//!
//! A batch is written as one multi-row `INSERT ... VALUES (...), (...)` inside a transaction.
//! Placeholders are numbered column-major (`?{col * rows + row + 1}`), so the bound parameter list
//! is simply every column array concatenated in column order. Batches that would exceed SQLite's
//! host-parameter limit are split into several statements inside the same transaction, so the
//! batch still commits or rolls back as a unit.
//!
//! SQLite has no exact decimal type: decimal columns are declared `TEXT` by [`create_table`] and
//! bound as their canonical text, which keeps the declared scale intact (`1234.50` stays
//! `1234.50`). Dates and timestamps are bound as ISO-8601 text.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};

use crate::columnar::{ColumnArray, ColumnBatch};
use crate::error::StoreError;
use crate::types::{BatchTag, SqlType, TargetTable};

use super::{BulkWriter, Connector, StoreConnection};

/// SQLite's default `SQLITE_MAX_VARIABLE_NUMBER`.
pub const MAX_PARAMS_PER_STATEMENT: usize = 32_766;

/// Progress-handler granularity, in virtual machine instructions.
const PROGRESS_OPS: i32 = 1_000;

/// Opens connections to a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
    create_missing: bool,
}

impl SqliteConnector {
    /// Connect to an existing database at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            create_missing: false,
        }
    }

    /// Create the database file on first connect if it does not exist.
    pub fn create_if_missing(mut self) -> Self {
        self.create_missing = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Connector for SqliteConnector {
    type Connection = SqliteConnection;

    fn connect(&self, timeout: Duration) -> Result<Self::Connection, StoreError> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.create_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        let conn = Connection::open_with_flags(&self.path, flags).map_err(|e| {
            StoreError::unavailable(format!("open {}: {e}", self.path.display()))
        })?;
        conn.busy_timeout(timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Ok(SqliteConnection { conn })
    }
}

/// An open SQLite connection.
#[derive(Debug)]
pub struct SqliteConnection {
    conn: Connection,
}

impl SqliteConnection {
    /// Wrap an already-open connection (e.g. an in-memory database in tests).
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn insert_all(&mut self, table: &TargetTable, batch: &ColumnBatch) -> rusqlite::Result<u64> {
        let ncols = table.columns.len();
        let rows_per_statement = (MAX_PARAMS_PER_STATEMENT / ncols).max(1);

        let tx = self.conn.transaction()?;
        let mut inserted = 0u64;
        let mut start = 0;
        while start < batch.row_count {
            let end = (start + rows_per_statement).min(batch.row_count);
            let sql = insert_sql(table, end - start);
            let params = column_major_params(batch, start, end);
            inserted += tx.execute(&sql, rusqlite::params_from_iter(params))? as u64;
            start = end;
        }
        tx.commit()?;
        Ok(inserted)
    }
}

impl BulkWriter for SqliteConnection {
    fn write_columns(
        &mut self,
        table: &TargetTable,
        batch: &ColumnBatch,
        timeout: Duration,
    ) -> Result<u64, StoreError> {
        if batch.columns.len() != table.columns.len() || table.columns.is_empty() {
            return Err(StoreError::rejected(format!(
                "expected {} columns, got {}",
                table.columns.len(),
                batch.columns.len()
            )));
        }
        if batch.row_count == 0 {
            return Ok(0);
        }

        let deadline = Instant::now() + timeout;
        self.conn.busy_timeout(timeout)?;
        self.conn
            .progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));
        let result = self.insert_all(table, batch);
        self.conn.progress_handler(0, None::<fn() -> bool>);

        result.map_err(|e| {
            let err = StoreError::from(e);
            if err.kind == crate::error::StoreErrorKind::Timeout {
                StoreError::timeout(format!("exceeded command timeout of {timeout:?}: {}", err.message))
            } else {
                err
            }
        })
    }
}

impl StoreConnection for SqliteConnection {
    fn ping(&mut self) -> Result<(), StoreError> {
        self.conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn count_by_batch_tag(&mut self, table: &TargetTable, tag: &BatchTag) -> Result<u64, StoreError> {
        let column = table
            .batch_tag_column()
            .ok_or_else(|| StoreError::rejected(format!("{} has no batch tag column", table.name)))?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?1",
            quote_ident(&table.name),
            quote_ident(&column.name)
        );
        let n: i64 = self.conn.query_row(&sql, [tag.as_str()], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }
}

/// Create `table` in the database behind `conn` if it does not exist yet.
pub fn create_table(conn: &Connection, table: &TargetTable) -> Result<(), StoreError> {
    conn.execute_batch(&create_table_sql(table))?;
    Ok(())
}

/// SQLite flavour of the table DDL.
pub fn create_table_sql(table: &TargetTable) -> String {
    let cols = table
        .columns
        .iter()
        .map(|c| {
            let ty = match c.sql_type {
                SqlType::Integer => "INTEGER",
                _ => "TEXT",
            };
            let null = if c.nullable { "" } else { " NOT NULL" };
            format!("    {} {ty}{null}", quote_ident(&c.name))
        })
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{cols}\n);",
        quote_ident(&table.name)
    )
}

/// `INSERT INTO t (c0, c1, ...) VALUES (...), ...` for `rows` rows with column-major placeholders.
fn insert_sql(table: &TargetTable, rows: usize) -> String {
    let cols = table
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let ncols = table.columns.len();

    let mut sql = format!("INSERT INTO {} ({cols}) VALUES ", quote_ident(&table.name));
    for row in 0..rows {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for col in 0..ncols {
            if col > 0 {
                sql.push_str(", ");
            }
            let _ = write!(sql, "?{}", col * rows + row + 1);
        }
        sql.push(')');
    }
    sql
}

/// Parameters for rows `start..end`, every column's slice concatenated in column order.
fn column_major_params(batch: &ColumnBatch, start: usize, end: usize) -> Vec<Value> {
    let mut params = Vec::with_capacity(batch.columns.len() * (end - start));
    for column in &batch.columns {
        match column {
            ColumnArray::Text(v) => {
                params.extend(v[start..end].iter().map(|x| x.clone().map_or(Value::Null, Value::Text)))
            }
            ColumnArray::Integer(v) => {
                params.extend(v[start..end].iter().map(|x| x.map_or(Value::Null, Value::Integer)))
            }
            ColumnArray::Decimal(_) | ColumnArray::Date(_) | ColumnArray::Timestamp(_) => params.extend(
                (start..end).map(|row| column.text_at(row).map_or(Value::Null, Value::Text)),
            ),
        }
    }
    params
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
