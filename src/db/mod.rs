use crate::errors::{AppError, AppResult};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// A generic result row: one JSON value per selected column, in SELECT order.
/// Data sources that feed tables and CSV exports use this shape so the
/// rendering layer never needs to know per-source row types.
pub type DataRow = Vec<serde_json::Value>;

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Fresh private database, used by tests.
    pub fn in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory().map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn execute(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> AppResult<usize> {
        let conn = self.lock()?;
        conn.execute(sql, rusqlite::params_from_iter(params.iter()))
            .map_err(AppError::from)
    }

    pub fn execute_batch(&self, sql: &str) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(sql).map_err(AppError::from)
    }

    /// Run a read query and materialize every row as generic JSON cells.
    pub fn query_rows(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> AppResult<Vec<DataRow>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(sql)?;
        let column_count = statement.column_count();

        let rows = statement.query_map(rusqlite::params_from_iter(params.iter()), |row| {
            let mut cells = Vec::with_capacity(column_count);
            for index in 0..column_count {
                cells.push(cell_to_json(row.get_ref(index)?));
            }
            Ok(cells)
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Run a single-parameter lookup expected to yield at most one row with one
    /// text column. Used for filter display resolution.
    pub fn query_display(&self, sql: &str, value: &dyn rusqlite::ToSql) -> AppResult<Option<String>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(sql)?;
        let mut rows = statement.query(&[value][..])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Run a read query expected to yield at most one row.
    pub fn query_optional_row(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> AppResult<Option<DataRow>> {
        let mut rows = self.query_rows(sql, params)?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.remove(0)))
        }
    }
}

fn cell_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(n) => serde_json::Value::from(n),
        ValueRef::Real(n) => serde_json::Value::from(n),
        ValueRef::Text(text) => serde_json::Value::from(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => serde_json::Value::from(format!("<{} byte blob>", blob.len())),
    }
}
