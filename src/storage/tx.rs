//! The transaction capability.
//!
//! A [`TxWrap`] exists only inside [`Store::with_tx`](super::Store::with_tx).
//! Holding one is proof that the caller is inside a transaction, so every
//! multi-statement operation in this crate takes `&TxWrap` and composes
//! freely without opening a transaction of its own.

use crate::Result;
use rusqlite::{OptionalExtension, Params, Row, Transaction};

/// Build a value from one result row.
pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Exclusive handle on an open transaction.
pub struct TxWrap<'a> {
    tx: &'a Transaction<'a>,
}

impl<'a> TxWrap<'a> {
    pub(crate) fn new(tx: &'a Transaction<'a>) -> Self {
        Self { tx }
    }

    /// First column of the first row as an integer; no rows yields 0.
    pub fn get_int<P: Params>(&self, sql: &str, params: P) -> Result<i64> {
        let value: Option<Option<i64>> = self
            .tx
            .query_row(sql, params, |row| row.get(0))
            .optional()?;
        Ok(value.flatten().unwrap_or(0))
    }

    /// First column of the first row as text; no rows yields `None`.
    pub fn get_string<P: Params>(&self, sql: &str, params: P) -> Result<Option<String>> {
        let value: Option<Option<String>> = self
            .tx
            .query_row(sql, params, |row| row.get(0))
            .optional()?;
        Ok(value.flatten())
    }

    /// Whether the query returns at least one row.
    pub fn exists<P: Params>(&self, sql: &str, params: P) -> Result<bool> {
        let mut stmt = self.tx.prepare(sql)?;
        Ok(stmt.exists(params)?)
    }

    /// The first row, or `None` when the query returns nothing.
    pub fn get_row<T: FromRow, P: Params>(&self, sql: &str, params: P) -> Result<Option<T>> {
        Ok(self.tx.query_row(sql, params, T::from_row).optional()?)
    }

    pub fn select<T: FromRow, P: Params>(&self, sql: &str, params: P) -> Result<Vec<T>> {
        let mut stmt = self.tx.prepare(sql)?;
        let rows = stmt.query_map(params, T::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn select_strings<P: Params>(&self, sql: &str, params: P) -> Result<Vec<String>> {
        let mut stmt = self.tx.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    /// Execute a statement, returning the number of changed rows.
    pub fn exec<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        Ok(self.tx.execute(sql, params)?)
    }
}
