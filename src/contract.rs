//! The per-backend contracts.
//!
//! Every backend implements these three traits; callers never branch on
//! backend identity. A [`Connection`] is a live authenticated session, a
//! [`Database`] is that session scoped to one selected schema.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ColDef, FetchTableOptions, TableDef};
use crate::value::Value;

/// A registered backend implementation.
#[async_trait]
pub trait Driver: Send + Sync + std::fmt::Debug {
    /// Opens a live connection from a scheme-prefixed address string.
    async fn connect(&self, dsn: &str) -> Result<Arc<dyn Connection>>;
}

/// A live authenticated backend session.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Lists the databases reachable through this connection.
    async fn databases(&self) -> Result<Vec<String>>;

    /// Derives a session scoped to one schema.
    ///
    /// The handle has no independent teardown; it is discarded when this
    /// connection disconnects or a different database is selected.
    async fn use_database(&self, name: &str) -> Result<Arc<dyn Database>>;

    /// Re-establishes the backend session in place after a transient
    /// failure.
    async fn reconnect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn last_error(&self) -> Option<String>;
}

/// A backend session scoped to one selected schema.
#[async_trait]
pub trait Database: Send + Sync {
    fn name(&self) -> &str;

    async fn tables(&self) -> Result<Vec<TableDef>>;

    async fn table_definition(&self, table: &str) -> Result<Vec<ColDef>>;

    /// Fetches one page of rows plus the column definitions describing them.
    async fn fetch_table(
        &self,
        table: &str,
        opts: &FetchTableOptions,
    ) -> Result<(Vec<ColDef>, Vec<Vec<Value>>)>;

    /// Deletes the rows matching equality over all supplied columns.
    async fn delete_record(&self, table: &str, defs: &[ColDef], values: &[Value]) -> Result<()>;

    /// Full row replace keyed by primary key; returns the backend's last
    /// insert id as text.
    async fn update_record(
        &self,
        table: &str,
        defs: &[ColDef],
        values: &[Value],
        old_values: &[Value],
    ) -> Result<String>;

    /// Partial update of a single column, with explicit key columns.
    async fn update_field(
        &self,
        table: &str,
        keys: &[ColDef],
        key_values: &[Value],
        field: &ColDef,
        value: &Value,
    ) -> Result<String>;

    /// Partial update of several columns, with explicit key columns.
    async fn update_fields(
        &self,
        table: &str,
        keys: &[ColDef],
        key_values: &[Value],
        changes: &[ColDef],
        change_values: &[Value],
    ) -> Result<String>;

    /// Inserts a row and returns it re-fetched by primary key, so
    /// backend-generated values come back canonical.
    async fn insert_record(
        &self,
        table: &str,
        defs: &[ColDef],
        values: &[Value],
    ) -> Result<Vec<Value>>;

    /// Converts user-typed text into the value this backend expects.
    fn parse_value(&self, def: &ColDef, raw: &str) -> Value;

    /// Runs a raw query verbatim and returns column names plus rows.
    async fn query(&self, query: &str) -> Result<(Vec<String>, Vec<Vec<Value>>)>;

    /// Runs a raw statement verbatim; returns the last insert id as text and
    /// the affected row count.
    async fn execute(&self, statement: &str) -> Result<(String, u64)>;

    async fn get_create_table(&self, table: &str) -> Result<String>;

    /// Renders a complete INSERT statement for copy/export.
    async fn get_insert_statement(
        &self,
        table: &str,
        defs: &[ColDef],
        values: &[Value],
    ) -> Result<String>;

    async fn get_select_statement(&self, table: &TableDef) -> Result<String>;

    async fn drop_table(&self, table: &TableDef) -> Result<()>;

    async fn truncate_table(&self, table: &TableDef) -> Result<()>;
}
