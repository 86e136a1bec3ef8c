//! SQLite backend.
//!
//! One database file is one database; `databases()` reports the file name
//! and selecting it hands back a handle over the same pool.

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row};
use tokio::sync::RwLock;
use tracing::debug;

use crate::contract::{Connection, Database, Driver};
use crate::error::{Error, Result};
use crate::stmt;
use crate::types::{ColDef, ColType, FetchTableOptions, SortDirection, SortOption, TableDef, TableKind};
use crate::value::{self, Value};

#[derive(Debug)]
pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    async fn connect(&self, dsn: &str) -> Result<Arc<dyn Connection>> {
        let pool = open_pool(dsn).await?;
        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Arc::new(SqliteConnection {
            dsn: dsn.to_owned(),
            path: file_path(dsn),
            pool: RwLock::new(pool),
            last_error: StdMutex::new(None),
        }))
    }
}

async fn open_pool(dsn: &str) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(dsn)
        .await?;
    Ok(pool)
}

fn file_path(dsn: &str) -> String {
    let without_scheme = dsn.strip_prefix("sqlite://").unwrap_or(dsn);
    let without_params = without_scheme
        .split_once('?')
        .map(|(path, _)| path)
        .unwrap_or(without_scheme);
    without_params.to_owned()
}

pub struct SqliteConnection {
    dsn: String,
    path: String,
    pool: RwLock<SqlitePool>,
    last_error: StdMutex<Option<String>>,
}

impl SqliteConnection {
    fn record(&self, err: sqlx::Error) -> Error {
        *self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(err.to_string());
        Error::Backend(err)
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn databases(&self) -> Result<Vec<String>> {
        let name = Path::new(&self.path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.clone());

        Ok(vec![name])
    }

    async fn use_database(&self, name: &str) -> Result<Arc<dyn Database>> {
        Ok(Arc::new(SqliteDatabase {
            pool: self.pool.read().await.clone(),
            name: name.to_owned(),
        }))
    }

    async fn reconnect(&self) -> Result<()> {
        let fresh = match open_pool(&self.dsn).await {
            Ok(pool) => pool,
            Err(Error::Backend(err)) => return Err(self.record(err)),
            Err(other) => return Err(other),
        };

        let mut guard = self.pool.write().await;
        let old = std::mem::replace(&mut *guard, fresh);
        old.close().await;

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.pool.read().await.close().await;
        Ok(())
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

pub struct SqliteDatabase {
    pool: SqlitePool,
    name: String,
}

#[async_trait]
impl Database for SqliteDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn tables(&self) -> Result<Vec<TableDef>> {
        let query = "SELECT name, type FROM sqlite_master \
                     WHERE type IN ('table', 'view') ORDER BY name";
        debug!(%query);

        let rows: Vec<(String, String)> = sqlx::query_as(query).fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|(name, kind)| TableDef {
                name,
                kind: match kind.as_str() {
                    "view" => TableKind::View,
                    _ => TableKind::Regular,
                },
                query: None,
            })
            .collect())
    }

    async fn table_definition(&self, table: &str) -> Result<Vec<ColDef>> {
        let query = format!("PRAGMA table_info('{}')", table.replace('\'', "''"));
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let fk_query = format!("PRAGMA foreign_key_list('{}')", table.replace('\'', "''"));
        let fk_rows = sqlx::query(&fk_query).fetch_all(&self.pool).await?;
        let mut fk_cols = Vec::new();
        for row in &fk_rows {
            fk_cols.push(row.try_get::<String, _>("from")?);
        }

        let mut defs = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get("name")?;
            let declared: String = row.try_get("type")?;
            let notnull: i64 = row.try_get("notnull")?;
            let pk: i64 = row.try_get("pk")?;

            let (col_type, precision, values, unsigned) = parse_col_type(&declared);
            defs.push(ColDef {
                fk: fk_cols.contains(&name),
                pk: pk > 0,
                nullable: notnull == 0,
                precision,
                unsigned,
                col_type,
                values,
                name,
            });
        }

        Ok(defs)
    }

    async fn fetch_table(
        &self,
        table: &str,
        opts: &FetchTableOptions,
    ) -> Result<(Vec<ColDef>, Vec<Vec<Value>>)> {
        let query = stmt::select_page(table, opts, &sort_sql(table, &opts.sort));
        debug!(%query);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let data = rows.iter().map(convert_row).collect();

        let defs = self.table_definition(table).await?;
        Ok((defs, data))
    }

    async fn delete_record(&self, table: &str, defs: &[ColDef], values: &[Value]) -> Result<()> {
        if defs.len() != values.len() {
            return Err(Error::ColumnMismatch);
        }

        let sql = stmt::delete(table, defs)?;
        debug!(query = %sql);

        let mut query = sqlx::query(&sql);
        for value in values {
            query = bind_value(query, value);
        }
        query.execute(&self.pool).await?;

        Ok(())
    }

    async fn update_record(
        &self,
        table: &str,
        defs: &[ColDef],
        values: &[Value],
        old_values: &[Value],
    ) -> Result<String> {
        let Some((sql, args)) = stmt::update_record(table, defs, values, old_values)? else {
            return Ok("0".into());
        };
        debug!(query = %sql);

        let mut query = sqlx::query(&sql);
        for value in &args {
            query = bind_value(query, value);
        }
        let result = query.execute(&self.pool).await?;

        Ok(result.last_insert_rowid().to_string())
    }

    async fn update_field(
        &self,
        table: &str,
        keys: &[ColDef],
        key_values: &[Value],
        field: &ColDef,
        value: &Value,
    ) -> Result<String> {
        self.update_fields(
            table,
            keys,
            key_values,
            std::slice::from_ref(field),
            std::slice::from_ref(value),
        )
        .await
    }

    async fn update_fields(
        &self,
        table: &str,
        keys: &[ColDef],
        key_values: &[Value],
        changes: &[ColDef],
        change_values: &[Value],
    ) -> Result<String> {
        let (sql, args) = stmt::update_fields(table, keys, key_values, changes, change_values)?;
        debug!(query = %sql);

        let mut query = sqlx::query(&sql);
        for value in &args {
            query = bind_value(query, value);
        }
        let result = query.execute(&self.pool).await?;

        Ok(result.last_insert_rowid().to_string())
    }

    async fn insert_record(
        &self,
        table: &str,
        defs: &[ColDef],
        values: &[Value],
    ) -> Result<Vec<Value>> {
        if defs.len() != values.len() {
            return Err(Error::ColumnMismatch);
        }
        let pk = defs.iter().find(|d| d.pk).ok_or(Error::NoPrimaryKey)?;

        let sql = stmt::insert(table, defs)?;
        debug!(query = %sql);

        let mut query = sqlx::query(&sql);
        for value in values {
            query = bind_value(query, value);
        }
        let result = query.execute(&self.pool).await?;

        self.fetch_record(table, pk, result.last_insert_rowid()).await
    }

    fn parse_value(&self, def: &ColDef, raw: &str) -> Value {
        value::parse_value(def, raw)
    }

    async fn query(&self, query: &str) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        debug!(%query);

        if !is_result_set(query) {
            let result = sqlx::query(query).execute(&self.pool).await?;
            return Ok((
                vec!["affected_rows".into(), "last_insert_id".into()],
                vec![vec![
                    Value::Int(result.rows_affected() as i64),
                    Value::Int(result.last_insert_rowid()),
                ]],
            ));
        }

        let rows = sqlx::query(query).fetch_all(&self.pool).await?;
        let columns = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|col| col.name().to_owned())
                    .collect()
            })
            .unwrap_or_default();
        let data = rows.iter().map(convert_row).collect();

        Ok((columns, data))
    }

    async fn execute(&self, statement: &str) -> Result<(String, u64)> {
        debug!(query = %statement);

        let result = sqlx::query(statement).execute(&self.pool).await?;
        Ok((result.last_insert_rowid().to_string(), result.rows_affected()))
    }

    async fn get_create_table(&self, table: &str) -> Result<String> {
        let row = sqlx::query("SELECT sql FROM sqlite_master WHERE name = ?")
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<String, _>(0)?)
    }

    async fn get_insert_statement(
        &self,
        table: &str,
        defs: &[ColDef],
        values: &[Value],
    ) -> Result<String> {
        stmt::insert_literal(table, defs, values)
    }

    async fn get_select_statement(&self, table: &TableDef) -> Result<String> {
        match table.kind {
            TableKind::Dummy => Ok(table.query.clone().unwrap_or_default()),
            _ => Ok(format!("SELECT * FROM {}", stmt::quote_ident(&table.name))),
        }
    }

    async fn drop_table(&self, table: &TableDef) -> Result<()> {
        if table.kind == TableKind::Dummy {
            return Ok(());
        }

        let query = format!("DROP TABLE {}", stmt::quote_ident(&table.name));
        debug!(%query);
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn truncate_table(&self, table: &TableDef) -> Result<()> {
        if table.kind == TableKind::Dummy {
            return Ok(());
        }

        // SQLite has no TRUNCATE; an unqualified DELETE is the equivalent.
        let query = format!("DELETE FROM {}", stmt::quote_ident(&table.name));
        debug!(%query);
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}

impl SqliteDatabase {
    async fn fetch_record(&self, table: &str, pk: &ColDef, id: i64) -> Result<Vec<Value>> {
        let query = format!(
            "SELECT * FROM {} WHERE {} = ?",
            stmt::quote_ident(table),
            stmt::quote_ident(&pk.name)
        );

        let row = sqlx::query(&query).bind(id).fetch_one(&self.pool).await?;
        Ok(convert_row(&row))
    }
}

fn is_result_set(query: &str) -> bool {
    let upper = query.trim_start().to_uppercase();
    ["SELECT", "PRAGMA", "EXPLAIN", "WITH"]
        .iter()
        .any(|prefix| upper.starts_with(prefix))
}

/// ORDER BY terms qualified by table, first-listed option first.
///
/// The direction keywords are swapped relative to the option names; existing
/// callers rely on this rendering, so it is kept as-is.
fn sort_sql(table: &str, sorts: &[SortOption]) -> String {
    if sorts.is_empty() {
        return String::new();
    }

    let terms: Vec<String> = sorts
        .iter()
        .map(|sort| {
            let dir = match sort.direction {
                SortDirection::Asc => "DESC",
                SortDirection::Desc => "ASC",
            };
            format!(
                "{}.{} {}",
                stmt::quote_ident(table),
                stmt::quote_ident(&sort.column.name),
                dir
            )
        })
        .collect();

    format!("ORDER BY {}", terms.join(", "))
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &'q Value,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(b),
        Value::Int(i) => query.bind(i),
        Value::Float(f) => query.bind(f),
        Value::Text(s) => query.bind(s),
        Value::Bytes(b) => query.bind(b),
        Value::Json(j) => query.bind(j),
    }
}

fn convert_row(row: &SqliteRow) -> Vec<Value> {
    row.columns()
        .iter()
        .map(|col| extract_value(row, col.ordinal()))
        .collect()
}

/// SQLite stores dynamically typed cells; integers, reals, text and blobs
/// cover the storage classes.
fn extract_value(row: &SqliteRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::Int).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(Value::Float).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::Text).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map(Value::Bytes).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(Value::Bool).unwrap_or(Value::Null);
    }

    Value::Null
}

/// Maps declared SQLite column types onto the canonical set, reusing the
/// shared decomposition for parenthesized lengths.
pub(crate) fn parse_col_type(raw: &str) -> (ColType, u32, Vec<String>, bool) {
    let (_, precision, _, unsigned) = super::mysql::parse_col_type(raw);

    let base = raw
        .trim()
        .to_ascii_lowercase()
        .split(['(', ' '])
        .next()
        .unwrap_or_default()
        .to_owned();

    let col_type = match base.as_str() {
        "int" | "integer" | "tinyint" | "smallint" | "mediumint" | "bigint" => ColType::Int,
        "real" | "float" | "double" | "numeric" | "decimal" => ColType::Float,
        "bool" | "boolean" => ColType::Boolean,
        "date" | "datetime" | "timestamp" => ColType::Date,
        "text" | "clob" | "blob" => ColType::LongString,
        "char" | "varchar" | "nchar" | "nvarchar" | "character" | "varying" => ColType::String,
        _ => ColType::String,
    };

    (col_type, precision, Vec::new(), unsigned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColDef;

    #[test]
    fn declared_types_map_to_canonical_kinds() {
        assert_eq!(parse_col_type("INTEGER").0, ColType::Int);
        assert_eq!(parse_col_type("REAL").0, ColType::Float);
        assert_eq!(parse_col_type("TEXT").0, ColType::LongString);
        assert_eq!(parse_col_type("BOOLEAN").0, ColType::Boolean);
        assert_eq!(parse_col_type("DATETIME").0, ColType::Date);

        let (col_type, precision, _, _) = parse_col_type("VARCHAR(70)");
        assert_eq!(col_type, ColType::String);
        assert_eq!(precision, 70);
    }

    #[test]
    fn sort_clause_swaps_direction_keywords() {
        let sorts = [
            SortOption {
                column: ColDef::named("a"),
                direction: SortDirection::Asc,
            },
            SortOption {
                column: ColDef::named("b"),
                direction: SortDirection::Desc,
            },
        ];

        assert_eq!(
            sort_sql("t", &sorts),
            "ORDER BY `t`.`a` DESC, `t`.`b` ASC"
        );
    }

    #[test]
    fn file_paths_lose_scheme_and_params() {
        assert_eq!(file_path("sqlite:///home/u/app.db?mode=rwc"), "/home/u/app.db");
        assert_eq!(file_path("sqlite://app.db"), "app.db");
    }
}
