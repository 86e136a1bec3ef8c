//! MySQL backend.
//!
//! Implements the connection and database contracts on SQLx pools. The
//! connection keeps a server-scoped pool; selecting a database opens a pool
//! scoped to that schema, which is closed again when another database is
//! selected or the connection disconnects.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::mysql::{MySql, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::contract::{Connection, Database, Driver};
use crate::dsn::Dsn;
use crate::error::{Error, Result};
use crate::stmt;
use crate::types::{ColDef, ColType, FetchTableOptions, TableDef, TableKind};
use crate::value::{self, Value};

#[derive(Debug)]
pub struct MySqlDriver;

impl MySqlDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MySqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for MySqlDriver {
    async fn connect(&self, dsn: &str) -> Result<Arc<dyn Connection>> {
        let dsn = Dsn::parse(dsn)?;
        let pool = open_pool(&dsn, None).await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Arc::new(MySqlConnection {
            dsn,
            pool: RwLock::new(pool),
            db_pool: Mutex::new(None),
            last_error: StdMutex::new(None),
        }))
    }
}

fn connection_url(dsn: &Dsn, database: Option<&str>) -> String {
    let mut url = String::from("mysql://");
    if !dsn.user.is_empty() || !dsn.password.is_empty() {
        url.push_str(&dsn.user);
        if !dsn.password.is_empty() {
            url.push(':');
            url.push_str(&dsn.password);
        }
        url.push('@');
    }
    url.push_str(&dsn.address);
    if let Some(db) = database {
        url.push('/');
        url.push_str(db);
    }
    url
}

async fn open_pool(dsn: &Dsn, database: Option<&str>) -> Result<MySqlPool> {
    let url = connection_url(dsn, database);
    let pool = MySqlPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&url)
        .await?;
    Ok(pool)
}

pub struct MySqlConnection {
    dsn: Dsn,
    pool: RwLock<MySqlPool>,
    db_pool: Mutex<Option<MySqlPool>>,
    last_error: StdMutex<Option<String>>,
}

impl MySqlConnection {
    fn record(&self, err: sqlx::Error) -> Error {
        *self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(err.to_string());
        Error::Backend(err)
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn databases(&self) -> Result<Vec<String>> {
        let pool = self.pool.read().await.clone();
        let rows: Vec<(String,)> = sqlx::query_as("SHOW DATABASES")
            .fetch_all(&pool)
            .await
            .map_err(|err| self.record(err))?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn use_database(&self, name: &str) -> Result<Arc<dyn Database>> {
        let pool = open_pool(&self.dsn, Some(name))
            .await
            .map_err(|err| match err {
                Error::Backend(err) => self.record(err),
                other => other,
            })?;

        let mut guard = self.db_pool.lock().await;
        if let Some(old) = guard.take() {
            old.close().await;
        }
        *guard = Some(pool.clone());

        Ok(Arc::new(MySqlDatabase {
            pool,
            name: name.to_owned(),
        }))
    }

    async fn reconnect(&self) -> Result<()> {
        let fresh = open_pool(&self.dsn, None).await.map_err(|err| match err {
            Error::Backend(err) => self.record(err),
            other => other,
        })?;

        let mut guard = self.pool.write().await;
        let old = std::mem::replace(&mut *guard, fresh);
        old.close().await;

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(pool) = self.db_pool.lock().await.take() {
            pool.close().await;
        }
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

pub struct MySqlDatabase {
    pool: MySqlPool,
    name: String,
}

#[async_trait]
impl Database for MySqlDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn tables(&self) -> Result<Vec<TableDef>> {
        // CAST to CHAR avoids a BINARY type mismatch on some server builds.
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT CAST(TABLE_NAME AS CHAR), CAST(TABLE_TYPE AS CHAR)
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = ?
            ORDER BY TABLE_NAME
            "#,
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, table_type)| TableDef {
                name,
                kind: match table_type.as_str() {
                    "VIEW" => TableKind::View,
                    _ => TableKind::Regular,
                },
                query: None,
            })
            .collect())
    }

    async fn table_definition(&self, table: &str) -> Result<Vec<ColDef>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR),
                CAST(COLUMN_TYPE AS CHAR),
                CAST(IS_NULLABLE AS CHAR),
                CAST(COLUMN_KEY AS CHAR)
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
            "#,
        )
        .bind(&self.name)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let fk_rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT CAST(COLUMN_NAME AS CHAR)
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND REFERENCED_TABLE_NAME IS NOT NULL
            "#,
        )
        .bind(&self.name)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;
        let fk_cols: Vec<String> = fk_rows.into_iter().map(|(name,)| name).collect();

        Ok(rows
            .into_iter()
            .map(|(name, column_type, is_nullable, column_key)| {
                let (col_type, precision, values, unsigned) = parse_col_type(&column_type);
                ColDef {
                    fk: fk_cols.contains(&name),
                    pk: column_key == "PRI",
                    nullable: is_nullable == "YES",
                    precision,
                    unsigned,
                    col_type,
                    values,
                    name,
                }
            })
            .collect())
    }

    async fn fetch_table(
        &self,
        table: &str,
        opts: &FetchTableOptions,
    ) -> Result<(Vec<ColDef>, Vec<Vec<Value>>)> {
        let query = stmt::select_page(table, opts, &stmt::order_by(&opts.sort));
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

        Ok(result.last_insert_id().to_string())
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

        Ok(result.last_insert_id().to_string())
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

        self.fetch_record(table, pk, result.last_insert_id()).await
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
                    Value::Int(result.last_insert_id() as i64),
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
        Ok((result.last_insert_id().to_string(), result.rows_affected()))
    }

    async fn get_create_table(&self, table: &str) -> Result<String> {
        let query = format!("SHOW CREATE TABLE {}", stmt::quote_ident(table));
        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        Ok(row.try_get::<String, _>(1)?)
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

        let query = format!("TRUNCATE TABLE {}", stmt::quote_ident(&table.name));
        debug!(%query);
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}

impl MySqlDatabase {
    async fn fetch_record(&self, table: &str, pk: &ColDef, id: u64) -> Result<Vec<Value>> {
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
    ["SELECT", "SHOW", "DESCRIBE", "EXPLAIN", "WITH"]
        .iter()
        .any(|prefix| upper.starts_with(prefix))
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments> {
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

fn convert_row(row: &MySqlRow) -> Vec<Value> {
    row.columns()
        .iter()
        .map(|col| extract_value(row, col.ordinal()))
        .collect()
}

/// Decodes one cell into the universal value type, trying the native types
/// a MySQL column can carry from narrowest to widest.
fn extract_value(row: &MySqlRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::Int).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(|i| Value::Int(i.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
        return v.map(|u| Value::Int(u.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return v.map(|i| Value::Int(i.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<u16>, _>(idx) {
        return v.map(|u| Value::Int(u.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
        return v.map(|i| Value::Int(i.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<u8>, _>(idx) {
        return v.map(|u| Value::Int(u.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(Value::Bool).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(Value::Float).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return v.map(|f| Value::Float(f.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Decimal>, _>(idx) {
        return v
            .map(|d| Value::Float(d.to_f64().unwrap_or(0.0)))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::Text).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
        return v
            .map(|dt| Value::Text(dt.to_rfc3339()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
        return v
            .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
        return v
            .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
        return v
            .map(|t| Value::Text(t.format("%H:%M:%S").to_string()))
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map(Value::Bytes).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
        return v.map(Value::Json).unwrap_or(Value::Null);
    }

    Value::Null
}

static TYPE_RE: OnceLock<Regex> = OnceLock::new();

fn type_re() -> &'static Regex {
    TYPE_RE.get_or_init(|| {
        Regex::new(r"^([a-z ]+?)\s*(?:\((.+)\))?$").expect("type pattern is valid")
    })
}

/// Decomposes a native column-type string (`varchar(255)`, `int unsigned`,
/// `enum('a','b')`, …) into canonical type, precision, enum literals and the
/// unsigned flag.
pub(crate) fn parse_col_type(raw: &str) -> (ColType, u32, Vec<String>, bool) {
    let mut normalized = raw.trim().to_ascii_lowercase();
    let unsigned = normalized.contains("unsigned");
    if unsigned {
        normalized = normalized.replace(" unsigned", "");
    }
    normalized = normalized.replace(" zerofill", "");

    let (base, inner) = match type_re().captures(&normalized) {
        Some(caps) => (
            caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default(),
            caps.get(2).map(|m| m.as_str().to_owned()),
        ),
        None => (normalized.as_str(), None),
    };

    let precision = inner
        .as_deref()
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);

    let col_type = match base {
        "tinyint" if precision == 1 => ColType::Boolean,
        "bool" | "boolean" => ColType::Boolean,
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" => ColType::Int,
        "float" | "double" | "decimal" | "numeric" | "real" => ColType::Float,
        "enum" | "set" => ColType::List,
        "date" | "datetime" | "timestamp" | "time" | "year" => ColType::Date,
        "char" | "varchar" => ColType::String,
        "tinytext" | "text" | "mediumtext" | "longtext" | "json" | "binary" | "varbinary"
        | "tinyblob" | "blob" | "mediumblob" | "longblob" => ColType::LongString,
        _ => ColType::String,
    };

    let values = if col_type == ColType::List {
        inner
            .as_deref()
            .map(|s| {
                s.split(',')
                    .map(|item| item.trim().trim_matches('\'').to_owned())
                    .collect()
            })
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    (col_type, precision, values, unsigned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varchar_carries_its_length() {
        let (col_type, precision, values, unsigned) = parse_col_type("varchar(255)");
        assert_eq!(col_type, ColType::String);
        assert_eq!(precision, 255);
        assert!(values.is_empty());
        assert!(!unsigned);
    }

    #[test]
    fn unsigned_int_sets_the_flag() {
        let (col_type, _, _, unsigned) = parse_col_type("int unsigned");
        assert_eq!(col_type, ColType::Int);
        assert!(unsigned);

        let (col_type, precision, _, unsigned) = parse_col_type("bigint(20) unsigned");
        assert_eq!(col_type, ColType::Int);
        assert_eq!(precision, 20);
        assert!(unsigned);
    }

    #[test]
    fn enums_expose_their_literals() {
        let (col_type, _, values, _) = parse_col_type("enum('small','medium','large')");
        assert_eq!(col_type, ColType::List);
        assert_eq!(values, vec!["small", "medium", "large"]);
    }

    #[test]
    fn tinyint_1_is_boolean() {
        let (col_type, _, _, _) = parse_col_type("tinyint(1)");
        assert_eq!(col_type, ColType::Boolean);

        let (col_type, _, _, _) = parse_col_type("tinyint(4)");
        assert_eq!(col_type, ColType::Int);
    }

    #[test]
    fn temporal_and_text_types_map_to_canonical_kinds() {
        assert_eq!(parse_col_type("datetime").0, ColType::Date);
        assert_eq!(parse_col_type("decimal(10,2)").0, ColType::Float);
        assert_eq!(parse_col_type("longtext").0, ColType::LongString);
        assert_eq!(parse_col_type("geometry").0, ColType::String);
    }

    #[test]
    fn result_set_statements_are_recognized() {
        assert!(is_result_set("SELECT * FROM t"));
        assert!(is_result_set("  show tables"));
        assert!(!is_result_set("INSERT INTO t VALUES (1)"));
    }
}
