//! Generic CRUD, condition and sort statement building.
//!
//! Identifiers are backtick-quoted and positional `?` placeholders are used
//! by both supported backends, so the builders here are dialect-free; the
//! drivers bind the returned argument lists themselves.

use crate::error::{Error, Result};
use crate::types::{ColDef, CondStmt, Operator, SortDirection, SortOption};
use crate::value::Value;

pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn quote_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Renders a value as a SQL literal for ad-hoc fragments and exports.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_owned(),
        Value::Bool(true) => "1".to_owned(),
        Value::Bool(false) => "0".to_owned(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => quote_str(s),
        Value::Bytes(b) => {
            let mut hex = String::with_capacity(b.len() * 2);
            for byte in b {
                hex.push_str(&format!("{byte:02X}"));
            }
            format!("X'{hex}'")
        }
        Value::Json(j) => quote_str(&j.to_string()),
    }
}

/// `INSERT INTO table(cols) VALUES (?, …)`.
pub fn insert(table: &str, defs: &[ColDef]) -> Result<String> {
    if defs.is_empty() {
        return Err(Error::MissingKeys);
    }

    let cols: Vec<String> = defs.iter().map(|d| quote_ident(&d.name)).collect();
    let marks = vec!["?"; defs.len()].join(", ");

    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        cols.join(", "),
        marks
    ))
}

/// A complete INSERT with literal values, for copy/export.
pub fn insert_literal(table: &str, defs: &[ColDef], values: &[Value]) -> Result<String> {
    if defs.is_empty() {
        return Err(Error::MissingKeys);
    }
    if defs.len() != values.len() {
        return Err(Error::ColumnMismatch);
    }

    let cols: Vec<String> = defs.iter().map(|d| quote_ident(&d.name)).collect();
    let rendered: Vec<String> = values.iter().map(literal).collect();

    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({});",
        quote_ident(table),
        cols.join(", "),
        rendered.join(", ")
    ))
}

/// `DELETE FROM table WHERE col = ? AND …` over all supplied columns.
pub fn delete(table: &str, defs: &[ColDef]) -> Result<String> {
    if defs.is_empty() {
        return Err(Error::MissingKeys);
    }

    let wheres: Vec<String> = defs
        .iter()
        .map(|d| format!("{} = ?", quote_ident(&d.name)))
        .collect();

    Ok(format!(
        "DELETE FROM {} WHERE {}",
        quote_ident(table),
        wheres.join(" AND ")
    ))
}

/// Full-row update keyed by primary key.
///
/// Emits one SET term per column whose value differs from its prior value
/// and binds the WHERE clause to the *old* primary-key value. Returns
/// `None` when nothing changed, so callers skip the round trip entirely.
pub fn update_record(
    table: &str,
    defs: &[ColDef],
    values: &[Value],
    old_values: &[Value],
) -> Result<Option<(String, Vec<Value>)>> {
    if defs.len() != values.len() || values.len() != old_values.len() {
        return Err(Error::ColumnMismatch);
    }

    let pk = defs.iter().find(|d| d.pk).ok_or(Error::NoPrimaryKey)?;

    let mut sets = Vec::new();
    let mut args = Vec::new();
    let mut id = Value::Null;

    for i in 0..defs.len() {
        if defs[i].pk {
            id = old_values[i].clone();
        }
        if old_values[i] == values[i] {
            continue;
        }
        sets.push(format!("{} = ?", quote_ident(&defs[i].name)));
        args.push(values[i].clone());
    }

    if sets.is_empty() {
        return Ok(None);
    }

    args.push(id);

    Ok(Some((
        format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote_ident(table),
            sets.join(", "),
            quote_ident(&pk.name)
        ),
        args,
    )))
}

/// Partial update: explicit key columns and explicit changed columns.
pub fn update_fields(
    table: &str,
    keys: &[ColDef],
    key_values: &[Value],
    changes: &[ColDef],
    change_values: &[Value],
) -> Result<(String, Vec<Value>)> {
    if keys.len() != key_values.len() || changes.len() != change_values.len() {
        return Err(Error::ColumnMismatch);
    }
    if keys.is_empty() || changes.is_empty() {
        return Err(Error::MissingKeys);
    }

    let sets: Vec<String> = changes
        .iter()
        .map(|d| format!("{} = ?", quote_ident(&d.name)))
        .collect();
    let wheres: Vec<String> = keys
        .iter()
        .map(|d| format!("{} = ?", quote_ident(&d.name)))
        .collect();

    let mut args = Vec::with_capacity(changes.len() + keys.len());
    args.extend(change_values.iter().cloned());
    args.extend(key_values.iter().cloned());

    Ok((
        format!(
            "UPDATE {} SET {} WHERE {}",
            quote_ident(table),
            sets.join(", "),
            wheres.join(" AND ")
        ),
        args,
    ))
}

/// Renders condition fragments into a `WHERE …` clause, empty when no
/// usable fragment remains.
pub fn where_clause(conditions: &[CondStmt]) -> String {
    let mut wheres = Vec::new();

    for cond in conditions {
        if cond.field.name.is_empty() {
            continue;
        }

        let col = quote_ident(&cond.field.name);
        match cond.op {
            Operator::IsNull => wheres.push(format!("{col} IS NULL")),
            Operator::IsNotNull => wheres.push(format!("{col} IS NOT NULL")),
            Operator::In | Operator::Nin => {
                let items: Vec<String> = cond.value.split(',').map(quote_str).collect();
                wheres.push(format!("{col} {} ({})", cond.op.as_sql(), items.join(", ")));
            }
            _ => wheres.push(format!("{col} {} {}", cond.op.as_sql(), quote_str(&cond.value))),
        }
    }

    if wheres.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", wheres.join(" AND "))
    }
}

/// Renders sort options into an `ORDER BY …` clause, preserving caller
/// order as the tie-break priority.
pub fn order_by(sorts: &[SortOption]) -> String {
    if sorts.is_empty() {
        return String::new();
    }

    let terms: Vec<String> = sorts
        .iter()
        .map(|sort| {
            let dir = match sort.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            format!("{} {}", quote_ident(&sort.column.name), dir)
        })
        .collect();

    format!("ORDER BY {}", terms.join(", "))
}

/// `SELECT * FROM table [WHERE …] [order] LIMIT offset, limit`.
pub fn select_page(table: &str, opts: &crate::types::FetchTableOptions, order_sql: &str) -> String {
    let mut query = format!("SELECT * FROM {}", quote_ident(table));

    let where_sql = where_clause(&opts.conditions);
    if !where_sql.is_empty() {
        query.push(' ');
        query.push_str(&where_sql);
    }
    if !order_sql.is_empty() {
        query.push(' ');
        query.push_str(order_sql);
    }

    query.push_str(&format!(" LIMIT {}, {}", opts.offset, opts.limit));
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FetchTableOptions;

    fn pk(name: &str) -> ColDef {
        ColDef {
            pk: true,
            ..ColDef::named(name)
        }
    }

    #[test]
    fn insert_builds_placeholders_per_column() {
        let sql = insert("users", &[ColDef::named("id"), ColDef::named("name")])
            .expect("should build");
        assert_eq!(sql, "INSERT INTO `users` (`id`, `name`) VALUES (?, ?)");
    }

    #[test]
    fn insert_with_no_columns_fails() {
        assert!(matches!(insert("users", &[]), Err(Error::MissingKeys)));
    }

    #[test]
    fn update_record_sets_only_changed_columns_and_binds_old_id() {
        let defs = [pk("id"), ColDef::named("name"), ColDef::named("email")];
        let values = [
            Value::Int(1),
            Value::Text("after".into()),
            Value::Text("same@x".into()),
        ];
        let old_values = [
            Value::Int(1),
            Value::Text("before".into()),
            Value::Text("same@x".into()),
        ];

        let (sql, args) = update_record("users", &defs, &values, &old_values)
            .expect("should build")
            .expect("has changes");

        assert_eq!(sql, "UPDATE `users` SET `name` = ? WHERE `id` = ?");
        assert_eq!(args, vec![Value::Text("after".into()), Value::Int(1)]);
    }

    #[test]
    fn update_record_reassigns_a_changed_primary_key() {
        let defs = [pk("id")];
        let (sql, args) = update_record("users", &defs, &[Value::Int(2)], &[Value::Int(1)])
            .expect("should build")
            .expect("has changes");

        assert_eq!(sql, "UPDATE `users` SET `id` = ? WHERE `id` = ?");
        assert_eq!(args, vec![Value::Int(2), Value::Int(1)]);
    }

    #[test]
    fn update_record_with_no_changes_builds_nothing() {
        let defs = [pk("id"), ColDef::named("name")];
        let values = [Value::Int(1), Value::Text("same".into())];

        let built = update_record("users", &defs, &values, &values).expect("should build");
        assert!(built.is_none());
    }

    #[test]
    fn update_record_without_primary_key_fails() {
        let defs = [ColDef::named("name")];
        assert!(matches!(
            update_record("users", &defs, &[Value::Null], &[Value::Null]),
            Err(Error::NoPrimaryKey)
        ));
    }

    #[test]
    fn update_fields_requires_keys_and_changes() {
        assert!(matches!(
            update_fields("users", &[], &[], &[ColDef::named("name")], &[Value::Null]),
            Err(Error::MissingKeys)
        ));
        assert!(matches!(
            update_fields("users", &[pk("id")], &[Value::Int(1)], &[], &[]),
            Err(Error::MissingKeys)
        ));
    }

    #[test]
    fn update_fields_orders_changes_before_keys() {
        let (sql, args) = update_fields(
            "users",
            &[pk("id")],
            &[Value::Int(7)],
            &[ColDef::named("name")],
            &[Value::Text("x".into())],
        )
        .expect("should build");

        assert_eq!(sql, "UPDATE `users` SET `name` = ? WHERE `id` = ?");
        assert_eq!(args, vec![Value::Text("x".into()), Value::Int(7)]);
    }

    #[test]
    fn delete_ands_all_supplied_columns() {
        let sql = delete("users", &[ColDef::named("a"), ColDef::named("b")])
            .expect("should build");
        assert_eq!(sql, "DELETE FROM `users` WHERE `a` = ? AND `b` = ?");
    }

    #[test]
    fn in_condition_quotes_each_item() {
        let clause = where_clause(&[CondStmt {
            field: ColDef::named("id"),
            op: Operator::In,
            value: "1,2,3".into(),
        }]);
        assert_eq!(clause, "WHERE `id` IN ('1', '2', '3')");
    }

    #[test]
    fn is_null_condition_ignores_its_value() {
        let clause = where_clause(&[CondStmt {
            field: ColDef::named("deleted_at"),
            op: Operator::IsNull,
            value: "ignored".into(),
        }]);
        assert_eq!(clause, "WHERE `deleted_at` IS NULL");
    }

    #[test]
    fn fragments_without_a_column_are_skipped() {
        let clause = where_clause(&[CondStmt {
            field: ColDef::named(""),
            op: Operator::Eq,
            value: "x".into(),
        }]);
        assert_eq!(clause, "");
    }

    #[test]
    fn order_by_preserves_caller_order_and_directions() {
        let clause = order_by(&[
            SortOption {
                column: ColDef::named("a"),
                direction: SortDirection::Asc,
            },
            SortOption {
                column: ColDef::named("b"),
                direction: SortDirection::Desc,
            },
        ]);
        assert_eq!(clause, "ORDER BY `a` ASC, `b` DESC");
    }

    #[test]
    fn select_page_composes_all_fragments() {
        let opts = FetchTableOptions {
            offset: 20,
            limit: 10,
            sort: vec![],
            conditions: vec![CondStmt {
                field: ColDef::named("age"),
                op: Operator::Gte,
                value: "21".into(),
            }],
        };
        let query = select_page("users", &opts, "");
        assert_eq!(
            query,
            "SELECT * FROM `users` WHERE `age` >= '21' LIMIT 20, 10"
        );
    }

    #[test]
    fn literals_escape_embedded_quotes() {
        assert_eq!(literal(&Value::Text("o'clock".into())), "'o''clock'");
        assert_eq!(literal(&Value::Null), "NULL");
        assert_eq!(literal(&Value::Bool(true)), "1");
        assert_eq!(literal(&Value::Bytes(vec![0xAB, 0x01])), "X'AB01'");
    }

    #[test]
    fn insert_literal_renders_each_value() {
        let sql = insert_literal(
            "users",
            &[ColDef::named("id"), ColDef::named("name")],
            &[Value::Int(1), Value::Text("ada".into())],
        )
        .expect("should build");
        assert_eq!(sql, "INSERT INTO `users` (`id`, `name`) VALUES (1, 'ada');");
    }
}
