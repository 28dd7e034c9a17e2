//! SQL migration generation from the schema descriptor.
//!
//! The generator diffs the desired schema against what the database
//! currently has (possibly empty) and renders `CREATE TABLE` /
//! `ALTER TABLE ... ADD COLUMN` statements for the target dialect. Values
//! are never interpolated; defaults are rendered as literals only for
//! booleans and numbers the descriptor itself declares.

use super::{FieldType, SchemaDefinition, SchemaField, TableDefinition};
use serde_json::Value;

/// Target SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    Mysql,
    Sqlite,
}

fn sql_type(field: &SchemaField, dialect: SqlDialect) -> &'static str {
    match (field.field_type, dialect) {
        (FieldType::String, SqlDialect::Mysql) => "VARCHAR(255)",
        (FieldType::String, _) => "TEXT",
        (FieldType::Number, _) => "BIGINT",
        (FieldType::Boolean, SqlDialect::Sqlite) => "INTEGER",
        (FieldType::Boolean, _) => "BOOLEAN",
        (FieldType::Date, SqlDialect::Postgres) => "TIMESTAMPTZ",
        (FieldType::Date, SqlDialect::Mysql) => "DATETIME",
        (FieldType::Date, SqlDialect::Sqlite) => "TEXT",
        (FieldType::Json, SqlDialect::Postgres) => "JSONB",
        (FieldType::Json, SqlDialect::Mysql) => "JSON",
        (FieldType::Json, SqlDialect::Sqlite) => "TEXT",
    }
}

fn default_literal(value: &Value, field_type: FieldType, dialect: SqlDialect) -> Option<String> {
    match (value, field_type) {
        (Value::Bool(b), FieldType::Boolean) => Some(match dialect {
            SqlDialect::Sqlite => if *b { "1" } else { "0" }.to_string(),
            _ => if *b { "TRUE" } else { "FALSE" }.to_string(),
        }),
        (Value::Number(n), FieldType::Number) => Some(n.to_string()),
        _ => None,
    }
}

fn quote_ident(name: &str, dialect: SqlDialect) -> String {
    match dialect {
        SqlDialect::Mysql => format!("`{name}`"),
        _ => format!("\"{name}\""),
    }
}

fn column_sql(field: &SchemaField, dialect: SqlDialect) -> String {
    let mut sql = format!(
        "{} {}",
        quote_ident(&field.name, dialect),
        sql_type(field, dialect)
    );
    if field.name == "id" {
        sql.push_str(" PRIMARY KEY");
    } else {
        if field.required {
            sql.push_str(" NOT NULL");
        }
        if field.unique {
            sql.push_str(" UNIQUE");
        }
    }
    if let Some(default) = field
        .default_value
        .as_ref()
        .and_then(|v| default_literal(v, field.field_type, dialect))
    {
        sql.push_str(&format!(" DEFAULT {default}"));
    }
    if let Some(reference) = &field.references {
        sql.push_str(&format!(
            " REFERENCES {}({}) ON DELETE {}",
            quote_ident(&reference.model, dialect),
            quote_ident(&reference.field, dialect),
            reference.on_delete.as_sql()
        ));
    }
    sql
}

fn create_table_sql(table: &TableDefinition, dialect: SqlDialect) -> String {
    let columns: Vec<String> = table
        .fields
        .iter()
        .map(|f| format!("  {}", column_sql(f, dialect)))
        .collect();
    format!(
        "CREATE TABLE {} (\n{}\n);",
        quote_ident(&table.name, dialect),
        columns.join(",\n")
    )
}

/// Renders the statements that bring `current` up to `desired`.
///
/// Missing tables become `CREATE TABLE`; missing columns on existing
/// tables become `ALTER TABLE ... ADD COLUMN`. Nothing is ever dropped.
pub fn generate_migrations(
    desired: &SchemaDefinition,
    current: &SchemaDefinition,
    dialect: SqlDialect,
) -> Vec<String> {
    let mut statements = Vec::new();
    for table in &desired.tables {
        match current.get_table(&table.name) {
            None => statements.push(create_table_sql(table, dialect)),
            Some(existing) => {
                for field in &table.fields {
                    if existing.get_field(&field.name).is_none() {
                        statements.push(format!(
                            "ALTER TABLE {} ADD COLUMN {};",
                            quote_ident(&table.name, dialect),
                            column_sql(field, dialect)
                        ));
                    }
                }
            }
        }
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::core_schema;

    #[test]
    fn test_fresh_database_creates_all_tables() {
        let statements =
            generate_migrations(&core_schema(), &SchemaDefinition::new(), SqlDialect::Postgres);
        assert_eq!(statements.len(), 4);
        assert!(statements[0].starts_with("CREATE TABLE \"user\""));
        assert!(statements.iter().any(|s| s.contains(
            "\"userId\" TEXT NOT NULL REFERENCES \"user\"(\"id\") ON DELETE CASCADE"
        )));
    }

    #[test]
    fn test_existing_table_gets_alter() {
        let desired = core_schema();
        let mut current = core_schema();
        // Pretend the database predates the image column.
        let user = current.tables.iter_mut().find(|t| t.name == "user").unwrap();
        user.fields.retain(|f| f.name != "image");

        let statements = generate_migrations(&desired, &current, SqlDialect::Sqlite);
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0], "ALTER TABLE \"user\" ADD COLUMN \"image\" TEXT;");
    }

    #[test]
    fn test_sqlite_boolean_default() {
        let statements =
            generate_migrations(&core_schema(), &SchemaDefinition::new(), SqlDialect::Sqlite);
        let user = statements.iter().find(|s| s.contains("\"user\"")).unwrap();
        assert!(user.contains("\"emailVerified\" INTEGER NOT NULL DEFAULT 0"));
    }

    #[test]
    fn test_mysql_quoting() {
        let statements =
            generate_migrations(&core_schema(), &SchemaDefinition::new(), SqlDialect::Mysql);
        assert!(statements[0].starts_with("CREATE TABLE `user`"));
        assert!(statements[0].contains("`email` VARCHAR(255) NOT NULL UNIQUE"));
    }

    #[test]
    fn test_no_changes_no_statements() {
        let schema = core_schema();
        assert!(generate_migrations(&schema, &schema, SqlDialect::Postgres).is_empty());
    }
}
