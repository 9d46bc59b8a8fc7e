//! DDL compilation.
//!
//! Turns a validated column schema into the statement set reconciliation
//! executes. Output is deterministic: columns appear in schema declaration
//! order, and the declared SQL type text and `DEFAULT` expressions are
//! carried into the statements verbatim. Everything produced here is plain
//! statement text, safe to log for audit.

use crate::config::TableSchema;
use crate::sql::quote_ident;

/// The compiled statement set for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDdl {
    pub create_table: String,
    /// One CREATE INDEX per column with an explicit `index` directive, in
    /// schema order. PRIMARY KEY and UNIQUE columns are indexed implicitly
    /// by the constraint and never appear here.
    pub create_indexes: Vec<String>,
    pub drop_table: String,
}

/// Compile the schema into DDL.
///
/// Indexing resolution: PRIMARY KEY wins over UNIQUE wins over an explicit
/// `index` directive. Validation has already rejected co-declarations; the
/// compiler asserts the invariant anyway.
pub fn compile(table: &str, schema: &TableSchema) -> TableDdl {
    let mut fragments = Vec::with_capacity(schema.len());
    let mut create_indexes = Vec::new();

    for (name, column) in schema {
        debug_assert!(
            !(column.index.is_some() && (column.primary_key || column.unique)),
            "column '{}' declares an explicit index alongside PRIMARY KEY/UNIQUE",
            name
        );

        let mut fragment = format!("{} {}", quote_ident(name), column.sql_type);
        if !column.nullable {
            fragment.push_str(" NOT NULL");
        }
        if column.primary_key {
            fragment.push_str(" PRIMARY KEY");
        }
        if column.unique && !column.primary_key {
            fragment.push_str(" UNIQUE");
        }
        if let Some(default) = &column.default {
            fragment.push_str(" DEFAULT ");
            fragment.push_str(default);
        }
        fragments.push(fragment);

        if let Some(method) = column.index {
            if !column.primary_key && !column.unique {
                create_indexes.push(format!(
                    "CREATE INDEX {} ON {} USING {} ({})",
                    quote_ident(&format!("idx_{}_{}", table, name)),
                    quote_ident(table),
                    method,
                    quote_ident(name)
                ));
            }
        }
    }

    TableDdl {
        create_table: format!(
            "CREATE TABLE {} ({})",
            quote_ident(table),
            fragments.join(", ")
        ),
        create_indexes,
        drop_table: format!("DROP TABLE IF EXISTS {} CASCADE", quote_ident(table)),
    }
}

pub fn create_database(dbname: &str) -> String {
    format!("CREATE DATABASE {}", quote_ident(dbname))
}

pub fn drop_database(dbname: &str) -> String {
    format!("DROP DATABASE IF EXISTS {}", quote_ident(dbname))
}
