//! Pointer-map resolution.
//!
//! If the rows of a table define nodes in a graph, the pointer map defines
//! the edges: each entry maps a source column holding a reference to the
//! target column it points at. Resolution validates every referenced column
//! against the schema once and caches what graph traversal needs — the
//! relation list, the referenced column set and the recursive-join SQL
//! fragment — so traversal never re-validates column existence.

use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::config::TableSchema;
use crate::error::ConfigError;
use crate::sql::quote_ident;

/// One pointer edge: `source` holds a reference to a row identified by
/// `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtrRelation {
    pub source: String,
    pub target: String,
}

/// A validated pointer map.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PtrMap {
    relations: Vec<PtrRelation>,
    columns: BTreeSet<String>,
    join_fragment: String,
}

impl PtrMap {
    pub fn relations(&self) -> &[PtrRelation] {
        &self.relations
    }

    /// All columns referenced as a source or target.
    pub fn columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    /// Join condition for a recursive CTE over the pointer edges, of the
    /// form `r."source" = t."target" OR ...`. Empty when no edges are
    /// defined.
    pub fn join_fragment(&self) -> &str {
        &self.join_fragment
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

/// Validate `ptr_map` against the schema and cache the resolved form.
pub fn resolve(
    ptr_map: &IndexMap<String, String>,
    schema: &TableSchema,
) -> Result<PtrMap, ConfigError> {
    let mut relations = Vec::with_capacity(ptr_map.len());
    let mut columns = BTreeSet::new();

    for (source, target) in ptr_map {
        if ptr_map.contains_key(target) {
            return Err(ConfigError::invalid(
                "ptr_map",
                format!("circular reference {} -> {}", source, target),
            ));
        }
        if !schema.contains_key(source) {
            return Err(ConfigError::invalid(
                "ptr_map",
                format!("key {} is not a field", source),
            ));
        }
        if !schema.contains_key(target) {
            return Err(ConfigError::invalid(
                "ptr_map",
                format!("value {} is not a field", target),
            ));
        }
        columns.insert(source.clone());
        columns.insert(target.clone());
        relations.push(PtrRelation {
            source: source.clone(),
            target: target.clone(),
        });
    }

    let join_fragment = relations
        .iter()
        .map(|r| format!("r.{} = t.{}", quote_ident(&r.source), quote_ident(&r.target)))
        .collect::<Vec<_>>()
        .join(" OR ");

    Ok(PtrMap {
        relations,
        columns,
        join_fragment,
    })
}
