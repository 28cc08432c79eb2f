//! Index manager: the composite indexes behind the task query patterns.
//!
//! Index creation is idempotent (`CREATE INDEX IF NOT EXISTS`), so callers
//! re-run [`ensure_indexes`] before every query that depends on an index.
//! That keeps a store that was reset, or opened by an older build, usable.

use crate::error::StorageResult;
use crate::query::{CompareOp, Field, Query};
use duckdb::Connection;
use serde::Serialize;
use tracing::debug;

/// A declared composite index over extracted document fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexDef {
    pub name: &'static str,
    pub fields: &'static [Field],
}

/// Incomplete tasks of a user, ascending by `order`.
pub const TASK_ORDER_INDEX: IndexDef = IndexDef {
    name: "idx_task_order",
    fields: &[Field::Type, Field::Username, Field::Order],
};

/// Completed / incomplete partitioning of a user's tasks.
pub const TASK_COMPLETED_INDEX: IndexDef = IndexDef {
    name: "idx_task_completed",
    fields: &[Field::Type, Field::Username, Field::Completed],
};

/// Completed tasks of a user, descending by `completedAt`.
pub const TASK_COMPLETED_AT_INDEX: IndexDef = IndexDef {
    name: "idx_task_completed_at",
    fields: &[Field::Type, Field::Username, Field::Completed, Field::CompletedAt],
};

pub const DECLARED_INDEXES: [IndexDef; 3] =
    [TASK_ORDER_INDEX, TASK_COMPLETED_INDEX, TASK_COMPLETED_AT_INDEX];

/// How a query was (or will be) served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueryPlan {
    /// SQL over the index columns, backed by the named index.
    Indexed(&'static str),
    /// Full scan of live documents with in-process filtering and sorting.
    Scan,
}

impl IndexDef {
    fn create_sql(&self) -> String {
        let columns: Vec<&str> = self.fields.iter().map(|f| f.column()).collect();
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON documents({})",
            self.name,
            columns.join(", ")
        )
    }

    /// Whether this index can serve the query.
    ///
    /// Every index field before the last must be pinned by an equality
    /// condition, and the sort field (if any) must be one of the index
    /// fields. Selector terms outside the index are applied as residual
    /// filters.
    pub fn can_serve(&self, query: &Query) -> bool {
        let pinned = |field: Field| {
            query
                .selector
                .iter()
                .any(|c| c.field == field && c.op == CompareOp::Eq)
        };
        let (_, leading) = match self.fields.split_last() {
            Some(parts) => parts,
            None => return false,
        };
        if !leading.iter().all(|f| pinned(*f)) {
            return false;
        }
        match query.sort {
            Some((field, _)) => self.fields.contains(&field),
            None => true,
        }
    }

    /// Number of query fields this index covers; used to rank candidates.
    fn coverage(&self, query: &Query) -> usize {
        query
            .fields()
            .iter()
            .filter(|f| self.fields.contains(f))
            .count()
    }
}

/// Creates every declared index that does not exist yet.
pub(crate) fn ensure_indexes(conn: &Connection) -> StorageResult<()> {
    for index in &DECLARED_INDEXES {
        conn.execute_batch(&index.create_sql())?;
    }
    Ok(())
}

/// Names of the declared indexes currently present in the database.
pub(crate) fn existing_indexes(conn: &Connection) -> StorageResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT index_name FROM duckdb_indexes() WHERE table_name = 'documents' ORDER BY index_name",
    )?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .filter(|name| DECLARED_INDEXES.iter().any(|i| i.name == name))
        .collect();
    Ok(names)
}

/// Drops the declared indexes. Queries fall back to scanning until
/// [`ensure_indexes`] runs again.
pub(crate) fn drop_indexes(conn: &Connection) -> StorageResult<()> {
    for index in &DECLARED_INDEXES {
        conn.execute_batch(&format!("DROP INDEX IF EXISTS {}", index.name))?;
    }
    Ok(())
}

/// Picks the existing index that serves the query best.
pub(crate) fn plan(conn: &Connection, query: &Query) -> StorageResult<QueryPlan> {
    let existing = existing_indexes(conn)?;
    let mut best: Option<(&IndexDef, usize)> = None;
    for index in DECLARED_INDEXES.iter() {
        if !existing.iter().any(|n| n == index.name) || !index.can_serve(query) {
            continue;
        }
        let score = index.coverage(query);
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((index, score));
        }
    }
    let plan = best.map_or(QueryPlan::Scan, |(index, _)| QueryPlan::Indexed(index.name));
    debug!(?plan, "planned document query");
    Ok(plan)
}
