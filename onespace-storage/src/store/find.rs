//! Indexed queries with an unindexed fallback.

use super::{DocumentStore, parse_body};
use crate::document::Document;
use crate::error::StorageResult;
use crate::index::{self, QueryPlan};
use crate::query::{Query, compare_documents};
use duckdb::Connection;
use tracing::warn;

/// Documents returned by a query and the path that served them.
#[derive(Debug, Clone)]
pub struct FindResult {
    pub documents: Vec<Document>,
    pub plan: QueryPlan,
}

impl DocumentStore {
    /// Live documents matching `query`, in the query's sort order.
    pub fn find(&self, query: &Query) -> StorageResult<Vec<Document>> {
        Ok(self.find_with_plan(query)?.documents)
    }

    /// Like [`find`](Self::find), also reporting whether an index served
    /// the query.
    ///
    /// The declared indexes are (re)created first. If no index fits, or the
    /// indexed SQL fails, every live document is scanned and sorted with the
    /// same comparator the SQL ordering mirrors.
    pub fn find_with_plan(&self, query: &Query) -> StorageResult<FindResult> {
        query.validate()?;
        self.with_conn(|conn| {
            if let Err(e) = index::ensure_indexes(conn) {
                warn!(error = %e, "could not ensure indexes, falling back to scan");
                return scan(conn, query);
            }
            match index::plan(conn, query)? {
                QueryPlan::Indexed(name) => match indexed(conn, query) {
                    Ok(documents) => Ok(FindResult {
                        documents,
                        plan: QueryPlan::Indexed(name),
                    }),
                    Err(e) => {
                        warn!(index = name, error = %e, "indexed query failed, falling back to scan");
                        scan(conn, query)
                    }
                },
                QueryPlan::Scan => scan(conn, query),
            }
        })
    }

    /// Serves `query` by scanning, without consulting any index.
    pub fn find_unindexed(&self, query: &Query) -> StorageResult<Vec<Document>> {
        query.validate()?;
        self.with_conn(|conn| scan(conn, query).map(|r| r.documents))
    }

    /// Creates the declared indexes that are missing.
    pub fn ensure_indexes(&self) -> StorageResult<()> {
        self.with_conn(index::ensure_indexes)
    }

    /// Names of the declared indexes that currently exist.
    pub fn indexes(&self) -> StorageResult<Vec<String>> {
        self.with_conn(index::existing_indexes)
    }

    /// Drops the declared indexes; the next query recreates them.
    pub fn drop_indexes(&self) -> StorageResult<()> {
        self.with_conn(index::drop_indexes)
    }
}

fn indexed(conn: &Connection, query: &Query) -> StorageResult<Vec<Document>> {
    let (predicate, params) = query.sql_predicate();
    let mut sql = format!(
        "SELECT id, rev, data_json FROM documents WHERE NOT deleted AND {predicate} ORDER BY {}",
        query.sql_order_by()
    );
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    let mut stmt = conn.prepare(&sql)?;
    let rows: Vec<(String, String, String)> = stmt
        .query_map(duckdb::params_from_iter(params.iter()), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<Result<_, _>>()?;
    rows.into_iter().map(to_document).collect()
}

fn scan(conn: &Connection, query: &Query) -> StorageResult<FindResult> {
    let mut stmt = conn.prepare("SELECT id, rev, data_json FROM documents WHERE NOT deleted")?;
    let rows: Vec<(String, String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<_, _>>()?;
    let mut documents = Vec::with_capacity(rows.len());
    for row in rows {
        let doc = to_document(row)?;
        if query.matches(&doc) {
            documents.push(doc);
        }
    }
    documents.sort_by(|a, b| compare_documents(query.sort, a, b));
    if let Some(limit) = query.limit {
        documents.truncate(limit);
    }
    Ok(FindResult {
        documents,
        plan: QueryPlan::Scan,
    })
}

fn to_document((id, rev, data): (String, String, String)) -> StorageResult<Document> {
    Ok(Document {
        id,
        rev: Some(rev.parse()?),
        body: parse_body(&data)?,
    })
}
