//! Declarative queries over the indexed document fields.
//!
//! A query is evaluated either as SQL over the extracted index columns or by
//! scanning documents in Rust. Both paths use [`Field::extract`] and
//! [`compare_documents`], so they agree on matching and on ordering.

use crate::document::Document;
use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// The indexed fields a query may select or sort on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    #[serde(rename = "type")]
    Type,
    #[serde(rename = "username")]
    Username,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "order")]
    Order,
    #[serde(rename = "completedAt")]
    CompletedAt,
}

/// Value kind stored in an index column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Bool,
    Integer,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Type,
        Field::Username,
        Field::Completed,
        Field::Order,
        Field::CompletedAt,
    ];

    /// JSON key in the document body.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::Username => "username",
            Self::Completed => "completed",
            Self::Order => "order",
            Self::CompletedAt => "completedAt",
        }
    }

    /// Column in the `documents` table holding the extracted value.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Type => "doc_type",
            Self::Username => "username",
            Self::Completed => "completed",
            Self::Order => "ord",
            Self::CompletedAt => "completed_at",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Type | Self::Username | Self::CompletedAt => FieldKind::Text,
            Self::Completed => FieldKind::Bool,
            Self::Order => FieldKind::Integer,
        }
    }

    /// Extracts the indexable value of this field from a document body.
    ///
    /// Values of the wrong JSON type extract as `Null`. Fractional orders are
    /// truncated toward zero.
    pub fn extract(&self, body: &Map<String, Value>) -> FieldValue {
        let Some(raw) = body.get(self.key()) else {
            return FieldValue::Null;
        };
        match self.kind() {
            FieldKind::Text => raw
                .as_str()
                .map_or(FieldValue::Null, |s| FieldValue::Text(s.to_string())),
            FieldKind::Bool => raw.as_bool().map_or(FieldValue::Null, FieldValue::Bool),
            FieldKind::Integer => raw
                .as_i64()
                .or_else(|| raw.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
                .map_or(FieldValue::Null, FieldValue::Int),
        }
    }
}

/// An extracted, comparable field value.
///
/// Variant order matters: `Null` sorts before every present value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl FieldValue {
    fn kind(&self) -> Option<FieldKind> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(FieldKind::Bool),
            Self::Int(_) => Some(FieldKind::Integer),
            Self::Text(_) => Some(FieldKind::Text),
        }
    }

    pub(crate) fn to_sql(&self) -> duckdb::types::Value {
        match self {
            Self::Null => duckdb::types::Value::Null,
            Self::Bool(b) => duckdb::types::Value::Boolean(*b),
            Self::Int(i) => duckdb::types::Value::BigInt(*i),
            Self::Text(s) => duckdb::types::Value::Text(s.clone()),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

/// One selector term: `field <op> value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: Field,
    pub op: CompareOp,
    pub value: FieldValue,
}

impl Condition {
    /// Evaluates the condition against an extracted value, with SQL's
    /// treatment of missing values (a comparison with `Null` never matches
    /// unless the condition is `= Null`).
    pub fn matches(&self, actual: &FieldValue) -> bool {
        match (&self.value, actual) {
            (FieldValue::Null, actual) => self.op == CompareOp::Eq && *actual == FieldValue::Null,
            (_, FieldValue::Null) => false,
            (expected, actual) => {
                let ord = actual.cmp(expected);
                match self.op {
                    CompareOp::Eq => ord == Ordering::Equal,
                    CompareOp::Gt => ord == Ordering::Greater,
                    CompareOp::Gte => ord != Ordering::Less,
                    CompareOp::Lt => ord == Ordering::Less,
                    CompareOp::Lte => ord != Ordering::Greater,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// A selector over indexed fields plus optional sort and limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub selector: Vec<Condition>,
    pub sort: Option<(Field, SortDirection)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: Field, op: CompareOp, value: impl Into<FieldValue>) -> Self {
        self.selector.push(Condition {
            field,
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.filter(field, CompareOp::Eq, value)
    }

    pub fn sort(mut self, field: Field, direction: SortDirection) -> Self {
        self.sort = Some((field, direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Fields referenced by the selector and the sort, in declaration order.
    pub fn fields(&self) -> Vec<Field> {
        let mut fields: Vec<Field> = Vec::new();
        let sort_field = self.sort.map(|(f, _)| f);
        for f in self.selector.iter().map(|c| c.field).chain(sort_field) {
            if !fields.contains(&f) {
                fields.push(f);
            }
        }
        fields
    }

    /// Rejects conditions whose value kind does not fit the field.
    pub fn validate(&self) -> StorageResult<()> {
        for c in &self.selector {
            match c.value.kind() {
                None if c.op != CompareOp::Eq => {
                    return Err(StorageError::InvalidQuery(format!(
                        "{} {:?} null is not a valid comparison",
                        c.field.key(),
                        c.op
                    )));
                }
                Some(kind) if kind != c.field.kind() => {
                    return Err(StorageError::InvalidQuery(format!(
                        "{} expects {:?}, got {:?}",
                        c.field.key(),
                        c.field.kind(),
                        c.value
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Evaluates the selector against a document body.
    pub fn matches(&self, doc: &Document) -> bool {
        self.selector
            .iter()
            .all(|c| c.matches(&c.field.extract(&doc.body)))
    }

    /// Renders the selector as a SQL predicate over the index columns.
    pub(crate) fn sql_predicate(&self) -> (String, Vec<duckdb::types::Value>) {
        let mut clauses = Vec::with_capacity(self.selector.len());
        let mut params = Vec::new();
        for c in &self.selector {
            if c.value == FieldValue::Null {
                clauses.push(format!("{} IS NULL", c.field.column()));
            } else {
                clauses.push(format!("{} {} ?", c.field.column(), c.op.sql()));
                params.push(c.value.to_sql());
            }
        }
        if clauses.is_empty() {
            ("TRUE".to_string(), params)
        } else {
            (clauses.join(" AND "), params)
        }
    }

    /// Renders the ordering used by [`compare_documents`] as SQL.
    pub(crate) fn sql_order_by(&self) -> String {
        match self.sort {
            Some((field, SortDirection::Asc)) => {
                format!("{} ASC NULLS FIRST, id ASC", field.column())
            }
            Some((field, SortDirection::Desc)) => {
                format!("{} DESC NULLS LAST, id ASC", field.column())
            }
            None => "id ASC".to_string(),
        }
    }
}

/// Total order shared by the indexed and the scanning query paths: the sort
/// field (missing first when ascending, last when descending), then the
/// identifier ascending.
pub fn compare_documents(
    sort: Option<(Field, SortDirection)>,
    a: &Document,
    b: &Document,
) -> Ordering {
    let primary = match sort {
        Some((field, direction)) => {
            let ord = field.extract(&a.body).cmp(&field.extract(&b.body));
            match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        }
        None => Ordering::Equal,
    };
    primary.then_with(|| a.id.cmp(&b.id))
}
