//! Query construction and the per-model data manager.
//!
//! A [`Query`] is a map of field-name → [`QueryOperator`] conditions,
//! composable and immutable; [`SelectOptions`] adds ordering and a
//! limit window. [`DataManager`] binds a registered model to the
//! database and turns queries into parameterized SELECTs, mapping each
//! result row back into a fresh [`Record`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::database::Database;
use crate::error::{Error, Result};
use crate::record::{Record, ROWID};
use crate::value::Value;

/// Comparison operators for query conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryOperator {
    Equal(Value),
    NotEqual(Value),
    GreaterThan(Value),
    GreaterThanOrEqual(Value),
    LessThan(Value),
    LessThanOrEqual(Value),
    Like(String),
    NotLike(String),
    In(Vec<Value>),
    NotIn(Vec<Value>),
}

impl QueryOperator {
    /// Logical negation, used by `exclude`.
    pub fn negate(&self) -> QueryOperator {
        match self {
            QueryOperator::Equal(v) => QueryOperator::NotEqual(v.clone()),
            QueryOperator::NotEqual(v) => QueryOperator::Equal(v.clone()),
            QueryOperator::GreaterThan(v) => QueryOperator::LessThanOrEqual(v.clone()),
            QueryOperator::GreaterThanOrEqual(v) => QueryOperator::LessThan(v.clone()),
            QueryOperator::LessThan(v) => QueryOperator::GreaterThanOrEqual(v.clone()),
            QueryOperator::LessThanOrEqual(v) => QueryOperator::GreaterThan(v.clone()),
            QueryOperator::Like(s) => QueryOperator::NotLike(s.clone()),
            QueryOperator::NotLike(s) => QueryOperator::Like(s.clone()),
            QueryOperator::In(vs) => QueryOperator::NotIn(vs.clone()),
            QueryOperator::NotIn(vs) => QueryOperator::In(vs.clone()),
        }
    }

    /// Render one WHERE fragment, appending bound parameters. Null
    /// equality renders as IS NULL / IS NOT NULL.
    fn render(&self, column: &str, params: &mut Vec<Value>) -> String {
        match self {
            QueryOperator::Equal(Value::Null) => format!("{column} IS NULL"),
            QueryOperator::NotEqual(Value::Null) => format!("{column} IS NOT NULL"),
            QueryOperator::Equal(v) => {
                params.push(v.clone());
                format!("{column}=?")
            }
            QueryOperator::NotEqual(v) => {
                params.push(v.clone());
                format!("{column}<>?")
            }
            QueryOperator::GreaterThan(v) => {
                params.push(v.clone());
                format!("{column}>?")
            }
            QueryOperator::GreaterThanOrEqual(v) => {
                params.push(v.clone());
                format!("{column}>=?")
            }
            QueryOperator::LessThan(v) => {
                params.push(v.clone());
                format!("{column}<?")
            }
            QueryOperator::LessThanOrEqual(v) => {
                params.push(v.clone());
                format!("{column}<=?")
            }
            QueryOperator::Like(s) => {
                params.push(Value::Text(s.clone()));
                format!("{column} LIKE ?")
            }
            QueryOperator::NotLike(s) => {
                params.push(Value::Text(s.clone()));
                format!("{column} NOT LIKE ?")
            }
            // An empty IN set can match (or exclude) nothing.
            QueryOperator::In(vs) if vs.is_empty() => "1=0".to_string(),
            QueryOperator::NotIn(vs) if vs.is_empty() => "1=1".to_string(),
            QueryOperator::In(vs) => {
                let marks = vec!["?"; vs.len()].join(",");
                params.extend(vs.iter().cloned());
                format!("{column} IN ({marks})")
            }
            QueryOperator::NotIn(vs) => {
                let marks = vec!["?"; vs.len()].join(",");
                params.extend(vs.iter().cloned());
                format!("{column} NOT IN ({marks})")
            }
        }
    }
}

/// Composable, immutable condition set.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    conditions: HashMap<String, QueryOperator>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_condition(mut self, field: &str, op: QueryOperator) -> Self {
        self.conditions.insert(field.to_string(), op);
        self
    }

    /// Equality shorthand.
    pub fn with_eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.with_condition(field, QueryOperator::Equal(value.into()))
    }

    /// Relation-valued criterion: compares the foreign-key column with
    /// the record's identity (IS NULL when the record is unsaved).
    pub fn with_related(self, field: &str, record: &Record) -> Self {
        let id = record
            .rowid()
            .map(Value::Integer)
            .unwrap_or(Value::Null);
        self.with_condition(field, QueryOperator::Equal(id))
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.conditions.keys().map(String::as_str)
    }

    pub(crate) fn negated(&self) -> Query {
        Query {
            conditions: self
                .conditions
                .iter()
                .map(|(k, op)| (k.clone(), op.negate()))
                .collect(),
        }
    }

    /// WHERE clause body plus bound parameters, or `None` when empty.
    fn render(&self, params: &mut Vec<Value>) -> Option<String> {
        if self.conditions.is_empty() {
            return None;
        }
        let fragments: Vec<String> = self
            .conditions
            .iter()
            .map(|(column, op)| op.render(column, params))
            .collect();
        Some(fragments.join(" AND "))
    }
}

/// Ordering and limit window for a SELECT.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOptions {
    /// Field names, each optionally prefixed `+`/`-`; `-` sorts
    /// descending, the default is ascending.
    pub order_by: Vec<String>,
    /// (offset, count) window.
    pub limit: Option<(u32, u32)>,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(mut self, key: &str) -> Self {
        self.order_by.push(key.to_string());
        self
    }

    pub fn with_limit(mut self, offset: u32, count: u32) -> Self {
        self.limit = Some((offset, count));
        self
    }
}

/// Per-model query entry point, obtained from [`Database::objects`].
pub struct DataManager<'a> {
    db: &'a Database,
    model: String,
}

impl<'a> DataManager<'a> {
    pub(crate) fn new(db: &'a Database, model: &str) -> Self {
        DataManager {
            db,
            model: model.to_string(),
        }
    }

    /// All rows of the model's table.
    pub fn all(&self) -> Result<Vec<Record>> {
        self.select(&Query::new(), &SelectOptions::default())
    }

    /// Rows matching every condition.
    pub fn filter(&self, query: &Query) -> Result<Vec<Record>> {
        self.select(query, &SelectOptions::default())
    }

    /// Rows matching every condition, with ordering and a limit window.
    pub fn select(&self, query: &Query, options: &SelectOptions) -> Result<Vec<Record>> {
        let model = self.db.registry().model(&self.model)?;
        let available: Vec<String> = {
            let mut names = model.field_names();
            names.push(ROWID.to_string());
            names
        };

        let offending: Vec<String> = query
            .keys()
            .filter(|k| !available.iter().any(|a| a == k))
            .map(str::to_string)
            .collect();
        if !offending.is_empty() {
            return Err(Error::UnknownFields {
                model: self.model.clone(),
                given: offending,
                available,
            });
        }

        let mut params = Vec::new();
        let mut sql = format!("SELECT rowid, * FROM {}", model.table());
        if let Some(clause) = query.render(&mut params) {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }

        if !options.order_by.is_empty() {
            let offending: Vec<String> = options
                .order_by
                .iter()
                .filter(|k| {
                    let bare = k.trim_start_matches(['+', '-']);
                    !available.iter().any(|a| a == bare)
                })
                .cloned()
                .collect();
            if !offending.is_empty() {
                return Err(Error::UnknownFields {
                    model: self.model.clone(),
                    given: offending,
                    available,
                });
            }
            let terms: Vec<String> = options
                .order_by
                .iter()
                .map(|k| {
                    let bare = k.trim_start_matches(['+', '-']);
                    if k.starts_with('-') {
                        format!("{bare} DESC")
                    } else {
                        bare.to_string()
                    }
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", terms.join(", ")));
        }

        if let Some((offset, count)) = options.limit {
            sql.push_str(&format!(" LIMIT {offset},{count}"));
        }

        let rows = self.db.connection().select(&sql, &params)?;
        rows.into_iter()
            .map(|columns| Record::from_row(model, columns))
            .collect()
    }

    /// The single matching row; `None` when absent, an error when the
    /// query matches more than one.
    pub fn get(&self, query: &Query) -> Result<Option<Record>> {
        let mut rows = self.filter(query)?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            _ => Err(Error::Ambiguous {
                model: self.model.clone(),
            }),
        }
    }

    /// Like `get`, but collapses every failure to `None`.
    pub fn one(&self, query: &Query) -> Option<Record> {
        self.get(query).ok().flatten()
    }

    /// Whether any row matches.
    pub fn exists(&self, query: &Query) -> bool {
        self.one(query).is_some()
    }

    /// Rows matching none of the conditions (each operator negated).
    pub fn exclude(&self, query: &Query) -> Result<Vec<Record>> {
        self.filter(&query.negated())
    }

    /// Positional access: the n-th row in storage order.
    pub fn nth(&self, index: u32) -> Result<Option<Record>> {
        let mut rows = self.select(
            &Query::new(),
            &SelectOptions::new().with_limit(index, 1),
        )?;
        Ok(rows.pop())
    }

    /// Look the record up by the unique subset of `values`; create and
    /// save it only when no match exists. At least one value must
    /// belong to a unique or primary-key field.
    pub fn create_or_get(&self, values: &[(&str, Value)]) -> Result<Record> {
        let model = self.db.registry().model(&self.model)?;
        let unique: Vec<(&str, Value)> = values
            .iter()
            .filter(|(k, _)| {
                model
                    .field(k)
                    .map(|f| f.is_unique() || f.is_primary_key())
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if unique.is_empty() {
            return Err(Error::Query(
                "create_or_get requires at least one unique or primary-key criterion".to_string(),
            ));
        }
        let mut lookup = Query::new();
        for (k, v) in &unique {
            lookup = lookup.with_eq(k, v.clone());
        }
        match self.get(&lookup)? {
            Some(found) => Ok(found),
            None => {
                let mut record = self.db.new_record(&self.model, values)?;
                self.db.save(&mut record)?;
                Ok(record)
            }
        }
    }
}
