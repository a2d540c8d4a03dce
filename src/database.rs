//! Database context: registry + connection + persistence engine.
//!
//! A [`Database`] owns the schema registry and the shared connection.
//! Lifecycle is explicit: register every model, call [`Database::init`]
//! to create the tables, then construct, save, and query records.
//! Table creation and relation wiring run as independent auto-committed
//! statements; there is no enclosing transaction.

use std::path::Path;

use tracing::{debug, info};

use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::field::{FieldKind, SaveAction};
use crate::query::{DataManager, Query};
use crate::record::{Record, ROWID};
use crate::schema::{ModelDef, SchemaRegistry};
use crate::value::Value;

pub struct Database {
    connection: ConnectionManager,
    registry: SchemaRegistry,
    initialized: bool,
}

impl Database {
    /// Open (or create) a file-backed database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::wrap(ConnectionManager::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::wrap(ConnectionManager::open_in_memory()?))
    }

    fn wrap(connection: ConnectionManager) -> Self {
        Database {
            connection,
            registry: SchemaRegistry::new(),
            initialized: false,
        }
    }

    /// Contribute a model. Relation backrefs are wired here, exactly
    /// once; registration is closed once `init` has run.
    pub fn register(&mut self, def: ModelDef) -> Result<()> {
        if self.initialized {
            return Err(Error::schema(format!(
                "cannot register '{}': the registry is already initialized",
                def.name()
            )));
        }
        self.registry.register(def)
    }

    /// Create the tables for every registered model and open the
    /// database for use.
    pub fn init(&mut self) -> Result<()> {
        self.create_tables()?;
        self.initialized = true;
        Ok(())
    }

    /// Drop all registered models and the statement counter; the
    /// connection stays open. Registration starts over.
    pub fn reset(&mut self) {
        self.registry.clear();
        self.connection.reset_statement_count();
        self.initialized = false;
    }

    /// Close the storage handle explicitly.
    pub fn close(self) -> Result<()> {
        self.connection.close()
    }

    pub(crate) fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub(crate) fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Number of statements executed on the shared handle.
    pub fn statement_count(&self) -> u64 {
        self.connection.statement_count()
    }

    /// Construct a fresh record of `model` from field/value pairs
    /// (flattened names; `rowid` is accepted for pre-assigned identity).
    pub fn new_record(&self, model: &str, values: &[(&str, Value)]) -> Result<Record> {
        let model = self.registry.model(model)?;
        let mut record = Record::from_model(model);
        record.apply(values.iter().map(|(n, v)| (*n, v.clone())))?;
        Ok(record)
    }

    /// Query entry point for one model.
    pub fn objects(&self, model: &str) -> Result<DataManager<'_>> {
        self.registry.model(model)?;
        Ok(DataManager::new(self, model))
    }

    /// Idempotent table creation: models whose table already exists in
    /// the catalog are skipped. A model with zero persistable columns
    /// is a schema error.
    pub fn create_tables(&self) -> Result<()> {
        for model in self.registry.models() {
            if self.connection.table_exists(model.table())? {
                debug!(table = %model.table(), "table exists, skipping");
                continue;
            }
            let columns: Vec<String> = model
                .fields()
                .filter_map(|(_, f)| f.column_sql())
                .collect();
            if columns.is_empty() {
                return Err(Error::schema(format!(
                    "could not create table '{}': no fields",
                    model.table()
                )));
            }
            let sql = format!("CREATE TABLE {} ({})", model.table(), columns.join(", "));
            self.connection.execute(&sql, &[])?;
            info!(table = %model.table(), "created table");
        }
        Ok(())
    }

    /// Persist a record: INSERT when it has no identity yet, UPDATE
    /// otherwise. Runs the field hooks around the statement, assigns
    /// the identity on first insert, and clears the dirty flag.
    /// Returns the affected row count.
    pub fn save(&self, record: &mut Record) -> Result<usize> {
        let action = match record.rowid() {
            Some(_) => SaveAction::Update,
            None => SaveAction::Insert,
        };

        for (name, field) in record.slots_mut() {
            if !field.pre_save(action) {
                return Err(Error::Hook {
                    phase: "pre_save",
                    field: name.to_string(),
                    value: field.get().to_string(),
                });
            }
        }

        let pairs: Vec<(String, Value)> = record
            .slots()
            .filter_map(|(n, f)| f.get_save().map(|v| (n.to_string(), v)))
            .collect();

        let affected = match action {
            SaveAction::Update => {
                let assignments: Vec<String> =
                    pairs.iter().map(|(n, _)| format!("{n}=?")).collect();
                let sql = format!(
                    "UPDATE {} SET {} WHERE rowid={}",
                    record.table(),
                    assignments.join(","),
                    record.rowid().unwrap_or_default()
                );
                let params: Vec<Value> = pairs.into_iter().map(|(_, v)| v).collect();
                self.connection.execute(&sql, &params)?
            }
            SaveAction::Insert => {
                let columns: Vec<&str> = pairs.iter().map(|(n, _)| n.as_str()).collect();
                let marks = vec!["?"; pairs.len()].join(",");
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    record.table(),
                    columns.join(","),
                    marks
                );
                let params: Vec<Value> = pairs.iter().map(|(_, v)| v.clone()).collect();
                let id = self.connection.insert(&sql, &params)?;
                record.set_rowid(id);
                1
            }
        };

        for (name, field) in record.slots_mut() {
            if !field.post_save(action) {
                return Err(Error::Hook {
                    phase: "post_save",
                    field: name.to_string(),
                    value: field.get().to_string(),
                });
            }
        }

        record.clear_dirty();
        Ok(affected)
    }

    /// Delete the record's row by identity.
    pub fn delete(&self, record: &Record) -> Result<usize> {
        let id = record.rowid().ok_or_else(|| {
            Error::Persistence("cannot delete a record that was never saved".to_string())
        })?;
        let sql = format!("DELETE FROM {} WHERE rowid=?", record.table());
        self.connection.execute(&sql, &[Value::Integer(id)])
    }

    /// Follow a single-valued relation: the row a foreign key points
    /// at, or the single row whose foreign key points back here.
    pub fn related_one(&self, record: &Record, field: &str) -> Result<Option<Record>> {
        let slot = record.field(field).ok_or_else(|| {
            Error::value(field, format!("no such field on '{}'", record.model()))
        })?;
        match slot.kind().clone() {
            FieldKind::ManyToOne { target, .. } | FieldKind::OneToOne { target, .. } => {
                match slot.get() {
                    Value::Null => Ok(None),
                    id => self.objects(&target)?.get(&Query::new().with_eq(ROWID, id)),
                }
            }
            FieldKind::OneToOneBackref {
                target,
                remote_field,
            } => {
                let id = self.identity_of(record)?;
                self.objects(&target)?
                    .get(&Query::new().with_eq(&remote_field, id))
            }
            FieldKind::ManyToMany { .. } => Err(Error::Unsupported),
            _ => Err(Error::value(field, "not a single-valued relation field")),
        }
    }

    /// Follow a to-many relation: every row whose foreign key equals
    /// this record's identity.
    pub fn related_many(&self, record: &Record, field: &str) -> Result<Vec<Record>> {
        let slot = record.field(field).ok_or_else(|| {
            Error::value(field, format!("no such field on '{}'", record.model()))
        })?;
        match slot.kind().clone() {
            FieldKind::OneToMany {
                target,
                remote_field: Some(column),
                ..
            } => {
                let id = self.identity_of(record)?;
                self.objects(&target)?
                    .filter(&Query::new().with_eq(&column, id))
            }
            FieldKind::OneToMany { .. } => Err(Error::schema(format!(
                "relation '{field}' was never wired; is the target model registered?"
            ))),
            FieldKind::ManyToMany { .. } => Err(Error::Unsupported),
            _ => Err(Error::value(field, "not a to-many relation field")),
        }
    }

    fn identity_of(&self, record: &Record) -> Result<i64> {
        record.rowid().ok_or_else(|| {
            Error::Persistence(format!(
                "'{}' record has no identity yet; save it first",
                record.model()
            ))
        })
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("initialized", &self.initialized)
            .field("statements", &self.statement_count())
            .finish_non_exhaustive()
    }
}
