//! Record instances.
//!
//! A [`Record`] is one row-to-be (or row-loaded) of a registered model:
//! it carries its own clones of the model's field templates, the
//! storage-assigned identity, and a dirty flag tracking unsaved
//! mutations. Field access goes through explicit `get`/`set` accessors
//! keyed by flattened field name.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::field::{Field, FieldKind};
use crate::schema::{GroupInfo, Model, GROUP_SEPARATOR};
use crate::value::Value;

/// Key used to address the storage identity in constructors and filters.
pub const ROWID: &str = "rowid";

/// Composite value for a field group: member key (relative to the group
/// prefix, nested members namespaced) to value.
pub type GroupParts = HashMap<String, Value>;

#[derive(Debug, Clone)]
pub struct Record {
    model: String,
    table: String,
    fields: Vec<(String, Field)>,
    groups: Vec<(String, GroupInfo)>,
    rowid: Option<i64>,
    dirty: bool,
}

impl Record {
    /// Fresh, unsaved instance: template clones, no identity, dirty.
    pub(crate) fn from_model(model: &Model) -> Self {
        Record {
            model: model.name().to_string(),
            table: model.table().to_string(),
            fields: model.clone_slots(),
            groups: model.clone_groups(),
            rowid: None,
            dirty: true,
        }
    }

    /// Instance mapped from a result row; starts clean.
    pub(crate) fn from_row(model: &Model, columns: Vec<(String, Value)>) -> Result<Self> {
        let mut record = Self::from_model(model);
        record.apply(columns.iter().map(|(n, v)| (n.as_str(), v.clone())))?;
        record.dirty = false;
        Ok(record)
    }

    /// Apply column/value pairs, `rowid` included. Unknown names fail.
    pub(crate) fn apply<'a>(
        &mut self,
        values: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<()> {
        let mut unknown = Vec::new();
        for (name, value) in values {
            if name == ROWID {
                match value {
                    Value::Integer(id) => self.rowid = Some(id),
                    Value::Null => self.rowid = None,
                    other => {
                        return Err(Error::value(ROWID, format!(
                            "expected integer identity, got {}",
                            other.type_name()
                        )))
                    }
                }
                // A declared field may shadow the identity column.
                let id_value = self.rowid.map(Value::Integer).unwrap_or(Value::Null);
                if let Some(slot) = self.field_slot_mut(ROWID) {
                    slot.set(id_value)?;
                }
                continue;
            }
            match self.field_slot_mut(name) {
                Some(slot) => slot.set(value)?,
                None => unknown.push(name.to_string()),
            }
        }
        if !unknown.is_empty() {
            return Err(Error::UnknownFields {
                model: self.model.clone(),
                given: unknown,
                available: self.fields.iter().map(|(n, _)| n.clone()).collect(),
            });
        }
        self.dirty = true;
        Ok(())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Storage identity; assigned by the engine on first insert.
    pub fn rowid(&self) -> Option<i64> {
        self.rowid
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f)
    }

    fn field_slot_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f)
    }

    /// Logical value of a field. Virtual relation fields are read
    /// through the database's related-record accessors instead.
    pub fn get(&self, name: &str) -> Result<Value> {
        match self.field(name) {
            Some(f) if f.is_virtual() => Err(Error::value(
                name,
                "virtual relation field; use the related-record accessors",
            )),
            Some(f) => Ok(f.get()),
            None => Err(self.unknown(name)),
        }
    }

    /// Set a field value, marking the record dirty.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        match self.field_slot_mut(name) {
            Some(slot) => {
                slot.set(value)?;
                self.dirty = true;
                Ok(())
            }
            None => Err(self.unknown(name)),
        }
    }

    /// Point a relation field at a saved record of the related model.
    pub fn set_related(&mut self, name: &str, related: &Record) -> Result<()> {
        let target = match self.field(name).map(Field::kind) {
            Some(FieldKind::ManyToOne { target, .. })
            | Some(FieldKind::OneToOne { target, .. }) => target.clone(),
            Some(_) => {
                return Err(Error::value(name, "not a foreign-key relation field"))
            }
            None => return Err(self.unknown(name)),
        };
        if related.model() != target {
            return Err(Error::value(
                name,
                format!(
                    "expected a '{}' record, got '{}'",
                    target,
                    related.model()
                ),
            ));
        }
        match related.rowid() {
            Some(id) => self.set(name, Value::Integer(id)),
            None => Err(Error::value(
                name,
                "related record has no identity yet; save it first",
            )),
        }
    }

    /// Fan a composite value out to the group's member fields. The part
    /// keys must match the declared member keys exactly.
    pub fn set_group(&mut self, name: &str, parts: &GroupParts) -> Result<()> {
        let info = match self.groups.iter().find(|(n, _)| n == name) {
            Some((_, g)) => g.clone(),
            None => return Err(self.unknown(name)),
        };
        let mut missing: Vec<&String> =
            info.keys.iter().filter(|k| !parts.contains_key(*k)).collect();
        let mut extra: Vec<&String> = parts
            .keys()
            .filter(|k| !info.keys.contains(*k))
            .collect();
        if !missing.is_empty() || !extra.is_empty() {
            missing.sort();
            extra.sort();
            return Err(Error::value(
                name,
                format!("group value mismatch; missing keys {missing:?}, unknown keys {extra:?}"),
            ));
        }
        for key in &info.keys {
            let full = format!("{name}{GROUP_SEPARATOR}{key}");
            if let Some(v) = parts.get(key) {
                self.set(&full, v.clone())?;
            }
        }
        Ok(())
    }

    /// Reconstruct the composite value from the current member fields.
    pub fn get_group(&self, name: &str) -> Result<GroupParts> {
        let info = match self.groups.iter().find(|(n, _)| n == name) {
            Some((_, g)) => g,
            None => return Err(self.unknown(name)),
        };
        let mut parts = GroupParts::new();
        for key in &info.keys {
            let full = format!("{name}{GROUP_SEPARATOR}{key}");
            parts.insert(key.clone(), self.get(&full)?);
        }
        Ok(parts)
    }

    pub(crate) fn set_rowid(&mut self, id: i64) {
        self.rowid = Some(id);
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(n, f)| (n.as_str(), f))
    }

    pub(crate) fn slots_mut(&mut self) -> impl Iterator<Item = (&str, &mut Field)> {
        self.fields.iter_mut().map(|(n, f)| (n.as_str(), &mut *f))
    }

    fn unknown(&self, name: &str) -> Error {
        Error::UnknownFields {
            model: self.model.clone(),
            given: vec![name.to_string()],
            available: self.fields.iter().map(|(n, _)| n.clone()).collect(),
        }
    }
}
