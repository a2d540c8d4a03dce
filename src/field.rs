//! Field variants, their value contracts, and column-definition SQL.
//!
//! A [`Field`] is a class-level template: it is declared once on a model,
//! validated at registration, and cloned into independent slots when a
//! record instance is constructed. Virtual variants (the generated side
//! of a relation, many-to-many) contribute no column.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::value::Value;

/// Whether a save is the record's first insert or a later update.
/// Passed to the `pre_save`/`post_save` hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveAction {
    Insert,
    Update,
}

impl SaveAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SaveAction::Insert => "insert",
            SaveAction::Update => "update",
        }
    }
}

/// Variant-specific data for a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Integer,
    Float,
    Boolean,
    String {
        size: u32,
    },
    Blob,
    DateTime {
        auto_now: bool,
        auto_now_add: bool,
    },
    /// String-backed enumeration over a fixed choice set.
    Choice {
        options: Vec<String>,
        size: u32,
    },
    /// Foreign-key column referencing one row of `target`.
    ManyToOne {
        target: String,
        backref: Option<String>,
    },
    /// Foreign-key column referencing one row of `target`, unique per row.
    OneToOne {
        target: String,
        backref: Option<String>,
    },
    /// Virtual reverse side of a ManyToOne; `remote_field` is the
    /// foreign-key column on `target` once the relation is wired.
    OneToMany {
        target: String,
        backref: Option<String>,
        remote_field: Option<String>,
    },
    /// Virtual reverse side of a OneToOne. Resolver-generated only.
    OneToOneBackref {
        target: String,
        remote_field: String,
    },
    /// Declared but intentionally unwired: no association table is
    /// generated and the slot cannot be read or assigned.
    ManyToMany {
        target: String,
        backref: Option<String>,
    },
}

/// One field template (and, once cloned into a record, one value slot).
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    kind: FieldKind,
    default: Value,
    required: bool,
    unique: bool,
    primary_key: bool,
    auto_increment: bool,
    value: Value,
}

impl Field {
    fn with_kind(kind: FieldKind, default: Value) -> Self {
        Field {
            name: String::new(),
            kind,
            value: default.clone(),
            default,
            required: false,
            unique: false,
            primary_key: false,
            auto_increment: false,
        }
    }

    pub fn integer() -> Self {
        Self::with_kind(FieldKind::Integer, Value::Integer(0))
    }

    pub fn float() -> Self {
        Self::with_kind(FieldKind::Float, Value::Real(0.0))
    }

    pub fn boolean() -> Self {
        Self::with_kind(FieldKind::Boolean, Value::Boolean(false))
    }

    pub fn string(size: u32) -> Self {
        Self::with_kind(FieldKind::String { size }, Value::Text(String::new()))
    }

    pub fn blob() -> Self {
        Self::with_kind(FieldKind::Blob, Value::Null)
    }

    pub fn datetime() -> Self {
        Self::with_kind(
            FieldKind::DateTime {
                auto_now: false,
                auto_now_add: false,
            },
            Value::Integer(0),
        )
    }

    /// Choice set; the default is the first option unless overridden and
    /// the column size is derived from the longest option.
    pub fn choice<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options: Vec<String> = options.into_iter().map(Into::into).collect();
        let size = options.iter().map(|o| o.len()).max().unwrap_or(0) as u32;
        let default = options
            .first()
            .map(|o| Value::Text(o.clone()))
            .unwrap_or(Value::Null);
        Self::with_kind(FieldKind::Choice { options, size }, default)
    }

    pub fn many_to_one(target: impl Into<String>) -> Self {
        Self::with_kind(
            FieldKind::ManyToOne {
                target: target.into(),
                backref: None,
            },
            Value::Null,
        )
    }

    pub fn one_to_one(target: impl Into<String>) -> Self {
        let mut f = Self::with_kind(
            FieldKind::OneToOne {
                target: target.into(),
                backref: None,
            },
            Value::Null,
        );
        f.unique = true;
        f
    }

    pub fn one_to_many(target: impl Into<String>) -> Self {
        Self::with_kind(
            FieldKind::OneToMany {
                target: target.into(),
                backref: None,
                remote_field: None,
            },
            Value::Null,
        )
    }

    pub fn many_to_many(target: impl Into<String>) -> Self {
        Self::with_kind(
            FieldKind::ManyToMany {
                target: target.into(),
                backref: None,
            },
            Value::Null,
        )
    }

    /// Resolver-generated reverse side of a OneToOne; not declarable.
    pub(crate) fn one_to_one_backref(
        target: impl Into<String>,
        remote_field: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            FieldKind::OneToOneBackref {
                target: target.into(),
                remote_field: remote_field.into(),
            },
            Value::Null,
        )
    }

    // Builder-style modifiers.

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Stamp the current time on every save.
    pub fn auto_now(mut self) -> Self {
        if let FieldKind::DateTime { auto_now, .. } = &mut self.kind {
            *auto_now = true;
        }
        self
    }

    /// Stamp the current time on the first insert only.
    pub fn auto_now_add(mut self) -> Self {
        if let FieldKind::DateTime { auto_now_add, .. } = &mut self.kind {
            *auto_now_add = true;
        }
        self
    }

    pub fn with_default(mut self, v: impl Into<Value>) -> Self {
        self.default = v.into();
        self.value = self.default.clone();
        self
    }

    /// Name of the reciprocal field generated on the related model.
    /// Relation variants only.
    pub fn with_backref(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        match &mut self.kind {
            FieldKind::ManyToOne { backref, .. }
            | FieldKind::OneToOne { backref, .. }
            | FieldKind::OneToMany { backref, .. }
            | FieldKind::ManyToMany { backref, .. } => *backref = Some(name),
            _ => {}
        }
        self
    }

    /// Override the derived column size. String and Choice variants only.
    pub fn with_size(mut self, n: u32) -> Self {
        match &mut self.kind {
            FieldKind::String { size } | FieldKind::Choice { size, .. } => *size = n,
            _ => {}
        }
        self
    }

    // Accessors.

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn default(&self) -> &Value {
        &self.default
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    /// Virtual fields own no column and contribute nothing to a save.
    pub fn is_virtual(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::OneToMany { .. }
                | FieldKind::OneToOneBackref { .. }
                | FieldKind::ManyToMany { .. }
        )
    }

    /// True for the relation variants that own a foreign-key column.
    pub fn is_relation_column(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::ManyToOne { .. } | FieldKind::OneToOne { .. }
        )
    }

    pub(crate) fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub(crate) fn kind_mut(&mut self) -> &mut FieldKind {
        &mut self.kind
    }

    /// Registration-time configuration check.
    pub(crate) fn validate(&self) -> Result<()> {
        if let FieldKind::Choice { options, size } = &self.kind {
            if options.len() < 2 {
                return Err(Error::schema(format!(
                    "choice field '{}' needs at least 2 options",
                    self.name
                )));
            }
            let derived = options.iter().map(|o| o.len()).max().unwrap_or(0) as u32;
            if *size < derived {
                return Err(Error::schema(format!(
                    "choice field '{}': size {} is less than the longest option ({})",
                    self.name, size, derived
                )));
            }
        }
        if !self.default.is_null() {
            self.check(self.default.clone()).map_err(|m| {
                Error::schema(format!("default for field '{}': {}", self.name, m))
            })?;
        }
        Ok(())
    }

    /// Validate and coerce a value, then store it.
    pub fn set(&mut self, v: impl Into<Value>) -> Result<()> {
        if let FieldKind::ManyToMany { .. } = self.kind {
            return Err(Error::Unsupported);
        }
        let v = self
            .check(v.into())
            .map_err(|m| Error::value(&self.name, m))?;
        self.value = v;
        Ok(())
    }

    pub fn get(&self) -> Value {
        self.value.clone()
    }

    /// The value to persist; `None` means this field has no column.
    pub fn get_save(&self) -> Option<Value> {
        if self.is_virtual() {
            None
        } else {
            Some(self.value.clone())
        }
    }

    fn check(&self, v: Value) -> std::result::Result<Value, String> {
        match &self.kind {
            FieldKind::Integer | FieldKind::DateTime { .. } => match v {
                Value::Null | Value::Integer(_) => Ok(v),
                other => Err(format!("expected integer, got {}", other.type_name())),
            },
            FieldKind::Float => match v {
                Value::Null | Value::Real(_) => Ok(v),
                Value::Integer(i) => Ok(Value::Real(i as f64)),
                other => Err(format!("expected real, got {}", other.type_name())),
            },
            FieldKind::Boolean => match v {
                Value::Boolean(_) => Ok(v),
                Value::Integer(0) => Ok(Value::Boolean(false)),
                Value::Integer(1) => Ok(Value::Boolean(true)),
                other => Err(format!("expected boolean or 0/1, got {other}")),
            },
            FieldKind::String { .. } => match v {
                Value::Null | Value::Text(_) => Ok(v),
                other => Err(format!("expected text, got {}", other.type_name())),
            },
            FieldKind::Blob => match v {
                Value::Null | Value::Blob(_) => Ok(v),
                other => Err(format!("expected blob, got {}", other.type_name())),
            },
            FieldKind::Choice { options, .. } => match v {
                Value::Text(s) if options.contains(&s) => Ok(Value::Text(s)),
                other => Err(format!("'{}' is not one of {:?}", other, options)),
            },
            FieldKind::ManyToOne { .. } | FieldKind::OneToOne { .. } => match v {
                Value::Null | Value::Integer(_) => Ok(v),
                other => Err(format!(
                    "expected a record identity (integer), got {}",
                    other.type_name()
                )),
            },
            FieldKind::OneToMany { .. } | FieldKind::OneToOneBackref { .. } => {
                Err("virtual relation field cannot be assigned directly".to_string())
            }
            // Rejected before `check` is reached.
            FieldKind::ManyToMany { .. } => Err("many-to-many is not implemented".to_string()),
        }
    }

    /// Column definition fragment for `CREATE TABLE`; `None` for virtual
    /// fields.
    pub fn column_sql(&self) -> Option<String> {
        let type_sql = match &self.kind {
            FieldKind::Integer
            | FieldKind::Boolean
            | FieldKind::DateTime { .. }
            | FieldKind::ManyToOne { .. }
            | FieldKind::OneToOne { .. } => "INT".to_string(),
            FieldKind::Float => "FLOAT".to_string(),
            FieldKind::Blob => "BLOB".to_string(),
            FieldKind::String { size } | FieldKind::Choice { size, .. } => {
                if *size > 255 {
                    "TEXT".to_string()
                } else {
                    format!("VARCHAR({size})")
                }
            }
            FieldKind::OneToMany { .. }
            | FieldKind::OneToOneBackref { .. }
            | FieldKind::ManyToMany { .. } => return None,
        };

        let mut out = format!("{} {}", self.name, type_sql);
        if self.unique {
            out.push_str(" UNIQUE");
        }
        if self.primary_key {
            out.push_str(" PRIMARY KEY ASC");
        }
        if self.required {
            out.push_str(" NOT NULL");
        }
        match &self.default {
            Value::Null => out.push_str(" DEFAULT NULL"),
            v => out.push_str(&format!(" DEFAULT {}", v.sql_literal())),
        }
        if self.auto_increment {
            out.push_str(" AUTOINCREMENT");
        }
        Some(out)
    }

    /// Hook invoked directly before a save. Returns false to veto the
    /// save; the engine reports the field and its value.
    pub(crate) fn pre_save(&mut self, action: SaveAction) -> bool {
        match &self.kind {
            FieldKind::DateTime {
                auto_now,
                auto_now_add,
            } => {
                let stamp = match action {
                    SaveAction::Insert => *auto_now_add || *auto_now,
                    SaveAction::Update => *auto_now,
                };
                if stamp {
                    self.value = Value::Integer(epoch_seconds());
                }
            }
            FieldKind::String { .. } | FieldKind::Choice { .. } => {
                if let Value::Text(s) = &self.value {
                    self.value = Value::Text(s.trim().to_string());
                }
            }
            _ => {}
        }
        if self.is_virtual() {
            return true;
        }
        !(self.required && self.value.is_null())
    }

    /// Hook invoked directly after a save.
    pub(crate) fn post_save(&mut self, _action: SaveAction) -> bool {
        true
    }
}

fn epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Composite field mapping one value onto several underlying fields via
/// a fixed key→field mapping. Groups may nest; the schema registry
/// flattens them with a `parent__child` namespace to arbitrary depth.
#[derive(Debug, Clone, Default)]
pub struct FieldGroup {
    required: bool,
    members: Vec<(String, GroupMember)>,
}

#[derive(Debug, Clone)]
pub enum GroupMember {
    Field(Field),
    Group(FieldGroup),
}

impl FieldGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, key: &str, field: Field) -> Self {
        self.members.push((key.to_string(), GroupMember::Field(field)));
        self
    }

    pub fn with_group(mut self, key: &str, group: FieldGroup) -> Self {
        self.members.push((key.to_string(), GroupMember::Group(group)));
        self
    }

    /// A required group marks every member field required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn members(&self) -> &[(String, GroupMember)] {
        &self.members
    }
}
