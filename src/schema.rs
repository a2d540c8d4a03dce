//! Model declaration and the schema registry.
//!
//! A [`ModelDef`] is the declarative input: a named, ordered list of
//! field templates and composite groups. Registration flattens groups
//! into namespaced field names, enforces the naming invariants, and
//! wires relation backrefs onto the related models — exactly once, with
//! a pending queue for relations whose target registers later.

use std::collections::{HashMap, VecDeque};

use tracing::warn;

use crate::error::{Error, Result};
use crate::field::{Field, FieldGroup, FieldKind, GroupMember};

/// Separator used when flattening group members into field names.
pub const GROUP_SEPARATOR: &str = "__";

/// Field names that can never be declared.
const RESERVED_NAMES: [&str; 3] = ["fields", "table", "dirty"];

fn validate_name(model: &str, name: &str) -> Result<()> {
    if name.len() < 2 {
        return Err(Error::schema(format!(
            "'{model}': field names must have at least 2 chars, got '{name}'"
        )));
    }
    if name.starts_with('_') {
        return Err(Error::schema(format!(
            "'{model}': field names starting with an underscore are not allowed, got '{name}'"
        )));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(Error::schema(format!(
            "'{model}': '{name}' is not allowed as a field name"
        )));
    }
    Ok(())
}

/// Declarative model input: a name plus ordered field/group declarations.
#[derive(Debug, Clone, Default)]
pub struct ModelDef {
    name: String,
    fields: Vec<(String, FieldDecl)>,
}

#[derive(Debug, Clone)]
enum FieldDecl {
    Field(Field),
    Group(FieldGroup),
}

impl ModelDef {
    pub fn new(name: impl Into<String>) -> Self {
        ModelDef {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: &str, field: Field) -> Self {
        self.fields.push((name.to_string(), FieldDecl::Field(field)));
        self
    }

    pub fn with_group(mut self, name: &str, group: FieldGroup) -> Self {
        self.fields.push((name.to_string(), FieldDecl::Group(group)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Membership of one flattened group: the member keys relative to the
/// group prefix, in declaration order.
#[derive(Debug, Clone)]
pub struct GroupInfo {
    pub keys: Vec<String>,
}

/// Canonical, registered form of a model: flattened field map, derived
/// table name, group membership.
#[derive(Debug, Clone)]
pub struct Model {
    name: String,
    table: String,
    fields: Vec<(String, Field)>,
    groups: Vec<(String, GroupInfo)>,
}

impl Model {
    fn from_def(def: ModelDef) -> Result<Self> {
        let model_name = def.name.clone();
        if model_name.is_empty() {
            return Err(Error::schema("model name must not be empty"));
        }
        let mut fields: Vec<(String, Field)> = Vec::new();
        let mut group_order: Vec<(String, bool)> = Vec::new();
        let mut queue: VecDeque<(String, FieldGroup)> = VecDeque::new();

        for (name, decl) in def.fields {
            validate_name(&model_name, &name)?;
            match decl {
                FieldDecl::Field(f) => fields.push((name.clone(), f.named(name))),
                FieldDecl::Group(g) => queue.push_back((name, g)),
            }
        }

        // Breadth-first flattening; nested groups re-enter the queue
        // under their namespaced prefix.
        while let Some((prefix, group)) = queue.pop_front() {
            let inherited = group.is_required();
            group_order.push((prefix.clone(), inherited));
            for (key, member) in group.members() {
                let full = format!("{prefix}{GROUP_SEPARATOR}{key}");
                validate_name(&model_name, &full)?;
                match member {
                    GroupMember::Field(f) => {
                        let mut f = f.clone();
                        if inherited {
                            f = f.required();
                        }
                        fields.push((full.clone(), f.named(full)));
                    }
                    GroupMember::Group(sub) => {
                        let mut sub = sub.clone();
                        if inherited {
                            sub = sub.required();
                        }
                        queue.push_back((full, sub));
                    }
                }
            }
        }

        let mut primary_key: Option<&str> = None;
        for (name, field) in &fields {
            field.validate()?;
            if field.is_primary_key() {
                if let Some(existing) = primary_key {
                    return Err(Error::schema(format!(
                        "'{model_name}': found multiple primary_key fields: '{existing}' and '{name}'"
                    )));
                }
                primary_key = Some(name);
            }
        }

        let groups = group_order
            .into_iter()
            .map(|(prefix, _)| {
                let lead = format!("{prefix}{GROUP_SEPARATOR}");
                let keys = fields
                    .iter()
                    .filter(|(n, _)| n.starts_with(&lead))
                    .map(|(n, _)| n[lead.len()..].to_string())
                    .collect();
                (prefix, GroupInfo { keys })
            })
            .collect();

        Ok(Model {
            table: model_name.to_lowercase(),
            name: model_name,
            fields,
            groups,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(n, f)| (n.as_str(), f))
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &GroupInfo)> {
        self.groups.iter().map(|(n, g)| (n.as_str(), g))
    }

    pub fn group(&self, name: &str) -> Option<&GroupInfo> {
        self.groups
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, g)| g)
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f)
    }

    /// Install a resolver-generated field, overwriting (with a warning)
    /// a colliding one.
    fn install(&mut self, name: &str, field: Field) {
        if self.has_field(name) {
            warn!(
                model = %self.name,
                field = %name,
                "backref overwrites an existing field"
            );
        }
        match self.field_mut(name) {
            Some(slot) => *slot = field,
            None => self.fields.push((name.to_string(), field)),
        }
    }

    pub(crate) fn clone_slots(&self) -> Vec<(String, Field)> {
        self.fields.clone()
    }

    pub(crate) fn clone_groups(&self) -> Vec<(String, GroupInfo)> {
        self.groups.clone()
    }
}

/// A relation whose target model had not registered yet when the source
/// did; wired as soon as the target shows up.
#[derive(Debug, Clone)]
struct PendingRelation {
    source: String,
    field: String,
    target: String,
}

/// Registry of contributed models. Owned by the database context; no
/// process-global state.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    models: HashMap<String, Model>,
    order: Vec<String>,
    pending: Vec<PendingRelation>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contribute a model: flatten, validate, install, wire relations.
    pub fn register(&mut self, def: ModelDef) -> Result<()> {
        let model = Model::from_def(def)?;
        let name = model.name().to_string();
        if self.models.contains_key(&name) {
            return Err(Error::schema(format!("model '{name}' is already registered")));
        }
        let relation_fields: Vec<String> = model
            .fields()
            .filter(|(_, f)| {
                matches!(
                    f.kind(),
                    FieldKind::ManyToOne { .. }
                        | FieldKind::OneToOne { .. }
                        | FieldKind::OneToMany { .. }
                        | FieldKind::ManyToMany { .. }
                )
            })
            .map(|(n, _)| n.to_string())
            .collect();

        self.models.insert(name.clone(), model);
        self.order.push(name.clone());

        for field in relation_fields {
            self.wire(&name, &field)?;
        }

        // Relations that were waiting for this model.
        let (ready, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| p.target == name);
        self.pending = rest;
        for p in ready {
            self.wire(&p.source, &p.field)?;
        }
        Ok(())
    }

    /// Synthesize the reciprocal field for one relation, or queue it if
    /// the target has not registered yet.
    fn wire(&mut self, source: &str, field_name: &str) -> Result<()> {
        let kind = match self.models.get(source).and_then(|m| m.field(field_name)) {
            Some(f) => f.kind().clone(),
            None => return Ok(()),
        };
        match kind {
            FieldKind::ManyToOne { target, backref } => {
                if !self.models.contains_key(&target) {
                    self.defer(source, field_name, &target);
                    return Ok(());
                }
                let name = backref.unwrap_or_else(|| source.to_lowercase());
                validate_name(&target, &name)?;
                let mut synthesized = Field::one_to_many(source);
                if let FieldKind::OneToMany { remote_field, .. } = synthesized.kind_mut() {
                    *remote_field = Some(field_name.to_string());
                }
                let synthesized = synthesized.named(name.clone());
                if let Some(m) = self.models.get_mut(&target) {
                    m.install(&name, synthesized);
                }
            }
            FieldKind::OneToOne { target, backref } => {
                if !self.models.contains_key(&target) {
                    self.defer(source, field_name, &target);
                    return Ok(());
                }
                let name = backref.unwrap_or_else(|| source.to_lowercase());
                validate_name(&target, &name)?;
                let synthesized = Field::one_to_one_backref(source, field_name).named(name.clone());
                if let Some(m) = self.models.get_mut(&target) {
                    m.install(&name, synthesized);
                }
            }
            FieldKind::OneToMany { target, backref, .. } => {
                if !self.models.contains_key(&target) {
                    self.defer(source, field_name, &target);
                    return Ok(());
                }
                // A declared one-to-many puts the foreign-key column on
                // the target model and records its name locally.
                let name = backref.unwrap_or_else(|| source.to_lowercase());
                validate_name(&target, &name)?;
                let synthesized = Field::many_to_one(source).named(name.clone());
                if let Some(m) = self.models.get_mut(&target) {
                    m.install(&name, synthesized);
                }
                if let Some(f) = self
                    .models
                    .get_mut(source)
                    .and_then(|m| m.field_mut(field_name))
                {
                    if let FieldKind::OneToMany { remote_field, .. } = f.kind_mut() {
                        *remote_field = Some(name);
                    }
                }
            }
            // Intentionally unwired: no association table, no backref.
            FieldKind::ManyToMany { .. } => {}
            _ => {}
        }
        Ok(())
    }

    fn defer(&mut self, source: &str, field: &str, target: &str) {
        self.pending.push(PendingRelation {
            source: source.to_string(),
            field: field.to_string(),
            target: target.to_string(),
        });
    }

    pub fn model(&self, name: &str) -> Result<&Model> {
        self.models.get(name).ok_or_else(|| {
            Error::schema(format!("model '{name}' is not registered"))
        })
    }

    /// Registered models in contribution order.
    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.order.iter().filter_map(|n| self.models.get(n))
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn clear(&mut self) {
        self.models.clear();
        self.order.clear();
        self.pending.clear();
    }
}
