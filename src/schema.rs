//! Model declarations and the resolved relationship descriptor table.
//!
//! Declarations are plain values collected by a [`SchemaBuilder`]. Calling
//! [`SchemaBuilder::build`] resolves every relationship against the complete
//! set of models (defaults, targets and inverse bindings) and creates one
//! [`Collection`] per model in a fresh [`Database`]. Nothing about the
//! descriptor table changes after that point.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::collection::{Attrs, Collection};
use crate::config::StoreConfig;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::identity::{Id, IdentityStrategy, OtherHasher};
use crate::inflect::{pluralize, singularize};
use crate::record::{Changes, Record};
use crate::record_set::RecordSet;
use crate::serializer::{Serializer, SerializerOptions};

// ------------- Declarations -------------
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    BelongsTo,
    HasMany,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BelongsTo => write!(f, "belongsTo"),
            Self::HasMany => write!(f, "hasMany"),
        }
    }
}

/// How the inverse side of a relationship is found.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum InversePolicy {
    /// First relationship on the target pointing back at the owner.
    #[default]
    Auto,
    Named(String),
    Disabled,
}

/// A relationship as declared, before resolution.
#[derive(Clone, Debug, Default)]
pub struct Relationship {
    target: Option<String>,
    foreign_key: Option<String>,
    inverse: InversePolicy,
}

impl Relationship {
    pub fn new() -> Self {
        Self::default()
    }
    /// Relationship pointing at the model called `target`.
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::default()
        }
    }
    pub fn foreign_key(mut self, key: impl Into<String>) -> Self {
        self.foreign_key = Some(key.into());
        self
    }
    pub fn inverse(mut self, name: impl Into<String>) -> Self {
        self.inverse = InversePolicy::Named(name.into());
        self
    }
    pub fn no_inverse(mut self) -> Self {
        self.inverse = InversePolicy::Disabled;
        self
    }
}

/// Declaration of one model and its relationships, in declaration order.
#[derive(Clone, Debug)]
pub struct ModelDefinition {
    name: String,
    collection: Option<String>,
    identity: Option<IdentityStrategy>,
    relationships: Vec<(String, Kind, Relationship)>,
}

impl ModelDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            identity: None,
            relationships: Vec::new(),
        }
    }
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }
    pub fn identity(mut self, strategy: IdentityStrategy) -> Self {
        self.identity = Some(strategy);
        self
    }
    pub fn belongs_to(mut self, name: impl Into<String>, relationship: Relationship) -> Self {
        self.relationships.push((name.into(), Kind::BelongsTo, relationship));
        self
    }
    pub fn has_many(mut self, name: impl Into<String>, relationship: Relationship) -> Self {
        self.relationships.push((name.into(), Kind::HasMany, relationship));
        self
    }
}

// ------------- Resolved descriptors -------------
/// The relationship on the target model that has to be kept in sync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InverseBinding {
    pub relationship: String,
    pub foreign_key: String,
    pub kind: Kind,
}

#[derive(Clone, Debug)]
pub struct Descriptor {
    name: String,
    kind: Kind,
    foreign_key: String,
    owner: String,
    target: String,
    policy: InversePolicy,
    inverse: Option<InverseBinding>,
}

impl Descriptor {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn kind(&self) -> Kind {
        self.kind
    }
    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }
    /// Model declaring this relationship.
    pub fn owner(&self) -> &str {
        &self.owner
    }
    /// Model this relationship points at.
    pub fn target(&self) -> &str {
        &self.target
    }
    pub fn policy(&self) -> &InversePolicy {
        &self.policy
    }
    /// The binding to write through, `None` when inverse writes are
    /// suppressed from either end or no inverse exists.
    pub fn inverse(&self) -> Option<&InverseBinding> {
        self.inverse.as_ref()
    }
}

#[derive(Debug)]
pub struct ModelClass {
    name: String,
    collection: String,
    relationships: Vec<Descriptor>,
}

impl ModelClass {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn collection(&self) -> &str {
        &self.collection
    }
    pub fn relationships(&self) -> &[Descriptor] {
        &self.relationships
    }
    pub fn relationship(&self, name: &str) -> Result<&Descriptor> {
        self.relationships
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| StoreError::UnknownRelationship {
                model: self.name.clone(),
                relationship: name.to_owned(),
            })
    }
    pub fn relationship_for_key(&self, foreign_key: &str) -> Option<&Descriptor> {
        self.relationships.iter().find(|d| d.foreign_key == foreign_key)
    }
    pub fn is_foreign_key(&self, key: &str) -> bool {
        self.relationship_for_key(key).is_some()
    }
}

/// Model name -> resolved model class.
#[derive(Debug, Default)]
pub struct Registry {
    models: HashMap<String, ModelClass, OtherHasher>,
    order: Vec<String>,
}

impl Registry {
    pub fn model(&self, name: &str) -> Result<&ModelClass> {
        self.models
            .get(name)
            .ok_or_else(|| StoreError::UnknownCollection(name.to_owned()))
    }
    pub fn models(&self) -> impl Iterator<Item = &ModelClass> {
        self.order.iter().filter_map(|name| self.models.get(name))
    }

    /// Resolves every declaration. All models must be present, since inverse
    /// lookups walk the target's declarations.
    fn resolve(definitions: &[ModelDefinition]) -> Result<Self> {
        let mut declared: HashMap<&str, &ModelDefinition, OtherHasher> = HashMap::default();
        for definition in definitions {
            if declared.insert(&definition.name, definition).is_some() {
                return Err(StoreError::schema(format!(
                    "model '{}' is declared twice",
                    definition.name
                )));
            }
        }

        let mut registry = Self::default();
        for definition in definitions {
            let mut relationships = Vec::with_capacity(definition.relationships.len());
            for (name, kind, declared_rel) in &definition.relationships {
                let target = target_name(name, *kind, declared_rel);
                let Some(target_definition) = declared.get(target.as_str()) else {
                    return Err(StoreError::schema(format!(
                        "relationship '{}.{}' points at unknown model '{}'",
                        definition.name, name, target
                    )));
                };
                let inverse = resolve_inverse(definition, name, declared_rel, target_definition)?;
                debug!(
                    model = %definition.name,
                    relationship = %name,
                    %kind,
                    target = %target,
                    inverse = ?inverse.as_ref().map(|b| &b.relationship),
                    "resolved relationship"
                );
                relationships.push(Descriptor {
                    name: name.clone(),
                    kind: *kind,
                    foreign_key: foreign_key_name(name, *kind, declared_rel),
                    owner: definition.name.clone(),
                    target,
                    policy: declared_rel.inverse.clone(),
                    inverse,
                });
            }
            registry.order.push(definition.name.clone());
            registry.models.insert(
                definition.name.clone(),
                ModelClass {
                    name: definition.name.clone(),
                    collection: collection_name(definition),
                    relationships,
                },
            );
        }
        Ok(registry)
    }
}

fn collection_name(definition: &ModelDefinition) -> String {
    definition
        .collection
        .clone()
        .unwrap_or_else(|| pluralize(&definition.name))
}

fn target_name(name: &str, kind: Kind, relationship: &Relationship) -> String {
    relationship.target.clone().unwrap_or_else(|| match kind {
        Kind::BelongsTo => name.to_owned(),
        Kind::HasMany => singularize(name),
    })
}

fn foreign_key_name(name: &str, kind: Kind, relationship: &Relationship) -> String {
    relationship.foreign_key.clone().unwrap_or_else(|| match kind {
        Kind::BelongsTo => format!("{name}Id"),
        Kind::HasMany => format!("{}Ids", singularize(name)),
    })
}

// The bound inverse also has to allow writes from its own end.
fn resolve_inverse(
    owner: &ModelDefinition,
    name: &str,
    relationship: &Relationship,
    target: &ModelDefinition,
) -> Result<Option<InverseBinding>> {
    let candidate = match &relationship.inverse {
        InversePolicy::Disabled => return Ok(None),
        InversePolicy::Named(inverse) => {
            let Some(found) = target.relationships.iter().find(|(n, _, _)| n == inverse) else {
                return Err(StoreError::schema(format!(
                    "relationship '{}.{}' names inverse '{}', which model '{}' does not declare",
                    owner.name, name, inverse, target.name
                )));
            };
            let found_target = target_name(&found.0, found.1, &found.2);
            if found_target != owner.name {
                return Err(StoreError::schema(format!(
                    "relationship '{}.{}' names inverse '{}.{}', which points at '{}'",
                    owner.name, name, target.name, inverse, found_target
                )));
            }
            found
        }
        // first match wins when several relationships point back at the owner
        InversePolicy::Auto => {
            let found = target
                .relationships
                .iter()
                .find(|(n, k, r)| target_name(n, *k, r) == owner.name);
            match found {
                Some(found) => found,
                None => return Ok(None),
            }
        }
    };
    let (inverse_name, inverse_kind, inverse_rel) = candidate;
    if inverse_rel.inverse == InversePolicy::Disabled {
        return Ok(None);
    }
    Ok(Some(InverseBinding {
        relationship: inverse_name.clone(),
        foreign_key: foreign_key_name(inverse_name, *inverse_kind, inverse_rel),
        kind: *inverse_kind,
    }))
}

// ------------- Builder -------------
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    definitions: Vec<ModelDefinition>,
    identity: IdentityStrategy,
    serializer: Serializer,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_config(mut self, config: &StoreConfig) -> Self {
        self.identity = config.identity;
        self.serializer.set_defaults(config.serializer.options());
        self
    }
    pub fn identity(mut self, strategy: IdentityStrategy) -> Self {
        self.identity = strategy;
        self
    }
    pub fn model(mut self, definition: ModelDefinition) -> Self {
        self.definitions.push(definition);
        self
    }
    /// Serializer options applied to every model unless overridden.
    pub fn serializer_defaults(mut self, options: SerializerOptions) -> Self {
        self.serializer.set_defaults(options);
        self
    }
    /// Serializer options for one model.
    pub fn serializer(mut self, model: impl Into<String>, options: SerializerOptions) -> Self {
        self.serializer.register(model, options);
        self
    }
    pub fn build(self) -> Result<Arc<Schema>> {
        let registry = Registry::resolve(&self.definitions)?;
        let mut database = Database::new();
        for definition in &self.definitions {
            let strategy = definition.identity.unwrap_or(self.identity);
            database.add_collection(Collection::with_allocator(
                collection_name(definition),
                strategy.allocator(),
            ))?;
        }
        for model in self.serializer.registered_models() {
            registry.model(model).map_err(|_| {
                StoreError::schema(format!("serializer registered for unknown model '{model}'"))
            })?;
        }
        Ok(Arc::new(Schema {
            registry,
            database,
            serializer: self.serializer,
        }))
    }
}

// ------------- Schema -------------
/// The assembled store: descriptor table, database and serializer. Records
/// keep an `Arc` to it.
#[derive(Debug)]
pub struct Schema {
    registry: Registry,
    database: Database,
    serializer: Serializer,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
    pub fn database(&self) -> &Database {
        &self.database
    }
    pub fn serializer(&self) -> &Serializer {
        &self.serializer
    }
    pub fn model(&self, name: &str) -> Result<&ModelClass> {
        self.registry.model(name)
    }

    /// A new, unsaved record.
    pub fn new_record(self: &Arc<Self>, model: &str, changes: impl Into<Changes>) -> Result<Record> {
        Record::new(Arc::clone(self), model, changes.into())
    }
    pub fn create(self: &Arc<Self>, model: &str, changes: impl Into<Changes>) -> Result<Record> {
        let mut record = self.new_record(model, changes)?;
        record.save()?;
        Ok(record)
    }
    pub fn find(self: &Arc<Self>, model: &str, id: impl Into<Id>) -> Result<Option<Record>> {
        let id = id.into();
        let row = self.rows(model, |c| c.find(&id))?;
        Ok(row.map(|row| Record::from_row(Arc::clone(self), model, row)))
    }
    pub fn find_many(self: &Arc<Self>, model: &str, ids: &[Id]) -> Result<RecordSet> {
        let rows = self.rows(model, |c| c.find_many(ids))?;
        Ok(self.record_set(model, rows))
    }
    pub fn find_by(self: &Arc<Self>, model: &str, query: &Attrs) -> Result<Option<Record>> {
        let row = self.rows(model, |c| c.find_by(query))?;
        Ok(row.map(|row| Record::from_row(Arc::clone(self), model, row)))
    }
    pub fn where_matching(self: &Arc<Self>, model: &str, query: &Attrs) -> Result<RecordSet> {
        let rows = self.rows(model, |c| c.where_matching(query))?;
        Ok(self.record_set(model, rows))
    }
    pub fn all(self: &Arc<Self>, model: &str) -> Result<RecordSet> {
        let rows = self.rows(model, Collection::all)?;
        Ok(self.record_set(model, rows))
    }
    pub fn first(self: &Arc<Self>, model: &str) -> Result<Option<Record>> {
        let row = self.rows(model, Collection::first)?;
        Ok(row.map(|row| Record::from_row(Arc::clone(self), model, row)))
    }
    pub fn none(self: &Arc<Self>, model: &str) -> Result<RecordSet> {
        self.registry.model(model)?;
        Ok(RecordSet::new(Arc::clone(self), model, Vec::new()))
    }

    fn rows<T>(&self, model: &str, read: impl FnOnce(&Collection) -> T) -> Result<T> {
        let class = self.registry.model(model)?;
        let collection = self.database.collection(class.collection())?;
        let guard = collection.lock()?;
        Ok(read(&*guard))
    }
    fn record_set(self: &Arc<Self>, model: &str, rows: Vec<Attrs>) -> RecordSet {
        let records = rows
            .into_iter()
            .map(|row| Record::from_row(Arc::clone(self), model, row))
            .collect();
        RecordSet::new(Arc::clone(self), model, records)
    }
}
