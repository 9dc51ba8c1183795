//! A single entity instance.
//!
//! A [`Record`] holds a copy of its row. Changes to plain attributes and
//! foreign keys are made on that copy and written back by [`Record::save`];
//! [`Record::link`] and [`Record::unlink`] on a saved record persist right
//! away. The peer side of every relationship change goes through the
//! [`Synchronizer`].

use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;

use crate::collection::{Attrs, Collection, ID};
use crate::error::{Result, StoreError};
use crate::identity::Id;
use crate::record_set::RecordSet;
use crate::schema::{Descriptor, ModelClass, Schema};
use crate::serializer::SerializerOptions;
use crate::sync::{ForeignKey, PendingOperation, Synchronizer, Target};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    New,
    Saved,
}

/// Attribute and relationship changes applied together.
#[derive(Clone, Debug, Default)]
pub struct Changes {
    attrs: Attrs,
    relationships: Vec<(String, Target)>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }
    /// Points relationship `name` at `target`, replacing what it held.
    pub fn relate(mut self, name: impl Into<String>, target: impl Into<Target>) -> Self {
        self.relationships.push((name.into(), target.into()));
        self
    }
}

impl From<Attrs> for Changes {
    fn from(attrs: Attrs) -> Self {
        Self { attrs, relationships: Vec::new() }
    }
}

/// Only an object contributes attributes; any other value is no change.
impl From<Value> for Changes {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(attrs) => Self::from(attrs),
            _ => Self::default(),
        }
    }
}

/// What [`Record::related`] hands back.
#[derive(Clone, Debug)]
pub enum Related {
    One(Option<Record>),
    Many(RecordSet),
}

impl Related {
    /// The belongs-to record, `None` when unset or for a has-many result.
    pub fn one(self) -> Option<Record> {
        match self {
            Self::One(record) => record,
            Self::Many(_) => None,
        }
    }
    pub fn many(self) -> Option<RecordSet> {
        match self {
            Self::One(_) => None,
            Self::Many(set) => Some(set),
        }
    }
}

#[derive(Clone)]
pub struct Record {
    schema: Arc<Schema>,
    model: String,
    id: Option<Id>,
    attrs: Attrs,
    status: Status,
    pending: Vec<PendingOperation>,
    // relationships reassigned in memory since the last write
    assigned: Vec<String>,
}

impl Record {
    pub(crate) fn new(schema: Arc<Schema>, model: &str, changes: Changes) -> Result<Self> {
        let class = schema.model(model)?;
        let mut record = Self {
            model: class.name().to_owned(),
            schema: Arc::clone(&schema),
            id: None,
            attrs: Attrs::new(),
            status: Status::New,
            pending: Vec::new(),
            assigned: Vec::new(),
        };
        record.apply_changes(changes)?;
        // unset relationships start out empty
        for descriptor in class.relationships() {
            record
                .attrs
                .entry(descriptor.foreign_key())
                .or_insert_with(|| ForeignKey::empty(descriptor.kind()).to_value());
        }
        Ok(record)
    }
    pub(crate) fn from_row(schema: Arc<Schema>, model: &str, mut row: Attrs) -> Self {
        let id = row.shift_remove(ID).as_ref().and_then(Id::from_value);
        Self {
            schema,
            model: model.to_owned(),
            status: if id.is_some() { Status::Saved } else { Status::New },
            id,
            attrs: row,
            pending: Vec::new(),
            assigned: Vec::new(),
        }
    }

    pub fn id(&self) -> Option<Id> {
        self.id.clone()
    }
    pub fn model_name(&self) -> &str {
        &self.model
    }
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }
    pub fn status(&self) -> Status {
        self.status
    }
    pub fn is_new(&self) -> bool {
        self.status == Status::New
    }
    pub fn is_saved(&self) -> bool {
        self.status == Status::Saved
    }
    /// The raw attributes, `id` first once saved.
    pub fn attrs(&self) -> Attrs {
        let mut out = Attrs::with_capacity(self.attrs.len() + 1);
        if let Some(id) = &self.id {
            out.insert(ID.to_owned(), id.to_value());
        }
        out.extend(self.attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }
    /// Like [`Record::attrs`], but relationship keys this handle has not
    /// reassigned are read from the stored row, where peers may have
    /// changed them.
    pub fn current_attrs(&self) -> Result<Attrs> {
        let mut attrs = self.attrs();
        let Some(row) = self.stored_row()? else {
            return Ok(attrs);
        };
        for descriptor in self.class()?.relationships() {
            if self.is_assigned(descriptor.name()) {
                continue;
            }
            if let Some(value) = row.get(descriptor.foreign_key()) {
                attrs.insert(descriptor.foreign_key().to_owned(), value.clone());
            }
        }
        Ok(attrs)
    }
    /// The value as last read or written by this handle.
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }
    pub fn foreign_key(&self, relationship: &str) -> Result<ForeignKey> {
        let descriptor = self.class()?.relationship(relationship)?;
        self.live_foreign_key(descriptor)
    }
    /// Inverse writes still waiting for the next save.
    pub fn pending_operations(&self) -> &[PendingOperation] {
        &self.pending
    }

    /// Sets one attribute in memory. Foreign keys are staged like any other
    /// relationship assignment.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.apply_changes(Changes::new().set(key, value))
    }
    /// Points relationship `name` at `target` in memory, staging the inverse
    /// writes for the next save.
    pub fn assign(&mut self, name: &str, target: impl Into<Target>) -> Result<()> {
        self.apply_changes(Changes::new().relate(name, target))
    }

    /// Persists the record, assigning an id if it is new, then writes the
    /// staged inverse operations.
    pub fn save(&mut self) -> Result<()> {
        let collection = self.collection()?;
        if let Some(id) = &self.id {
            if !collection.lock()?.contains(id) {
                self.forget_vanished_row()?;
            }
        }
        if self.id.is_some() {
            self.restage_assigned()?;
        }
        let id = match &self.id {
            Some(id) => {
                // relationship keys not reassigned here belong to the store
                let schema = Arc::clone(&self.schema);
                let mut row = self.attrs.clone();
                for descriptor in schema.model(&self.model)?.relationships() {
                    if !self.is_assigned(descriptor.name()) {
                        row.shift_remove(descriptor.foreign_key());
                    }
                }
                collection.lock()?.update(id, &row);
                id.clone()
            }
            None => {
                let mut row = collection.lock()?.insert(self.attrs.clone())?;
                let id = row
                    .shift_remove(ID)
                    .as_ref()
                    .and_then(Id::from_value)
                    .ok_or_else(|| StoreError::Invariant("inserted row carries no id".to_owned()))?;
                self.attrs = row;
                self.id = Some(id.clone());
                self.status = Status::Saved;
                id
            }
        };
        debug!(model = %self.model, %id, "saved");
        self.assigned.clear();
        self.apply_pending_inverse_updates()?;
        self.refresh_foreign_keys(&id)
    }

    /// Drains the queue of staged inverse writes. Does nothing for a record
    /// that has not been saved yet.
    pub fn apply_pending_inverse_updates(&mut self) -> Result<()> {
        let Some(id) = self.id.clone() else {
            return Ok(());
        };
        let pending = std::mem::take(&mut self.pending);
        let schema = Arc::clone(&self.schema);
        let class = schema.model(&self.model)?;
        if Synchronizer::new(&schema, class).apply(&id, pending)? {
            self.refresh_foreign_keys(&id)?;
        }
        Ok(())
    }

    /// Applies `changes` and saves.
    pub fn update(&mut self, changes: impl Into<Changes>) -> Result<()> {
        self.apply_changes(changes.into())?;
        self.save()
    }

    /// Refreshes the attributes from the store and drops staged operations.
    /// A record whose row has disappeared becomes new again.
    pub fn reload(&mut self) -> Result<()> {
        let Some(id) = self.id.clone() else {
            return Ok(());
        };
        self.pending.clear();
        self.assigned.clear();
        match self.collection()?.lock()?.find(&id) {
            Some(mut row) => {
                row.shift_remove(ID);
                self.attrs = row;
            }
            None => {
                self.id = None;
                self.status = Status::New;
            }
        }
        Ok(())
    }

    /// Removes the row and detaches this record from its peers. The record
    /// becomes new again and loses any staged operations.
    pub fn destroy(&mut self) -> Result<()> {
        self.pending.clear();
        self.assigned.clear();
        let Some(id) = self.id.take() else {
            return Ok(());
        };
        let schema = Arc::clone(&self.schema);
        let class = schema.model(&self.model)?;
        let sync = Synchronizer::new(&schema, class);
        let stored = self.stored_attrs(&id)?;
        let detach = sync.detach_all(&stored);
        sync.apply(&id, detach)?;
        self.collection()?.lock()?.delete(&id);
        self.status = Status::New;
        debug!(model = %self.model, %id, "destroyed");
        Ok(())
    }

    /// Points relationship `name` at `target`. A saved record writes both
    /// sides immediately; a new one stages the peer side for its first save.
    pub fn link(&mut self, name: &str, target: impl Into<Target>) -> Result<()> {
        let target = target.into();
        let Some(id) = self.id.clone() else {
            return self.assign(name, target);
        };
        let schema = Arc::clone(&self.schema);
        let class = schema.model(&self.model)?;
        // anything staged for this relationship is superseded
        self.pending.retain(|op| op.relationship != name);
        self.assigned.retain(|assigned| assigned != name);
        let stored = self.stored_attrs(&id)?;
        let delta = Synchronizer::new(&schema, class).link(&id, &stored, name, target)?;
        self.persist_delta(&id, delta.into_attrs())?;
        self.refresh_foreign_keys(&id)
    }

    /// Detaches `target` from relationship `name`, or everything it holds
    /// when `target` is `None`.
    pub fn unlink(&mut self, name: &str, target: Option<Target>) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let class = schema.model(&self.model)?;
        let sync = Synchronizer::new(&schema, class);
        let Some(id) = self.id.clone() else {
            let descriptor = class.relationship(name)?;
            let current = ForeignKey::read(&self.attrs, descriptor);
            let next = sync.without(descriptor, &current, target)?;
            return self.assign(name, Target::from_value(&next.to_value())?);
        };
        self.pending.retain(|op| op.relationship != name);
        self.assigned.retain(|assigned| assigned != name);
        let stored = self.stored_attrs(&id)?;
        let delta = sync.unlink(&id, &stored, name, target)?;
        self.persist_delta(&id, delta.into_attrs())?;
        self.refresh_foreign_keys(&id)
    }

    /// The record(s) relationship `name` points at. Ids without a stored row
    /// are skipped.
    pub fn related(&self, name: &str) -> Result<Related> {
        let class = self.class()?;
        let descriptor = class.relationship(name)?;
        match self.live_foreign_key(descriptor)? {
            ForeignKey::One(None) => Ok(Related::One(None)),
            ForeignKey::One(Some(id)) => Ok(Related::One(self.schema.find(descriptor.target(), id)?)),
            ForeignKey::Many(ids) => Ok(Related::Many(self.schema.find_many(descriptor.target(), &ids)?)),
        }
    }

    pub fn to_json(&self) -> Result<Value> {
        self.schema.serializer().serialize(self, None)
    }
    pub fn serialize(&self, options: &SerializerOptions) -> Result<Value> {
        self.schema.serializer().serialize(self, Some(options))
    }

    fn class(&self) -> Result<&ModelClass> {
        self.schema.model(&self.model)
    }
    fn collection(&self) -> Result<Arc<Mutex<Collection>>> {
        let class = self.class()?;
        self.schema.database().collection(class.collection())
    }
    // Peers were synchronized against the stored row, not against
    // assignments that were never saved.
    fn stored_attrs(&self, id: &Id) -> Result<Attrs> {
        let stored = self.collection()?.lock()?.find(id);
        Ok(stored.unwrap_or_else(|| self.attrs.clone()))
    }
    fn stored_row(&self) -> Result<Option<Attrs>> {
        match &self.id {
            Some(id) => Ok(self.collection()?.lock()?.find(id)),
            None => Ok(None),
        }
    }
    fn is_assigned(&self, relationship: &str) -> bool {
        self.assigned.iter().any(|name| name == relationship)
    }
    fn live_foreign_key(&self, descriptor: &Descriptor) -> Result<ForeignKey> {
        if !self.is_assigned(descriptor.name()) {
            if let Some(row) = self.stored_row()? {
                return Ok(ForeignKey::read(&row, descriptor));
            }
        }
        Ok(ForeignKey::read(&self.attrs, descriptor))
    }
    // Peers write this record's foreign keys straight into its row, so they
    // are read back. Keys reassigned in memory and other attributes are left
    // alone.
    fn refresh_foreign_keys(&mut self, id: &Id) -> Result<()> {
        let Some(row) = self.collection()?.lock()?.find(id) else {
            return Ok(());
        };
        let schema = Arc::clone(&self.schema);
        for descriptor in schema.model(&self.model)?.relationships() {
            if self.is_assigned(descriptor.name()) {
                continue;
            }
            let key = descriptor.foreign_key();
            if let Some(value) = row.get(key) {
                self.attrs.insert(key.to_owned(), value.clone());
            }
        }
        Ok(())
    }
    // The row was deleted behind this handle's back. The record goes back to
    // being new, with every relationship it holds staged as if just assigned.
    fn forget_vanished_row(&mut self) -> Result<()> {
        let Some(id) = self.id.take() else {
            return Ok(());
        };
        debug!(model = %self.model, %id, "stored row vanished, saving as a new record");
        self.status = Status::New;
        self.pending.clear();
        self.assigned.clear();
        let schema = Arc::clone(&self.schema);
        let class = schema.model(&self.model)?;
        let sync = Synchronizer::new(&schema, class);
        for descriptor in class.relationships() {
            let current = ForeignKey::read(&self.attrs, descriptor);
            self.pending
                .extend(sync.stage(descriptor, &ForeignKey::empty(descriptor.kind()), &current));
        }
        Ok(())
    }
    // Peers may have moved the stored keys since an assignment was staged.
    fn restage_assigned(&mut self) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let class = schema.model(&self.model)?;
        let sync = Synchronizer::new(&schema, class);
        for name in self.assigned.clone() {
            let descriptor = class.relationship(&name)?;
            let baseline = self.persisted_foreign_key(descriptor)?;
            let next = ForeignKey::read(&self.attrs, descriptor);
            self.pending.retain(|op| op.relationship != name);
            self.pending.extend(sync.stage(descriptor, &baseline, &next));
        }
        Ok(())
    }
    fn persist_delta(&mut self, id: &Id, delta: Attrs) -> Result<()> {
        self.collection()?.lock()?.update(id, &delta);
        self.attrs.extend(delta);
        Ok(())
    }

    /// Splits `changes` into plain attributes and relationship assignments.
    /// A raw foreign key (`authorId`) and a record (`author`) stage the same
    /// operations.
    fn apply_changes(&mut self, changes: Changes) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let class = schema.model(&self.model)?;
        let mut assignments: Vec<(String, Target)> = Vec::new();
        for (key, value) in changes.attrs {
            if let Some(descriptor) = class.relationship_for_key(&key) {
                assignments.push((descriptor.name().to_owned(), Target::from_value(&value)?));
            } else if key == ID && self.id.is_some() {
                continue;
            } else {
                self.attrs.insert(key, value);
            }
        }
        assignments.extend(changes.relationships);

        let sync = Synchronizer::new(&schema, class);
        for (name, target) in assignments {
            let descriptor = class.relationship(&name)?;
            let next = target.into_foreign_key(descriptor)?;
            let baseline = self.persisted_foreign_key(descriptor)?;
            self.pending.retain(|op| op.relationship != name);
            self.pending.extend(sync.stage(descriptor, &baseline, &next));
            self.attrs.insert(descriptor.foreign_key().to_owned(), next.to_value());
            if !self.is_assigned(&name) {
                self.assigned.push(name);
            }
        }
        Ok(())
    }

    // Staging compares against the stored row so that repeated assignments
    // before a save replace each other instead of piling up.
    fn persisted_foreign_key(&self, descriptor: &Descriptor) -> Result<ForeignKey> {
        let Some(id) = &self.id else {
            return Ok(ForeignKey::empty(descriptor.kind()));
        };
        let row = self.collection()?.lock()?.find(id).unwrap_or_default();
        Ok(ForeignKey::read(&row, descriptor))
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.model)
            .field("id", &self.id)
            .field("attrs", &self.attrs)
            .field("status", &self.status)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "model:{}({})", self.model, id),
            None => write!(f, "model:{}(new)", self.model),
        }
    }
}

/// Two records are the same when they are the same saved row.
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.model == other.model && self.id.is_some() && self.id == other.id
    }
}
