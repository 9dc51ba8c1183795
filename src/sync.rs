//! Keeps both sides of a relationship consistent.
//!
//! A record changes its own foreign keys through its collection; the matching
//! change on each peer is written through [`crate::database::PeerWriter`],
//! never through the peer's record. Peer writes need the owner's id, so for
//! records that are not saved yet they are queued as
//! [`PendingOperation`]s and drained after the owner has been persisted.
//!
//! Within one drain all unlinks run before all links.

use serde_json::Value;
use tracing::{debug, trace};

use crate::collection::Attrs;
use crate::error::{Result, StoreError};
use crate::identity::{Id, ids_from_value, ids_to_value};
use crate::record::Record;
use crate::record_set::RecordSet;
use crate::schema::{Descriptor, InverseBinding, Kind, ModelClass, Schema};

// ------------- Foreign key values -------------
/// The value held in a foreign-key field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ForeignKey {
    One(Option<Id>),
    /// Order is significant: two lists are equal only element by element.
    Many(Vec<Id>),
}

impl ForeignKey {
    pub fn empty(kind: Kind) -> Self {
        match kind {
            Kind::BelongsTo => Self::One(None),
            Kind::HasMany => Self::Many(Vec::new()),
        }
    }
    /// Reads the foreign key of `descriptor` out of raw attributes. Missing
    /// or malformed values read as empty.
    pub fn read(attrs: &Attrs, descriptor: &Descriptor) -> Self {
        let value = attrs.get(descriptor.foreign_key());
        match descriptor.kind() {
            Kind::BelongsTo => Self::One(value.and_then(Id::from_value)),
            Kind::HasMany => Self::Many(value.map(ids_from_value).unwrap_or_default()),
        }
    }
    pub fn ids(&self) -> Vec<Id> {
        match self {
            Self::One(id) => id.iter().cloned().collect(),
            Self::Many(ids) => ids.clone(),
        }
    }
    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(id) => id.is_none(),
            Self::Many(ids) => ids.is_empty(),
        }
    }
    pub fn to_value(&self) -> Value {
        match self {
            Self::One(Some(id)) => id.to_value(),
            Self::One(None) => Value::Null,
            Self::Many(ids) => ids_to_value(ids),
        }
    }
}

/// The foreign-key field of one relationship together with its new value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForeignKeyDelta {
    pub key: String,
    pub value: ForeignKey,
}

impl ForeignKeyDelta {
    pub fn into_attrs(self) -> Attrs {
        let mut attrs = Attrs::new();
        attrs.insert(self.key, self.value.to_value());
        attrs
    }
}

// ------------- Targets -------------
#[derive(Clone, Debug, PartialEq, Eq)]
enum TargetIds {
    Null,
    One(Id),
    Many(Vec<Id>),
    Unsaved,
}

/// Something a relationship can be pointed at: a record, several records,
/// or ids that are already known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    model: Option<String>,
    ids: TargetIds,
}

impl Target {
    pub fn null() -> Self {
        Self { model: None, ids: TargetIds::Null }
    }
    pub fn id(id: impl Into<Id>) -> Self {
        Self { model: None, ids: TargetIds::One(id.into()) }
    }
    pub fn ids(ids: impl IntoIterator<Item = Id>) -> Self {
        Self {
            model: None,
            ids: TargetIds::Many(ids.into_iter().collect()),
        }
    }
    /// Interprets a raw foreign-key value: null, a single id, or a list.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::null()),
            Value::Array(_) => Ok(Self::ids(ids_from_value(value))),
            other => Id::from_value(other)
                .map(Self::id)
                .ok_or_else(|| StoreError::InvalidId(other.to_string())),
        }
    }
    fn records<'r>(model: &str, records: impl IntoIterator<Item = &'r Record>) -> Self {
        let ids: Option<Vec<Id>> = records.into_iter().map(Record::id).collect();
        Self {
            model: Some(model.to_owned()),
            ids: ids.map_or(TargetIds::Unsaved, TargetIds::Many),
        }
    }

    /// Normalizes this target into the foreign-key value of `descriptor`.
    pub fn into_foreign_key(self, descriptor: &Descriptor) -> Result<ForeignKey> {
        if let Some(model) = &self.model {
            if model != descriptor.target() {
                return Err(StoreError::KindMismatch {
                    relationship: descriptor.name().to_owned(),
                    expected: "records of its target model",
                });
            }
        }
        match (descriptor.kind(), self.ids) {
            (_, TargetIds::Unsaved) => Err(StoreError::Unsaved {
                model: descriptor.target().to_owned(),
            }),
            (Kind::BelongsTo, TargetIds::Null) => Ok(ForeignKey::One(None)),
            (Kind::BelongsTo, TargetIds::One(id)) => Ok(ForeignKey::One(Some(id))),
            (Kind::BelongsTo, TargetIds::Many(_)) => Err(StoreError::KindMismatch {
                relationship: descriptor.name().to_owned(),
                expected: "a single record or id",
            }),
            (Kind::HasMany, TargetIds::Null) => Ok(ForeignKey::Many(Vec::new())),
            (Kind::HasMany, TargetIds::One(id)) => Ok(ForeignKey::Many(vec![id])),
            (Kind::HasMany, TargetIds::Many(ids)) => {
                let mut unique: Vec<Id> = Vec::with_capacity(ids.len());
                for id in ids {
                    if !unique.contains(&id) {
                        unique.push(id);
                    }
                }
                Ok(ForeignKey::Many(unique))
            }
        }
    }
}

impl From<&Record> for Target {
    fn from(record: &Record) -> Self {
        Self {
            model: Some(record.model_name().to_owned()),
            ids: record.id().map_or(TargetIds::Unsaved, TargetIds::One),
        }
    }
}
impl From<Option<&Record>> for Target {
    fn from(record: Option<&Record>) -> Self {
        record.map_or_else(Self::null, Self::from)
    }
}
impl From<&RecordSet> for Target {
    fn from(set: &RecordSet) -> Self {
        Self::records(set.model_name(), set.iter())
    }
}
impl From<&[Record]> for Target {
    fn from(records: &[Record]) -> Self {
        match records.first() {
            Some(first) => Self::records(first.model_name(), records),
            None => Self::ids(Vec::new()),
        }
    }
}
impl From<&[&Record]> for Target {
    fn from(records: &[&Record]) -> Self {
        match records.first() {
            Some(first) => Self::records(first.model_name(), records.iter().copied()),
            None => Self::ids(Vec::new()),
        }
    }
}
impl<const N: usize> From<[&Record; N]> for Target {
    fn from(records: [&Record; N]) -> Self {
        Self::from(&records[..])
    }
}
impl From<Id> for Target {
    fn from(id: Id) -> Self {
        Self::id(id)
    }
}
impl From<Vec<Id>> for Target {
    fn from(ids: Vec<Id>) -> Self {
        Self::ids(ids)
    }
}

// ------------- Pending operations -------------
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Link,
    Unlink,
}

/// An inverse write waiting for its owner to be saved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingOperation {
    pub relationship: String,
    pub direction: Direction,
    /// Peers whose inverse field is written.
    pub ids: Vec<Id>,
    pub binding: InverseBinding,
}

// ------------- Synchronizer -------------
pub struct Synchronizer<'s> {
    schema: &'s Schema,
    model: &'s ModelClass,
}

impl<'s> Synchronizer<'s> {
    pub fn new(schema: &'s Schema, model: &'s ModelClass) -> Self {
        Self { schema, model }
    }

    /// Points relationship `name` of the saved record `owner` at `target`.
    /// Peers are updated right away; the returned delta is the owner's own
    /// foreign-key change, which the caller persists.
    pub fn link(&self, owner: &Id, attrs: &Attrs, name: &str, target: Target) -> Result<ForeignKeyDelta> {
        let descriptor = self.model.relationship(name)?;
        let current = ForeignKey::read(attrs, descriptor);
        let next = target.into_foreign_key(descriptor)?;
        let operations = self.stage(descriptor, &current, &next);
        self.apply(owner, operations)?;
        Ok(ForeignKeyDelta {
            key: descriptor.foreign_key().to_owned(),
            value: next,
        })
    }

    /// Detaches `target` from relationship `name`, or everything when no
    /// target is given. Unlinking something that is not linked does nothing.
    pub fn unlink(
        &self,
        owner: &Id,
        attrs: &Attrs,
        name: &str,
        target: Option<Target>,
    ) -> Result<ForeignKeyDelta> {
        let descriptor = self.model.relationship(name)?;
        let current = ForeignKey::read(attrs, descriptor);
        let next = self.without(descriptor, &current, target)?;
        let kept = next.ids();
        let removed: Vec<Id> = current.ids().into_iter().filter(|id| !kept.contains(id)).collect();
        let operations = self.operation(descriptor, Direction::Unlink, removed).into_iter().collect();
        self.apply(owner, operations)?;
        Ok(ForeignKeyDelta {
            key: descriptor.foreign_key().to_owned(),
            value: next,
        })
    }

    /// The value relationship `descriptor` has after removing `target` from
    /// `current`.
    pub fn without(
        &self,
        descriptor: &Descriptor,
        current: &ForeignKey,
        target: Option<Target>,
    ) -> Result<ForeignKey> {
        let Some(target) = target else {
            return Ok(ForeignKey::empty(descriptor.kind()));
        };
        let removed = target.into_foreign_key(descriptor)?.ids();
        Ok(match current {
            ForeignKey::One(Some(id)) if removed.is_empty() || removed.contains(id) => ForeignKey::One(None),
            ForeignKey::One(held) => ForeignKey::One(held.clone()),
            ForeignKey::Many(ids) => ForeignKey::Many(ids.iter().filter(|id| !removed.contains(id)).cloned().collect()),
        })
    }

    /// Inverse writes needed to move relationship `descriptor` from
    /// `current` to `next`. Identical values stage nothing, and nothing is
    /// staged for relationships without a writable inverse.
    pub fn stage(&self, descriptor: &Descriptor, current: &ForeignKey, next: &ForeignKey) -> Vec<PendingOperation> {
        if descriptor.inverse().is_none() {
            return Vec::new();
        }
        if current == next {
            return Vec::new();
        }
        let operations: Vec<PendingOperation> = [
            self.operation(descriptor, Direction::Unlink, current.ids()),
            self.operation(descriptor, Direction::Link, next.ids()),
        ]
        .into_iter()
        .flatten()
        .collect();
        trace!(
            model = %self.model.name(),
            relationship = %descriptor.name(),
            staged = operations.len(),
            "staged inverse operations"
        );
        operations
    }

    fn operation(&self, descriptor: &Descriptor, direction: Direction, ids: Vec<Id>) -> Option<PendingOperation> {
        let binding = descriptor.inverse()?;
        if ids.is_empty() {
            return None;
        }
        Some(PendingOperation {
            relationship: descriptor.name().to_owned(),
            direction,
            ids,
            binding: binding.clone(),
        })
    }

    /// Writes queued operations into peer rows, unlinks first. `owner` must
    /// already be persisted. Returns true when one of the writes landed on
    /// the owner's own row.
    pub fn apply(&self, owner: &Id, operations: Vec<PendingOperation>) -> Result<bool> {
        if operations.is_empty() {
            return Ok(false);
        }
        let writer = self.schema.database().peer_writer();
        let own_collection = self.model.collection();
        let (unlinks, links): (Vec<_>, Vec<_>) = operations
            .into_iter()
            .partition(|op| op.direction == Direction::Unlink);
        let mut touched_self = false;

        for op in &unlinks {
            let descriptor = self.model.relationship(&op.relationship)?;
            let peers = self.peer_collection(descriptor)?;
            for peer in &op.ids {
                writer.unlink(peers, peer, &op.binding.foreign_key, op.binding.kind, owner)?;
                touched_self |= peers == own_collection && peer == owner;
            }
        }
        for op in &links {
            let descriptor = self.model.relationship(&op.relationship)?;
            let peers = self.peer_collection(descriptor)?;
            for peer in &op.ids {
                let displaced = writer.link(peers, peer, &op.binding.foreign_key, op.binding.kind, owner)?;
                touched_self |= peers == own_collection && peer == owner;
                // the peer moved away from another owner, which must forget it
                if let Some(previous) = displaced {
                    writer.unlink(own_collection, &previous, descriptor.foreign_key(), descriptor.kind(), peer)?;
                    touched_self |= &previous == owner;
                }
            }
        }
        debug!(
            model = %self.model.name(),
            %owner,
            unlinks = unlinks.len(),
            links = links.len(),
            "applied inverse operations"
        );
        Ok(touched_self)
    }

    /// Unlink operations for every relationship `attrs` currently holds,
    /// used when the owner is destroyed.
    pub fn detach_all(&self, attrs: &Attrs) -> Vec<PendingOperation> {
        self.model
            .relationships()
            .iter()
            .flat_map(|descriptor| {
                let current = ForeignKey::read(attrs, descriptor);
                self.stage(descriptor, &current, &ForeignKey::empty(descriptor.kind()))
            })
            .collect()
    }

    fn peer_collection(&self, descriptor: &Descriptor) -> Result<&'s str> {
        Ok(self.schema.model(descriptor.target())?.collection())
    }
}
