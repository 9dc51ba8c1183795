use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::collection::{Attrs, Collection};
use crate::error::{Result, StoreError};
use crate::identity::{Id, OtherHasher, ids_from_value, ids_to_value};
use crate::schema::Kind;

// ------------- Database -------------
// This holds one collection per model, reachable by collection name
#[derive(Debug, Default)]
pub struct Database {
    collections: HashMap<String, Arc<Mutex<Collection>>, OtherHasher>,
    order: Vec<String>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add_collection(&mut self, collection: Collection) -> Result<()> {
        let name = collection.name().to_owned();
        if self.collections.contains_key(&name) {
            return Err(StoreError::schema(format!("collection '{name}' already exists")));
        }
        self.order.push(name.clone());
        self.collections.insert(name, Arc::new(Mutex::new(collection)));
        Ok(())
    }
    pub fn collection(&self, name: &str) -> Result<Arc<Mutex<Collection>>> {
        self.collections
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| StoreError::UnknownCollection(name.to_owned()))
    }
    pub fn collection_names(&self) -> &[String] {
        &self.order
    }

    /// Loads fixtures shaped as `{ "users": [ {...}, ... ], "posts": [...] }`.
    /// Rows are inserted as given; foreign keys are not synchronized.
    pub fn load_data(&self, data: Value) -> Result<()> {
        let Value::Object(collections) = data else {
            return Err(StoreError::Fixture("fixture data must be an object".to_owned()));
        };
        for (name, rows) in collections {
            let Value::Array(rows) = rows else {
                return Err(StoreError::Fixture(format!("'{name}' must be an array of records")));
            };
            let rows = rows
                .into_iter()
                .map(|row| match row {
                    Value::Object(attrs) => Ok(attrs),
                    other => Err(StoreError::Fixture(format!("'{name}' holds a non-record: {other}"))),
                })
                .collect::<Result<Vec<Attrs>>>()?;
            let collection = self.collection(&name)?;
            let inserted = collection.lock()?.insert_many(rows)?;
            debug!(collection = %name, rows = inserted.len(), "loaded fixtures");
        }
        Ok(())
    }
    /// The whole store as `{ collection: [rows] }`.
    pub fn dump(&self) -> Result<Value> {
        let mut out = Map::new();
        for name in &self.order {
            let collection = self.collection(name)?;
            let rows = collection.lock()?.all();
            out.insert(name.clone(), Value::Array(rows.into_iter().map(Value::Object).collect()));
        }
        Ok(Value::Object(out))
    }
    /// Empties every collection.
    pub fn clear(&self) -> Result<()> {
        for name in &self.order {
            self.collection(name)?.lock()?.clear();
        }
        Ok(())
    }

    pub(crate) fn peer_writer(&self) -> PeerWriter<'_> {
        PeerWriter { database: self }
    }
}

// ------------- PeerWriter -------------
// Writes one side of a relationship straight into a peer's stored row. This
// path never goes through the peer's record, so nothing propagates further.
pub(crate) struct PeerWriter<'db> {
    database: &'db Database,
}

impl PeerWriter<'_> {
    /// Makes the peer row reference `owner` through `foreign_key`. For a
    /// belongs-to field the id it held before is returned when it pointed
    /// somewhere else.
    pub(crate) fn link(
        &self,
        collection: &str,
        peer: &Id,
        foreign_key: &str,
        kind: Kind,
        owner: &Id,
    ) -> Result<Option<Id>> {
        let mut displaced = None;
        let found = self.database.collection(collection)?.lock()?.modify(peer, |row| match kind {
            Kind::HasMany => {
                let mut ids = row.get(foreign_key).map(ids_from_value).unwrap_or_default();
                if !ids.contains(owner) {
                    ids.push(owner.clone());
                    row.insert(foreign_key.to_owned(), ids_to_value(&ids));
                }
            }
            Kind::BelongsTo => {
                displaced = row
                    .get(foreign_key)
                    .and_then(Id::from_value)
                    .filter(|held| held != owner);
                row.insert(foreign_key.to_owned(), owner.to_value());
            }
        });
        if found {
            trace!(%collection, %peer, %foreign_key, %owner, "linked peer");
        } else {
            trace!(%collection, %peer, %foreign_key, "peer absent, link skipped");
        }
        Ok(displaced)
    }

    /// Drops `owner` from the peer row. A belongs-to field is only cleared
    /// while it still points at `owner`.
    pub(crate) fn unlink(
        &self,
        collection: &str,
        peer: &Id,
        foreign_key: &str,
        kind: Kind,
        owner: &Id,
    ) -> Result<()> {
        let found = self.database.collection(collection)?.lock()?.modify(peer, |row| match kind {
            Kind::HasMany => {
                let ids = row.get(foreign_key).map(ids_from_value).unwrap_or_default();
                if ids.contains(owner) {
                    let kept: Vec<Id> = ids.into_iter().filter(|id| id != owner).collect();
                    row.insert(foreign_key.to_owned(), ids_to_value(&kept));
                }
            }
            Kind::BelongsTo => {
                if row.get(foreign_key).and_then(Id::from_value).as_ref() == Some(owner) {
                    row.insert(foreign_key.to_owned(), Value::Null);
                }
            }
        });
        if found {
            trace!(%collection, %peer, %foreign_key, %owner, "unlinked peer");
        } else {
            trace!(%collection, %peer, %foreign_key, "peer absent, unlink skipped");
        }
        Ok(())
    }
}
