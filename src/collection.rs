//! The raw record table for one entity type.
//!
//! A [`Collection`] knows nothing about relationships: foreign keys are plain
//! attributes here. Rows are kept in insertion order and every row carries its
//! `id` as the first attribute.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::trace;

use crate::error::{Result, StoreError};
use crate::identity::{Id, IdHasher, IdentityAllocator, StringIdentity};

/// Raw attributes of a record, keyed by field name.
pub type Attrs = Map<String, Value>;

pub const ID: &str = "id";

#[derive(Debug)]
pub struct Collection {
    name: String,
    allocator: Box<dyn IdentityAllocator>,
    order: Vec<Id>,
    rows: HashMap<Id, Attrs, IdHasher>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_allocator(name, Box::new(StringIdentity::new()))
    }
    pub fn with_allocator(name: impl Into<String>, allocator: Box<dyn IdentityAllocator>) -> Self {
        Self {
            name: name.into(),
            allocator,
            order: Vec::new(),
            rows: HashMap::default(),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn len(&self) -> usize {
        self.order.len()
    }
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
    pub fn contains(&self, id: &Id) -> bool {
        self.rows.contains_key(id)
    }

    /// Stores a new row and returns it with its id. An `id` present in
    /// `attrs` is reserved with the allocator, otherwise the next one is
    /// fetched.
    pub fn insert(&mut self, mut attrs: Attrs) -> Result<Attrs> {
        let id = match attrs.shift_remove(ID) {
            Some(Value::Null) | None => self.allocator.fetch().map_err(|e| self.rename(e))?,
            Some(value) => {
                let id = Id::from_value(&value)
                    .ok_or_else(|| StoreError::InvalidId(value.to_string()))?;
                self.allocator.set(&id).map_err(|e| self.rename(e))?;
                id
            }
        };
        let mut row = Attrs::with_capacity(attrs.len() + 1);
        row.insert(ID.to_owned(), id.to_value());
        row.extend(attrs);
        trace!(collection = %self.name, %id, "insert");
        self.order.push(id.clone());
        self.rows.insert(id, row.clone());
        Ok(row)
    }
    pub fn insert_many(&mut self, rows: Vec<Attrs>) -> Result<Vec<Attrs>> {
        rows.into_iter().map(|attrs| self.insert(attrs)).collect()
    }

    pub fn find(&self, id: &Id) -> Option<Attrs> {
        self.rows.get(id).cloned()
    }
    /// Rows for the given ids in the order asked for; absent ids are skipped.
    pub fn find_many(&self, ids: &[Id]) -> Vec<Attrs> {
        ids.iter().filter_map(|id| self.find(id)).collect()
    }
    pub fn find_by(&self, query: &Attrs) -> Option<Attrs> {
        self.iter().find(|row| matches(row, query)).cloned()
    }
    pub fn where_matching(&self, query: &Attrs) -> Vec<Attrs> {
        self.filter(|row| matches(row, query))
    }
    pub fn filter(&self, predicate: impl Fn(&Attrs) -> bool) -> Vec<Attrs> {
        self.iter().filter(|row| predicate(row)).cloned().collect()
    }
    pub fn first(&self) -> Option<Attrs> {
        self.iter().next().cloned()
    }
    pub fn all(&self) -> Vec<Attrs> {
        self.iter().cloned().collect()
    }
    pub fn ids(&self) -> &[Id] {
        &self.order
    }
    pub fn iter(&self) -> impl Iterator<Item = &Attrs> {
        self.order.iter().filter_map(|id| self.rows.get(id))
    }
    pub fn first_or_insert(&mut self, query: &Attrs, attrs: Attrs) -> Result<Attrs> {
        if let Some(row) = self.find_by(query) {
            return Ok(row);
        }
        let mut merged = query.clone();
        merged.extend(attrs);
        self.insert(merged)
    }

    /// Merges `attrs` into the row. Updating an absent id does nothing.
    pub fn update(&mut self, id: &Id, attrs: &Attrs) {
        match self.rows.get_mut(id) {
            Some(row) => merge(row, attrs),
            None => trace!(collection = %self.name, %id, "update of absent row ignored"),
        }
    }
    pub fn update_all(&mut self, attrs: &Attrs) {
        for row in self.rows.values_mut() {
            merge(row, attrs);
        }
    }
    pub fn update_where(&mut self, query: &Attrs, attrs: &Attrs) -> usize {
        let mut updated = 0;
        for row in self.rows.values_mut() {
            if matches(row, query) {
                merge(row, attrs);
                updated += 1;
            }
        }
        updated
    }
    /// Applies `edit` to the row in place. Returns false if the row is absent.
    pub(crate) fn modify(&mut self, id: &Id, edit: impl FnOnce(&mut Attrs)) -> bool {
        match self.rows.get_mut(id) {
            Some(row) => {
                edit(row);
                true
            }
            None => false,
        }
    }

    pub fn delete(&mut self, id: &Id) {
        if self.rows.remove(id).is_some() {
            self.order.retain(|kept| kept != id);
            trace!(collection = %self.name, %id, "delete");
        }
    }
    pub fn delete_where(&mut self, query: &Attrs) -> usize {
        let doomed: Vec<Id> = self
            .order
            .iter()
            .filter(|id| self.rows.get(*id).is_some_and(|row| matches(row, query)))
            .cloned()
            .collect();
        for id in &doomed {
            self.delete(id);
        }
        doomed.len()
    }
    /// Removes every row and restarts the allocator.
    pub fn clear(&mut self) {
        self.order.clear();
        self.rows.clear();
        self.allocator.reset();
    }

    fn rename(&self, e: StoreError) -> StoreError {
        match e {
            StoreError::DuplicateId { id, .. } => StoreError::DuplicateId {
                collection: self.name.clone(),
                id,
            },
            StoreError::Exhausted { .. } => StoreError::Exhausted {
                collection: self.name.clone(),
            },
            other => other,
        }
    }
}

fn matches(row: &Attrs, query: &Attrs) -> bool {
    query.iter().all(|(key, value)| row.get(key) == Some(value))
}

// the id of a stored row never changes
fn merge(row: &mut Attrs, attrs: &Attrs) {
    for (key, value) in attrs {
        if key != ID {
            row.insert(key.clone(), value.clone());
        }
    }
}
