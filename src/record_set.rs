use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::identity::Id;
use crate::record::{Changes, Record};
use crate::schema::Schema;
use crate::serializer::SerializerOptions;
use crate::sync::Target;

/// An ordered list of records of one model, usually the result of a query.
/// Bulk operations run record by record in list order and stop at the first
/// error.
#[derive(Clone)]
pub struct RecordSet {
    schema: Arc<Schema>,
    model: String,
    records: Vec<Record>,
}

impl RecordSet {
    pub(crate) fn new(schema: Arc<Schema>, model: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            schema,
            model: model.into(),
            records,
        }
    }
    fn derive(&self, records: Vec<Record>) -> Self {
        Self::new(Arc::clone(&self.schema), self.model.clone(), records)
    }
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }
    pub fn model_name(&self) -> &str {
        &self.model
    }
    pub fn models(&self) -> &[Record] {
        &self.records
    }
    pub fn into_vec(self) -> Vec<Record> {
        self.records
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }
    pub fn len(&self) -> usize {
        self.records.len()
    }
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }
    /// Ids of the saved records, in order.
    pub fn ids(&self) -> Vec<Id> {
        self.records.iter().filter_map(Record::id).collect()
    }
    pub fn includes(&self, record: &Record) -> bool {
        self.records.iter().any(|kept| kept == record)
    }

    pub fn add(&mut self, record: Record) -> &mut Self {
        self.records.push(record);
        self
    }
    pub fn remove(&mut self, record: &Record) -> &mut Self {
        self.records.retain(|kept| kept != record);
        self
    }
    pub fn filter(&self, predicate: impl Fn(&Record) -> bool) -> Self {
        self.derive(self.records.iter().filter(|r| predicate(r)).cloned().collect())
    }
    pub fn sort_by(&self, compare: impl FnMut(&Record, &Record) -> Ordering) -> Self {
        let mut records = self.records.clone();
        records.sort_by(compare);
        self.derive(records)
    }
    /// Records in `begin..end`, clamped to the set.
    pub fn slice(&self, begin: usize, end: Option<usize>) -> Self {
        let end = end.unwrap_or(self.records.len()).min(self.records.len());
        let begin = begin.min(end);
        self.derive(self.records[begin..end].to_vec())
    }
    /// Appends the records of `other`.
    pub fn merge(&mut self, other: Self) -> &mut Self {
        self.records.extend(other.records);
        self
    }

    pub fn save(&mut self) -> Result<()> {
        self.records.iter_mut().try_for_each(Record::save)
    }
    pub fn update(&mut self, changes: &Changes) -> Result<()> {
        self.records.iter_mut().try_for_each(|r| r.update(changes.clone()))
    }
    pub fn reload(&mut self) -> Result<()> {
        self.records.iter_mut().try_for_each(Record::reload)
    }
    pub fn destroy(&mut self) -> Result<()> {
        self.records.iter_mut().try_for_each(Record::destroy)
    }
    pub fn link(&mut self, name: &str, target: impl Into<Target>) -> Result<()> {
        let target = target.into();
        self.records.iter_mut().try_for_each(|r| r.link(name, target.clone()))
    }
    pub fn unlink(&mut self, name: &str, target: Option<Target>) -> Result<()> {
        self.records.iter_mut().try_for_each(|r| r.unlink(name, target.clone()))
    }

    /// Serializes with the registered options of this set's model.
    pub fn to_json(&self) -> Result<Value> {
        self.schema.serializer().serialize_collection(self, None)
    }
    pub fn serialize(&self, options: &SerializerOptions) -> Result<Value> {
        self.schema.serializer().serialize_collection(self, Some(options))
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;
    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl fmt::Debug for RecordSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RecordSet")
            .field("model", &self.model)
            .field("records", &self.records)
            .finish()
    }
}

impl fmt::Display for RecordSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ids: Vec<String> = self
            .records
            .iter()
            .map(|r| r.id().map_or_else(|| "new".to_owned(), |id| id.to_string()))
            .collect();
        write!(f, "collection:{}({})", self.model, ids.join(","))
    }
}
