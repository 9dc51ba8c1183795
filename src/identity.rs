//! Record identifiers and the strategies that hand them out.
//!
//! Every [`crate::collection::Collection`] owns one allocator. Identifiers are
//! unique within that collection only; two collections may both hold an id `"1"`.

use core::hash::BuildHasherDefault;
use std::collections::HashSet;
use std::fmt;

use seahash::SeaHasher;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};

pub type IdHasher = BuildHasherDefault<SeaHasher>;
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

pub const GENESIS: u64 = 0;

// ------------- Id -------------
/// An opaque record identifier, either numeric or textual.
///
/// `Id::Int(1)` and `Id::Str("1")` are different identifiers; which one a
/// collection issues depends on its allocator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Int(u64),
    Str(String),
}

impl Id {
    /// Reads an identifier out of a raw attribute value. Null, booleans,
    /// fractional or negative numbers and nested values are not identifiers.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Str(s.clone())),
            Value::Number(n) => n.as_u64().map(Self::Int),
            _ => None,
        }
    }
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Str(s) => Value::String(s.clone()),
        }
    }
    /// The numeric reading of this id, used by allocators to move their
    /// counter past explicitly supplied ids.
    fn as_counter(&self) -> Option<u64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Str(s) => s.parse().ok(),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for Id {
    fn from(n: u64) -> Self {
        Self::Int(n)
    }
}
impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}
impl From<String> for Id {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

/// Converts a foreign-key list value into ids, skipping anything that is not
/// an identifier.
pub fn ids_from_value(value: &Value) -> Vec<Id> {
    match value {
        Value::Array(items) => items.iter().filter_map(Id::from_value).collect(),
        _ => Vec::new(),
    }
}

pub fn ids_to_value(ids: &[Id]) -> Value {
    Value::Array(ids.iter().map(Id::to_value).collect())
}

// ------------- Allocators -------------
/// Issues identifiers for one collection.
pub trait IdentityAllocator: fmt::Debug + Send {
    /// Hands out the next unused identifier. Fails once the counter has
    /// reached `u64::MAX`.
    fn fetch(&mut self) -> Result<Id>;
    /// Reserves an identifier that was supplied from the outside, e.g. by a
    /// fixture or an explicit `id` attribute.
    fn set(&mut self, id: &Id) -> Result<()>;
    fn reset(&mut self);
}

/// Shared bookkeeping for the counter based strategies.
#[derive(Debug, Default)]
struct Counter {
    lower_bound: u64,
    retained: HashSet<Id, IdHasher>,
}

impl Counter {
    fn next(&mut self, wrap: impl Fn(u64) -> Id) -> Result<Id> {
        // explicitly set ids may be non-contiguous, so skip any that are taken
        loop {
            self.lower_bound = self
                .lower_bound
                .checked_add(1)
                .ok_or_else(|| StoreError::Exhausted { collection: String::new() })?;
            let id = wrap(self.lower_bound);
            if self.retained.insert(id.clone()) {
                return Ok(id);
            }
        }
    }
    fn retain(&mut self, id: &Id) -> Result<()> {
        if !self.retained.insert(id.clone()) {
            return Err(StoreError::DuplicateId {
                collection: String::new(),
                id: id.to_string(),
            });
        }
        if let Some(n) = id.as_counter() {
            if n > self.lower_bound {
                self.lower_bound = n;
            }
        }
        Ok(())
    }
    fn reset(&mut self) {
        self.lower_bound = GENESIS;
        self.retained.clear();
    }
}

/// Issues `"1"`, `"2"`, `"3"`, ...
#[derive(Debug, Default)]
pub struct StringIdentity {
    counter: Counter,
}

impl StringIdentity {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityAllocator for StringIdentity {
    fn fetch(&mut self) -> Result<Id> {
        self.counter.next(|n| Id::Str(n.to_string()))
    }
    fn set(&mut self, id: &Id) -> Result<()> {
        self.counter.retain(id)
    }
    fn reset(&mut self) {
        self.counter.reset();
    }
}

/// Issues `1`, `2`, `3`, ...
#[derive(Debug, Default)]
pub struct NumericIdentity {
    counter: Counter,
}

impl NumericIdentity {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityAllocator for NumericIdentity {
    fn fetch(&mut self) -> Result<Id> {
        self.counter.next(Id::Int)
    }
    fn set(&mut self, id: &Id) -> Result<()> {
        self.counter.retain(id)
    }
    fn reset(&mut self) {
        self.counter.reset();
    }
}

/// Names an allocator strategy so that it can be picked from configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStrategy {
    #[default]
    String,
    Numeric,
}

impl IdentityStrategy {
    pub fn allocator(self) -> Box<dyn IdentityAllocator> {
        match self {
            Self::String => Box::new(StringIdentity::new()),
            Self::Numeric => Box::new(NumericIdentity::new()),
        }
    }
}
