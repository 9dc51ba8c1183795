use std::sync::PoisonError;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Schema error: {message}")]
    Schema { message: String },
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),
    #[error("Unknown relationship '{relationship}' on model '{model}'")]
    UnknownRelationship { model: String, relationship: String },
    #[error("Relationship '{relationship}' expects {expected}")]
    KindMismatch { relationship: String, expected: &'static str },
    #[error("A new '{model}' record must be saved before it can be referenced")]
    Unsaved { model: String },
    #[error("The id {id} is already used in collection '{collection}'")]
    DuplicateId { collection: String, id: String },
    #[error("No identifiers left in collection '{collection}'")]
    Exhausted { collection: String },
    #[error("Invalid id: {0}")]
    InvalidId(String),
    #[error("Fixture error: {0}")]
    Fixture(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

// Helper conversions
impl From<config::ConfigError> for StoreError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl<T> From<PoisonError<T>> for StoreError {
    fn from(e: PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}

impl StoreError {
    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Self::Schema { message: message.into() }
    }
}
