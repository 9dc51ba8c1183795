//! Store settings read with the `config` crate.
//!
//! Sources, lowest precedence first: built-in defaults, an optional file
//! (format taken from its extension) and `MOCKBASE_*` environment variables.
//! Nested keys use a double underscore, e.g. `MOCKBASE_SERIALIZER__MODE=embedded`.

use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;
use crate::identity::IdentityStrategy;
use crate::serializer::{IdPolicy, Mode, Root, SerializerOptions};

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub identity: IdentityStrategy,
    pub log_filter: String,
    pub serializer: SerializerConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            identity: IdentityStrategy::default(),
            log_filter: "info".to_owned(),
            serializer: SerializerConfig::default(),
        }
    }
}

/// Global serializer defaults. Unset keys leave the built-in behavior alone.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SerializerConfig {
    pub mode: Option<Mode>,
    pub root: Option<bool>,
    pub ids: Option<IdPolicy>,
}

impl SerializerConfig {
    pub fn options(&self) -> SerializerOptions {
        SerializerOptions {
            mode: self.mode,
            root: self.root.map(Root::from),
            ids: self.ids,
            ..SerializerOptions::default()
        }
    }
}

impl StoreConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("MOCKBASE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
