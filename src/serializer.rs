//! Projects records into plain JSON values.
//!
//! Options are layered: serializer defaults, then the options registered for
//! the model, then whatever the caller passes. Relationships named in
//! `include` (dot paths such as `"author.posts"` reach further) are rendered
//! according to the [`Mode`]:
//!
//! * `ForeignKey` keeps the foreign keys of included relationships and
//!   renders nothing else.
//! * `Embedded` replaces the foreign key with the related record(s) inlined
//!   under the relationship name.
//! * `SideLoaded` keeps the foreign keys and lists the related records in
//!   top-level arrays next to the root-wrapped payload.
//!
//! Foreign keys of relationships that are not included are removed unless
//! [`IdPolicy::Always`] is in effect.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::collection::Attrs;
use crate::error::Result;
use crate::identity::{Id, OtherHasher};
use crate::record::{Record, Related};
use crate::record_set::RecordSet;
use crate::schema::Descriptor;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    ForeignKey,
    Embedded,
    SideLoaded,
}

/// Root wrapping of the primary payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Root {
    Off,
    /// Wrap under the model name (records) or collection name (sets).
    On,
    Key(String),
}

impl From<bool> for Root {
    fn from(on: bool) -> Self {
        if on { Self::On } else { Self::Off }
    }
}
impl From<&str> for Root {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

/// Which foreign keys stay in the output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdPolicy {
    /// Only those of included relationships. Embedded relationships never
    /// keep theirs.
    #[default]
    Included,
    Always,
    Never,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrSelection {
    Only(Vec<String>),
    /// `true` entries select, `false` entries exclude. Without any `true`
    /// entry everything not excluded is kept.
    Map(Vec<(String, bool)>),
}

impl AttrSelection {
    fn apply(&self, attrs: Attrs) -> Attrs {
        match self {
            Self::Only(keys) => attrs.into_iter().filter(|(k, _)| keys.contains(k)).collect(),
            Self::Map(entries) => {
                let selects = entries.iter().any(|(_, keep)| *keep);
                attrs
                    .into_iter()
                    .filter(|(k, _)| match entries.iter().find(|(name, _)| name == k) {
                        Some((_, keep)) => *keep,
                        None => !selects,
                    })
                    .collect()
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SerializerOptions {
    pub attrs: Option<AttrSelection>,
    pub include: Option<Vec<String>>,
    pub mode: Option<Mode>,
    pub root: Option<Root>,
    pub ids: Option<IdPolicy>,
    /// Relationship name -> top-level key used when side-loading it.
    pub side_load_keys: HashMap<String, String, OtherHasher>,
}

impl SerializerOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn attrs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attrs = Some(AttrSelection::Only(keys.into_iter().map(Into::into).collect()));
        self
    }
    pub fn attrs_map<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        self.attrs = Some(AttrSelection::Map(
            entries.into_iter().map(|(k, keep)| (k.into(), keep)).collect(),
        ));
        self
    }
    pub fn include<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(paths.into_iter().map(Into::into).collect());
        self
    }
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }
    pub fn root(mut self, root: impl Into<Root>) -> Self {
        self.root = Some(root.into());
        self
    }
    pub fn ids(mut self, policy: IdPolicy) -> Self {
        self.ids = Some(policy);
        self
    }
    pub fn side_load_key(mut self, relationship: impl Into<String>, key: impl Into<String>) -> Self {
        self.side_load_keys.insert(relationship.into(), key.into());
        self
    }

    /// `top` wins wherever it says something.
    pub fn layer(&self, top: &Self) -> Self {
        let mut side_load_keys = self.side_load_keys.clone();
        side_load_keys.extend(top.side_load_keys.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            attrs: top.attrs.clone().or_else(|| self.attrs.clone()),
            include: top.include.clone().or_else(|| self.include.clone()),
            mode: top.mode.or(self.mode),
            root: top.root.clone().or_else(|| self.root.clone()),
            ids: top.ids.or(self.ids),
            side_load_keys,
        }
    }
}

// ------------- Include paths -------------
#[derive(Debug, Default)]
struct IncludeTree {
    children: Vec<(String, IncludeTree)>,
}

impl IncludeTree {
    fn parse(paths: &[String]) -> Self {
        let mut tree = Self::default();
        for path in paths {
            let mut node = &mut tree;
            for segment in path.split('.').filter(|s| !s.is_empty()) {
                let index = match node.children.iter().position(|(name, _)| name == segment) {
                    Some(index) => index,
                    None => {
                        node.children.push((segment.to_owned(), Self::default()));
                        node.children.len() - 1
                    }
                };
                node = &mut node.children[index].1;
            }
        }
        tree
    }
    fn get(&self, name: &str) -> Option<&Self> {
        self.children.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

// ------------- Side-loaded arrays -------------
#[derive(Debug, Default)]
struct SideLoads {
    // caller's key overrides, honoured at every nesting level
    keys: HashMap<String, String, OtherHasher>,
    order: Vec<String>,
    arrays: HashMap<String, (Vec<Value>, HashSet<Id, OtherHasher>), OtherHasher>,
}

impl SideLoads {
    fn new(options: &SerializerOptions) -> Self {
        Self {
            keys: options.side_load_keys.clone(),
            ..Self::default()
        }
    }
    /// Marks ids under `key` as already present so they are not repeated.
    fn seed(&mut self, key: &str, ids: Vec<Id>) {
        let entry = self.entry(key);
        entry.1.extend(ids);
    }
    fn contains(&self, key: &str, id: &Id) -> bool {
        self.arrays.get(key).is_some_and(|(_, seen)| seen.contains(id))
    }
    fn push(&mut self, key: &str, id: Id, value: Value) {
        let entry = self.entry(key);
        if entry.1.insert(id) {
            entry.0.push(value);
        }
    }
    fn entry(&mut self, key: &str) -> &mut (Vec<Value>, HashSet<Id, OtherHasher>) {
        if !self.arrays.contains_key(key) {
            self.order.push(key.to_owned());
        }
        self.arrays.entry(key.to_owned()).or_default()
    }
}

// ------------- Serializer -------------
#[derive(Debug, Default)]
pub struct Serializer {
    defaults: SerializerOptions,
    models: HashMap<String, SerializerOptions, OtherHasher>,
}

impl Serializer {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_defaults(&mut self, options: SerializerOptions) {
        self.defaults = self.defaults.layer(&options);
    }
    pub fn register(&mut self, model: impl Into<String>, options: SerializerOptions) {
        self.models.insert(model.into(), options);
    }
    pub fn registered_models(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
    /// The effective options for `model` after layering `overrides`.
    pub fn options_for(&self, model: &str, overrides: Option<&SerializerOptions>) -> SerializerOptions {
        let mut options = match self.models.get(model) {
            Some(registered) => self.defaults.layer(registered),
            None => self.defaults.clone(),
        };
        if let Some(overrides) = overrides {
            options = options.layer(overrides);
        }
        options
    }

    pub fn serialize(&self, record: &Record, overrides: Option<&SerializerOptions>) -> Result<Value> {
        let options = self.options_for(record.model_name(), overrides);
        let mode = options.mode.unwrap_or_default();
        let tree = IncludeTree::parse(options.include.as_deref().unwrap_or_default());
        let mut side = SideLoads::new(&options);
        let payload = self.render(record, &tree, &options, mode, &mut side)?;
        let root = root_key(&options, mode, record.model_name());
        Ok(wrap(root, Value::Object(payload), side))
    }

    pub fn serialize_collection(&self, set: &RecordSet, overrides: Option<&SerializerOptions>) -> Result<Value> {
        let options = self.options_for(set.model_name(), overrides);
        let mode = options.mode.unwrap_or_default();
        let tree = IncludeTree::parse(options.include.as_deref().unwrap_or_default());
        let default_root = set.schema().model(set.model_name())?.collection().to_owned();
        let root = root_key(&options, mode, &default_root);
        let mut side = SideLoads::new(&options);
        if let Some(root) = &root {
            side.seed(root, set.ids());
        }
        let payload = set
            .iter()
            .map(|record| self.render(record, &tree, &options, mode, &mut side).map(Value::Object))
            .collect::<Result<Vec<Value>>>()?;
        Ok(wrap(root, Value::Array(payload), side))
    }

    fn render(
        &self,
        record: &Record,
        tree: &IncludeTree,
        options: &SerializerOptions,
        mode: Mode,
        side: &mut SideLoads,
    ) -> Result<Attrs> {
        let schema = record.schema();
        let class = schema.model(record.model_name())?;
        for (name, _) in &tree.children {
            class.relationship(name)?;
        }
        let ids = options.ids.unwrap_or_default();
        let mut attrs = record.current_attrs()?;
        if let Some(selection) = &options.attrs {
            attrs = selection.apply(attrs);
        }

        for descriptor in class.relationships() {
            let key = descriptor.foreign_key();
            let Some(subtree) = tree.get(descriptor.name()) else {
                if ids != IdPolicy::Always {
                    attrs.shift_remove(key);
                }
                continue;
            };
            match mode {
                Mode::ForeignKey => {
                    if ids == IdPolicy::Never {
                        attrs.shift_remove(key);
                    }
                }
                Mode::Embedded => {
                    attrs.shift_remove(key);
                    let nested = self.options_for(descriptor.target(), None);
                    let value = match record.related(descriptor.name())? {
                        Related::One(None) => Value::Null,
                        Related::One(Some(related)) => {
                            Value::Object(self.render(&related, subtree, &nested, mode, side)?)
                        }
                        Related::Many(set) => Value::Array(
                            set.iter()
                                .map(|r| self.render(r, subtree, &nested, mode, side).map(Value::Object))
                                .collect::<Result<Vec<Value>>>()?,
                        ),
                    };
                    attrs.insert(descriptor.name().to_owned(), value);
                }
                Mode::SideLoaded => {
                    if ids == IdPolicy::Never {
                        attrs.shift_remove(key);
                    }
                    self.side_load(record, descriptor, subtree, options, side)?;
                }
            }
        }
        Ok(attrs)
    }

    fn side_load(
        &self,
        record: &Record,
        descriptor: &Descriptor,
        subtree: &IncludeTree,
        options: &SerializerOptions,
        side: &mut SideLoads,
    ) -> Result<()> {
        let name = descriptor.name();
        let key = match side.keys.get(name).or_else(|| options.side_load_keys.get(name)) {
            Some(key) => key.clone(),
            None => record.schema().model(descriptor.target())?.collection().to_owned(),
        };
        let related: Vec<Record> = match record.related(descriptor.name())? {
            Related::One(one) => one.into_iter().collect(),
            Related::Many(set) => set.into_vec(),
        };
        let nested = self.options_for(descriptor.target(), None);
        for peer in related {
            let Some(id) = peer.id() else { continue };
            if side.contains(&key, &id) {
                continue;
            }
            // reserve the slot first so that nested paths cannot repeat it
            side.seed(&key, vec![id.clone()]);
            let rendered = self.render(&peer, subtree, &nested, Mode::SideLoaded, side)?;
            side.arrays.entry(key.clone()).or_default().0.push(Value::Object(rendered));
        }
        Ok(())
    }
}

fn root_key(options: &SerializerOptions, mode: Mode, default: &str) -> Option<String> {
    match (mode, &options.root) {
        (_, Some(Root::Key(key))) => Some(key.clone()),
        (Mode::SideLoaded, Some(Root::Off)) => {
            warn!(root = %default, "side-loading requires a root key, enabling root wrapping");
            Some(default.to_owned())
        }
        (Mode::SideLoaded, _) | (_, Some(Root::On)) => Some(default.to_owned()),
        _ => None,
    }
}

// Side-loaded arrays stay at the top level next to the wrapped payload.
fn wrap(root: Option<String>, payload: Value, mut side: SideLoads) -> Value {
    let Some(root) = root else {
        return payload;
    };
    let mut out = Map::new();
    let payload = match (payload, side.arrays.remove(&root)) {
        (Value::Array(mut primary), Some((extra, _))) => {
            primary.extend(extra);
            Value::Array(primary)
        }
        (payload, _) => payload,
    };
    out.insert(root.clone(), payload);
    for key in side.order {
        if let Some((values, _)) = side.arrays.remove(&key) {
            out.insert(key, Value::Array(values));
        }
    }
    Value::Object(out)
}
