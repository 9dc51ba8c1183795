//! Mockbase – an in-memory, schema-driven relational store for mocking APIs.
//!
//! Records are plain JSON attribute maps kept in one [`collection::Collection`]
//! per model. Models declare `belongs_to` and `has_many` relationships, each
//! stored as a foreign key on the owning record (`authorId`, `postIds`). When
//! both ends of a relationship are declared, the store keeps them in step:
//! linking a post to its author also adds the post to the author's `postIds`.
//!
//! ## Modules
//! * [`identity`] – Record ids and the allocators that issue them.
//! * [`collection`] – Ordered, id-indexed tables with plain CRUD and queries.
//! * [`database`] – All collections of a schema, fixture loading and dumps.
//! * [`schema`] – Model declarations, the resolved relationship table and the
//!   [`schema::Schema`] handle every record points back to.
//! * [`sync`] – Staging and applying inverse foreign key writes.
//! * [`record`] / [`record_set`] – The synchronization-aware record API.
//! * [`serializer`] – JSON projection in foreign key, embedded or side-loaded mode.
//! * [`config`] – Settings from a file and `MOCKBASE_*` environment variables.
//!
//! ## Inverse Updates
//! A record stages the inverse writes implied by a relationship change and
//! applies them after its own row has been written, unlinks first. Peer rows
//! are written through a crate-private path that never goes back through the
//! peer's own record, so an update never propagates more than one hop.
//!
//! ## Quick Start
//! ```
//! use mockbase::{ModelDefinition, Relationship, Schema};
//! use serde_json::json;
//! # fn main() -> mockbase::Result<()> {
//! let schema = Schema::builder()
//!     .model(ModelDefinition::new("user").has_many("posts", Relationship::new()))
//!     .model(ModelDefinition::new("post").belongs_to("author", Relationship::to("user")))
//!     .build()?;
//! let alice = schema.create("user", json!({ "name": "Alice" }))?;
//! let mut post = schema.create("post", json!({ "title": "Hi" }))?;
//! post.link("author", &alice)?;
//! let alice = schema.find("user", "1")?.unwrap();
//! assert_eq!(alice.attr("postIds"), Some(&json!(["1"])));
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//! Dual licensed under Apache-2.0 and MIT.

pub mod collection;
pub mod config;
pub mod database;
pub mod error;
pub mod identity;
pub mod inflect;
pub mod record;
pub mod record_set;
pub mod schema;
pub mod serializer;
pub mod sync;

pub use crate::config::StoreConfig;
pub use crate::error::{Result, StoreError};
pub use crate::identity::{Id, IdentityStrategy};
pub use crate::record::{Changes, Record, Related};
pub use crate::record_set::RecordSet;
pub use crate::schema::{InversePolicy, Kind, ModelDefinition, Relationship, Schema};
pub use crate::serializer::{IdPolicy, Mode, Root, SerializerOptions};
pub use crate::sync::Target;
