//! Demo of a small blog schema.
//!
//! Usage: `mockbase [config-file] [fixture.json]`
//!
//! Without a fixture file a handful of records are created and linked through
//! the record API. The payloads of the three serializer modes are printed to
//! stdout, followed by a dump of the store.

use std::fs;
use std::path::Path;
use std::process::ExitCode;

use serde_json::{Value, json};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mockbase::{
    Changes, Mode, ModelDefinition, Relationship, Schema, SerializerOptions, StoreConfig, StoreError,
};

fn blog(config: &StoreConfig) -> mockbase::Result<std::sync::Arc<Schema>> {
    Schema::builder()
        .with_config(config)
        .model(ModelDefinition::new("user").has_many("posts", Relationship::new()))
        .model(
            ModelDefinition::new("post")
                .belongs_to("author", Relationship::to("user"))
                .has_many("comments", Relationship::new()),
        )
        .model(ModelDefinition::new("comment").belongs_to("post", Relationship::new()))
        .build()
}

fn seed(schema: &std::sync::Arc<Schema>) -> mockbase::Result<()> {
    let alice = schema.create("user", json!({ "name": "Alice" }))?;
    let bob = schema.create("user", json!({ "name": "Bob" }))?;
    let mut hello = schema.create("post", Changes::new().set("title", "Hello").relate("author", &alice))?;
    schema.create("post", Changes::new().set("title", "Again").relate("author", &alice))?;
    let first = schema.create("comment", json!({ "body": "Nice" }))?;
    let second = schema.create("comment", json!({ "body": "Agreed" }))?;
    hello.link("comments", [&first, &second])?;
    // moving a post to another author also updates the previous one
    hello.link("author", &bob)?;
    Ok(())
}

fn run() -> mockbase::Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = args.next();
    let fixture_path = args.next();

    let config = StoreConfig::load(config_path.as_deref().map(Path::new))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let schema = blog(&config)?;
    match fixture_path {
        Some(path) => {
            let text = fs::read_to_string(&path).map_err(|e| StoreError::Fixture(format!("{path}: {e}")))?;
            let data: Value = serde_json::from_str(&text).map_err(|e| StoreError::Fixture(format!("{path}: {e}")))?;
            schema.database().load_data(data)?;
            info!(%path, "fixtures loaded");
        }
        None => seed(&schema)?,
    }

    let posts = schema.all("post")?;
    for mode in [Mode::ForeignKey, Mode::Embedded, Mode::SideLoaded] {
        let options = SerializerOptions::new().include(["author", "comments"]).mode(mode);
        println!("{mode:?}:");
        println!("{}", to_pretty(&posts.serialize(&options)?));
    }
    println!("store:");
    println!("{}", to_pretty(&schema.database().dump()?));
    Ok(())
}

fn to_pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "mockbase demo failed");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
