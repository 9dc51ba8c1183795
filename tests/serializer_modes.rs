use std::sync::Arc;

use mockbase::{
    Changes, IdPolicy, Mode, ModelDefinition, Relationship, Schema, SerializerOptions, StoreError,
};
use serde_json::json;

fn blog() -> mockbase::schema::SchemaBuilder {
    Schema::builder()
        .model(ModelDefinition::new("user").has_many("posts", Relationship::new()))
        .model(ModelDefinition::new("post").belongs_to("author", Relationship::to("user")))
}

fn setup() -> Arc<Schema> {
    let schema = blog().build().unwrap();
    schema
        .database()
        .load_data(json!({
            "users": [{ "id": "1", "name": "Alice" }],
            "posts": [{ "id": "1", "title": "Hi", "authorId": "1" }]
        }))
        .unwrap();
    schema
}

#[test]
fn foreign_key_mode_keeps_included_keys() {
    let schema = setup();
    let post = schema.find("post", "1").unwrap().unwrap();
    let options = SerializerOptions::new().include(["author"]);
    assert_eq!(
        post.serialize(&options).unwrap(),
        json!({ "id": "1", "title": "Hi", "authorId": "1" })
    );
    // not included, so the key goes
    assert_eq!(post.to_json().unwrap(), json!({ "id": "1", "title": "Hi" }));
}

#[test]
fn embedded_mode_inlines_related_records() {
    let schema = setup();
    let post = schema.find("post", "1").unwrap().unwrap();
    let options = SerializerOptions::new().include(["author"]).mode(Mode::Embedded);
    assert_eq!(
        post.serialize(&options).unwrap(),
        json!({ "id": "1", "title": "Hi", "author": { "id": "1", "name": "Alice" } })
    );

    let lonely = schema.create("user", json!({ "name": "Bob" })).unwrap();
    let options = SerializerOptions::new().include(["posts"]).mode(Mode::Embedded);
    assert_eq!(
        lonely.serialize(&options).unwrap(),
        json!({ "id": "2", "name": "Bob", "posts": [] })
    );
    let draft = schema.create("post", json!({ "title": "Draft" })).unwrap();
    let options = SerializerOptions::new().include(["author"]).mode(Mode::Embedded);
    assert_eq!(
        draft.serialize(&options).unwrap(),
        json!({ "id": "2", "title": "Draft", "author": null })
    );
}

#[test]
fn side_loaded_mode_wraps_the_root() {
    let schema = setup();
    let post = schema.find("post", "1").unwrap().unwrap();
    let options = SerializerOptions::new().include(["author"]).mode(Mode::SideLoaded);
    let expected = json!({
        "post": { "id": "1", "title": "Hi", "authorId": "1" },
        "users": [{ "id": "1", "name": "Alice" }]
    });
    assert_eq!(post.serialize(&options).unwrap(), expected);

    // root cannot be turned off while side-loading
    let options = options.root(false);
    assert_eq!(post.serialize(&options).unwrap(), expected);
}

#[test]
fn side_loaded_collections_dedupe_by_id() {
    let schema = setup();
    schema.create("post", json!({ "title": "Again", "authorId": "1" })).unwrap();
    let posts = schema.all("post").unwrap();
    let options = SerializerOptions::new()
        .include(["author"])
        .mode(Mode::SideLoaded)
        .side_load_key("author", "people");
    assert_eq!(
        posts.serialize(&options).unwrap(),
        json!({
            "posts": [
                { "id": "1", "title": "Hi", "authorId": "1" },
                { "id": "2", "title": "Again", "authorId": "1" }
            ],
            "people": [{ "id": "1", "name": "Alice" }]
        })
    );
}

#[test]
fn side_load_keys_apply_to_nested_paths() {
    let schema = blog().build().unwrap();
    schema
        .database()
        .load_data(json!({
            "users": [{ "id": "1", "name": "Alice", "postIds": ["1", "2"] }],
            "posts": [
                { "id": "1", "title": "Hi", "authorId": "1" },
                { "id": "2", "title": "Again", "authorId": "1" }
            ]
        }))
        .unwrap();
    let post = schema.find("post", "1").unwrap().unwrap();
    let options = SerializerOptions::new()
        .include(["author.posts"])
        .mode(Mode::SideLoaded)
        .side_load_key("posts", "articles");
    assert_eq!(
        post.serialize(&options).unwrap(),
        json!({
            "post": { "id": "1", "title": "Hi", "authorId": "1" },
            "users": [{ "id": "1", "name": "Alice", "postIds": ["1", "2"] }],
            "articles": [{ "id": "1", "title": "Hi" }, { "id": "2", "title": "Again" }]
        })
    );
}

#[test]
fn serialization_reads_keys_written_by_peers() {
    let schema = setup();
    let user = schema.find("user", "1").unwrap().unwrap();
    let mut post = schema.create("post", json!({ "title": "Again" })).unwrap();
    post.link("author", &user).unwrap();
    let options = SerializerOptions::new().include(["posts"]);
    assert_eq!(
        user.serialize(&options).unwrap(),
        json!({ "id": "1", "name": "Alice", "postIds": ["2"] })
    );
}

#[test]
fn root_key_can_be_chosen() {
    let schema = setup();
    let post = schema.find("post", "1").unwrap().unwrap();
    assert_eq!(
        post.serialize(&SerializerOptions::new().root(true)).unwrap(),
        json!({ "post": { "id": "1", "title": "Hi" } })
    );
    assert_eq!(
        post.serialize(&SerializerOptions::new().root("article")).unwrap(),
        json!({ "article": { "id": "1", "title": "Hi" } })
    );
    let posts = schema.all("post").unwrap();
    assert_eq!(
        posts.serialize(&SerializerOptions::new().root(true)).unwrap(),
        json!({ "posts": [{ "id": "1", "title": "Hi" }] })
    );
    assert_eq!(posts.to_json().unwrap(), json!([{ "id": "1", "title": "Hi" }]));
    let none = schema.none("post").unwrap();
    assert_eq!(
        none.serialize(&SerializerOptions::new().root(true)).unwrap(),
        json!({ "posts": [] })
    );
}

#[test]
fn attribute_selection() {
    let schema = setup();
    let post = schema.find("post", "1").unwrap().unwrap();
    assert_eq!(
        post.serialize(&SerializerOptions::new().attrs(["id", "title"])).unwrap(),
        json!({ "id": "1", "title": "Hi" })
    );
    assert_eq!(
        post.serialize(&SerializerOptions::new().attrs_map([("title", false)])).unwrap(),
        json!({ "id": "1" })
    );
    assert_eq!(
        post.serialize(&SerializerOptions::new().attrs_map([("title", true), ("id", false)]))
            .unwrap(),
        json!({ "title": "Hi" })
    );
}

#[test]
fn id_policy_controls_foreign_keys() {
    let schema = setup();
    let post = schema.find("post", "1").unwrap().unwrap();
    assert_eq!(
        post.serialize(&SerializerOptions::new().ids(IdPolicy::Always)).unwrap(),
        json!({ "id": "1", "title": "Hi", "authorId": "1" })
    );
    let options = SerializerOptions::new().include(["author"]).ids(IdPolicy::Never);
    assert_eq!(post.serialize(&options).unwrap(), json!({ "id": "1", "title": "Hi" }));
}

#[test]
fn registered_options_are_layered() {
    let schema = blog()
        .serializer_defaults(SerializerOptions::new().root(true))
        .serializer("post", SerializerOptions::new().include(["author"]).mode(Mode::Embedded))
        .build()
        .unwrap();
    let alice = schema.create("user", json!({ "name": "Alice" })).unwrap();
    let post = schema
        .create("post", Changes::new().set("title", "Hi").relate("author", &alice))
        .unwrap();

    assert_eq!(
        post.to_json().unwrap(),
        json!({ "post": { "id": "1", "title": "Hi", "author": { "id": "1", "name": "Alice" } } })
    );
    let overrides = SerializerOptions::new().mode(Mode::ForeignKey).root(false);
    assert_eq!(
        post.serialize(&overrides).unwrap(),
        json!({ "id": "1", "title": "Hi", "authorId": "1" })
    );
}

#[test]
fn dot_paths_reach_further() {
    let schema = blog().build().unwrap();
    let alice = schema.create("user", json!({ "name": "Alice" })).unwrap();
    let post = schema
        .create("post", Changes::new().set("title", "Hi").relate("author", &alice))
        .unwrap();

    let embedded = SerializerOptions::new().include(["author.posts"]).mode(Mode::Embedded);
    assert_eq!(
        post.serialize(&embedded).unwrap(),
        json!({
            "id": "1",
            "title": "Hi",
            "author": { "id": "1", "name": "Alice", "posts": [{ "id": "1", "title": "Hi" }] }
        })
    );

    let side_loaded = SerializerOptions::new().include(["author.posts"]).mode(Mode::SideLoaded);
    assert_eq!(
        post.serialize(&side_loaded).unwrap(),
        json!({
            "post": { "id": "1", "title": "Hi", "authorId": "1" },
            "users": [{ "id": "1", "name": "Alice", "postIds": ["1"] }],
            "posts": [{ "id": "1", "title": "Hi" }]
        })
    );
}

#[test]
fn unknown_includes_are_errors() {
    let schema = setup();
    let post = schema.find("post", "1").unwrap().unwrap();
    let options = SerializerOptions::new().include(["editor"]);
    assert!(matches!(
        post.serialize(&options),
        Err(StoreError::UnknownRelationship { .. })
    ));
}
