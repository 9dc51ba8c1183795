use mockbase::schema::InverseBinding;
use mockbase::{
    IdentityStrategy, InversePolicy, Kind, ModelDefinition, Relationship, Schema, SerializerOptions, StoreError,
};
use serde_json::json;

fn is_schema_error<T>(result: mockbase::Result<T>) -> bool {
    matches!(result, Err(StoreError::Schema { .. }))
}

#[test]
fn defaults_are_derived_from_names() {
    let schema = Schema::builder()
        .model(ModelDefinition::new("user").has_many("posts", Relationship::new()))
        .model(
            ModelDefinition::new("post")
                .belongs_to("author", Relationship::to("user"))
                .has_many("categories", Relationship::new()),
        )
        .model(ModelDefinition::new("category"))
        .build()
        .unwrap();

    let user = schema.model("user").unwrap();
    assert_eq!(user.collection(), "users");
    let posts = user.relationship("posts").unwrap();
    assert_eq!(posts.kind(), Kind::HasMany);
    assert_eq!(posts.target(), "post");
    assert_eq!(posts.foreign_key(), "postIds");
    assert_eq!(
        posts.inverse(),
        Some(&InverseBinding {
            relationship: "author".to_owned(),
            foreign_key: "authorId".to_owned(),
            kind: Kind::BelongsTo,
        })
    );

    let post = schema.model("post").unwrap();
    let author = post.relationship("author").unwrap();
    assert_eq!(author.foreign_key(), "authorId");
    assert_eq!(author.owner(), "post");
    assert_eq!(author.inverse().map(|b| b.relationship.as_str()), Some("posts"));
    let categories = post.relationship("categories").unwrap();
    assert_eq!(categories.target(), "category");
    assert_eq!(categories.foreign_key(), "categoryIds");
    assert!(categories.inverse().is_none());
    assert!(post.is_foreign_key("authorId"));
    assert!(!post.is_foreign_key("title"));

    assert_eq!(schema.model("category").unwrap().collection(), "categories");
    assert_eq!(
        schema.database().collection_names(),
        &["users".to_owned(), "posts".to_owned(), "categories".to_owned()]
    );
}

#[test]
fn overrides_replace_defaults() {
    let schema = Schema::builder()
        .model(
            ModelDefinition::new("person")
                .collection("folks")
                .has_many("articles", Relationship::to("post").foreign_key("writtenIds")),
        )
        .model(
            ModelDefinition::new("post")
                .belongs_to("writer", Relationship::to("person").foreign_key("writer_id").inverse("articles")),
        )
        .build()
        .unwrap();

    let person = schema.model("person").unwrap();
    assert_eq!(person.collection(), "folks");
    let articles = person.relationship("articles").unwrap();
    assert_eq!(articles.foreign_key(), "writtenIds");
    assert_eq!(articles.inverse().map(|b| b.foreign_key.as_str()), Some("writer_id"));

    let writer = schema.model("post").unwrap().relationship("writer").unwrap();
    assert_eq!(writer.policy(), &InversePolicy::Named("articles".to_owned()));
    assert_eq!(writer.inverse().map(|b| b.foreign_key.as_str()), Some("writtenIds"));

    let mut ada = schema.create("person", json!({ "name": "Ada" })).unwrap();
    let post = schema.create("post", json!({ "title": "Notes" })).unwrap();
    ada.link("articles", [&post]).unwrap();
    let post = schema.find("post", "1").unwrap().unwrap();
    assert_eq!(post.attr("writer_id"), Some(&json!("1")));
}

#[test]
fn first_matching_inverse_wins() {
    let schema = Schema::builder()
        .model(ModelDefinition::new("user").has_many("posts", Relationship::new()))
        .model(
            ModelDefinition::new("post")
                .belongs_to("author", Relationship::to("user"))
                .belongs_to("editor", Relationship::to("user")),
        )
        .build()
        .unwrap();
    let posts = schema.model("user").unwrap().relationship("posts").unwrap();
    assert_eq!(posts.inverse().map(|b| b.relationship.as_str()), Some("author"));
    let editor = schema.model("post").unwrap().relationship("editor").unwrap();
    assert_eq!(editor.inverse().map(|b| b.relationship.as_str()), Some("posts"));
}

#[test]
fn suppression_applies_from_either_end() {
    let schema = Schema::builder()
        .model(ModelDefinition::new("user").has_many("posts", Relationship::new().no_inverse()))
        .model(ModelDefinition::new("post").belongs_to("author", Relationship::to("user")))
        .build()
        .unwrap();
    let posts = schema.model("user").unwrap().relationship("posts").unwrap();
    assert_eq!(posts.policy(), &InversePolicy::Disabled);
    assert!(posts.inverse().is_none());
    let author = schema.model("post").unwrap().relationship("author").unwrap();
    assert_eq!(author.policy(), &InversePolicy::Auto);
    assert!(author.inverse().is_none());
}

#[test]
fn unknown_targets_are_rejected() {
    let result = Schema::builder()
        .model(ModelDefinition::new("post").belongs_to("author", Relationship::to("writer")))
        .build();
    assert!(is_schema_error(result));
}

#[test]
fn missing_named_inverse_is_rejected() {
    let result = Schema::builder()
        .model(ModelDefinition::new("user").has_many("posts", Relationship::new().inverse("writer")))
        .model(ModelDefinition::new("post").belongs_to("author", Relationship::to("user")))
        .build();
    assert!(is_schema_error(result));
}

#[test]
fn named_inverse_must_point_back() {
    let result = Schema::builder()
        .model(ModelDefinition::new("user").has_many("posts", Relationship::new().inverse("comments")))
        .model(ModelDefinition::new("post").has_many("comments", Relationship::new()))
        .model(ModelDefinition::new("comment"))
        .build();
    assert!(is_schema_error(result));
}

#[test]
fn duplicate_models_are_rejected() {
    let result = Schema::builder()
        .model(ModelDefinition::new("user"))
        .model(ModelDefinition::new("user"))
        .build();
    assert!(is_schema_error(result));
}

#[test]
fn serializers_need_a_model() {
    let result = Schema::builder()
        .model(ModelDefinition::new("user"))
        .serializer("ghost", SerializerOptions::new())
        .build();
    assert!(is_schema_error(result));
}

#[test]
fn identity_strategy_can_be_set_per_model() {
    let schema = Schema::builder()
        .identity(IdentityStrategy::Numeric)
        .model(ModelDefinition::new("user"))
        .model(ModelDefinition::new("tag").identity(IdentityStrategy::String))
        .build()
        .unwrap();
    let user = schema.create("user", json!({})).unwrap();
    assert_eq!(user.attrs()["id"], json!(1));
    let tag = schema.create("tag", json!({})).unwrap();
    assert_eq!(tag.attrs()["id"], json!("1"));
    assert!(schema.find("user", 1u64).unwrap().is_some());
    assert!(schema.find("user", "1").unwrap().is_none());
}
