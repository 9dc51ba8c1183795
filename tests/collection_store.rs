use mockbase::collection::{Attrs, Collection};
use mockbase::database::Database;
use mockbase::identity::{IdentityAllocator, NumericIdentity, StringIdentity};
use mockbase::{Id, StoreError};
use serde_json::{Value, json};

fn attrs(value: Value) -> Attrs {
    match value {
        Value::Object(map) => map,
        _ => panic!("not an object"),
    }
}

#[test]
fn insert_assigns_ids_and_puts_them_first() {
    let mut users = Collection::new("users");
    let row = users.insert(attrs(json!({ "name": "John", "email": "j@x.com" }))).unwrap();
    assert_eq!(row.keys().next().map(String::as_str), Some("id"));
    assert_eq!(Value::Object(row), json!({ "id": "1", "name": "John", "email": "j@x.com" }));
    assert_eq!(
        users.find(&Id::from("1")).map(Value::Object),
        Some(json!({ "id": "1", "name": "John", "email": "j@x.com" }))
    );
    assert_eq!(users.len(), 1);
}

#[test]
fn supplied_ids_move_the_counter() {
    let mut users = Collection::new("users");
    users.insert(attrs(json!({ "id": "5" }))).unwrap();
    let next = users.insert(attrs(json!({}))).unwrap();
    assert_eq!(next["id"], json!("6"));
    let err = users.insert(attrs(json!({ "id": "6" }))).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateId { .. }));
    assert!(matches!(
        users.insert(attrs(json!({ "id": true }))),
        Err(StoreError::InvalidId(_))
    ));
}

#[test]
fn allocators_skip_taken_ids() {
    let mut strings = StringIdentity::new();
    strings.set(&Id::from("2")).unwrap();
    assert_eq!(strings.fetch().unwrap(), Id::from("3"));
    strings.reset();
    assert_eq!(strings.fetch().unwrap(), Id::from("1"));

    let mut numbers = NumericIdentity::new();
    assert_eq!(numbers.fetch().unwrap(), Id::Int(1));
    numbers.set(&Id::Str("label".to_owned())).unwrap();
    assert_eq!(numbers.fetch().unwrap(), Id::Int(2));
    assert!(numbers.set(&Id::Int(2)).is_err());
}

#[test]
fn allocators_stop_at_the_largest_id() {
    let mut numbers = NumericIdentity::new();
    numbers.set(&Id::Int(u64::MAX)).unwrap();
    assert!(matches!(numbers.fetch(), Err(StoreError::Exhausted { .. })));

    let mut users = Collection::new("users");
    users.insert(attrs(json!({ "id": u64::MAX.to_string() }))).unwrap();
    let err = users.insert(attrs(json!({ "name": "Bob" }))).unwrap_err();
    assert!(matches!(err, StoreError::Exhausted { ref collection } if collection == "users"));
}

#[test]
fn update_merges_and_ignores_absent_rows() {
    let mut users = Collection::new("users");
    users.insert(attrs(json!({ "name": "Alice", "age": 30 }))).unwrap();
    users.update(&Id::from("1"), &attrs(json!({ "age": 31, "id": "9" })));
    users.update(&Id::from("2"), &attrs(json!({ "age": 1 })));
    assert_eq!(
        users.find(&Id::from("1")).map(Value::Object),
        Some(json!({ "id": "1", "name": "Alice", "age": 31 }))
    );
    assert_eq!(users.len(), 1);
}

#[test]
fn queries_match_every_listed_key() {
    let mut users = Collection::new("users");
    users
        .insert_many(vec![
            attrs(json!({ "name": "Alice", "role": "admin", "active": true })),
            attrs(json!({ "name": "Bob", "role": "guest", "active": true })),
            attrs(json!({ "name": "Carol", "role": "admin", "active": false })),
        ])
        .unwrap();

    let active_admins = users.where_matching(&attrs(json!({ "role": "admin", "active": true })));
    assert_eq!(active_admins.len(), 1);
    assert_eq!(active_admins[0]["name"], json!("Alice"));
    assert_eq!(
        users.find_by(&attrs(json!({ "role": "admin", "active": false })))
            .map(|row| row["name"].clone()),
        Some(json!("Carol"))
    );
    assert!(users.find_by(&attrs(json!({ "role": "owner" }))).is_none());
    assert_eq!(users.filter(|row| row["name"] != json!("Bob")).len(), 2);
    assert_eq!(users.first().map(|row| row["id"].clone()), Some(json!("1")));
    assert_eq!(
        users.find_many(&[Id::from("3"), Id::from("4"), Id::from("1")]).len(),
        2
    );

    assert_eq!(users.update_where(&attrs(json!({ "role": "admin" })), &attrs(json!({ "active": false }))), 2);
    users.update_all(&attrs(json!({ "seen": true })));
    assert!(users.iter().all(|row| row["seen"] == json!(true)));

    assert_eq!(users.delete_where(&attrs(json!({ "role": "admin" }))), 2);
    assert_eq!(users.ids(), &[Id::from("2")]);
}

#[test]
fn first_or_insert_reuses_matches() {
    let mut tags = Collection::new("tags");
    let rust = tags.first_or_insert(&attrs(json!({ "name": "rust" })), Attrs::new()).unwrap();
    let again = tags.first_or_insert(&attrs(json!({ "name": "rust" })), Attrs::new()).unwrap();
    assert_eq!(rust, again);
    let go = tags
        .first_or_insert(&attrs(json!({ "name": "go" })), attrs(json!({ "popular": true })))
        .unwrap();
    assert_eq!(Value::Object(go), json!({ "id": "2", "name": "go", "popular": true }));
    assert_eq!(tags.len(), 2);
}

#[test]
fn delete_and_clear() {
    let mut users = Collection::new("users");
    users.insert(attrs(json!({ "name": "Alice" }))).unwrap();
    users.insert(attrs(json!({ "name": "Bob" }))).unwrap();
    users.delete(&Id::from("1"));
    users.delete(&Id::from("1"));
    assert!(!users.contains(&Id::from("1")));
    assert_eq!(users.len(), 1);
    users.clear();
    assert!(users.is_empty());
    let row = users.insert(attrs(json!({ "name": "Carol" }))).unwrap();
    assert_eq!(row["id"], json!("1"));
}

#[test]
fn database_loads_and_dumps_fixtures() {
    let mut database = Database::new();
    database.add_collection(Collection::new("users")).unwrap();
    database
        .add_collection(Collection::with_allocator("posts", Box::new(NumericIdentity::new())))
        .unwrap();
    assert!(matches!(
        database.add_collection(Collection::new("users")),
        Err(StoreError::Schema { .. })
    ));

    database
        .load_data(json!({
            "users": [{ "id": "1", "name": "Alice" }, { "name": "Bob" }],
            "posts": [{ "title": "Hi", "authorId": "1" }]
        }))
        .unwrap();
    assert_eq!(
        database.dump().unwrap(),
        json!({
            "users": [{ "id": "1", "name": "Alice" }, { "id": "2", "name": "Bob" }],
            "posts": [{ "id": 1, "title": "Hi", "authorId": "1" }]
        })
    );

    assert!(matches!(
        database.load_data(json!({ "comments": [] })),
        Err(StoreError::UnknownCollection(_))
    ));
    assert!(matches!(database.load_data(json!([])), Err(StoreError::Fixture(_))));
    assert!(matches!(
        database.load_data(json!({ "users": [1, 2] })),
        Err(StoreError::Fixture(_))
    ));

    database.clear().unwrap();
    assert_eq!(database.dump().unwrap(), json!({ "users": [], "posts": [] }));
}
