//! Entity loading and read resolver tests

mod common;

use common::{EventLog, MockTransport};
use core_data::{CoreData, CoreDataError, Method, SaveOptions, TransportError};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};

fn store() -> (CoreData, Arc<MockTransport>) {
    common::init_logging();
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let transport = Arc::new(MockTransport::new(log));
    (CoreData::new(transport.clone()), transport)
}

fn query(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_post_types_are_loaded_once() {
    let (store, transport) = store();
    transport.respond(json!({
        "post": {"slug": "post", "rest_base": "posts", "labels": {"singular_name": "Post"}},
        "page": {"slug": "page", "rest_base": "pages", "labels": {"singular_name": "Page"}},
    }));
    transport.respond(json!({"id": 3, "title": "About"}));
    transport.respond(json!({"id": 4, "title": "Hello"}));

    store
        .save_entity_record("postType", "page", json!({"title": "About"}), SaveOptions::default())
        .await
        .unwrap();
    store
        .save_entity_record("postType", "post", json!({"title": "Hello"}), SaveOptions::default())
        .await
        .unwrap();

    let paths: Vec<String> = transport
        .requests()
        .iter()
        .map(|request| request.path.clone())
        .collect();
    assert_eq!(
        paths,
        vec!["/wp/v2/types?context=edit", "/wp/v2/pages", "/wp/v2/posts"]
    );

    let page = store.get_entity("postType", "page").unwrap();
    assert_eq!(page.label.as_deref(), Some("Page"));
    assert!(page.is_transient("blocks"));
    assert!(store.get_entity_record("postType", "page", 3).is_some());
}

#[tokio::test]
async fn test_unknown_post_type_is_not_found() {
    let (store, transport) = store();
    transport.respond(json!({"post": {"slug": "post", "rest_base": "posts"}}));

    let error = store
        .save_entity_record("postType", "product", json!({}), SaveOptions::default())
        .await
        .unwrap_err();

    assert_eq!(
        error,
        CoreDataError::EntityNotFound {
            kind: "postType".to_string(),
            name: "product".to_string()
        }
    );
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn test_failed_kind_loading_is_returned() {
    let (store, transport) = store();
    transport.fail(TransportError::Network("offline".to_string()));

    let error = store.get_kind_entities("taxonomy").await.unwrap_err();

    assert_eq!(
        error,
        CoreDataError::Transport(TransportError::Network("offline".to_string()))
    );
    assert!(store.get_entity("taxonomy", "category").is_none());
}

#[tokio::test]
async fn test_kind_without_loader_has_no_entities() {
    let (store, transport) = store();

    let entities = store.get_kind_entities("plugin").await.unwrap();

    assert!(entities.is_empty());
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_fetch_entity_record_uses_base_params() {
    let (store, transport) = store();
    transport.respond(json!({"slug": "category", "name": "Categories"}));

    store
        .fetch_entity_record("root", "taxonomy", "category")
        .await
        .unwrap();

    let requests = transport.requests();
    assert_eq!(requests[0].method, Method::Get);
    assert_eq!(requests[0].path, "/wp/v2/taxonomies/category?context=edit");
    assert_eq!(
        store.get_entity_record("root", "taxonomy", "category").unwrap()["name"],
        json!("Categories")
    );
}

#[tokio::test]
async fn test_fetch_entity_records_caches_the_query() {
    let (store, transport) = store();
    transport.respond(json!([{"id": 2, "name": "Bob"}, {"id": 1, "name": "Alice"}]));
    let users = query(json!({"per_page": 2}));

    let fetched = store
        .fetch_entity_records("root", "user", users.clone())
        .await
        .unwrap();

    assert_eq!(fetched.len(), 2);
    assert_eq!(transport.requests()[0].path, "/wp/v2/users?per_page=2");
    let cached = store.get_entity_records("root", "user", &users).unwrap();
    let names: Vec<&Value> = cached.iter().map(|user| &user["name"]).collect();
    assert_eq!(names, vec![&json!("Bob"), &json!("Alice")]);
}

#[tokio::test]
async fn test_fetch_entity_records_rejects_non_lists() {
    let (store, transport) = store();
    transport.respond(json!({"code": "oops"}));

    let error = store
        .fetch_entity_records("root", "user", Map::new())
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        CoreDataError::Transport(TransportError::InvalidResponse(_))
    ));
}

#[test]
fn test_user_permissions_and_current_user() {
    let (store, _transport) = store();

    store.receive_user_permission("create/media", true);
    store.receive_current_user(json!({"id": 1, "name": "admin"}));

    assert_eq!(store.can_user("create/media"), Some(true));
    assert_eq!(store.can_user("delete/media"), None);
    assert_eq!(store.get_current_user(), Some(json!({"id": 1, "name": "admin"})));
}
