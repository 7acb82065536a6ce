//! Lock coordination tests: same-record operations are serialized, other
//! records proceed independently, and granted locks never conflict.

mod common;

use common::{Fixture, POST_LOCK_PREFIX};
use core_data::{DeleteOptions, Lock, LockCoordinator, LockEngine, SaveOptions};
use proptest::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PATHS: &[&[&str]] = &[
    &["entities"],
    &["entities", "data"],
    &["entities", "data", "postType", "post"],
    &["entities", "data", "postType", "post", "1"],
    &["entities", "data", "postType", "post", "2"],
    &["entities", "data", "root", "widget", "1"],
];

fn conflicts(a: &Lock, b: &Lock) -> bool {
    let related = a.path.starts_with(&b.path) || b.path.starts_with(&a.path);
    related && (a.exclusive || b.exclusive)
}

fn path_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::sample::select(PATHS.to_vec())
        .prop_map(|path| path.iter().map(|segment| segment.to_string()).collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_granted_locks_never_conflict(
        requests in prop::collection::vec((path_strategy(), any::<bool>()), 1..16)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        runtime.block_on(async move {
            let engine = Arc::new(LockEngine::new());
            let held: Arc<Mutex<Vec<Lock>>> = Arc::new(Mutex::new(Vec::new()));

            let tasks = requests.into_iter().map(|(path, exclusive)| {
                let engine = engine.clone();
                let held = held.clone();
                async move {
                    let lock = engine.acquire(path, exclusive).await.unwrap();
                    {
                        let mut held = held.lock().unwrap();
                        for other in held.iter() {
                            assert!(!conflicts(other, &lock), "{other:?} conflicts with {lock:?}");
                        }
                        held.push(lock.clone());
                    }
                    tokio::task::yield_now().await;
                    held.lock().unwrap().retain(|granted| granted.id != lock.id);
                    engine.release(lock);
                }
            });
            futures::future::join_all(tasks).await;

            assert_eq!(engine.pending_count(), 0);
            assert!(engine.is_available(&["entities".to_string()], true));
        });
    }
}

/// Events logged between the first grant and the first release of `lock`
fn first_hold(events: &[String], lock: &str) -> Vec<String> {
    let start = events
        .iter()
        .position(|event| event == &format!("acquire {lock}"))
        .unwrap();
    let end = events
        .iter()
        .position(|event| event == &format!("release {lock}"))
        .unwrap();
    events[start..end].to_vec()
}

#[tokio::test]
async fn test_saves_of_the_same_record_are_serialized() {
    let fixture = Fixture::with_delay(Duration::from_millis(20));
    let store = fixture.store.clone();
    let lock = format!("{POST_LOCK_PREFIX}/10");

    let (first, second) = tokio::join!(
        store.save_entity_record(
            "postType",
            "post",
            json!({"id": 10, "title": "First"}),
            SaveOptions::default()
        ),
        store.save_entity_record(
            "postType",
            "post",
            json!({"id": 10, "title": "Second"}),
            SaveOptions::default()
        ),
    );
    first.unwrap();
    second.unwrap();

    let events = fixture.events();
    let hold = first_hold(&events, &lock);
    assert_eq!(
        hold.iter()
            .filter(|event| *event == "SAVE_ENTITY_RECORD_START")
            .count(),
        1
    );
    assert!(hold.contains(&"SAVE_ENTITY_RECORD_FINISH".to_string()));
    assert_eq!(
        events
            .iter()
            .filter(|event| **event == format!("acquire {lock}"))
            .count(),
        2
    );
    assert_eq!(
        fixture.store.get_entity_record("postType", "post", 10).unwrap()["title"],
        json!("Second")
    );
}

#[tokio::test]
async fn test_save_and_delete_of_the_same_record_are_serialized() {
    let fixture = Fixture::with_delay(Duration::from_millis(20));
    fixture
        .store
        .receive_entity_records("postType", "post", json!({"id": 10}), None, false);
    let store = fixture.store.clone();
    let lock = format!("{POST_LOCK_PREFIX}/10");

    let (saved, deleted) = tokio::join!(
        store.save_entity_record(
            "postType",
            "post",
            json!({"id": 10, "title": "Saved"}),
            SaveOptions::default()
        ),
        store.delete_entity_record("postType", "post", 10, None, DeleteOptions::default()),
    );
    saved.unwrap();
    deleted.unwrap();

    let hold = first_hold(&fixture.events(), &lock);
    assert!(hold.contains(&"SAVE_ENTITY_RECORD_START".to_string()));
    assert!(!hold.contains(&"DELETE_ENTITY_RECORD_START".to_string()));
    assert!(fixture.store.get_entity_record("postType", "post", 10).is_none());
}

#[tokio::test]
async fn test_different_records_proceed_concurrently() {
    let fixture = Fixture::with_delay(Duration::from_millis(20));
    let store = fixture.store.clone();

    let (first, second) = tokio::join!(
        store.save_entity_record(
            "postType",
            "post",
            json!({"id": 10, "title": "Ten"}),
            SaveOptions::default()
        ),
        store.save_entity_record(
            "postType",
            "post",
            json!({"id": 11, "title": "Eleven"}),
            SaveOptions::default()
        ),
    );
    first.unwrap();
    second.unwrap();

    let events = fixture.events();
    let first_release = events
        .iter()
        .position(|event| event.starts_with("release"))
        .unwrap();
    assert_eq!(
        events[..first_release]
            .iter()
            .filter(|event| *event == "SAVE_ENTITY_RECORD_START")
            .count(),
        2
    );
}

#[tokio::test]
async fn test_creations_never_wait_on_each_other() {
    let fixture = Fixture::with_delay(Duration::from_millis(20));
    let store = fixture.store.clone();

    let (first, second) = tokio::join!(
        store.save_entity_record("postType", "post", json!({"title": "A"}), SaveOptions::default()),
        store.save_entity_record("postType", "post", json!({"title": "B"}), SaveOptions::default()),
    );
    first.unwrap();
    second.unwrap();

    let events = fixture.events();
    let first_release = events
        .iter()
        .position(|event| event.starts_with("release"))
        .unwrap();
    assert_eq!(
        events[..first_release]
            .iter()
            .filter(|event| event.starts_with("request POST"))
            .count(),
        2
    );
}

#[tokio::test]
async fn test_dropped_operation_releases_its_lock() {
    let fixture = Fixture::with_delay(Duration::from_millis(200));
    let store = fixture.store.clone();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        store.save_entity_record(
            "postType",
            "post",
            json!({"id": 10, "title": "Abandoned"}),
            SaveOptions::default(),
        ),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(fixture
        .events()
        .contains(&format!("release {POST_LOCK_PREFIX}/10")));

    let retried = tokio::time::timeout(
        Duration::from_secs(2),
        store.save_entity_record(
            "postType",
            "post",
            json!({"id": 10, "title": "Retried"}),
            SaveOptions::default(),
        ),
    )
    .await;
    assert!(matches!(retried, Ok(Ok(_))));
}
