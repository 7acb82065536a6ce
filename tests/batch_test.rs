//! Integration tests for batched record operations

mod common;

use async_trait::async_trait;
use common::{EventLog, Fixture, MockTransport};
use core_data::batch::BatchCallback;
use core_data::{
    batch_callback, ApiRequest, BatchItemResult, BatchProcessor, CoreData, CoreDataConfig,
    CoreDataError, CoreDataResult, Method, RecordId, TransportError,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Respond = Box<dyn Fn(&[ApiRequest]) -> CoreDataResult<Vec<BatchItemResult>> + Send + Sync>;

/// Processor double that logs each flush and answers through `respond`
struct ScriptedProcessor {
    log: EventLog,
    calls: Mutex<Vec<Vec<ApiRequest>>>,
    respond: Respond,
}

impl ScriptedProcessor {
    fn new(
        log: EventLog,
        respond: impl Fn(&[ApiRequest]) -> CoreDataResult<Vec<BatchItemResult>> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            log,
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        })
    }

    fn calls(&self) -> Vec<Vec<ApiRequest>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchProcessor for ScriptedProcessor {
    async fn process(&self, requests: Vec<ApiRequest>) -> CoreDataResult<Vec<BatchItemResult>> {
        self.log
            .lock()
            .unwrap()
            .push(format!("flush {}", requests.len()));
        self.calls.lock().unwrap().push(requests.clone());
        (self.respond)(&requests)
    }
}

fn output_for(request: &ApiRequest) -> Value {
    match request.method {
        Method::Post => json!({"id": 1, "created": true}),
        Method::Put => json!({"id": 123, "updated": true}),
        Method::Delete => json!({"id": 456, "deleted": true}),
        _ => Value::Null,
    }
}

fn outputs(requests: &[ApiRequest]) -> CoreDataResult<Vec<BatchItemResult>> {
    Ok(requests
        .iter()
        .map(|request| BatchItemResult::Output(output_for(request)))
        .collect())
}

/// A new widget, the edits of widget 123 and the deletion of widget 456
fn widget_callbacks() -> Vec<BatchCallback<Value>> {
    vec![
        batch_callback(|api| async move { api.save_entity_record("root", "widget", json!({})).await }),
        batch_callback(|api| async move {
            api.save_edited_entity_record("root", "widget", 123)
                .await
                .map(|saved| saved.unwrap_or(Value::Null))
        }),
        batch_callback(|api| async move {
            api.delete_entity_record("root", "widget", 456, None).await
        }),
    ]
}

fn widget_fixture() -> Fixture {
    let fixture = Fixture::new();
    fixture.store.receive_entity_records(
        "root",
        "widget",
        json!([{"id": 123, "sidebar": "sidebar-1"}, {"id": 456, "sidebar": "sidebar-1"}]),
        None,
        false,
    );
    fixture
        .store
        .edit_entity_record("root", "widget", 123, json!({"sidebar": "wp_inactive_widgets"}))
        .unwrap();
    fixture.clear_events();
    fixture
}

#[tokio::test]
async fn test_batch_sends_every_request_in_one_flush() {
    let fixture = widget_fixture();
    let processor = ScriptedProcessor::new(fixture.log.clone(), outputs);

    let results = fixture
        .store
        .batch_with_processor(widget_callbacks(), processor.clone())
        .await;

    let results: Vec<Value> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(
        results,
        vec![
            json!({"id": 1, "created": true}),
            json!({"id": 123, "updated": true}),
            json!({"id": 456, "deleted": true}),
        ]
    );

    let calls = processor.calls();
    assert_eq!(calls.len(), 1);
    let sent: Vec<(Method, String)> = calls[0]
        .iter()
        .map(|request| (request.method, request.path.clone()))
        .collect();
    assert_eq!(
        sent,
        vec![
            (Method::Post, "/wp/v2/widgets".to_string()),
            (Method::Put, "/wp/v2/widgets/123".to_string()),
            (Method::Delete, "/wp/v2/widgets/456".to_string()),
        ]
    );
    assert_eq!(
        calls[0][1].data,
        Some(json!({"id": 123, "sidebar": "wp_inactive_widgets"}))
    );
    assert!(fixture.transport.requests().is_empty());

    assert!(fixture.store.get_entity_record("root", "widget", 1).is_some());
    assert!(fixture.store.get_entity_record("root", "widget", 456).is_none());
    assert!(!fixture.store.has_edits_for_entity_record("root", "widget", 123));
}

#[tokio::test]
async fn test_operations_start_before_flush_and_finish_after() {
    let fixture = widget_fixture();
    let processor = ScriptedProcessor::new(fixture.log.clone(), outputs);

    fixture
        .store
        .batch_with_processor(widget_callbacks(), processor)
        .await;

    let events = fixture.events();
    let flush = fixture.position("flush 3");
    let before: Vec<&String> = events[..flush].iter().collect();
    let after: Vec<&String> = events[flush..].iter().collect();

    assert_eq!(
        before.iter().filter(|event| event.ends_with("_START")).count(),
        3
    );
    assert_eq!(
        before.iter().filter(|event| event.starts_with("acquire")).count(),
        3
    );
    assert!(!before.iter().any(|event| event.ends_with("_FINISH")));
    assert_eq!(
        after.iter().filter(|event| event.ends_with("_FINISH")).count(),
        3
    );
    assert_eq!(
        after.iter().filter(|event| event.starts_with("release")).count(),
        3
    );
}

#[tokio::test]
async fn test_results_follow_callback_order() {
    let fixture = widget_fixture();

    struct ReversedProcessor {
        completed: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl BatchProcessor for ReversedProcessor {
        async fn process(&self, requests: Vec<ApiRequest>) -> CoreDataResult<Vec<BatchItemResult>> {
            let count = requests.len();
            let pending = requests.into_iter().enumerate().map(|(index, request)| async move {
                // later requests complete first
                tokio::time::sleep(Duration::from_millis(((count - index) * 10) as u64)).await;
                self.completed.lock().unwrap().push(index);
                BatchItemResult::Output(output_for(&request))
            });
            Ok(futures::future::join_all(pending).await)
        }
    }

    let processor = Arc::new(ReversedProcessor {
        completed: Mutex::new(Vec::new()),
    });
    let results = fixture
        .store
        .batch_with_processor(widget_callbacks(), processor.clone())
        .await;

    assert_eq!(*processor.completed.lock().unwrap(), vec![2, 1, 0]);
    assert_eq!(results[0], Ok(json!({"id": 1, "created": true})));
    assert_eq!(results[1], Ok(json!({"id": 123, "updated": true})));
    assert_eq!(results[2], Ok(json!({"id": 456, "deleted": true})));
}

#[tokio::test]
async fn test_aggregate_failure_fails_every_operation() {
    let fixture = widget_fixture();
    let failure = CoreDataError::Transport(TransportError::Network("batch endpoint down".to_string()));
    let expected = failure.clone();
    let processor = ScriptedProcessor::new(fixture.log.clone(), move |_| Err(failure.clone()));

    let results = fixture
        .store
        .batch_with_processor(widget_callbacks(), processor)
        .await;

    assert_eq!(results.len(), 3);
    for result in &results {
        assert_eq!(result, &Err(expected.clone()));
    }
    assert!(fixture.store.get_entity_record("root", "widget", 456).is_some());
    assert!(fixture.store.has_edits_for_entity_record("root", "widget", 123));
    assert!(fixture
        .store
        .get_last_entity_delete_error("root", "widget", 456)
        .is_some());
    assert_eq!(
        fixture
            .events()
            .iter()
            .filter(|event| event.starts_with("release"))
            .count(),
        3
    );
}

#[tokio::test]
async fn test_wrong_result_count_is_an_aggregate_failure() {
    let fixture = widget_fixture();
    let processor = ScriptedProcessor::new(fixture.log.clone(), |requests| {
        let mut results = outputs(requests)?;
        results.pop();
        Ok(results)
    });

    let results = fixture
        .store
        .batch_with_processor(widget_callbacks(), processor)
        .await;

    let mismatch = CoreDataError::BatchSizeMismatch {
        expected: 3,
        actual: 2,
    };
    assert!(results.iter().all(|result| result == &Err(mismatch.clone())));
}

#[tokio::test]
async fn test_item_failure_only_fails_that_operation() {
    let fixture = widget_fixture();
    let rejection = TransportError::from_batch_body(json!({
        "code": "rest_invalid_widget",
        "message": "The widget is invalid.",
    }));
    let item_error = rejection.clone();
    let processor = ScriptedProcessor::new(fixture.log.clone(), move |requests| {
        let mut results = outputs(requests)?;
        results[1] = BatchItemResult::Error(item_error.clone());
        Ok(results)
    });

    let results = fixture
        .store
        .batch_with_processor(widget_callbacks(), processor)
        .await;

    assert!(results[0].is_ok());
    assert_eq!(results[1], Err(CoreDataError::Transport(rejection.clone())));
    assert!(results[2].is_ok());
    assert_eq!(
        fixture
            .store
            .get_last_entity_save_error("root", "widget", Some(RecordId::from(123))),
        Some(CoreDataError::Transport(rejection))
    );
    assert!(fixture.store.has_edits_for_entity_record("root", "widget", 123));
}

#[tokio::test]
async fn test_follow_up_requests_are_flushed_separately() {
    let fixture = Fixture::new();
    let processor = ScriptedProcessor::new(fixture.log.clone(), outputs);

    let results = fixture
        .store
        .batch_with_processor(
            vec![batch_callback(|api| async move {
                let first = api.save_entity_record("root", "widget", json!({"n": 1})).await?;
                let second = api.save_entity_record("root", "widget", json!({"n": 2})).await?;
                Ok::<Value, CoreDataError>(json!([first, second]))
            })],
            processor.clone(),
        )
        .await;

    assert!(results[0].is_ok());
    let sizes: Vec<usize> = processor.calls().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![1, 1]);
}

#[tokio::test]
async fn test_same_record_operations_are_flushed_in_order() {
    let fixture = widget_fixture();
    let processor = ScriptedProcessor::new(fixture.log.clone(), outputs);
    let callbacks: Vec<BatchCallback<Value>> = vec![
        batch_callback(|api| async move { api.save_entity_record("root", "widget", json!({})).await }),
        batch_callback(|api| async move {
            api.save_edited_entity_record("root", "widget", 123)
                .await
                .map(|saved| saved.unwrap_or(Value::Null))
        }),
        batch_callback(|api| async move {
            api.delete_entity_record("root", "widget", 123, None).await
        }),
    ];

    let results = tokio::time::timeout(
        Duration::from_secs(2),
        fixture.store.batch_with_processor(callbacks, processor.clone()),
    )
    .await
    .expect("batch did not finish");

    assert!(results.iter().all(Result::is_ok));
    let sent: Vec<Vec<(Method, String)>> = processor
        .calls()
        .iter()
        .map(|call| {
            call.iter()
                .map(|request| (request.method, request.path.clone()))
                .collect()
        })
        .collect();
    assert_eq!(
        sent,
        vec![
            vec![
                (Method::Post, "/wp/v2/widgets".to_string()),
                (Method::Put, "/wp/v2/widgets/123".to_string()),
            ],
            vec![(Method::Delete, "/wp/v2/widgets/123".to_string())],
        ]
    );

    let delete_start = fixture.position("DELETE_ENTITY_RECORD_START");
    assert!(fixture.position("flush 2") < delete_start);
    assert!(fixture.position("SAVE_ENTITY_RECORD_FINISH") < delete_start);
    assert!(delete_start < fixture.position("flush 1"));
    assert!(fixture.store.get_entity_record("root", "widget", 123).is_none());
}

#[tokio::test]
async fn test_callbacks_without_requests_complete() {
    let fixture = Fixture::new();
    let processor = ScriptedProcessor::new(fixture.log.clone(), outputs);

    let results = fixture
        .store
        .batch_with_processor(
            vec![batch_callback(|api| async move {
                api.edit_entity_record("root", "widget", 9, json!({"sidebar": "footer"}))?;
                Ok::<Value, CoreDataError>(Value::Null)
            })],
            processor.clone(),
        )
        .await;

    assert_eq!(results, vec![Ok(Value::Null)]);
    assert!(processor.calls().is_empty());
    assert!(fixture.store.has_edits_for_entity_record("root", "widget", 9));
}

#[tokio::test]
async fn test_store_without_batch_endpoint_sends_requests_one_by_one() {
    let fixture = widget_fixture();

    let results = fixture.store.batch(widget_callbacks()).await;

    assert!(results.iter().all(Result::is_ok));
    let methods: Vec<Method> = fixture
        .transport
        .requests()
        .iter()
        .map(|request| request.method)
        .collect();
    assert_eq!(methods, vec![Method::Post, Method::Put, Method::Delete]);
}

#[tokio::test]
async fn test_configured_batch_endpoint_posts_one_batch_request() {
    common::init_logging();
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let transport = Arc::new(MockTransport::new(log));
    let mut config = CoreDataConfig::default();
    config.batch.endpoint = Some("/batch/v1".to_string());
    config.batch.max_items = Some(25);
    let store = CoreData::builder(transport.clone()).config(config).build();
    transport.respond(json!({
        "responses": [
            {"status": 201, "body": {"id": 7, "sidebar": "sidebar-1"}},
            {"status": 200, "body": {"deleted": true}},
        ]
    }));

    let results = store
        .batch(vec![
            batch_callback(|api| async move {
                api.save_entity_record("root", "widget", json!({"sidebar": "sidebar-1"}))
                    .await
            }),
            batch_callback(|api| async move {
                api.delete_entity_record("root", "widget", 5, None).await
            }),
        ])
        .await;

    assert_eq!(
        results,
        vec![
            Ok(json!({"id": 7, "sidebar": "sidebar-1"})),
            Ok(json!({"deleted": true})),
        ]
    );
    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/batch/v1");
    assert_eq!(
        requests[0].data,
        Some(json!({
            "validation": "require-all-validate",
            "requests": [
                {"path": "/wp/v2/widgets", "method": "POST", "body": {"sidebar": "sidebar-1"}},
                {"path": "/wp/v2/widgets/5", "method": "DELETE"},
            ]
        }))
    );
    assert!(store.get_entity_record("root", "widget", 7).is_some());
}
