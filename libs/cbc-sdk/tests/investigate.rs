mod common;

use cbc_sdk::{EnrichedEvent, ExecuteAsync, SortDirection};
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::{Value, json};

use common::{ORG, api};

fn submit_path() -> String {
    format!("/api/investigate/v2/orgs/{ORG}/enriched_events/search_jobs")
}

fn status_path(job: &str) -> String {
    format!("/api/investigate/v1/orgs/{ORG}/enriched_events/search_jobs/{job}")
}

fn results_path(job: &str) -> String {
    format!("/api/investigate/v2/orgs/{ORG}/enriched_events/search_jobs/{job}/results")
}

fn events(range: std::ops::Range<usize>) -> Vec<Value> {
    range
        .map(|i| json!({ "event_id": format!("ev-{i}"), "process_name": ["cmd.exe"] }))
        .collect()
}

#[tokio::test]
async fn test_enriched_event_job_flow() {
    let server = MockServer::start();
    let submit = server.mock(|when, then| {
        when.method(POST).path(submit_path()).json_body(json!({
            "query": "process_name:cmd.exe",
            "sort": [{ "field": "device_timestamp", "order": "ASC" }],
            "time_range": { "window": "-2h" },
            "rows": 2,
        }));
        then.status(200).json_body(json!({ "job_id": "job-1" }));
    });
    let status = server.mock(|when, then| {
        when.method(GET).path(status_path("job-1"));
        then.status(200)
            .json_body(json!({ "contacted": 4, "completed": 4 }));
    });
    let first = server.mock(|when, then| {
        when.method(GET)
            .path(results_path("job-1"))
            .query_param("start", "0")
            .query_param("rows", "2");
        then.status(200)
            .json_body(json!({ "num_available": 3, "results": events(0..2) }));
    });
    let second = server.mock(|when, then| {
        when.method(GET)
            .path(results_path("job-1"))
            .query_param("start", "2")
            .query_param("rows", "2");
        then.status(200)
            .json_body(json!({ "num_available": 3, "results": events(2..3) }));
    });

    let mut query = api(&server)
        .select::<EnrichedEvent>()
        .where_("process_name", "cmd.exe")
        .unwrap()
        .set_time_range(None, None, Some("-2h"))
        .unwrap()
        .set_rows(2)
        .unwrap();
    let found = query.all().await.unwrap();

    submit.assert_calls(1);
    status.assert_calls(1);
    first.assert_calls(1);
    second.assert_calls(1);
    let ids: Vec<_> = found.iter().filter_map(EnrichedEvent::event_id).collect();
    assert_eq!(ids, vec!["ev-0", "ev-1", "ev-2"]);
    assert_eq!(found[0].process_name(), Some("cmd.exe"));
    assert_eq!(query.job_id(), Some("job-1"));
}

#[tokio::test]
async fn test_explicit_sort_replaces_default() {
    let server = MockServer::start();
    let submit = server.mock(|when, then| {
        when.method(POST).path(submit_path()).json_body(json!({
            "query": "device_name:WIN-7",
            "sort": [{ "field": "device_timestamp", "order": "DESC" }],
        }));
        then.status(200).json_body(json!({ "job_id": "job-2" }));
    });

    let mut query = api(&server)
        .select::<EnrichedEvent>()
        .where_("device_name", "WIN-7")
        .unwrap()
        .sort_by("device_timestamp", SortDirection::Desc)
        .unwrap();
    query.submit().await.unwrap();

    submit.assert();
    assert_eq!(query.job_id(), Some("job-2"));
}

#[tokio::test]
async fn test_job_timeout() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(submit_path());
        then.status(200).json_body(json!({ "job_id": "slow" }));
    });
    server.mock(|when, then| {
        when.method(GET).path(status_path("slow"));
        then.status(200)
            .json_body(json!({ "contacted": 10, "completed": 3 }));
    });

    let mut query = api(&server)
        .select::<EnrichedEvent>()
        .where_("process_name", "cmd.exe")
        .unwrap()
        .timeout(20)
        .unwrap();
    let err = query.all().await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_execute_async_collects_in_background() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(submit_path());
        then.status(200).json_body(json!({ "job_id": "bg" }));
    });
    server.mock(|when, then| {
        when.method(GET).path(status_path("bg"));
        then.status(200)
            .json_body(json!({ "contacted": 1, "completed": 1 }));
    });
    server.mock(|when, then| {
        when.method(GET).path(results_path("bg"));
        then.status(200)
            .json_body(json!({ "num_available": 2, "results": events(0..2) }));
    });

    let pending = api(&server)
        .select::<EnrichedEvent>()
        .where_("process_name", "cmd.exe")
        .unwrap()
        .execute_async();
    let found = pending.await.unwrap();
    assert_eq!(found.len(), 2);
}
