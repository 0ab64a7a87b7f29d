mod common;

use cbc_sdk::{CbcError, Feed, QueryError};
use httpmock::Method::GET;
use httpmock::MockServer;
use serde_json::json;

use common::{ORG, api};

#[tokio::test]
async fn test_feeds_with_public() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path(format!("/threathunter/feedmgr/v2/orgs/{ORG}/feeds"))
            .query_param("include_public", "true");
        then.status(200).json_body(json!({
            "results": [
                { "id": "own", "name": "Internal", "access": "private", "owner": ORG },
                { "id": "pub", "name": "AlienVault", "access": "public" },
            ],
        }));
    });

    let feeds = api(&server).feeds().include_public(true).all().await.unwrap();

    mock.assert();
    let public: Vec<_> = feeds.iter().filter(|f| f.is_public()).filter_map(Feed::id).collect();
    assert_eq!(public, vec!["pub"]);
    assert_eq!(feeds[0].owner(), Some(ORG));
}

#[tokio::test]
async fn test_reports_of_feed() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path(format!("/threathunter/feedmgr/v2/orgs/{ORG}/feeds/pub/reports"));
        then.status(200).json_body(json!({
            "results": [{
                "id": "r1",
                "title": "Known C2",
                "severity": 7,
                "iocs_v2": [{ "id": "i1", "match_type": "equality", "field": "netconn_ipv4", "values": ["10.1.1.1"] }],
            }],
        }));
    });

    let reports = api(&server).reports().where_("feed_id", "pub").all().await.unwrap();

    mock.assert();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].title(), Some("Known C2"));
    assert_eq!(reports[0].iocs()[0].values(), vec!["10.1.1.1"]);
}

#[tokio::test]
async fn test_reports_require_feed_id() {
    let server = MockServer::start();
    let feeds = server.mock(|when, then| {
        when.method(GET);
        then.status(200).json_body(json!({ "results": [] }));
    });

    let err = api(&server).reports().all().await.unwrap_err();

    feeds.assert_calls(0);
    assert!(matches!(
        err,
        CbcError::Query(QueryError::Usage(ref message)) if message == "required parameter feed_id missing"
    ));
}

#[tokio::test]
async fn test_watchlists() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/threathunter/watchlistmgr/v2/watchlist");
        then.status(200).json_body(json!({
            "results": [{ "id": "w1", "name": "Lateral movement", "report_ids": ["r1"] }],
        }));
    });

    let lists = api(&server).watchlists().all().await.unwrap();
    assert_eq!(lists[0].name(), Some("Lateral movement"));
    assert_eq!(lists[0].report_ids(), vec!["r1"]);
}

#[tokio::test]
async fn test_list_error_status() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/threathunter/watchlistmgr/v2/watchlist");
        then.status(403)
            .json_body(json!({ "message": "not authorized" }));
    });

    let err = api(&server).watchlists().all().await.unwrap_err();
    assert_eq!(err.status(), Some(403));
}
