use std::sync::Arc;
use std::time::Duration;

use fleet_core::{
    models::{JobStatus, SpiderArgs},
    traits::{CredentialVault, NodeDirectory},
    FleetError,
};
use fleet_infrastructure::{AesGcmVault, DatabaseManager, NodeClient};
use fleet_testing_utils::{register_node, unreachable_url, FakeNode};
use reqwest::Method;
use serde_json::json;

const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

async fn client() -> (NodeClient, Arc<dyn NodeDirectory>) {
    let db = DatabaseManager::in_memory().await.unwrap();
    let directory: Arc<dyn NodeDirectory> = Arc::new(db.node_directory());
    let client = NodeClient::new(
        directory.clone(),
        Arc::new(AesGcmVault::new()),
        SECRET,
        Duration::from_secs(5),
    )
    .unwrap();
    (client, directory)
}

#[tokio::test]
async fn test_listing_endpoints_against_fake_node() {
    let node = FakeNode::start("node-a").await;
    let (client, directory) = client().await;
    register_node(directory.as_ref(), "node-a", &node.url()).await;

    node.set_listing(json!({
        "pending": [{"id": "p1", "project": "bookstore", "spider": "books"}],
        "running": [],
        "finished": [{"id": "f1", "project": "bookstore", "spider": "books",
                      "start_time": "2024-05-01 09:00:00", "end_time": "2024-05-01 09:30:00"}]
    }));

    let status = client.daemon_status("node-a").await.unwrap();
    assert_eq!(status.node_name, "node-a");
    assert_eq!(status.pending, 1);

    let projects = client.list_projects("node-a").await.unwrap();
    assert_eq!(projects.projects, vec!["bookstore"]);

    let spiders = client.list_spiders("node-a", "bookstore").await.unwrap();
    assert_eq!(spiders.spiders.len(), 2);
    let recorded = node.requests_for("listspiders.json");
    assert_eq!(recorded[0].field("project"), Some("bookstore"));

    let listing = client.list_jobs("node-a").await.unwrap();
    let statuses: Vec<_> = listing.entries().map(|(s, _)| s).collect();
    assert_eq!(statuses, vec![JobStatus::Pending, JobStatus::Finished]);
}

#[tokio::test]
async fn test_non_ok_status_is_remote_error() {
    let node = FakeNode::start("node-a").await;
    let (client, directory) = client().await;
    register_node(directory.as_ref(), "node-a", &node.url()).await;
    node.set_failing(Some("spider not found"));

    let err = client.list_projects("node-a").await.unwrap_err();
    assert!(matches!(err, FleetError::RemoteStatus { ref message, .. } if message == "spider not found"));
    assert!(err.is_remote());
}

#[tokio::test]
async fn test_schedule_sends_full_argument_set() {
    let node = FakeNode::start("node-a").await;
    let (client, directory) = client().await;
    register_node(directory.as_ref(), "node-a", &node.url()).await;

    let args = SpiderArgs::from_pairs([
        ("jobid", "task_books_node-a_2024-05-01T10_00_00"),
        ("setting", "DOWNLOAD_DELAY=2"),
        ("setting", "LOG_LEVEL=INFO"),
        ("project", "ignored"),
    ]);
    let response = client
        .schedule("node-a", "bookstore", "books", &args)
        .await
        .unwrap();
    assert_eq!(
        response.jobid.as_deref(),
        Some("task_books_node-a_2024-05-01T10_00_00")
    );

    let request = &node.requests_for("schedule.json")[0];
    assert_eq!(request.field("project"), Some("bookstore"));
    assert_eq!(request.field("spider"), Some("books"));
    let settings: Vec<_> = request
        .fields
        .iter()
        .filter(|(k, _)| k == "setting")
        .map(|(_, v)| v.as_str())
        .collect();
    assert_eq!(settings, vec!["DOWNLOAD_DELAY=2", "LOG_LEVEL=INFO"]);
    assert_eq!(request.fields.iter().filter(|(k, _)| k == "project").count(), 1);
}

#[tokio::test]
async fn test_credentials_are_decrypted_into_basic_auth() {
    let node = FakeNode::start("node-a").await;
    let (client, directory) = client().await;
    let cipher = AesGcmVault::new().encrypt("s3cret", SECRET).unwrap();
    directory
        .add_node("node-a", &node.url(), Some("scrapy"), Some(cipher))
        .await
        .unwrap();

    client.add_version("node-a", "bookstore", "v1", b"egg".to_vec()).await.unwrap();

    let request = &node.requests_for("addversion.json")[0];
    let auth = request.authorization.as_deref().unwrap();
    assert!(auth.starts_with("Basic "));
    assert_eq!(request.field("egg_filename"), Some("fleet-node-a/bookstore.egg"));
    assert_eq!(request.field("egg_size"), Some("3"));
    assert_eq!(request.field("version"), Some("v1"));
}

#[tokio::test]
async fn test_bad_ciphertext_fails_before_sending() {
    let node = FakeNode::start("node-a").await;
    let (client, directory) = client().await;
    directory
        .add_node("node-a", &node.url(), Some("scrapy"), Some(vec![0u8; 4]))
        .await
        .unwrap();

    let err = client.list_projects("node-a").await.unwrap_err();
    assert!(matches!(err, FleetError::Credential(_)));
    assert!(node.requests().is_empty());
}

#[tokio::test]
async fn test_unreachable_and_unknown_nodes() {
    let (client, directory) = client().await;
    register_node(directory.as_ref(), "ghost", &unreachable_url()).await;

    let err = client.daemon_status("ghost").await.unwrap_err();
    assert!(matches!(err, FleetError::Network { .. }));

    let err = client.daemon_status("missing").await.unwrap_err();
    assert!(matches!(err, FleetError::NodeNotFound { .. }));
}

#[tokio::test]
async fn test_forward_sets_prefix_and_returns_raw_body() {
    let node = FakeNode::start("node-a").await;
    let (client, directory) = client().await;
    register_node(directory.as_ref(), "node-a", &node.url()).await;

    let response = client
        .forward("node-a", Method::GET, "logs/bookstore/books/j1.log", Some("tail=1"), None, Vec::new())
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert!(String::from_utf8_lossy(&response.body).contains("/logs/bookstore/books/j1.log"));

    let request = &node.requests_for("logs/bookstore/books/j1.log")[0];
    assert_eq!(request.forwarded_prefix.as_deref(), Some("/node-a/scrapyd-backend"));
    assert_eq!(request.field("query"), Some("tail=1"));
}
