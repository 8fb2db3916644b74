use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use subsecure_ingest::{routes, Applier, MemoryStore, NodeStore};

#[derive(Debug, Deserialize)]
struct NodeData {
    timestamp: DateTime<Utc>,
    node_id: String,
    temperature: i32,
    humidity: i32,
    pm25: i32,
    worker_state: u8,
    worker_presence: u8,
}

#[derive(Debug, Deserialize)]
struct NodeHistory {
    id: i64,
    timestamp: DateTime<Utc>,
    node_id: String,
    pm25: i32,
}

/// Serve the query API over `store` on an ephemeral port and return its base URL.
async fn spawn_api(store: Arc<MemoryStore>) -> Result<String> {
    // ---
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = routes::router(store);

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok(format!("http://{addr}"))
}

fn ingested_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 4, 10, 0, 0).unwrap()
}

#[tokio::test]
async fn ingested_message_is_visible_through_api() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::new());
    let applier = Applier::new(store.clone());
    let report = applier
        .ingest("AAA25500101,BBB15600000", ingested_at())
        .await;
    assert_eq!(report.stored, 2);

    let base = spawn_api(store).await?;
    let client = Client::new();

    let nodes: Vec<NodeData> = client
        .get(format!("{base}/api/nodeData/"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(nodes.len(), 2);

    let aaa = nodes.iter().find(|n| n.node_id == "AAA").expect("AAA present");
    assert_eq!((aaa.temperature, aaa.humidity, aaa.pm25), (25, 50, 1));
    assert_eq!((aaa.worker_state, aaa.worker_presence), (0, 1));
    assert_eq!(aaa.timestamp, ingested_at());

    let bbb = nodes.iter().find(|n| n.node_id == "BBB").expect("BBB present");
    assert_eq!((bbb.temperature, bbb.humidity, bbb.pm25), (15, 60, 0));
    assert_eq!((bbb.worker_state, bbb.worker_presence), (0, 0));

    let history: Vec<NodeHistory> = client
        .get(format!("{base}/api/nodeHistory/"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|h| h.timestamp == ingested_at()));
    assert_eq!(history[0].node_id, "AAA");
    assert_eq!(history[1].node_id, "BBB");
    assert!(history[0].id < history[1].id);

    Ok(())
}

#[tokio::test]
async fn patch_updates_only_given_fields() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::new());
    Applier::new(store.clone())
        .ingest("N0130205610", ingested_at())
        .await;

    let base = spawn_api(store.clone()).await?;
    let res = Client::new()
        .patch(format!("{base}/api/nodeData/N01/"))
        .json(&json!({ "pm25": 99, "worker_state": 0 }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let node: NodeData = res.json().await?;
    assert_eq!(node.pm25, 99);
    assert_eq!(node.worker_state, 0);
    assert_eq!(node.temperature, 30);

    let stored = store.get_latest("N01").await?.expect("row exists");
    assert_eq!(stored.pm25, 99);

    Ok(())
}

#[tokio::test]
async fn update_of_unknown_node_is_not_found() -> Result<()> {
    // ---
    let base = spawn_api(Arc::new(MemoryStore::new())).await?;
    let client = Client::new();

    let res = client
        .patch(format!("{base}/api/nodeData/ZZZ/"))
        .json(&json!({ "humidity": 10 }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .put(format!("{base}/api/nodeData/ZZZ/"))
        .json(&json!({
            "timestamp": "2025-05-04T10:00:00Z",
            "temperature": 1,
            "humidity": 2,
            "pm25": 3,
            "worker_state": 0,
            "worker_presence": 1
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn put_requires_every_field() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::new());
    Applier::new(store.clone())
        .ingest("N0130205610", ingested_at())
        .await;

    let base = spawn_api(store).await?;
    let res = Client::new()
        .put(format!("{base}/api/nodeData/N01/"))
        .json(&json!({ "temperature": 12 }))
        .send()
        .await?;
    assert!(res.status().is_client_error());

    Ok(())
}

#[tokio::test]
async fn post_history_creates_entry_and_rejects_bad_flags() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::new());
    let base = spawn_api(store.clone()).await?;
    let client = Client::new();

    let res = client
        .post(format!("{base}/api/nodeHistory/"))
        .json(&json!({
            "node_id": "N07",
            "temperature": 21,
            "humidity": 33,
            "pm25": 140,
            "worker_state": 1,
            "worker_presence": 1
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: NodeHistory = res.json().await?;
    assert_eq!(created.node_id, "N07");
    assert_eq!(created.pm25, 140);

    let res = client
        .post(format!("{base}/api/nodeHistory/"))
        .json(&json!({
            "node_id": "N07",
            "temperature": 21,
            "humidity": 33,
            "pm25": 140,
            "worker_state": 3,
            "worker_presence": 1
        }))
        .send()
        .await?;
    assert!(res.status().is_client_error());

    // History writes from the API never touch latest state.
    assert!(store.get_latest("N07").await?.is_none());
    assert_eq!(store.list_history().await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn health_reports_node_count() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::new());
    Applier::new(store.clone())
        .ingest("AAA25500101,AAA25500100,BBB15600000", ingested_at())
        .await;

    let base = spawn_api(store).await?;
    let body: serde_json::Value = Client::new()
        .get(format!("{base}/health"))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(body["status"], "ok");
    assert_eq!(body["nodes"], 2);

    Ok(())
}
