// Copyright 2025 OPPO.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use peerlake_common::error::LakeError;
use peerlake_common::state::{DatasetMetadata, GossipMessage, MessageBody, QueryOutput};
use peerlake_common::LakeResult;
use peerlake_server::node::NodeHandle;
use peerlake_server::query::{TIMEOUT_ERROR, UNREACHABLE_ERROR};
use peerlake_tests::{RawPeer, Testing};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;

async fn ingest_sales(node: &NodeHandle, rows: &[(&str, i64)]) -> LakeResult<String> {
    let mut metadata = DatasetMetadata::new();
    metadata.insert("owner".to_string(), node.node_id().to_string());
    node.ingest("sales.csv", &Testing::csv(rows), metadata).await
}

fn peers(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|v| v.to_string()).collect()
}

#[tokio::test]
async fn fan_out_merges_rows_and_reports_missing_peer() -> LakeResult<()> {
    let a = Testing::start_node("fan-a").await?;
    let b = Testing::start_node("fan-b").await?;
    Testing::link(&a, &b).await?;

    ingest_sales(&a, &[("north", 10), ("south", 20)]).await?;
    ingest_sales(&b, &[("east", 5), ("west", 7), ("north", 1)]).await?;

    let res = a
        .query(
            "SELECT region, amount FROM sales;",
            &peers(&["fan-a", "fan-b", "fan-c"]),
        )
        .await?;

    assert!(res.success);
    assert_eq!(res.results.len(), 3);
    assert_eq!(res.results[0].peer_id, "fan-a");
    assert_eq!(res.results[0].row_count, 2);
    assert_eq!(res.results[1].peer_id, "fan-b");
    assert_eq!(res.results[1].row_count, 3);
    assert_eq!(res.results[2].peer_id, "fan-c");
    assert_eq!(res.results[2].error.as_deref(), Some(TIMEOUT_ERROR));
    assert_eq!(res.failed_peers(), vec!["fan-c"]);

    assert_eq!(res.total_rows, 5);
    assert_eq!(res.rows.len(), 5);
    assert_eq!(res.columns, vec!["region", "amount"]);
    assert_eq!(res.rows[0], vec![json!("north"), json!(10)]);
    assert_eq!(res.rows[4], vec![json!("north"), json!(1)]);
    assert!(res.warnings.is_empty());

    a.stop().await?;
    b.stop().await?;
    Ok(())
}

#[tokio::test]
async fn isolated_node_reports_unreachable() -> LakeResult<()> {
    let a = Testing::start_node("iso-a").await?;
    ingest_sales(&a, &[("north", 10)]).await?;

    let res = a.query("SELECT * FROM sales", &peers(&["iso-a", "iso-b"])).await?;
    assert!(res.success);
    assert_eq!(res.total_rows, 1);
    assert_eq!(res.results[1].error.as_deref(), Some(UNREACHABLE_ERROR));

    a.stop().await?;
    Ok(())
}

#[tokio::test]
async fn remote_error_is_reported_per_peer() -> LakeResult<()> {
    let a = Testing::start_node("err-a").await?;
    let b = Testing::start_node("err-b").await?;
    Testing::link(&a, &b).await?;

    let res = a.query("SELECT * FROM missing", &peers(&["err-b"])).await?;
    assert!(!res.success);
    assert_eq!(res.total_rows, 0);
    assert_eq!(res.error.as_deref(), Some("no peer answered the query"));
    assert_eq!(
        res.results[0].error.as_deref(),
        Some("table missing not found")
    );

    a.stop().await?;
    b.stop().await?;
    Ok(())
}

#[tokio::test]
async fn invalid_requests_are_rejected() -> LakeResult<()> {
    let a = Testing::start_node("inv-a").await?;

    let empty_query = a.query("  ; ", &peers(&["inv-a"])).await;
    assert!(matches!(empty_query, Err(LakeError::InvalidArgument(_))));
    let no_peers = a.query("SHOW TABLES", &peers(&[" ", ""])).await;
    assert!(matches!(no_peers, Err(LakeError::InvalidArgument(_))));

    // Duplicated peers are queried once.
    let res = a.query("SHOW TABLES", &peers(&["inv-a", " inv-a "])).await?;
    assert_eq!(res.results.len(), 1);

    a.stop().await?;
    Ok(())
}

#[tokio::test]
async fn query_reaches_peer_two_hops_away() -> LakeResult<()> {
    let mut conf_a = Testing::conf("far-a")?;
    conf_a.network.auto_connect = false;
    let mut conf_c = Testing::conf("far-c")?;
    conf_c.network.auto_connect = false;
    let a = Testing::start_with_conf(conf_a).await?;
    let b = Testing::start_node("far-b").await?;
    let c = Testing::start_with_conf(conf_c).await?;
    Testing::link(&c, &b).await?;
    Testing::link(&a, &b).await?;
    ingest_sales(&c, &[("far", 99)]).await?;

    let res = a.query("SELECT amount FROM sales", &peers(&["far-c"])).await?;
    assert!(res.success);
    assert_eq!(res.rows, vec![vec![json!(99)]]);

    for node in [a, b, c] {
        node.stop().await?;
    }
    Ok(())
}

#[tokio::test]
async fn announcement_reaches_peers() -> LakeResult<()> {
    let a = Testing::start_node("ann-a").await?;
    let b = Testing::start_node("ann-b").await?;
    Testing::link(&a, &b).await?;

    let id = ingest_sales(&a, &[("north", 10)]).await?;
    let announced = Testing::wait_until(|| async {
        b.remote_datasets()
            .await
            .map(|v| v.iter().any(|d| d.id == id))
            .unwrap_or(false)
    })
    .await;
    assert!(announced);

    let remote = b.remote_datasets().await?;
    assert_eq!(remote[0].filename, "sales.csv");
    assert_eq!(remote[0].node_id, "ann-a");
    assert_eq!(remote[0].metadata.get("owner").map(|v| v.as_str()), Some("ann-a"));
    assert!(a.remote_datasets().await?.is_empty());

    a.stop().await?;
    let forgotten = Testing::wait_until(|| async {
        b.remote_datasets()
            .await
            .map(|v| v.is_empty())
            .unwrap_or(false)
    })
    .await;
    assert!(forgotten);
    b.stop().await?;
    Ok(())
}

#[tokio::test]
async fn stored_tables_survive_restart() -> LakeResult<()> {
    let conf = Testing::conf("restart-a")?;

    let a = Testing::start_with_conf(conf.clone()).await?;
    let id = ingest_sales(&a, &[("north", 10), ("south", 20)]).await?;
    a.stop().await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let a = Testing::start_with_conf(conf).await?;
    assert_eq!(a.dataset(&id)?.filename, "sales.csv");
    let read = a.retrieve(&id).await?;
    assert_eq!(read.dataset.id, id);
    assert_eq!(read.data, Testing::csv(&[("north", 10), ("south", 20)]));
    let out = a.query_local("SELECT * FROM sales LIMIT 1").await?;
    assert_eq!(out.row_count, 1);
    assert_eq!(out.columns, vec!["region", "amount"]);

    a.delete(&id).await?;
    assert!(a.query_local("SELECT * FROM sales").await.is_err());
    a.stop().await?;
    Ok(())
}

fn query_id(msg: &GossipMessage) -> String {
    match &msg.body {
        MessageBody::DataQuery { id, .. } => id.clone(),
        other => panic!("expected a data query, got {:?}", other),
    }
}

fn response(id: String, to: &str, rows: Vec<Vec<Value>>) -> GossipMessage {
    GossipMessage::new(
        "late-x",
        MessageBody::DataResponse {
            id,
            result: Some(QueryOutput::new(vec!["region".to_string()], rows)),
            error: None,
        },
    )
    .with_destination(to)
    .with_id()
}

#[tokio::test]
async fn late_response_is_dropped() -> LakeResult<()> {
    let a = Testing::start_node("late-a").await?;
    let mut raw = RawPeer::connect(&Testing::addr(&a)?, "late-x").await?;
    raw.recv_kind("handshake").await?;
    let linked = Testing::wait_until(|| async {
        a.peers()
            .await
            .map(|v| v.iter().any(|p| p.node_id == "late-x"))
            .unwrap_or(false)
    })
    .await;
    assert!(linked);

    let first = {
        let a = a.clone();
        tokio::spawn(async move {
            let deadline = Instant::now() + Duration::from_millis(400);
            a.query_with_deadline("SELECT region FROM sales", &peers(&["late-x"]), deadline)
                .await
        })
    };
    let first_id = query_id(&raw.recv_kind("data-query").await?);
    let res = first.await.unwrap()?;
    assert_eq!(res.results[0].error.as_deref(), Some(TIMEOUT_ERROR));

    let second = {
        let a = a.clone();
        tokio::spawn(async move {
            let deadline = Instant::now() + Duration::from_secs(2);
            a.query_with_deadline("SELECT region FROM sales", &peers(&["late-x"]), deadline)
                .await
        })
    };
    let second_id = query_id(&raw.recv_kind("data-query").await?);
    assert_ne!(first_id, second_id);

    // The answer to the timed out query arrives first and must not leak into the second.
    raw.send(response(
        first_id,
        "late-a",
        vec![vec![json!("stale")], vec![json!("stale")]],
    ))
    .await?;
    raw.send(response(second_id, "late-a", vec![vec![json!("fresh")]]))
        .await?;

    let res = second.await.unwrap()?;
    assert!(res.success);
    assert_eq!(res.total_rows, 1);
    assert_eq!(res.rows, vec![vec![json!("fresh")]]);

    a.stop().await?;
    Ok(())
}
