//! Integration tests for replicated editing between nodes.
//!
//! These tests run real node pairs and triples over in-memory streams and
//! loopback TCP, and check that every replica ends up with the same text.

use std::time::Duration;

use rga_replica::replication::Direction;
use rga_replica::transport::{self, LineReader};
use rga_replica::{CausalGapPolicy, ClockSnapshot, PositionId, ReplicationNode, WireMessage};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

const SITES: [&str; 3] = ["node1", "node2", "node3"];

fn node(id: &str) -> ReplicationNode {
    node_with_policy(id, CausalGapPolicy::Buffer)
}

fn node_with_policy(id: &str, policy: CausalGapPolicy) -> ReplicationNode {
    let others = SITES.iter().filter(|s| **s != id).copied();
    ReplicationNode::new(id, others, policy)
}

/// Polls `check` until it holds or five seconds pass.
async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Links two nodes over an in-memory stream.
async fn link(a: &ReplicationNode, b: &ReplicationNode) {
    let (left, right) = tokio::io::duplex(64 * 1024);
    a.attach(left, Direction::Outbound);
    b.attach(right, Direction::Inbound);

    let (a_id, b_id) = (a.node_id().to_string(), b.node_id().to_string());
    eventually("handshake", || {
        a.peers().contains(&b_id) && b.peers().contains(&a_id)
    })
    .await;
}

/// A fake peer that records every line `node` broadcasts.
struct Observer {
    lines: LineReader<ReadHalf<DuplexStream>>,
    _writer: WriteHalf<DuplexStream>,
}

impl Observer {
    async fn attach(node: &ReplicationNode) -> Self {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        node.attach(theirs, Direction::Inbound);

        let (reader, mut writer) = tokio::io::split(ours);
        let mut lines = transport::receive_lines(reader);
        let hello = lines.next_line().await.unwrap().unwrap();
        assert_eq!(
            WireMessage::decode(&hello).unwrap(),
            WireMessage::hello(node.node_id())
        );

        let ours = WireMessage::hello("observer").encode().unwrap();
        transport::send_line(&mut writer, &ours).await.unwrap();
        eventually("observer registered", || {
            node.peers().contains(&"observer".to_string())
        })
        .await;

        Observer {
            lines,
            _writer: writer,
        }
    }

    async fn next(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("no record within timeout")
            .unwrap()
            .unwrap()
    }
}

#[tokio::test]
async fn test_two_nodes_converge_over_memory_stream() {
    let a = node("node1");
    let b = node("node2");
    link(&a, &b).await;

    a.local_insert(0, "hello").unwrap();
    eventually("b sees hello", || b.visible_text() == "hello").await;

    b.local_delete(0).unwrap();
    b.local_insert(4, " world").unwrap();
    eventually("a converges", || a.visible_text() == "ello world").await;
    assert_eq!(b.visible_text(), "ello world");

    // both clocks know about both edits
    assert_eq!(a.clock_snapshot().get("node2"), 7);
    assert_eq!(b.clock_snapshot().get("node1"), 5);
}

#[tokio::test]
async fn test_three_nodes_over_tcp() {
    let nodes: Vec<ReplicationNode> = SITES.iter().map(|id| node(id)).collect();
    let mut addrs = Vec::new();
    for n in &nodes {
        addrs.push(n.listen("127.0.0.1:0").await.unwrap().to_string());
    }

    nodes[0].connect(&addrs[1]).await.unwrap();
    nodes[0].connect(&addrs[2]).await.unwrap();
    nodes[1].connect(&addrs[2]).await.unwrap();
    eventually("full mesh", || nodes.iter().all(|n| n.peers().len() == 2)).await;

    // concurrent inserts at the document start
    nodes[0].local_insert(0, "X").unwrap();
    nodes[1].local_insert(0, "Y").unwrap();
    eventually("concurrent inserts converge", || {
        nodes.iter().all(|n| n.visible_text().chars().count() == 2)
    })
    .await;
    for n in &nodes {
        assert_eq!(n.visible_text(), "XY");
    }

    nodes[2].local_insert(1, "-").unwrap();
    eventually("middle insert converges", || {
        nodes.iter().all(|n| n.visible_text() == "X-Y")
    })
    .await;

    nodes[0].local_delete(2).unwrap();
    eventually("edits converge", || {
        nodes.iter().all(|n| n.visible_text() == "X-")
    })
    .await;

    for n in &nodes {
        n.shutdown();
    }
}

#[tokio::test]
async fn test_out_of_order_records_are_buffered() {
    let a = node("node1");
    let mut observer = Observer::attach(&a).await;

    a.local_insert(0, "ab").unwrap();
    let insert_a = observer.next().await;
    let insert_b = observer.next().await;

    let b = node("node2");
    b.on_line(&insert_b);
    assert_eq!(b.visible_text(), "");
    assert_eq!(b.pending_inserts(), 1);

    b.on_line(&insert_a);
    assert_eq!(b.visible_text(), "ab");
    assert_eq!(b.pending_inserts(), 0);
}

#[tokio::test]
async fn test_out_of_order_records_with_append_fallback() {
    let a = node("node1");
    let mut observer = Observer::attach(&a).await;

    a.local_insert(0, "ab").unwrap();
    let insert_a = observer.next().await;
    let insert_b = observer.next().await;

    let b = node_with_policy("node2", CausalGapPolicy::AppendToEnd);
    b.on_line(&insert_b);
    b.on_line(&insert_a);
    assert_eq!(b.visible_text(), "ba");
}

#[tokio::test]
async fn test_broadcast_record_shape() {
    let a = node("node1");
    let mut observer = Observer::attach(&a).await;

    a.local_insert(0, "q").unwrap();
    let line = observer.next().await;
    let json: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(json["type"], "insert");
    assert_eq!(json["site_id"], "node1");
    assert_eq!(json["op_id"]["node1"], 1);
    assert_eq!(json["char"]["value"], "q");
    assert_eq!(json["char"]["deleted"], false);
    assert_eq!(json["origin_id"], serde_json::json!([null, null]));

    a.local_delete(0).unwrap();
    let line = observer.next().await;
    match WireMessage::decode(&line).unwrap() {
        WireMessage::Delete { site_id, target_id } => {
            assert_eq!(site_id, "node1");
            assert_eq!(target_id.site(), "node1");
            assert_eq!(target_id.counter(), 1);
        }
        other => panic!("expected delete, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_delete_is_not_broadcast() {
    let a = node("node1");
    let b = node("node2");
    link(&a, &b).await;

    a.local_insert(0, "abc").unwrap();
    eventually("b sees abc", || b.visible_text() == "abc").await;
    let count = a.operation_count();

    assert!(a.local_delete(5).is_err());
    assert_eq!(a.visible_text(), "abc");
    assert_eq!(a.operation_count(), count);
    assert_eq!(a.clock_snapshot().get("node1"), 3);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(b.visible_text(), "abc");
    assert_eq!(b.operation_count(), 3);
}

#[tokio::test]
async fn test_unknown_delete_is_ignored() {
    let a = node("node1");
    a.local_insert(0, "x").unwrap();

    let ghost = PositionId::new(
        ClockSnapshot::from_pairs([("node3".to_string(), 42)]),
        "node3",
    );
    a.on_message(WireMessage::delete("node3", ghost));
    assert_eq!(a.visible_text(), "x");
    assert_eq!(a.operation_count(), 1);
}

#[tokio::test]
async fn test_disconnect_removes_peer_only() {
    let a = node("node1");
    let b = node("node2");
    let c = node("node3");
    link(&a, &b).await;
    link(&a, &c).await;

    b.shutdown();
    eventually("a drops b", || a.peers() == vec!["node3".to_string()]).await;

    a.local_insert(0, "z").unwrap();
    eventually("c still replicates", || c.visible_text() == "z").await;
    assert_eq!(b.visible_text(), "");
}

#[tokio::test]
async fn test_shutdown_closes_listener() {
    let a = node("node1");
    let addr = a.listen("127.0.0.1:0").await.unwrap();
    a.shutdown();
    a.shutdown_signal().await;

    // give the accept loop a moment to drop the socket
    tokio::time::sleep(Duration::from_millis(50)).await;
    let b = node("node2");
    assert!(b.connect(&addr.to_string()).await.is_err());
}

#[tokio::test]
async fn test_malformed_line_keeps_connection_open() {
    let record = {
        let b = node("node2");
        let mut observer = Observer::attach(&b).await;
        b.local_insert(0, "k").unwrap();
        observer.next().await
    };

    let a = node("node1");
    let (ours, theirs) = tokio::io::duplex(4096);
    a.attach(theirs, Direction::Inbound);
    let (reader, mut writer) = tokio::io::split(ours);
    let mut lines = BufReader::new(reader).lines();
    lines.next_line().await.unwrap().unwrap();

    let hello = WireMessage::hello("node2").encode().unwrap();
    transport::send_line(&mut writer, &hello).await.unwrap();
    transport::send_line(&mut writer, "this is not json\n").await.unwrap();
    transport::send_line(&mut writer, "{\"type\":\"teleport\"}\n").await.unwrap();
    transport::send_line(&mut writer, &format!("{record}\n")).await.unwrap();

    eventually("valid record applied", || a.visible_text() == "k").await;
    assert_eq!(a.peers(), vec!["node2".to_string()]);
}

#[tokio::test]
async fn test_non_utf8_line_keeps_connection_open() {
    let record = {
        let b = node("node2");
        let mut observer = Observer::attach(&b).await;
        b.local_insert(0, "k").unwrap();
        observer.next().await
    };

    let a = node("node1");
    let (ours, theirs) = tokio::io::duplex(4096);
    a.attach(theirs, Direction::Inbound);
    let (reader, mut writer) = tokio::io::split(ours);
    let mut lines = transport::receive_lines(reader);
    lines.next_line().await.unwrap().unwrap();

    let hello = WireMessage::hello("node2").encode().unwrap();
    transport::send_line(&mut writer, &hello).await.unwrap();
    writer.write_all(b"\xff\xfe garbage\n").await.unwrap();
    transport::send_line(&mut writer, &format!("{record}\n")).await.unwrap();

    eventually("valid record applied", || a.visible_text() == "k").await;
    assert_eq!(a.peers(), vec!["node2".to_string()]);
}

#[tokio::test]
async fn test_hello_rebinds_connection() {
    let a = node("node1");
    let (ours, theirs) = tokio::io::duplex(4096);
    a.attach(theirs, Direction::Inbound);
    let (reader, mut writer) = tokio::io::split(ours);
    let mut lines = transport::receive_lines(reader);
    lines.next_line().await.unwrap().unwrap();

    // an empty id never registers
    let anonymous = WireMessage::hello("").encode().unwrap();
    transport::send_line(&mut writer, &anonymous).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(a.peers().is_empty());

    let hello = WireMessage::hello("node2").encode().unwrap();
    transport::send_line(&mut writer, &hello).await.unwrap();
    eventually("bound to node2", || a.peers() == vec!["node2".to_string()]).await;

    let hello = WireMessage::hello("node3").encode().unwrap();
    transport::send_line(&mut writer, &hello).await.unwrap();
    eventually("rebound to node3", || a.peers() == vec!["node3".to_string()]).await;

    // broadcasts still reach the rebound connection
    a.local_insert(0, "r").unwrap();
    let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(WireMessage::decode(&line).unwrap().kind(), "insert");
}
