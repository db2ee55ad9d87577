//! End-to-end position logging: events in, JSON file out.

use meshpos::events::{ConnectionInfo, MeshEvent, PacketEvent, PositionFix};
use meshpos::handler::{PositionHandler, PositionOutcome, UNKNOWN_NODE_NAME};
use meshpos::ledger::PositionLedger;
use meshpos::logger::{PositionLogger, StopReason};
use meshpos::nodes::NodeTable;
use std::collections::HashMap;
use tempfile::tempdir;
use tokio::sync::{mpsc, oneshot};

const NODE: u32 = 123_456_789;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn first_fix_is_recorded_and_round_trips() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("mesh_positions.json");
    let handler = PositionHandler::new(PositionLedger::load(&path).unwrap());

    let packet = PacketEvent::position(
        NODE,
        PositionFix::new(37.774900, -122.419400, 15.0),
        Some(1_700_000_000),
    );
    let outcome = handler
        .on_packet(&packet, &HashMap::<u32, String>::new())
        .unwrap();
    match outcome {
        PositionOutcome::Recorded { node, persisted, .. } => {
            assert_eq!(node, NODE);
            assert_eq!(persisted, 1);
        }
        other => panic!("expected a recorded fix, got {:?}", other),
    }

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let entry = &raw["123456789"];
    assert_eq!(entry["name"], UNKNOWN_NODE_NAME);
    assert!(close(entry["latitude"].as_f64().unwrap(), 37.7749));
    assert!(close(entry["longitude"].as_f64().unwrap(), -122.4194));
    assert!(close(entry["altitude"].as_f64().unwrap(), 15.0));
    assert_eq!(entry["last_updated"], 1_700_000_000u64);
    assert!(entry["timestamp"].as_str().unwrap().contains('T'));

    let reloaded = PositionLedger::load(&path).unwrap();
    assert_eq!(reloaded.len(), 1);
    let in_memory = handler.into_ledger();
    let (a, b) = (reloaded.get(NODE).unwrap(), in_memory.get(NODE).unwrap());
    assert_eq!(a.name, b.name);
    assert!(close(a.latitude, b.latitude));
    assert!(close(a.longitude, b.longitude));
    assert!(close(a.altitude, b.altitude));
    assert_eq!(a.timestamp, b.timestamp);
    assert_eq!(a.last_updated, b.last_updated);
}

#[test]
fn second_fix_overwrites_first() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("mesh_positions.json");
    let handler = PositionHandler::new(PositionLedger::load(&path).unwrap());
    let names = HashMap::<u32, String>::new();

    handler
        .on_packet(
            &PacketEvent::position(NODE, PositionFix::new(37.7749, -122.4194, 15.0), Some(1_700_000_000)),
            &names,
        )
        .unwrap();
    handler
        .on_packet(
            &PacketEvent::position(NODE, PositionFix::new(37.8044, -122.2712, 42.0), Some(1_700_000_600)),
            &names,
        )
        .unwrap();

    let reloaded = PositionLedger::load(&path).unwrap();
    assert_eq!(reloaded.len(), 1);
    let rec = reloaded.get(NODE).unwrap();
    assert!(close(rec.latitude, 37.8044));
    assert!(close(rec.longitude, -122.2712));
    assert!(close(rec.altitude, 42.0));
    assert_eq!(rec.last_updated, 1_700_000_600);
}

#[test]
fn existing_file_is_extended_not_replaced() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("mesh_positions.json");
    std::fs::write(
        &path,
        r#"{
  "42": {
    "name": "Old Timer",
    "latitude": 10.5,
    "longitude": 20.25,
    "altitude": 3,
    "timestamp": "2024-01-01T00:00:00.000000",
    "last_updated": 1
  }
}"#,
    )
    .unwrap();

    let handler = PositionHandler::new(PositionLedger::load(&path).unwrap());
    let nodes = NodeTable::new();
    nodes.update(43, "Newcomer");
    handler
        .on_packet(&PacketEvent::position(43, PositionFix::new(1.0, 2.0, 0.0), None), &nodes)
        .unwrap();

    let reloaded = PositionLedger::load(&path).unwrap();
    assert_eq!(reloaded.len(), 2);
    assert_eq!(reloaded.get(42).unwrap().name, "Old Timer");
    assert_eq!(reloaded.get(43).unwrap().name, "Newcomer");
    assert_eq!(reloaded.get(43).unwrap().last_updated, 0);
}

#[tokio::test]
async fn logger_processes_events_until_shutdown_and_flushes() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("mesh_positions.json");
    let nodes = NodeTable::new();
    nodes.update(7, "Trailhead");
    let logger = PositionLogger::new(
        PositionHandler::new(PositionLedger::load(&path).unwrap()),
        nodes,
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    tx.send(MeshEvent::Connected(ConnectionInfo {
        my_node_num: Some(1),
        port: "/dev/null".to_string(),
        known_nodes: 1,
    }))
    .unwrap();
    tx.send(MeshEvent::Packet(PacketEvent::position(7, PositionFix::new(46.5, 8.0, 2000.0), Some(5))))
        .unwrap();
    tx.send(MeshEvent::Packet(PacketEvent::position(8, PositionFix::new(0.0, 0.0, 0.0), Some(6))))
        .unwrap();

    let run = logger.run(rx, async {
        let _ = stop_rx.await;
    });
    tokio::pin!(run);

    // Let the queued events drain before asking the loop to stop.
    tokio::select! {
        _ = &mut run => panic!("logger stopped before shutdown"),
        _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
    }
    stop_tx.send(()).unwrap();
    let reason = run.await.unwrap();
    assert_eq!(reason, StopReason::Shutdown);

    let stats = logger.handler().stats();
    assert_eq!(stats.packets, 2);
    assert_eq!(stats.recorded, 1);
    assert_eq!(stats.no_fix, 1);

    let reloaded = PositionLedger::load(&path).unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded.get(7).unwrap().name, "Trailhead");
    drop(tx);
}

#[tokio::test]
async fn logger_stops_when_source_closes_and_still_persists() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("out").join("mesh_positions.json");
    let logger = PositionLogger::new(
        PositionHandler::new(PositionLedger::load(&path).unwrap()),
        NodeTable::new(),
    );

    let (tx, rx) = mpsc::unbounded_channel();
    drop(tx);
    let reason = logger.run(rx, std::future::pending::<()>()).await.unwrap();
    assert_eq!(reason, StopReason::SourceClosed);

    // Final flush writes an empty ledger file even when nothing was received.
    assert!(path.exists());
    assert!(PositionLedger::load(&path).unwrap().is_empty());
}

#[tokio::test]
async fn source_is_closed_even_when_final_save_fails() {
    use meshpos::ledger::LedgerError;
    use std::sync::atomic::{AtomicBool, Ordering};

    let tmp = tempdir().unwrap();
    let blocked = tmp.path().join("blocked");
    std::fs::create_dir(&blocked).unwrap();
    let logger = PositionLogger::new(
        PositionHandler::new(PositionLedger::empty(&blocked)),
        NodeTable::new(),
    );

    let closed = AtomicBool::new(false);
    let (tx, rx) = mpsc::unbounded_channel();
    drop(tx);
    let (run_result, closed_ok) = logger
        .run_and_close(rx, std::future::pending::<()>(), async {
            closed.store(true, Ordering::SeqCst);
            true
        })
        .await;

    assert!(matches!(run_result, Err(LedgerError::Write { .. })));
    assert!(closed_ok);
    assert!(closed.load(Ordering::SeqCst));
}
