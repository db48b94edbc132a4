mod common;

use common::memory_storage;
use keymaster::storage::{NodeState, Storage};
use keymaster::topology;

async fn edge_graph(storage: &Storage) {
    storage.add_service("svc1", "svc1").await.expect("service");
    storage
        .add_service_component("svc1", "sign_edge_zsk")
        .await
        .expect("signing component");
    storage
        .add_zone("example.com.", Some("svc1"), None)
        .await
        .expect("zone");
    storage
        .add_node("edge1.example.net.", None, &[1u8; 32], None)
        .await
        .expect("edge1");
    storage
        .add_node("edge2.example.net.", None, &[2u8; 32], None)
        .await
        .expect("edge2");
    storage
        .add_node_component("edge1.example.net.", "sign_edge_zsk")
        .await
        .expect("assign edge1");
    storage
        .add_node_component("edge2.example.net.", "sign_edge_zsk")
        .await
        .expect("assign edge2");
}

#[tokio::test]
async fn test_nodes_serving_zone() {
    let storage = memory_storage().await;
    edge_graph(&storage).await;

    let mut nodes = topology::nodes_serving_zone(&storage, "example.com.")
        .await
        .expect("nodes");
    nodes.sort();
    assert_eq!(nodes, vec!["edge1.example.net.", "edge2.example.net."]);
}

#[tokio::test]
async fn test_offline_nodes_do_not_serve() {
    let storage = memory_storage().await;
    edge_graph(&storage).await;
    storage
        .set_node_state("edge2.example.net.", NodeState::Offline)
        .await
        .expect("offline");

    let nodes = topology::nodes_serving_zone(&storage, "example.com.")
        .await
        .expect("nodes");
    assert_eq!(nodes, vec!["edge1.example.net."]);
}

#[tokio::test]
async fn test_zones_served_by_node() {
    let storage = memory_storage().await;
    edge_graph(&storage).await;
    storage
        .add_zone("other.example.", None, None)
        .await
        .expect("unrelated zone");

    let zones = topology::zones_served_by_node(&storage, "edge1.example.net.")
        .await
        .expect("zones");
    assert_eq!(zones, vec!["example.com."]);
}

#[tokio::test]
async fn test_zones_newly_served_before_assignment() {
    let storage = memory_storage().await;
    storage.add_service("svc1", "svc1").await.expect("service");
    storage
        .add_service_component("svc1", "sign_edge_zsk")
        .await
        .expect("component");
    storage
        .add_zone("example.com.", Some("svc1"), None)
        .await
        .expect("zone");
    storage
        .add_node("edge1.example.net.", None, &[1u8; 32], None)
        .await
        .expect("node");

    // Before the assignment the zone counts as newly served.
    let zones = topology::zones_newly_served(&storage, "edge1.example.net.", "sign_edge_zsk")
        .await
        .expect("newly served");
    assert_eq!(zones, vec!["example.com."]);

    // With another component of the same service already on the node,
    // nothing is new.
    storage
        .add_component("cache_frontend", "cache frontend")
        .await
        .expect("extra component");
    storage
        .add_service_component("svc1", "cache_frontend")
        .await
        .expect("attach extra");
    storage
        .add_node_component("edge1.example.net.", "cache_frontend")
        .await
        .expect("assign extra");

    let zones = topology::zones_newly_served(&storage, "edge1.example.net.", "sign_edge_zsk")
        .await
        .expect("newly served");
    assert!(zones.is_empty());
}

#[tokio::test]
async fn test_zones_no_longer_served_before_removal() {
    let storage = memory_storage().await;
    edge_graph(&storage).await;

    // edge1 only reaches example.com. through sign_edge_zsk.
    let zones =
        topology::zones_no_longer_served(&storage, "edge1.example.net.", "sign_edge_zsk")
            .await
            .expect("no longer served");
    assert_eq!(zones, vec!["example.com."]);

    // A second component of the same service keeps the zone covered.
    storage
        .add_component("cache_frontend", "cache frontend")
        .await
        .expect("extra component");
    storage
        .add_service_component("svc1", "cache_frontend")
        .await
        .expect("attach extra");
    storage
        .add_node_component("edge1.example.net.", "cache_frontend")
        .await
        .expect("assign extra");

    let zones =
        topology::zones_no_longer_served(&storage, "edge1.example.net.", "sign_edge_zsk")
            .await
            .expect("no longer served");
    assert!(zones.is_empty());
}

#[tokio::test]
async fn test_blast_zone_distinguishes_rollover_scope() {
    let storage = memory_storage().await;
    edge_graph(&storage).await;

    // A second, fully edge-signed zone on the same node.
    storage.add_service("svc2", "svc2").await.expect("svc2");
    storage
        .add_service_component("svc2", "sign_edge_full")
        .await
        .expect("full component");
    storage
        .add_zone("full.example.", Some("svc2"), None)
        .await
        .expect("full zone");
    storage
        .add_node_component("edge1.example.net.", "sign_edge_full")
        .await
        .expect("assign full");

    // And a centrally signed zone that must not appear at all.
    storage.add_service("svc3", "svc3").await.expect("svc3");
    storage
        .add_service_component("svc3", "sign_kdc")
        .await
        .expect("central component");
    storage
        .add_zone("central.example.", Some("svc3"), None)
        .await
        .expect("central zone");
    storage
        .add_node_component("edge1.example.net.", "sign_kdc")
        .await
        .expect("assign central");

    let mut blast = topology::blast_zone(&storage, "edge1.example.net.")
        .await
        .expect("blast zone");
    blast.zsk_rollover.sort();

    assert_eq!(blast.zsk_rollover, vec!["example.com.", "full.example."]);
    assert_eq!(blast.ksk_rollover, vec!["full.example."]);
}
