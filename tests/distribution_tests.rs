mod common;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use common::test_state;
use keymaster::api::AppState;
use keymaster::error::KdcError;
use keymaster::keys::{self, KeyState, KeyType};
use keymaster::storage::{DistStatus, DnssecKey};

async fn edge_zone_with_nodes(state: &AppState) {
    let storage = &state.storage;
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
        .add_node(
            "edge1.example.net.",
            None,
            &keymaster::crypto::generate_keypair().1,
            Some("127.0.0.1:1"),
        )
        .await
        .expect("edge1");
    storage
        .add_node(
            "edge2.example.net.",
            None,
            &keymaster::crypto::generate_keypair().1,
            Some("127.0.0.2:1"),
        )
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

async fn standby_zsk(state: &AppState, zone: &str) -> DnssecKey {
    let generated = keys::generate_key(zone, KeyType::Zsk, 15).expect("generate");
    let key = state
        .storage
        .add_key(zone, KeyType::Zsk, &generated)
        .await
        .expect("store key");
    state
        .storage
        .set_key_state(&key.id, KeyState::Published)
        .await
        .expect("publish");
    state
        .storage
        .set_key_state(&key.id, KeyState::Standby)
        .await
        .expect("standby");
    state.storage.get_key(zone, &key.id).await.expect("reload")
}

#[tokio::test]
async fn test_distribute_creates_pending_records_sharing_dist_id() {
    let state = test_state().await;
    edge_zone_with_nodes(&state).await;
    let key = standby_zsk(&state, "example.com.").await;

    let result = state
        .engine
        .distribute("example.com.", &key.id)
        .await
        .expect("distribute");

    // The identifier is the hex-formatted key tag.
    assert_eq!(result.dist_id, format!("{:04x}", key.key_tag));
    assert_eq!(result.outcomes.len(), 2);
    assert!(result.outcomes.iter().all(|o| o.ok));

    let records = state
        .storage
        .list_distributions(&result.dist_id)
        .await
        .expect("records");
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == DistStatus::Pending));
    assert!(records.iter().all(|r| r.dist_id == result.dist_id));
    assert!(records.iter().all(|r| !r.package.is_empty()));
    assert!(records.iter().all(|r| r.ephemeral_key.len() == 32));

    let key = state
        .storage
        .get_key("example.com.", &key.id)
        .await
        .expect("key");
    assert_eq!(key.state, KeyState::Distributed);
}

#[tokio::test]
async fn test_distribution_package_opens_with_node_secret() {
    let state = test_state().await;
    let storage = &state.storage;
    storage.add_service("svc1", "svc1").await.expect("service");
    storage
        .add_service_component("svc1", "sign_edge_zsk")
        .await
        .expect("component");
    storage
        .add_zone("example.com.", Some("svc1"), None)
        .await
        .expect("zone");

    let (node_secret, node_public) = keymaster::crypto::generate_keypair();
    storage
        .add_node("edge1.example.net.", None, &node_public, None)
        .await
        .expect("node");
    storage
        .add_node_component("edge1.example.net.", "sign_edge_zsk")
        .await
        .expect("assign");

    let key = standby_zsk(&state, "example.com.").await;
    let result = state
        .engine
        .distribute("example.com.", &key.id)
        .await
        .expect("distribute");

    let record = state
        .storage
        .get_distribution(&result.dist_id, "edge1.example.net.")
        .await
        .expect("record");
    let opened = keymaster::crypto::open(&node_secret, &record.package).expect("open");
    assert_eq!(opened, key.private_key);
}

#[tokio::test]
async fn test_distribute_rejects_central_zone() {
    let state = test_state().await;
    state
        .storage
        .add_zone("central.example.", None, None)
        .await
        .expect("zone");
    let key = standby_zsk(&state, "central.example.").await;

    assert!(matches!(
        state.engine.distribute("central.example.", &key.id).await,
        Err(KdcError::PreconditionFailed(_))
    ));
}

#[tokio::test]
async fn test_ksk_distribution_needs_full_edge_mode() {
    let state = test_state().await;
    edge_zone_with_nodes(&state).await;

    let generated = keys::generate_key("example.com.", KeyType::Ksk, 15).expect("generate");
    let ksk = state
        .storage
        .add_key("example.com.", KeyType::Ksk, &generated)
        .await
        .expect("store ksk");
    state
        .storage
        .set_key_state(&ksk.id, KeyState::Published)
        .await
        .expect("publish");
    state
        .storage
        .set_key_state(&ksk.id, KeyState::Standby)
        .await
        .expect("standby");
    state
        .storage
        .set_key_state(&ksk.id, KeyState::Active)
        .await
        .expect("activate");

    // edge_zsk zone: KSK distribution refused.
    assert!(matches!(
        state.engine.distribute("example.com.", &ksk.id).await,
        Err(KdcError::PreconditionFailed(_))
    ));

    // After moving the service to full edge signing it goes through.
    state
        .storage
        .replace_signing_component("svc1", "sign_edge_full")
        .await
        .expect("replace");
    let result = state
        .engine
        .distribute("example.com.", &ksk.id)
        .await
        .expect("distribute ksk");
    assert_eq!(result.state, KeyState::ActiveDist);
}

#[tokio::test]
async fn test_quorum_advances_key_and_retires_sibling() {
    let state = test_state().await;
    edge_zone_with_nodes(&state).await;

    // A previous edge signer that must retire on rollover.
    let older = standby_zsk(&state, "example.com.").await;
    state
        .storage
        .set_key_state(&older.id, KeyState::Distributed)
        .await
        .expect("distribute older");
    state
        .storage
        .set_key_state(&older.id, KeyState::EdgeSigner)
        .await
        .expect("older becomes signer");

    let key = standby_zsk(&state, "example.com.").await;
    let result = state
        .engine
        .distribute("example.com.", &key.id)
        .await
        .expect("distribute");

    // First confirmation: not yet quorum.
    state
        .engine
        .observe_confirmation(&result.dist_id, "edge1.example.net.")
        .await
        .expect("confirm edge1");
    let mid = state
        .storage
        .get_key("example.com.", &key.id)
        .await
        .expect("key");
    assert_eq!(mid.state, KeyState::Distributed);

    // Second confirmation reaches quorum.
    state
        .engine
        .observe_confirmation(&result.dist_id, "edge2.example.net.")
        .await
        .expect("confirm edge2");

    let done = state
        .storage
        .get_key("example.com.", &key.id)
        .await
        .expect("key");
    assert_eq!(done.state, KeyState::EdgeSigner);

    let retired = state
        .storage
        .get_key("example.com.", &older.id)
        .await
        .expect("older");
    assert_eq!(retired.state, KeyState::Retired);
    assert!(retired.retired_at.is_some());

    let records = state
        .storage
        .list_distributions(&result.dist_id)
        .await
        .expect("records");
    assert!(records.iter().all(|r| r.status == DistStatus::Completed));
    assert!(records.iter().all(|r| r.completed_at.is_some()));
}

#[tokio::test]
async fn test_confirmation_is_idempotent() {
    let state = test_state().await;
    edge_zone_with_nodes(&state).await;
    let key = standby_zsk(&state, "example.com.").await;
    let result = state
        .engine
        .distribute("example.com.", &key.id)
        .await
        .expect("distribute");

    for _ in 0..3 {
        state
            .engine
            .observe_confirmation(&result.dist_id, "edge1.example.net.")
            .await
            .expect("confirm");
    }

    let confirmations = state
        .storage
        .list_confirmations(&result.dist_id)
        .await
        .expect("confirmations");
    assert_eq!(confirmations.len(), 1);

    // Still below quorum, so the key has not advanced.
    let key = state
        .storage
        .get_key("example.com.", &key.id)
        .await
        .expect("key");
    assert_eq!(key.state, KeyState::Distributed);
}

#[tokio::test]
async fn test_zero_target_distribution_completes_on_observation_pass() {
    let state = test_state().await;
    let storage = &state.storage;
    storage.add_service("svc1", "svc1").await.expect("service");
    storage
        .add_service_component("svc1", "sign_edge_dyn")
        .await
        .expect("component");
    storage
        .add_zone("lonely.example.", Some("svc1"), None)
        .await
        .expect("zone");
    let key = standby_zsk(&state, "lonely.example.").await;

    let result = state
        .engine
        .distribute("lonely.example.", &key.id)
        .await
        .expect("distribute");
    assert!(result.outcomes.is_empty());

    let key_mid = storage
        .get_key("lonely.example.", &key.id)
        .await
        .expect("key");
    assert_eq!(key_mid.state, KeyState::Distributed);

    // Quorum over an empty target set is trivially satisfied.
    state.engine.observation_pass().await.expect("observe");
    let key_done = storage
        .get_key("lonely.example.", &key.id)
        .await
        .expect("key");
    assert_eq!(key_done.state, KeyState::EdgeSigner);
}

#[tokio::test]
async fn test_prepare_chunks_checksum_and_memoization() {
    let state = test_state().await;
    edge_zone_with_nodes(&state).await;
    let key = standby_zsk(&state, "example.com.").await;
    let result = state
        .engine
        .distribute("example.com.", &key.id)
        .await
        .expect("distribute");

    let prepared = state
        .engine
        .prepare_chunks("edge1.example.net.", &result.dist_id)
        .await
        .expect("prepare");

    // Chunk payloads reassemble to the base64 document behind the checksum.
    let rejoined: Vec<u8> = prepared
        .chunks
        .iter()
        .flat_map(|c| c.data.clone())
        .collect();
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(&rejoined);
    assert_eq!(prepared.manifest.checksum, format!("sha256:{}", hex::encode(digest)));
    assert_eq!(prepared.manifest.chunk_count as usize, prepared.chunks.len());
    assert_eq!(
        prepared.manifest.options.get("content").map(String::as_str),
        Some("zonelist")
    );
    assert_eq!(
        prepared.manifest.options.get("distribution_id").map(String::as_str),
        Some(result.dist_id.as_str())
    );

    let json = BASE64.decode(&rejoined).expect("base64 payload");
    let doc: serde_json::Value = serde_json::from_slice(&json).expect("json payload");
    assert_eq!(doc["zones"][0], "example.com.");

    // Second call returns the memoized entry.
    let again = state
        .engine
        .prepare_chunks("edge1.example.net.", &result.dist_id)
        .await
        .expect("prepare again");
    assert!(std::sync::Arc::ptr_eq(&prepared, &again));
}

#[tokio::test]
async fn test_prepare_chunks_unknown_distribution() {
    let state = test_state().await;
    edge_zone_with_nodes(&state).await;
    assert!(state
        .engine
        .prepare_chunks("edge1.example.net.", "beef")
        .await
        .is_err());
}

#[tokio::test]
async fn test_purge_completed_clears_records() {
    let state = test_state().await;
    edge_zone_with_nodes(&state).await;
    let key = standby_zsk(&state, "example.com.").await;
    let result = state
        .engine
        .distribute("example.com.", &key.id)
        .await
        .expect("distribute");
    state
        .engine
        .observe_confirmation(&result.dist_id, "edge1.example.net.")
        .await
        .expect("confirm 1");
    state
        .engine
        .observe_confirmation(&result.dist_id, "edge2.example.net.")
        .await
        .expect("confirm 2");

    let purged = state.engine.purge_completed().await.expect("purge");
    assert_eq!(purged, 1);
    let records = state
        .storage
        .list_distributions(&result.dist_id)
        .await
        .expect("records");
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_distribute_many_reports_per_zone() {
    let state = test_state().await;
    edge_zone_with_nodes(&state).await;
    standby_zsk(&state, "example.com.").await;
    state
        .storage
        .add_zone("nokey.example.", Some("svc1"), None)
        .await
        .expect("zone without key");

    let results = state
        .engine
        .distribute_many(&["example.com.".to_string(), "nokey.example.".to_string()])
        .await;
    assert_eq!(results.len(), 2);
    assert!(results[0].1.is_ok());
    assert!(results[1].1.is_err());
}

#[tokio::test]
async fn test_lifecycle_sweep_honors_holds() {
    let state = test_state().await;
    state
        .storage
        .add_zone("example.com.", None, None)
        .await
        .expect("zone");
    let generated = keys::generate_key("example.com.", KeyType::Zsk, 15).expect("generate");
    let key = state
        .storage
        .add_key("example.com.", KeyType::Zsk, &generated)
        .await
        .expect("store");
    state
        .storage
        .set_key_state(&key.id, KeyState::Published)
        .await
        .expect("publish");

    // Publish hold (hours) has not elapsed; the sweep must not advance.
    state.engine.lifecycle_sweep().await.expect("sweep");
    let key = state
        .storage
        .get_key("example.com.", &key.id)
        .await
        .expect("key");
    assert_eq!(key.state, KeyState::Published);
}
