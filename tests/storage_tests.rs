mod common;

use common::memory_storage;
use keymaster::config::DatabaseConfig;
use keymaster::error::KdcError;
use keymaster::keys::{self, KeyState, KeyType, SigningMode};
use keymaster::storage::{DEFAULT_SERVICE, NodeState, Storage};

#[tokio::test]
async fn test_bootstrap_creates_system_rows() {
    let storage = memory_storage().await;

    let service = storage.get_service(DEFAULT_SERVICE).await.expect("default service");
    assert!(service.active);

    let components = storage.list_components().await.expect("components");
    let ids: Vec<&str> = components.iter().map(|c| c.id.as_str()).collect();
    for expected in [
        "sign_kdc",
        "sign_upstream",
        "sign_unsigned",
        "sign_edge_dyn",
        "sign_edge_zsk",
        "sign_edge_full",
    ] {
        assert!(ids.contains(&expected), "missing component {}", expected);
    }
}

#[tokio::test]
async fn test_bootstrap_is_idempotent_across_reconnects() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("kdc.db");
    let config = DatabaseConfig {
        db_type: "sqlite".to_string(),
        dsn: path.to_string_lossy().to_string(),
    };

    {
        let storage = Storage::connect(&config).await.expect("first connect");
        storage
            .add_zone("example.com.", None, None)
            .await
            .expect("add zone");
    }

    let storage = Storage::connect(&config).await.expect("second connect");
    assert_eq!(storage.list_components().await.expect("components").len(), 6);
    assert!(storage.get_zone("example.com.").await.is_ok());
}

#[tokio::test]
async fn test_legacy_component_assignments_migrate_on_boot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("kdc.db");
    let config = DatabaseConfig {
        db_type: "sqlite".to_string(),
        dsn: path.to_string_lossy().to_string(),
    };

    {
        let storage = Storage::connect(&config).await.expect("first connect");
        storage
            .add_component("sign_edge_all", "pre-rename full edge signing")
            .await
            .expect("legacy component");
        storage.add_service("svc1", "svc1").await.expect("service");
        storage
            .add_service_component("svc1", "sign_edge_all")
            .await
            .expect("legacy assignment");
    }

    let storage = Storage::connect(&config).await.expect("migrating connect");
    assert!(matches!(
        storage.get_component("sign_edge_all").await,
        Err(KdcError::ComponentNotFound(_))
    ));
    let components = storage
        .list_service_components("svc1")
        .await
        .expect("service components");
    assert_eq!(components.len(), 1);
    assert_eq!(components[0].id, "sign_edge_full");
}

#[tokio::test]
async fn test_zone_crud_and_default_service() {
    let storage = memory_storage().await;

    let zone = storage
        .add_zone("example.com.", None, Some("test zone"))
        .await
        .expect("add zone");
    assert!(zone.active);
    assert_eq!(zone.service_id, None);

    // No service reference means the default service claims it.
    let mode = storage
        .zone_signing_mode("example.com.")
        .await
        .expect("signing mode");
    assert_eq!(mode, SigningMode::Central);

    let zones = storage
        .list_zones_for_service(DEFAULT_SERVICE)
        .await
        .expect("default zones");
    assert_eq!(zones.len(), 1);

    assert!(matches!(
        storage.add_zone("example.com.", None, None).await,
        Err(KdcError::Conflict(_))
    ));

    storage.delete_zone("example.com.").await.expect("delete");
    assert!(matches!(
        storage.get_zone("example.com.").await,
        Err(KdcError::ZoneNotFound(_))
    ));
}

#[tokio::test]
async fn test_node_public_key_validation_and_uniqueness() {
    let storage = memory_storage().await;
    let key = [9u8; 32];

    assert!(matches!(
        storage.add_node("edge1.example.net.", None, &[0u8; 31], None).await,
        Err(KdcError::InvalidPublicKeyLength(31))
    ));
    assert!(matches!(
        storage.add_node("edge1.example.net.", None, &[0u8; 33], None).await,
        Err(KdcError::InvalidPublicKeyLength(33))
    ));

    storage
        .add_node("edge1.example.net.", Some("edge one"), &key, None)
        .await
        .expect("add edge1");

    let mut other = key;
    other[0] ^= 1;
    storage
        .add_node("edge2.example.net.", None, &other, None)
        .await
        .expect("add edge2");

    // Same public key on a third node is the dedicated conflict.
    assert!(matches!(
        storage.add_node("edge3.example.net.", None, &key, None).await,
        Err(KdcError::DuplicateNodeKey(_))
    ));
}

#[tokio::test]
async fn test_node_lookup_tolerates_both_id_forms() {
    let storage = memory_storage().await;
    storage
        .add_node("edge1.example.net.", None, &[1u8; 32], None)
        .await
        .expect("add node");

    assert!(storage.get_node("edge1.example.net.").await.is_ok());
    assert!(storage.get_node("edge1.example.net").await.is_ok());

    storage
        .set_node_state("edge1.example.net", NodeState::Compromised)
        .await
        .expect("set state");
    let node = storage.get_node("edge1.example.net.").await.expect("get");
    assert_eq!(node.state, NodeState::Compromised);
}

#[tokio::test]
async fn test_signing_component_uniqueness_per_service() {
    let storage = memory_storage().await;
    storage.add_service("svc1", "svc1").await.expect("service");

    storage
        .add_service_component("svc1", "sign_edge_zsk")
        .await
        .expect("first signing component");

    assert!(matches!(
        storage.add_service_component("svc1", "sign_kdc").await,
        Err(KdcError::DuplicateSigningComponent(_))
    ));

    // Replacement swaps atomically.
    storage
        .replace_signing_component("svc1", "sign_edge_full")
        .await
        .expect("replace");
    let components = storage
        .list_service_components("svc1")
        .await
        .expect("components");
    let signing: Vec<&str> = components
        .iter()
        .filter(|c| c.id.starts_with("sign_"))
        .map(|c| c.id.as_str())
        .collect();
    assert_eq!(signing, vec!["sign_edge_full"]);

    assert!(storage
        .replace_signing_component("svc1", "not_signing")
        .await
        .is_err());
}

#[tokio::test]
async fn test_system_rows_cannot_be_deleted() {
    let storage = memory_storage().await;
    assert!(matches!(
        storage.delete_service(DEFAULT_SERVICE).await,
        Err(KdcError::PreconditionFailed(_))
    ));
    assert!(matches!(
        storage.delete_component("sign_kdc").await,
        Err(KdcError::PreconditionFailed(_))
    ));
}

#[tokio::test]
async fn test_signing_mode_follows_service_component() {
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

    let mode = storage
        .zone_signing_mode("example.com.")
        .await
        .expect("mode");
    assert_eq!(mode, SigningMode::EdgeZsk);

    storage
        .replace_signing_component("svc1", "sign_unsigned")
        .await
        .expect("replace");
    let mode = storage
        .zone_signing_mode("example.com.")
        .await
        .expect("mode");
    assert_eq!(mode, SigningMode::Unsigned);
}

#[tokio::test]
async fn test_key_storage_and_cascade() {
    let storage = memory_storage().await;
    storage
        .add_zone("example.com.", None, None)
        .await
        .expect("zone");

    let generated = keys::generate_key("example.com.", KeyType::Zsk, 15).expect("generate");
    let key = storage
        .add_key("example.com.", KeyType::Zsk, &generated)
        .await
        .expect("store key");
    assert_eq!(key.state, KeyState::Created);
    assert_eq!(key.key_tag, generated.key_tag);
    assert_eq!(key.private_key.len(), 32);

    storage
        .set_key_state(&key.id, KeyState::Published)
        .await
        .expect("publish");
    let key = storage.get_key("example.com.", &key.id).await.expect("get");
    assert_eq!(key.state, KeyState::Published);
    assert!(key.published_at.is_some());

    // Deleting the zone cascades to its keys.
    storage.delete_zone("example.com.").await.expect("delete zone");
    assert!(storage.get_key_by_id(&key.id).await.is_err());
}

#[tokio::test]
async fn test_key_private_bytes_not_serialized() {
    let storage = memory_storage().await;
    storage
        .add_zone("example.com.", None, None)
        .await
        .expect("zone");
    let generated = keys::generate_key("example.com.", KeyType::Zsk, 15).expect("generate");
    let key = storage
        .add_key("example.com.", KeyType::Zsk, &generated)
        .await
        .expect("store");

    let rendered = serde_json::to_string(&key).expect("serialize");
    assert!(!rendered.contains("private_key"));
    assert!(rendered.contains("public_key"));
}
