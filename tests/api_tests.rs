mod common;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use common::test_state;
use keymaster::api::{self, ApiResponse};
use keymaster::keys::{KeyState, KeyType};
use serde_json::json;

fn data_str<'a>(resp: &'a ApiResponse, key: &str) -> &'a str {
    resp.data
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing field {}", key))
}

#[tokio::test]
async fn test_envelope_shape() {
    let state = test_state().await;
    let resp = api::zone::handle(&state, json!({"command": "list"})).await;
    assert!(!resp.error);
    assert!(resp.error_msg.is_empty());
    assert!(!resp.time.is_empty());
    assert!(resp.data.contains_key("zones"));

    let rendered = serde_json::to_value(&resp).expect("serialize envelope");
    assert_eq!(rendered["error"], json!(false));
    assert!(rendered.get("time").is_some());
    assert!(rendered.get("zones").is_some());
}

#[tokio::test]
async fn test_unknown_command_is_logical_failure() {
    let state = test_state().await;
    let resp = api::zone::handle(&state, json!({"command": "frobnicate"})).await;
    assert!(resp.error);
    assert!(resp.error_msg.contains("frobnicate"));

    let resp = api::zone::handle(&state, json!({"no_command": true})).await;
    assert!(resp.error);
}

#[tokio::test]
async fn test_zone_defaults_to_central_signing() {
    let state = test_state().await;

    let resp = api::zone::handle(
        &state,
        json!({"command": "add", "zone": "example.com."}),
    )
    .await;
    assert!(!resp.error, "{}", resp.error_msg);

    let resp = api::zone::handle(&state, json!({"command": "get", "zone": "example.com."})).await;
    assert!(!resp.error);
    assert_eq!(data_str(&resp, "signing_mode"), "central");
}

#[tokio::test]
async fn test_reparenting_zone_changes_signing_mode() {
    let state = test_state().await;
    api::zone::handle(&state, json!({"command": "add", "zone": "example.com."})).await;

    let resp = api::config_cmd::handle(
        &state,
        json!({"command": "add-service", "service": "svc1"}),
    )
    .await;
    assert!(!resp.error, "{}", resp.error_msg);

    let resp = api::config_cmd::handle(
        &state,
        json!({
            "command": "add-service-component",
            "service": "svc1",
            "component": "sign_edge_zsk",
        }),
    )
    .await;
    assert!(!resp.error, "{}", resp.error_msg);

    let resp = api::zone::handle(
        &state,
        json!({"command": "update", "zone": "example.com.", "service": "svc1"}),
    )
    .await;
    assert!(!resp.error, "{}", resp.error_msg);

    let resp = api::debug::handle(
        &state,
        json!({"command": "signing-mode", "zone": "example.com."}),
    )
    .await;
    assert!(!resp.error);
    assert_eq!(data_str(&resp, "signing_mode"), "edge_zsk");
}

#[tokio::test]
async fn test_generate_key_and_transitions() {
    let state = test_state().await;
    api::zone::handle(&state, json!({"command": "add", "zone": "example.com."})).await;

    let resp = api::zone::handle(
        &state,
        json!({"command": "generate-key", "zone": "example.com.", "keytype": "ZSK"}),
    )
    .await;
    assert!(!resp.error, "{}", resp.error_msg);
    let key = resp.data.get("key").expect("key in response");
    assert_eq!(key["state"], json!("created"));
    assert!(key.get("private_key").is_none());
    let keyid = key["id"].as_str().expect("key id").to_string();

    // Fixed rule: created -> published.
    let resp = api::zone::handle(
        &state,
        json!({"command": "transition", "zone": "example.com.", "keyid": keyid.clone()}),
    )
    .await;
    assert!(!resp.error, "{}", resp.error_msg);
    assert_eq!(data_str(&resp, "state"), "published");

    // No fixed rule from published; setstate walks to standby instead.
    let resp = api::zone::handle(
        &state,
        json!({"command": "transition", "zone": "example.com.", "keyid": keyid.clone()}),
    )
    .await;
    assert!(resp.error);

    let resp = api::zone::handle(
        &state,
        json!({
            "command": "setstate",
            "zone": "example.com.",
            "keyid": keyid.clone(),
            "state": "standby",
        }),
    )
    .await;
    assert!(!resp.error, "{}", resp.error_msg);

    // And an illegal jump is refused with validation intact.
    let resp = api::zone::handle(
        &state,
        json!({
            "command": "setstate",
            "zone": "example.com.",
            "keyid": keyid.clone(),
            "state": "edge_signer",
        }),
    )
    .await;
    assert!(resp.error);
}

#[tokio::test]
async fn test_generate_key_rejects_unknown_algorithm() {
    let state = test_state().await;
    api::zone::handle(&state, json!({"command": "add", "zone": "example.com."})).await;
    let resp = api::zone::handle(
        &state,
        json!({"command": "generate-key", "zone": "example.com.", "algorithm": 8}),
    )
    .await;
    assert!(resp.error);
}

#[tokio::test]
async fn test_key_hash_and_encrypt_key() {
    let state = test_state().await;
    api::zone::handle(&state, json!({"command": "add", "zone": "example.com."})).await;
    let resp = api::zone::handle(
        &state,
        json!({"command": "generate-key", "zone": "example.com."}),
    )
    .await;
    let keyid = resp.data["key"]["id"].as_str().expect("key id").to_string();

    let resp = api::zone::handle(
        &state,
        json!({"command": "hash", "zone": "example.com.", "keyid": keyid.clone()}),
    )
    .await;
    assert!(!resp.error, "{}", resp.error_msg);
    let digest = data_str(&resp, "hash");
    assert_eq!(digest.len(), 64);

    let (node_secret, node_public) = keymaster::crypto::generate_keypair();
    let resp = api::zone::handle(
        &state,
        json!({
            "command": "encrypt-key",
            "zone": "example.com.",
            "keyid": keyid.clone(),
            "recipient": BASE64.encode(node_public),
        }),
    )
    .await;
    assert!(!resp.error, "{}", resp.error_msg);
    let container = BASE64
        .decode(data_str(&resp, "package"))
        .expect("package base64");
    let opened = keymaster::crypto::open(&node_secret, &container).expect("open");

    let key = state
        .storage
        .get_key("example.com.", &keyid)
        .await
        .expect("key");
    assert_eq!(opened, key.private_key);
}

#[tokio::test]
async fn test_node_commands() {
    let state = test_state().await;

    let resp = api::node::handle(
        &state,
        json!({
            "command": "add",
            "node": "edge1.example.net.",
            "pubkey": BASE64.encode([5u8; 32]),
            "notify_addr": "192.0.2.10:5399",
        }),
    )
    .await;
    assert!(!resp.error, "{}", resp.error_msg);

    let resp = api::node::handle(
        &state,
        json!({"command": "add", "node": "edge2.example.net.", "pubkey": "not base64!"}),
    )
    .await;
    assert!(resp.error);

    let resp = api::node::handle(
        &state,
        json!({"command": "set-state", "node": "edge1.example.net.", "state": "compromised"}),
    )
    .await;
    assert!(!resp.error, "{}", resp.error_msg);

    let resp = api::node::handle(&state, json!({"command": "list"})).await;
    assert!(!resp.error);
    assert_eq!(resp.data["nodes"].as_array().map(|a| a.len()), Some(1));
}

#[tokio::test]
async fn test_add_node_component_distributes_new_zones() {
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

    let generated =
        keymaster::keys::generate_key("example.com.", KeyType::Zsk, 15).expect("generate");
    let key = storage
        .add_key("example.com.", KeyType::Zsk, &generated)
        .await
        .expect("store");
    storage
        .set_key_state(&key.id, KeyState::Published)
        .await
        .expect("publish");
    storage
        .set_key_state(&key.id, KeyState::Standby)
        .await
        .expect("standby");

    let (_, node_public) = keymaster::crypto::generate_keypair();
    api::node::handle(
        &state,
        json!({
            "command": "add",
            "node": "edge1.example.net.",
            "pubkey": BASE64.encode(node_public),
        }),
    )
    .await;

    let resp = api::config_cmd::handle(
        &state,
        json!({
            "command": "add-node-component",
            "node": "edge1.example.net.",
            "component": "sign_edge_zsk",
        }),
    )
    .await;
    assert!(!resp.error, "{}", resp.error_msg);
    assert_eq!(resp.data["new_zones"], json!(["example.com."]));
    assert_eq!(resp.data["distributions"][0]["ok"], json!(true));

    let key = storage
        .get_key("example.com.", &key.id)
        .await
        .expect("key");
    assert_eq!(key.state, KeyState::Distributed);
}

#[tokio::test]
async fn test_remove_node_component_reports_lost_zones() {
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
    storage
        .add_node("edge1.example.net.", None, &[3u8; 32], None)
        .await
        .expect("node");
    storage
        .add_node_component("edge1.example.net.", "sign_edge_zsk")
        .await
        .expect("assign");

    let resp = api::config_cmd::handle(
        &state,
        json!({
            "command": "remove-node-component",
            "node": "edge1.example.net.",
            "component": "sign_edge_zsk",
        }),
    )
    .await;
    assert!(!resp.error, "{}", resp.error_msg);
    assert_eq!(resp.data["lost_zones"], json!(["example.com."]));
}

#[tokio::test]
async fn test_distrib_commands() {
    let state = test_state().await;
    let resp = api::distrib::handle(&state, json!({"command": "list"})).await;
    assert!(resp.error); // needs a dist_id or a zone

    let resp = api::distrib::handle(&state, json!({"command": "observe"})).await;
    assert!(!resp.error, "{}", resp.error_msg);

    let resp = api::distrib::handle(&state, json!({"command": "purge"})).await;
    assert!(!resp.error, "{}", resp.error_msg);
    assert_eq!(resp.data["purged"], json!(0));
}

#[tokio::test]
async fn test_config_show_hides_secrets() {
    let state = test_state().await;
    let resp = api::config_cmd::handle(&state, json!({"command": "show"})).await;
    assert!(!resp.error);
    assert_eq!(
        resp.data["control_zone"],
        json!(state.config.kdc.control_zone)
    );
    assert!(!resp.data.contains_key("api_token"));
}
