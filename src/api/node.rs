use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::Value;

use crate::error::KdcError;
use crate::storage::NodeState;

use super::{ApiResponse, AppState, command_of, params, to_json, unknown_command};

#[derive(Deserialize)]
struct NodeRef {
    node: String,
}

#[derive(Deserialize)]
struct AddNode {
    node: String,
    name: Option<String>,
    /// base64 of the node's long-term 32-byte X25519 public key
    pubkey: String,
    notify_addr: Option<String>,
}

#[derive(Deserialize)]
struct UpdateNode {
    node: String,
    name: Option<String>,
    notify_addr: Option<String>,
}

#[derive(Deserialize)]
struct SetNodeState {
    node: String,
    state: String,
}

pub async fn handle(state: &AppState, body: Value) -> ApiResponse {
    let command = match command_of(&body) {
        Ok(command) => command,
        Err(resp) => return resp,
    };
    match command {
        "add" => add(state, body).await,
        "list" => list(state).await,
        "get" => get(state, body).await,
        "update" => update(state, body).await,
        "set-state" => set_state(state, body).await,
        "delete" => delete(state, body).await,
        other => unknown_command("node", other),
    }
}

async fn add(state: &AppState, body: Value) -> ApiResponse {
    let p: AddNode = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let public_key = match BASE64.decode(&p.pubkey) {
        Ok(bytes) => bytes,
        Err(e) => return KdcError::ValidationError(format!("bad pubkey base64: {}", e)).into(),
    };
    match state
        .storage
        .add_node(
            &p.node,
            p.name.as_deref(),
            &public_key,
            p.notify_addr.as_deref(),
        )
        .await
    {
        Ok(node) => ApiResponse::ok(format!("node {} added", node.id)).with("node", to_json(&node)),
        Err(e) => e.into(),
    }
}

async fn list(state: &AppState) -> ApiResponse {
    match state.storage.list_nodes().await {
        Ok(nodes) => {
            ApiResponse::ok(format!("{} nodes", nodes.len())).with("nodes", to_json(&nodes))
        }
        Err(e) => e.into(),
    }
}

async fn get(state: &AppState, body: Value) -> ApiResponse {
    let p: NodeRef = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let node = match state.storage.get_node(&p.node).await {
        Ok(node) => node,
        Err(e) => return e.into(),
    };
    let components = match state.storage.list_node_components(&p.node).await {
        Ok(components) => components,
        Err(e) => return e.into(),
    };
    ApiResponse::ok(format!("node {}", node.id))
        .with("node", to_json(&node))
        .with("components", to_json(&components))
}

async fn update(state: &AppState, body: Value) -> ApiResponse {
    let p: UpdateNode = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state
        .storage
        .update_node(&p.node, p.name.as_deref(), p.notify_addr.as_deref())
        .await
    {
        Ok(node) => {
            ApiResponse::ok(format!("node {} updated", node.id)).with("node", to_json(&node))
        }
        Err(e) => e.into(),
    }
}

async fn set_state(state: &AppState, body: Value) -> ApiResponse {
    let p: SetNodeState = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let node_state = match NodeState::parse(&p.state) {
        Ok(node_state) => node_state,
        Err(e) => return e.into(),
    };
    match state.storage.set_node_state(&p.node, node_state).await {
        Ok(node) => ApiResponse::ok(format!(
            "node {} is now {}",
            node.id,
            node_state.as_str()
        ))
        .with("node", to_json(&node)),
        Err(e) => e.into(),
    }
}

async fn delete(state: &AppState, body: Value) -> ApiResponse {
    let p: NodeRef = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state.storage.delete_node(&p.node).await {
        Ok(()) => ApiResponse::ok(format!("node {} deleted", p.node)),
        Err(e) => e.into(),
    }
}
