use serde::Deserialize;
use serde_json::{Value, json};

use crate::topology;

use super::{ApiResponse, AppState, command_of, params, to_json, unknown_command};

#[derive(Deserialize)]
struct ZoneRef {
    zone: String,
}

#[derive(Deserialize)]
struct NodeRef {
    node: String,
}

pub async fn handle(state: &AppState, body: Value) -> ApiResponse {
    let command = match command_of(&body) {
        Ok(command) => command,
        Err(resp) => return resp,
    };
    match command {
        "signing-mode" => signing_mode(state, body).await,
        "zone-nodes" => zone_nodes(state, body).await,
        "node-zones" => node_zones(state, body).await,
        "blast-zone" => blast_zone(state, body).await,
        other => unknown_command("debug", other),
    }
}

async fn signing_mode(state: &AppState, body: Value) -> ApiResponse {
    let p: ZoneRef = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state.storage.zone_signing_mode(&p.zone).await {
        Ok(mode) => ApiResponse::ok(format!("zone {} signs {}", p.zone, mode.as_str()))
            .with("signing_mode", json!(mode.as_str())),
        Err(e) => e.into(),
    }
}

async fn zone_nodes(state: &AppState, body: Value) -> ApiResponse {
    let p: ZoneRef = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match topology::nodes_serving_zone(&state.storage, &p.zone).await {
        Ok(nodes) => {
            ApiResponse::ok(format!("{} nodes serve {}", nodes.len(), p.zone))
                .with("nodes", json!(nodes))
        }
        Err(e) => e.into(),
    }
}

async fn node_zones(state: &AppState, body: Value) -> ApiResponse {
    let p: NodeRef = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match topology::zones_served_by_node(&state.storage, &p.node).await {
        Ok(zones) => {
            ApiResponse::ok(format!("node {} serves {} zones", p.node, zones.len()))
                .with("zones", json!(zones))
        }
        Err(e) => e.into(),
    }
}

/// What breaks if this node is compromised.
async fn blast_zone(state: &AppState, body: Value) -> ApiResponse {
    let p: NodeRef = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match topology::blast_zone(&state.storage, &p.node).await {
        Ok(blast) => ApiResponse::ok(format!(
            "{} zones need ZSK rollover, {} also KSK",
            blast.zsk_rollover.len(),
            blast.ksk_rollover.len()
        ))
        .with("blast_zone", to_json(&blast)),
        Err(e) => e.into(),
    }
}
