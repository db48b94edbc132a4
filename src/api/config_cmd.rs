//! Service, component and assignment administration plus the effective
//! configuration report.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::topology;

use super::{ApiResponse, AppState, command_of, params, to_json, unknown_command};

#[derive(Deserialize)]
struct ServiceRef {
    service: String,
}

#[derive(Deserialize)]
struct AddService {
    service: String,
    name: Option<String>,
}

#[derive(Deserialize)]
struct ServiceComponent {
    service: String,
    component: String,
}

#[derive(Deserialize)]
struct NodeComponentRef {
    node: String,
    component: String,
}

pub async fn handle(state: &AppState, body: Value) -> ApiResponse {
    let command = match command_of(&body) {
        Ok(command) => command,
        Err(resp) => return resp,
    };
    match command {
        "show" => show(state).await,
        "add-service" => add_service(state, body).await,
        "list-services" => list_services(state).await,
        "get-service" => get_service(state, body).await,
        "delete-service" => delete_service(state, body).await,
        "list-components" => list_components(state).await,
        "add-service-component" => add_service_component(state, body).await,
        "remove-service-component" => remove_service_component(state, body).await,
        "replace-service-component" => replace_service_component(state, body).await,
        "add-node-component" => add_node_component(state, body).await,
        "remove-node-component" => remove_node_component(state, body).await,
        other => unknown_command("config", other),
    }
}

/// Effective configuration, minus secrets.
async fn show(state: &AppState) -> ApiResponse {
    let kdc = &state.config.kdc;
    ApiResponse::ok("effective configuration")
        .with("control_zone", json!(kdc.control_zone))
        .with("default_algorithm", json!(kdc.default_algorithm))
        .with("standby_key_count", json!(kdc.standby_key_count))
        .with("publish_time_secs", json!(kdc.publish_time.as_secs()))
        .with("retire_time_secs", json!(kdc.retire_time.as_secs()))
        .with(
            "distribution_ttl_secs",
            json!(kdc.distribution_ttl.as_secs()),
        )
        .with("jsonchunk_max_size", json!(kdc.jsonchunk_max_size))
        .with("database_type", json!(state.config.database.db_type))
}

async fn add_service(state: &AppState, body: Value) -> ApiResponse {
    let p: AddService = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let name = p.name.unwrap_or_else(|| p.service.clone());
    match state.storage.add_service(&p.service, &name).await {
        Ok(service) => ApiResponse::ok(format!("service {} added", service.id))
            .with("service", to_json(&service)),
        Err(e) => e.into(),
    }
}

async fn list_services(state: &AppState) -> ApiResponse {
    match state.storage.list_services().await {
        Ok(services) => ApiResponse::ok(format!("{} services", services.len()))
            .with("services", to_json(&services)),
        Err(e) => e.into(),
    }
}

async fn get_service(state: &AppState, body: Value) -> ApiResponse {
    let p: ServiceRef = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let service = match state.storage.get_service(&p.service).await {
        Ok(service) => service,
        Err(e) => return e.into(),
    };
    let components = match state.storage.list_service_components(&p.service).await {
        Ok(components) => components,
        Err(e) => return e.into(),
    };
    let zones = match state.storage.list_zones_for_service(&p.service).await {
        Ok(zones) => zones,
        Err(e) => return e.into(),
    };
    ApiResponse::ok(format!("service {}", service.id))
        .with("service", to_json(&service))
        .with("components", to_json(&components))
        .with("zones", to_json(&zones))
}

async fn delete_service(state: &AppState, body: Value) -> ApiResponse {
    let p: ServiceRef = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state.storage.delete_service(&p.service).await {
        Ok(()) => ApiResponse::ok(format!("service {} deleted", p.service)),
        Err(e) => e.into(),
    }
}

async fn list_components(state: &AppState) -> ApiResponse {
    match state.storage.list_components().await {
        Ok(components) => ApiResponse::ok(format!("{} components", components.len()))
            .with("components", to_json(&components)),
        Err(e) => e.into(),
    }
}

async fn add_service_component(state: &AppState, body: Value) -> ApiResponse {
    let p: ServiceComponent = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state
        .storage
        .add_service_component(&p.service, &p.component)
        .await
    {
        Ok(()) => ApiResponse::ok(format!(
            "component {} assigned to service {}",
            p.component, p.service
        )),
        Err(e) => e.into(),
    }
}

async fn remove_service_component(state: &AppState, body: Value) -> ApiResponse {
    let p: ServiceComponent = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state
        .storage
        .remove_service_component(&p.service, &p.component)
        .await
    {
        Ok(()) => ApiResponse::ok(format!(
            "component {} removed from service {}",
            p.component, p.service
        )),
        Err(e) => e.into(),
    }
}

async fn replace_service_component(state: &AppState, body: Value) -> ApiResponse {
    let p: ServiceComponent = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state
        .storage
        .replace_signing_component(&p.service, &p.component)
        .await
    {
        Ok(()) => ApiResponse::ok(format!(
            "service {} signing component is now {}",
            p.service, p.component
        )),
        Err(e) => e.into(),
    }
}

/// Assign a component to a node; every zone the node starts serving gets
/// its standby ZSK distributed.
async fn add_node_component(state: &AppState, body: Value) -> ApiResponse {
    let p: NodeComponentRef = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    // Delta computed before the edge exists.
    let new_zones = match topology::zones_newly_served(&state.storage, &p.node, &p.component).await
    {
        Ok(zones) => zones,
        Err(e) => return e.into(),
    };

    if let Err(e) = state.storage.add_node_component(&p.node, &p.component).await {
        return e.into();
    }
    info!(
        "node {} took component {}, now serving {} new zones",
        p.node,
        p.component,
        new_zones.len()
    );

    let mut distributions = Vec::new();
    for zone in &new_zones {
        match state.engine.distribute_standby_zsk(zone).await {
            Ok(result) => distributions.push(json!({
                "zone": zone,
                "ok": true,
                "dist_id": result.dist_id,
            })),
            Err(e) => {
                warn!("distribution for newly served zone {} failed: {}", zone, e);
                distributions.push(json!({
                    "zone": zone,
                    "ok": false,
                    "error": e.to_string(),
                }));
            }
        }
    }

    ApiResponse::ok(format!(
        "component {} assigned to node {}",
        p.component, p.node
    ))
    .with("new_zones", json!(new_zones))
    .with("distributions", json!(distributions))
}

/// Remove a component from a node. Zones no longer served are reported;
/// revoking their keys is a policy decision left to the operator.
async fn remove_node_component(state: &AppState, body: Value) -> ApiResponse {
    let p: NodeComponentRef = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let lost_zones =
        match topology::zones_no_longer_served(&state.storage, &p.node, &p.component).await {
            Ok(zones) => zones,
            Err(e) => return e.into(),
        };

    if let Err(e) = state
        .storage
        .remove_node_component(&p.node, &p.component)
        .await
    {
        return e.into();
    }
    if !lost_zones.is_empty() {
        info!(
            "node {} dropped component {}, no longer serving: {}",
            p.node,
            p.component,
            lost_zones.join(", ")
        );
    }

    ApiResponse::ok(format!(
        "component {} removed from node {}",
        p.component, p.node
    ))
    .with("lost_zones", json!(lost_zones))
}
