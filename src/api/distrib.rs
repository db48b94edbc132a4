use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::KdcError;

use super::{ApiResponse, AppState, command_of, params, to_json, unknown_command};

#[derive(Deserialize)]
struct ListParams {
    dist_id: Option<String>,
    zone: Option<String>,
}

#[derive(Deserialize)]
struct DistRef {
    dist_id: String,
}

#[derive(Deserialize)]
struct GcParams {
    /// Age threshold in seconds; completed records older than this go
    older_than_secs: Option<i64>,
}

pub async fn handle(state: &AppState, body: Value) -> ApiResponse {
    let command = match command_of(&body) {
        Ok(command) => command,
        Err(resp) => return resp,
    };
    match command {
        "list" => list(state, body).await,
        "confirmations" => confirmations(state, body).await,
        "observe" => observe(state).await,
        "purge" => purge(state).await,
        "gc" => gc(state, body).await,
        other => unknown_command("distrib", other),
    }
}

async fn list(state: &AppState, body: Value) -> ApiResponse {
    let p: ListParams = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let records = match (&p.dist_id, &p.zone) {
        (Some(dist_id), _) => state.storage.list_distributions(dist_id).await,
        (None, Some(zone)) => state.storage.list_distributions_for_zone(zone).await,
        (None, None) => {
            return KdcError::ValidationError(
                "list needs a dist_id or a zone".to_string(),
            )
            .into();
        }
    };
    match records {
        Ok(records) => ApiResponse::ok(format!("{} distribution records", records.len()))
            .with("distributions", to_json(&records)),
        Err(e) => e.into(),
    }
}

async fn confirmations(state: &AppState, body: Value) -> ApiResponse {
    let p: DistRef = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let confirmations = match state.storage.list_confirmations(&p.dist_id).await {
        Ok(confirmations) => confirmations,
        Err(e) => return e.into(),
    };
    let targets = match state.storage.distribution_targets(&p.dist_id).await {
        Ok(targets) => targets,
        Err(e) => return e.into(),
    };
    ApiResponse::ok(format!(
        "{} of {} targets confirmed",
        confirmations.len(),
        targets.len()
    ))
    .with("confirmations", to_json(&confirmations))
    .with("targets", json!(targets))
}

/// Run a completion pass over every key waiting on confirmations.
async fn observe(state: &AppState) -> ApiResponse {
    match state.engine.observation_pass().await {
        Ok(()) => ApiResponse::ok("observation pass complete"),
        Err(e) => e.into(),
    }
}

async fn purge(state: &AppState) -> ApiResponse {
    match state.engine.purge_completed().await {
        Ok(count) => {
            ApiResponse::ok(format!("{} distributions purged", count)).with("purged", json!(count))
        }
        Err(e) => e.into(),
    }
}

async fn gc(state: &AppState, body: Value) -> ApiResponse {
    let p: GcParams = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let age = p
        .older_than_secs
        .unwrap_or_else(|| state.config.kdc.distribution_ttl.as_secs() as i64);
    let cutoff = chrono::Utc::now().timestamp() - age;
    match state.engine.gc_completed(cutoff).await {
        Ok(count) => ApiResponse::ok(format!("{} distributions collected", count))
            .with("collected", json!(count)),
        Err(e) => e.into(),
    }
}
