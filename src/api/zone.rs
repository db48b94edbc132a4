use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::error::KdcError;
use crate::keys::{self, KeyState, KeyType};

use super::{ApiResponse, AppState, command_of, params, to_json, unknown_command};

#[derive(Deserialize)]
struct ZoneRef {
    zone: String,
}

#[derive(Deserialize)]
struct AddZone {
    zone: String,
    service: Option<String>,
    comment: Option<String>,
}

#[derive(Deserialize)]
struct UpdateZone {
    zone: String,
    service: Option<String>,
    active: Option<bool>,
    comment: Option<String>,
}

#[derive(Deserialize)]
struct KeyRef {
    zone: String,
    keyid: String,
}

#[derive(Deserialize)]
struct GenerateKey {
    zone: String,
    keytype: Option<String>,
    algorithm: Option<u8>,
}

#[derive(Deserialize)]
struct EncryptKey {
    zone: String,
    keyid: String,
    /// base64 of the recipient's 32-byte X25519 public key
    recipient: String,
}

#[derive(Deserialize)]
struct SetState {
    zone: String,
    keyid: String,
    state: String,
}

#[derive(Deserialize)]
struct DistributeZsk {
    zone: String,
    keyid: Option<String>,
}

#[derive(Deserialize)]
struct DistribMulti {
    zones: Vec<String>,
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
        "delete" => delete(state, body).await,
        "get-keys" => get_keys(state, body).await,
        "generate-key" => generate_key(state, body).await,
        "delete-key" => delete_key(state, body).await,
        "encrypt-key" => encrypt_key(state, body).await,
        "transition" => transition(state, body).await,
        "setstate" => setstate(state, body).await,
        "distribute-zsk" => distribute_zsk(state, body).await,
        "distrib-multi" => distrib_multi(state, body).await,
        "hash" => hash(state, body).await,
        other => unknown_command("zone", other),
    }
}

async fn add(state: &AppState, body: Value) -> ApiResponse {
    let p: AddZone = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state
        .storage
        .add_zone(&p.zone, p.service.as_deref(), p.comment.as_deref())
        .await
    {
        Ok(zone) => ApiResponse::ok(format!("zone {} added", zone.name)).with("zone", to_json(&zone)),
        Err(e) => e.into(),
    }
}

async fn list(state: &AppState) -> ApiResponse {
    match state.storage.list_zones().await {
        Ok(zones) => ApiResponse::ok(format!("{} zones", zones.len())).with("zones", to_json(&zones)),
        Err(e) => e.into(),
    }
}

async fn get(state: &AppState, body: Value) -> ApiResponse {
    let p: ZoneRef = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let zone = match state.storage.get_zone(&p.zone).await {
        Ok(zone) => zone,
        Err(e) => return e.into(),
    };
    let mode = match state.storage.zone_signing_mode(&p.zone).await {
        Ok(mode) => mode,
        Err(e) => return e.into(),
    };
    ApiResponse::ok(format!("zone {}", zone.name))
        .with("zone", to_json(&zone))
        .with("signing_mode", json!(mode.as_str()))
}

async fn update(state: &AppState, body: Value) -> ApiResponse {
    let p: UpdateZone = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let service_update = p.service.as_deref().map(Some);
    match state
        .storage
        .update_zone(&p.zone, service_update, p.active, p.comment.as_deref())
        .await
    {
        Ok(zone) => {
            ApiResponse::ok(format!("zone {} updated", zone.name)).with("zone", to_json(&zone))
        }
        Err(e) => e.into(),
    }
}

async fn delete(state: &AppState, body: Value) -> ApiResponse {
    let p: ZoneRef = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state.storage.delete_zone(&p.zone).await {
        Ok(()) => ApiResponse::ok(format!("zone {} deleted", p.zone)),
        Err(e) => e.into(),
    }
}

async fn get_keys(state: &AppState, body: Value) -> ApiResponse {
    let p: ZoneRef = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state.storage.list_keys(&p.zone).await {
        Ok(keys) => ApiResponse::ok(format!("{} keys", keys.len())).with("keys", to_json(&keys)),
        Err(e) => e.into(),
    }
}

async fn generate_key(state: &AppState, body: Value) -> ApiResponse {
    let p: GenerateKey = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let key_type = match p.keytype.as_deref() {
        Some(s) => match KeyType::parse(s) {
            Ok(t) => t,
            Err(e) => return e.into(),
        },
        None => KeyType::Zsk,
    };
    let algorithm = p.algorithm.unwrap_or(state.config.kdc.default_algorithm);
    let generated = match keys::generate_key(&p.zone, key_type, algorithm) {
        Ok(g) => g,
        Err(e) => return e.into(),
    };
    match state.storage.add_key(&p.zone, key_type, &generated).await {
        Ok(key) => ApiResponse::ok(format!(
            "generated {} for {} with tag {}",
            key_type.as_str(),
            p.zone,
            key.key_tag
        ))
        .with("key", to_json(&key))
        .with("dnskey", json!(generated.dnskey_rr)),
        Err(e) => e.into(),
    }
}

async fn delete_key(state: &AppState, body: Value) -> ApiResponse {
    let p: KeyRef = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state.storage.delete_key(&p.zone, &p.keyid).await {
        Ok(()) => ApiResponse::ok(format!("key {} deleted", p.keyid)),
        Err(e) => e.into(),
    }
}

/// One-shot test command: seal a key's private bytes for an arbitrary
/// recipient key and return the container.
async fn encrypt_key(state: &AppState, body: Value) -> ApiResponse {
    let p: EncryptKey = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let recipient = match BASE64.decode(&p.recipient) {
        Ok(bytes) => bytes,
        Err(e) => {
            return KdcError::ValidationError(format!("bad recipient key base64: {}", e)).into();
        }
    };
    let key = match state.storage.get_key(&p.zone, &p.keyid).await {
        Ok(key) => key,
        Err(e) => return e.into(),
    };
    match crate::crypto::seal(&recipient, &key.private_key) {
        Ok(sealed) => ApiResponse::ok("key sealed")
            .with("package", json!(BASE64.encode(&sealed.container)))
            .with("ephemeral_key", json!(BASE64.encode(sealed.ephemeral_key))),
        Err(e) => e.into(),
    }
}

/// Advance a key along the fixed path: created -> published,
/// standby -> active.
async fn transition(state: &AppState, body: Value) -> ApiResponse {
    let p: KeyRef = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let key = match state.storage.get_key(&p.zone, &p.keyid).await {
        Ok(key) => key,
        Err(e) => return e.into(),
    };
    let Some(next) = keys::fixed_transition(key.state) else {
        return KdcError::PreconditionFailed(format!(
            "no fixed transition from {}",
            key.state.as_str()
        ))
        .into();
    };
    match state.storage.set_key_state(&key.id, next).await {
        Ok(()) => ApiResponse::ok(format!(
            "key {} moved {} -> {}",
            key.id,
            key.state.as_str(),
            next.as_str()
        ))
        .with("state", json!(next.as_str())),
        Err(e) => e.into(),
    }
}

/// Arbitrary transition with legality validation.
async fn setstate(state: &AppState, body: Value) -> ApiResponse {
    let p: SetState = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let to = match KeyState::parse(&p.state) {
        Ok(to) => to,
        Err(e) => return e.into(),
    };
    let key = match state.storage.get_key(&p.zone, &p.keyid).await {
        Ok(key) => key,
        Err(e) => return e.into(),
    };
    if let Err(e) = keys::check_transition(key.state, to) {
        return e.into();
    }
    let result = if to.is_edge_live() {
        state
            .storage
            .advance_to_live_state(&key.id, &key.zone, key.key_type, key.state, to)
            .await
    } else {
        state.storage.set_key_state(&key.id, to).await
    };
    match result {
        Ok(()) => ApiResponse::ok(format!(
            "key {} moved {} -> {}",
            key.id,
            key.state.as_str(),
            to.as_str()
        ))
        .with("state", json!(to.as_str())),
        Err(e) => e.into(),
    }
}

async fn distribute_zsk(state: &AppState, body: Value) -> ApiResponse {
    let p: DistributeZsk = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let result = match p.keyid {
        Some(keyid) => state.engine.distribute(&p.zone, &keyid).await,
        None => state.engine.distribute_standby_zsk(&p.zone).await,
    };
    match result {
        Ok(result) => ApiResponse::ok(format!("distribution {} started", result.dist_id))
            .with("distribution", to_json(&result)),
        Err(e) => e.into(),
    }
}

async fn distrib_multi(state: &AppState, body: Value) -> ApiResponse {
    let p: DistribMulti = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let results = state.engine.distribute_many(&p.zones).await;
    let rendered: Vec<Value> = results
        .iter()
        .map(|(zone, result)| match result {
            Ok(result) => json!({
                "zone": zone,
                "ok": true,
                "distribution": to_json(result),
            }),
            Err(e) => json!({
                "zone": zone,
                "ok": false,
                "error": e.to_string(),
            }),
        })
        .collect();
    ApiResponse::ok(format!("{} zones processed", rendered.len())).with("results", json!(rendered))
}

/// SHA-256 of the private bytes, for operator-initiated integrity checks.
async fn hash(state: &AppState, body: Value) -> ApiResponse {
    let p: KeyRef = match params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match state.storage.get_key(&p.zone, &p.keyid).await {
        Ok(key) => {
            let digest = Sha256::digest(&key.private_key);
            ApiResponse::ok(format!("key {} hashed", key.id))
                .with("hash", json!(hex::encode(digest)))
        }
        Err(e) => e.into(),
    }
}
