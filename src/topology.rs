//! Pure queries over the zone -> service -> component -> node graph.
//! Stateless; every answer is a function of current storage contents.
//! Results come back in storage-natural order; callers sort when they
//! need determinism.

use crate::error::Result;
use crate::storage::{DEFAULT_SERVICE, Storage};

/// Zones whose keys must roll when a node is compromised, split by how
/// much has to roll.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct BlastZone {
    /// Zones needing a ZSK rollover (every edge-signed zone)
    pub zsk_rollover: Vec<String>,
    /// Zones additionally needing a KSK rollover (full edge signing)
    pub ksk_rollover: Vec<String>,
}

/// All active, online nodes that serve a zone through its service's
/// components.
pub async fn nodes_serving_zone(storage: &Storage, zone: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT DISTINCT n.id FROM zones z \
         JOIN service_components sc ON sc.service_id = COALESCE(z.service_id, ?) \
         JOIN components c ON c.id = sc.component_id AND c.active = 1 \
         JOIN node_components nc ON nc.component_id = c.id AND nc.active = 1 \
         JOIN nodes n ON n.id = nc.node_id AND n.state = 'online' \
         WHERE z.name = ?",
    )
    .bind(DEFAULT_SERVICE)
    .bind(zone)
    .fetch_all(storage.pool())
    .await
    .map_err(|e| crate::storage::storage_err("nodes serving zone", e))?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// The symmetric join: every zone a node serves through its components.
pub async fn zones_served_by_node(storage: &Storage, node_id: &str) -> Result<Vec<String>> {
    let node = storage.get_node(node_id).await?;
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT DISTINCT z.name FROM zones z \
         JOIN service_components sc ON sc.service_id = COALESCE(z.service_id, ?) \
         JOIN components c ON c.id = sc.component_id AND c.active = 1 \
         JOIN node_components nc ON nc.component_id = c.id AND nc.active = 1 \
         WHERE nc.node_id = ?",
    )
    .bind(DEFAULT_SERVICE)
    .bind(&node.id)
    .fetch_all(storage.pool())
    .await
    .map_err(|e| crate::storage::storage_err("zones served by node", e))?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Zones the node would start serving by taking on `component_id`:
/// zones whose service contains the component and where the node has no
/// other active component of the same service yet. Evaluate before adding
/// the assignment.
pub async fn zones_newly_served(
    storage: &Storage,
    node_id: &str,
    component_id: &str,
) -> Result<Vec<String>> {
    let node = storage.get_node(node_id).await?;
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT z.name FROM zones z \
         JOIN service_components sc \
           ON sc.service_id = COALESCE(z.service_id, ?) AND sc.component_id = ? \
         WHERE NOT EXISTS ( \
             SELECT 1 FROM node_components nc \
             JOIN service_components sc2 ON sc2.component_id = nc.component_id \
             WHERE nc.node_id = ? AND nc.active = 1 \
               AND sc2.service_id = COALESCE(z.service_id, ?) \
               AND nc.component_id <> ? \
         )",
    )
    .bind(DEFAULT_SERVICE)
    .bind(component_id)
    .bind(&node.id)
    .bind(DEFAULT_SERVICE)
    .bind(component_id)
    .fetch_all(storage.pool())
    .await
    .map_err(|e| crate::storage::storage_err("zones newly served", e))?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Zones the node would stop serving by dropping `component_id`: the
/// zone's service contains the component, the node holds it, and no other
/// active component of the node covers the same service. Evaluate before
/// removing the assignment.
pub async fn zones_no_longer_served(
    storage: &Storage,
    node_id: &str,
    component_id: &str,
) -> Result<Vec<String>> {
    let node = storage.get_node(node_id).await?;
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT z.name FROM zones z \
         JOIN service_components sc \
           ON sc.service_id = COALESCE(z.service_id, ?) AND sc.component_id = ? \
         WHERE EXISTS ( \
             SELECT 1 FROM node_components nc0 \
             WHERE nc0.node_id = ? AND nc0.component_id = ? AND nc0.active = 1 \
         ) \
         AND NOT EXISTS ( \
             SELECT 1 FROM node_components nc \
             JOIN service_components sc2 ON sc2.component_id = nc.component_id \
             WHERE nc.node_id = ? AND nc.active = 1 \
               AND sc2.service_id = COALESCE(z.service_id, ?) \
               AND nc.component_id <> ? \
         )",
    )
    .bind(DEFAULT_SERVICE)
    .bind(component_id)
    .bind(&node.id)
    .bind(component_id)
    .bind(&node.id)
    .bind(DEFAULT_SERVICE)
    .bind(component_id)
    .fetch_all(storage.pool())
    .await
    .map_err(|e| crate::storage::storage_err("zones no longer served", e))?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Every edge-signed zone a compromised node can hurt. Zones in full edge
/// mode land in both sets: their KSK lives on the node too.
pub async fn blast_zone(storage: &Storage, node_id: &str) -> Result<BlastZone> {
    let zones = zones_served_by_node(storage, node_id).await?;
    let mut blast = BlastZone::default();
    for zone in zones {
        let mode = storage.zone_signing_mode(&zone).await?;
        if !mode.allows_distribution() {
            continue;
        }
        blast.zsk_rollover.push(zone.clone());
        if mode.compromise_rolls_ksk() {
            blast.ksk_rollover.push(zone);
        }
    }
    Ok(blast)
}
