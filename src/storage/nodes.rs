use sqlx::Row;

use crate::error::{KdcError, Result};

use super::{Storage, is_unique_violation, now_ts, storage_err};

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Online,
    Offline,
    Compromised,
    Suspended,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Online => "online",
            NodeState::Offline => "offline",
            NodeState::Compromised => "compromised",
            NodeState::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "online" => Ok(NodeState::Online),
            "offline" => Ok(NodeState::Offline),
            "compromised" => Ok(NodeState::Compromised),
            "suspended" => Ok(NodeState::Suspended),
            _ => Err(KdcError::ValidationError(format!(
                "unknown node state: {}",
                s
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Node {
    pub id: String,
    pub name: Option<String>,
    /// Long-term X25519 public key, hex-encoded in storage
    pub public_key: Vec<u8>,
    pub notify_addr: Option<String>,
    pub state: NodeState,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct NodeComponent {
    pub node_id: String,
    pub component_id: String,
    pub active: bool,
    pub since: i64,
}

fn node_from_row(row: &sqlx::any::AnyRow) -> Result<Node> {
    let state_str: String = row
        .try_get("state")
        .map_err(|e| storage_err("decode node", e))?;
    let key_hex: String = row
        .try_get("public_key")
        .map_err(|e| storage_err("decode node", e))?;
    let public_key = hex::decode(&key_hex)
        .map_err(|e| KdcError::Storage(format!("corrupt node public key: {}", e)))?;
    Ok(Node {
        id: row.try_get("id").map_err(|e| storage_err("decode node", e))?,
        name: row
            .try_get("name")
            .map_err(|e| storage_err("decode node", e))?,
        public_key,
        notify_addr: row
            .try_get("notify_addr")
            .map_err(|e| storage_err("decode node", e))?,
        state: NodeState::parse(&state_str)?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| storage_err("decode node", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| storage_err("decode node", e))?,
    })
}

/// Node identifiers are FQDNs but legacy rows may lack the trailing dot;
/// lookups accept both forms.
fn id_forms(id: &str) -> (String, String) {
    let bare = id.trim_end_matches('.').to_string();
    (format!("{}.", bare), bare)
}

impl Storage {
    pub async fn add_node(
        &self,
        id: &str,
        name: Option<&str>,
        public_key: &[u8],
        notify_addr: Option<&str>,
    ) -> Result<Node> {
        if id.trim_end_matches('.').is_empty() {
            return Err(KdcError::ValidationError("node id is empty".to_string()));
        }
        if public_key.len() != 32 {
            return Err(KdcError::InvalidPublicKeyLength(public_key.len()));
        }
        let key_hex = hex::encode(public_key);
        let now = now_ts();
        let res = sqlx::query(
            "INSERT INTO nodes (id, name, public_key, notify_addr, state, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(&key_hex)
        .bind(notify_addr)
        .bind(NodeState::Online.as_str())
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await;
        match res {
            Ok(_) => self.get_node(id).await,
            Err(e) if is_unique_violation(&e) => Err(KdcError::DuplicateNodeKey(key_hex)),
            Err(e) => Err(storage_err("insert node", e)),
        }
    }

    pub async fn get_node(&self, id: &str) -> Result<Node> {
        let (fqdn, bare) = id_forms(id);
        let row = sqlx::query("SELECT * FROM nodes WHERE id = ? OR id = ?")
            .bind(&fqdn)
            .bind(&bare)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| storage_err("select node", e))?;
        match row {
            Some(row) => node_from_row(&row),
            None => Err(KdcError::NodeNotFound(id.to_string())),
        }
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        let rows = sqlx::query("SELECT * FROM nodes ORDER BY id")
            .fetch_all(self.pool())
            .await
            .map_err(|e| storage_err("list nodes", e))?;
        rows.iter().map(node_from_row).collect()
    }

    pub async fn update_node(
        &self,
        id: &str,
        name: Option<&str>,
        notify_addr: Option<&str>,
    ) -> Result<Node> {
        let node = self.get_node(id).await?;
        let new_name = name.map(|n| n.to_string()).or(node.name.clone());
        let new_notify = notify_addr.map(|n| n.to_string()).or(node.notify_addr.clone());
        sqlx::query("UPDATE nodes SET name = ?, notify_addr = ?, updated_at = ? WHERE id = ?")
            .bind(&new_name)
            .bind(&new_notify)
            .bind(now_ts())
            .bind(&node.id)
            .execute(self.pool())
            .await
            .map_err(|e| storage_err("update node", e))?;
        self.get_node(id).await
    }

    pub async fn set_node_state(&self, id: &str, state: NodeState) -> Result<Node> {
        let node = self.get_node(id).await?;
        sqlx::query("UPDATE nodes SET state = ?, updated_at = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(now_ts())
            .bind(&node.id)
            .execute(self.pool())
            .await
            .map_err(|e| storage_err("set node state", e))?;
        self.get_node(id).await
    }

    /// Delete a node; its component assignments, distribution records and
    /// confirmations cascade away.
    pub async fn delete_node(&self, id: &str) -> Result<()> {
        let node = self.get_node(id).await?;
        sqlx::query("DELETE FROM nodes WHERE id = ?")
            .bind(&node.id)
            .execute(self.pool())
            .await
            .map_err(|e| storage_err("delete node", e))?;
        Ok(())
    }

    /// Find the node whose notify address names the given host.
    pub async fn node_by_notify_host(&self, host: &str) -> Result<Option<Node>> {
        for node in self.list_nodes().await? {
            if let Some(addr) = &node.notify_addr {
                let node_host = addr.rsplit_once(':').map(|(h, _)| h).unwrap_or(addr);
                if node_host == host {
                    return Ok(Some(node));
                }
            }
        }
        Ok(None)
    }

    pub async fn add_node_component(&self, node_id: &str, component_id: &str) -> Result<()> {
        let node = self.get_node(node_id).await?;
        self.get_component(component_id).await?;
        let res = sqlx::query(
            "INSERT INTO node_components (node_id, component_id, active, since) \
             VALUES (?, ?, 1, ?)",
        )
        .bind(&node.id)
        .bind(component_id)
        .bind(now_ts())
        .execute(self.pool())
        .await;
        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(KdcError::Conflict(format!(
                "component {} already assigned to node {}",
                component_id, node.id
            ))),
            Err(e) => Err(storage_err("insert node component", e)),
        }
    }

    pub async fn remove_node_component(&self, node_id: &str, component_id: &str) -> Result<()> {
        let node = self.get_node(node_id).await?;
        let res = sqlx::query(
            "DELETE FROM node_components WHERE node_id = ? AND component_id = ?",
        )
        .bind(&node.id)
        .bind(component_id)
        .execute(self.pool())
        .await
        .map_err(|e| storage_err("delete node component", e))?;
        if res.rows_affected() == 0 {
            return Err(KdcError::ComponentNotFound(format!(
                "{} on node {}",
                component_id, node.id
            )));
        }
        Ok(())
    }

    pub async fn list_node_components(&self, node_id: &str) -> Result<Vec<NodeComponent>> {
        let node = self.get_node(node_id).await?;
        let rows = sqlx::query(
            "SELECT node_id, component_id, active, since FROM node_components \
             WHERE node_id = ? ORDER BY component_id",
        )
        .bind(&node.id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| storage_err("list node components", e))?;
        rows.iter()
            .map(|row| {
                Ok(NodeComponent {
                    node_id: row
                        .try_get("node_id")
                        .map_err(|e| storage_err("decode node component", e))?,
                    component_id: row
                        .try_get("component_id")
                        .map_err(|e| storage_err("decode node component", e))?,
                    active: row
                        .try_get::<i64, _>("active")
                        .map_err(|e| storage_err("decode node component", e))?
                        != 0,
                    since: row
                        .try_get("since")
                        .map_err(|e| storage_err("decode node component", e))?,
                })
            })
            .collect()
    }
}
