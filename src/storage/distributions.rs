use sqlx::Row;

use crate::error::{KdcError, Result};
use crate::keys::{KeyState, KeyType, check_transition};

use super::{Storage, is_unique_violation, new_id, now_ts, storage_err};

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistStatus {
    Pending,
    Delivered,
    Active,
    Revoked,
    Completed,
}

impl DistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistStatus::Pending => "pending",
            DistStatus::Delivered => "delivered",
            DistStatus::Active => "active",
            DistStatus::Revoked => "revoked",
            DistStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(DistStatus::Pending),
            "delivered" => Ok(DistStatus::Delivered),
            "active" => Ok(DistStatus::Active),
            "revoked" => Ok(DistStatus::Revoked),
            "completed" => Ok(DistStatus::Completed),
            _ => Err(KdcError::Storage(format!(
                "unknown distribution status: {}",
                s
            ))),
        }
    }
}

/// One per-(key, node) distribution attempt.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Distribution {
    pub id: String,
    pub zone: String,
    pub key_id: String,
    pub node_id: String,
    /// HPKE container; opaque
    #[serde(skip_serializing)]
    pub package: Vec<u8>,
    pub ephemeral_key: Vec<u8>,
    pub status: DistStatus,
    pub dist_id: String,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Confirmation {
    pub dist_id: String,
    pub zone: String,
    pub key_id: String,
    pub node_id: String,
    pub confirmed_at: i64,
}

fn distribution_from_row(row: &sqlx::any::AnyRow) -> Result<Distribution> {
    let status_str: String = row
        .try_get("status")
        .map_err(|e| storage_err("decode distribution", e))?;
    let ephemeral_hex: String = row
        .try_get("ephemeral_key")
        .map_err(|e| storage_err("decode distribution", e))?;
    let ephemeral_key = hex::decode(&ephemeral_hex)
        .map_err(|e| KdcError::Storage(format!("corrupt ephemeral key: {}", e)))?;
    Ok(Distribution {
        id: row
            .try_get("id")
            .map_err(|e| storage_err("decode distribution", e))?,
        zone: row
            .try_get("zone")
            .map_err(|e| storage_err("decode distribution", e))?,
        key_id: row
            .try_get("key_id")
            .map_err(|e| storage_err("decode distribution", e))?,
        node_id: row
            .try_get("node_id")
            .map_err(|e| storage_err("decode distribution", e))?,
        package: row
            .try_get("package")
            .map_err(|e| storage_err("decode distribution", e))?,
        ephemeral_key,
        status: DistStatus::parse(&status_str)?,
        dist_id: row
            .try_get("dist_id")
            .map_err(|e| storage_err("decode distribution", e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| storage_err("decode distribution", e))?,
        completed_at: row
            .try_get("completed_at")
            .map_err(|e| storage_err("decode distribution", e))?,
    })
}

fn confirmation_from_row(row: &sqlx::any::AnyRow) -> Result<Confirmation> {
    Ok(Confirmation {
        dist_id: row
            .try_get("dist_id")
            .map_err(|e| storage_err("decode confirmation", e))?,
        zone: row
            .try_get("zone")
            .map_err(|e| storage_err("decode confirmation", e))?,
        key_id: row
            .try_get("key_id")
            .map_err(|e| storage_err("decode confirmation", e))?,
        node_id: row
            .try_get("node_id")
            .map_err(|e| storage_err("decode confirmation", e))?,
        confirmed_at: row
            .try_get("confirmed_at")
            .map_err(|e| storage_err("decode confirmation", e))?,
    })
}

impl Storage {
    /// Insert one pending record per target node in a single transaction.
    /// A record that already exists for (dist_id, node) is left untouched,
    /// making concurrent retries of the same distribution idempotent.
    pub async fn insert_pending_distributions(
        &self,
        zone: &str,
        key_id: &str,
        dist_id: &str,
        packages: &[(String, Vec<u8>, [u8; 32])],
    ) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| storage_err("begin insert distributions", e))?;
        let now = now_ts();
        for (node_id, container, ephemeral_key) in packages {
            let res = sqlx::query(
                "INSERT INTO distributions \
                 (id, zone, key_id, node_id, package, ephemeral_key, status, dist_id, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(new_id("dist"))
            .bind(zone)
            .bind(key_id)
            .bind(node_id)
            .bind(container)
            .bind(hex::encode(ephemeral_key))
            .bind(DistStatus::Pending.as_str())
            .bind(dist_id)
            .bind(now)
            .execute(&mut *tx)
            .await;
            match res {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {}
                Err(e) => return Err(storage_err("insert distribution", e)),
            }
        }
        tx.commit()
            .await
            .map_err(|e| storage_err("commit insert distributions", e))
    }

    pub async fn list_distributions(&self, dist_id: &str) -> Result<Vec<Distribution>> {
        let rows = sqlx::query("SELECT * FROM distributions WHERE dist_id = ? ORDER BY node_id")
            .bind(dist_id)
            .fetch_all(self.pool())
            .await
            .map_err(|e| storage_err("list distributions", e))?;
        rows.iter().map(distribution_from_row).collect()
    }

    pub async fn list_distributions_for_zone(&self, zone: &str) -> Result<Vec<Distribution>> {
        let rows = sqlx::query("SELECT * FROM distributions WHERE zone = ? ORDER BY created_at")
            .bind(zone)
            .fetch_all(self.pool())
            .await
            .map_err(|e| storage_err("list distributions for zone", e))?;
        rows.iter().map(distribution_from_row).collect()
    }

    pub async fn get_distribution(&self, dist_id: &str, node_id: &str) -> Result<Distribution> {
        let row = sqlx::query("SELECT * FROM distributions WHERE dist_id = ? AND node_id = ?")
            .bind(dist_id)
            .bind(node_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| storage_err("select distribution", e))?;
        match row {
            Some(row) => distribution_from_row(&row),
            None => Err(KdcError::DistributionNotFound(format!(
                "{} for node {}",
                dist_id, node_id
            ))),
        }
    }

    /// Distinct nodes targeted by a distribution identifier.
    pub async fn distribution_targets(&self, dist_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT node_id FROM distributions WHERE dist_id = ?",
        )
        .bind(dist_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| storage_err("select distribution targets", e))?;
        Ok(rows.into_iter().map(|(n,)| n).collect())
    }

    pub async fn set_distribution_status(
        &self,
        dist_id: &str,
        node_id: &str,
        status: DistStatus,
    ) -> Result<()> {
        let res = sqlx::query(
            "UPDATE distributions SET status = ? WHERE dist_id = ? AND node_id = ?",
        )
        .bind(status.as_str())
        .bind(dist_id)
        .bind(node_id)
        .execute(self.pool())
        .await
        .map_err(|e| storage_err("update distribution status", e))?;
        if res.rows_affected() == 0 {
            return Err(KdcError::DistributionNotFound(format!(
                "{} for node {}",
                dist_id, node_id
            )));
        }
        Ok(())
    }

    /// Record a node's confirmation. Returns false when the confirmation
    /// was already present (the insert is idempotent).
    pub async fn insert_confirmation(
        &self,
        dist_id: &str,
        zone: &str,
        key_id: &str,
        node_id: &str,
    ) -> Result<bool> {
        let res = sqlx::query(
            "INSERT INTO distribution_confirmations \
             (dist_id, zone, key_id, node_id, confirmed_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(dist_id)
        .bind(zone)
        .bind(key_id)
        .bind(node_id)
        .bind(now_ts())
        .execute(self.pool())
        .await;
        match res {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(storage_err("insert confirmation", e)),
        }
    }

    pub async fn list_confirmations(&self, dist_id: &str) -> Result<Vec<Confirmation>> {
        let rows = sqlx::query(
            "SELECT * FROM distribution_confirmations WHERE dist_id = ? ORDER BY node_id",
        )
        .bind(dist_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| storage_err("list confirmations", e))?;
        rows.iter().map(confirmation_from_row).collect()
    }

    pub async fn confirmed_nodes(&self, dist_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT node_id FROM distribution_confirmations WHERE dist_id = ?",
        )
        .bind(dist_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| storage_err("select confirmed nodes", e))?;
        Ok(rows.into_iter().map(|(n,)| n).collect())
    }

    /// Quorum transaction: move the key to `edge_signer`, retire sibling
    /// keys of the same (zone, type) that were live, and mark every record
    /// of the distribution completed. All or nothing.
    pub async fn complete_distribution(
        &self,
        dist_id: &str,
        key_id: &str,
        zone: &str,
        key_type: KeyType,
        from_state: KeyState,
    ) -> Result<()> {
        check_transition(from_state, KeyState::EdgeSigner)?;

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| storage_err("begin complete distribution", e))?;
        let now = now_ts();

        // Retire previously live siblings first so at most one key per
        // (zone, type) is ever observed live.
        sqlx::query(
            "UPDATE dnssec_keys SET state = ?, retired_at = ? \
             WHERE zone = ? AND key_type = ? AND id <> ? AND state IN (?, ?)",
        )
        .bind(KeyState::Retired.as_str())
        .bind(now)
        .bind(zone)
        .bind(key_type.as_str())
        .bind(key_id)
        .bind(KeyState::EdgeSigner.as_str())
        .bind(KeyState::ActiveDist.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_err("retire sibling keys", e))?;

        let res = sqlx::query("UPDATE dnssec_keys SET state = ? WHERE id = ? AND state = ?")
            .bind(KeyState::EdgeSigner.as_str())
            .bind(key_id)
            .bind(from_state.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_err("advance key state", e))?;
        if res.rows_affected() == 0 {
            // Someone else completed it; roll back our sibling updates.
            return Err(KdcError::PreconditionFailed(format!(
                "key {} is no longer in state {}",
                key_id,
                from_state.as_str()
            )));
        }

        sqlx::query(
            "UPDATE distributions SET status = ?, completed_at = ? WHERE dist_id = ?",
        )
        .bind(DistStatus::Completed.as_str())
        .bind(now)
        .bind(dist_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_err("complete distribution records", e))?;

        tx.commit()
            .await
            .map_err(|e| storage_err("commit complete distribution", e))
    }

    /// Drop all completed distribution records. Returns the affected
    /// distribution identifiers so callers can evict caches.
    pub async fn purge_completed(&self) -> Result<Vec<String>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT dist_id FROM distributions WHERE status = ?",
        )
        .bind(DistStatus::Completed.as_str())
        .fetch_all(self.pool())
        .await
        .map_err(|e| storage_err("select completed distributions", e))?;
        sqlx::query("DELETE FROM distributions WHERE status = ?")
            .bind(DistStatus::Completed.as_str())
            .execute(self.pool())
            .await
            .map_err(|e| storage_err("purge completed distributions", e))?;
        Ok(ids.into_iter().map(|(d,)| d).collect())
    }

    /// Age-based garbage collection of completed records, including
    /// confirmations that no longer belong to any record.
    pub async fn gc_completed(&self, older_than: i64) -> Result<Vec<String>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT dist_id FROM distributions \
             WHERE status = ? AND completed_at IS NOT NULL AND completed_at < ?",
        )
        .bind(DistStatus::Completed.as_str())
        .bind(older_than)
        .fetch_all(self.pool())
        .await
        .map_err(|e| storage_err("select aged distributions", e))?;

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| storage_err("begin gc", e))?;
        sqlx::query(
            "DELETE FROM distributions \
             WHERE status = ? AND completed_at IS NOT NULL AND completed_at < ?",
        )
        .bind(DistStatus::Completed.as_str())
        .bind(older_than)
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_err("gc distributions", e))?;
        sqlx::query(
            "DELETE FROM distribution_confirmations WHERE dist_id NOT IN \
             (SELECT DISTINCT dist_id FROM distributions)",
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_err("gc orphan confirmations", e))?;
        tx.commit().await.map_err(|e| storage_err("commit gc", e))?;

        Ok(ids.into_iter().map(|(d,)| d).collect())
    }
}
